//! Environment Export
//!
//! Derives the variables and PATH additions an installed toolchain needs and
//! renders them for common shells and for GitHub Actions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::info;

use droidup_core::{InstallerError, Result};

/// Output flavour for [`EnvExporter::render`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Bash,
    Fish,
    PowerShell,
    Cmd,
    /// `KEY=value` lines for `$GITHUB_ENV`
    Github,
}

impl ExportFormat {
    pub fn all() -> &'static [ExportFormat] {
        &[
            ExportFormat::Bash,
            ExportFormat::Fish,
            ExportFormat::PowerShell,
            ExportFormat::Cmd,
            ExportFormat::Github,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Bash => "bash",
            ExportFormat::Fish => "fish",
            ExportFormat::PowerShell => "powershell",
            ExportFormat::Cmd => "cmd",
            ExportFormat::Github => "github",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = InstallerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bash" | "sh" | "zsh" => Ok(ExportFormat::Bash),
            "fish" => Ok(ExportFormat::Fish),
            "powershell" | "pwsh" => Ok(ExportFormat::PowerShell),
            "cmd" => Ok(ExportFormat::Cmd),
            "github" => Ok(ExportFormat::Github),
            other => Err(InstallerError::InvalidArgument(format!("unknown export format '{}'", other))),
        }
    }
}

/// Environment of an installed toolchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvExporter {
    sdk_root: PathBuf,
    ndk_path: Option<PathBuf>,
}

impl EnvExporter {
    pub fn new(sdk_root: impl Into<PathBuf>, ndk_path: Option<PathBuf>) -> Self {
        Self {
            sdk_root: sdk_root.into(),
            ndk_path,
        }
    }

    pub fn sdk_root(&self) -> &Path {
        &self.sdk_root
    }

    /// Environment variables to set
    pub fn vars(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();

        let sdk = self.sdk_root.to_string_lossy().to_string();
        vars.insert("ANDROID_HOME".to_string(), sdk.clone());
        vars.insert("ANDROID_SDK_ROOT".to_string(), sdk);

        if let Some(ndk) = &self.ndk_path {
            let ndk = ndk.to_string_lossy().to_string();
            vars.insert("ANDROID_NDK_HOME".to_string(), ndk.clone());
            vars.insert("ANDROID_NDK_ROOT".to_string(), ndk);
        }

        vars
    }

    /// Directories to prepend to PATH, in order
    pub fn path_entries(&self) -> Vec<PathBuf> {
        vec![
            self.sdk_root.join("platform-tools"),
            self.sdk_root.join("cmdline-tools").join("latest").join("bin"),
        ]
    }

    /// PATH entries joined with the host separator
    pub fn path_fragment(&self) -> String {
        let sep = if cfg!(windows) { ";" } else { ":" };
        self.path_strings().join(sep)
    }

    fn path_strings(&self) -> Vec<String> {
        self.path_entries()
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect()
    }

    /// Render the variables and PATH update for `format`
    pub fn render(&self, format: ExportFormat) -> String {
        let vars = self.vars();
        let paths = self.path_strings();
        let mut out = String::new();

        match format {
            ExportFormat::Bash => {
                for (key, value) in &vars {
                    out.push_str(&format!("export {}=\"{}\"\n", key, escape_posix(value)));
                }
                let joined: Vec<String> = paths.iter().map(|p| escape_posix(p)).collect();
                out.push_str(&format!("export PATH=\"{}:$PATH\"\n", joined.join(":")));
            }
            ExportFormat::Fish => {
                for (key, value) in &vars {
                    out.push_str(&format!("set -gx {} \"{}\"\n", key, escape_posix(value)));
                }
                let quoted: Vec<String> = paths.iter().map(|p| format!("\"{}\"", escape_posix(p))).collect();
                out.push_str(&format!("set -gx PATH {} $PATH\n", quoted.join(" ")));
            }
            ExportFormat::PowerShell => {
                for (key, value) in &vars {
                    out.push_str(&format!("$env:{} = \"{}\"\n", key, escape_powershell(value)));
                }
                let mut expr: Vec<String> = paths.iter().map(|p| format!("\"{}\"", escape_powershell(p))).collect();
                expr.push("$env:PATH".to_string());
                out.push_str(&format!("$env:PATH = {}\n", expr.join(" + [IO.Path]::PathSeparator + ")));
            }
            ExportFormat::Cmd => {
                for (key, value) in &vars {
                    out.push_str(&format!("set \"{}={}\"\n", key, value));
                }
                out.push_str(&format!("set \"PATH={};%PATH%\"\n", paths.join(";")));
            }
            ExportFormat::Github => {
                for (key, value) in &vars {
                    out.push_str(&format!("{}={}\n", key, value));
                }
            }
        }

        out
    }

    /// Lines for `$GITHUB_PATH`, one directory each
    pub fn render_github_path(&self) -> String {
        self.path_strings().iter().map(|p| format!("{}\n", p)).collect()
    }

    /// Write a sourceable script in `format`
    pub async fn write_script(&self, path: &Path, format: ExportFormat) -> Result<()> {
        let header = match format {
            ExportFormat::Bash => "#!/usr/bin/env bash\n# Android toolchain environment (droidup)\n",
            ExportFormat::Fish | ExportFormat::PowerShell => "# Android toolchain environment (droidup)\n",
            ExportFormat::Cmd => "@echo off\nREM Android toolchain environment (droidup)\n",
            ExportFormat::Github => "",
        };
        let content = format!("{}{}", header, self.render(format));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| InstallerError::io_at(parent, e))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| InstallerError::io_at(path, e))?;

        #[cfg(unix)]
        if format == ExportFormat::Bash {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| InstallerError::io_at(path, e))?;
        }

        info!("Wrote {} environment to {:?}", format, path);
        Ok(())
    }
}

fn escape_posix(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_powershell(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '$' | '`') {
            out.push('`');
        }
        out.push(c);
    }
    out
}
