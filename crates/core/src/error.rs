//! Error types for droidup
//!
//! Centralized error taxonomy using thiserror. Adapters raise these typed
//! errors; the installer attaches progress context and re-raises them.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for provisioning operations
#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    #[error("Download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Failed to unpack {archive}: {message}")]
    Unpack { archive: PathBuf, message: String },

    #[error("sdkmanager failed for '{package}' (exit code {exit_code:?})\n{output}")]
    SdkManager {
        package: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("avdmanager: {0}")]
    AvdManager(String),

    #[error("Permission denied writing {path}: {suggestion}")]
    Permission { path: PathBuf, suggestion: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for droidup operations
pub type Result<T> = std::result::Result<T, InstallerError>;

/// Coarse classification used by logs and the CLI exit path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    ComponentNotFound,
    Download,
    Timeout,
    Unpack,
    SdkManager,
    AvdManager,
    Permission,
    Other,
}

impl InstallerError {
    /// Wrap an IO error that happened while touching `path`.
    ///
    /// A denied write becomes [`InstallerError::Permission`] carrying a
    /// suggested fix; everything else stays an IO error.
    pub fn io_at(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        let path = path.as_ref();
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            InstallerError::Permission {
                path: path.to_path_buf(),
                suggestion: format!(
                    "make {} writable by the current user or choose another --sdk-root",
                    path.display()
                ),
            }
        } else {
            InstallerError::Io(std::io::Error::new(
                err.kind(),
                format!("{}: {}", path.display(), err),
            ))
        }
    }

    /// Check if this error may succeed when the same operation is retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InstallerError::Download { .. } | InstallerError::Timeout(_)
        )
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            InstallerError::ComponentNotFound(_) => ErrorKind::ComponentNotFound,
            InstallerError::Download { .. } => ErrorKind::Download,
            InstallerError::Timeout(_) => ErrorKind::Timeout,
            InstallerError::Unpack { .. } => ErrorKind::Unpack,
            InstallerError::SdkManager { .. } => ErrorKind::SdkManager,
            InstallerError::AvdManager(_) => ErrorKind::AvdManager,
            InstallerError::Permission { .. } => ErrorKind::Permission,
            _ => ErrorKind::Other,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            InstallerError::Io(e) => format!("File operation failed: {}", e),
            InstallerError::Download { url, message } => {
                format!("Download failed ({}): {}. Please check your connection.", url, message)
            }
            InstallerError::Timeout(what) => {
                format!("{} took too long. Re-run to resume; finished steps are kept.", what)
            }
            InstallerError::SdkManager { package, output, .. } => {
                format!("sdkmanager could not install {}:\n{}", package, output.trim())
            }
            InstallerError::Permission { path, suggestion } => {
                format!("Permission denied for {}. Try to {}.", path.display(), suggestion)
            }
            _ => self.to_string(),
        }
    }
}
