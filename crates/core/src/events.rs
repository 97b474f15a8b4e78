//! Event System
//!
//! Pub/sub event bus for installer progress, plus the JSON-Lines step log.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{InstallerError, Result};
use crate::lifecycle::InstallState;

/// Outcome of a plan step as reported in the step log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    /// The step changed the filesystem
    Performed,
    /// The component turned out to be present already
    Satisfied,
    /// Dry-run: the step was only described
    Simulated,
    Retrying,
    Failed,
    Cancelled,
}

/// One structured log record per step event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub timestamp: DateTime<Utc>,
    pub step: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub detail: String,
}

impl StepRecord {
    pub fn new(step: impl Into<String>, status: StepStatus, duration_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            step: step.into(),
            status,
            duration_ms,
            detail: detail.into(),
        }
    }

    /// Render as a single JSON line (no trailing newline)
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Events emitted during a provisioning run
#[derive(Debug, Clone)]
pub enum Event {
    /// Installer state changed
    StateChanged(InstallState),
    /// A plan step produced a record
    Step(StepRecord),
    /// Non-fatal observation worth surfacing to the user
    Warning(String),
}

/// Subscriber handle for receiving events
#[derive(Clone)]
pub struct EventSubscription {
    receiver: Receiver<Event>,
}

impl EventSubscription {
    /// Receive the next event (blocking)
    pub fn recv(&self) -> std::result::Result<Event, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> std::result::Result<Event, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drain every event queued so far
    pub fn drain(&self) -> Vec<Event> {
        self.receiver.try_iter().collect()
    }
}

/// Event bus for publish/subscribe pattern
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<Event>>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> EventSubscription {
        let (sender, receiver) = unbounded();
        self.subscribers.write().push(sender);
        EventSubscription { receiver }
    }

    /// Emit an event to all subscribers, dropping the ones that went away
    pub fn emit(&self, event: Event) -> usize {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        let delivered = subscribers.len();

        debug!("Event {:?} delivered to {} subscribers", event, delivered);
        delivered
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends [`StepRecord`]s to a JSON-Lines file
pub struct StepLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl StepLog {
    /// Open (or create) the log file in append mode
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| InstallerError::io_at(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| InstallerError::io_at(&path, e))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a line
    pub fn append(&self, record: &StepRecord) -> Result<()> {
        let line = record.to_json_line()?;
        let mut file = self.file.lock();
        writeln!(file, "{}", line).map_err(|e| InstallerError::io_at(&self.path, e))?;
        Ok(())
    }
}
