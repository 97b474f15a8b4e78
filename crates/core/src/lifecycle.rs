//! Installer Lifecycle
//!
//! Tracks the per-invocation state machine
//! `Detecting → Planning → Executing → Verifying → Done | Failed | Cancelled`,
//! owns the cooperative cancellation token and fans step records out to the
//! event bus and the optional JSON-Lines step log.

use std::sync::Arc;

use parking_lot::RwLock;
pub use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{Event, EventBus, StepLog, StepRecord, StepStatus};

/// Installer state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    /// Not started
    Idle,
    /// Probing the host
    Detecting,
    /// Scanning the SDK root and computing the plan
    Planning,
    /// Running plan step `step` (1-based) of `total`
    Executing { step: usize, total: usize },
    /// Re-scanning the filesystem after execution
    Verifying,
    Done,
    Failed,
    Cancelled,
}

impl InstallState {
    /// Whether the run has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallState::Done | InstallState::Failed | InstallState::Cancelled)
    }
}

/// Shared state of one installer instance
pub struct Lifecycle {
    state: RwLock<InstallState>,
    event_bus: Arc<EventBus>,
    cancellation: CancellationToken,
    step_log: Option<StepLog>,
}

impl Lifecycle {
    pub fn new(step_log: Option<StepLog>) -> Self {
        Self {
            state: RwLock::new(InstallState::Idle),
            event_bus: Arc::new(EventBus::new()),
            cancellation: CancellationToken::new(),
            step_log,
        }
    }

    /// Get current state
    pub fn state(&self) -> InstallState {
        self.state.read().clone()
    }

    /// Set state and publish the transition
    pub fn set_state(&self, state: InstallState) {
        {
            let mut current = self.state.write();
            debug!("State transition: {:?} -> {:?}", *current, state);
            *current = state.clone();
        }
        self.event_bus.emit(Event::StateChanged(state));
    }

    /// Get the event bus for subscribing to events
    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// Token checked between plan steps; cancel it from another task to stop a run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Publish a step record to tracing, the event bus and the step log
    pub fn record_step(&self, record: StepRecord) {
        match record.status {
            StepStatus::Failed => warn!(step = %record.step, "{}", record.detail),
            StepStatus::Started | StepStatus::Retrying => debug!(step = %record.step, status = ?record.status, "{}", record.detail),
            _ => info!(step = %record.step, status = ?record.status, duration_ms = record.duration_ms, "{}", record.detail),
        }

        if let Some(log) = &self.step_log {
            if let Err(e) = log.append(&record) {
                warn!("Failed to append to step log {:?}: {}", log.path(), e);
            }
        }

        self.event_bus.emit(Event::Step(record));
    }

    /// Publish a non-fatal warning
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.event_bus.emit(Event::Warning(message));
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let lifecycle = Lifecycle::default();
        let sub = lifecycle.event_bus().subscribe();
        assert_eq!(lifecycle.state(), InstallState::Idle);

        lifecycle.set_state(InstallState::Executing { step: 1, total: 3 });
        assert_eq!(lifecycle.state(), InstallState::Executing { step: 1, total: 3 });
        assert!(!lifecycle.state().is_terminal());

        lifecycle.set_state(InstallState::Done);
        assert!(lifecycle.state().is_terminal());

        let states: Vec<InstallState> = sub
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                Event::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(states.len(), 2);
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let lifecycle = Lifecycle::default();
        let token = lifecycle.cancellation_token();
        assert!(!lifecycle.is_cancelled());
        token.cancel();
        assert!(lifecycle.is_cancelled());
    }
}
