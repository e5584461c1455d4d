//! Cutover event logging
//!
//! Every phase transition of a cutover session is recorded as an event and
//! logged through tracing, so the run can be reconstructed from logs alone.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Event types for cutover tracking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CutoverEvent {
    /// Session created
    SessionStarted {
        session_id: String,
        dry_run: bool,
        timestamp: i64,
    },
    /// Session moved to a new phase
    PhaseChanged {
        session_id: String,
        from: String,
        to: String,
        timestamp: i64,
    },
    /// Operator declined the cutover
    Declined {
        session_id: String,
        timestamp: i64,
    },
    /// A failure after the pause triggered a resume
    RollbackStarted {
        session_id: String,
        phase: String,
        error: String,
        timestamp: i64,
    },
    /// Session finished
    SessionFinished {
        session_id: String,
        success: bool,
        timestamp: i64,
        duration_ms: u64,
    },
}

impl CutoverEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> i64 {
        match self {
            CutoverEvent::SessionStarted { timestamp, .. }
            | CutoverEvent::PhaseChanged { timestamp, .. }
            | CutoverEvent::Declined { timestamp, .. }
            | CutoverEvent::RollbackStarted { timestamp, .. }
            | CutoverEvent::SessionFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            CutoverEvent::SessionStarted { session_id, dry_run, .. } => {
                format!("Cutover session started: {} (dry_run={})", session_id, dry_run)
            }
            CutoverEvent::PhaseChanged { from, to, .. } => {
                format!("Phase changed: {} -> {}", from, to)
            }
            CutoverEvent::Declined { session_id, .. } => {
                format!("Cutover declined: {}", session_id)
            }
            CutoverEvent::RollbackStarted { phase, error, .. } => {
                format!("Rolling back from {}: {}", phase, error)
            }
            CutoverEvent::SessionFinished { success, duration_ms, .. } => {
                format!("Cutover session finished: success={} ({}ms)", success, duration_ms)
            }
        }
    }

    pub fn session_started(session_id: impl Into<String>, dry_run: bool) -> Self {
        CutoverEvent::SessionStarted {
            session_id: session_id.into(),
            dry_run,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn phase_changed(
        session_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        CutoverEvent::PhaseChanged {
            session_id: session_id.into(),
            from: from.into(),
            to: to.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn declined(session_id: impl Into<String>) -> Self {
        CutoverEvent::Declined {
            session_id: session_id.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn rollback_started(
        session_id: impl Into<String>,
        phase: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        CutoverEvent::RollbackStarted {
            session_id: session_id.into(),
            phase: phase.into(),
            error: error.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn session_finished(session_id: impl Into<String>, success: bool, duration_ms: u64) -> Self {
        CutoverEvent::SessionFinished {
            session_id: session_id.into(),
            success,
            timestamp: Utc::now().timestamp(),
            duration_ms,
        }
    }
}

/// Event logger for recording cutover events
#[derive(Debug, Clone)]
pub struct EventLogger {
    enabled: bool,
}

impl EventLogger {
    /// Create a new event logger
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Log a cutover event
    pub fn log(&self, event: &CutoverEvent) {
        if !self.enabled {
            return;
        }

        tracing::info!(
            event_type = ?event,
            timestamp = event.timestamp(),
            description = %event.description(),
            "Cutover event"
        );
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new(true)
    }
}
