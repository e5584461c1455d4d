//! Cutover session state
//!
//! A session lives for a single invocation and is never persisted. It tracks
//! the current phase, enforces the legal transitions and keeps the event
//! history of the run.

use crate::config::PrecheckConfig;
use crate::error::{Result, SwitchoverError};
use crate::events::{CutoverEvent, EventLogger};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// Phase of a cutover run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutoverPhase {
    /// Preconditions are being checked; nothing has been mutated
    Precheck,
    /// The operator approved the cutover
    Confirmed,
    /// Client traffic is suspended
    Paused,
    /// The proxy config is being switched
    Switching,
    /// Client traffic is flowing again
    Resumed,
    /// The proxy was verified to route to the expected side
    Verified,
    /// A step after the pause failed
    Failed,
}

impl CutoverPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Precheck => "precheck",
            Self::Confirmed => "confirmed",
            Self::Paused => "paused",
            Self::Switching => "switching",
            Self::Resumed => "resumed",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }

    /// Check whether `next` may follow this phase
    pub fn can_transition_to(&self, next: CutoverPhase) -> bool {
        use CutoverPhase::*;
        matches!(
            (self, next),
            (Precheck, Confirmed)
                | (Confirmed, Paused)
                | (Paused, Switching)
                | (Switching, Resumed)
                | (Resumed, Verified)
                | (Paused, Failed)
                | (Switching, Failed)
                | (Resumed, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Failed)
    }
}

impl std::fmt::Display for CutoverPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Row-count thresholds checked before the cutover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMinimums {
    /// Table counted on both sides
    pub table: String,
    pub minimum_rows: i64,
}

impl ResourceMinimums {
    pub fn new(table: impl Into<String>, minimum_rows: i64) -> Self {
        Self {
            table: table.into(),
            minimum_rows,
        }
    }

    pub fn from_config(config: &PrecheckConfig) -> Self {
        Self::new(config.reference_table.clone(), config.minimum_rows)
    }
}

/// How a cutover run ended
#[derive(Debug)]
pub enum CutoverOutcome {
    /// Traffic moved and the proxy was verified
    Completed,
    /// The operator declined after the prechecks passed
    Declined,
    /// A step after the pause failed and traffic was resumed
    RolledBack {
        phase: CutoverPhase,
        error: SwitchoverError,
    },
}

impl CutoverOutcome {
    /// Whether the run should be reported as successful
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Declined)
    }
}

/// One cutover run
#[derive(Debug)]
pub struct CutoverSession {
    id: Uuid,
    dry_run: bool,
    minimums: ResourceMinimums,
    phase: CutoverPhase,
    events: Vec<CutoverEvent>,
    result: Option<bool>,
    started: Instant,
    logger: EventLogger,
}

impl CutoverSession {
    pub fn new(dry_run: bool, minimums: ResourceMinimums) -> Self {
        Self::with_logger(dry_run, minimums, EventLogger::default())
    }

    pub fn with_logger(dry_run: bool, minimums: ResourceMinimums, logger: EventLogger) -> Self {
        let id = Uuid::new_v4();
        let mut session = Self {
            id,
            dry_run,
            minimums,
            phase: CutoverPhase::Precheck,
            events: Vec::new(),
            result: None,
            started: Instant::now(),
            logger,
        };
        session.record(CutoverEvent::session_started(id.to_string(), dry_run));
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn minimums(&self) -> &ResourceMinimums {
        &self.minimums
    }

    pub fn phase(&self) -> CutoverPhase {
        self.phase
    }

    pub fn events(&self) -> &[CutoverEvent] {
        &self.events
    }

    /// Final result, once the run has finished
    pub fn result(&self) -> Option<bool> {
        self.result
    }

    /// Phases visited, in order, starting with `precheck`
    pub fn phase_history(&self) -> Vec<CutoverPhase> {
        let mut history = vec![CutoverPhase::Precheck];
        history.extend(self.events.iter().filter_map(|e| match e {
            CutoverEvent::PhaseChanged { to, .. } => parse_phase(to),
            _ => None,
        }));
        history
    }

    fn record(&mut self, event: CutoverEvent) {
        self.logger.log(&event);
        self.events.push(event);
    }

    /// Move to `next`, rejecting transitions the state machine does not allow
    pub fn advance(&mut self, next: CutoverPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(SwitchoverError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }

        let event = CutoverEvent::phase_changed(self.id.to_string(), self.phase.as_str(), next.as_str());
        self.phase = next;
        self.record(event);
        Ok(())
    }

    /// Record a rollback and move to `failed`
    pub fn fail(&mut self, error: &SwitchoverError) -> Result<()> {
        let event = CutoverEvent::rollback_started(self.id.to_string(), self.phase.as_str(), error.to_string());
        self.record(event);
        self.advance(CutoverPhase::Failed)
    }

    pub fn decline(&mut self) {
        let event = CutoverEvent::declined(self.id.to_string());
        self.record(event);
    }

    /// Store the final result
    pub fn finish(&mut self, success: bool) {
        self.result = Some(success);
        let duration_ms = self.started.elapsed().as_millis() as u64;
        let event = CutoverEvent::session_finished(self.id.to_string(), success, duration_ms);
        self.record(event);
    }
}

fn parse_phase(s: &str) -> Option<CutoverPhase> {
    use CutoverPhase::*;
    [Precheck, Confirmed, Paused, Switching, Resumed, Verified, Failed]
        .into_iter()
        .find(|p| p.as_str() == s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CutoverSession {
        CutoverSession::with_logger(true, ResourceMinimums::new("Patient", 100), EventLogger::new(false))
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = session();
        for next in [
            CutoverPhase::Confirmed,
            CutoverPhase::Paused,
            CutoverPhase::Switching,
            CutoverPhase::Resumed,
            CutoverPhase::Verified,
        ] {
            s.advance(next).unwrap();
        }
        assert!(s.phase().is_terminal());
        assert_eq!(s.phase_history().len(), 6);
    }

    #[test]
    fn test_cannot_skip_pause() {
        let mut s = session();
        s.advance(CutoverPhase::Confirmed).unwrap();
        let err = s.advance(CutoverPhase::Switching).unwrap_err();
        assert!(matches!(err, SwitchoverError::InvalidTransition { .. }));
        assert_eq!(s.phase(), CutoverPhase::Confirmed);
    }

    #[test]
    fn test_failed_only_after_pause() {
        assert!(!CutoverPhase::Precheck.can_transition_to(CutoverPhase::Failed));
        assert!(!CutoverPhase::Confirmed.can_transition_to(CutoverPhase::Failed));
        assert!(CutoverPhase::Paused.can_transition_to(CutoverPhase::Failed));
        assert!(CutoverPhase::Switching.can_transition_to(CutoverPhase::Failed));
        assert!(CutoverPhase::Resumed.can_transition_to(CutoverPhase::Failed));
        assert!(!CutoverPhase::Verified.can_transition_to(CutoverPhase::Failed));
    }

    #[test]
    fn test_fail_records_rollback() {
        let mut s = session();
        s.advance(CutoverPhase::Confirmed).unwrap();
        s.advance(CutoverPhase::Paused).unwrap();
        s.fail(&SwitchoverError::Proxy("boom".into())).unwrap();

        assert_eq!(s.phase(), CutoverPhase::Failed);
        assert!(s
            .events()
            .iter()
            .any(|e| matches!(e, CutoverEvent::RollbackStarted { phase, .. } if phase == "paused")));
    }

    #[test]
    fn test_finish_sets_result() {
        let mut s = session();
        assert_eq!(s.result(), None);
        s.finish(false);
        assert_eq!(s.result(), Some(false));
        assert!(matches!(s.events().last(), Some(CutoverEvent::SessionFinished { success: false, .. })));
    }

    #[test]
    fn test_outcome_success() {
        assert!(CutoverOutcome::Completed.is_success());
        assert!(CutoverOutcome::Declined.is_success());
        assert!(!CutoverOutcome::RolledBack {
            phase: CutoverPhase::Paused,
            error: SwitchoverError::Proxy("x".into()),
        }
        .is_success());
    }
}
