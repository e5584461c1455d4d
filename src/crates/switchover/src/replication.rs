//! Replication convergence watcher
//!
//! Runs while client traffic is paused, so the polling budget is small and
//! fixed: no backoff, no retries on query errors.

use crate::config::ReplicationConfig;
use crate::db::PostgresEndpoint;
use crate::error::{Result, SwitchoverError};
use crate::models::replication::lag_for_slot;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Outcome of a converged wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convergence {
    /// Number of polls issued, including the converged one
    pub attempts: u32,
    /// Lag observed on the converged poll
    pub lag_bytes: i64,
    pub elapsed: Duration,
}

/// Polls one slot on the source until its lag drops below the threshold
pub struct ReplicationWatcher {
    source: Arc<dyn PostgresEndpoint>,
    slot: String,
    poll_interval: Duration,
    max_attempts: u32,
    threshold_bytes: i64,
}

impl ReplicationWatcher {
    pub fn new(source: Arc<dyn PostgresEndpoint>, slot: impl Into<String>, config: &ReplicationConfig) -> Self {
        Self {
            source,
            slot: slot.into(),
            poll_interval: config.poll_interval(),
            max_attempts: config.max_attempts.max(1),
            threshold_bytes: config.convergence_threshold_bytes,
        }
    }

    /// Current byte lag of the watched slot
    pub async fn current_lag(&self) -> Result<i64> {
        let slots = self.source.replication_slots().await?;
        lag_for_slot(&slots, &self.slot)
    }

    /// Poll until the lag is strictly below the threshold
    ///
    /// # Returns
    /// The poll count and final lag, or `ReplicationTimeout` carrying the last
    /// observed lag once `max_attempts` polls have not converged.
    pub async fn wait_for_convergence(&self) -> Result<Convergence> {
        info!(slot = %self.slot, threshold_bytes = self.threshold_bytes, "Waiting for replication");
        let start = Instant::now();
        let mut last_lag = 0;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                sleep(self.poll_interval).await;
            }

            last_lag = self.current_lag().await?;

            if last_lag < self.threshold_bytes {
                info!(slot = %self.slot, lag_bytes = last_lag, attempts = attempt, "Replication lag converged");
                return Ok(Convergence {
                    attempts: attempt,
                    lag_bytes: last_lag,
                    elapsed: start.elapsed(),
                });
            }

            debug!(slot = %self.slot, lag_bytes = last_lag, attempt = attempt, "Replication lag");
        }

        Err(SwitchoverError::ReplicationTimeout {
            slot: self.slot.clone(),
            last_lag_bytes: last_lag,
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use crate::testing::FakePostgres;

    fn watcher(source: &Arc<FakePostgres>, threshold: i64) -> ReplicationWatcher {
        let config = ReplicationConfig {
            convergence_threshold_bytes: threshold,
            ..ReplicationConfig::default()
        };
        ReplicationWatcher::new(source.clone(), "my_replication_slot", &config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_on_third_poll() {
        let blue = Arc::new(FakePostgres::new(Role::Blue, "PG14"));
        blue.script_lag("my_replication_slot", &[2048, 1500, 512]);

        let start = Instant::now();
        let result = watcher(&blue, 1024).wait_for_convergence().await.unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(result.lag_bytes, 512);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_last_lag() {
        let blue = Arc::new(FakePostgres::new(Role::Blue, "PG14"));
        blue.script_lag("my_replication_slot", &[4096]);

        let err = watcher(&blue, 1).wait_for_convergence().await.unwrap_err();

        assert!(err.to_string().contains("Last diff_bytes: 4096"));
        assert!(matches!(err, SwitchoverError::ReplicationTimeout { attempts: 40, .. }));
        assert_eq!(blue.slot_polls(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_lag_converges_immediately() {
        let blue = Arc::new(FakePostgres::new(Role::Blue, "PG14"));
        blue.script_lag("my_replication_slot", &[0]);

        let result = watcher(&blue, 1).wait_for_convergence().await.unwrap();
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_missing_slot_fails() {
        let blue = Arc::new(FakePostgres::new(Role::Blue, "PG14"));
        assert!(watcher(&blue, 1).wait_for_convergence().await.is_err());
    }
}
