//! Proxy controller
//!
//! Suspends and releases client traffic for one logical database through the
//! PgBouncer admin console. In dry-run mode nothing is sent; the controller
//! sleeps for a realistic duration and logs what it would have done.

use crate::config::ProxyConfig;
use crate::db::{PoolerAck, PoolerAdmin};
use crate::error::{Result, SwitchoverError};
use crate::models::{ProxyDatabaseEntry, ProxyPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Prefix for log lines describing skipped mutations
pub const DRY_RUN_PREFIX: &str = "DRY RUN: ";

/// Issues PAUSE/RESUME and reads routing state
pub struct ProxyController {
    admin: Arc<dyn PoolerAdmin>,
    dry_run: bool,
    simulated_pause: Duration,
    simulated_resume: Duration,
}

impl ProxyController {
    pub fn new(admin: Arc<dyn PoolerAdmin>, dry_run: bool, config: &ProxyConfig) -> Self {
        Self {
            admin,
            dry_run,
            simulated_pause: Duration::from_millis(config.simulated_pause_ms),
            simulated_resume: Duration::from_millis(config.simulated_resume_ms),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// All routing entries
    pub async fn databases(&self) -> Result<Vec<ProxyDatabaseEntry>> {
        self.admin.show_databases().await
    }

    /// All pools
    pub async fn pools(&self) -> Result<Vec<ProxyPool>> {
        self.admin.show_pools().await
    }

    /// Routing entry for a logical database
    pub async fn find_database(&self, db_name: &str) -> Result<ProxyDatabaseEntry> {
        let databases = self.admin.show_databases().await?;
        let names: Vec<&str> = databases.iter().map(|d| d.name.as_str()).collect();

        databases
            .iter()
            .find(|d| d.name == db_name)
            .cloned()
            .ok_or_else(|| {
                SwitchoverError::Proxy(format!(
                    "{} database not found in PgBouncer (found: {})",
                    db_name,
                    names.join(", ")
                ))
            })
    }

    /// Suspend client traffic for `db_name`
    ///
    /// Returns `None` in dry-run mode. Fails only when the console answers
    /// with an error. The caller is responsible for checking that the
    /// database is not already paused.
    pub async fn pause(&self, db_name: &str) -> Result<Option<PoolerAck>> {
        if self.dry_run {
            info!(db = %db_name, "{}Would execute PAUSE {}", DRY_RUN_PREFIX, db_name);
            tokio::time::sleep(self.simulated_pause).await;
            info!(db = %db_name, "{}Database paused", DRY_RUN_PREFIX);
            return Ok(None);
        }

        info!(db = %db_name, "Pausing database");
        let ack = self.admin.pause(db_name).await?;
        info!(db = %db_name, statement = %ack.statement, rows = ack.rows_affected, "Database paused");
        Ok(Some(ack))
    }

    /// Release client traffic for `db_name`
    pub async fn resume(&self, db_name: &str) -> Result<Option<PoolerAck>> {
        if self.dry_run {
            info!(db = %db_name, "{}Would execute RESUME {}", DRY_RUN_PREFIX, db_name);
            tokio::time::sleep(self.simulated_resume).await;
            info!(db = %db_name, "{}Database resumed", DRY_RUN_PREFIX);
            return Ok(None);
        }

        info!(db = %db_name, "Resuming database");
        let ack = self.admin.resume(db_name).await?;
        info!(db = %db_name, statement = %ack.statement, rows = ack.rows_affected, "Database resumed");
        Ok(Some(ack))
    }
}
