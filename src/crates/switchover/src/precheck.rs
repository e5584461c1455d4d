//! Precondition validator
//!
//! Runs every read-only check that must pass before the operator is asked to
//! confirm. Checks run in a fixed order and the first failure aborts the
//! run; nothing has been mutated at that point, so the whole run can simply
//! be retried once the cause is fixed.

use crate::config::SwitchoverConfig;
use crate::equivalence::EquivalenceSummary;
use crate::error::{Result, SwitchoverError};
use crate::models::{PoolMode, ProxyDatabaseEntry, SequenceSnapshot, Side, TimeWindow};
use crate::orchestrator::CutoverComponents;
use crate::remote_config::RemotePrecheck;
use crate::sequences::SyncMode;
use crate::session::ResourceMinimums;
use crate::versions::ServerVersions;
use chrono::{DateTime, Duration, Utc};
use futures::future::try_join;
use tracing::info;

/// Thresholds and targets the prechecks run against
#[derive(Debug, Clone)]
pub struct PrecheckSettings {
    /// Host the proxy entry must currently point at
    pub blue_host: String,
    pub minimums: ResourceMinimums,
    pub audit_table: String,
    pub audit_start: DateTime<Utc>,
    pub audit_settle: Duration,
    pub max_lag_bytes: i64,
}

impl PrecheckSettings {
    pub fn from_config(config: &SwitchoverConfig, minimums: ResourceMinimums) -> Result<Self> {
        Ok(Self {
            blue_host: config.endpoints.blue.routed_host().to_string(),
            minimums,
            audit_table: config.precheck.audit_table.clone(),
            audit_start: config.precheck.audit_start()?,
            audit_settle: Duration::minutes(config.precheck.audit_settle_minutes),
            max_lag_bytes: config.cutover.max_precheck_lag_bytes,
        })
    }

    /// Comparison window ending `audit_settle` before `now`
    pub fn audit_window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::settled(self.audit_start, now, self.audit_settle)
    }
}

/// Everything the prechecks observed
#[derive(Debug, Clone)]
pub struct PrecheckReport {
    pub entry: ProxyDatabaseEntry,
    pub versions: ServerVersions,
    pub row_counts: Vec<(Side, i64)>,
    pub equivalence: EquivalenceSummary,
    pub lag_bytes: i64,
    pub sequences: Vec<SequenceSnapshot>,
    pub remote: RemotePrecheck,
}

pub struct PreconditionValidator<'a> {
    components: &'a CutoverComponents,
    settings: &'a PrecheckSettings,
}

impl<'a> PreconditionValidator<'a> {
    pub fn new(components: &'a CutoverComponents, settings: &'a PrecheckSettings) -> Self {
        Self {
            components,
            settings,
        }
    }

    /// Run every check in order, stopping at the first failure
    pub async fn run(&self) -> Result<PrecheckReport> {
        info!("Checking preconditions");

        let entry = self.check_routing().await?;
        let versions = self.components.versions.check(Side::Blue).await?;
        let row_counts = self.check_resource_minimums().await?;

        let window = self.settings.audit_window(Utc::now());
        let equivalence = self
            .components
            .equivalence
            .check(&self.settings.audit_table, &window)
            .await?;

        let lag_bytes = self.check_replication_lag().await?;

        let sequences = self.components.sequences.run(SyncMode::Precheck).await?.snapshots;

        info!("Checking PgBouncer process status and accessibility");
        let remote = self.components.remote.precheck(Side::Green).await?;

        info!("Precondition checks passed");
        Ok(PrecheckReport {
            entry,
            versions,
            row_counts,
            equivalence,
            lag_bytes,
            sequences,
            remote,
        })
    }

    /// The proxy entry points at blue, is not paused and pools by transaction
    pub async fn check_routing(&self) -> Result<ProxyDatabaseEntry> {
        let db_name = &self.components.db_name;
        let entry = self.components.proxy.find_database(db_name).await?;
        check_entry(&entry, &self.settings.blue_host)?;
        info!(db = %db_name, host = %self.settings.blue_host, "PgBouncer database is routed to blue, not paused, transaction pooling");
        Ok(entry)
    }

    /// Both sides hold at least the minimum number of reference rows
    pub async fn check_resource_minimums(&self) -> Result<Vec<(Side, i64)>> {
        let table = &self.settings.minimums.table;
        let (blue, green) = try_join(
            self.components.blue.count_rows(table),
            self.components.green.count_rows(table),
        )
        .await?;

        let counts = vec![(Side::Blue, blue), (Side::Green, green)];
        check_minimums(&self.settings.minimums, &counts)?;

        for (side, count) in &counts {
            info!(side = %side, table = %table, count = count, "Database has enough rows");
        }
        Ok(counts)
    }

    /// Current replication lag does not exceed the precheck limit
    pub async fn check_replication_lag(&self) -> Result<i64> {
        let lag_bytes = self.components.watcher.current_lag().await?;
        if lag_bytes > self.settings.max_lag_bytes {
            return Err(SwitchoverError::precondition(format!(
                "Replication lag is too high: {} bytes (limit {})",
                lag_bytes, self.settings.max_lag_bytes
            )));
        }
        info!(lag_bytes = lag_bytes, "Replication lag is low enough to proceed");
        Ok(lag_bytes)
    }
}

/// Routing, pause state and pool mode of the proxy entry
pub fn check_entry(entry: &ProxyDatabaseEntry, blue_host: &str) -> Result<()> {
    if !entry.points_at(blue_host) {
        return Err(SwitchoverError::precondition(format!(
            "{} database host is not blue: {} (expected {})",
            entry.name,
            entry.host.as_deref().unwrap_or("<none>"),
            blue_host
        )));
    }
    if entry.paused {
        return Err(SwitchoverError::precondition(format!(
            "{} database is already paused",
            entry.name
        )));
    }
    if entry.pool_mode != Some(PoolMode::Transaction) {
        return Err(SwitchoverError::precondition(format!(
            "{} database pool_mode is not \"transaction\": {}",
            entry.name,
            entry
                .pool_mode
                .map(|m| m.to_string())
                .unwrap_or_else(|| "<inherited>".to_string())
        )));
    }
    Ok(())
}

/// Fail citing every side below the minimum
pub fn check_minimums(minimums: &ResourceMinimums, counts: &[(Side, i64)]) -> Result<()> {
    let insufficient: Vec<String> = counts
        .iter()
        .filter(|(_, count)| *count < minimums.minimum_rows)
        .map(|(side, count)| format!("{} has {}", side, count))
        .collect();

    if insufficient.is_empty() {
        Ok(())
    } else {
        Err(SwitchoverError::InsufficientRows {
            table: minimums.table.clone(),
            minimum: minimums.minimum_rows,
            sides: insufficient,
        })
    }
}
