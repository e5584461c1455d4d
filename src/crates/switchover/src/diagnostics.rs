//! Read-only inspection of a cutover pair
//!
//! Collects what an operator looks at before scheduling a cutover: endpoint
//! connectivity, proxy routing, pools, backends still connected to blue,
//! replication slots, sequence state and any audit rows that differ. Nothing here mutates either side.

use crate::config::SwitchoverConfig;
use crate::equivalence::DataEquivalenceChecker;
use crate::error::Result;
use crate::health::{check_connectivity, HealthReport};
use crate::models::{
    BackendConnection, ProxyDatabaseEntry, ProxyPool, ReplicationChannelStatus, RowMismatch, SequenceSnapshot,
    TimeWindow,
};
use crate::report;
use crate::resources::SessionResources;
use crate::sequences::SequenceSynchronizer;
use chrono::{Duration, Utc};
use colored::Colorize;
use tracing::{info, warn};

/// Snapshot of both sides and the pooler
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub health: HealthReport,
    pub databases: Vec<ProxyDatabaseEntry>,
    pub pools: Vec<ProxyPool>,
    /// Client backends connected to the blue database
    pub connections: Vec<BackendConnection>,
    pub slots: Vec<ReplicationChannelStatus>,
    pub sequences: Vec<SequenceSnapshot>,
    pub mismatches: Vec<RowMismatch>,
    /// Sections that could not be collected, as `(section, error)`
    pub failures: Vec<(String, String)>,
}

impl Diagnostics {
    pub fn is_clean(&self) -> bool {
        self.health.is_healthy() && self.failures.is_empty() && self.mismatches.is_empty()
    }

    /// Render every section to stdout
    pub fn print(&self) {
        println!("\n{}", "Connectivity".bold());
        println!("{}", report::health_table(&self.health));

        println!("\n{}", "PgBouncer databases".bold());
        println!("{}", report::databases_table(&self.databases));

        println!("\n{}", "PgBouncer pools".bold());
        println!("{}", report::pools_table(&self.pools));

        let active = self.connections.iter().filter(|c| c.is_active()).count();
        println!(
            "\n{} ({} connected, {} active)",
            "Blue connections".bold(),
            self.connections.len(),
            active
        );
        println!("{}", report::connections_table(&self.connections));

        println!("\n{}", "Replication slots".bold());
        println!("{}", report::slots_table(&self.slots));

        println!("\n{}", "Sequences".bold());
        println!("{}", report::sequences_table(&self.sequences));

        if !self.mismatches.is_empty() {
            println!("\n{}", "Audit rows that differ".bold());
            println!("{}", report::mismatches_table(&self.mismatches));
        }

        for (section, error) in &self.failures {
            println!("{} {}: {}", "✗".red(), section, error);
        }
    }
}

fn collect<T: Default>(section: &str, result: Result<T>, failures: &mut Vec<(String, String)>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(section = %section, error = %e, "Diagnostic section failed");
            failures.push((section.to_string(), e.to_string()));
            T::default()
        }
    }
}

/// Gather diagnostics from already-acquired resources
pub async fn gather(resources: &SessionResources, config: &SwitchoverConfig) -> Result<Diagnostics> {
    let health = check_connectivity(
        &[resources.blue.clone(), resources.green.clone(), resources.proxy.clone()],
        resources.pooler.clone(),
    )
    .await;

    let mut failures = Vec::new();

    let databases = collect("databases", resources.pooler.show_databases().await, &mut failures);
    let pools = collect("pools", resources.pooler.show_pools().await, &mut failures);
    let connections = collect(
        "connections",
        resources
            .blue
            .active_connections(&config.endpoints.blue.database)
            .await,
        &mut failures,
    );
    let slots = collect("replication slots", resources.blue.replication_slots().await, &mut failures);

    let synchronizer = SequenceSynchronizer::new(
        resources.blue.clone(),
        resources.green.clone(),
        config.precheck.sequence_schema.clone(),
        true,
    );
    let sequences = collect("sequences", synchronizer.snapshot().await, &mut failures);

    let start = config.precheck.audit_start()?;
    let window = TimeWindow::settled(
        start,
        Utc::now(),
        Duration::minutes(config.precheck.audit_settle_minutes),
    );
    let checker = DataEquivalenceChecker::new(resources.blue.clone(), resources.green.clone());
    let mismatches = collect(
        "audit rows",
        checker.mismatches(&config.precheck.audit_table, &window).await,
        &mut failures,
    );

    info!(
        status = %health.status,
        failures = failures.len(),
        mismatches = mismatches.len(),
        "Diagnostics collected"
    );

    Ok(Diagnostics {
        health,
        databases,
        pools,
        connections,
        slots,
        sequences,
        mismatches,
        failures,
    })
}

/// Connect without a remote session, gather diagnostics and release
pub async fn run_check(config: &SwitchoverConfig) -> Result<Diagnostics> {
    let resources = SessionResources::acquire(config, false).await?;
    let diagnostics = gather(&resources, config).await;
    resources.release().await;
    diagnostics
}
