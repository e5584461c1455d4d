//! Terminal rendering of snapshots and reports

use crate::health::{HealthReport, HealthStatus};
use crate::models::{
    BackendConnection, ProxyDatabaseEntry, ProxyPool, ReplicationChannelStatus, RowMismatch, SequenceSnapshot, Side,
};
use crate::precheck::PrecheckReport;
use crate::versions::ServerVersions;
use colored::Colorize;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct DatabaseRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Port")]
    port: String,
    #[tabled(rename = "Pool Mode")]
    pool_mode: String,
    #[tabled(rename = "Paused")]
    paused: bool,
    #[tabled(rename = "Disabled")]
    disabled: bool,
}

#[derive(Tabled)]
struct PoolRow {
    #[tabled(rename = "Database")]
    database: String,
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Cl Active")]
    cl_active: i64,
    #[tabled(rename = "Cl Waiting")]
    cl_waiting: i64,
    #[tabled(rename = "Sv Active")]
    sv_active: i64,
    #[tabled(rename = "Sv Idle")]
    sv_idle: i64,
    #[tabled(rename = "Max Wait")]
    maxwait: i64,
}

#[derive(Tabled)]
struct SlotRow {
    #[tabled(rename = "Slot")]
    slot: String,
    #[tabled(rename = "Active")]
    active: bool,
    #[tabled(rename = "Lag")]
    diff_size: String,
    #[tabled(rename = "Lag Bytes")]
    diff_bytes: String,
}

#[derive(Tabled)]
struct SequenceRow {
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Column")]
    column: String,
    #[tabled(rename = "Blue Last Value")]
    blue_last_value: String,
    #[tabled(rename = "Largest Blue")]
    largest_blue: String,
    #[tabled(rename = "Largest Green")]
    largest_green: String,
}

#[derive(Tabled)]
struct ConnectionRow {
    #[tabled(rename = "PID")]
    pid: i32,
    #[tabled(rename = "User")]
    usename: String,
    #[tabled(rename = "App")]
    application_name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Backend Start")]
    backend_start: String,
    #[tabled(rename = "Query")]
    query: String,
}

#[derive(Tabled)]
struct MismatchRow {
    #[tabled(rename = "N")]
    index: usize,
    #[tabled(rename = "Blue")]
    blue: String,
    #[tabled(rename = "Green")]
    green: String,
}

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "Endpoint")]
    endpoint: &'static str,
    #[tabled(rename = "Version")]
    version: String,
}

#[derive(Tabled)]
struct HealthRow {
    #[tabled(rename = "Endpoint")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    message: String,
    #[tabled(rename = "Time (ms)")]
    response_time_ms: u64,
}

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn databases_table(databases: &[ProxyDatabaseEntry]) -> String {
    let rows: Vec<DatabaseRow> = databases
        .iter()
        .map(|d| DatabaseRow {
            name: d.name.clone(),
            host: opt(d.host.as_deref()),
            port: opt(d.port),
            pool_mode: opt(d.pool_mode),
            paused: d.paused,
            disabled: d.disabled,
        })
        .collect();
    Table::new(rows).to_string()
}

pub fn pools_table(pools: &[ProxyPool]) -> String {
    let rows: Vec<PoolRow> = pools
        .iter()
        .map(|p| PoolRow {
            database: p.database.clone(),
            user: p.user.clone(),
            cl_active: p.cl_active,
            cl_waiting: p.cl_waiting,
            sv_active: p.sv_active,
            sv_idle: p.sv_idle,
            maxwait: p.maxwait,
        })
        .collect();
    Table::new(rows).to_string()
}

pub fn slots_table(slots: &[ReplicationChannelStatus]) -> String {
    let rows: Vec<SlotRow> = slots
        .iter()
        .map(|s| SlotRow {
            slot: s.slot_name.clone(),
            active: s.active,
            diff_size: opt(s.diff_size.as_deref()),
            diff_bytes: opt(s.diff_bytes),
        })
        .collect();
    Table::new(rows).to_string()
}

pub fn sequences_table(snapshots: &[SequenceSnapshot]) -> String {
    let rows: Vec<SequenceRow> = snapshots
        .iter()
        .map(|s| SequenceRow {
            table: s.column.table_name.clone(),
            column: s.column.column_name.clone(),
            blue_last_value: opt(s.blue_last_value),
            largest_blue: opt(s.largest_blue),
            largest_green: opt(s.largest_green),
        })
        .collect();
    Table::new(rows).to_string()
}

pub fn connections_table(connections: &[BackendConnection]) -> String {
    let rows: Vec<ConnectionRow> = connections
        .iter()
        .map(|c| ConnectionRow {
            pid: c.pid,
            usename: opt(c.usename.as_deref()),
            application_name: opt(c.application_name.as_deref()),
            state: opt(c.state.as_deref()),
            backend_start: opt(c.backend_start.map(|t| t.format("%Y-%m-%d %H:%M:%S"))),
            query: opt(c.query.as_deref()),
        })
        .collect();
    Table::new(rows).to_string()
}

pub fn mismatches_table(mismatches: &[RowMismatch]) -> String {
    let rows: Vec<MismatchRow> = mismatches
        .iter()
        .map(|m| MismatchRow {
            index: m.index,
            blue: serde_json::to_string(&m.blue).unwrap_or_default(),
            green: serde_json::to_string(&m.green).unwrap_or_default(),
        })
        .collect();
    Table::new(rows).to_string()
}

pub fn versions_table(versions: &ServerVersions) -> String {
    let rows = vec![
        VersionRow {
            endpoint: Side::Blue.as_str(),
            version: versions.blue.clone(),
        },
        VersionRow {
            endpoint: Side::Green.as_str(),
            version: versions.green.clone(),
        },
        VersionRow {
            endpoint: "proxy",
            version: versions.proxy.clone(),
        },
    ];
    Table::new(rows).to_string()
}

pub fn health_table(report: &HealthReport) -> String {
    let rows: Vec<HealthRow> = report
        .checks
        .iter()
        .map(|c| HealthRow {
            name: c.name.clone(),
            status: colorize_health(c.status),
            message: c.message.clone().unwrap_or_default(),
            response_time_ms: c.response_time_ms,
        })
        .collect();
    Table::new(rows).to_string()
}

fn colorize_health(status: HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => status.to_string().green().to_string(),
        HealthStatus::Degraded => status.to_string().yellow().to_string(),
        HealthStatus::Unhealthy => status.to_string().red().to_string(),
    }
}

/// Print what the prechecks observed, before the confirmation prompt
pub fn print_precheck(report: &PrecheckReport) {
    println!("\n{}", "PgBouncer database".bold());
    println!("{}", databases_table(std::slice::from_ref(&report.entry)));

    println!("\n{}", "Server versions".bold());
    println!("{}", versions_table(&report.versions));

    for (side, count) in &report.row_counts {
        println!("{} database has enough rows: {}", side, count);
    }

    println!(
        "Table {}: id and content equivalent over {} rows with lastUpdated between {}",
        report.equivalence.table, report.equivalence.rows, report.equivalence.window
    );
    println!("Replication lag is low enough to proceed: {} bytes", report.lag_bytes);

    println!(
        "\n{}",
        "Green column largest values are lower than or equal to their blue sequence last values".bold()
    );
    println!("{}", sequences_table(&report.sequences));

    if !report.remote.service_status.trim().is_empty() {
        println!("\n{}", "PgBouncer status".bold());
        println!("{}", report.remote.service_status.trim_end());
    }

    println!("{}", "✓ Precondition checks passed".green().bold());
}
