//! Database endpoint clients
//!
//! The cutover talks to four endpoints: the blue and green Postgres servers,
//! the traffic-facing proxy (a Postgres connection routed through PgBouncer)
//! and the PgBouncer admin console. Each is reached through a trait so the
//! orchestration logic never depends on a live server.

pub mod pgbouncer;
pub mod postgres;

pub use pgbouncer::PgBouncerAdmin;
pub use postgres::PgEndpoint;

use crate::error::Result;
use crate::models::{
    AuditRow, BackendConnection, ColumnRef, ProxyDatabaseEntry, ProxyPool, ReplicationChannelStatus,
    SequenceLastValue, SequenceName, TimeWindow,
};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Role an endpoint plays in the cutover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Currently-live source database
    Blue,
    /// Replica that becomes live after cutover
    Green,
    /// PgBouncer admin console
    ProxyAdmin,
    /// Client-style connection through PgBouncer
    TrafficProxy,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blue => "blue",
            Self::Green => "green",
            Self::ProxyAdmin => "proxy-admin",
            Self::TrafficProxy => "traffic-proxy",
        }
    }

    /// Whether connections for this role go through PgBouncer
    pub fn is_behind_pooler(&self) -> bool {
        matches!(self, Self::ProxyAdmin | Self::TrafficProxy)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Queries the cutover issues against a Postgres server
#[async_trait]
pub trait PostgresEndpoint: Send + Sync {
    /// Role this endpoint was connected as
    fn role(&self) -> Role;

    /// `SELECT version()`
    async fn server_version(&self) -> Result<String>;

    /// Number of rows in a table
    async fn count_rows(&self, table: &str) -> Result<i64>;

    /// `id` and `content` of rows updated within the window, ordered by
    /// `lastUpdated` then `id`
    async fn audit_rows(&self, table: &str, window: &TimeWindow) -> Result<Vec<AuditRow>>;

    /// Other client backends connected to `database`
    async fn active_connections(&self, database: &str) -> Result<Vec<BackendConnection>>;

    /// Status of every logical replication slot
    async fn replication_slots(&self) -> Result<Vec<ReplicationChannelStatus>>;

    /// Last issued value of every sequence in a schema
    async fn sequence_last_values(&self, schema: &str) -> Result<Vec<SequenceLastValue>>;

    /// Columns owning a sequence, resolved through the dependency catalog
    async fn sequence_owners(&self, sequence: &SequenceName) -> Result<Vec<ColumnRef>>;

    /// Highest value in a column; `None` for an empty table
    async fn column_max(&self, column: &ColumnRef) -> Result<Option<i64>>;

    /// `setval` the sequence, returning the value the server acknowledged
    async fn set_sequence_value(&self, sequence: &SequenceName, value: i64) -> Result<i64>;

    /// Release the connection
    async fn close(&self) {}
}

/// What the admin console answered to a command
///
/// The console reports failures as error responses, which surface as `Err`
/// before an ack is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolerAck {
    /// Statement as sent, e.g. `PAUSE medplum`
    pub statement: String,
    /// Row count from the server's command completion
    pub rows_affected: u64,
}

/// PgBouncer admin console commands
#[async_trait]
pub trait PoolerAdmin: Send + Sync {
    /// `SHOW DATABASES`
    async fn show_databases(&self) -> Result<Vec<ProxyDatabaseEntry>>;

    /// `SHOW POOLS`
    async fn show_pools(&self) -> Result<Vec<ProxyPool>>;

    /// `PAUSE <db>`
    async fn pause(&self, db_name: &str) -> Result<PoolerAck>;

    /// `RESUME <db>`
    async fn resume(&self, db_name: &str) -> Result<PoolerAck>;

    /// Release the connection
    async fn close(&self) {}
}

/// Check that a name can be interpolated into SQL or an admin command verbatim
pub fn is_plain_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid identifier regex"))
        .is_match(name)
}
