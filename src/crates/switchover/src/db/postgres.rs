//! Postgres endpoint backed by an sqlx pool

use super::{PostgresEndpoint, Role};
use crate::config::EndpointConfig;
use crate::error::{Result, SwitchoverError};
use crate::models::sequence::quote_ident;
use crate::models::{
    AuditRow, BackendConnection, ColumnRef, ReplicationChannelStatus, SequenceLastValue, SequenceName, TimeWindow,
};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

const REPLICATION_SLOTS_SQL: &str = r#"
SELECT slot_name::text AS slot_name,
       active,
       active_pid,
       pg_size_pretty(pg_wal_lsn_diff(pg_current_wal_lsn(), confirmed_flush_lsn)) AS diff_size,
       pg_wal_lsn_diff(pg_current_wal_lsn(), confirmed_flush_lsn)::bigint AS diff_bytes
FROM pg_replication_slots
WHERE slot_type = 'logical'
"#;

const ACTIVE_CONNECTIONS_SQL: &str = r#"
SELECT pid,
       usename::text AS usename,
       left(application_name, 15) AS application_name,
       state,
       backend_start,
       left(regexp_replace(query, E'[\n\r]+', ' ', 'g'), 40) AS query
FROM pg_stat_activity
WHERE pid <> pg_backend_pid()
  AND datname = $1
  AND application_name <> 'switchover'
ORDER BY state, usename, current_timestamp - state_change
"#;

const SEQUENCE_LAST_VALUES_SQL: &str = r#"
SELECT schemaname::text AS schemaname,
       sequencename::text AS sequencename,
       last_value
FROM pg_sequences
WHERE schemaname = $1
ORDER BY sequencename
"#;

const SEQUENCE_OWNERS_SQL: &str = r#"
SELECT n.nspname::text AS table_schema,
       c.relname::text AS table_name,
       a.attname::text AS column_name
FROM pg_depend d
JOIN pg_class c ON c.oid = d.refobjid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_attribute a ON a.attrelid = d.refobjid AND a.attnum = d.refobjsubid
WHERE d.objid = $1::regclass
  AND d.refobjsubid > 0
  AND d.classid = 'pg_class'::regclass
"#;

/// Postgres server reached over a small connection pool
#[derive(Clone, Debug)]
pub struct PgEndpoint {
    role: Role,
    pool: PgPool,
}

impl PgEndpoint {
    /// Connect to the endpoint
    ///
    /// # Arguments
    /// * `role` - Role the endpoint plays, used in errors and logs
    /// * `config` - Connection descriptor
    pub async fn connect(role: Role, config: &EndpointConfig) -> Result<Self> {
        debug!(
            role = %role,
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connecting to postgres"
        );

        let pool = open_pool(role, config, pool_options(2), connect_options(role, config)).await?;

        info!(role = %role, host = %config.host, "Postgres connection established");

        Ok(Self { role, pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(role: Role, pool: PgPool) -> Self {
        Self { role, pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_err(&self, err: sqlx::Error) -> SwitchoverError {
        SwitchoverError::from_sqlx(self.role, err)
    }
}

/// Upper bound on waiting for a pooled connection
///
/// Fan-out queries queue behind each other on a small pool. Only the
/// initial connect is bounded, by `connect_timeout_secs`.
const QUEUE_WAIT_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Pool options shared by every endpoint
pub(crate) fn pool_options(max_connections: u32) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(QUEUE_WAIT_LIMIT)
}

/// Open a pool, bounding only the first connection by the configured timeout
pub(crate) async fn open_pool(
    role: Role,
    config: &EndpointConfig,
    pool: PgPoolOptions,
    options: PgConnectOptions,
) -> Result<PgPool> {
    match timeout(config.connect_timeout(), pool.connect_with(options)).await {
        Ok(connected) => connected.map_err(|e| SwitchoverError::from_sqlx(role, e)),
        Err(_) => Err(SwitchoverError::Connection {
            role,
            message: format!(
                "timed out after {}s connecting to {}:{}",
                config.connect_timeout_secs, config.host, config.port
            ),
        }),
    }
}

/// Build connect options from a descriptor without rendering a URL
///
/// PgBouncer refuses startup parameters it does not track, so connections
/// routed through it skip `extra_float_digits`.
pub(crate) fn connect_options(role: Role, config: &EndpointConfig) -> PgConnectOptions {
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(&config.database)
        .application_name("switchover");

    if role.is_behind_pooler() {
        options = options.extra_float_digits(None::<i8>);
    }

    if let Some(ref password) = config.password {
        options = options.password(password);
    }

    options
}

#[async_trait]
impl PostgresEndpoint for PgEndpoint {
    fn role(&self) -> Role {
        self.role
    }

    async fn server_version(&self) -> Result<String> {
        sqlx::query_scalar::<_, String>("SELECT version()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn audit_rows(&self, table: &str, window: &TimeWindow) -> Result<Vec<AuditRow>> {
        let sql = format!(
            r#"SELECT id::text AS id, content::text AS content FROM {} WHERE "lastUpdated" BETWEEN $1 AND $2 ORDER BY "lastUpdated", id"#,
            quote_ident(table)
        );
        sqlx::query_as::<_, AuditRow>(&sql)
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn active_connections(&self, database: &str) -> Result<Vec<BackendConnection>> {
        sqlx::query_as::<_, BackendConnection>(ACTIVE_CONNECTIONS_SQL)
            .bind(database)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn replication_slots(&self) -> Result<Vec<ReplicationChannelStatus>> {
        sqlx::query_as::<_, ReplicationChannelStatus>(REPLICATION_SLOTS_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn sequence_last_values(&self, schema: &str) -> Result<Vec<SequenceLastValue>> {
        sqlx::query_as::<_, SequenceLastValue>(SEQUENCE_LAST_VALUES_SQL)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn sequence_owners(&self, sequence: &SequenceName) -> Result<Vec<ColumnRef>> {
        sqlx::query_as::<_, ColumnRef>(SEQUENCE_OWNERS_SQL)
            .bind(sequence.qualified())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn column_max(&self, column: &ColumnRef) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT MAX({})::bigint FROM {}",
            column.quoted_column(),
            column.qualified_table()
        );
        sqlx::query_scalar::<_, Option<i64>>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn set_sequence_value(&self, sequence: &SequenceName, value: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT setval($1::regclass, $2)")
            .bind(sequence.qualified())
            .bind(value)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!(role = %self.role, "Postgres connection closed");
    }
}
