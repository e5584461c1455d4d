//! PgBouncer admin console client
//!
//! The admin console only speaks the simple query protocol and reports every
//! value as text, so commands are sent as plain `&str` statements and columns
//! are decoded as strings before parsing.

use super::postgres::{connect_options, open_pool, pool_options};
use super::{is_plain_identifier, PoolerAck, PoolerAdmin, Role};
use crate::config::EndpointConfig;
use crate::error::{Result, SwitchoverError};
use crate::models::{PoolMode, ProxyDatabaseEntry, ProxyPool};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Executor, Row};
use tracing::{debug, info};

/// Connection to the PgBouncer admin database
#[derive(Clone, Debug)]
pub struct PgBouncerAdmin {
    pool: PgPool,
}

impl PgBouncerAdmin {
    /// Connect to the admin console
    pub async fn connect(config: &EndpointConfig) -> Result<Self> {
        debug!(host = %config.host, port = config.port, "Connecting to pgbouncer admin console");

        // The console rejects prepared statements and the pool's liveness ping
        let options = connect_options(Role::ProxyAdmin, config).statement_cache_capacity(0);
        let pool = open_pool(
            Role::ProxyAdmin,
            config,
            pool_options(1).test_before_acquire(false),
            options,
        )
        .await?;

        info!(host = %config.host, "PgBouncer admin connection established");

        Ok(Self { pool })
    }

    async fn run_command(&self, verb: &str, db_name: &str) -> Result<PoolerAck> {
        if !is_plain_identifier(db_name) {
            return Err(SwitchoverError::Proxy(format!(
                "Refusing to {} database with unsafe name '{}'",
                verb, db_name
            )));
        }

        let statement = format!("{} {}", verb, db_name);
        let done = (&self.pool)
            .execute(statement.as_str())
            .await
            .map_err(|e| SwitchoverError::from_sqlx(Role::ProxyAdmin, e))?;

        Ok(PoolerAck {
            statement,
            rows_affected: done.rows_affected(),
        })
    }
}

fn text(row: &PgRow, column: &str) -> Result<Option<String>> {
    match row.try_get_unchecked::<Option<String>, _>(column) {
        Ok(value) => Ok(value.filter(|v| !v.is_empty())),
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        Err(e) => Err(SwitchoverError::from_sqlx(Role::ProxyAdmin, e)),
    }
}

fn required_text(row: &PgRow, column: &str) -> Result<String> {
    text(row, column)?.ok_or_else(|| {
        SwitchoverError::Proxy(format!("Admin console row is missing column '{}'", column))
    })
}

fn integer(row: &PgRow, column: &str) -> Result<Option<i64>> {
    match text(row, column)? {
        Some(raw) => raw.trim().parse::<i64>().map(Some).map_err(|e| {
            SwitchoverError::Proxy(format!(
                "Admin console column '{}' is not numeric ('{}'): {}",
                column, raw, e
            ))
        }),
        None => Ok(None),
    }
}

fn flag(row: &PgRow, column: &str) -> Result<bool> {
    Ok(integer(row, column)?.unwrap_or(0) != 0)
}

fn parse_database_row(row: &PgRow) -> Result<ProxyDatabaseEntry> {
    Ok(ProxyDatabaseEntry {
        name: required_text(row, "name")?,
        host: text(row, "host")?,
        port: integer(row, "port")?.and_then(|p| i32::try_from(p).ok()),
        database: text(row, "database")?,
        pool_mode: text(row, "pool_mode")?.as_deref().and_then(PoolMode::parse),
        paused: flag(row, "paused")?,
        disabled: flag(row, "disabled")?,
    })
}

fn parse_pool_row(row: &PgRow) -> Result<ProxyPool> {
    Ok(ProxyPool {
        database: required_text(row, "database")?,
        user: required_text(row, "user")?,
        cl_active: integer(row, "cl_active")?.unwrap_or(0),
        cl_waiting: integer(row, "cl_waiting")?.unwrap_or(0),
        sv_active: integer(row, "sv_active")?.unwrap_or(0),
        sv_idle: integer(row, "sv_idle")?.unwrap_or(0),
        sv_used: integer(row, "sv_used")?.unwrap_or(0),
        maxwait: integer(row, "maxwait")?.unwrap_or(0),
        pool_mode: text(row, "pool_mode")?.as_deref().and_then(PoolMode::parse),
    })
}

#[async_trait]
impl PoolerAdmin for PgBouncerAdmin {
    async fn show_databases(&self) -> Result<Vec<ProxyDatabaseEntry>> {
        let rows = (&self.pool)
            .fetch_all("SHOW DATABASES")
            .await
            .map_err(|e| SwitchoverError::from_sqlx(Role::ProxyAdmin, e))?;

        rows.iter().map(parse_database_row).collect()
    }

    async fn show_pools(&self) -> Result<Vec<ProxyPool>> {
        let rows = (&self.pool)
            .fetch_all("SHOW POOLS")
            .await
            .map_err(|e| SwitchoverError::from_sqlx(Role::ProxyAdmin, e))?;

        rows.iter().map(parse_pool_row).collect()
    }

    async fn pause(&self, db_name: &str) -> Result<PoolerAck> {
        self.run_command("PAUSE", db_name).await
    }

    async fn resume(&self, db_name: &str) -> Result<PoolerAck> {
        self.run_command("RESUME", db_name).await
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("PgBouncer admin connection closed");
    }
}
