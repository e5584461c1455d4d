//! Error types for switchover
//!
//! Provides a unified error type for every cutover component. Variants follow
//! the failure classes an operator has to tell apart: precondition failures
//! abort before anything is mutated, invariant violations indicate unsafe data
//! state, and remote/convergence failures occur while traffic is paused.

use crate::db::Role;
use thiserror::Error;

/// Result type alias for switchover operations
pub type Result<T> = std::result::Result<T, SwitchoverError>;

/// Main error type for switchover operations
#[derive(Debug, Error)]
pub enum SwitchoverError {
    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not establish (or lost) the connection to an endpoint
    #[error("Connection to {role} failed: {message}")]
    Connection { role: Role, message: String },

    /// A query failed on an otherwise healthy connection
    #[error("Query on {role} failed: {message}")]
    Query { role: Role, message: String },

    /// A precondition check failed before any mutation took place
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// The replication watcher exhausted its polling budget
    #[error(
        "Replication lag did not converge on slot {slot} after {attempts} attempts. Last diff_bytes: {last_lag_bytes}"
    )]
    ReplicationTimeout {
        slot: String,
        last_lag_bytes: i64,
        attempts: u32,
    },

    /// A remote command exited with a non-zero status
    #[error("Remote command `{command}` exited with code {code}: {stderr}")]
    RemoteCommand {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The remote session could not be opened, used or closed
    #[error("Remote session error: {0}")]
    RemoteSession(String),

    /// The target generated identifiers beyond the source's sequence values
    #[error("Sequence synchronization errors: {}", .0.join("; "))]
    SequenceInvariant(Vec<String>),

    /// Row content differs between blue and green
    #[error("Data mismatch in table {table}: {mismatches} rows differ")]
    DataMismatch { table: String, mismatches: usize },

    /// Row counts differ between blue and green over the compared window
    #[error("Table {table}: mismatch row count blue: {blue} green: {green}")]
    RowCountMismatch {
        table: String,
        blue: usize,
        green: usize,
    },

    /// One or both sides hold fewer reference rows than required
    #[error("Not enough {table} rows (minimum {minimum}): {}", .sides.join(", "))]
    InsufficientRows {
        table: String,
        minimum: i64,
        sides: Vec<String>,
    },

    /// The traffic proxy is not routed where the caller believes it is
    #[error(
        "Expected proxy to match {expected} server version and NOT match the other side (blue: {blue}, green: {green}, proxy: {proxy})"
    )]
    VersionMismatch {
        expected: String,
        blue: String,
        green: String,
        proxy: String,
    },

    /// The connection pooler reported an unexpected state
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// A config-path lookup was asked for a target it does not know
    #[error("Invalid proxy target: {0}")]
    InvalidTarget(String),

    /// The session state machine was asked to make an illegal transition
    #[error("Invalid cutover transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// The confirmation prompt could not be read
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwitchoverError {
    /// Wrap an sqlx error raised by the given endpoint role
    ///
    /// Transport-level failures become `Connection`, everything else `Query`.
    pub fn from_sqlx(role: Role, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => Self::Connection {
                role,
                message: format!("IO error: {}", e),
            },
            sqlx::Error::Tls(e) => Self::Connection {
                role,
                message: format!("TLS error: {}", e),
            },
            sqlx::Error::Configuration(e) => Self::Connection {
                role,
                message: format!("Configuration error: {}", e),
            },
            sqlx::Error::PoolTimedOut => Self::Connection {
                role,
                message: "Connection pool timed out".to_string(),
            },
            sqlx::Error::PoolClosed => Self::Connection {
                role,
                message: "Connection pool is closed".to_string(),
            },
            other => Self::Query {
                role,
                message: other.to_string(),
            },
        }
    }

    /// Create a new Precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Check if this error was raised before any mutation
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Precondition(_) | Self::InsufficientRows { .. } | Self::VersionMismatch { .. }
        )
    }

    /// Check if this error signals unsafe data state
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::SequenceInvariant(_) | Self::DataMismatch { .. } | Self::RowCountMismatch { .. }
        )
    }

    /// Check if this error came from the endpoint transport rather than a query
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

impl From<toml::de::Error> for SwitchoverError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("Failed to parse config: {}", err))
    }
}
