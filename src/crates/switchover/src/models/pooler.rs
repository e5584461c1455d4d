//! Connection pooler models (PgBouncer `SHOW DATABASES` / `SHOW POOLS`)

use serde::{Deserialize, Serialize};

/// PgBouncer pool mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    /// Server connection held for the client session
    Session,
    /// Server connection released after each transaction
    Transaction,
    /// Server connection released after each statement
    Statement,
}

impl PoolMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Transaction => "transaction",
            Self::Statement => "statement",
        }
    }

    /// Parse the admin console's textual pool mode
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "session" => Some(Self::Session),
            "transaction" => Some(Self::Transaction),
            "statement" => Some(Self::Statement),
            _ => None,
        }
    }
}

impl std::fmt::Display for PoolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A logical database as routed by the pooler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDatabaseEntry {
    /// Logical database name clients connect to
    pub name: String,

    /// Backing host; `None` for the pooler's own admin database
    pub host: Option<String>,

    /// Backing port
    pub port: Option<i32>,

    /// Backing database name
    pub database: Option<String>,

    /// Per-database pool mode; `None` when inherited from the global setting
    pub pool_mode: Option<PoolMode>,

    /// Whether client traffic is currently suspended
    pub paused: bool,

    /// Whether new client connections are rejected
    pub disabled: bool,
}

impl ProxyDatabaseEntry {
    /// Create an entry with the given name and host, not paused or disabled
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: Some(host.into()),
            port: Some(5432),
            database: None,
            pool_mode: Some(PoolMode::Transaction),
            paused: false,
            disabled: false,
        }
    }

    /// Set the pool mode
    pub fn with_pool_mode(mut self, pool_mode: Option<PoolMode>) -> Self {
        self.pool_mode = pool_mode;
        self
    }

    /// Set the paused flag
    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    /// Set the disabled flag
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Check whether this entry routes to the given host
    pub fn points_at(&self, host: &str) -> bool {
        self.host.as_deref() == Some(host)
    }
}

/// One row of `SHOW POOLS`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPool {
    pub database: String,
    pub user: String,
    pub cl_active: i64,
    pub cl_waiting: i64,
    pub sv_active: i64,
    pub sv_idle: i64,
    pub sv_used: i64,
    pub maxwait: i64,
    pub pool_mode: Option<PoolMode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_mode_parse() {
        assert_eq!(PoolMode::parse("transaction"), Some(PoolMode::Transaction));
        assert_eq!(PoolMode::parse(" session "), Some(PoolMode::Session));
        assert_eq!(PoolMode::parse(""), None);
    }

    #[test]
    fn test_points_at() {
        let entry = ProxyDatabaseEntry::new("medplum", "10.0.0.1");
        assert!(entry.points_at("10.0.0.1"));
        assert!(!entry.points_at("10.0.0.2"));

        let admin = ProxyDatabaseEntry {
            host: None,
            ..ProxyDatabaseEntry::new("pgbouncer", "")
        };
        assert!(!admin.points_at(""));
    }
}
