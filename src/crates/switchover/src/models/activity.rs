//! Backend connections reported by `pg_stat_activity`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One client backend connected to a database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct BackendConnection {
    pub pid: i32,
    pub usename: Option<String>,
    pub application_name: Option<String>,
    /// `active`, `idle`, `idle in transaction`, ...
    pub state: Option<String>,
    pub backend_start: Option<DateTime<Utc>>,
    /// First 40 characters of the current or last query, on one line
    pub query: Option<String>,
}

impl BackendConnection {
    pub fn new(pid: i32, application_name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            pid,
            usename: None,
            application_name: Some(application_name.into()),
            state: Some(state.into()),
            backend_start: None,
            query: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.as_deref() == Some("active")
    }
}
