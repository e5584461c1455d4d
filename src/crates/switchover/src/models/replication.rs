//! Logical replication slot status

use crate::error::{Result, SwitchoverError};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Snapshot of one logical replication slot on the source database
///
/// `diff_size` is the pretty-printed lag; `diff_bytes` is the exact WAL
/// distance and the only value decisions are made on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ReplicationChannelStatus {
    /// Slot identifier
    pub slot_name: String,

    /// Whether a consumer is attached
    pub active: bool,

    /// Backend pid of the attached consumer
    pub active_pid: Option<i32>,

    /// Human-readable lag, e.g. `"512 bytes"`
    pub diff_size: Option<String>,

    /// Outstanding lag in bytes
    pub diff_bytes: Option<i64>,
}

impl ReplicationChannelStatus {
    /// Create an active slot status with the given byte lag
    pub fn new(slot_name: impl Into<String>, diff_bytes: i64) -> Self {
        Self {
            slot_name: slot_name.into(),
            active: true,
            active_pid: None,
            diff_size: Some(format!("{} bytes", diff_bytes)),
            diff_bytes: Some(diff_bytes),
        }
    }

    /// Authoritative byte lag, failing when the source did not report one
    pub fn lag_bytes(&self) -> Result<i64> {
        self.diff_bytes.ok_or_else(|| {
            SwitchoverError::Precondition(format!(
                "Invalid diff_bytes for replication slot {}: {:?}",
                self.slot_name, self.diff_bytes
            ))
        })
    }
}

/// Find a slot by name and return its byte lag
pub fn lag_for_slot(slots: &[ReplicationChannelStatus], slot_name: &str) -> Result<i64> {
    slots
        .iter()
        .find(|s| s.slot_name == slot_name)
        .ok_or_else(|| {
            SwitchoverError::Precondition(format!("Replication slot not found: {}", slot_name))
        })?
        .lag_bytes()
}
