//! Domain models for switchover
//!
//! Snapshots read from the blue/green databases and the connection pooler.
//! Every model here is a read-only view re-fetched on demand; nothing is
//! cached across polls.

pub mod activity;
pub mod audit;
pub mod pooler;
pub mod replication;
pub mod sequence;

pub use activity::BackendConnection;
pub use audit::{AuditRow, RowMismatch, TimeWindow};
pub use pooler::{PoolMode, ProxyDatabaseEntry, ProxyPool};
pub use replication::ReplicationChannelStatus;
pub use sequence::{ColumnRef, SequenceLastValue, SequenceName, SequenceSnapshot};

use serde::{Deserialize, Serialize};

/// One of the two data-plane replicas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The currently-live database
    Blue,
    /// The up-to-date replica that traffic moves to
    Green,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blue => "blue",
            Self::Green => "green",
        }
    }

    /// The opposite replica
    pub fn other(&self) -> Self {
        match self {
            Self::Blue => Self::Green,
            Self::Green => Self::Blue,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = crate::error::SwitchoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blue" => Ok(Self::Blue),
            "green" => Ok(Self::Green),
            other => Err(crate::error::SwitchoverError::InvalidTarget(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_other() {
        assert_eq!(Side::Blue.other(), Side::Green);
        assert_eq!(Side::Green.other(), Side::Blue);
    }

    #[test]
    fn test_side_parse() {
        assert_eq!("green".parse::<Side>().unwrap(), Side::Green);
        assert!("purple".parse::<Side>().is_err());
    }
}
