//! Audit rows compared by the data equivalence check

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Identity and content of one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AuditRow {
    pub id: String,
    pub content: Option<String>,
}

impl AuditRow {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: Some(content.into()),
        }
    }
}

/// A row position where blue and green disagree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMismatch {
    /// Zero-based position in the ordered result set
    pub index: usize,
    pub blue: AuditRow,
    pub green: AuditRow,
}

/// Inclusive `lastUpdated` window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window from `start` up to `settle` before `now`
    ///
    /// Rows written within the settle period may still be in flight to green.
    pub fn settled(start: DateTime<Utc>, now: DateTime<Utc>, settle: Duration) -> Self {
        Self {
            start,
            end: now - settle,
        }
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} and {}",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_settled_window_ends_before_now() {
        let start = Utc.with_ymd_and_hms(2024, 10, 21, 15, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 10, 22, 12, 0, 0).unwrap();
        let window = TimeWindow::settled(start, now, Duration::minutes(5));

        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 10, 22, 11, 55, 0).unwrap());
        assert_eq!(
            window.to_string(),
            "2024-10-21 15:00:00 and 2024-10-22 11:55:00"
        );
    }
}
