//! Connectivity check
//!
//! Read-only probe of every endpoint. All probes run to completion so the
//! operator sees the state of each endpoint, not just the first failure.

use crate::db::{PoolerAdmin, PostgresEndpoint, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All checks passed
    Healthy,
    /// Some checks failed
    Degraded,
    /// Every check failed
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Probe result for one endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Endpoint role
    pub name: String,
    /// Check status
    pub status: HealthStatus,
    /// Server version, database count or error message
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>, message: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: Some(message.into()),
            response_time_ms,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            response_time_ms,
        }
    }
}

/// Result of probing every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Individual endpoint checks
    pub checks: Vec<ComponentHealth>,
    /// Total response time in milliseconds
    pub total_response_time_ms: u64,
    /// Timestamp of the check
    pub timestamp: i64,
}

impl HealthReport {
    pub fn new(checks: Vec<ComponentHealth>) -> Self {
        let unhealthy = checks
            .iter()
            .filter(|c| c.status == HealthStatus::Unhealthy)
            .count();

        let status = if unhealthy == 0 {
            HealthStatus::Healthy
        } else if unhealthy < checks.len() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        let total_response_time_ms = checks.iter().map(|c| c.response_time_ms).sum();
        let timestamp = chrono::Utc::now().timestamp();

        Self {
            status,
            checks,
            total_response_time_ms,
            timestamp,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

async fn probe_postgres(endpoint: Arc<dyn PostgresEndpoint>) -> ComponentHealth {
    let start = Instant::now();
    let role = endpoint.role();
    match endpoint.server_version().await {
        Ok(version) => ComponentHealth::healthy(role.as_str(), version, start.elapsed().as_millis() as u64),
        Err(e) => ComponentHealth::unhealthy(role.as_str(), e.to_string(), start.elapsed().as_millis() as u64),
    }
}

async fn probe_pooler(pooler: Arc<dyn PoolerAdmin>) -> ComponentHealth {
    let start = Instant::now();
    let name = Role::ProxyAdmin.as_str();
    match pooler.show_databases().await {
        Ok(databases) => ComponentHealth::healthy(
            name,
            format!("{} databases", databases.len()),
            start.elapsed().as_millis() as u64,
        ),
        Err(e) => ComponentHealth::unhealthy(name, e.to_string(), start.elapsed().as_millis() as u64),
    }
}

/// Probe `version()` on each Postgres endpoint and `SHOW DATABASES` on the pooler
pub async fn check_connectivity(
    postgres: &[Arc<dyn PostgresEndpoint>],
    pooler: Arc<dyn PoolerAdmin>,
) -> HealthReport {
    let (mut checks, pooler_check) = tokio::join!(
        futures::future::join_all(postgres.iter().cloned().map(probe_postgres)),
        probe_pooler(pooler),
    );
    checks.push(pooler_check);
    HealthReport::new(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyDatabaseEntry;
    use crate::testing::{FakePooler, FakePostgres};

    #[test]
    fn test_report_status() {
        let all_ok = HealthReport::new(vec![
            ComponentHealth::healthy("blue", "PG14", 1),
            ComponentHealth::healthy("green", "PG15", 2),
        ]);
        assert_eq!(all_ok.status, HealthStatus::Healthy);
        assert_eq!(all_ok.total_response_time_ms, 3);

        let partial = HealthReport::new(vec![
            ComponentHealth::healthy("blue", "PG14", 1),
            ComponentHealth::unhealthy("green", "refused", 1),
        ]);
        assert_eq!(partial.status, HealthStatus::Degraded);

        let none = HealthReport::new(vec![ComponentHealth::unhealthy("green", "refused", 1)]);
        assert_eq!(none.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_failed_probe_does_not_hide_others() {
        let blue = Arc::new(FakePostgres::new(Role::Blue, "PG14"));
        let green = Arc::new(FakePostgres::new(Role::Green, "PG15"));
        green.fail_on("server_version");
        let pooler = Arc::new(FakePooler::new(vec![ProxyDatabaseEntry::new("medplum", "blue")]));

        let endpoints: Vec<Arc<dyn PostgresEndpoint>> = vec![blue, green];
        let report = check_connectivity(&endpoints, pooler).await;

        assert_eq!(report.checks.len(), 3);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.checks[0].message.as_deref(), Some("PG14"));
        assert_eq!(report.checks[1].status, HealthStatus::Unhealthy);
        assert_eq!(report.checks[2].message.as_deref(), Some("1 databases"));
    }
}
