//! Configuration schema for switchover

use crate::db::is_plain_identifier;
use crate::error::{Result, SwitchoverError};
use crate::models::Side;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main switchover configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SwitchoverConfig {
    /// Cutover target and thresholds
    #[serde(default)]
    pub cutover: CutoverConfig,

    /// Precondition check settings
    #[serde(default)]
    pub precheck: PrecheckConfig,

    /// Replication convergence polling
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Proxy controller settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Database endpoints
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Remote command channel to the PgBouncer host
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cutover configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutoverConfig {
    /// Logical database name in PgBouncer
    pub database: String,

    /// Logical replication slot from blue to green
    pub replication_slot: String,

    /// Highest replication lag (bytes) tolerated before confirmation
    #[serde(default = "default_max_precheck_lag_bytes")]
    pub max_precheck_lag_bytes: i64,
}

fn default_max_precheck_lag_bytes() -> i64 {
    1024
}

impl Default for CutoverConfig {
    fn default() -> Self {
        Self {
            database: "medplum".to_string(),
            replication_slot: "my_replication_slot".to_string(),
            max_precheck_lag_bytes: default_max_precheck_lag_bytes(),
        }
    }
}

/// Precondition check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecheckConfig {
    /// Table whose row count must reach `minimum_rows` on both sides
    pub reference_table: String,

    /// Minimum row count for `reference_table`
    pub minimum_rows: i64,

    /// Table compared row-by-row between blue and green
    pub audit_table: String,

    /// Start of the comparison window (UTC), e.g. shortly before the clone was created
    pub audit_window_start: String,

    /// Minutes before "now" at which the comparison window ends
    #[serde(default = "default_audit_settle_minutes")]
    pub audit_settle_minutes: i64,

    /// Schema whose sequences are synchronized
    #[serde(default = "default_sequence_schema")]
    pub sequence_schema: String,
}

fn default_audit_settle_minutes() -> i64 {
    5
}

fn default_sequence_schema() -> String {
    "public".to_string()
}

impl Default for PrecheckConfig {
    fn default() -> Self {
        Self {
            reference_table: "Patient".to_string(),
            minimum_rows: 100_000,
            audit_table: "AuditEvent".to_string(),
            audit_window_start: "2024-10-21 15:00:00".to_string(),
            audit_settle_minutes: default_audit_settle_minutes(),
            sequence_schema: default_sequence_schema(),
        }
    }
}

impl PrecheckConfig {
    /// Parse `audit_window_start` as RFC 3339 or `YYYY-MM-DD HH:MM:SS` (UTC)
    pub fn audit_start(&self) -> Result<DateTime<Utc>> {
        let raw = self.audit_window_start.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .map(|naive| naive.and_utc())
            .map_err(|e| {
                SwitchoverError::Config(format!(
                    "Invalid precheck.audit_window_start '{}': {}",
                    raw, e
                ))
            })
    }
}

/// Replication watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Delay between lag polls in milliseconds
    pub poll_interval_ms: u64,

    /// Maximum number of polls while traffic is paused
    pub max_attempts: u32,

    /// Lag strictly below this many bytes counts as converged
    pub convergence_threshold_bytes: i64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            max_attempts: 40,
            convergence_threshold_bytes: 1,
        }
    }
}

impl ReplicationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Proxy controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Simulated PAUSE latency in dry-run mode
    pub simulated_pause_ms: u64,

    /// Simulated RESUME latency in dry-run mode
    pub simulated_resume_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            simulated_pause_ms: 1000,
            simulated_resume_ms: 100,
        }
    }
}

/// Connection descriptor for one endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub host: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,

    pub user: String,

    /// Password (supports `${VAR}` expansion)
    #[serde(default)]
    pub password: Option<String>,

    pub database: String,

    /// Host string PgBouncer uses for this backend, when it differs from `host`
    #[serde(default)]
    pub pooler_host: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_pg_port() -> u16 {
    5432
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_pg_port(),
            user: user.into(),
            password: None,
            database: database.into(),
            pooler_host: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Host as it appears in PgBouncer's `SHOW DATABASES`
    pub fn routed_host(&self) -> &str {
        self.pooler_host.as_deref().unwrap_or(&self.host)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// All four endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    pub blue: EndpointConfig,
    pub green: EndpointConfig,

    /// Client connection routed through PgBouncer
    pub proxy: EndpointConfig,

    /// PgBouncer admin console (database `pgbouncer`)
    pub pooler_admin: EndpointConfig,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            blue: EndpointConfig::new("", "postgres", "medplum"),
            green: EndpointConfig::new("", "postgres", "medplum"),
            proxy: EndpointConfig {
                port: 6432,
                ..EndpointConfig::new("", "medplum", "medplum")
            },
            pooler_admin: EndpointConfig {
                port: 6432,
                ..EndpointConfig::new("", "pgbouncer", "pgbouncer")
            },
        }
    }
}

impl EndpointsConfig {
    /// Descriptor for a data-plane side
    pub fn side(&self, side: Side) -> &EndpointConfig {
        match side {
            Side::Blue => &self.blue,
            Side::Green => &self.green,
        }
    }
}

/// Remote command channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// SSH host; defaults to the pooler admin host
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub user: String,

    /// Private key used for the SSH session
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    /// Prefix privileged commands with `sudo`
    #[serde(default = "default_use_sudo")]
    pub use_sudo: bool,

    /// Service name of the pooler process
    pub service: String,

    /// Config path the running pooler reads
    pub active_config_path: String,

    /// Config file routing to blue
    pub blue_config_path: String,

    /// Config file routing to green
    pub green_config_path: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_use_sudo() -> bool {
    true
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_ssh_port(),
            user: "ubuntu".to_string(),
            private_key_path: None,
            use_sudo: default_use_sudo(),
            service: "pgbouncer".to_string(),
            active_config_path: "/etc/pgbouncer/pgbouncer.ini".to_string(),
            blue_config_path: "/etc/pgbouncer/blue.pgbouncer.ini".to_string(),
            green_config_path: "/etc/pgbouncer/green.pgbouncer.ini".to_string(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,

    /// Log format: "compact", "pretty"
    pub format: String,

    /// Enable colored output
    pub colored: bool,

    /// Show timestamps
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            colored: true,
            timestamps: true,
        }
    }
}

impl SwitchoverConfig {
    /// Resolve environment variables in configuration values
    ///
    /// Supports ${VAR_NAME} syntax in credential and host fields
    pub fn resolve_env_vars(&mut self) {
        for endpoint in [
            &mut self.endpoints.blue,
            &mut self.endpoints.green,
            &mut self.endpoints.proxy,
            &mut self.endpoints.pooler_admin,
        ] {
            endpoint.host = Self::expand_env_var(&endpoint.host);
            endpoint.user = Self::expand_env_var(&endpoint.user);
            if let Some(ref password) = endpoint.password {
                endpoint.password = Some(Self::expand_env_var(password));
            }
        }

        if let Some(ref host) = self.remote.host {
            self.remote.host = Some(Self::expand_env_var(host));
        }
    }

    /// Expand environment variable in a string
    ///
    /// Supports ${VAR_NAME} syntax
    fn expand_env_var(value: &str) -> String {
        if value.starts_with("${") && value.ends_with('}') {
            let var_name = &value[2..value.len() - 1];
            std::env::var(var_name).unwrap_or_else(|_| value.to_string())
        } else {
            value.to_string()
        }
    }

    /// SSH host, falling back to the pooler admin host
    pub fn remote_host(&self) -> &str {
        self.remote
            .host
            .as_deref()
            .unwrap_or(&self.endpoints.pooler_admin.host)
    }

    /// Reject configurations the cutover cannot run with
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();

        for (label, endpoint) in [
            ("blue", &self.endpoints.blue),
            ("green", &self.endpoints.green),
            ("proxy", &self.endpoints.proxy),
            ("pooler_admin", &self.endpoints.pooler_admin),
        ] {
            if endpoint.host.is_empty() {
                issues.push(format!("endpoints.{}.host is not set", label));
            }
            if endpoint.user.is_empty() {
                issues.push(format!("endpoints.{}.user is not set", label));
            }
        }

        for (label, ident) in [
            ("cutover.database", &self.cutover.database),
            ("cutover.replication_slot", &self.cutover.replication_slot),
            ("precheck.reference_table", &self.precheck.reference_table),
            ("precheck.audit_table", &self.precheck.audit_table),
            ("precheck.sequence_schema", &self.precheck.sequence_schema),
        ] {
            if !is_plain_identifier(ident) {
                issues.push(format!("{} is not a plain identifier: '{}'", label, ident));
            }
        }

        if self.replication.max_attempts == 0 {
            issues.push("replication.max_attempts must be at least 1".to_string());
        }

        if self.precheck.audit_settle_minutes < 0 {
            issues.push("precheck.audit_settle_minutes must not be negative".to_string());
        }

        if self.remote_host().is_empty() {
            issues.push("remote.host is not set and no pooler admin host to fall back to".to_string());
        }

        if let Err(e) = self.precheck.audit_start() {
            issues.push(e.to_string());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(SwitchoverError::Config(issues.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn valid_config() -> SwitchoverConfig {
        let mut config = SwitchoverConfig::default();
        config.endpoints.blue.host = "blue.internal".to_string();
        config.endpoints.green.host = "green.internal".to_string();
        config.endpoints.proxy.host = "pgbouncer.internal".to_string();
        config.endpoints.pooler_admin.host = "pgbouncer.internal".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = SwitchoverConfig::default();
        assert_eq!(config.cutover.database, "medplum");
        assert_eq!(config.cutover.max_precheck_lag_bytes, 1024);
        assert_eq!(config.replication.poll_interval_ms, 50);
        assert_eq!(config.replication.max_attempts, 40);
        assert_eq!(config.replication.convergence_threshold_bytes, 1);
        assert_eq!(config.proxy.simulated_pause_ms, 1000);
        assert_eq!(config.endpoints.pooler_admin.database, "pgbouncer");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_default_config_needs_hosts() {
        let err = SwitchoverConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("endpoints.blue.host is not set"));
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let mut config = valid_config();
        config.cutover.database = "medplum; SHUTDOWN".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cutover.database"));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let mut config = valid_config();
        config.replication.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remote_host_falls_back_to_pooler() {
        let mut config = valid_config();
        assert_eq!(config.remote_host(), "pgbouncer.internal");
        config.remote.host = Some("bastion".to_string());
        assert_eq!(config.remote_host(), "bastion");
    }

    #[test]
    fn test_routed_host() {
        let mut endpoint = EndpointConfig::new("blue.internal", "postgres", "medplum");
        assert_eq!(endpoint.routed_host(), "blue.internal");
        endpoint.pooler_host = Some("10.0.0.5".to_string());
        assert_eq!(endpoint.routed_host(), "10.0.0.5");
    }

    #[test]
    fn test_audit_start_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 10, 21, 15, 0, 0).unwrap();

        let mut precheck = PrecheckConfig::default();
        assert_eq!(precheck.audit_start().unwrap(), expected);

        precheck.audit_window_start = "2024-10-21T15:00:00Z".to_string();
        assert_eq!(precheck.audit_start().unwrap(), expected);

        precheck.audit_window_start = "yesterday".to_string();
        assert!(precheck.audit_start().is_err());
    }

    #[test]
    fn test_env_var_expansion() {
        let mut config = valid_config();
        config.endpoints.blue.password = Some("${SWITCHOVER_TEST_BLUE_PW}".to_string());

        std::env::set_var("SWITCHOVER_TEST_BLUE_PW", "s3cret");
        config.resolve_env_vars();

        assert_eq!(config.endpoints.blue.password, Some("s3cret".to_string()));

        std::env::remove_var("SWITCHOVER_TEST_BLUE_PW");
    }

    #[test]
    fn test_partial_sections_deserialize_with_defaults() {
        let toml = r#"
            [replication]
            poll_interval_ms = 25
            max_attempts = 80
            convergence_threshold_bytes = 1
        "#;

        let config: SwitchoverConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.replication.max_attempts, 80);
        assert_eq!(config.cutover.replication_slot, "my_replication_slot");
        assert_eq!(config.remote.service, "pgbouncer");
    }
}
