//! Configuration loader with layered lookup
//!
//! Loads configuration from:
//! 1. Default values
//! 2. User-level config: ~/.switchover/switchover.toml
//! 3. Project-level config: ./switchover.toml
//!
//! Later layers override earlier ones key by key. An explicit path (from
//! `--config` or `SWITCHOVER_CONFIG`) replaces the user/project lookup.

use crate::config::schema::SwitchoverConfig;
use crate::error::{Result, SwitchoverError};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SWITCHOVER_CONFIG";

/// Configuration loader that handles user, project and explicit configs
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_config_path: PathBuf,
    explicit_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self {
            user_config_path: Self::user_config_path(),
            project_config_path: PathBuf::from("switchover.toml"),
            explicit_path: None,
        }
    }

    /// Use a single explicit config file instead of the layered lookup
    pub fn with_explicit_path(mut self, path: Option<PathBuf>) -> Self {
        self.explicit_path = path;
        self
    }

    /// Get user-level config path (~/.switchover/switchover.toml)
    fn user_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".switchover").join("switchover.toml"))
    }

    /// Load configuration
    ///
    /// With an explicit path the file must exist. Otherwise missing layers
    /// are skipped.
    pub async fn load(&self) -> Result<SwitchoverConfig> {
        let mut merged = toml::Value::try_from(SwitchoverConfig::default())
            .map_err(|e| SwitchoverError::Config(format!("Failed to encode defaults: {}", e)))?;
        info!("Loading configuration with defaults");

        if let Some(ref explicit) = self.explicit_path {
            let layer = self.load_from_path(explicit).await?;
            debug!(path = %explicit.display(), "Loaded explicit config");
            merge_values(&mut merged, layer);
        } else {
            let layers = self
                .user_config_path
                .iter()
                .chain(std::iter::once(&self.project_config_path));

            for path in layers {
                if !path.exists() {
                    debug!(path = %path.display(), "Config layer not found, skipping");
                    continue;
                }
                let layer = self.load_from_path(path).await?;
                debug!(path = %path.display(), "Loaded config layer");
                merge_values(&mut merged, layer);
            }
        }

        let mut config: SwitchoverConfig = merged.try_into()?;

        // Resolve environment variables
        config.resolve_env_vars();

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Read one layer as an untyped TOML table
    async fn load_from_path(&self, path: &Path) -> Result<toml::Value> {
        if !path.exists() {
            return Err(SwitchoverError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| SwitchoverError::Config(format!("Failed to read config: {}", e)))?;

        let value: toml::Value = toml::from_str(&content).map_err(|e| {
            SwitchoverError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        Ok(value)
    }

    /// Get user config path
    pub fn get_user_config_path(&self) -> Option<&PathBuf> {
        self.user_config_path.as_ref()
    }

    /// Get project config path
    pub fn get_project_config_path(&self) -> &PathBuf {
        &self.project_config_path
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Deep-merge `overlay` into `base`; tables merge recursively, everything else is replaced
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loader_with(user: Option<PathBuf>, project: PathBuf) -> ConfigLoader {
        ConfigLoader {
            user_config_path: user,
            project_config_path: project,
            explicit_path: None,
        }
    }

    #[test]
    fn test_config_paths() {
        let loader = ConfigLoader::new();

        if let Some(user_path) = loader.get_user_config_path() {
            assert!(user_path.ends_with(".switchover/switchover.toml"));
        }
        assert!(loader.get_project_config_path().ends_with("switchover.toml"));
    }

    #[tokio::test]
    async fn test_load_returns_defaults_when_no_files() {
        let loader = loader_with(None, PathBuf::from("/nonexistent/switchover.toml"));
        let config = loader.load().await.unwrap();

        assert_eq!(config.cutover.database, "medplum");
        assert_eq!(config.replication.max_attempts, 40);
    }

    #[tokio::test]
    async fn test_project_overrides_user_key_by_key() {
        let temp_dir = TempDir::new().unwrap();
        let user_path = temp_dir.path().join("user.toml");
        let project_path = temp_dir.path().join("project.toml");

        fs::write(
            &user_path,
            r#"
[endpoints.blue]
host = "blue.internal"

[replication]
max_attempts = 80
poll_interval_ms = 100
"#,
        )
        .await
        .unwrap();

        fs::write(
            &project_path,
            r#"
[endpoints.green]
host = "green.internal"

[replication]
poll_interval_ms = 25
"#,
        )
        .await
        .unwrap();

        let config = loader_with(Some(user_path), project_path).load().await.unwrap();

        // Priority: defaults < user < project
        assert_eq!(config.endpoints.blue.host, "blue.internal");
        assert_eq!(config.endpoints.green.host, "green.internal");
        assert_eq!(config.replication.max_attempts, 80);
        assert_eq!(config.replication.poll_interval_ms, 25);
        assert_eq!(config.endpoints.blue.user, "postgres");
        assert_eq!(config.remote.service, "pgbouncer");
    }

    #[tokio::test]
    async fn test_explicit_path_replaces_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let user_path = temp_dir.path().join("user.toml");
        let explicit = temp_dir.path().join("explicit.toml");

        fs::write(&user_path, "[cutover]\ndatabase = \"fromuser\"\n")
            .await
            .unwrap();
        fs::write(&explicit, "[precheck]\nminimum_rows = 10\n")
            .await
            .unwrap();

        let loader = loader_with(Some(user_path), PathBuf::from("/nonexistent"))
            .with_explicit_path(Some(explicit));
        let config = loader.load().await.unwrap();

        assert_eq!(config.cutover.database, "medplum");
        assert_eq!(config.precheck.minimum_rows, 10);
    }

    #[tokio::test]
    async fn test_explicit_path_must_exist() {
        let loader = ConfigLoader::new()
            .with_explicit_path(Some(PathBuf::from("/nonexistent/explicit.toml")));
        let err = loader.load().await.unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[tokio::test]
    async fn test_invalid_toml_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let project_path = temp_dir.path().join("project.toml");
        fs::write(&project_path, "[replication\nmax_attempts = ")
            .await
            .unwrap();

        let err = loader_with(None, project_path).load().await.unwrap_err();
        assert!(matches!(err, SwitchoverError::Config(_)));
    }

    #[tokio::test]
    async fn test_type_errors_are_reported() {
        let temp_dir = TempDir::new().unwrap();
        let project_path = temp_dir.path().join("project.toml");
        fs::write(&project_path, "[replication]\nmax_attempts = \"many\"\n")
            .await
            .unwrap();

        let err = loader_with(None, project_path).load().await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_merge_values_recurses_into_tables() {
        let mut base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\n[b]\nz = 4\n").unwrap();
        merge_values(&mut base, overlay);

        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
        assert_eq!(base["b"]["z"].as_integer(), Some(4));
    }
}
