//! Configuration management for switchover
//!
//! Supports layered configuration:
//! - User-level: ~/.switchover/switchover.toml
//! - Project-level: ./switchover.toml
//! - Explicit: `--config <path>` or `SWITCHOVER_CONFIG`
//!
//! Project-level config overrides user-level config.

mod loader;
mod schema;

pub use loader::{ConfigLoader, CONFIG_ENV_VAR};
pub use schema::{
    CutoverConfig, EndpointConfig, EndpointsConfig, LoggingConfig, PrecheckConfig, ProxyConfig,
    RemoteConfig, ReplicationConfig, SwitchoverConfig,
};

use crate::Result;
use std::path::PathBuf;

/// Load and validate configuration
///
/// # Arguments
/// * `explicit` - Config file that replaces the user/project lookup
pub async fn load_config(explicit: Option<PathBuf>) -> Result<SwitchoverConfig> {
    let config = ConfigLoader::new().with_explicit_path(explicit).load().await?;
    config.validate()?;
    Ok(config)
}
