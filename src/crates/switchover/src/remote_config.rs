//! Remote config switcher
//!
//! PgBouncer reads a single config path. Each side has its own config file
//! and the active path is a symlink to one of them; switching is `ln -sf`
//! followed by a service reload, which PgBouncer applies without dropping
//! client connections.

use crate::config::RemoteConfig;
use crate::error::{Result, SwitchoverError};
use crate::models::Side;
use crate::pooler::{ProxyController, DRY_RUN_PREFIX};
use crate::remote::RemoteShell;
use std::sync::Arc;
use tracing::{debug, info};

/// Config file locations on the pooler host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub active: String,
    pub blue: String,
    pub green: String,
}

impl ConfigPaths {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            active: config.active_config_path.clone(),
            blue: config.blue_config_path.clone(),
            green: config.green_config_path.clone(),
        }
    }

    /// Config file routing to `target`
    pub fn for_target(&self, target: Side) -> Result<&str> {
        let path = match target {
            Side::Blue => &self.blue,
            Side::Green => &self.green,
        };
        if path.trim().is_empty() {
            return Err(SwitchoverError::InvalidTarget(format!(
                "no PgBouncer config path for {}",
                target
            )));
        }
        Ok(path)
    }
}

/// What the read-only precheck observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePrecheck {
    pub config_contents: String,
    pub service_status: String,
}

/// Commands the apply step ran (or would have run)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchResult {
    pub commands: Vec<String>,
    pub simulated: bool,
}

pub struct RemoteConfigSwitcher {
    shell: Arc<dyn RemoteShell>,
    proxy: Arc<ProxyController>,
    db_name: String,
    paths: ConfigPaths,
    service: String,
    use_sudo: bool,
    dry_run: bool,
}

impl RemoteConfigSwitcher {
    pub fn new(
        shell: Arc<dyn RemoteShell>,
        proxy: Arc<ProxyController>,
        db_name: impl Into<String>,
        config: &RemoteConfig,
        dry_run: bool,
    ) -> Self {
        Self {
            shell,
            proxy,
            db_name: db_name.into(),
            paths: ConfigPaths::from_config(config),
            service: config.service.clone(),
            use_sudo: config.use_sudo,
            dry_run,
        }
    }

    fn privileged(&self, command: String) -> String {
        if self.use_sudo {
            format!("sudo {}", command)
        } else {
            command
        }
    }

    pub fn show_config_command(&self, target: Side) -> Result<String> {
        let path = self.paths.for_target(target)?;
        Ok(self.privileged(format!("cat {}", shell_quote(path))))
    }

    pub fn status_command(&self) -> String {
        self.privileged(format!("service {} status", shell_quote(&self.service)))
    }

    pub fn link_command(&self, target: Side) -> Result<String> {
        let path = self.paths.for_target(target)?;
        Ok(self.privileged(format!(
            "ln -sf {} {}",
            shell_quote(path),
            shell_quote(&self.paths.active)
        )))
    }

    pub fn reload_command(&self) -> String {
        self.privileged(format!("service {} reload", shell_quote(&self.service)))
    }

    async fn run_checked(&self, command: &str) -> Result<String> {
        let output = self.shell.exec(command).await?;
        if !output.stdout.trim().is_empty() {
            debug!(command = %command, stdout = %output.stdout.trim(), "Remote command output");
        }
        Ok(output.check(command)?.stdout)
    }

    /// Read the candidate config and the service status without mutating anything
    pub async fn precheck(&self, target: Side) -> Result<RemotePrecheck> {
        let entry = self.proxy.find_database(&self.db_name).await?;
        if entry.disabled {
            return Err(SwitchoverError::precondition(format!(
                "{} database must not be disabled",
                self.db_name
            )));
        }

        let show = self.show_config_command(target)?;
        let config_contents = self.run_checked(&show).await?;
        info!(target = %target, lines = config_contents.lines().count(), "Read new PgBouncer config");

        let status = self.status_command();
        let service_status = self.run_checked(&status).await?;
        info!(service = %self.service, "PgBouncer service is running and accessible");

        Ok(RemotePrecheck {
            config_contents,
            service_status,
        })
    }

    /// Repoint the active config at `target` and reload the pooler
    ///
    /// Requires the database to be paused (live mode) and never disabled.
    pub async fn apply(&self, target: Side) -> Result<SwitchResult> {
        let entry = self.proxy.find_database(&self.db_name).await?;

        if !self.dry_run && !entry.paused {
            return Err(SwitchoverError::Proxy(format!(
                "{} database must be paused before switching config",
                self.db_name
            )));
        }
        if entry.disabled {
            return Err(SwitchoverError::Proxy(format!(
                "{} database must not be disabled",
                self.db_name
            )));
        }

        let commands = vec![self.link_command(target)?, self.reload_command()];

        if self.dry_run {
            for command in &commands {
                info!(command = %command, "{}Would execute: {}", DRY_RUN_PREFIX, command);
            }
            return Ok(SwitchResult {
                commands,
                simulated: true,
            });
        }

        for command in &commands {
            info!(command = %command, "Executing remote command");
            self.run_checked(command).await?;
        }

        info!(target = %target, "PgBouncer config switched and reloaded");
        Ok(SwitchResult {
            commands,
            simulated: false,
        })
    }
}

/// Single-quote a shell word unless it is made of safe characters only
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '@'));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
