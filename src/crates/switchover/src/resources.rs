//! Endpoint handles owned by one run
//!
//! All connections and the remote session are acquired together and released
//! by a single `release()` call, whichever way the run ends.

use crate::config::SwitchoverConfig;
use crate::db::{PgBouncerAdmin, PgEndpoint, PoolerAdmin, PostgresEndpoint, Role};
use crate::error::{Result, SwitchoverError};
use crate::remote::{RemoteShell, SshSession};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Every handle the orchestrator talks to
pub struct SessionResources {
    pub blue: Arc<dyn PostgresEndpoint>,
    pub green: Arc<dyn PostgresEndpoint>,
    pub proxy: Arc<dyn PostgresEndpoint>,
    pub pooler: Arc<dyn PoolerAdmin>,
    pub shell: Option<Arc<dyn RemoteShell>>,
}

impl SessionResources {
    /// Assemble from existing handles
    pub fn from_parts(
        blue: Arc<dyn PostgresEndpoint>,
        green: Arc<dyn PostgresEndpoint>,
        proxy: Arc<dyn PostgresEndpoint>,
        pooler: Arc<dyn PoolerAdmin>,
        shell: Option<Arc<dyn RemoteShell>>,
    ) -> Self {
        Self {
            blue,
            green,
            proxy,
            pooler,
            shell,
        }
    }

    /// Connect to all four endpoints concurrently, then open the remote session
    ///
    /// On any failure the handles that did connect are released before the
    /// first error is returned.
    pub async fn acquire(config: &SwitchoverConfig, with_remote: bool) -> Result<Self> {
        let endpoints = &config.endpoints;
        let (blue, green, proxy, pooler) = tokio::join!(
            PgEndpoint::connect(Role::Blue, &endpoints.blue),
            PgEndpoint::connect(Role::Green, &endpoints.green),
            PgEndpoint::connect(Role::TrafficProxy, &endpoints.proxy),
            PgBouncerAdmin::connect(&endpoints.pooler_admin),
        );

        log_status(Role::Blue, &blue);
        log_status(Role::Green, &green);
        log_status(Role::TrafficProxy, &proxy);
        log_status(Role::ProxyAdmin, &pooler);

        let (blue, green, proxy, pooler) = match (blue, green, proxy, pooler) {
            (Ok(b), Ok(g), Ok(p), Ok(a)) => (b, g, p, a),
            (blue, green, proxy, pooler) => {
                let mut first_error = None;
                let mut connected: Vec<Arc<dyn PostgresEndpoint>> = Vec::new();
                for result in [blue, green, proxy] {
                    match result {
                        Ok(endpoint) => connected.push(Arc::new(endpoint)),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                match pooler {
                    Ok(admin) => admin.close().await,
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
                join_all(connected.iter().map(|c| c.close())).await;

                return Err(first_error.unwrap_or_else(|| {
                    SwitchoverError::RemoteSession("endpoint acquisition failed".to_string())
                }));
            }
        };

        let mut resources = Self {
            blue: Arc::new(blue),
            green: Arc::new(green),
            proxy: Arc::new(proxy),
            pooler: Arc::new(pooler),
            shell: None,
        };

        if with_remote {
            let host = config.remote_host().to_string();
            info!(host = %host, "Connecting to PgBouncer server over SSH");
            match SshSession::connect(&host, &config.remote).await {
                Ok(session) => resources.shell = Some(Arc::new(session)),
                Err(e) => {
                    resources.release().await;
                    return Err(e);
                }
            }
        }

        Ok(resources)
    }

    /// Remote shell, failing when the run was acquired without one
    pub fn shell(&self) -> Result<Arc<dyn RemoteShell>> {
        self.shell
            .clone()
            .ok_or_else(|| SwitchoverError::RemoteSession("No remote session was opened".to_string()))
    }

    /// Close every handle; errors are logged, never returned
    pub async fn release(&self) {
        join_all([
            self.blue.close(),
            self.green.close(),
            self.proxy.close(),
        ])
        .await;
        self.pooler.close().await;

        if let Some(ref shell) = self.shell {
            if let Err(e) = shell.dispose().await {
                warn!(error = %e, "Failed to close remote session");
            }
        }

        info!("Session resources released");
    }
}

fn log_status<T>(role: Role, result: &Result<T>) {
    match result {
        Ok(_) => info!(role = %role, "Connected"),
        Err(e) => error!(role = %role, error = %e, "Connection failed"),
    }
}
