//! Server version cross-check
//!
//! Blue and green run different server builds, so `SELECT version()` through
//! the traffic proxy reveals which side PgBouncer is actually routing to.

use crate::db::PostgresEndpoint;
use crate::error::{Result, SwitchoverError};
use crate::models::Side;
use futures::future::try_join3;
use std::sync::Arc;
use tracing::{error, info};

/// Version strings observed on each endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersions {
    pub blue: String,
    pub green: String,
    pub proxy: String,
}

impl ServerVersions {
    pub fn new(blue: impl Into<String>, green: impl Into<String>, proxy: impl Into<String>) -> Self {
        Self {
            blue: blue.into(),
            green: green.into(),
            proxy: proxy.into(),
        }
    }

    fn of(&self, side: Side) -> &str {
        match side {
            Side::Blue => &self.blue,
            Side::Green => &self.green,
        }
    }

    /// Check that the proxy matches `proxying` and not the other side
    ///
    /// When blue and green report the same version the second half of the
    /// check cannot distinguish anything and is skipped.
    pub fn expect_proxying(&self, proxying: Side) -> Result<()> {
        let expected = self.of(proxying);
        let other = self.of(proxying.other());

        let matches_expected = self.proxy == expected;
        let distinguishable = self.blue != self.green;
        let matches_other = distinguishable && self.proxy == other;

        if matches_expected && !matches_other {
            Ok(())
        } else {
            Err(SwitchoverError::VersionMismatch {
                expected: proxying.to_string(),
                blue: self.blue.clone(),
                green: self.green.clone(),
                proxy: self.proxy.clone(),
            })
        }
    }
}

pub struct VersionChecker {
    blue: Arc<dyn PostgresEndpoint>,
    green: Arc<dyn PostgresEndpoint>,
    proxy: Arc<dyn PostgresEndpoint>,
}

impl VersionChecker {
    pub fn new(
        blue: Arc<dyn PostgresEndpoint>,
        green: Arc<dyn PostgresEndpoint>,
        proxy: Arc<dyn PostgresEndpoint>,
    ) -> Self {
        Self { blue, green, proxy }
    }

    /// Read the three version strings
    pub async fn fetch(&self) -> Result<ServerVersions> {
        let (blue, green, proxy) = try_join3(
            self.blue.server_version(),
            self.green.server_version(),
            self.proxy.server_version(),
        )
        .await?;
        Ok(ServerVersions { blue, green, proxy })
    }

    /// Fetch and assert the proxy is routed to `proxying`
    pub async fn check(&self, proxying: Side) -> Result<ServerVersions> {
        let versions = self.fetch().await?;
        match versions.expect_proxying(proxying) {
            Ok(()) => {
                info!(proxying = %proxying, version = %versions.proxy, "Proxy server version matches");
                Ok(versions)
            }
            Err(e) => {
                error!(
                    proxying = %proxying,
                    blue = %versions.blue,
                    green = %versions.green,
                    proxy = %versions.proxy,
                    "Proxy server version does not match"
                );
                Err(e)
            }
        }
    }
}
