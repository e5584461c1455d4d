//! Version cross-check, connectivity and resource release through the public API

mod common;

use common::{Fixture, BLUE_VERSION, GREEN_VERSION};
use std::sync::Arc;
use switchover::db::PostgresEndpoint;
use switchover::health::{check_connectivity, HealthStatus};
use switchover::models::Side;
use switchover::report;
use switchover::SwitchoverError;

#[tokio::test]
async fn test_version_check_follows_routing() {
    let fixture = Fixture::healthy();
    let components = fixture.components(false);

    let versions = components.versions.check(Side::Blue).await.unwrap();
    assert_eq!(versions.proxy, BLUE_VERSION);
    assert!(matches!(
        components.versions.check(Side::Green).await,
        Err(SwitchoverError::VersionMismatch { .. })
    ));

    fixture.proxy.set_version(GREEN_VERSION);
    assert!(components.versions.check(Side::Green).await.is_ok());
    assert!(components.versions.check(Side::Blue).await.is_err());

    let table = report::versions_table(&components.versions.fetch().await.unwrap());
    assert!(table.contains(GREEN_VERSION));
}

#[tokio::test]
async fn test_connectivity_reports_every_endpoint() {
    let fixture = Fixture::healthy();
    fixture.proxy.fail_on("server_version");

    let endpoints: Vec<Arc<dyn PostgresEndpoint>> =
        vec![fixture.blue.clone(), fixture.green.clone(), fixture.proxy.clone()];
    let health = check_connectivity(&endpoints, fixture.pooler.clone()).await;

    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.checks.len(), 4);
    assert_eq!(health.checks[2].name, "traffic-proxy");
    assert_eq!(health.checks[2].status, HealthStatus::Unhealthy);
    assert_eq!(health.checks[3].message.as_deref(), Some("2 databases"));
    assert!(report::health_table(&health).contains("traffic-proxy"));
}

#[tokio::test(start_paused = true)]
async fn test_resources_released_after_run() {
    let fixture = Fixture::healthy();
    let resources = fixture.resources();
    let prompt = switchover::testing::ScriptedPrompt::new(&[false]);

    {
        let components = switchover::CutoverComponents::assemble(&resources, &fixture.config, true).unwrap();
        let orchestrator =
            switchover::CutoverOrchestrator::new(components, fixture.settings(), &prompt);
        let mut session = fixture.session(true);
        orchestrator.run(&mut session).await.unwrap();
    }
    resources.release().await;

    assert!(fixture.blue.is_closed());
    assert!(fixture.green.is_closed());
    assert!(fixture.proxy.is_closed());
    assert!(fixture.pooler.is_closed());
    assert!(fixture.shell.is_disposed());
}
