//! Common test utilities and setup

#![allow(dead_code)]

use std::sync::Arc;
use switchover::config::SwitchoverConfig;
use switchover::db::Role;
use switchover::models::{AuditRow, ColumnRef, ProxyDatabaseEntry, SequenceLastValue};
use switchover::precheck::PrecheckSettings;
use switchover::resources::SessionResources;
use switchover::testing::{FakePooler, FakePostgres, FakeShell};
use switchover::{CutoverComponents, CutoverSession, ResourceMinimums};

pub const DB_NAME: &str = "medplum";
pub const SLOT: &str = "my_replication_slot";
pub const BLUE_HOST: &str = "blue.internal";
pub const GREEN_HOST: &str = "green.internal";
pub const BLUE_VERSION: &str = "PostgreSQL 14.10";
pub const GREEN_VERSION: &str = "PostgreSQL 15.5";

/// Endpoints for a pair that passes every precheck
pub struct Fixture {
    pub config: SwitchoverConfig,
    pub blue: Arc<FakePostgres>,
    pub green: Arc<FakePostgres>,
    pub proxy: Arc<FakePostgres>,
    pub pooler: Arc<FakePooler>,
    pub shell: Arc<FakeShell>,
}

pub fn patient_column() -> ColumnRef {
    ColumnRef::new("public", "Patient", "seq")
}

impl Fixture {
    pub fn healthy() -> Self {
        let mut config = SwitchoverConfig::default();
        config.endpoints.blue.host = BLUE_HOST.to_string();
        config.endpoints.green.host = GREEN_HOST.to_string();
        config.endpoints.proxy.host = "pgbouncer.internal".to_string();
        config.endpoints.pooler_admin.host = "pgbouncer.internal".to_string();
        config.precheck.minimum_rows = 10;

        let blue = Arc::new(FakePostgres::new(Role::Blue, BLUE_VERSION));
        let green = Arc::new(FakePostgres::new(Role::Green, GREEN_VERSION));
        let proxy = Arc::new(FakePostgres::new(Role::TrafficProxy, BLUE_VERSION));

        for side in [&blue, &green] {
            side.set_count("Patient", 100);
            side.set_audit_rows(
                "AuditEvent",
                vec![AuditRow::new("1", "a"), AuditRow::new("2", "b"), AuditRow::new("3", "c")],
            );
        }

        blue.script_lag(SLOT, &[0]);
        blue.add_sequence(
            SequenceLastValue::new("public", "Patient_seq", Some(100)),
            patient_column(),
        );
        blue.set_column_max(&patient_column(), Some(100));
        green.set_column_max(&patient_column(), Some(50));

        let pooler = Arc::new(FakePooler::new(vec![
            ProxyDatabaseEntry::new(DB_NAME, BLUE_HOST),
            ProxyDatabaseEntry {
                host: None,
                pool_mode: None,
                ..ProxyDatabaseEntry::new("pgbouncer", "")
            },
        ]));

        Self {
            config,
            blue,
            green,
            proxy,
            pooler,
            shell: Arc::new(FakeShell::new()),
        }
    }

    /// Make the traffic proxy report green's version once the pooler is reloaded
    pub fn route_to_green_on_reload(&self) {
        let proxy = self.proxy.clone();
        self.shell.on_command(move |command| {
            if command.ends_with("reload") {
                proxy.set_version(GREEN_VERSION);
            }
        });
    }

    pub fn resources(&self) -> SessionResources {
        SessionResources::from_parts(
            self.blue.clone(),
            self.green.clone(),
            self.proxy.clone(),
            self.pooler.clone(),
            Some(self.shell.clone()),
        )
    }

    pub fn minimums(&self) -> ResourceMinimums {
        ResourceMinimums::from_config(&self.config.precheck)
    }

    pub fn settings(&self) -> PrecheckSettings {
        PrecheckSettings::from_config(&self.config, self.minimums()).expect("valid precheck settings")
    }

    pub fn components(&self, dry_run: bool) -> CutoverComponents {
        CutoverComponents::assemble(&self.resources(), &self.config, dry_run)
            .expect("resources include a shell")
    }

    pub fn session(&self, dry_run: bool) -> CutoverSession {
        CutoverSession::new(dry_run, self.minimums())
    }

    /// Commands that changed the remote pooler host
    pub fn mutating_commands(&self) -> Vec<String> {
        self.shell
            .commands()
            .into_iter()
            .filter(|c| c.contains(" ln ") || c.ends_with("reload"))
            .collect()
    }
}
