//! Cutover orchestrator
//!
//! Sequences the cutover:
//!
//! ```text
//! precheck -> (confirm) -> confirmed -> paused -> switching -> resumed -> verified
//!                                          \          \           \
//!                                           +----------+-----------+--> failed
//! ```
//!
//! Client traffic stays paused from the PAUSE until the config switch has
//! been applied. Any failure in that window triggers exactly one RESUME and
//! the run ends as rolled back, carrying the original error.

use crate::config::SwitchoverConfig;
use crate::db::PostgresEndpoint;
use crate::equivalence::DataEquivalenceChecker;
use crate::error::{Result, SwitchoverError};
use crate::models::Side;
use crate::pooler::ProxyController;
use crate::precheck::{PrecheckReport, PrecheckSettings, PreconditionValidator};
use crate::prompt::Confirm;
use crate::remote_config::RemoteConfigSwitcher;
use crate::replication::ReplicationWatcher;
use crate::report;
use crate::resources::SessionResources;
use crate::sequences::{SequenceSynchronizer, SyncMode};
use crate::session::{CutoverOutcome, CutoverPhase, CutoverSession, ResourceMinimums};
use crate::versions::VersionChecker;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The components a cutover run drives, wired to one set of resources
pub struct CutoverComponents {
    /// Logical database name in the pooler
    pub db_name: String,
    pub blue: Arc<dyn PostgresEndpoint>,
    pub green: Arc<dyn PostgresEndpoint>,
    pub proxy: Arc<ProxyController>,
    pub versions: VersionChecker,
    pub equivalence: DataEquivalenceChecker,
    pub watcher: ReplicationWatcher,
    pub sequences: SequenceSynchronizer,
    pub remote: RemoteConfigSwitcher,
}

impl CutoverComponents {
    /// Wire every component to the session's handles
    pub fn assemble(resources: &SessionResources, config: &SwitchoverConfig, dry_run: bool) -> Result<Self> {
        let proxy = Arc::new(ProxyController::new(resources.pooler.clone(), dry_run, &config.proxy));

        Ok(Self {
            db_name: config.cutover.database.clone(),
            blue: resources.blue.clone(),
            green: resources.green.clone(),
            versions: VersionChecker::new(
                resources.blue.clone(),
                resources.green.clone(),
                resources.proxy.clone(),
            ),
            equivalence: DataEquivalenceChecker::new(resources.blue.clone(), resources.green.clone()),
            watcher: ReplicationWatcher::new(
                resources.blue.clone(),
                config.cutover.replication_slot.clone(),
                &config.replication,
            ),
            sequences: SequenceSynchronizer::new(
                resources.blue.clone(),
                resources.green.clone(),
                config.precheck.sequence_schema.clone(),
                dry_run,
            ),
            remote: RemoteConfigSwitcher::new(
                resources.shell()?,
                proxy.clone(),
                config.cutover.database.clone(),
                &config.remote,
                dry_run,
            ),
            proxy,
        })
    }
}

pub struct CutoverOrchestrator<'a> {
    components: CutoverComponents,
    settings: PrecheckSettings,
    prompt: &'a dyn Confirm,
    print_reports: bool,
}

impl<'a> CutoverOrchestrator<'a> {
    pub fn new(components: CutoverComponents, settings: PrecheckSettings, prompt: &'a dyn Confirm) -> Self {
        Self {
            components,
            settings,
            prompt,
            print_reports: false,
        }
    }

    /// Print precheck tables to stdout before asking for confirmation
    pub fn with_reports(mut self, print_reports: bool) -> Self {
        self.print_reports = print_reports;
        self
    }

    pub fn components(&self) -> &CutoverComponents {
        &self.components
    }

    /// Run the cutover
    ///
    /// # Returns
    /// `Completed`, `Declined` or `RolledBack` for the expected paths.
    /// Errors are returned for precheck failures (nothing mutated), for
    /// failures before the pause, and for a failed post-switch verification,
    /// which leaves the switched config in place.
    pub async fn run(&self, session: &mut CutoverSession) -> Result<CutoverOutcome> {
        let dry_run = session.dry_run();
        info!(session_id = %session.id(), dry_run = dry_run, "Starting cutover");

        let precheck = PreconditionValidator::new(&self.components, &self.settings).run().await?;
        if self.print_reports {
            report::print_precheck(&precheck);
        }

        let question = format!(
            "\ndryRun={}\nPrecondition checks passed. Begin cutover?",
            dry_run
        );
        if !self.prompt.confirm(&question).await? {
            info!(session_id = %session.id(), "Cutover declined");
            session.decline();
            session.finish(true);
            return Ok(CutoverOutcome::Declined);
        }

        session.advance(CutoverPhase::Confirmed)?;
        info!(session_id = %session.id(), "Beginning cutover");

        self.components.versions.check(Side::Blue).await?;
        self.ensure_not_paused(dry_run).await?;

        self.components.proxy.pause(&self.components.db_name).await?;
        session.advance(CutoverPhase::Paused)?;

        if let Err(e) = self.converge_and_sync().await {
            return self.roll_back(session, e).await;
        }

        session.advance(CutoverPhase::Switching)?;
        if let Err(e) = self.components.remote.apply(Side::Green).await {
            return self.roll_back(session, e).await;
        }

        if let Err(e) = self.components.proxy.resume(&self.components.db_name).await {
            error!(session_id = %session.id(), error = %e, "Resume after config switch failed");
            let phase = session.phase();
            session.fail(&e)?;
            session.finish(false);
            return Ok(CutoverOutcome::RolledBack { phase, error: e });
        }
        session.advance(CutoverPhase::Resumed)?;

        let expected = if dry_run { Side::Blue } else { Side::Green };
        match self.components.versions.check(expected).await {
            Ok(versions) => {
                if self.print_reports {
                    println!("{}", report::versions_table(&versions));
                }
                session.advance(CutoverPhase::Verified)?;
                session.finish(true);
                info!(session_id = %session.id(), "Cutover complete");
                Ok(CutoverOutcome::Completed)
            }
            Err(e) => {
                error!(
                    session_id = %session.id(),
                    error = %e,
                    "Post-switch verification failed; the config switch has not been reverted"
                );
                session.fail(&e)?;
                session.finish(false);
                Err(e)
            }
        }
    }

    /// Run only the prechecks
    pub async fn precheck(&self) -> Result<PrecheckReport> {
        PreconditionValidator::new(&self.components, &self.settings).run().await
    }

    async fn ensure_not_paused(&self, dry_run: bool) -> Result<()> {
        if dry_run {
            return Ok(());
        }
        let entry = self.components.proxy.find_database(&self.components.db_name).await?;
        if entry.paused {
            return Err(SwitchoverError::precondition(format!(
                "{} database is already paused",
                entry.name
            )));
        }
        Ok(())
    }

    /// Wait for replication and apply sequences concurrently, failing on the first error
    async fn converge_and_sync(&self) -> Result<()> {
        let (convergence, sequences) = tokio::try_join!(
            self.components.watcher.wait_for_convergence(),
            self.components.sequences.run(SyncMode::Apply),
        )?;
        info!(
            attempts = convergence.attempts,
            lag_bytes = convergence.lag_bytes,
            sequences = sequences.applied.len(),
            "Replication converged and sequences synchronized"
        );
        Ok(())
    }

    async fn roll_back(&self, session: &mut CutoverSession, error: SwitchoverError) -> Result<CutoverOutcome> {
        let phase = session.phase();
        error!(session_id = %session.id(), phase = %phase, error = %error, "Cutover step failed, resuming traffic");
        session.fail(&error)?;

        if let Err(resume_error) = self.components.proxy.resume(&self.components.db_name).await {
            warn!(
                session_id = %session.id(),
                error = %resume_error,
                "Resume during rollback failed"
            );
        }

        session.finish(false);
        Ok(CutoverOutcome::RolledBack { phase, error })
    }
}

/// Acquire resources, run one cutover and release everything
pub async fn run_cutover(
    config: &SwitchoverConfig,
    dry_run: bool,
    prompt: &dyn Confirm,
    print_reports: bool,
) -> Result<CutoverOutcome> {
    let minimums = ResourceMinimums::from_config(&config.precheck);
    let settings = PrecheckSettings::from_config(config, minimums.clone())?;
    let mut session = CutoverSession::new(dry_run, minimums);

    let resources = SessionResources::acquire(config, true).await?;

    let outcome = match CutoverComponents::assemble(&resources, config, dry_run) {
        Ok(components) => {
            CutoverOrchestrator::new(components, settings, prompt)
                .with_reports(print_reports)
                .run(&mut session)
                .await
        }
        Err(e) => Err(e),
    };

    resources.release().await;
    outcome
}
