//! End-to-end cutover runs against in-memory endpoints

mod common;

use common::{Fixture, DB_NAME, SLOT};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchover::models::SequenceName;
use switchover::testing::ScriptedPrompt;
use switchover::{CutoverOrchestrator, CutoverOutcome, CutoverPhase, SwitchoverError};

#[tokio::test(start_paused = true)]
async fn test_declined_cutover_mutates_nothing() {
    let fixture = Fixture::healthy();
    let prompt = ScriptedPrompt::new(&[false]);
    let orchestrator = CutoverOrchestrator::new(fixture.components(false), fixture.settings(), &prompt);
    let mut session = fixture.session(false);

    let outcome = orchestrator.run(&mut session).await.unwrap();

    assert!(matches!(outcome, CutoverOutcome::Declined));
    assert!(outcome.is_success());
    assert_eq!(session.phase(), CutoverPhase::Precheck);
    assert_eq!(session.result(), Some(true));
    assert_eq!(fixture.pooler.pause_count(), 0);
    assert_eq!(fixture.pooler.resume_count(), 0);
    assert!(fixture.green.setval_calls().is_empty());
    assert!(fixture.mutating_commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_is_asked_before_pause() {
    let fixture = Fixture::healthy();
    fixture.route_to_green_on_reload();

    let pauses_at_prompt = Arc::new(AtomicUsize::new(usize::MAX));
    let prompt = ScriptedPrompt::new(&[true]);
    {
        let pooler = fixture.pooler.clone();
        let seen = pauses_at_prompt.clone();
        prompt.on_ask(move |_| seen.store(pooler.pause_count(), Ordering::SeqCst));
    }

    let orchestrator = CutoverOrchestrator::new(fixture.components(false), fixture.settings(), &prompt);
    let mut session = fixture.session(false);
    orchestrator.run(&mut session).await.unwrap();

    assert_eq!(pauses_at_prompt.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.pooler.pause_count(), 1);

    let questions = prompt.questions();
    assert_eq!(questions.len(), 1);
    assert!(questions[0].contains("dryRun=false"));
    assert!(questions[0].contains("Begin cutover?"));
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_completes_without_mutation() {
    let fixture = Fixture::healthy();
    let prompt = ScriptedPrompt::new(&[true]);
    let orchestrator = CutoverOrchestrator::new(fixture.components(true), fixture.settings(), &prompt);
    let mut session = fixture.session(true);

    let outcome = orchestrator.run(&mut session).await.unwrap();

    assert!(matches!(outcome, CutoverOutcome::Completed));
    assert_eq!(session.phase(), CutoverPhase::Verified);
    assert_eq!(fixture.pooler.pause_count(), 0);
    assert_eq!(fixture.pooler.resume_count(), 0);
    assert!(fixture.green.setval_calls().is_empty());
    assert!(fixture.mutating_commands().is_empty());
    assert_eq!(fixture.shell.commands().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_live_cutover_routes_to_green() {
    let fixture = Fixture::healthy();
    fixture.route_to_green_on_reload();
    let prompt = ScriptedPrompt::new(&[true]);
    let orchestrator = CutoverOrchestrator::new(fixture.components(false), fixture.settings(), &prompt);
    let mut session = fixture.session(false);

    let outcome = orchestrator.run(&mut session).await.unwrap();

    assert!(matches!(outcome, CutoverOutcome::Completed));
    assert_eq!(
        session.phase_history(),
        vec![
            CutoverPhase::Precheck,
            CutoverPhase::Confirmed,
            CutoverPhase::Paused,
            CutoverPhase::Switching,
            CutoverPhase::Resumed,
            CutoverPhase::Verified,
        ]
    );
    assert_eq!(session.result(), Some(true));

    assert_eq!(fixture.pooler.pause_count(), 1);
    assert_eq!(fixture.pooler.resume_count(), 1);
    assert_eq!(
        fixture.green.setval_calls(),
        vec![(SequenceName::new("public", "Patient_seq"), 100)]
    );
    assert_eq!(
        fixture.mutating_commands(),
        vec![
            "sudo ln -sf /etc/pgbouncer/green.pgbouncer.ini /etc/pgbouncer/pgbouncer.ini".to_string(),
            "sudo service pgbouncer reload".to_string(),
        ]
    );

    let entry = orchestrator.components().proxy.find_database(DB_NAME).await.unwrap();
    assert!(!entry.paused);
}

#[tokio::test(start_paused = true)]
async fn test_replication_timeout_rolls_back() {
    let fixture = Fixture::healthy();
    // The precheck reads 0; every poll during the pause sees 4096
    fixture.blue.script_lag(SLOT, &[0, 4096]);
    let prompt = ScriptedPrompt::new(&[true]);
    let orchestrator = CutoverOrchestrator::new(fixture.components(false), fixture.settings(), &prompt);
    let mut session = fixture.session(false);

    let outcome = orchestrator.run(&mut session).await.unwrap();

    match outcome {
        CutoverOutcome::RolledBack { phase, error } => {
            assert_eq!(phase, CutoverPhase::Paused);
            assert!(matches!(error, SwitchoverError::ReplicationTimeout { last_lag_bytes: 4096, .. }));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(session.phase(), CutoverPhase::Failed);
    assert_eq!(session.result(), Some(false));
    assert_eq!(fixture.pooler.pause_count(), 1);
    assert_eq!(fixture.pooler.resume_count(), 1);
    assert!(fixture.mutating_commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sequence_write_failure_rolls_back() {
    let fixture = Fixture::healthy();
    fixture.green.fail_on("set_sequence_value");
    let prompt = ScriptedPrompt::new(&[true]);
    let orchestrator = CutoverOrchestrator::new(fixture.components(false), fixture.settings(), &prompt);
    let mut session = fixture.session(false);

    let outcome = orchestrator.run(&mut session).await.unwrap();

    assert!(matches!(
        outcome,
        CutoverOutcome::RolledBack {
            phase: CutoverPhase::Paused,
            error: SwitchoverError::Query { .. }
        }
    ));
    assert_eq!(fixture.pooler.resume_count(), 1);
    assert!(fixture.mutating_commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reload_failure_rolls_back_after_switching() {
    let fixture = Fixture::healthy();
    fixture.shell.respond(
        "sudo service pgbouncer reload",
        switchover::remote::CommandOutput::failure(1, "reload failed"),
    );
    let prompt = ScriptedPrompt::new(&[true]);
    let orchestrator = CutoverOrchestrator::new(fixture.components(false), fixture.settings(), &prompt);
    let mut session = fixture.session(false);

    let outcome = orchestrator.run(&mut session).await.unwrap();

    match outcome {
        CutoverOutcome::RolledBack { phase, error } => {
            assert_eq!(phase, CutoverPhase::Switching);
            assert!(error.to_string().contains("reload failed"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(fixture.pooler.resume_count(), 1);
    assert_eq!(session.phase(), CutoverPhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_resume_is_not_retried() {
    let fixture = Fixture::healthy();
    fixture.route_to_green_on_reload();
    fixture.pooler.fail_resume("ERROR: resume failed");
    let prompt = ScriptedPrompt::new(&[true]);
    let orchestrator = CutoverOrchestrator::new(fixture.components(false), fixture.settings(), &prompt);
    let mut session = fixture.session(false);

    let outcome = orchestrator.run(&mut session).await.unwrap();

    assert!(matches!(
        outcome,
        CutoverOutcome::RolledBack {
            phase: CutoverPhase::Switching,
            error: SwitchoverError::Proxy(_)
        }
    ));
    assert_eq!(fixture.pooler.resume_count(), 1);
    assert_eq!(fixture.mutating_commands().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_verification_keeps_switched_config() {
    let fixture = Fixture::healthy();
    // Reload succeeds but the proxy keeps reporting blue's version
    let prompt = ScriptedPrompt::new(&[true]);
    let orchestrator = CutoverOrchestrator::new(fixture.components(false), fixture.settings(), &prompt);
    let mut session = fixture.session(false);

    let err = orchestrator.run(&mut session).await.unwrap_err();

    assert!(matches!(err, SwitchoverError::VersionMismatch { .. }));
    assert_eq!(session.phase(), CutoverPhase::Failed);
    assert_eq!(session.result(), Some(false));
    assert_eq!(fixture.pooler.resume_count(), 1);
    assert_eq!(fixture.mutating_commands().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_precheck_failure_never_prompts_or_pauses() {
    let fixture = Fixture::healthy();
    fixture.proxy.set_version(common::GREEN_VERSION);
    let prompt = ScriptedPrompt::new(&[true]);
    let orchestrator = CutoverOrchestrator::new(fixture.components(false), fixture.settings(), &prompt);
    let mut session = fixture.session(false);

    let err = orchestrator.run(&mut session).await.unwrap_err();

    assert!(err.is_precondition());
    assert!(prompt.questions().is_empty());
    assert_eq!(session.phase(), CutoverPhase::Precheck);
    assert_eq!(fixture.pooler.pause_count(), 0);
    assert!(fixture.shell.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sequence_ahead_on_green_fails_precheck() {
    let fixture = Fixture::healthy();
    fixture.green.set_column_max(&common::patient_column(), Some(150));
    let prompt = ScriptedPrompt::new(&[true]);
    let orchestrator = CutoverOrchestrator::new(fixture.components(false), fixture.settings(), &prompt);
    let mut session = fixture.session(false);

    let err = orchestrator.run(&mut session).await.unwrap_err();

    assert!(err.is_invariant_violation());
    assert!(prompt.questions().is_empty());
    assert!(fixture.green.setval_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_watcher_and_sequence_sync_overlap_while_paused() {
    let fixture = Fixture::healthy();
    fixture.route_to_green_on_reload();
    let delay = Duration::from_millis(300);
    fixture.blue.set_delay("replication_slots", delay);
    fixture.green.set_delay("set_sequence_value", delay);

    let prompt = ScriptedPrompt::new(&[true]);
    let orchestrator = CutoverOrchestrator::new(fixture.components(false), fixture.settings(), &prompt);
    let mut session = fixture.session(false);

    let outcome = orchestrator.run(&mut session).await.unwrap();
    assert!(matches!(outcome, CutoverOutcome::Completed));

    let window = fixture.pooler.paused_window().unwrap();
    assert!(window >= delay);
    assert!(window < delay * 2, "traffic was paused for {:?}", window);
}
