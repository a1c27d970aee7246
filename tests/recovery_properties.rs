//! Properties that hold for every run: bounded backoff, backup ordering,
//! first-match classification, idempotent recovery and monotonic status.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use proptest::strategy::Strategy as _;
use std::time::Duration;

use pipeforge::{
    CollaboratorError, ErrorCategory, ErrorClassifier, PhaseFailure, PhaseId, PhaseStatus,
    RecoveryOutcome, Strategy, TerminalStatus, WorkflowContext,
};

#[allow(clippy::duplicate_mod)]
#[path = "test_support/mod.rs"]
mod test_support;

use test_support::Harness;

#[tokio::test]
async fn retries_stop_after_three_with_doubling_delays() -> Result<()> {
    let h = Harness::new();
    for _ in 0..10 {
        h.fakes.analyzer.push_err(CollaboratorError::transient("dns lookup failed"));
    }

    let ctx = h.run().await;

    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
    );
    assert_eq!(h.fakes.analyzer.calls(), 4);
    assert_eq!(ctx.terminal_status(), Some(TerminalStatus::CompletedDegraded));

    let strategies: Vec<_> = ctx.recoveries.iter().map(|r| r.strategy).collect();
    assert_eq!(strategies, vec![Strategy::GracefulDegradation]);
    assert_eq!(ctx.recoveries[0].escalated_from, Some(Strategy::RetryPhase));
    assert!(!ctx.outputs.degraded.is_empty());
    Ok(())
}

#[tokio::test]
async fn configured_backoff_is_honored() -> Result<()> {
    let mut config = pipeforge::Config::default();
    config.retry.max_retries = 2;
    config.retry.base_delay_ms = 250;
    let h = Harness::with_config(config);
    for _ in 0..3 {
        h.fakes.validator.push_err(CollaboratorError::transient("service unavailable"));
    }

    let ctx = h.run().await;

    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_millis(250), Duration::from_millis(500)]
    );
    assert_eq!(ctx.terminal_status(), Some(TerminalStatus::CompletedDegraded));
    Ok(())
}

#[tokio::test]
async fn backup_is_taken_before_the_retried_attempt() -> Result<()> {
    let h = Harness::new();
    h.fakes
        .deployer
        .push_err(CollaboratorError::filesystem("read-only file system"));

    let ctx = h.run().await;

    let backups = Harness::store(&ctx).list_backups()?;
    assert_eq!(backups.len(), 1);
    let retried = ctx.phase(PhaseId::Deployment);
    assert_eq!(retried.status(), PhaseStatus::Completed);
    assert_eq!(retried.attempts, 2);
    assert!(backups[0].timestamp < retried.started_at.unwrap());
    assert_eq!(ctx.terminal_status(), Some(TerminalStatus::CompletedDegraded));
    Ok(())
}

#[tokio::test]
async fn recovery_on_a_finished_run_changes_nothing() -> Result<()> {
    let h = Harness::new();
    let mut ctx = h.orchestrator.run(h.request("")).await;
    assert_eq!(ctx.terminal_status(), Some(TerminalStatus::CompletedMinimal));

    let sealed = ctx.clone();
    let errors_before = Harness::store(&ctx).list_errors()?.len();
    let failure = PhaseFailure::new(PhaseId::Generation, ErrorCategory::FileSystem, "late", 1, ctx.created_at);

    for _ in 0..2 {
        let outcome = h.orchestrator.recover(&mut ctx, &failure).await;
        assert_eq!(outcome, RecoveryOutcome::Terminal(TerminalStatus::CompletedMinimal));
        for strategy in Strategy::ALL {
            h.orchestrator.executor().execute(&mut ctx, &failure, strategy).await;
        }
    }

    assert_eq!(ctx, sealed);
    assert_eq!(Harness::store(&ctx).list_errors()?.len(), errors_before);
    Ok(())
}

#[tokio::test]
async fn minimal_recovery_always_leaves_artifacts() -> Result<()> {
    let h = Harness::new();
    let mut ctx = h.start();
    let failure = PhaseFailure::new(PhaseId::Analysis, ErrorCategory::Unknown, "?", 1, ctx.created_at);

    let outcome = h
        .orchestrator
        .executor()
        .execute(&mut ctx, &failure, Strategy::MinimalRecovery)
        .await;

    assert_eq!(outcome.terminal_status(), Some(TerminalStatus::CompletedMinimal));
    assert!(ctx.has_artifacts());
    assert!(!ctx.outputs.fallback.is_empty());
    Ok(())
}

fn category() -> impl proptest::strategy::Strategy<Value = ErrorCategory> {
    prop_oneof![
        Just(ErrorCategory::TransientIo),
        Just(ErrorCategory::FileSystem),
        Just(ErrorCategory::Analysis),
        Just(ErrorCategory::Generation),
        Just(ErrorCategory::Deployment),
        Just(ErrorCategory::Validation),
        Just(ErrorCategory::Sequencing),
        Just(ErrorCategory::Unknown),
    ]
}

fn phase() -> impl proptest::strategy::Strategy<Value = PhaseId> {
    (0..PhaseId::ALL.len()).prop_map(|i| PhaseId::ALL[i])
}

fn status() -> impl proptest::strategy::Strategy<Value = PhaseStatus> {
    prop_oneof![
        Just(PhaseStatus::Pending),
        Just(PhaseStatus::Running),
        Just(PhaseStatus::Completed),
        Just(PhaseStatus::Failed),
        Just(PhaseStatus::Skipped),
    ]
}

fn blank_context() -> WorkflowContext {
    let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    WorkflowContext::new("wf-prop", "/project", "agents", "/runs/wf-prop", at)
}

const MESSAGES: [&str; 4] = [
    "collaborator returned garbage",
    "connection reset while fetching",
    "permission denied on output",
    "timed out writing: permission denied",
];

proptest! {
    #[test]
    fn classification_is_first_matching_rule(
        category in category(),
        failed_phase in phase(),
        also_failed in proptest::collection::btree_set(phase(), 0..4),
        message in 0..MESSAGES.len(),
    ) {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut ctx = blank_context();
        for id in &also_failed {
            ctx.transition(*id, PhaseStatus::Running, at).unwrap();
            ctx.transition(*id, PhaseStatus::Failed, at).unwrap();
        }
        let failure = PhaseFailure::new(failed_phase, category, MESSAGES[message], 1, at);
        let classifier = ErrorClassifier::default();

        let matches = classifier.matching_rules(&failure, &ctx);
        prop_assert!(!matches.is_empty());
        prop_assert_eq!(*matches.last().unwrap(), ErrorClassifier::rules().len() - 1);

        let chosen = classifier.classify_with_rule(&failure, &ctx);
        prop_assert_eq!(chosen.index, matches[0]);
        prop_assert_eq!(chosen.strategy, ErrorClassifier::rules()[matches[0]].strategy);
        if category == ErrorCategory::TransientIo {
            prop_assert_eq!(chosen.strategy, Strategy::RetryPhase);
        }
    }

    #[test]
    fn terminal_status_never_regresses(
        steps in proptest::collection::vec((phase(), status()), 0..40),
    ) {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut ctx = blank_context();
        for (id, to) in steps {
            let before = ctx.status(id);
            let applied = ctx.transition(id, to, at).is_ok();
            let after = ctx.status(id);
            if before.is_terminal() {
                prop_assert!(after.is_terminal());
            }
            if !applied {
                prop_assert_eq!(before, after);
            }
        }
    }
}
