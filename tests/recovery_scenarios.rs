//! End-to-end recovery scenarios.
//!
//! Each test drives a full run against scripted collaborators and checks the
//! terminal status, the phase table and what landed on disk.

use anyhow::Result;
use std::time::Duration;

use pipeforge::engine::synthesis::{FALLBACK_ARTIFACT_NAME, SIMPLIFIED_CONFIG_NAME};
use pipeforge::{
    CollaboratorError, ErrorCategory, ExecutionMode, PhaseFailure, PhaseId, PhaseStatus,
    RecoveryOutcome, Strategy, TerminalStatus, ValidationReport,
};
use pipeforge_utils::paths::{MINIMAL_CONFIG_FILE, MINIMAL_DIR};

#[allow(clippy::duplicate_mod)]
#[path = "test_support/mod.rs"]
mod test_support;

use test_support::Harness;

#[tokio::test]
async fn transient_analysis_failure_is_retried_once() -> Result<()> {
    let h = Harness::new();
    h.fakes
        .analyzer
        .push_err(CollaboratorError::transient("connection reset by peer"));

    let ctx = h.run().await;

    assert_eq!(ctx.terminal_status(), Some(TerminalStatus::Completed));
    assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1)]);
    assert_eq!(ctx.phase(PhaseId::Analysis).attempts, 2);
    assert!(ctx.phases().iter().all(|r| r.status() == PhaseStatus::Completed));

    let errors = Harness::store(&ctx).list_errors()?;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].phase, PhaseId::Analysis);
    assert_eq!(errors[0].category, ErrorCategory::TransientIo);
    Ok(())
}

#[tokio::test]
async fn permission_failure_in_generation_rolls_back() -> Result<()> {
    let h = Harness::new();
    h.fakes.generator.fail_task(
        "reviewer",
        CollaboratorError::filesystem("permission denied: .agents/reviewer.md"),
    );

    let ctx = h.run().await;

    assert_eq!(ctx.terminal_status(), Some(TerminalStatus::CompletedDegraded));
    assert_eq!(ctx.mode, ExecutionMode::Simplified);

    let backups = Harness::store(&ctx).list_backups()?;
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].context["phases"][3]["phase"], "generation");
    assert_eq!(backups[0].context["phases"][3]["status"], "RUNNING");

    for id in [PhaseId::Requirements, PhaseId::Analysis, PhaseId::Deployment] {
        assert_eq!(ctx.status(id), PhaseStatus::Completed, "{id}");
    }
    for id in [PhaseId::Generation, PhaseId::ConfigurationMerge, PhaseId::Validation] {
        assert_eq!(ctx.status(id), PhaseStatus::Skipped, "{id}");
    }

    let batches = h.fakes.deployer.received();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].name, SIMPLIFIED_CONFIG_NAME);

    let recovery = ctx.recoveries.last().unwrap();
    assert_eq!(recovery.strategy, Strategy::RollbackAndRetry);
    Ok(())
}

#[tokio::test]
async fn rejected_validation_degrades_gracefully() -> Result<()> {
    let h = Harness::new();
    h.fakes.validator.push_ok(ValidationReport {
        passed: false,
        score: 0.2,
        findings: vec!["tester agent has no tools".to_string()],
    });

    let mut ctx = h.start();
    for phase in [
        PhaseId::Requirements,
        PhaseId::Analysis,
        PhaseId::TemplateSelection,
        PhaseId::Generation,
    ] {
        h.orchestrator.run_phase(&mut ctx, phase).await.unwrap();
    }
    let generated = ctx.phase(PhaseId::Generation).artifacts.clone();
    let bodies: Vec<String> = generated
        .iter()
        .map(|a| std::fs::read_to_string(&a.path))
        .collect::<std::io::Result<_>>()?;

    let status = h.orchestrator.drive(&mut ctx).await;

    assert_eq!(status, TerminalStatus::CompletedDegraded);
    assert_eq!(ctx.status(PhaseId::Validation), PhaseStatus::Failed);
    assert_eq!(ctx.phase(PhaseId::Generation).artifacts, generated);
    for (artifact, body) in generated.iter().zip(&bodies) {
        assert_eq!(&std::fs::read_to_string(&artifact.path)?, body);
    }

    let store = Harness::store(&ctx);
    let recovery = store.read_recovery_state()?.unwrap();
    assert_eq!(recovery.strategy, Strategy::GracefulDegradation);
    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(store.recovery_path())?)?;
    assert_eq!(raw["strategy"], "graceful_degradation");
    assert!(std::fs::read_to_string(store.recovery_instructions_path())?.contains("graceful_degradation"));
    Ok(())
}

#[tokio::test]
async fn two_failed_phases_trigger_partial_recovery() -> Result<()> {
    let h = Harness::new();
    let mut ctx = h.start();
    h.orchestrator.run_phase(&mut ctx, PhaseId::Requirements).await.unwrap();

    let now = ctx.created_at;
    ctx.transition(PhaseId::Analysis, PhaseStatus::Running, now)?;
    ctx.transition(PhaseId::Analysis, PhaseStatus::Failed, now)?;
    ctx.transition(PhaseId::Deployment, PhaseStatus::Running, now)?;
    let failure = PhaseFailure::new(
        PhaseId::Deployment,
        ErrorCategory::Deployment,
        "deployer rejected the bundle",
        1,
        now,
    );

    let classification = h.orchestrator.classifier().classify_with_rule(&failure, &ctx);
    assert_eq!(classification.strategy, Strategy::PartialRecovery);

    let outcome = h.orchestrator.recover(&mut ctx, &failure).await;

    assert_eq!(outcome, RecoveryOutcome::Terminal(TerminalStatus::CompletedDegraded));
    assert_eq!(ctx.status(PhaseId::Analysis), PhaseStatus::Skipped);
    assert_eq!(ctx.status(PhaseId::Deployment), PhaseStatus::Skipped);
    assert_eq!(ctx.mode, ExecutionMode::Degraded);
    assert!(ctx.phases().iter().all(|r| r.status().is_terminal()));
    assert_eq!(h.fakes.deployer.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn unusable_request_ends_minimal() -> Result<()> {
    let h = Harness::new();

    let ctx = h.orchestrator.run(h.request("   ")).await;

    assert_eq!(ctx.terminal_status(), Some(TerminalStatus::CompletedMinimal));
    assert_eq!(ctx.status(PhaseId::Requirements), PhaseStatus::Failed);
    for id in PhaseId::ALL.into_iter().skip(1) {
        assert_eq!(ctx.status(id), PhaseStatus::Skipped, "{id}");
    }

    assert_eq!(ctx.outputs.fallback.len(), 2);
    let generic: Vec<_> = ctx
        .outputs
        .fallback
        .iter()
        .filter(|a| a.name == FALLBACK_ARTIFACT_NAME)
        .collect();
    assert_eq!(generic.len(), 1);
    assert!(ctx.run_dir.join(MINIMAL_DIR).join(MINIMAL_CONFIG_FILE).is_file());
    assert_eq!(h.fakes.analyzer.calls(), 0);

    let recovery = ctx.recoveries.last().unwrap();
    assert_eq!(recovery.strategy, Strategy::MinimalRecovery);
    assert!(!recovery.next_steps.is_empty());
    Ok(())
}
