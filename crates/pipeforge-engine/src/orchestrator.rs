//! Orchestrator: the top-level run loop.
//!
//! A run creates a [`WorkflowContext`], drives every non-terminal phase in
//! order and hands each failure to the classifier and the recovery
//! executor. [`Orchestrator::run`] never returns an error: whatever happens
//! the caller gets back a finalized context.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::Instrument;

use pipeforge_config::Config;
use pipeforge_phase_api::{Collaborators, PhaseFailure, PhaseId, TerminalStatus, WorkflowContext};
use pipeforge_snapshot::SnapshotStore;
use pipeforge_utils::clock::{Clock, SystemClock};
use pipeforge_utils::logging::workflow_span;
use pipeforge_utils::paths;

use crate::classifier::ErrorClassifier;
use crate::recovery::{RecoveryOutcome, RecoveryStrategyExecutor};
use crate::state_machine::PhaseStateMachine;

/// Input for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRequest {
    pub project_path: Utf8PathBuf,
    pub request: String,
    /// Derived from the project, request and start time when absent.
    pub workflow_id: Option<String>,
}

impl WorkflowRequest {
    #[must_use]
    pub fn new(project_path: impl Into<Utf8PathBuf>, request: impl Into<String>) -> Self {
        Self {
            project_path: project_path.into(),
            request: request.into(),
            workflow_id: None,
        }
    }

    #[must_use]
    pub fn with_workflow_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_id = Some(id.into());
        self
    }
}

/// `wf-` followed by 12 hex characters of a blake3 digest.
#[must_use]
pub fn derive_workflow_id(project_path: &Utf8Path, request: &str, started_at: DateTime<Utc>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(project_path.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(request.as_bytes());
    hasher.update(b"\0");
    hasher.update(started_at.to_rfc3339().as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("wf-{}", &hex.as_str()[..12])
}

pub struct Orchestrator {
    config: Config,
    clock: Arc<dyn Clock>,
    machine: Arc<PhaseStateMachine>,
    classifier: ErrorClassifier,
    executor: RecoveryStrategyExecutor,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("machine", &self.machine)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator on the wall clock.
    #[must_use]
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        Self::with_clock(config, collaborators, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(config: Config, collaborators: Collaborators, clock: Arc<dyn Clock>) -> Self {
        let machine = Arc::new(PhaseStateMachine::new(&config, collaborators, Arc::clone(&clock)));
        let executor = RecoveryStrategyExecutor::new(&config, Arc::clone(&machine), Arc::clone(&clock));
        let classifier = ErrorClassifier::new(&config.classifier);
        Self {
            config,
            clock,
            machine,
            classifier,
            executor,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    #[must_use]
    pub fn executor(&self) -> &RecoveryStrategyExecutor {
        &self.executor
    }

    /// Fresh context for `request`, with its own run directory.
    ///
    /// A relative state root is resolved against the project path.
    #[must_use]
    pub fn start(&self, request: &WorkflowRequest) -> WorkflowContext {
        let started_at = self.clock.now();
        let workflow_id = request
            .workflow_id
            .clone()
            .unwrap_or_else(|| derive_workflow_id(&request.project_path, &request.request, started_at));

        let state_root = &self.config.orchestrator.state_root;
        let state_root = if state_root.is_absolute() {
            state_root.clone()
        } else {
            request.project_path.join(state_root)
        };
        let run_dir = paths::run_dir(&state_root, &workflow_id, started_at);

        WorkflowContext::new(
            workflow_id,
            request.project_path.clone(),
            request.request.clone(),
            run_dir,
            started_at,
        )
    }

    /// Run the whole pipeline. Always returns a finalized context.
    pub async fn run(&self, request: WorkflowRequest) -> WorkflowContext {
        let mut ctx = self.start(&request);
        self.drive(&mut ctx).await;
        ctx
    }

    /// Drive `ctx` until it is finalized and return its terminal status.
    ///
    /// Phases that are already terminal are not re-run, so a context read
    /// back from a snapshot picks up where it stopped.
    pub async fn drive(&self, ctx: &mut WorkflowContext) -> TerminalStatus {
        let span = workflow_span(&ctx.workflow_id);
        let status = async {
            tracing::info!(
                workflow_id = %ctx.workflow_id,
                run_dir = %ctx.run_dir,
                "Starting workflow"
            );
            loop {
                if let Some(status) = ctx.terminal_status() {
                    break status;
                }
                let Some(phase) = ctx.next_open_phase() else {
                    break ctx.finalize(TerminalStatus::Completed, self.clock.now());
                };
                if let Err(failure) = self.machine.run_phase(ctx, phase).await
                    && let RecoveryOutcome::Terminal(status) = self.recover(ctx, &failure).await
                {
                    break status;
                }
            }
        }
        .instrument(span)
        .await;

        if let Err(e) = SnapshotStore::for_context(ctx).write_snapshot(ctx) {
            tracing::warn!(workflow_id = %ctx.workflow_id, error = %e, "Failed to write final snapshot");
        }
        tracing::info!(workflow_id = %ctx.workflow_id, status = %status, "Workflow finished");
        status
    }

    /// Run one phase without recovery.
    ///
    /// # Errors
    /// Returns the phase's failure unchanged.
    pub async fn run_phase(&self, ctx: &mut WorkflowContext, phase: PhaseId) -> Result<(), PhaseFailure> {
        self.machine.run_phase(ctx, phase).await
    }

    /// Log `failure`, classify it and execute the chosen strategy.
    ///
    /// The ErrorRecord is written before any recovery step touches the
    /// context. A finalized context is returned unchanged.
    ///
    /// [`run`](Self::run) stops at the first failure, so it never has more
    /// than one failed phase. The multi-failure rule (`partial_recovery`)
    /// therefore only fires for contexts loaded from a snapshot or built by
    /// the caller and passed in here.
    pub async fn recover(&self, ctx: &mut WorkflowContext, failure: &PhaseFailure) -> RecoveryOutcome {
        if let Some(status) = ctx.terminal_status() {
            return RecoveryOutcome::Terminal(status);
        }
        self.executor.log_failure(ctx, failure);

        let classification = self.classifier.classify_with_rule(failure, ctx);
        tracing::info!(
            workflow_id = %ctx.workflow_id,
            phase = %failure.phase,
            category = %failure.category,
            rule = classification.rule,
            strategy = %classification.strategy,
            "Failure classified"
        );
        self.executor.execute(ctx, failure, classification.strategy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeforge_phase_api::{PhaseStatus, Strategy};
    use pipeforge_utils::clock::ManualClock;
    use pipeforge_utils::error::CollaboratorError;
    use pipeforge_utils::test_support::utf8_temp_dir;
    use std::time::Duration;

    use crate::testing::Fakes;

    fn orchestrator(fakes: &Fakes, clock: Arc<ManualClock>, state_root: &Utf8Path) -> Orchestrator {
        let mut config = Config::default();
        config.orchestrator.state_root = state_root.to_path_buf();
        Orchestrator::with_clock(config, fakes.collaborators(), clock)
    }

    #[test]
    fn test_workflow_id_is_stable_and_short() {
        let at = ManualClock::at_epoch().now();
        let a = derive_workflow_id(Utf8Path::new("/p"), "agents", at);
        let b = derive_workflow_id(Utf8Path::new("/p"), "agents", at);
        let c = derive_workflow_id(Utf8Path::new("/p"), "other", at);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), "wf-".len() + 12);
        assert!(a.starts_with("wf-"));
    }

    #[test]
    fn test_relative_state_root_is_under_project() {
        let (_temp, root) = utf8_temp_dir();
        let fakes = Fakes::new();
        let orch = Orchestrator::with_clock(
            Config::default(),
            fakes.collaborators(),
            Arc::new(ManualClock::at_epoch()),
        );
        let ctx = orch.start(&WorkflowRequest::new(root.clone(), "agents").with_workflow_id("wf-fixed"));
        assert_eq!(ctx.workflow_id, "wf-fixed");
        assert!(ctx.run_dir.starts_with(root.join(".pipeforge/runs")));
        assert!(ctx.run_dir.file_name().unwrap().starts_with("wf-fixed-"));
    }

    #[tokio::test]
    async fn test_clean_run_completes() {
        let (_temp, root) = utf8_temp_dir();
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes, Arc::new(ManualClock::at_epoch()), &root);

        let ctx = orch.run(WorkflowRequest::new(root.join("project"), "agents for a service")).await;

        assert_eq!(ctx.terminal_status(), Some(TerminalStatus::Completed));
        assert!(ctx.phases().iter().all(|r| r.status() == PhaseStatus::Completed));
        assert!(ctx.recoveries.is_empty());
        let persisted = SnapshotStore::for_context(&ctx).read_snapshot().unwrap().unwrap();
        assert_eq!(persisted, ctx);
    }

    #[tokio::test]
    async fn test_transient_failure_resumes_run() {
        let (_temp, root) = utf8_temp_dir();
        let fakes = Fakes::new();
        fakes.analyzer.push_err(CollaboratorError::transient("timed out talking to index"));
        let clock = Arc::new(ManualClock::at_epoch());
        let orch = orchestrator(&fakes, clock.clone(), &root);

        let ctx = orch.run(WorkflowRequest::new(root.join("project"), "agents")).await;

        assert_eq!(ctx.terminal_status(), Some(TerminalStatus::Completed));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
        assert_eq!(ctx.recoveries.len(), 1);
        assert_eq!(ctx.recoveries[0].strategy, Strategy::RetryPhase);
    }

    #[tokio::test]
    async fn test_error_record_precedes_recovery() {
        let (_temp, root) = utf8_temp_dir();
        let fakes = Fakes::new();
        fakes.validator.push_err(CollaboratorError::unknown("validator offline"));
        let orch = orchestrator(&fakes, Arc::new(ManualClock::at_epoch()), &root);

        let ctx = orch.run(WorkflowRequest::new(root.join("project"), "agents")).await;

        let errors = SnapshotStore::for_context(&ctx).list_errors().unwrap();
        assert_eq!(errors.len(), 1);
        let snapshot: WorkflowContext = serde_json::from_value(errors[0].context_snapshot.clone()).unwrap();
        assert!(!snapshot.is_finalized());
        assert!(snapshot.recoveries.is_empty());
        assert_eq!(ctx.terminal_status(), Some(TerminalStatus::CompletedDegraded));
    }

    #[tokio::test]
    async fn test_recover_on_finished_context_is_noop() {
        let (_temp, root) = utf8_temp_dir();
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes, Arc::new(ManualClock::at_epoch()), &root);
        let mut ctx = orch.run(WorkflowRequest::new(root.join("project"), "agents")).await;
        let before = ctx.clone();
        let failure = pipeforge_phase_api::PhaseFailure::new(
            PhaseId::Validation,
            pipeforge_utils::error::ErrorCategory::Unknown,
            "late",
            1,
            ctx.created_at,
        );

        let outcome = orch.recover(&mut ctx, &failure).await;

        assert_eq!(outcome, RecoveryOutcome::Terminal(TerminalStatus::Completed));
        assert_eq!(ctx, before);
    }

    #[tokio::test]
    async fn test_drive_resumes_persisted_context() {
        let (_temp, root) = utf8_temp_dir();
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes, Arc::new(ManualClock::at_epoch()), &root);
        let mut ctx = orch.start(&WorkflowRequest::new(root.join("project"), "agents"));
        orch.run_phase(&mut ctx, PhaseId::Requirements).await.unwrap();
        orch.run_phase(&mut ctx, PhaseId::Analysis).await.unwrap();

        let mut restored = SnapshotStore::for_context(&ctx).read_snapshot().unwrap().unwrap();
        let status = orch.drive(&mut restored).await;

        assert_eq!(status, TerminalStatus::Completed);
        assert_eq!(fakes.analyzer.calls(), 1);
    }
}
