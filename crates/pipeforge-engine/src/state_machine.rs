//! PhaseStateMachine: runs one phase's work unit against a context.
//!
//! A work unit only reads the context. It returns a `PhaseOutcome` which
//! the machine applies afterwards, so the whole unit can run under
//! `tokio::time::timeout` without holding a mutable borrow. A failing phase
//! stays `Running`; the recovery strategy that handles the failure decides
//! its terminal status.

use camino::Utf8PathBuf;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pipeforge_config::Config;
use pipeforge_phase_api::{
    ArtifactContent, ArtifactRef, Collaborators, DeployedPaths, ExecutionMode, PhaseFailure,
    PhaseId, PhaseStatus, ProjectAnalysis, RankedTemplateList, ValidationReport, WorkflowContext,
};
use pipeforge_snapshot::SnapshotStore;
use pipeforge_utils::atomic_write::write_file_atomic;
use pipeforge_utils::clock::Clock;
use pipeforge_utils::error::{CollaboratorError, ErrorCategory, PhaseError, PipelineError};
use pipeforge_utils::logging::{log_phase_complete, log_phase_error, log_phase_start, phase_span};
use pipeforge_utils::paths::{ensure_dir_all, phase_work_dir, sanitize_component, task_work_dir};
use tracing::Instrument;

use crate::parallel::{Aggregate, ParallelTaskCoordinator, TaskError};
use crate::synthesis::{simplified_config_artifact, substitute_artifacts};

/// File each phase records its output in, inside its working area.
#[must_use]
pub const fn output_file(phase: PhaseId) -> &'static str {
    match phase {
        PhaseId::Requirements => "requirements.json",
        PhaseId::Analysis => "analysis.json",
        PhaseId::TemplateSelection => "templates.json",
        PhaseId::Generation => "generation.json",
        PhaseId::ConfigurationMerge => "configuration.json",
        PhaseId::Deployment => "deployment.json",
        PhaseId::Validation => "validation.json",
    }
}

/// Data a phase hands to its successors.
#[derive(Debug, Clone)]
enum OutputUpdate {
    Requirements(String),
    Analysis(ProjectAnalysis),
    Templates(RankedTemplateList),
    Generated(Vec<ArtifactContent>),
    MergedConfig(serde_json::Value),
    Deployed(DeployedPaths),
    Validation(ValidationReport),
}

/// What a successful work unit produced.
#[derive(Debug, Clone)]
struct PhaseOutcome {
    update: OutputUpdate,
    artifacts: Vec<ArtifactRef>,
    warnings: Vec<String>,
    /// Reduced-scope artifacts shipped in place of generated ones.
    degraded: Vec<ArtifactContent>,
}

impl PhaseOutcome {
    fn new(update: OutputUpdate) -> Self {
        Self {
            update,
            artifacts: Vec::new(),
            warnings: Vec::new(),
            degraded: Vec::new(),
        }
    }

    fn with_artifacts(mut self, artifacts: Vec<ArtifactRef>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

pub struct PhaseStateMachine {
    collaborators: Collaborators,
    coordinator: ParallelTaskCoordinator,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl std::fmt::Debug for PhaseStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseStateMachine")
            .field("coordinator", &self.coordinator)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PhaseStateMachine {
    #[must_use]
    pub fn new(config: &Config, collaborators: Collaborators, clock: Arc<dyn Clock>) -> Self {
        Self {
            collaborators,
            coordinator: ParallelTaskCoordinator::new(&config.parallel),
            clock,
            timeout: config.phase_timeout(),
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> &ParallelTaskCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run `phase` against `ctx`.
    ///
    /// Terminal phases are left alone. A `Pending` phase is moved to
    /// `Running` first, so every failure leaves the phase `Running`,
    /// including an unsatisfied predecessor.
    ///
    /// # Errors
    /// Returns the [`PhaseFailure`] raised by the work unit, by sequencing,
    /// or by the timeout.
    pub async fn run_phase(
        &self,
        ctx: &mut WorkflowContext,
        phase: PhaseId,
    ) -> Result<(), PhaseFailure> {
        let status = ctx.status(phase);
        if status.is_terminal() {
            tracing::debug!(phase = %phase, status = %status, "Phase already terminal, not re-running");
            return Ok(());
        }
        if status == PhaseStatus::Pending {
            let now = self.clock.now();
            ctx.transition(phase, PhaseStatus::Running, now)
                .map_err(|e| self.fail(ctx, phase, &PipelineError::from(e)))?;
        }

        let attempt = ctx.phase(phase).attempts;
        let span = phase_span(&ctx.workflow_id, phase.as_str(), attempt);

        if let Some((dependency, dep_status)) = ctx.unsatisfied_predecessor(phase) {
            let err = PhaseError::DependencyNotSatisfied {
                phase: phase.as_str().to_string(),
                dependency: dependency.as_str().to_string(),
                status: dep_status.as_str().to_string(),
            };
            return Err(self.fail(ctx, phase, &PipelineError::from(err)));
        }

        log_phase_start(&ctx.workflow_id, phase.as_str(), ctx.mode.as_str());
        let started = Instant::now();

        let result = {
            let shared: &WorkflowContext = ctx;
            self.execute_with_timeout(shared, phase).instrument(span).await
        };

        match result {
            Ok(outcome) => {
                self.apply(ctx, phase, outcome);
                let now = self.clock.now();
                ctx.transition(phase, PhaseStatus::Completed, now)
                    .map_err(|e| self.fail(ctx, phase, &PipelineError::from(e)))?;
                log_phase_complete(&ctx.workflow_id, phase.as_str(), started.elapsed().as_millis());
                self.persist(ctx);
                Ok(())
            }
            Err(err) => Err(self.fail(ctx, phase, &err)),
        }
    }

    fn fail(&self, ctx: &WorkflowContext, phase: PhaseId, err: &PipelineError) -> PhaseFailure {
        let attempt = ctx.phase(phase).attempts.max(1);
        let failure = PhaseFailure::from_error(phase, err, attempt, self.clock.now());
        log_phase_error(
            &ctx.workflow_id,
            phase.as_str(),
            failure.category.as_str(),
            &failure.message,
        );
        failure
    }

    fn apply(&self, ctx: &mut WorkflowContext, phase: PhaseId, outcome: PhaseOutcome) {
        let outputs = &mut ctx.outputs;
        match outcome.update {
            OutputUpdate::Requirements(text) => outputs.requirements = Some(text),
            OutputUpdate::Analysis(analysis) => outputs.analysis = Some(analysis),
            OutputUpdate::Templates(list) => outputs.templates = Some(list),
            OutputUpdate::Generated(artifacts) => outputs.generated = artifacts,
            OutputUpdate::MergedConfig(value) => outputs.merged_config = Some(value),
            OutputUpdate::Deployed(paths) => outputs.deployed = Some(paths),
            OutputUpdate::Validation(report) => outputs.validation = Some(report),
        }
        outputs.degraded.extend(outcome.degraded);

        for warning in &outcome.warnings {
            tracing::warn!(workflow_id = %ctx.workflow_id, phase = %phase, "{warning}");
        }
        let result = ctx.phase_mut(phase);
        result.artifacts = outcome.artifacts;
        result.warnings.extend(outcome.warnings);
    }

    /// Best-effort snapshot after a phase.
    fn persist(&self, ctx: &WorkflowContext) {
        if let Err(e) = SnapshotStore::for_context(ctx).write_snapshot(ctx) {
            tracing::warn!(workflow_id = %ctx.workflow_id, error = %e, "Failed to write context snapshot");
        }
    }

    async fn execute_with_timeout(
        &self,
        ctx: &WorkflowContext,
        phase: PhaseId,
    ) -> Result<PhaseOutcome, PipelineError> {
        match tokio::time::timeout(self.timeout, self.execute(ctx, phase)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Phase(PhaseError::Timeout {
                phase: phase.as_str().to_string(),
                timeout_seconds: self.timeout.as_secs(),
            })),
        }
    }

    async fn execute(&self, ctx: &WorkflowContext, phase: PhaseId) -> Result<PhaseOutcome, PipelineError> {
        let work_dir = phase_work_dir(&ctx.run_dir, phase);
        ensure_dir_all(&work_dir).map_err(|e| PhaseError::WorkArea {
            phase: phase.as_str().to_string(),
            reason: e.to_string(),
        })?;
        let store = SnapshotStore::for_context(ctx);
        let record = work_dir.join(output_file(phase));

        match phase {
            PhaseId::Requirements => {
                let request = ctx.request.trim();
                if request.is_empty() {
                    return Err(PhaseError::InvalidRequest {
                        reason: "request is empty".to_string(),
                    }
                    .into());
                }
                let doc = json!({
                    "workflow_id": ctx.workflow_id,
                    "project_path": ctx.project_path,
                    "request": request,
                });
                store.write_json(&record, &doc, "requirements")?;
                Ok(PhaseOutcome::new(OutputUpdate::Requirements(request.to_string())))
            }
            PhaseId::Analysis => {
                let analysis = self.collaborators.analyzer.analyze(&ctx.project_path).await?;
                store.write_json(&record, &analysis, "project analysis")?;
                Ok(PhaseOutcome::new(OutputUpdate::Analysis(analysis)))
            }
            PhaseId::TemplateSelection => {
                let analysis = self.analysis_input(ctx, phase)?;
                let templates = self.collaborators.selector.select(&analysis).await?;
                store.write_json(&record, &templates, "template list")?;
                Ok(PhaseOutcome::new(OutputUpdate::Templates(templates)))
            }
            PhaseId::Generation => self.generate(ctx, &store, record).await,
            PhaseId::ConfigurationMerge => self.merge(ctx, &store, record),
            PhaseId::Deployment => self.deploy(ctx, &store, record).await,
            PhaseId::Validation => {
                let deployed = match (&ctx.outputs.deployed, ctx.mode) {
                    (Some(deployed), _) => deployed.clone(),
                    (None, ExecutionMode::Normal) => return Err(missing(phase, "deployed paths")),
                    (None, _) => DeployedPaths::default(),
                };
                let report = self.collaborators.validator.validate(&deployed).await?;
                store.write_json(&record, &report, "validation report")?;
                if !report.passed {
                    return Err(PhaseError::ValidationRejected { score: report.score }.into());
                }
                Ok(PhaseOutcome::new(OutputUpdate::Validation(report)))
            }
        }
    }

    fn required_tasks(&self) -> Vec<String> {
        self.coordinator.required_tasks()
    }

    fn analysis_input(&self, ctx: &WorkflowContext, phase: PhaseId) -> Result<ProjectAnalysis, PipelineError> {
        match (&ctx.outputs.analysis, ctx.mode) {
            (Some(analysis), _) => Ok(analysis.clone()),
            (None, ExecutionMode::Normal) => Err(missing(phase, "project analysis")),
            (None, _) => Ok(ProjectAnalysis::fallback(&self.required_tasks())),
        }
    }

    async fn generate(
        &self,
        ctx: &WorkflowContext,
        store: &SnapshotStore,
        record: Utf8PathBuf,
    ) -> Result<PhaseOutcome, PipelineError> {
        let phase = PhaseId::Generation;
        let analysis = self.analysis_input(ctx, phase)?;
        let templates = match (&ctx.outputs.templates, ctx.mode) {
            (Some(list), _) => list.clone(),
            (None, ExecutionMode::Normal) => return Err(missing(phase, "template list")),
            (None, _) => RankedTemplateList::from_names(self.required_tasks()),
        };

        let tasks: Vec<_> = templates
            .templates
            .iter()
            .enumerate()
            .map(|(index, template)| {
                let name = template.name.clone();
                let generator = Arc::clone(&self.collaborators.generator);
                let template = template.clone();
                let analysis = analysis.clone();
                let dir = task_work_dir(&ctx.run_dir, index, &template.name);
                let fut = async move {
                    let artifact = generator.generate(&template, &analysis).await?;
                    let path = dir.join(sanitize_component(&artifact.file_name));
                    write_file_atomic(&path, artifact.body.as_bytes()).map_err(|e| {
                        CollaboratorError::filesystem(format!("{e:#}"))
                            .with_detail(format!("task {}", template.name))
                    })?;
                    let reference = ArtifactRef::new(artifact.name.clone(), path);
                    Ok::<_, CollaboratorError>((artifact, reference))
                };
                (name, fut)
            })
            .collect();

        let outcomes = self.coordinator.run_all(tasks).await;

        let warning = match self.coordinator.aggregate(&outcomes) {
            Aggregate::Completed { warning } => warning,
            Aggregate::Failed(err) => {
                let failures: Vec<(&str, &TaskError)> = outcomes
                    .iter()
                    .filter_map(|o| o.result.as_ref().err().map(|e| (o.task.as_str(), e)))
                    .collect();
                return Err(generation_failure(&err, &failures).into());
            }
        };

        let task_report: Vec<serde_json::Value> = outcomes
            .iter()
            .map(|o| match &o.result {
                Ok((_, reference)) => json!({"task": o.task, "status": "succeeded", "path": reference.path}),
                Err(e) => json!({"task": o.task, "status": "failed", "error": e.to_string()}),
            })
            .collect();
        store.write_json(&record, &json!({ "tasks": task_report }), "generation report")?;

        let (generated, artifacts): (Vec<_>, Vec<_>) =
            outcomes.into_iter().filter_map(|o| o.result.ok()).unzip();
        let mut outcome = PhaseOutcome::new(OutputUpdate::Generated(generated)).with_artifacts(artifacts);
        outcome.warnings.extend(warning);
        Ok(outcome)
    }

    fn merge(
        &self,
        ctx: &WorkflowContext,
        store: &SnapshotStore,
        record: Utf8PathBuf,
    ) -> Result<PhaseOutcome, PipelineError> {
        let phase = PhaseId::ConfigurationMerge;
        let generation = ctx.phase(PhaseId::Generation);
        let mut agents: Vec<serde_json::Value> = generation
            .artifacts
            .iter()
            .map(|a| json!({"name": a.name, "path": a.path}))
            .collect();

        if agents.is_empty() {
            if ctx.mode == ExecutionMode::Normal {
                return Err(missing(phase, "generated artifacts"));
            }
            agents = substitute_artifacts(ctx, &self.required_tasks())
                .iter()
                .map(|a| json!({"name": a.name, "file": a.file_name, "synthesized": true}))
                .collect();
        }

        let config = json!({
            "workflow_id": ctx.workflow_id,
            "request": ctx.request,
            "mode": ctx.mode.as_str(),
            "agents": agents,
        });
        store.write_json(&record, &config, "merged configuration")?;
        Ok(PhaseOutcome::new(OutputUpdate::MergedConfig(config))
            .with_artifacts(vec![ArtifactRef::new("configuration", record)]))
    }

    async fn deploy(
        &self,
        ctx: &WorkflowContext,
        store: &SnapshotStore,
        record: Utf8PathBuf,
    ) -> Result<PhaseOutcome, PipelineError> {
        let phase = PhaseId::Deployment;
        let mut degraded = Vec::new();
        let artifacts = if ctx.mode == ExecutionMode::Simplified {
            let artifact = simplified_config_artifact(ctx, &self.required_tasks());
            degraded.push(artifact.clone());
            vec![artifact]
        } else if !ctx.outputs.generated.is_empty() {
            ctx.outputs.generated.clone()
        } else if ctx.mode == ExecutionMode::Degraded {
            let substitutes = substitute_artifacts(ctx, &self.required_tasks());
            degraded.extend(substitutes.iter().cloned());
            substitutes
        } else {
            return Err(missing(phase, "generated artifacts"));
        };

        let deployed = self.collaborators.deployer.deploy(&artifacts).await?;
        store.write_json(&record, &deployed, "deployed paths")?;

        let refs = deployed
            .paths
            .iter()
            .map(|path| ArtifactRef::new(path.file_name().unwrap_or(path.as_str()), path.clone()))
            .collect();
        let mut outcome = PhaseOutcome::new(OutputUpdate::Deployed(deployed)).with_artifacts(refs);
        outcome.degraded = degraded;
        Ok(outcome)
    }
}

fn missing(phase: PhaseId, input: &str) -> PipelineError {
    PhaseError::MissingInput {
        phase: phase.as_str().to_string(),
        input: input.to_string(),
    }
    .into()
}

/// Fold per-task errors into one failure for the phase.
///
/// The category is the one every failed task agrees on, else `Generation`.
/// Task messages are appended so marker matching still sees them.
fn generation_failure(err: &PhaseError, failures: &[(&str, &TaskError)]) -> CollaboratorError {
    let categories: Vec<ErrorCategory> = failures
        .iter()
        .map(|(_, e)| match e {
            TaskError::Failed(inner) => inner.category,
            TaskError::Panicked(_) => ErrorCategory::Generation,
        })
        .collect();
    let category = match categories.split_first() {
        Some((first, rest)) if rest.iter().all(|c| c == first) => *first,
        _ => ErrorCategory::Generation,
    };

    let details: Vec<String> = failures.iter().map(|(task, e)| format!("{task}: {e}")).collect();
    let mut error = CollaboratorError::new(category, format!("{err} [{}]", details.join("; ")));
    for detail in details {
        error = error.with_detail(detail);
    }
    error
}
