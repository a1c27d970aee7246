use pipeforge_phase_api::{
    ArtifactContent, PhaseFailure, PhaseId, PhaseStatus, Strategy, TerminalStatus, WorkflowContext,
};
use pipeforge_snapshot::SnapshotStore;
use pipeforge_utils::paths::DEGRADED_DIR;

use super::{Escalation, RecoveryOutcome, RecoveryStrategyExecutor};
use crate::synthesis::{generic_fallback_artifact, synthesize_from_analysis, synthesize_from_templates};

impl RecoveryStrategyExecutor {
    /// Close the run with whatever is usable plus reduced-scope output.
    ///
    /// Artifacts of completed phases are kept as they are. New output is
    /// synthesized from the analysis if there is one, else from the template
    /// list, else a single generic artifact.
    pub(super) fn graceful_degradation(
        &self,
        ctx: &mut WorkflowContext,
        failure: &PhaseFailure,
        escalation: Option<Escalation>,
    ) -> RecoveryOutcome {
        self.log_failure(ctx, failure);
        let (escalated_from, mut actions) = Escalation::split(escalation);
        let phase = failure.phase;

        if ctx.status(phase) == PhaseStatus::Running {
            let now = self.clock.now();
            if ctx.transition(phase, PhaseStatus::Failed, now).is_ok() {
                actions.push(format!("marked {phase} FAILED"));
            }
        }

        let pending = ctx.phases_with(PhaseStatus::Pending);
        for id in &pending {
            self.skip(ctx, *id);
        }
        if !pending.is_empty() {
            let names: Vec<&str> = pending.iter().map(PhaseId::as_str).collect();
            actions.push(format!("skipped pending phases: {}", names.join(", ")));
        }

        match ctx.last_completed_phase() {
            Some(last) => {
                let kept: Vec<String> = ctx
                    .phase(last)
                    .artifacts
                    .iter()
                    .map(|a| a.path.to_string())
                    .collect();
                actions.push(format!(
                    "kept {} artifact(s) from {last}: {}",
                    kept.len(),
                    kept.join(", ")
                ));
            }
            None => actions.push("no completed phase to salvage".to_string()),
        }

        let (origin, synthesized): (&str, Vec<ArtifactContent>) = if let Some(analysis) = &ctx.outputs.analysis {
            ("project analysis", synthesize_from_analysis(analysis))
        } else if let Some(templates) = &ctx.outputs.templates {
            ("template selection", synthesize_from_templates(templates))
        } else {
            ("nothing", vec![generic_fallback_artifact(ctx)])
        };

        let store = SnapshotStore::for_context(ctx);
        let dir = ctx.run_dir.join(DEGRADED_DIR);
        for artifact in &synthesized {
            match store.write_artifact(&dir, artifact) {
                Ok(reference) => actions.push(format!("wrote degraded artifact {}", reference.path)),
                Err(e) => {
                    tracing::warn!(workflow_id = %ctx.workflow_id, error = %e, "Failed to write degraded artifact");
                    actions.push(format!("kept degraded artifact {} in memory only: {e}", artifact.name));
                }
            }
        }
        actions.push(format!(
            "synthesized {} reduced-scope artifact(s) from {origin}",
            synthesized.len()
        ));
        ctx.outputs.degraded.extend(synthesized);

        let status = ctx.finalize(TerminalStatus::CompletedDegraded, self.clock.now());
        let next_steps = vec![
            format!("Review the degraded artifacts under {dir}"),
            format!("Fix the {phase} failure recorded in the error log and re-run for full output"),
        ];
        let state = self.state(
            Strategy::GracefulDegradation,
            escalated_from,
            failure,
            actions,
            Some(status),
            next_steps,
        );
        self.finish(ctx, state);
        RecoveryOutcome::Terminal(status)
    }
}
