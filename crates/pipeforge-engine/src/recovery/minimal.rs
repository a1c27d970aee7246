use pipeforge_phase_api::{ArtifactContent, PhaseFailure, Strategy, TerminalStatus, WorkflowContext};
use pipeforge_snapshot::SnapshotStore;
use pipeforge_utils::paths::{MINIMAL_CONFIG_FILE, MINIMAL_DIR};

use super::{Escalation, RecoveryOutcome, RecoveryStrategyExecutor};
use crate::synthesis::{generic_fallback_artifact, minimal_config};

/// Logical name of the emergency configuration in `outputs.fallback`.
pub const MINIMAL_CONFIG_NAME: &str = "minimal-config";

impl RecoveryStrategyExecutor {
    /// Emit the generic artifact and the emergency configuration.
    ///
    /// Neither depends on partial state. Write failures are logged and the
    /// artifacts stay in memory, so this always ends `CompletedMinimal`.
    pub(super) fn minimal_recovery(
        &self,
        ctx: &mut WorkflowContext,
        failure: &PhaseFailure,
        escalation: Option<Escalation>,
    ) -> RecoveryOutcome {
        self.log_failure(ctx, failure);
        let (escalated_from, mut actions) = Escalation::split(escalation);

        let artifact = generic_fallback_artifact(ctx);
        let config = minimal_config(ctx);
        let store = SnapshotStore::for_context(ctx);

        match store.write_artifact(&ctx.run_dir.join(MINIMAL_DIR), &artifact) {
            Ok(reference) => actions.push(format!("wrote generic artifact {}", reference.path)),
            Err(e) => {
                tracing::warn!(workflow_id = %ctx.workflow_id, error = %e, "Failed to write generic artifact");
                actions.push(format!("generic artifact kept in memory only: {e}"));
            }
        }
        match store.write_minimal_config(&config) {
            Ok(path) => actions.push(format!("wrote minimal configuration {path}")),
            Err(e) => {
                tracing::warn!(workflow_id = %ctx.workflow_id, error = %e, "Failed to write minimal configuration");
                actions.push(format!("minimal configuration kept in memory only: {e}"));
            }
        }

        let config_body = serde_json::to_string_pretty(&config).unwrap_or_else(|_| config.to_string());
        ctx.outputs.fallback.push(artifact);
        ctx.outputs
            .fallback
            .push(ArtifactContent::new(MINIMAL_CONFIG_NAME, MINIMAL_CONFIG_FILE, config_body));

        let status = ctx.finalize(TerminalStatus::CompletedMinimal, self.clock.now());
        let next_steps = vec![
            format!("Use {} as a starting point", store.minimal_config_path()),
            format!(
                "Resolve the {} failure ({}) and re-run to generate tailored artifacts",
                failure.phase, failure.category
            ),
        ];
        let state = self.state(
            Strategy::MinimalRecovery,
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
