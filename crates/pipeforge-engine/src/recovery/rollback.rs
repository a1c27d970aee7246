use pipeforge_phase_api::{
    ExecutionMode, PhaseFailure, PhaseId, PhaseStatus, Strategy, TerminalStatus, WorkflowContext,
};
use pipeforge_snapshot::SnapshotStore;

use super::{Escalation, RecoveryOutcome, RecoveryStrategyExecutor};

/// Phases rerun by `rollback_and_retry`. Everything else not yet completed
/// is skipped.
pub const ROLLBACK_PHASES: [PhaseId; 3] = [PhaseId::Requirements, PhaseId::Analysis, PhaseId::Deployment];

impl RecoveryStrategyExecutor {
    /// Back up the context, wipe unfinished working areas and rerun the
    /// essential subset in simplified mode.
    pub(super) async fn rollback_and_retry(
        &self,
        ctx: &mut WorkflowContext,
        failure: &PhaseFailure,
    ) -> RecoveryOutcome {
        self.log_failure(ctx, failure);
        let mut actions = Vec::new();

        let store = SnapshotStore::for_context(ctx);
        let reason = format!("rollback after {} failure {}", failure.phase, failure.id);
        match store.write_backup(ctx, &reason, self.clock.now()) {
            Ok(backup) => actions.push(format!("backed up context to {} ({})", backup.path, backup.digest)),
            Err(e) => {
                tracing::error!(workflow_id = %ctx.workflow_id, error = %e, "Backup failed, escalating to minimal recovery");
                actions.push(format!("backup failed: {e}"));
                return self.minimal_recovery(
                    ctx,
                    failure,
                    Some(Escalation::new(Strategy::RollbackAndRetry, actions)),
                );
            }
        }

        for id in PhaseId::ALL {
            if ctx.status(id) != PhaseStatus::Completed {
                actions.push(self.reset_work_area(ctx, id));
            }
        }

        for id in PhaseId::ALL {
            if !ROLLBACK_PHASES.contains(&id) && ctx.status(id) != PhaseStatus::Completed && self.skip(ctx, id) {
                actions.push(format!("skipped {id}"));
            }
        }

        ctx.mode = ExecutionMode::Simplified;
        actions.push("switched to simplified mode".to_string());

        for id in ROLLBACK_PHASES {
            match ctx.status(id) {
                PhaseStatus::Running => {
                    let now = self.clock.now();
                    if let Err(e) = ctx.begin_retry_attempt(id, now) {
                        actions.push(format!("could not restart {id}: {e}"));
                        continue;
                    }
                }
                PhaseStatus::Pending => {}
                _ => continue,
            }

            match self.machine.run_phase(ctx, id).await {
                Ok(()) => actions.push(format!("reran {id} in simplified mode")),
                Err(next) => {
                    self.log_failure(ctx, &next);
                    self.skip(ctx, id);
                    actions.push(format!("{id} failed again and was skipped: {}", next.message));
                }
            }
        }

        if !ctx.has_artifacts() {
            actions.push("no artifacts after rollback; escalating to minimal_recovery".to_string());
            return self.minimal_recovery(
                ctx,
                failure,
                Some(Escalation::new(Strategy::RollbackAndRetry, actions)),
            );
        }

        let status = ctx.finalize(TerminalStatus::CompletedDegraded, self.clock.now());
        let next_steps = vec![
            format!("Fix the file-system problem behind {}: {}", failure.phase, failure.message),
            format!("The pre-rollback state is in {}", store.backups_dir()),
            "Re-run the full pipeline once the problem is fixed".to_string(),
        ];
        let state = self.state(
            Strategy::RollbackAndRetry,
            None,
            failure,
            actions,
            Some(status),
            next_steps,
        );
        self.finish(ctx, state);
        RecoveryOutcome::Terminal(status)
    }
}
