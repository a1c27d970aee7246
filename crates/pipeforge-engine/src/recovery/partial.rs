use std::collections::BTreeSet;

use pipeforge_phase_api::{
    ExecutionMode, PhaseFailure, PhaseId, Strategy, TerminalStatus, WorkflowContext,
};

use super::{Escalation, RecoveryOutcome, RecoveryStrategyExecutor};

impl RecoveryStrategyExecutor {
    /// Skip every failed phase and run the rest in degraded mode.
    ///
    /// A phase that fails during the degraded pass is logged and skipped.
    /// If nothing at all was produced, minimal recovery takes over.
    pub(super) async fn partial_recovery(
        &self,
        ctx: &mut WorkflowContext,
        failure: &PhaseFailure,
    ) -> RecoveryOutcome {
        self.log_failure(ctx, failure);
        let mut actions = Vec::new();

        let mut failed: BTreeSet<PhaseId> = ctx.failed_phases().into_iter().collect();
        failed.insert(failure.phase);
        for id in &failed {
            if self.skip(ctx, *id) {
                actions.push(format!("marked {id} SKIPPED"));
            }
        }

        ctx.mode = ExecutionMode::Degraded;
        actions.push("switched to degraded mode".to_string());

        for id in PhaseId::ALL {
            if ctx.status(id).is_terminal() {
                continue;
            }
            match self.machine.run_phase(ctx, id).await {
                Ok(()) => actions.push(format!("ran {id} in degraded mode")),
                Err(next) => {
                    self.log_failure(ctx, &next);
                    self.skip(ctx, id);
                    actions.push(format!("{id} failed in degraded mode and was skipped: {}", next.message));
                }
            }
        }

        if !ctx.has_artifacts() {
            actions.push("no artifacts produced; escalating to minimal_recovery".to_string());
            return self.minimal_recovery(
                ctx,
                failure,
                Some(Escalation::new(Strategy::PartialRecovery, actions)),
            );
        }

        let status = ctx.finalize(TerminalStatus::CompletedDegraded, self.clock.now());
        let skipped: Vec<&str> = failed.iter().map(PhaseId::as_str).collect();
        let next_steps = vec![
            format!("Phases {} were skipped; their errors are in the error log", skipped.join(", ")),
            "Output was produced with default inputs; re-run after fixing the failures".to_string(),
        ];
        let state = self.state(
            Strategy::PartialRecovery,
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
