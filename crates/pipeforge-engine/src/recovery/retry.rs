use pipeforge_phase_api::{PhaseFailure, PhaseStatus, Strategy, WorkflowContext};

use super::{Escalation, RecoveryOutcome, RecoveryStrategyExecutor};

impl RecoveryStrategyExecutor {
    /// Re-run the failed phase with exponential backoff.
    ///
    /// Each retry waits on the injected clock, clears the phase's working
    /// area and re-enters the still-`Running` phase. The first success
    /// resumes the pipeline. When the retries run out the last failure is
    /// handed to graceful degradation.
    pub(super) async fn retry_phase(
        &self,
        ctx: &mut WorkflowContext,
        failure: &PhaseFailure,
    ) -> RecoveryOutcome {
        self.log_failure(ctx, failure);
        let phase = failure.phase;
        let mut actions = Vec::new();
        let mut last = failure.clone();

        for k in 1..=self.retry.max_retries {
            if ctx.status(phase) != PhaseStatus::Running {
                actions.push(format!("{phase} is {}, nothing to retry", ctx.status(phase)));
                break;
            }

            let delay = self.retry.delay_for(k);
            self.clock.sleep(delay).await;
            actions.push(format!("waited {} ms before retry {k}", delay.as_millis()));
            actions.push(self.reset_work_area(ctx, phase));

            let now = self.clock.now();
            if let Err(e) = ctx.begin_retry_attempt(phase, now) {
                actions.push(format!("could not start retry {k}: {e}"));
                break;
            }

            match self.machine.run_phase(ctx, phase).await {
                Ok(()) => {
                    actions.push(format!("retry {k} of {phase} succeeded"));
                    let state = self.state(
                        Strategy::RetryPhase,
                        None,
                        failure,
                        actions,
                        None,
                        vec![format!("No action needed; the run continued after {phase}")],
                    );
                    self.finish(ctx, state);
                    return RecoveryOutcome::Resume;
                }
                Err(next) => {
                    tracing::warn!(
                        workflow_id = %ctx.workflow_id,
                        phase = %phase,
                        retry = k,
                        error = %next.message,
                        "Retry failed"
                    );
                    self.log_failure(ctx, &next);
                    actions.push(format!("retry {k} failed: {}", next.message));
                    last = next;
                }
            }
        }

        actions.push(format!(
            "{} retries exhausted; escalating to graceful_degradation",
            self.retry.max_retries
        ));
        self.graceful_degradation(ctx, &last, Some(Escalation::new(Strategy::RetryPhase, actions)))
    }
}
