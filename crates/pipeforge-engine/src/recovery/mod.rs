//! RecoveryStrategyExecutor: the five recovery procedures.
//!
//! Every procedure follows the same frame:
//!
//! 1. write the ErrorRecord for the failure unless it was already written
//! 2. act on the context (retry, roll back, degrade, skip, or emit fallbacks)
//! 3. push a [`RecoveryState`], persist it with its `RECOVERY.md`, and
//!    snapshot the context
//!
//! Only `retry_phase` can hand the pipeline back to the run loop. Every other
//! path finalizes the context, and `minimal_recovery` cannot fail. A context
//! that is already finalized is left untouched.

mod graceful;
mod minimal;
mod partial;
mod retry;
mod rollback;

pub use minimal::MINIMAL_CONFIG_NAME;
pub use rollback::ROLLBACK_PHASES;

use std::sync::Arc;
use std::time::Duration;

use pipeforge_config::Config;
use pipeforge_phase_api::{
    ErrorRecord, PhaseFailure, PhaseId, PhaseStatus, RecoveryState, Strategy, TerminalStatus,
    WorkflowContext,
};
use pipeforge_snapshot::SnapshotStore;
use pipeforge_utils::atomic_write::remove_dir_if_exists;
use pipeforge_utils::clock::Clock;
use pipeforge_utils::logging::{log_recovery_complete, log_recovery_start};
use pipeforge_utils::paths::phase_work_dir;

use crate::state_machine::PhaseStateMachine;

/// What the run loop does after a recovery procedure returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The failed phase completed; continue with the next phase.
    Resume,
    /// The run is over.
    Terminal(TerminalStatus),
}

impl RecoveryOutcome {
    #[must_use]
    pub fn terminal_status(&self) -> Option<TerminalStatus> {
        match self {
            Self::Resume => None,
            Self::Terminal(status) => Some(*status),
        }
    }
}

/// Hand-over from a strategy that gave up.
#[derive(Debug, Clone)]
struct Escalation {
    from: Strategy,
    /// Actions the earlier strategy already took.
    actions: Vec<String>,
}

impl Escalation {
    fn new(from: Strategy, actions: Vec<String>) -> Self {
        Self { from, actions }
    }

    fn split(escalation: Option<Self>) -> (Option<Strategy>, Vec<String>) {
        match escalation {
            Some(e) => (Some(e.from), e.actions),
            None => (None, Vec::new()),
        }
    }
}

/// Backoff parameters for `retry_phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.retry.max_retries,
            base_delay: config.base_delay(),
        }
    }

    /// Delay before retry `k` (1-based): `base * 2^(k-1)`.
    #[must_use]
    pub fn delay_for(&self, k: u32) -> Duration {
        let factor = 2u32.saturating_pow(k.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

pub struct RecoveryStrategyExecutor {
    machine: Arc<PhaseStateMachine>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    required_tasks: Vec<String>,
}

impl std::fmt::Debug for RecoveryStrategyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryStrategyExecutor")
            .field("retry", &self.retry)
            .field("required_tasks", &self.required_tasks)
            .finish_non_exhaustive()
    }
}

impl RecoveryStrategyExecutor {
    #[must_use]
    pub fn new(config: &Config, machine: Arc<PhaseStateMachine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            machine,
            clock,
            retry: RetryPolicy::from_config(config),
            required_tasks: config.parallel.required_tasks.clone(),
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run `strategy` for `failure`.
    ///
    /// Against a finalized context this is a no-op that reports the
    /// existing terminal status.
    pub async fn execute(
        &self,
        ctx: &mut WorkflowContext,
        failure: &PhaseFailure,
        strategy: Strategy,
    ) -> RecoveryOutcome {
        if let Some(status) = ctx.terminal_status() {
            tracing::debug!(
                workflow_id = %ctx.workflow_id,
                strategy = %strategy,
                status = %status,
                "Context already terminal, recovery skipped"
            );
            return RecoveryOutcome::Terminal(status);
        }

        log_recovery_start(&ctx.workflow_id, failure.phase.as_str(), strategy.as_str());
        match strategy {
            Strategy::RetryPhase => self.retry_phase(ctx, failure).await,
            Strategy::RollbackAndRetry => self.rollback_and_retry(ctx, failure).await,
            Strategy::GracefulDegradation => self.graceful_degradation(ctx, failure, None),
            Strategy::PartialRecovery => self.partial_recovery(ctx, failure).await,
            Strategy::MinimalRecovery => self.minimal_recovery(ctx, failure, None),
        }
    }

    /// Append the ErrorRecord for `failure` unless it was already written.
    ///
    /// The record captures the context as it was before any recovery step.
    /// A copy without the snapshot is kept on the failed phase.
    pub fn log_failure(&self, ctx: &mut WorkflowContext, failure: &PhaseFailure) {
        if ctx.is_failure_logged(&failure.id) {
            return;
        }
        let record = ErrorRecord::capture(failure, ctx.snapshot_value());
        ctx.mark_failure_logged(&failure.id);

        if let Err(e) = SnapshotStore::for_context(ctx).append_error(&record) {
            tracing::warn!(
                workflow_id = %ctx.workflow_id,
                failure_id = %failure.id,
                error = %e,
                "Failed to append error record"
            );
        }
        ctx.phase_mut(failure.phase).error = Some(record.summary());
    }

    fn state(
        &self,
        strategy: Strategy,
        escalated_from: Option<Strategy>,
        failure: &PhaseFailure,
        actions: Vec<String>,
        terminal_status: Option<TerminalStatus>,
        next_steps: Vec<String>,
    ) -> RecoveryState {
        RecoveryState {
            strategy,
            escalated_from,
            failure_id: failure.id.clone(),
            actions,
            terminal_status,
            next_steps,
            timestamp: self.clock.now(),
        }
    }

    /// Record `state` on the context and persist it. Write errors are logged only.
    fn finish(&self, ctx: &mut WorkflowContext, state: RecoveryState) {
        let store = SnapshotStore::for_context(ctx);
        if let Err(e) = store.write_recovery_state(&state, &ctx.workflow_id) {
            tracing::warn!(workflow_id = %ctx.workflow_id, error = %e, "Failed to write recovery state");
        }
        let final_status = state.terminal_status.map_or("RESUMED", |s| s.as_str());
        log_recovery_complete(&ctx.workflow_id, state.strategy.as_str(), final_status);
        ctx.recoveries.push(state);

        if let Err(e) = store.write_snapshot(ctx) {
            tracing::warn!(workflow_id = %ctx.workflow_id, error = %e, "Failed to write context snapshot");
        }
    }

    /// Remove a phase's working area. Returns a description of what happened.
    fn reset_work_area(&self, ctx: &WorkflowContext, phase: PhaseId) -> String {
        let dir = phase_work_dir(&ctx.run_dir, phase);
        match remove_dir_if_exists(&dir) {
            Ok(true) => format!("reset working area {dir}"),
            Ok(false) => format!("working area {dir} was already empty"),
            Err(e) => {
                tracing::warn!(workflow_id = %ctx.workflow_id, phase = %phase, error = %e, "Failed to reset working area");
                format!("could not reset working area {dir}: {e}")
            }
        }
    }

    /// Move a non-terminal or failed phase to `Skipped`.
    fn skip(&self, ctx: &mut WorkflowContext, phase: PhaseId) -> bool {
        let status = ctx.status(phase);
        if status == PhaseStatus::Running || status == PhaseStatus::Pending || status == PhaseStatus::Failed {
            let now = self.clock.now();
            return ctx.transition(phase, PhaseStatus::Skipped, now).is_ok();
        }
        false
    }
}
