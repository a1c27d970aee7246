//! The mutable record of one pipeline run.
//!
//! A [`WorkflowContext`] is created when a run starts and is threaded by
//! `&mut` through every phase and recovery procedure. It holds exactly one
//! [`PhaseResult`] per phase, in pipeline order, and every status change goes
//! through [`WorkflowContext::transition`], which rejects anything that would
//! reopen a terminal phase.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

use pipeforge_utils::error::PhaseError;
use pipeforge_utils::types::{ExecutionMode, PhaseId, PhaseStatus, TerminalStatus};

use crate::collaborators::{
    ArtifactContent, DeployedPaths, ProjectAnalysis, RankedTemplateList, ValidationReport,
};
use crate::records::{ErrorRecord, RecoveryState};

/// Pointer to an artifact a phase produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub path: Utf8PathBuf,
}

impl ArtifactRef {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Per-phase state within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: PhaseId,
    status: PhaseStatus,
    pub artifacts: Vec<ArtifactRef>,
    pub error: Option<ErrorRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// Number of times the work unit was entered.
    pub attempts: u32,
    /// Partial-output annotations.
    pub warnings: Vec<String>,
}

impl PhaseResult {
    fn pending(phase: PhaseId) -> Self {
        Self {
            phase,
            status: PhaseStatus::Pending,
            artifacts: Vec::new(),
            error: None,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            attempts: 0,
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn status(&self) -> PhaseStatus {
        self.status
    }
}

/// Data handed from one phase to the next.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseOutputs {
    pub requirements: Option<String>,
    pub analysis: Option<ProjectAnalysis>,
    pub templates: Option<RankedTemplateList>,
    pub generated: Vec<ArtifactContent>,
    pub merged_config: Option<serde_json::Value>,
    pub deployed: Option<DeployedPaths>,
    pub validation: Option<ValidationReport>,
    /// Reduced-scope artifacts synthesized by recovery.
    pub degraded: Vec<ArtifactContent>,
    /// Generic artifacts emitted by minimal recovery.
    pub fallback: Vec<ArtifactContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub project_path: Utf8PathBuf,
    pub request: String,
    #[serde(deserialize_with = "deserialize_phases")]
    phases: Vec<PhaseResult>,
    pub current_phase: Option<PhaseId>,
    pub created_at: DateTime<Utc>,
    pub run_dir: Utf8PathBuf,
    pub mode: ExecutionMode,
    pub outputs: PhaseOutputs,
    /// Failure ids whose ErrorRecord has already been written.
    pub logged_failures: BTreeSet<String>,
    terminal_status: Option<TerminalStatus>,
    pub finished_at: Option<DateTime<Utc>>,
    /// One entry per recovery attempt, oldest first.
    pub recoveries: Vec<RecoveryState>,
    pub warnings: Vec<String>,
}

fn deserialize_phases<'de, D>(deserializer: D) -> Result<Vec<PhaseResult>, D::Error>
where
    D: Deserializer<'de>,
{
    let phases = Vec::<PhaseResult>::deserialize(deserializer)?;
    let in_order = phases.len() == PhaseId::ALL.len()
        && phases.iter().zip(PhaseId::ALL).all(|(r, id)| r.phase == id);
    if !in_order {
        return Err(serde::de::Error::custom(
            "phases must list every phase exactly once in pipeline order",
        ));
    }
    Ok(phases)
}

impl WorkflowContext {
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        project_path: impl Into<Utf8PathBuf>,
        request: impl Into<String>,
        run_dir: impl Into<Utf8PathBuf>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            project_path: project_path.into(),
            request: request.into(),
            phases: PhaseId::ALL.into_iter().map(PhaseResult::pending).collect(),
            current_phase: None,
            created_at,
            run_dir: run_dir.into(),
            mode: ExecutionMode::Normal,
            outputs: PhaseOutputs::default(),
            logged_failures: BTreeSet::new(),
            terminal_status: None,
            finished_at: None,
            recoveries: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn phases(&self) -> &[PhaseResult] {
        &self.phases
    }

    #[must_use]
    pub fn phase(&self, id: PhaseId) -> &PhaseResult {
        &self.phases[id.index()]
    }

    /// Mutable access to everything but the status.
    pub fn phase_mut(&mut self, id: PhaseId) -> &mut PhaseResult {
        &mut self.phases[id.index()]
    }

    #[must_use]
    pub fn status(&self, id: PhaseId) -> PhaseStatus {
        self.phase(id).status
    }

    /// Move `id` to `to`, stamping timestamps and duration.
    ///
    /// Entering `Running` sets the attempt count to 1 and makes `id` the
    /// current phase. Entering a terminal status records `ended_at` and the
    /// elapsed time since the latest attempt started.
    pub fn transition(
        &mut self,
        id: PhaseId,
        to: PhaseStatus,
        now: DateTime<Utc>,
    ) -> Result<(), PhaseError> {
        let from = self.status(id);
        if !from.can_transition_to(to) {
            return Err(PhaseError::InvalidTransition {
                phase: id.as_str().to_string(),
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        let result = self.phase_mut(id);
        result.status = to;
        if to == PhaseStatus::Running {
            result.started_at = Some(now);
            result.attempts = 1;
            self.current_phase = Some(id);
        } else if to.is_terminal() {
            result.ended_at = Some(now);
            result.duration_ms = result
                .started_at
                .map(|start| (now - start).num_milliseconds().max(0).unsigned_abs());
        }
        Ok(())
    }

    /// Re-enter a `Running` phase for another attempt. Returns the attempt number.
    pub fn begin_retry_attempt(&mut self, id: PhaseId, now: DateTime<Utc>) -> Result<u32, PhaseError> {
        let status = self.status(id);
        if status != PhaseStatus::Running {
            return Err(PhaseError::InvalidTransition {
                phase: id.as_str().to_string(),
                from: status.as_str().to_string(),
                to: PhaseStatus::Running.as_str().to_string(),
            });
        }
        let result = self.phase_mut(id);
        result.attempts += 1;
        result.started_at = Some(now);
        Ok(result.attempts)
    }

    /// Phases currently `Failed`, in pipeline order.
    #[must_use]
    pub fn failed_phases(&self) -> Vec<PhaseId> {
        self.phases_with(PhaseStatus::Failed)
    }

    #[must_use]
    pub fn phases_with(&self, status: PhaseStatus) -> Vec<PhaseId> {
        self.phases
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.phase)
            .collect()
    }

    /// First predecessor of `id` that is neither `Completed` nor `Skipped`.
    #[must_use]
    pub fn unsatisfied_predecessor(&self, id: PhaseId) -> Option<(PhaseId, PhaseStatus)> {
        id.predecessors()
            .iter()
            .map(|p| (*p, self.status(*p)))
            .find(|(_, s)| !s.satisfies_dependents())
    }

    /// Next phase that has not reached a terminal status.
    #[must_use]
    pub fn next_open_phase(&self) -> Option<PhaseId> {
        self.phases
            .iter()
            .find(|r| !r.status.is_terminal())
            .map(|r| r.phase)
    }

    /// Most recent phase in pipeline order that `Completed`.
    #[must_use]
    pub fn last_completed_phase(&self) -> Option<PhaseId> {
        self.phases
            .iter()
            .rev()
            .find(|r| r.status == PhaseStatus::Completed)
            .map(|r| r.phase)
    }

    /// Every artifact reference recorded on any phase.
    pub fn artifact_refs(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.phases.iter().flat_map(|r| r.artifacts.iter())
    }

    /// Whether the run has produced any artifact at all.
    #[must_use]
    pub fn has_artifacts(&self) -> bool {
        self.artifact_refs().next().is_some()
            || !self.outputs.generated.is_empty()
            || !self.outputs.degraded.is_empty()
            || !self.outputs.fallback.is_empty()
    }

    #[must_use]
    pub fn terminal_status(&self) -> Option<TerminalStatus> {
        self.terminal_status
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.terminal_status.is_some()
    }

    /// Seal the run.
    ///
    /// Phases still `Running` become `Failed` and phases still `Pending`
    /// become `Skipped`, so every phase ends terminal. Finalizing an already
    /// finalized context keeps the first status and returns it.
    pub fn finalize(&mut self, status: TerminalStatus, now: DateTime<Utc>) -> TerminalStatus {
        if let Some(existing) = self.terminal_status {
            return existing;
        }

        for id in PhaseId::ALL {
            let next = match self.status(id) {
                PhaseStatus::Running => PhaseStatus::Failed,
                PhaseStatus::Pending => PhaseStatus::Skipped,
                _ => continue,
            };
            // Both moves are always legal from the matched state.
            let _ = self.transition(id, next, now);
        }

        self.current_phase = None;
        self.terminal_status = Some(status);
        self.finished_at = Some(now);
        status
    }

    /// Remember that the ErrorRecord for `failure_id` was written.
    /// Returns `false` if it already was.
    pub fn mark_failure_logged(&mut self, failure_id: &str) -> bool {
        self.logged_failures.insert(failure_id.to_string())
    }

    #[must_use]
    pub fn is_failure_logged(&self, failure_id: &str) -> bool {
        self.logged_failures.contains(failure_id)
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// JSON value of the whole context, for error records and backups.
    #[must_use]
    pub fn snapshot_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn ctx() -> WorkflowContext {
        WorkflowContext::new("wf-1", "/project", "build agents", "/state/wf-1", t0())
    }

    #[test]
    fn test_new_context_has_one_pending_result_per_phase() {
        let ctx = ctx();
        assert_eq!(ctx.phases().len(), 7);
        for (result, id) in ctx.phases().iter().zip(PhaseId::ALL) {
            assert_eq!(result.phase, id);
            assert_eq!(result.status(), PhaseStatus::Pending);
        }
        assert_eq!(ctx.next_open_phase(), Some(PhaseId::Requirements));
    }

    #[test]
    fn test_transition_records_duration() {
        let mut ctx = ctx();
        ctx.transition(PhaseId::Requirements, PhaseStatus::Running, t0()).unwrap();
        ctx.transition(
            PhaseId::Requirements,
            PhaseStatus::Completed,
            t0() + Duration::milliseconds(250),
        )
        .unwrap();

        let result = ctx.phase(PhaseId::Requirements);
        assert_eq!(result.duration_ms, Some(250));
        assert_eq!(result.attempts, 1);
        assert_eq!(ctx.current_phase, Some(PhaseId::Requirements));
    }

    #[test]
    fn test_completed_phase_cannot_reopen() {
        let mut ctx = ctx();
        ctx.transition(PhaseId::Requirements, PhaseStatus::Running, t0()).unwrap();
        ctx.transition(PhaseId::Requirements, PhaseStatus::Completed, t0()).unwrap();

        let err = ctx
            .transition(PhaseId::Requirements, PhaseStatus::Running, t0())
            .unwrap_err();
        assert!(matches!(err, PhaseError::InvalidTransition { .. }));
        assert!(ctx.transition(PhaseId::Requirements, PhaseStatus::Skipped, t0()).is_err());
    }

    #[test]
    fn test_retry_attempt_requires_running() {
        let mut ctx = ctx();
        assert!(ctx.begin_retry_attempt(PhaseId::Analysis, t0()).is_err());

        ctx.transition(PhaseId::Analysis, PhaseStatus::Running, t0()).unwrap();
        assert_eq!(ctx.begin_retry_attempt(PhaseId::Analysis, t0()).unwrap(), 2);
        assert_eq!(ctx.begin_retry_attempt(PhaseId::Analysis, t0()).unwrap(), 3);
    }

    #[test]
    fn test_unsatisfied_predecessor() {
        let mut ctx = ctx();
        assert_eq!(
            ctx.unsatisfied_predecessor(PhaseId::Analysis),
            Some((PhaseId::Requirements, PhaseStatus::Pending))
        );
        ctx.transition(PhaseId::Requirements, PhaseStatus::Skipped, t0()).unwrap();
        assert_eq!(ctx.unsatisfied_predecessor(PhaseId::Analysis), None);
    }

    #[test]
    fn test_finalize_settles_open_phases_and_is_sticky() {
        let mut ctx = ctx();
        ctx.transition(PhaseId::Requirements, PhaseStatus::Running, t0()).unwrap();

        let status = ctx.finalize(TerminalStatus::CompletedMinimal, t0());
        assert_eq!(status, TerminalStatus::CompletedMinimal);
        assert_eq!(ctx.status(PhaseId::Requirements), PhaseStatus::Failed);
        assert_eq!(ctx.status(PhaseId::Validation), PhaseStatus::Skipped);
        assert!(ctx.next_open_phase().is_none());

        let again = ctx.finalize(TerminalStatus::Completed, t0());
        assert_eq!(again, TerminalStatus::CompletedMinimal);
    }

    #[test]
    fn test_failure_logged_once() {
        let mut ctx = ctx();
        assert!(ctx.mark_failure_logged("f-1"));
        assert!(!ctx.mark_failure_logged("f-1"));
        assert!(ctx.is_failure_logged("f-1"));
    }

    #[test]
    fn test_context_json_round_trip_rejects_missing_phase() {
        let ctx = ctx();
        let mut value = serde_json::to_value(&ctx).unwrap();
        let back: WorkflowContext = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(back, ctx);

        value["phases"].as_array_mut().unwrap().pop();
        assert!(serde_json::from_value::<WorkflowContext>(value).is_err());
    }

    fn status_strategy() -> impl Strategy<Value = PhaseStatus> {
        prop_oneof![
            Just(PhaseStatus::Pending),
            Just(PhaseStatus::Running),
            Just(PhaseStatus::Completed),
            Just(PhaseStatus::Failed),
            Just(PhaseStatus::Skipped),
        ]
    }

    proptest! {
        #[test]
        fn prop_terminal_status_never_regresses(
            moves in proptest::collection::vec((0usize..7, status_strategy()), 0..40)
        ) {
            let mut ctx = ctx();
            let mut seen_terminal = [false; 7];

            for (idx, to) in moves {
                let id = PhaseId::ALL[idx];
                let _ = ctx.transition(id, to, t0());

                let now = ctx.status(id);
                if seen_terminal[idx] {
                    prop_assert!(now.is_terminal());
                }
                seen_terminal[idx] |= now.is_terminal();
            }
        }
    }
}
