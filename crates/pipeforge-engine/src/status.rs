//! Status summary of a run, for logs and callers that only want the outcome.
//!
//! The summary is a flat projection of a [`WorkflowContext`]. Its JSON form
//! is emitted canonically so two summaries of the same run diff cleanly.

use serde::Serialize;

use pipeforge_phase_api::{PhaseId, PhaseStatus, Strategy, TerminalStatus, WorkflowContext};
use pipeforge_snapshot::canonical_json;
use pipeforge_utils::error::SnapshotError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSummary {
    pub phase: PhaseId,
    pub status: PhaseStatus,
    pub attempts: u32,
    pub artifacts: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub terminal_status: Option<TerminalStatus>,
    pub phases: Vec<PhaseSummary>,
    /// Strategies applied, oldest first.
    pub recoveries: Vec<Strategy>,
    pub degraded_artifacts: Vec<String>,
    pub fallback_artifacts: Vec<String>,
    pub run_dir: String,
}

impl WorkflowSummary {
    #[must_use]
    pub fn from_context(ctx: &WorkflowContext) -> Self {
        let phases = ctx
            .phases()
            .iter()
            .map(|r| PhaseSummary {
                phase: r.phase,
                status: r.status(),
                attempts: r.attempts,
                artifacts: r.artifacts.len(),
                warnings: r.warnings.clone(),
                error: r.error.as_ref().map(|e| format!("{}: {}", e.category, e.message)),
            })
            .collect();

        Self {
            workflow_id: ctx.workflow_id.clone(),
            terminal_status: ctx.terminal_status(),
            phases,
            recoveries: ctx.recoveries.iter().map(|r| r.strategy).collect(),
            degraded_artifacts: ctx.outputs.degraded.iter().map(|a| a.name.clone()).collect(),
            fallback_artifacts: ctx.outputs.fallback.iter().map(|a| a.name.clone()).collect(),
            run_dir: ctx.run_dir.to_string(),
        }
    }

    /// Phases that ended in `status`.
    #[must_use]
    pub fn phases_with(&self, status: PhaseStatus) -> Vec<PhaseId> {
        self.phases
            .iter()
            .filter(|p| p.status == status)
            .map(|p| p.phase)
            .collect()
    }

    /// Canonical JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_canonical_json(&self) -> Result<String, SnapshotError> {
        let bytes = canonical_json(self, "workflow summary")?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Plain-text rendering, one line per phase.
    #[must_use]
    pub fn render(&self) -> String {
        let status = self.terminal_status.map_or("IN_PROGRESS", |s| s.as_str());
        let mut out = format!("Workflow {}: {status}\n", self.workflow_id);

        for p in &self.phases {
            out.push_str(&format!("  {:<20} {:<9}", p.phase.as_str(), p.status.as_str()));
            if p.attempts > 1 {
                out.push_str(&format!(" attempts={}", p.attempts));
            }
            if p.artifacts > 0 {
                out.push_str(&format!(" artifacts={}", p.artifacts));
            }
            if let Some(error) = &p.error {
                out.push_str(&format!(" error=\"{error}\""));
            }
            out.push('\n');
            for warning in &p.warnings {
                out.push_str(&format!("    warning: {warning}\n"));
            }
        }

        if !self.recoveries.is_empty() {
            let names: Vec<&str> = self.recoveries.iter().map(Strategy::as_str).collect();
            out.push_str(&format!("Recovery: {}\n", names.join(" -> ")));
        }
        if !self.degraded_artifacts.is_empty() {
            out.push_str(&format!("Degraded artifacts: {}\n", self.degraded_artifacts.join(", ")));
        }
        if !self.fallback_artifacts.is_empty() {
            out.push_str(&format!("Fallback artifacts: {}\n", self.fallback_artifacts.join(", ")));
        }
        out.push_str(&format!("Run directory: {}\n", self.run_dir));
        out
    }
}
