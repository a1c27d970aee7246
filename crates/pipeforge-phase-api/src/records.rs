//! Failure and recovery records.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use pipeforge_utils::error::{ErrorCategory, PipelineError, error_chain};
use pipeforge_utils::paths::timestamp_slug;
use pipeforge_utils::redaction::redact;
use pipeforge_utils::types::{PhaseId, TerminalStatus};

/// A failure raised by a phase, reduced to the data recovery needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseFailure {
    /// Stable id; an ErrorRecord is written at most once per id.
    pub id: String,
    pub phase: PhaseId,
    pub category: ErrorCategory,
    /// Redacted top-level message.
    pub message: String,
    /// Redacted error chain, outermost first.
    pub chain: Vec<String>,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

impl PhaseFailure {
    #[must_use]
    pub fn new(
        phase: PhaseId,
        category: ErrorCategory,
        message: &str,
        attempt: u32,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Self::make_id(phase, attempt, occurred_at),
            phase,
            category,
            message: redact(message),
            chain: Vec::new(),
            attempt,
            occurred_at,
        }
    }

    /// Capture a raised error. The category comes from the error itself.
    #[must_use]
    pub fn from_error(
        phase: PhaseId,
        err: &PipelineError,
        attempt: u32,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let mut failure = Self::new(phase, err.category(), &err.to_string(), attempt, occurred_at);
        failure.chain = error_chain(err).iter().map(|line| redact(line)).collect();
        failure
    }

    fn make_id(phase: PhaseId, attempt: u32, at: DateTime<Utc>) -> String {
        format!("{}-{}-a{attempt}", timestamp_slug(at), phase.as_str())
    }
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed ({}): {}", self.phase, self.category, self.message)
    }
}

/// Immutable log entry written once per failure, before any recovery runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub failure_id: String,
    pub timestamp: DateTime<Utc>,
    pub phase: PhaseId,
    pub category: ErrorCategory,
    pub message: String,
    pub stack_context: Vec<String>,
    /// Serialized workflow context at failure time. `Null` on the copy kept
    /// inside the context itself.
    pub context_snapshot: serde_json::Value,
}

impl ErrorRecord {
    #[must_use]
    pub fn capture(failure: &PhaseFailure, context_snapshot: serde_json::Value) -> Self {
        Self {
            failure_id: failure.id.clone(),
            timestamp: failure.occurred_at,
            phase: failure.phase,
            category: failure.category,
            message: failure.message.clone(),
            stack_context: failure.chain.clone(),
            context_snapshot,
        }
    }

    /// Copy without the embedded snapshot, for storage on a `PhaseResult`.
    #[must_use]
    pub fn summary(&self) -> Self {
        Self {
            context_snapshot: serde_json::Value::Null,
            ..self.clone()
        }
    }
}

/// Named recovery procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RetryPhase,
    RollbackAndRetry,
    GracefulDegradation,
    PartialRecovery,
    MinimalRecovery,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Self::RetryPhase,
        Self::RollbackAndRetry,
        Self::GracefulDegradation,
        Self::PartialRecovery,
        Self::MinimalRecovery,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RetryPhase => "retry_phase",
            Self::RollbackAndRetry => "rollback_and_retry",
            Self::GracefulDegradation => "graceful_degradation",
            Self::PartialRecovery => "partial_recovery",
            Self::MinimalRecovery => "minimal_recovery",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one recovery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryState {
    pub strategy: Strategy,
    /// Strategy that handed over to this one, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_from: Option<Strategy>,
    pub failure_id: String,
    pub actions: Vec<String>,
    /// `None` when the strategy resumed the pipeline instead of ending it.
    pub terminal_status: Option<TerminalStatus>,
    pub next_steps: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl RecoveryState {
    /// Human-readable rendering written to `RECOVERY.md`.
    #[must_use]
    pub fn render_markdown(&self, workflow_id: &str) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Recovery report for {workflow_id}\n\n"));
        out.push_str(&format!("- Strategy: `{}`\n", self.strategy));
        if let Some(from) = self.escalated_from {
            out.push_str(&format!("- Escalated from: `{from}`\n"));
        }
        out.push_str(&format!("- Failure: `{}`\n", self.failure_id));
        let status = self
            .terminal_status
            .map_or("RESUMED", |s| s.as_str());
        out.push_str(&format!("- Result: {status}\n"));
        out.push_str(&format!("- Recorded: {}\n\n", self.timestamp.to_rfc3339()));

        out.push_str("## Actions taken\n\n");
        for (i, action) in self.actions.iter().enumerate() {
            out.push_str(&format!("{}. {action}\n", i + 1));
        }

        out.push_str("\n## Next steps\n\n");
        for step in &self.next_steps {
            out.push_str(&format!("- {step}\n"));
        }
        out
    }
}

/// Copy of the context taken before a destructive recovery action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    /// Where the backup was persisted.
    pub path: Utf8PathBuf,
    /// blake3 hex digest of the canonical context bytes.
    pub digest: String,
    pub context: serde_json::Value,
}
