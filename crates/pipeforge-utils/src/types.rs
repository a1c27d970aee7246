use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Phase identifiers for the generation pipeline.
///
/// `PhaseId` represents the stages a pipeforge run moves through. Phases
/// execute strictly in declaration order:
///
/// ```text
/// Requirements → Analysis → TemplateSelection → Generation
///     → ConfigurationMerge → Deployment → Validation
/// ```
///
/// A phase may only start once every strictly-preceding phase has reached
/// `Completed` or `Skipped`.
///
/// # Example
///
/// ```rust
/// use pipeforge_utils::types::PhaseId;
///
/// let phase = PhaseId::TemplateSelection;
/// assert_eq!(phase.as_str(), "template_selection");
/// assert_eq!(phase.predecessors(), &[PhaseId::Requirements, PhaseId::Analysis]);
/// ```
///
/// # Serialization
///
/// `PhaseId` serializes to its snake_case name (e.g. `"configuration_merge"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    /// Captures the originating user request.
    Requirements,
    /// Inspects the project for languages, frameworks and recommended agents.
    Analysis,
    /// Ranks the templates that fit the analysis.
    TemplateSelection,
    /// Renders one artifact per selected template, concurrently.
    Generation,
    /// Merges generated artifacts into one configuration document.
    ConfigurationMerge,
    /// Installs the artifacts into the project.
    Deployment,
    /// Scores the deployed configuration.
    Validation,
}

impl PhaseId {
    /// Every phase in pipeline order.
    pub const ALL: [PhaseId; 7] = [
        Self::Requirements,
        Self::Analysis,
        Self::TemplateSelection,
        Self::Generation,
        Self::ConfigurationMerge,
        Self::Deployment,
        Self::Validation,
    ];

    /// Canonical snake_case name used in logs, snapshots and directory names.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Requirements => "requirements",
            Self::Analysis => "analysis",
            Self::TemplateSelection => "template_selection",
            Self::Generation => "generation",
            Self::ConfigurationMerge => "configuration_merge",
            Self::Deployment => "deployment",
            Self::Validation => "validation",
        }
    }

    /// Zero-based position in the pipeline.
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Requirements => 0,
            Self::Analysis => 1,
            Self::TemplateSelection => 2,
            Self::Generation => 3,
            Self::ConfigurationMerge => 4,
            Self::Deployment => 5,
            Self::Validation => 6,
        }
    }

    /// Every phase that must be terminal before this one may start.
    #[must_use]
    pub fn predecessors(&self) -> &'static [PhaseId] {
        &Self::ALL[..self.index()]
    }

    /// The phase that follows this one, if any.
    #[must_use]
    pub fn next(&self) -> Option<PhaseId> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Phases with no usable analysis yet.
    #[must_use]
    pub const fn is_early(&self) -> bool {
        matches!(self, Self::Requirements | Self::Analysis)
    }

    /// Phases that run after the artifacts exist.
    #[must_use]
    pub const fn is_late(&self) -> bool {
        matches!(self, Self::Deployment | Self::Validation)
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown phase: {s}"))
    }
}

/// Lifecycle status of a single phase within one run.
///
/// `Completed`, `Failed` and `Skipped` are terminal. The only transition out of
/// a terminal state is the recovery-only `Failed → Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Whether a downstream phase may treat this one as satisfied.
    #[must_use]
    pub const fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// Whether `self → next` is a legal status change.
    #[must_use]
    pub const fn can_transition_to(&self, next: PhaseStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Skipped)
                | (Self::Failed, Self::Skipped)
        )
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of a run. A finished run always carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    /// Every phase completed or was legitimately skipped.
    Completed,
    /// A recovery strategy produced reduced-scope output.
    CompletedDegraded,
    /// Only the generic fallback artifact and minimal configuration exist.
    CompletedMinimal,
}

impl TerminalStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::CompletedDegraded => "COMPLETED_DEGRADED",
            Self::CompletedMinimal => "COMPLETED_MINIMAL",
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How phase work units treat missing upstream input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Every input must come from a completed upstream phase.
    #[default]
    Normal,
    /// Missing upstream input is replaced with defaults.
    Degraded,
    /// Deployment ships a single configuration synthesized from analysis.
    Simplified,
}

impl ExecutionMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Degraded => "degraded",
            Self::Simplified => "simplified",
        }
    }
}
