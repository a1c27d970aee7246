use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Library-level error type for a pipeforge run.
///
/// `PipelineError` is what phase work units raise. It never escapes the
/// orchestrator: the run loop logs it as an `ErrorRecord`, classifies it by
/// [`category()`](Self::category) and hands it to a recovery strategy.
///
/// # Error Categories
///
/// | Variant | Category |
/// |---------|----------|
/// | `Collaborator` | whatever the collaborator attached |
/// | `Phase(Timeout)` | `TransientIo` |
/// | `Phase(DependencyNotSatisfied / InvalidTransition)` | `Sequencing` |
/// | `Snapshot`, `Phase(WorkArea)` | `FileSystem` |
/// | `Io` | derived from the `io::ErrorKind` |
///
/// # Example
///
/// ```rust
/// use pipeforge_utils::error::{CollaboratorError, ErrorCategory, PipelineError};
///
/// let err = PipelineError::from(CollaboratorError::transient("connection reset by peer"));
/// assert_eq!(err.category(), ErrorCategory::TransientIo);
/// assert!(err.display_for_user().contains("Suggestions:"));
/// ```
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Phase execution error: {0}")]
    Phase(#[from] PhaseError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("State snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the structured category used by failure classification
    fn category(&self) -> ErrorCategory;
}

/// Structured failure categories.
///
/// Collaborators attach a category as part of their failure contract so that
/// classification does not have to infer it from free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Network hiccups, timeouts, interrupted I/O. Worth retrying.
    TransientIo,
    /// Permissions, missing paths, read-only mounts.
    FileSystem,
    Analysis,
    Generation,
    Deployment,
    Validation,
    /// A phase was asked to run before its prerequisites.
    Sequencing,
    Unknown,
}

impl ErrorCategory {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TransientIo => "transient_io",
            Self::FileSystem => "file_system",
            Self::Analysis => "analysis",
            Self::Generation => "generation",
            Self::Deployment => "deployment",
            Self::Validation => "validation",
            Self::Sequencing => "sequencing",
            Self::Unknown => "unknown",
        }
    }

    /// Map an `io::ErrorKind` onto a category.
    #[must_use]
    pub fn from_io_kind(kind: io::ErrorKind) -> Self {
        use io::ErrorKind;

        match kind {
            ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Self::TransientIo,
            ErrorKind::PermissionDenied
            | ErrorKind::NotFound
            | ErrorKind::AlreadyExists
            | ErrorKind::ReadOnlyFilesystem
            | ErrorKind::IsADirectory
            | ErrorKind::NotADirectory
            | ErrorKind::DirectoryNotEmpty
            | ErrorKind::StorageFull
            | ErrorKind::InvalidFilename => Self::FileSystem,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised by an external collaborator (analyzer, selector, generator,
/// deployer, validator).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct CollaboratorError {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl CollaboratorError {
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            details: Vec::new(),
        }
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientIo, message)
    }

    #[must_use]
    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::FileSystem, message)
    }

    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unknown, message)
    }

    /// Attach one more line of context.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }
}

impl UserFriendlyError for CollaboratorError {
    fn user_message(&self) -> String {
        format!("A pipeline collaborator failed: {}", self.message)
    }

    fn context(&self) -> Option<String> {
        if self.details.is_empty() {
            None
        } else {
            Some(self.details.join("; "))
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self.category {
            ErrorCategory::TransientIo => vec![
                "The failure looks transient; the phase is retried automatically".to_string(),
                "Check network connectivity if retries keep failing".to_string(),
            ],
            ErrorCategory::FileSystem => vec![
                "Check permissions on the project and state directories".to_string(),
                "Make sure the target paths exist and are writable".to_string(),
            ],
            _ => vec!["Inspect the error log in the run directory for details".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        self.category
    }
}

/// Phase sequencing and execution errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhaseError {
    #[error("Phase {phase} dependency not satisfied: {dependency} is {status}")]
    DependencyNotSatisfied {
        phase: String,
        dependency: String,
        status: String,
    },

    #[error("Invalid status transition for phase {phase}: {from} -> {to}")]
    InvalidTransition {
        phase: String,
        from: String,
        to: String,
    },

    #[error("Phase {phase} timed out after {timeout_seconds} seconds")]
    Timeout { phase: String, timeout_seconds: u64 },

    #[error("Invalid user request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Phase {phase} is missing upstream input: {input}")]
    MissingInput { phase: String, input: String },

    #[error("Required generation tasks failed: {}", tasks.join(", "))]
    RequiredTasksFailed { tasks: Vec<String> },

    #[error("{failed} generation tasks failed, more than the allowed {limit}")]
    TooManyTasksFailed { failed: usize, limit: usize },

    #[error("Validation rejected the deployed configuration (score {score:.2})")]
    ValidationRejected { score: f64 },

    #[error("Phase {phase} working area unusable: {reason}")]
    WorkArea { phase: String, reason: String },
}

impl UserFriendlyError for PhaseError {
    fn user_message(&self) -> String {
        match self {
            Self::DependencyNotSatisfied {
                phase, dependency, ..
            } => {
                format!("Cannot run {phase} phase: {dependency} must complete or be skipped first")
            }
            Self::InvalidTransition { phase, from, to } => {
                format!("Phase {phase} cannot move from {from} to {to}")
            }
            Self::Timeout {
                phase,
                timeout_seconds,
            } => format!("The {phase} phase did not finish within {timeout_seconds} seconds"),
            Self::InvalidRequest { reason } => format!("The request cannot be processed: {reason}"),
            Self::MissingInput { phase, input } => {
                format!("The {phase} phase has no {input} to work from")
            }
            Self::RequiredTasksFailed { tasks } => {
                format!("Essential artifacts could not be generated: {}", tasks.join(", "))
            }
            Self::TooManyTasksFailed { failed, limit } => {
                format!("{failed} artifacts failed to generate (limit {limit})")
            }
            Self::ValidationRejected { score } => {
                format!("The deployed configuration did not pass validation (score {score:.2})")
            }
            Self::WorkArea { phase, reason } => {
                format!("The {phase} working directory could not be prepared: {reason}")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::DependencyNotSatisfied { .. } | Self::InvalidTransition { .. } => Some(
                "Phases run strictly in order and terminal phase states never reopen.".to_string(),
            ),
            Self::Timeout { .. } => {
                Some("Timeouts are treated as transient failures and retried.".to_string())
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Timeout { .. } => vec![
                "Increase [orchestrator] phase_timeout_secs in .pipeforge/config.toml".to_string(),
            ],
            Self::RequiredTasksFailed { .. } | Self::TooManyTasksFailed { .. } => vec![
                "Inspect the per-task output under work/generation/ in the run directory"
                    .to_string(),
            ],
            Self::InvalidRequest { .. } => {
                vec!["Describe what should be generated in the request".to_string()]
            }
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::DependencyNotSatisfied { .. } | Self::InvalidTransition { .. } => {
                ErrorCategory::Sequencing
            }
            Self::Timeout { .. } => ErrorCategory::TransientIo,
            Self::InvalidRequest { .. } | Self::MissingInput { .. } => ErrorCategory::Unknown,
            Self::RequiredTasksFailed { .. } | Self::TooManyTasksFailed { .. } => {
                ErrorCategory::Generation
            }
            Self::ValidationRejected { .. } => ErrorCategory::Validation,
            Self::WorkArea { .. } => ErrorCategory::FileSystem,
        }
    }
}

/// Errors from the state snapshot store.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to write {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Failed to serialize {what}: {reason}")]
    SerializeFailed { what: String, reason: String },
}

impl UserFriendlyError for SnapshotError {
    fn user_message(&self) -> String {
        match self {
            Self::WriteFailed { path, .. } => format!("Could not persist run state to {path}"),
            Self::ReadFailed { path, .. } => format!("Could not read run state from {path}"),
            Self::SerializeFailed { what, .. } => format!("Could not serialize {what}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::WriteFailed { reason, .. }
            | Self::ReadFailed { reason, .. }
            | Self::SerializeFailed { reason, .. } => Some(reason.clone()),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        vec!["Check that [orchestrator] state_root points to a writable directory".to_string()]
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::FileSystem
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Configuration validation failed: {error_count} errors")]
    ValidationFailed {
        errors: Vec<String>,
        error_count: usize,
    },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(reason) => format!("Configuration file has invalid format: {reason}"),
            Self::NotFound { path } => format!("Configuration file not found: {path}"),
            Self::ValidationFailed { errors, .. } => format!(
                "Configuration validation failed with {} errors: {}",
                errors.len(),
                errors.join(", ")
            ),
        }
    }

    fn context(&self) -> Option<String> {
        Some("Configuration is read from .pipeforge/config.toml (TOML format).".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec!["Check the file for TOML syntax errors".to_string()],
            Self::NotFound { .. } => {
                vec!["Remove the explicit path to fall back to discovery".to_string()]
            }
            Self::ValidationFailed { .. } => {
                vec!["Fix the listed values or delete them to use defaults".to_string()]
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Unknown
    }
}

impl UserFriendlyError for PipelineError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(e) => e.user_message(),
            Self::Phase(e) => e.user_message(),
            Self::Collaborator(e) => e.user_message(),
            Self::Snapshot(e) => e.user_message(),
            Self::Io(e) => format!("File system operation failed: {e}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(e) => e.context(),
            Self::Phase(e) => e.context(),
            Self::Collaborator(e) => e.context(),
            Self::Snapshot(e) => e.context(),
            Self::Io(e) => Some(format!("io error kind: {:?}", e.kind())),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(e) => e.suggestions(),
            Self::Phase(e) => e.suggestions(),
            Self::Collaborator(e) => e.suggestions(),
            Self::Snapshot(e) => e.suggestions(),
            Self::Io(_) => vec!["Check permissions and free space on the target volume".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(e) => e.category(),
            Self::Phase(e) => e.category(),
            Self::Collaborator(e) => e.category(),
            Self::Snapshot(e) => e.category(),
            Self::Io(e) => ErrorCategory::from_io_kind(e.kind()),
        }
    }
}

impl PipelineError {
    /// The structured category this failure is classified under.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        UserFriendlyError::category(self)
    }

    /// Get a user-friendly error message with context and actionable suggestions.
    ///
    /// ```text
    /// Error: <user message>
    ///
    /// Context: <context if available>
    ///
    /// Suggestions:
    ///   • <suggestion 1>
    /// ```
    #[must_use]
    pub fn display_for_user(&self) -> String {
        let mut output = format!("Error: {}\n", self.user_message());

        if let Some(ctx) = self.context() {
            output.push_str(&format!("\nContext: {ctx}\n"));
        }

        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for suggestion in suggestions {
                output.push_str(&format!("  • {suggestion}\n"));
            }
        }

        crate::redaction::redact(&output)
    }
}

/// Flatten an error and its `source()` chain into one line per cause.
#[must_use]
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}
