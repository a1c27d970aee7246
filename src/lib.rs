//! pipeforge - phase-based generation pipeline with guaranteed-terminal recovery
//!
//! A run moves a [`WorkflowContext`] through seven phases:
//!
//! ```text
//! requirements -> analysis -> template_selection -> generation
//!     -> configuration_merge -> deployment -> validation
//! ```
//!
//! Generation fans out into one task per selected template. When a phase
//! fails, its error is logged, classified by a fixed rule table and handed to
//! one of five recovery strategies. Every run ends in exactly one of
//! `COMPLETED`, `COMPLETED_DEGRADED` or `COMPLETED_MINIMAL`; a run never ends
//! without usable output.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pipeforge::{Collaborators, Config, Orchestrator, WorkflowRequest};
//!
//! # async fn example(collaborators: Collaborators) {
//! let config = Config::discover().unwrap_or_default();
//! let orchestrator = Orchestrator::new(config, collaborators);
//! let ctx = orchestrator
//!     .run(WorkflowRequest::new("/path/to/project", "agents for a rust service"))
//!     .await;
//! println!("{}", pipeforge::WorkflowSummary::from_context(&ctx).render());
//! # }
//! ```
//!
//! The collaborators (analyzer, template selector, generator, deployer,
//! validator) are async traits supplied by the embedding application.
//!
//! # On-disk layout
//!
//! Each run owns `<state_root>/<workflow_id>-<timestamp>/`, holding the
//! context snapshot, error records, backups, recovery instructions and phase
//! working areas. All JSON is emitted in JCS (RFC 8785) canonical form.

pub use pipeforge_config::{
    ClassifierConfig, Config, ConfigSource, OrchestratorConfig, ParallelConfig, RetryConfig,
};
pub use pipeforge_engine::{
    Classification, ErrorClassifier, FailureClass, Orchestrator, PhaseStateMachine,
    RecoveryOutcome, RecoveryStrategyExecutor, RetryPolicy, WorkflowRequest, WorkflowSummary,
};
pub use pipeforge_phase_api::{
    Analyzer, ArtifactContent, ArtifactGenerator, ArtifactRef, Backup, Collaborators,
    DeployedPaths, Deployer, ErrorRecord, ExecutionMode, PhaseFailure, PhaseId, PhaseResult,
    PhaseStatus, ProjectAnalysis, RankedTemplateList, RecoveryState, Strategy, TemplateRef,
    TemplateSelector, TerminalStatus, ValidationReport, Validator, WorkflowContext,
};
pub use pipeforge_snapshot::SnapshotStore;
pub use pipeforge_utils::error::{
    CollaboratorError, ConfigError, ErrorCategory, PhaseError, PipelineError, SnapshotError,
    UserFriendlyError,
};
pub use pipeforge_utils::logging::init_tracing;

#[doc(hidden)]
pub mod engine {
    pub use pipeforge_engine::*;
}

#[doc(hidden)]
pub use pipeforge_utils::clock;
