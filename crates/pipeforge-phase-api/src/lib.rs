//! Shared contract between the pipeforge orchestrator and its collaborators.
//!
//! This crate holds the types every other layer agrees on:
//! - the collaborator traits and their data ([`collaborators`])
//! - the per-run [`WorkflowContext`] and its [`PhaseResult`]s ([`context`])
//! - failure and recovery records ([`records`])

pub mod collaborators;
pub mod context;
pub mod records;

pub use collaborators::{
    Analyzer, ArtifactContent, ArtifactGenerator, Collaborators, DeployedPaths, Deployer,
    ProjectAnalysis, RankedTemplateList, TemplateRef, TemplateSelector, ValidationReport,
    Validator,
};
pub use context::{ArtifactRef, PhaseOutputs, PhaseResult, WorkflowContext};
pub use records::{Backup, ErrorRecord, PhaseFailure, RecoveryState, Strategy};
pub use pipeforge_utils::types::{ExecutionMode, PhaseId, PhaseStatus, TerminalStatus};
