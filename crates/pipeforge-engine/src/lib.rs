//! Execution engine for pipeforge.
//!
//! - [`state_machine`]: runs one phase against a [`WorkflowContext`]
//! - [`parallel`]: fans GENERATION out into independent tasks
//! - [`classifier`]: maps a failure to a recovery strategy
//! - [`recovery`]: the five recovery procedures
//! - [`orchestrator`]: the run loop tying them together
//!
//! [`WorkflowContext`]: pipeforge_phase_api::WorkflowContext

pub mod classifier;
pub mod orchestrator;
pub mod parallel;
pub mod recovery;
pub mod state_machine;
pub mod status;
pub mod synthesis;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use classifier::{Classification, ErrorClassifier, FailureClass};
pub use orchestrator::{Orchestrator, WorkflowRequest, derive_workflow_id};
pub use parallel::{Aggregate, ParallelTaskCoordinator, TaskError, TaskOutcome};
pub use recovery::{RecoveryOutcome, RecoveryStrategyExecutor, RetryPolicy};
pub use state_machine::PhaseStateMachine;
pub use status::WorkflowSummary;
