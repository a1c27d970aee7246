//! Configuration model with discovery and validation.
//!
//! ```toml
//! [orchestrator]
//! state_root = ".pipeforge/runs"
//! phase_timeout_secs = 600
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 1000
//!
//! [parallel]
//! required_tasks = ["orchestrator", "reviewer", "tester"]
//! max_failed_tasks = 2
//! max_concurrency = 4
//!
//! [classifier]
//! transient_markers = ["upstream hiccup"]
//! filesystem_markers = []
//! ```

mod discovery;
mod model;
mod validation;

pub use model::*;
