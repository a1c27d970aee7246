#![allow(dead_code)]

use std::sync::Arc;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use pipeforge::clock::ManualClock;
use pipeforge::{Config, Orchestrator, SnapshotStore, WorkflowContext, WorkflowRequest};
use pipeforge_utils::test_support::utf8_temp_dir;

pub(crate) use pipeforge::engine::testing::{Fakes, default_analysis};

/// One orchestrator wired to scripted collaborators, a manual clock and a
/// throwaway state root.
pub(crate) struct Harness {
    _temp: TempDir,
    pub(crate) root: Utf8PathBuf,
    pub(crate) fakes: Fakes,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) orchestrator: Orchestrator,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub(crate) fn with_config(mut config: Config) -> Self {
        let (temp, root) = utf8_temp_dir();
        config.orchestrator.state_root = root.join("runs");
        let fakes = Fakes::new();
        let clock = Arc::new(ManualClock::at_epoch());
        let orchestrator = Orchestrator::with_clock(config, fakes.collaborators(), clock.clone());
        Self {
            _temp: temp,
            root,
            fakes,
            clock,
            orchestrator,
        }
    }

    pub(crate) fn request(&self, text: &str) -> WorkflowRequest {
        WorkflowRequest::new(self.root.join("project"), text)
    }

    pub(crate) fn start(&self) -> WorkflowContext {
        self.orchestrator.start(&self.request("agents for a rust service"))
    }

    pub(crate) async fn run(&self) -> WorkflowContext {
        self.orchestrator.run(self.request("agents for a rust service")).await
    }

    pub(crate) fn store(ctx: &WorkflowContext) -> SnapshotStore {
        SnapshotStore::for_context(ctx)
    }
}
