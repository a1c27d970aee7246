use camino::{Utf8Path, Utf8PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use pipeforge_phase_api::WorkflowContext;
use pipeforge_utils::paths;

/// Reads and writes the durable state of one run.
#[derive(Debug)]
pub struct SnapshotStore {
    pub(super) run_dir: Utf8PathBuf,
    seq: AtomicU64,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(run_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Store rooted at the context's run directory.
    #[must_use]
    pub fn for_context(ctx: &WorkflowContext) -> Self {
        Self::new(ctx.run_dir.clone())
    }

    #[must_use]
    pub fn run_dir(&self) -> &Utf8Path {
        &self.run_dir
    }

    #[must_use]
    pub fn errors_dir(&self) -> Utf8PathBuf {
        self.run_dir.join(paths::ERRORS_DIR)
    }

    #[must_use]
    pub fn backups_dir(&self) -> Utf8PathBuf {
        self.run_dir.join(paths::BACKUPS_DIR)
    }

    #[must_use]
    pub fn context_path(&self) -> Utf8PathBuf {
        self.run_dir.join(paths::CONTEXT_FILE)
    }

    #[must_use]
    pub fn recovery_path(&self) -> Utf8PathBuf {
        self.run_dir.join(paths::RECOVERY_FILE)
    }

    #[must_use]
    pub fn recovery_instructions_path(&self) -> Utf8PathBuf {
        self.run_dir.join(paths::RECOVERY_INSTRUCTIONS_FILE)
    }

    #[must_use]
    pub fn minimal_config_path(&self) -> Utf8PathBuf {
        paths::minimal_config_path(&self.run_dir)
    }

    pub(super) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}
