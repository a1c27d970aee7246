//! Run-directory layout.
//!
//! Each run owns `<state_root>/<workflow_id>-<started_at>/`. Nothing outside
//! that directory is written by the orchestrator, so concurrent runs never
//! need to coordinate.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};

use crate::types::PhaseId;

pub const CONTEXT_FILE: &str = "context.json";
pub const ERRORS_DIR: &str = "errors";
pub const BACKUPS_DIR: &str = "backups";
pub const RECOVERY_FILE: &str = "recovery.json";
pub const RECOVERY_INSTRUCTIONS_FILE: &str = "RECOVERY.md";
pub const WORK_DIR: &str = "work";
pub const DEGRADED_DIR: &str = "degraded";
pub const MINIMAL_DIR: &str = "minimal";
pub const MINIMAL_CONFIG_FILE: &str = "pipeforge.minimal.json";
pub const FALLBACK_ARTIFACT_FILE: &str = "general-purpose-agent.md";

/// Timestamp format used in directory and file names. Sorts lexically.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

#[must_use]
pub fn timestamp_slug(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Directory owned by one run.
#[must_use]
pub fn run_dir(state_root: &Utf8Path, workflow_id: &str, started_at: DateTime<Utc>) -> Utf8PathBuf {
    state_root.join(format!("{}-{}", sanitize_component(workflow_id), timestamp_slug(started_at)))
}

/// Working area of a phase inside a run directory.
#[must_use]
pub fn phase_work_dir(run_dir: &Utf8Path, phase: PhaseId) -> Utf8PathBuf {
    run_dir.join(WORK_DIR).join(phase.as_str())
}

/// Task-scoped output directory for one generation sub-task.
///
/// The submission index leads the name, so two tasks never share a directory
/// even when their names sanitize to the same component.
#[must_use]
pub fn task_work_dir(run_dir: &Utf8Path, index: usize, task: &str) -> Utf8PathBuf {
    phase_work_dir(run_dir, PhaseId::Generation).join(format!("{index:02}-{}", sanitize_component(task)))
}

/// Fixed location of the emergency configuration written by minimal recovery.
#[must_use]
pub fn minimal_config_path(run_dir: &Utf8Path) -> Utf8PathBuf {
    run_dir.join(MINIMAL_DIR).join(MINIMAL_CONFIG_FILE)
}

/// Keep a single path component: alphanumerics, `-`, `_` and `.` survive,
/// everything else becomes `_`.
#[must_use]
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `create_dir_all` that ignores benign races with concurrent creators.
pub fn ensure_dir_all<P: AsRef<std::path::Path>>(p: P) -> std::io::Result<()> {
    match std::fs::create_dir_all(&p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_dir_is_namespaced_by_id_and_start() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap();
        let dir = run_dir(Utf8Path::new("/state"), "wf-1", at);
        assert_eq!(dir, Utf8PathBuf::from("/state/wf-1-20260301T123005.000Z"));
    }

    #[test]
    fn test_sanitize_component_blocks_traversal() {
        assert_eq!(sanitize_component("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_component("reviewer"), "reviewer");
        assert_eq!(sanitize_component(".."), "_");
    }

    #[test]
    fn test_task_work_dir_is_under_generation() {
        let dir = task_work_dir(Utf8Path::new("/run"), 2, "tester");
        assert_eq!(dir, Utf8PathBuf::from("/run/work/generation/02-tester"));
    }

    #[test]
    fn test_task_work_dirs_stay_distinct_for_colliding_names() {
        let run = Utf8Path::new("/run");
        assert_ne!(task_work_dir(run, 0, "api/reviewer"), task_work_dir(run, 1, "api_reviewer"));
        assert_ne!(task_work_dir(run, 0, "docs"), task_work_dir(run, 1, "docs"));
    }

    #[test]
    fn test_timestamp_slug_sorts_lexically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 9, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        assert!(timestamp_slug(a) < timestamp_slug(b));
    }
}
