use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::fs;

use pipeforge_phase_api::{
    ArtifactContent, ArtifactRef, Backup, ErrorRecord, RecoveryState, WorkflowContext,
};
use pipeforge_utils::atomic_write::write_file_atomic;
use pipeforge_utils::error::SnapshotError;
use pipeforge_utils::paths::{sanitize_component, timestamp_slug};

use super::SnapshotStore;
use crate::emit::canonical_json;

fn write_failed(path: &Utf8Path, e: impl std::fmt::Display) -> SnapshotError {
    SnapshotError::WriteFailed {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

fn read_failed(path: &Utf8Path, e: impl std::fmt::Display) -> SnapshotError {
    SnapshotError::ReadFailed {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

impl SnapshotStore {
    /// Persist the latest context snapshot, replacing the previous one.
    pub fn write_snapshot(&self, ctx: &WorkflowContext) -> Result<Utf8PathBuf, SnapshotError> {
        let path = self.context_path();
        let bytes = canonical_json(ctx, "workflow context")?;
        write_file_atomic(&path, &bytes).map_err(|e| write_failed(&path, e))?;
        Ok(path)
    }

    pub fn read_snapshot(&self) -> Result<Option<WorkflowContext>, SnapshotError> {
        read_json_if_exists(&self.context_path())
    }

    /// Append an ErrorRecord to the log. Existing entries are never replaced.
    pub fn append_error(&self, record: &ErrorRecord) -> Result<Utf8PathBuf, SnapshotError> {
        let path = self.keyed_path(&self.errors_dir(), record.timestamp);
        let bytes = canonical_json(record, "error record")?;
        write_file_atomic(&path, &bytes).map_err(|e| write_failed(&path, e))?;
        tracing::debug!(path = %path, failure_id = %record.failure_id, "Error record written");
        Ok(path)
    }

    /// Error log in chronological order.
    pub fn list_errors(&self) -> Result<Vec<ErrorRecord>, SnapshotError> {
        read_json_dir(&self.errors_dir())
    }

    /// Take a backup of `ctx` before a destructive recovery step.
    pub fn write_backup(
        &self,
        ctx: &WorkflowContext,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Backup, SnapshotError> {
        let path = self.keyed_path(&self.backups_dir(), at);
        let context_bytes = canonical_json(ctx, "workflow context")?;
        let context: serde_json::Value =
            serde_json::from_slice(&context_bytes).map_err(|e| SnapshotError::SerializeFailed {
                what: "workflow context".to_string(),
                reason: e.to_string(),
            })?;

        let backup = Backup {
            timestamp: at,
            reason: reason.to_string(),
            path: path.clone(),
            digest: blake3::hash(&context_bytes).to_hex().to_string(),
            context,
        };

        let bytes = canonical_json(&backup, "backup")?;
        write_file_atomic(&path, &bytes).map_err(|e| write_failed(&path, e))?;
        tracing::info!(path = %path, reason = %reason, "Backup written");
        Ok(backup)
    }

    /// Backups in chronological order.
    pub fn list_backups(&self) -> Result<Vec<Backup>, SnapshotError> {
        read_json_dir(&self.backups_dir())
    }

    /// Write `recovery.json` and its rendering `RECOVERY.md`.
    pub fn write_recovery_state(
        &self,
        state: &RecoveryState,
        workflow_id: &str,
    ) -> Result<Utf8PathBuf, SnapshotError> {
        let path = self.recovery_path();
        let bytes = canonical_json(state, "recovery state")?;
        write_file_atomic(&path, &bytes).map_err(|e| write_failed(&path, e))?;

        let md_path = self.recovery_instructions_path();
        write_file_atomic(&md_path, state.render_markdown(workflow_id).as_bytes())
            .map_err(|e| write_failed(&md_path, e))?;
        Ok(path)
    }

    pub fn read_recovery_state(&self) -> Result<Option<RecoveryState>, SnapshotError> {
        read_json_if_exists(&self.recovery_path())
    }

    /// Write the emergency configuration to its fixed location.
    pub fn write_minimal_config(
        &self,
        config: &serde_json::Value,
    ) -> Result<Utf8PathBuf, SnapshotError> {
        let path = self.minimal_config_path();
        let bytes = canonical_json(config, "minimal configuration")?;
        write_file_atomic(&path, &bytes).map_err(|e| write_failed(&path, e))?;
        Ok(path)
    }

    /// Store an artifact body under `dir` and return a reference to it.
    pub fn write_artifact(
        &self,
        dir: &Utf8Path,
        artifact: &ArtifactContent,
    ) -> Result<ArtifactRef, SnapshotError> {
        let path = dir.join(sanitize_component(&artifact.file_name));
        write_file_atomic(&path, artifact.body.as_bytes()).map_err(|e| write_failed(&path, e))?;
        Ok(ArtifactRef::new(artifact.name.clone(), path))
    }

    /// Write any serializable value as canonical JSON at `path`.
    pub fn write_json<T: serde::Serialize>(
        &self,
        path: &Utf8Path,
        value: &T,
        what: &str,
    ) -> Result<(), SnapshotError> {
        let bytes = canonical_json(value, what)?;
        write_file_atomic(path, &bytes).map_err(|e| write_failed(path, e))?;
        Ok(())
    }

    /// `<dir>/<timestamp>-<seq>.json`, skipping names already taken.
    fn keyed_path(&self, dir: &Utf8Path, at: DateTime<Utc>) -> Utf8PathBuf {
        let slug = timestamp_slug(at);
        loop {
            let candidate = dir.join(format!("{slug}-{:04}.json", self.next_seq()));
            if !candidate.exists() {
                return candidate;
            }
        }
    }
}

fn read_json_if_exists<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, SnapshotError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(read_failed(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| read_failed(path, e))
}

/// Every `*.json` in `dir`, sorted by file name (timestamp order).
fn read_json_dir<T: DeserializeOwned>(dir: &Utf8Path) -> Result<Vec<T>, SnapshotError> {
    let entries = match dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(read_failed(dir, e)),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| read_failed(dir, e))?;
        if entry.file_name().ends_with(".json") {
            paths.push(entry.path().to_path_buf());
        }
    }
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let content = fs::read_to_string(path).map_err(|e| read_failed(path, e))?;
            serde_json::from_str(&content).map_err(|e| read_failed(path, e))
        })
        .collect()
}
