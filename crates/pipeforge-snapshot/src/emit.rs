use serde::Serialize;

use pipeforge_phase_api::WorkflowContext;
use pipeforge_utils::error::SnapshotError;

/// Serialize `value` to JCS canonical JSON (RFC 8785).
pub fn canonical_json<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>, SnapshotError> {
    let json_value = serde_json::to_value(value).map_err(|e| SnapshotError::SerializeFailed {
        what: what.to_string(),
        reason: e.to_string(),
    })?;
    serde_json_canonicalizer::to_vec(&json_value).map_err(|e| SnapshotError::SerializeFailed {
        what: what.to_string(),
        reason: format!("canonicalization failed: {e}"),
    })
}

/// blake3 hex digest of the canonical form of `ctx`.
pub fn context_digest(ctx: &WorkflowContext) -> Result<String, SnapshotError> {
    let bytes = canonical_json(ctx, "workflow context")?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}
