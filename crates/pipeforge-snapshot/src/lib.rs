//! StateSnapshotStore: everything a run persists lives under its run directory.
//!
//! All JSON is JCS-canonical (RFC 8785) and every write goes through
//! `pipeforge_utils::atomic_write`, so concurrent readers never observe a torn
//! file.

mod emit;
mod model;
mod writer;

pub use emit::{canonical_json, context_digest};
pub use model::SnapshotStore;
