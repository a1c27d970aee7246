//! Configuration for pipeforge runs.
//!
//! Values come from `.pipeforge/config.toml` (found by searching upward from a
//! start directory) layered over built-in defaults. See [`Config`].

mod config;

pub use config::*;
