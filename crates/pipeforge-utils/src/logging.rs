//! Structured logging for pipeforge runs.
//!
//! Every event emitted by the orchestrator carries `workflow_id` and, where it
//! applies, `phase`, `strategy` and `duration_ms` fields. Messages that may
//! contain collaborator output are redacted before they are logged.

use std::io::IsTerminal;
use tracing::{Level, error, info, span, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::redaction::redact;

fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `verbose` selects between
/// `pipeforge=debug` with span close events and a compact `pipeforge=info`.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("pipeforge=debug,info")
            } else {
                EnvFilter::try_new("pipeforge=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_color())
        .with_target(verbose)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_span_events(if verbose { FmtSpan::CLOSE } else { FmtSpan::NONE })
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()?;

    Ok(())
}

/// Span covering one run.
#[must_use]
pub fn workflow_span(workflow_id: &str) -> tracing::Span {
    span!(Level::INFO, "workflow", workflow_id = %workflow_id)
}

/// Span covering one phase attempt.
#[must_use]
pub fn phase_span(workflow_id: &str, phase: &str, attempt: u32) -> tracing::Span {
    span!(
        Level::INFO,
        "phase",
        workflow_id = %workflow_id,
        phase = %phase,
        attempt = attempt,
    )
}

pub fn log_phase_start(workflow_id: &str, phase: &str, mode: &str) {
    info!(
        workflow_id = %workflow_id,
        phase = %phase,
        mode = %mode,
        "Starting phase"
    );
}

pub fn log_phase_complete(workflow_id: &str, phase: &str, duration_ms: u128) {
    info!(
        workflow_id = %workflow_id,
        phase = %phase,
        duration_ms = %duration_ms,
        "Phase completed"
    );
}

/// Log a phase failure. The message is redacted first.
pub fn log_phase_error(workflow_id: &str, phase: &str, category: &str, message: &str) {
    error!(
        workflow_id = %workflow_id,
        phase = %phase,
        category = %category,
        error = %redact(message),
        "Phase failed"
    );
}

pub fn log_recovery_start(workflow_id: &str, phase: &str, strategy: &str) {
    warn!(
        workflow_id = %workflow_id,
        phase = %phase,
        strategy = %strategy,
        "Starting recovery"
    );
}

pub fn log_recovery_complete(workflow_id: &str, strategy: &str, final_status: &str) {
    info!(
        workflow_id = %workflow_id,
        strategy = %strategy,
        final_status = %final_status,
        "Recovery finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_do_not_panic_without_subscriber() {
        let span = workflow_span("wf-1");
        let _guard = span.enter();
        log_phase_start("wf-1", "analysis", "normal");
        log_phase_complete("wf-1", "analysis", 12);
        log_phase_error("wf-1", "analysis", "transient_io", "password=hunter2");
        log_recovery_start("wf-1", "analysis", "retry_phase");
        log_recovery_complete("wf-1", "retry_phase", "COMPLETED");
        let _ = phase_span("wf-1", "generation", 2);
    }

    #[test]
    fn test_init_tracing_twice_reports_error() {
        let first = init_tracing(false);
        let second = init_tracing(true);
        // Only one global subscriber can be installed per process.
        assert!(first.is_err() || second.is_err());
    }
}
