//! ErrorClassifier: maps a phase failure to a recovery strategy.
//!
//! Classification is a first-match walk over a fixed rule table. The first
//! two rules look at the structured [`ErrorCategory`] a collaborator attached
//! and, failing that, at marker substrings in the redacted message. The
//! remaining rules look at which phases have failed.
//!
//! | # | Rule | Strategy |
//! |---|------|----------|
//! | 1 | transient I/O category or marker | `retry_phase` |
//! | 2 | filesystem category or marker | `rollback_and_retry` |
//! | 3 | failure in `requirements` or `analysis` | `minimal_recovery` |
//! | 4 | exactly one failed phase, `deployment` or `validation` | `graceful_degradation` |
//! | 5 | more than one failed phase | `partial_recovery` |
//! | 6 | anything else | `minimal_recovery` |
//!
//! A message carrying both a transient and a filesystem marker is therefore
//! retried: table order is the only tie-breaker.

use regex::{RegexSet, RegexSetBuilder};
use serde::Serialize;
use std::collections::BTreeSet;

use pipeforge_config::ClassifierConfig;
use pipeforge_phase_api::{PhaseFailure, PhaseId, Strategy, WorkflowContext};
use pipeforge_utils::error::ErrorCategory;

/// Built-in markers for transient network and I/O trouble.
pub const DEFAULT_TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "connection aborted",
    "network",
    "temporarily unavailable",
    "try again",
    "econnreset",
    "etimedout",
    "rate limit",
    "broken pipe",
    "dns",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
];

/// Built-in markers for permission and path problems.
pub const DEFAULT_FILESYSTEM_MARKERS: &[&str] = &[
    "permission denied",
    "access denied",
    "read-only file system",
    "no such file or directory",
    "not a directory",
    "is a directory",
    "no space left",
    "disk full",
    "eacces",
    "eperm",
    "enoent",
    "erofs",
    "path not found",
    "operation not permitted",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    TransientIoError,
    FileSystemError,
    CriticalEarlyFailure,
    LatePhaseFailure,
    MultiPhaseFailure,
    UnclassifiedError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Matcher {
    TransientIo,
    FileSystem,
    EarlyPhase,
    SingleLatePhase,
    MultiplePhases,
    Fallback,
}

/// One row of the rule table.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationRule {
    pub name: &'static str,
    pub class: FailureClass,
    pub strategy: Strategy,
    matcher: Matcher,
}

const RULES: [ClassificationRule; 6] = [
    ClassificationRule {
        name: "transient_io",
        class: FailureClass::TransientIoError,
        strategy: Strategy::RetryPhase,
        matcher: Matcher::TransientIo,
    },
    ClassificationRule {
        name: "file_system",
        class: FailureClass::FileSystemError,
        strategy: Strategy::RollbackAndRetry,
        matcher: Matcher::FileSystem,
    },
    ClassificationRule {
        name: "critical_early_phase",
        class: FailureClass::CriticalEarlyFailure,
        strategy: Strategy::MinimalRecovery,
        matcher: Matcher::EarlyPhase,
    },
    ClassificationRule {
        name: "single_late_phase",
        class: FailureClass::LatePhaseFailure,
        strategy: Strategy::GracefulDegradation,
        matcher: Matcher::SingleLatePhase,
    },
    ClassificationRule {
        name: "multiple_phases",
        class: FailureClass::MultiPhaseFailure,
        strategy: Strategy::PartialRecovery,
        matcher: Matcher::MultiplePhases,
    },
    ClassificationRule {
        name: "fallback",
        class: FailureClass::UnclassifiedError,
        strategy: Strategy::MinimalRecovery,
        matcher: Matcher::Fallback,
    },
];

/// Result of [`ErrorClassifier::classify_with_rule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub rule: &'static str,
    /// Position of the matching rule in the table.
    pub index: usize,
    pub class: FailureClass,
    pub strategy: Strategy,
}

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    transient: RegexSet,
    filesystem: RegexSet,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

/// Compiled-size cap for one marker set; the regex crate's default.
const MARKER_SIZE_LIMIT: usize = 10 * (1 << 20);

fn marker_set(defaults: &[&str], extra: &[String]) -> RegexSet {
    marker_set_with_limit(defaults, extra, MARKER_SIZE_LIMIT)
}

/// Built-in plus configured markers. Configured markers that cannot be
/// compiled are dropped with a warning; the built-in ones are always kept.
fn marker_set_with_limit(defaults: &[&str], extra: &[String], size_limit: usize) -> RegexSet {
    let build = |markers: Vec<&str>| {
        RegexSetBuilder::new(
            markers
                .into_iter()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(regex::escape),
        )
        .case_insensitive(true)
        .size_limit(size_limit)
        .build()
    };

    let all = defaults.iter().copied().chain(extra.iter().map(String::as_str)).collect();
    match build(all) {
        Ok(set) => set,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring configured classifier markers");
            build(defaults.to_vec()).unwrap_or_else(|e| {
                tracing::error!(error = %e, "Built-in classifier markers failed to compile");
                RegexSet::empty()
            })
        }
    }
}

impl ErrorClassifier {
    /// Classifier with the built-in markers plus those from `config`.
    #[must_use]
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            transient: marker_set(DEFAULT_TRANSIENT_MARKERS, &config.transient_markers),
            filesystem: marker_set(DEFAULT_FILESYSTEM_MARKERS, &config.filesystem_markers),
        }
    }

    /// The rule table in evaluation order.
    #[must_use]
    pub fn rules() -> &'static [ClassificationRule] {
        &RULES
    }

    #[must_use]
    pub fn classify(&self, failure: &PhaseFailure, ctx: &WorkflowContext) -> Strategy {
        self.classify_with_rule(failure, ctx).strategy
    }

    #[must_use]
    pub fn classify_with_rule(&self, failure: &PhaseFailure, ctx: &WorkflowContext) -> Classification {
        let failed = failed_set(failure, ctx);
        // The fallback rule always matches, so the search cannot come up empty.
        let index = RULES
            .iter()
            .position(|rule| self.matches(rule.matcher, failure, &failed))
            .unwrap_or(RULES.len() - 1);
        let rule = &RULES[index];

        Classification {
            rule: rule.name,
            index,
            class: rule.class,
            strategy: rule.strategy,
        }
    }

    /// Indices of every rule that matches, in table order.
    #[must_use]
    pub fn matching_rules(&self, failure: &PhaseFailure, ctx: &WorkflowContext) -> Vec<usize> {
        let failed = failed_set(failure, ctx);
        RULES
            .iter()
            .enumerate()
            .filter(|(_, rule)| self.matches(rule.matcher, failure, &failed))
            .map(|(i, _)| i)
            .collect()
    }

    fn matches(&self, matcher: Matcher, failure: &PhaseFailure, failed: &BTreeSet<PhaseId>) -> bool {
        match matcher {
            Matcher::TransientIo => {
                failure.category == ErrorCategory::TransientIo
                    || self.mentions(&self.transient, failure)
            }
            Matcher::FileSystem => {
                failure.category == ErrorCategory::FileSystem
                    || self.mentions(&self.filesystem, failure)
            }
            Matcher::EarlyPhase => failure.phase.is_early(),
            Matcher::SingleLatePhase => {
                failed.len() == 1 && failed.iter().all(PhaseId::is_late)
            }
            Matcher::MultiplePhases => failed.len() > 1,
            Matcher::Fallback => true,
        }
    }

    fn mentions(&self, markers: &RegexSet, failure: &PhaseFailure) -> bool {
        markers.is_match(&failure.message) || failure.chain.iter().any(|line| markers.is_match(line))
    }
}

/// Phases currently `Failed` plus the phase of the failure itself.
fn failed_set(failure: &PhaseFailure, ctx: &WorkflowContext) -> BTreeSet<PhaseId> {
    let mut failed: BTreeSet<PhaseId> = ctx.failed_phases().into_iter().collect();
    failed.insert(failure.phase);
    failed
}
