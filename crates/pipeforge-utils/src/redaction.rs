//! Secret masking for messages that end up in persisted error logs.
//!
//! Collaborator failures frequently echo request headers or connection strings.
//! Everything written into an `ErrorRecord` or shown to the user passes through
//! [`redact`] first.

use regex::{Regex, RegexSet};
use std::sync::LazyLock;

/// A named secret shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretPatternDef {
    pub id: &'static str,
    pub regex: &'static str,
}

pub static DEFAULT_SECRET_PATTERNS: &[SecretPatternDef] = &[
    SecretPatternDef {
        id: "aws_access_key",
        regex: r"AKIA[0-9A-Z]{16}",
    },
    SecretPatternDef {
        id: "bearer_token",
        regex: r"Bearer [A-Za-z0-9._-]{20,}",
    },
    SecretPatternDef {
        id: "api_key_header",
        regex: r"(?i)(?:x-api-key|api-key|apikey|api_key)[=:]\s*[A-Za-z0-9_-]{16,}",
    },
    SecretPatternDef {
        id: "password_assignment",
        regex: r"(?i)(?:password|passwd|secret)[=:]\s*[^\s;,&]+",
    },
    SecretPatternDef {
        id: "sk_key",
        regex: r"sk-[A-Za-z0-9_-]{20,}",
    },
    SecretPatternDef {
        id: "github_token",
        regex: r"gh[pousr]_[A-Za-z0-9]{36}",
    },
    SecretPatternDef {
        id: "url_credentials",
        regex: r"[a-z][a-z0-9+.-]*://[^:/\s]+:[^@/\s]+@",
    },
];

static SECRET_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new(DEFAULT_SECRET_PATTERNS.iter().map(|p| p.regex))
        .unwrap_or_else(|_| RegexSet::empty())
});

static SECRET_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DEFAULT_SECRET_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p.regex).ok())
        .collect()
});

/// Replacement text for every masked span.
pub const REDACTED: &str = "***";

/// Whether `text` contains anything that looks like a secret.
#[must_use]
pub fn contains_secret(text: &str) -> bool {
    SECRET_SET.is_match(text)
}

/// Mask every secret-shaped span in `text`.
#[must_use]
pub fn redact(text: &str) -> String {
    if !contains_secret(text) {
        return text.to_string();
    }

    SECRET_REGEXES
        .iter()
        .fold(text.to_string(), |acc, re| re.replace_all(&acc, REDACTED).into_owned())
}
