//! Streamer output classification.
//!
//! The streaming binary reports its health only through free-form text. A
//! [`LineClassifier`] maps each stdout line to a [`LineSignal`].
//!
//! Vocabulary of [`KeywordClassifier`] (case-insensitive substring match,
//! checked in this order):
//!
//! | signal  | markers                                                                  |
//! |---------|--------------------------------------------------------------------------|
//! | error   | `error`, `unauthorized`, `forbidden`, `authentication failed`, `invalid token`, `token expired` |
//! | retry   | `retry`, `retrying`, `reconnect`, `connecting to` (neutral)              |
//! | healthy | `write_success`, `write_ok`, `connected to`, `keepalive`                 |
//!
//! With the permissive fallback enabled, any other non-empty line counts as
//! healthy. That keeps a chatty but working streamer green even when it never
//! prints an explicit success marker, at the cost of showing `Streaming` for
//! output that merely looks benign. The fallback no longer applies once the
//! attempt has seen an error line.

/// Classification of one output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSignal {
    /// The attempt has failed.
    Error,
    /// Explicit success or keep-alive marker.
    Healthy,
    /// Permissive fallback match.
    Progress,
    Neutral,
}

pub trait LineClassifier: Send + Sync {
    /// Classify `line`. `errored` is set once the current attempt has seen an
    /// error signal.
    fn classify(&self, line: &str, errored: bool) -> LineSignal;
}

const ERROR_MARKERS: &[&str] = &[
    "error",
    "unauthorized",
    "forbidden",
    "authentication failed",
    "invalid token",
    "token expired",
];

const RETRY_MARKERS: &[&str] = &["retry", "retrying", "reconnect", "connecting to"];

const HEALTHY_MARKERS: &[&str] = &["write_success", "write_ok", "connected to", "keepalive"];

/// Keyword-based classifier with an optional permissive fallback.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    permissive_fallback: bool,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(true)
    }
}

impl KeywordClassifier {
    pub const fn new(permissive_fallback: bool) -> Self {
        Self {
            permissive_fallback,
        }
    }
}

impl LineClassifier for KeywordClassifier {
    fn classify(&self, line: &str, errored: bool) -> LineSignal {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineSignal::Neutral;
        }
        let lower = trimmed.to_ascii_lowercase();
        let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

        if has(ERROR_MARKERS) {
            LineSignal::Error
        } else if has(RETRY_MARKERS) {
            LineSignal::Neutral
        } else if has(HEALTHY_MARKERS) {
            LineSignal::Healthy
        } else if self.permissive_fallback && !errored {
            LineSignal::Progress
        } else {
            LineSignal::Neutral
        }
    }
}
