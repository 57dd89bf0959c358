//! Shared tracing/logging initialization.
//!
//! The daemon binary calls [`init_tracing`] once at startup. The filter covers
//! both seislink crates so store and identity diagnostics from the core library
//! show up at the same level as the daemon's own supervision logs.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Crate targets that receive the configured log level.
const SEISLINK_TARGETS: &[&str] = &["seislink_daemon", "seislink_core"];

/// Build the default filter directive for the given level,
/// e.g. `"seislink_daemon=info,seislink_core=info"`.
pub fn default_filter(level: &str) -> String {
    SEISLINK_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialise the global tracing subscriber.
///
/// * `level` -- log level applied to the seislink crates when `RUST_LOG` is
///   not set (e.g. `"info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init_tracing(level: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(level)),
    );
    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}
