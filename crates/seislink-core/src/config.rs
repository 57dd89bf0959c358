//! Configuration resolution for seislink.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Settings file (JSON, every field optional)
//! 3. Environment variables (including the legacy names used by older
//!    deployments of the sender backend)
//! 4. CLI arguments (applied by the daemon binary, highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Floor applied to periodic task intervals.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Complete seislink configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub streamer: StreamerConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Location of the local JSON documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir().unwrap_or_else(|| PathBuf::from("localDBs")),
        }
    }
}

/// Where the host publishes station metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub settings_root: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            settings_root: PathBuf::from("/opt/settings"),
        }
    }
}

/// Remote hub endpoint selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Use the production host over HTTPS instead of the dev host.
    pub production: bool,
    pub prod_host: String,
    pub dev_host: String,
    pub dev_port: u16,
    /// Path of the token refresh endpoint, relative to the base URL.
    pub refresh_path: String,
    pub request_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            production: false,
            prod_host: String::new(),
            dev_host: "127.0.0.1".to_string(),
            dev_port: 5000,
            refresh_path: "/device/token/refresh".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl HubConfig {
    /// Base URL of the hub without a trailing slash.
    ///
    /// A host that already carries a scheme is used verbatim.
    pub fn base_url(&self) -> String {
        let raw = if self.production {
            if self.prod_host.contains("://") {
                self.prod_host.clone()
            } else {
                format!("https://{}", self.prod_host)
            }
        } else if self.dev_host.contains("://") {
            self.dev_host.clone()
        } else {
            format!("http://{}:{}", self.dev_host, self.dev_port)
        };
        raw.trim_end_matches('/').to_string()
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Token lifetime policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Leeway used when an on-demand caller asks for a usable access token.
    pub access_leeway_secs: u64,
    /// Interval between proactive refresh checks.
    pub refresh_check_interval_secs: u64,
    /// Leeway used by the proactive refresh check.
    pub proactive_leeway_secs: u64,
    /// Leeway applied to the refresh token (informational, it lives longer).
    pub refresh_token_leeway_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_leeway_secs: 5 * 60,
            refresh_check_interval_secs: 15 * 60,
            proactive_leeway_secs: 10 * 60,
            refresh_token_leeway_secs: 24 * 60 * 60,
        }
    }
}

impl TokenConfig {
    /// Never shorter than [`MIN_INTERVAL`].
    pub fn refresh_check_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_check_interval_secs).max(MIN_INTERVAL)
    }
}

/// How the external streaming binary is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    pub bin: PathBuf,
    /// Pass `verbosity_flag` as the first argument.
    pub verbose: bool,
    pub verbosity_flag: String,
    /// Local ring buffer the binary reads from (`host:port`).
    pub source_addr: String,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            bin: PathBuf::from("slink2dali"),
            verbose: true,
            verbosity_flag: "-v".to_string(),
            source_addr: "docker-host:18000".to_string(),
        }
    }
}

/// Supervision and reconciliation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Lines kept per endpoint for the current attempt.
    pub log_capacity: usize,
    /// Consecutive failures tolerated before an endpoint is reported as `Error`
    /// and the long backoff applies.
    pub retry_window: u32,
    pub short_backoff_secs: u64,
    pub long_backoff_secs: u64,
    /// Grace period between SIGTERM and SIGKILL.
    pub terminate_timeout_secs: u64,
    /// Warn when an attempt has produced no healthy signal after this long.
    pub health_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    /// Treat any non-empty, non-retry output line as a healthy signal.
    pub permissive_fallback: bool,
}

impl SupervisorConfig {
    /// Never shorter than [`MIN_INTERVAL`].
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs).max(MIN_INTERVAL)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            log_capacity: 20,
            retry_window: 3,
            short_backoff_secs: 30,
            long_backoff_secs: 2 * 60,
            terminate_timeout_secs: 5,
            health_timeout_secs: 60,
            reconcile_interval_secs: 60,
            permissive_fallback: true,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// A missing settings file is not an error; an unreadable or malformed one is.
pub fn load_config(settings_path: Option<&Path>) -> Result<AgentConfig> {
    let mut config = match settings_path {
        Some(path) if path.exists() => load_config_file(path)?,
        _ => AgentConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

impl AgentConfig {
    /// Reject values the daemon cannot run with.
    ///
    /// Zero backoffs are allowed and mean an immediate respawn.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            (
                "tokens.refresh_check_interval_secs",
                self.tokens.refresh_check_interval_secs,
            ),
            (
                "supervisor.reconcile_interval_secs",
                self.supervisor.reconcile_interval_secs,
            ),
        ];
        for (name, secs) in intervals {
            if secs == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.streamer.bin.as_os_str().is_empty() {
            return Err(Error::Config("streamer.bin must not be empty".into()));
        }
        Ok(())
    }
}

/// Default store directory: `<data dir>/seislink` (e.g. `~/.local/share/seislink`).
pub fn default_store_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("seislink"))
}

fn load_config_file(path: &Path) -> Result<AgentConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply environment overrides using `lookup` to read variables.
///
/// New names take precedence over the legacy ones when both are set.
pub fn apply_env_overrides(config: &mut AgentConfig, lookup: impl Fn(&str) -> Option<String>) {
    let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(k));

    if let Some(val) = first(&["SEISLINK_STORE_DIR", "LOCALDBS_DIRECTORY"]) {
        config.store.dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("SEISLINK_SETTINGS_ROOT") {
        config.identity.settings_root = PathBuf::from(val);
    }

    if let Some(val) = first(&["SEISLINK_STREAMER_BIN", "SLINK2DALIPATH"]) {
        config.streamer.bin = PathBuf::from(val);
    }
    if let Some(val) = lookup("SEISLINK_STREAMER_VERBOSITY") {
        config.streamer.verbosity_flag = val;
    }
    if let Some(val) = lookup("SEISLINK_STREAMER_VERBOSE").and_then(|v| parse_bool(&v)) {
        config.streamer.verbose = val;
    }
    if let Some(val) = lookup("SEISLINK_SOURCE_ADDR") {
        config.streamer.source_addr = val;
    }

    if let Some(val) = lookup("SEISLINK_HUB_PRODUCTION").and_then(|v| parse_bool(&v)) {
        config.hub.production = val;
    } else if let Some(env) = lookup("NODE_ENV") {
        config.hub.production = env == "production";
    }
    if let Some(val) = first(&["SEISLINK_HUB_PROD_HOST", "W1_PROD_IP"]) {
        config.hub.prod_host = val;
    }
    if let Some(val) = first(&["SEISLINK_HUB_DEV_HOST", "W1_DEV_IP"]) {
        config.hub.dev_host = val;
    }
    if let Some(n) = first(&["SEISLINK_HUB_DEV_PORT", "W1_DEV_PORT"]).and_then(|v| v.parse().ok())
    {
        config.hub.dev_port = n;
    }
    if let Some(val) = lookup("SEISLINK_REFRESH_PATH") {
        config.hub.refresh_path = val;
    }

    if let Some(n) = lookup("SEISLINK_REFRESH_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        config.tokens.refresh_check_interval_secs = n;
    }
    if let Some(n) = lookup("SEISLINK_REFRESH_LEEWAY_SECS").and_then(|v| v.parse().ok()) {
        config.tokens.proactive_leeway_secs = n;
    }
    if let Some(n) = lookup("SEISLINK_REFRESH_TOKEN_LEEWAY_SECS").and_then(|v| v.parse().ok()) {
        config.tokens.refresh_token_leeway_secs = n;
    }
    if let Some(n) = lookup("SEISLINK_RECONCILE_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        config.supervisor.reconcile_interval_secs = n;
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
