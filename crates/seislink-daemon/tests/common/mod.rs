//! Shared fixtures for the daemon integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{EncodingKey, Header};
use serde_json::json;

use seislink_core::config::TokenConfig;
use seislink_core::{AgentConfig, DeviceIdentity, FileStore, TokenRecord};
use seislink_daemon::DeviceAgent;
use seislink_daemon::auth::TokenManager;
use seislink_daemon::hub::HubClient;

pub const REFRESH_PATH: &str = "/device/token/refresh";

pub fn now() -> i64 {
    i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs(),
    )
    .unwrap()
}

/// HS256 token whose `exp` is `exp_offset_secs` from now.
pub fn mint(subject: &str, exp_offset_secs: i64) -> String {
    jsonwebtoken::encode(
        &Header::default(),
        &json!({ "sub": subject, "exp": now() + exp_offset_secs }),
        &EncodingKey::from_secret(b"hub-test-secret"),
    )
    .unwrap()
}

pub fn hub(base_url: &str) -> HubClient {
    HubClient::with_base_url(base_url, REFRESH_PATH, Duration::from_secs(5)).unwrap()
}

/// Hub client for tests that must never reach the network.
pub fn offline_hub() -> HubClient {
    hub("http://127.0.0.1:9")
}

pub fn store(dir: &Path) -> Arc<FileStore> {
    Arc::new(FileStore::open(dir).unwrap())
}

pub fn save_tokens(store: &FileStore, access: Option<String>, refresh: Option<String>) {
    store
        .save_tokens(&TokenRecord {
            access_token: access,
            refresh_token: refresh,
            ..TokenRecord::default()
        })
        .unwrap();
}

/// Access token valid for an hour, refresh token for 30 days.
pub fn save_valid_tokens(store: &FileStore) -> String {
    let access = mint("access", 3600);
    save_tokens(store, Some(access.clone()), Some(mint("refresh", 30 * 86_400)));
    access
}

pub fn token_manager(store: Arc<FileStore>, hub: HubClient) -> TokenManager {
    TokenManager::new(store, hub, TokenConfig::default())
}

pub fn identity() -> DeviceIdentity {
    DeviceIdentity {
        network: Some("AM".into()),
        station: Some("R3B2D".into()),
        mac_address: Some("b8:27:eb:00:00:01".into()),
        longitude: Some(121.07),
        latitude: Some(14.65),
        elevation: Some(12.0),
    }
}

pub fn agent(
    store: Arc<FileStore>,
    identity: DeviceIdentity,
    hub: HubClient,
    config: &AgentConfig,
) -> DeviceAgent {
    DeviceAgent::from_parts(store, Arc::new(identity), hub, config)
}

/// Write an executable shell script.
#[cfg(unix)]
pub fn script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
