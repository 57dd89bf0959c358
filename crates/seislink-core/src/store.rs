//! JSON local file store.
//!
//! Four small documents live in the store directory:
//!
//! | file                   | contents                                  |
//! |------------------------|-------------------------------------------|
//! | `token.json`           | [`TokenRecord`]                           |
//! | `servers.json`         | desired endpoint list ([`ServerEntry`])   |
//! | `deviceInfo.json`      | `{ "deviceInfo": DeviceInfo }`            |
//! | `linkCredentials.json` | [`LinkCredentials`] from the last link    |
//!
//! Writes go through a temporary file followed by a rename so a crash never
//! leaves a half-written document behind.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

const TOKEN_FILE: &str = "token.json";
const SERVERS_FILE: &str = "servers.json";
const DEVICE_INFO_FILE: &str = "deviceInfo.json";
const LINK_CREDENTIALS_FILE: &str = "linkCredentials.json";

/// Persisted access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds from the access token's `exp` claim.
    #[serde(default)]
    pub access_token_expires_at: Option<i64>,
    /// Unix seconds from the refresh token's `exp` claim.
    #[serde(default)]
    pub refresh_token_expires_at: Option<i64>,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "sensor".to_string()
}

impl Default for TokenRecord {
    fn default() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            access_token_expires_at: None,
            refresh_token_expires_at: None,
            role: default_role(),
        }
    }
}

impl TokenRecord {
    /// Access token, treating an empty string as absent.
    pub fn access(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Refresh token, treating an empty string as absent.
    pub fn refresh(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// One desired data sink.
///
/// Older `servers.json` files used `institutionName`/`hostName` and `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(default, alias = "institutionName", alias = "hostName")]
    pub label: String,
    #[serde(alias = "url")]
    pub address: String,
}

impl ServerEntry {
    pub fn new(label: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            address: address.into(),
        }
    }
}

/// Device metadata as last reported by the hub or read from the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub station: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub stream_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceInfoDocument {
    #[serde(default)]
    device_info: DeviceInfo,
}

/// Credentials and coordinates supplied on the last successful link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCredentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub elevation: Option<f64>,
    #[serde(default = "default_force_relink")]
    pub force_relink: bool,
}

const fn default_force_relink() -> bool {
    true
}

impl Default for LinkCredentials {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            longitude: None,
            latitude: None,
            elevation: None,
            force_relink: true,
        }
    }
}

/// Accept coordinates stored either as numbers or as numeric strings.
fn lenient_f64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<f64>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Directory-backed store for the agent's JSON documents.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store, creating the directory and seeding any missing document.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        };
        std::fs::create_dir_all(&store.dir)?;
        store.seed(TOKEN_FILE, &TokenRecord::default())?;
        store.seed(SERVERS_FILE, &Vec::<ServerEntry>::new())?;
        store.seed(DEVICE_INFO_FILE, &DeviceInfoDocument::default())?;
        store.seed(LINK_CREDENTIALS_FILE, &LinkCredentials::default())?;
        info!(dir = %store.dir.display(), "Local file store ready");
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_tokens(&self) -> Result<TokenRecord> {
        self.read_json(TOKEN_FILE)
    }

    pub fn save_tokens(&self, record: &TokenRecord) -> Result<()> {
        self.write_json(TOKEN_FILE, record)
    }

    /// Reset the token record to all-null.
    pub fn clear_tokens(&self) -> Result<()> {
        self.save_tokens(&TokenRecord::default())
    }

    pub fn load_servers(&self) -> Result<Vec<ServerEntry>> {
        self.read_json(SERVERS_FILE)
    }

    pub fn save_servers(&self, servers: &[ServerEntry]) -> Result<()> {
        self.write_json(SERVERS_FILE, servers)
    }

    pub fn load_device_info(&self) -> Result<DeviceInfo> {
        self.read_json::<DeviceInfoDocument>(DEVICE_INFO_FILE)
            .map(|doc| doc.device_info)
    }

    pub fn save_device_info(&self, info: &DeviceInfo) -> Result<()> {
        self.write_json(
            DEVICE_INFO_FILE,
            &DeviceInfoDocument {
                device_info: info.clone(),
            },
        )
    }

    pub fn clear_device_info(&self) -> Result<()> {
        self.save_device_info(&DeviceInfo::default())
    }

    pub fn load_link_credentials(&self) -> Result<LinkCredentials> {
        self.read_json(LINK_CREDENTIALS_FILE)
    }

    pub fn save_link_credentials(&self, credentials: &LinkCredentials) -> Result<()> {
        self.write_json(LINK_CREDENTIALS_FILE, credentials)
    }

    fn seed<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        if path.exists() {
            return Ok(());
        }
        self.write_json(name, value)?;
        debug!(file = name, "Seeded store document");
        Ok(())
    }

    /// Read a document; a missing file yields the type's default.
    fn read_json<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&content).map_err(|e| Error::Corrupted {
            path,
            reason: e.to_string(),
        })
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}
