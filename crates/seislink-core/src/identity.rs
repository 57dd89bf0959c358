//! Host device identity.
//!
//! Raspberry Shake hosts publish station metadata under a settings root
//! (`/opt/settings` on a real device):
//!
//! - `sys/eth-mac.txt`, `sys/NET.txt`, `sys/STN.txt`
//! - `station.xml` with `<Longitude>`, `<Latitude>` and `<Elevation>`
//! - `sys/longitude.txt`, `sys/latitude.txt`, `sys/elevation.txt` as per-field
//!   fallbacks when the XML is missing or lacks a value
//!
//! Identity is read through [`IdentityCache`] so the hot path (spawning a
//! streamer) never touches the filesystem after the first read.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::store::DeviceInfo;

static LONGITUDE_RE: LazyLock<Regex> = LazyLock::new(|| coordinate_re("Longitude"));
static LATITUDE_RE: LazyLock<Regex> = LazyLock::new(|| coordinate_re("Latitude"));
static ELEVATION_RE: LazyLock<Regex> = LazyLock::new(|| coordinate_re("Elevation"));

fn coordinate_re(tag: &str) -> Regex {
    Regex::new(&format!(r"(?i)<{tag}>\s*([-+]?\d+\.?\d*)\s*</{tag}>"))
        .expect("static regex is valid")
}

/// Station identity of the host device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceIdentity {
    pub network: Option<String>,
    pub station: Option<String>,
    pub mac_address: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub elevation: Option<f64>,
}

/// Identity snapshot as reported to status callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    pub network: Option<String>,
    pub station: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub elevation: Option<f64>,
    pub stream_id: Option<String>,
    pub source: &'static str,
}

impl DeviceIdentity {
    /// Ringserver stream selector: `{NET}_{STA}_.*/MSEED`.
    pub fn stream_id(&self) -> Option<String> {
        self.net_sta().map(|ns| format!("{ns}_.*/MSEED"))
    }

    /// `{NET}_{STA}`, the streamer's `-S` argument.
    pub fn net_sta(&self) -> Option<String> {
        match (self.network.as_deref(), self.station.as_deref()) {
            (Some(net), Some(sta)) => Some(format!("{net}_{sta}")),
            _ => None,
        }
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            network: self.network.clone(),
            station: self.station.clone(),
            longitude: self.longitude,
            latitude: self.latitude,
            elevation: self.elevation,
            stream_id: self.stream_id(),
            source: "rshake-config",
        }
    }

    /// Convert into the persisted device info shape.
    pub fn to_device_info(&self) -> DeviceInfo {
        DeviceInfo {
            network: self.network.clone(),
            station: self.station.clone(),
            longitude: self.longitude,
            latitude: self.latitude,
            elevation: self.elevation,
            stream_id: self.stream_id(),
            ..Default::default()
        }
    }
}

/// Something that can produce the device identity.
pub trait IdentitySource: Send + Sync {
    fn read(&self) -> DeviceIdentity;
}

/// A fixed identity, for hosts configured out of band and for tests.
impl IdentitySource for DeviceIdentity {
    fn read(&self) -> DeviceIdentity {
        self.clone()
    }
}

/// Identity read from a Raspberry Shake settings tree.
#[derive(Debug, Clone)]
pub struct HostSettings {
    root: PathBuf,
}

impl HostSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_text(&self, relative: &str) -> Option<String> {
        let path = self.root.join(relative);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Host setting unavailable");
                None
            }
        }
    }

    fn read_number(&self, relative: &str) -> Option<f64> {
        self.read_text(relative).and_then(|s| s.parse().ok())
    }

    fn read_coordinates(&self) -> (Option<f64>, Option<f64>, Option<f64>) {
        let xml = self.read_text("station.xml").unwrap_or_default();
        let from_xml = |re: &Regex| {
            re.captures(&xml)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        };
        (
            from_xml(&LONGITUDE_RE).or_else(|| self.read_number("sys/longitude.txt")),
            from_xml(&LATITUDE_RE).or_else(|| self.read_number("sys/latitude.txt")),
            from_xml(&ELEVATION_RE).or_else(|| self.read_number("sys/elevation.txt")),
        )
    }
}

impl IdentitySource for HostSettings {
    fn read(&self) -> DeviceIdentity {
        let (longitude, latitude, elevation) = self.read_coordinates();
        let identity = DeviceIdentity {
            network: self.read_text("sys/NET.txt"),
            station: self.read_text("sys/STN.txt"),
            mac_address: self.read_text("sys/eth-mac.txt"),
            longitude,
            latitude,
            elevation,
        };
        if identity.net_sta().is_none() {
            warn!(root = %self.root.display(), "Host network/station codes not found");
        }
        identity
    }
}

/// Read-through cache in front of an [`IdentitySource`].
pub struct IdentityCache {
    source: Arc<dyn IdentitySource>,
    cached: RwLock<Option<DeviceIdentity>>,
}

impl std::fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("cached", &self.cached)
            .finish_non_exhaustive()
    }
}

impl IdentityCache {
    pub fn new(source: Arc<dyn IdentitySource>) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
        }
    }

    /// Cached identity, reading the source on first use.
    pub fn get(&self) -> DeviceIdentity {
        if let Some(identity) = self
            .cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return identity.clone();
        }
        self.refresh()
    }

    /// Re-read the source and replace the cached value.
    pub fn refresh(&self) -> DeviceIdentity {
        let identity = self.source.read();
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
        identity
    }
}
