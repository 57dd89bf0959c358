//! Request and response bodies exchanged with the hub.

use serde::{Deserialize, Deserializer, Serialize};

use seislink_core::DeviceInfo;

/// Hub responses are sometimes wrapped as `{ "status", "message", "payload" }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Envelope<T> {
    Wrapped { payload: T },
    Bare(T),
}

impl<T> Envelope<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            Self::Wrapped { payload } | Self::Bare(payload) => payload,
        }
    }
}

/// Body of `POST /device/link`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub username: String,
    pub password: String,
    pub role: &'static str,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub elevation: Option<f64>,
    pub mac_address: String,
    pub stream_id: String,
}

/// Body of `POST /device/unlink`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlinkRequest {
    pub mac_address: String,
    pub stream_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Tokens (and optionally device metadata) issued by link or refresh.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub device_info: Option<DeviceInfo>,
}

/// Candidate sink advertised by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingserverHost {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub ringserver_url: Option<String>,
    #[serde(default, deserialize_with = "port_from_number_or_string")]
    pub ringserver_port: Option<u16>,
}

impl RingserverHost {
    /// `host:port` address usable as a streaming target.
    pub fn address(&self) -> Option<String> {
        let url = self.ringserver_url.as_deref()?.trim();
        let host = url
            .split_once("://")
            .map_or(url, |(_, rest)| rest)
            .trim_end_matches('/');
        if host.is_empty() {
            return None;
        }
        Some(match self.ringserver_port {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }
}

fn port_from_number_or_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u16>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Hub error bodies carry a human-readable `message`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}
