//! Hub REST client.
//!
//! Uses reqwest to call the few hub endpoints the daemon depends on: device
//! link/unlink, token refresh and the ringserver host listing.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use seislink_core::config::HubConfig;

use super::types::{
    Envelope, ErrorBody, LinkRequest, RefreshRequest, RingserverHost, TokenGrant, UnlinkRequest,
};
use crate::error::{Error, Result};

/// Message reported when the hub already holds a link for this device.
pub const ALREADY_LINKED_MESSAGE: &str =
    "Device already linked in Earthquake Hub. Use Reset Link or contact support to move it.";

/// Hub REST client.
#[derive(Debug, Clone)]
pub struct HubClient {
    http: reqwest::Client,
    base_url: String,
    refresh_path: String,
}

impl HubClient {
    /// Create a client for the hub selected by `config`.
    pub fn new(config: &HubConfig) -> Result<Self> {
        Self::with_base_url(
            &config.base_url(),
            &config.refresh_path,
            config.request_timeout(),
        )
    }

    /// Create a client against an explicit base URL.
    pub fn with_base_url(base_url: &str, refresh_path: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() || !base_url.contains("://") {
            return Err(Error::Config(format!("invalid hub base URL: {base_url:?}")));
        }

        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        let refresh_path = if refresh_path.starts_with('/') {
            refresh_path.to_string()
        } else {
            format!("/{refresh_path}")
        };
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            refresh_path,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-success response into [`Error::RemoteRejected`].
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());
        Err(Error::RemoteRejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let bytes = resp.bytes().await?;
        serde_json::from_slice::<Envelope<T>>(&bytes)
            .map(Envelope::into_inner)
            .map_err(|e| Error::MalformedResponse(e.to_string()))
    }

    /// `POST /device/link`.
    pub async fn link(&self, request: &LinkRequest) -> Result<TokenGrant> {
        let url = self.api_url("/device/link");
        debug!(%url, stream_id = %request.stream_id, "Requesting device link");
        let resp = self.http.post(&url).json(request).send().await?;
        let resp = match Self::check_status(resp).await {
            Err(Error::RemoteRejected { status, .. }) if status == StatusCode::CONFLICT.as_u16() => {
                warn!("Hub reports the device is already linked");
                return Err(Error::RemoteRejected {
                    status,
                    message: ALREADY_LINKED_MESSAGE.to_string(),
                });
            }
            other => other?,
        };
        Self::decode(resp).await
    }

    /// `POST /device/unlink` with bearer authentication.
    pub async fn unlink(&self, access_token: &str, request: &UnlinkRequest) -> Result<()> {
        let url = self.api_url("/device/unlink");
        debug!(%url, stream_id = %request.stream_id, "Requesting device unlink");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(request)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    /// `POST <refresh path>` exchanging a refresh token for a new grant.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let url = self.api_url(&self.refresh_path);
        debug!(%url, "Requesting token refresh");
        let resp = self
            .http
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        Self::decode(resp).await
    }

    /// `GET /accounts/ringserver-hosts`.
    pub async fn ringserver_hosts(&self) -> Result<Vec<RingserverHost>> {
        let url = self.api_url("/accounts/ringserver-hosts");
        let resp = self.http.get(&url).send().await?;
        let resp = Self::check_status(resp).await?;
        Self::decode(resp).await
    }
}
