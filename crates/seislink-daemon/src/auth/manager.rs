//! Token lifecycle manager.
//!
//! Owns the access/refresh token pair: answers "give me a usable access
//! token", refreshes against the hub when needed, and persists the result.
//! Refreshes are serialized so concurrent callers share one hub round-trip.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use seislink_core::config::TokenConfig;
use seislink_core::{FileStore, TokenRecord};

use super::token::{TokenStatus, classify, decode_expiry};
use crate::error::{Error, Result};
use crate::hub::{HubClient, TokenGrant};

/// Hub statuses that mean the refresh token itself was refused.
const RELINK_STATUSES: [u16; 4] = [400, 401, 403, 409];

/// Result of a proactive refresh check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new access token was obtained and persisted.
    Refreshed,
    /// The access token is valid beyond the proactive leeway.
    NotNeeded,
    /// The refresh token is unusable; nothing was sent to the hub.
    RelinkRequired(String),
    /// The hub could not be reached or answered with an unexpected error.
    Failed(String),
}

/// Access and refresh token classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenStatusReport {
    #[serde(rename = "tokenStatus")]
    pub access: TokenStatus,
    #[serde(rename = "refreshTokenStatus")]
    pub refresh: TokenStatus,
}

pub struct TokenManager {
    store: Arc<FileStore>,
    hub: HubClient,
    policy: TokenConfig,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("store", &self.store.dir())
            .field("hub", &self.hub.base_url())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(store: Arc<FileStore>, hub: HubClient, policy: TokenConfig) -> Self {
        Self {
            store,
            hub,
            policy,
            refresh_lock: Mutex::new(()),
        }
    }

    pub const fn hub(&self) -> &HubClient {
        &self.hub
    }

    /// Load the token record; `Err` carries the corruption reason.
    fn load_record(&self) -> std::result::Result<TokenRecord, String> {
        self.store.load_tokens().map_err(|e| e.to_string())
    }

    /// Current classification of both tokens.
    pub fn token_status(&self) -> TokenStatusReport {
        match self.load_record() {
            Ok(record) => TokenStatusReport {
                access: classify(record.access(), self.policy.access_leeway_secs),
                refresh: classify(record.refresh(), self.policy.refresh_token_leeway_secs),
            },
            Err(reason) => TokenStatusReport {
                access: TokenStatus::corrupted(reason.clone()),
                refresh: TokenStatus::corrupted(reason),
            },
        }
    }

    /// Whether an access token is stored at all.
    pub fn has_access_token(&self) -> bool {
        self.load_record().is_ok_and(|r| r.access().is_some())
    }

    /// Return the stored access token when it is valid beyond the short
    /// leeway, otherwise refresh.
    pub async fn ensure_valid_access_token(&self) -> Result<String> {
        if let Ok(record) = self.load_record()
            && let Some(token) = record.access()
            && classify(Some(token), self.policy.access_leeway_secs).is_fresh()
        {
            return Ok(token.to_string());
        }
        self.refresh_auth_token().await
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Fails with [`Error::RelinkRequired`] without contacting the hub when
    /// the refresh token is missing, undecodable, expired or unreadable.
    pub async fn refresh_auth_token(&self) -> Result<String> {
        let observed = self
            .load_record()
            .ok()
            .and_then(|r| r.access().map(str::to_owned));

        let _guard = self.refresh_lock.lock().await;

        let record = match self.load_record() {
            Ok(record) => record,
            Err(reason) => {
                warn!(%reason, "Token record unreadable");
                return Err(Error::relink(
                    format!("token record unreadable: {reason}"),
                    Some(TokenStatus::corrupted(reason)),
                ));
            }
        };

        // Another caller refreshed while we waited for the lock.
        if let Some(current) = record.access()
            && observed.as_deref() != Some(current)
            && classify(Some(current), self.policy.access_leeway_secs).is_fresh()
        {
            debug!("Reusing access token refreshed by a concurrent caller");
            return Ok(current.to_string());
        }

        let refresh_status = classify(record.refresh(), self.policy.refresh_token_leeway_secs);
        let Some(refresh_token) = record.refresh().filter(|_| refresh_status.is_valid()) else {
            let reason = format!(
                "refresh token {}",
                refresh_status.reason.as_deref().unwrap_or("unusable")
            );
            info!(state = ?refresh_status.state, "Refresh token unusable, relink required");
            return Err(Error::relink(reason, Some(refresh_status)));
        };

        let grant = match self.hub.refresh(refresh_token).await {
            Ok(grant) => grant,
            Err(Error::RemoteRejected { status, message }) if RELINK_STATUSES.contains(&status) => {
                warn!(status, %message, "Hub rejected refresh token");
                return Err(Error::relink(
                    format!("hub rejected refresh token ({status}): {message}"),
                    Some(refresh_status),
                ));
            }
            Err(e) => return Err(e),
        };

        let access = self.persist_grant(grant, Some(refresh_token))?;
        info!("Access token refreshed");
        Ok(access)
    }

    /// Refresh when the access token is missing, unusable or within the
    /// proactive leeway. Never returns an error.
    pub async fn refresh_if_expiring_soon(&self) -> RefreshOutcome {
        let status = match self.load_record() {
            Ok(record) => classify(record.access(), self.policy.proactive_leeway_secs),
            Err(reason) => TokenStatus::corrupted(reason),
        };
        if status.is_fresh() {
            return RefreshOutcome::NotNeeded;
        }

        debug!(
            state = ?status.state,
            seconds_to_expiry = ?status.seconds_to_expiry,
            "Proactive refresh due"
        );
        match self.refresh_auth_token().await {
            Ok(_) => RefreshOutcome::Refreshed,
            Err(Error::RelinkRequired { reason, .. }) => RefreshOutcome::RelinkRequired(reason),
            Err(e) => RefreshOutcome::Failed(e.to_string()),
        }
    }

    /// Persist a link or refresh grant, keeping `previous_refresh` when the
    /// hub did not rotate the refresh token. Returns the new access token.
    pub fn persist_grant(
        &self,
        grant: TokenGrant,
        previous_refresh: Option<&str>,
    ) -> Result<String> {
        let access = grant
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::MalformedResponse("response lacks accessToken".into()))?;
        let refresh = grant
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_owned));

        let record = TokenRecord {
            access_token_expires_at: decode_expiry(&access),
            refresh_token_expires_at: refresh.as_deref().and_then(decode_expiry),
            access_token: Some(access.clone()),
            refresh_token: refresh,
            ..TokenRecord::default()
        };
        self.store.save_tokens(&record)?;
        if let Some(info) = grant.device_info {
            self.store.save_device_info(&info)?;
        }
        Ok(access)
    }

    /// Forget both tokens.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.store.clear_tokens()?;
        Ok(())
    }
}
