//! JWT expiry decoding and classification.
//!
//! Tokens are never verified locally; only the `exp` claim is read so the
//! daemon can decide when to refresh. The hub remains the authority.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a stored token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenState {
    /// No token stored.
    Missing,
    /// Not a JWT, or no `exp` claim.
    Invalid,
    Expired,
    Valid,
    /// The token record on disk could not be read.
    Corrupted,
}

/// Classification result for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub state: TokenState,
    pub reason: Option<String>,
    /// Unix seconds.
    pub expires_at: Option<i64>,
    pub seconds_to_expiry: Option<i64>,
    pub expiring_soon: Option<bool>,
    pub present: bool,
    /// Unix seconds when the status was computed.
    pub checked_at: i64,
}

impl TokenStatus {
    /// Status for a token record that failed to load.
    pub fn corrupted(reason: impl Into<String>) -> Self {
        Self {
            state: TokenState::Corrupted,
            reason: Some(reason.into()),
            expires_at: None,
            seconds_to_expiry: None,
            expiring_soon: None,
            present: false,
            checked_at: unix_now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state == TokenState::Valid
    }

    /// Valid and outside the leeway window.
    pub fn is_fresh(&self) -> bool {
        self.is_valid() && self.expiring_soon != Some(true)
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    #[serde(default)]
    exp: Option<f64>,
}

/// Decode the `exp` claim (unix seconds) of a JWT without verifying it.
#[allow(clippy::cast_possible_truncation)]
pub fn decode_expiry(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next()) {
        (Some(h), Some(p)) if !h.is_empty() && !p.is_empty() => p,
        _ => return None,
    };
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
    claim.exp.filter(|e| e.is_finite()).map(|e| e.floor() as i64)
}

/// Classify a token against the current time.
pub fn classify(token: Option<&str>, leeway_secs: u64) -> TokenStatus {
    classify_at(token, leeway_secs, unix_now())
}

/// Classify a token against an explicit `now` (unix seconds).
pub fn classify_at(token: Option<&str>, leeway_secs: u64, now: i64) -> TokenStatus {
    let base = TokenStatus {
        state: TokenState::Missing,
        reason: None,
        expires_at: None,
        seconds_to_expiry: None,
        expiring_soon: None,
        present: false,
        checked_at: now,
    };

    let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
        return TokenStatus {
            reason: Some("token not present".into()),
            ..base
        };
    };

    let Some(expires_at) = decode_expiry(token) else {
        return TokenStatus {
            state: TokenState::Invalid,
            reason: Some("unable to decode expiry claim".into()),
            present: true,
            ..base
        };
    };

    let seconds_to_expiry = expires_at - now;
    if seconds_to_expiry <= 0 {
        return TokenStatus {
            state: TokenState::Expired,
            reason: Some("token expired".into()),
            expires_at: Some(expires_at),
            seconds_to_expiry: Some(seconds_to_expiry),
            expiring_soon: Some(true),
            present: true,
            ..base
        };
    }

    let leeway = i64::try_from(leeway_secs).unwrap_or(i64::MAX);
    let expiring_soon = seconds_to_expiry <= leeway;
    TokenStatus {
        state: TokenState::Valid,
        reason: expiring_soon.then(|| "token expiring soon".to_string()),
        expires_at: Some(expires_at),
        seconds_to_expiry: Some(seconds_to_expiry),
        expiring_soon: Some(expiring_soon),
        present: true,
        ..base
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
