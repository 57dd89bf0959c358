//! Daemon error types.

use crate::auth::TokenStatus;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification for callers that map errors onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RelinkRequired,
    RemoteRejected,
    SpawnFailed,
    MissingIdentifiers,
    Transport,
    NotLinked,
    InvalidEndpoint,
    UnknownEndpoint,
    DuplicateEndpoint,
    AlreadyStreaming,
    Storage,
    Config,
}

/// Errors surfaced by the token manager, hub client and supervisor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The refresh token is unusable or the hub refused it; the user must relink.
    #[error("Relink required: {reason}")]
    RelinkRequired {
        reason: String,
        /// Refresh token classification at the time of the decision.
        refresh_status: Option<Box<TokenStatus>>,
    },

    #[error("Hub rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    #[error("Failed to spawn streamer: {reason}")]
    SpawnFailed { reason: String },

    #[error("Device identifiers unavailable: {0}")]
    MissingIdentifiers(String),

    #[error("Hub transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed hub response: {0}")]
    MalformedResponse(String),

    #[error("Device is not linked")]
    NotLinked,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Endpoint already configured: {0}")]
    DuplicateEndpoint(String),

    #[error("Endpoint already streaming: {0}")]
    AlreadyStreaming(String),

    #[error(transparent)]
    Store(#[from] seislink_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn relink(reason: impl Into<String>, refresh_status: Option<TokenStatus>) -> Self {
        Self::RelinkRequired {
            reason: reason.into(),
            refresh_status: refresh_status.map(Box::new),
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RelinkRequired { .. } => ErrorKind::RelinkRequired,
            Self::RemoteRejected { .. } => ErrorKind::RemoteRejected,
            Self::SpawnFailed { .. } => ErrorKind::SpawnFailed,
            Self::MissingIdentifiers(_) => ErrorKind::MissingIdentifiers,
            Self::Transport(_) | Self::MalformedResponse(_) => ErrorKind::Transport,
            Self::NotLinked => ErrorKind::NotLinked,
            Self::InvalidEndpoint(_) => ErrorKind::InvalidEndpoint,
            Self::UnknownEndpoint(_) => ErrorKind::UnknownEndpoint,
            Self::DuplicateEndpoint(_) => ErrorKind::DuplicateEndpoint,
            Self::AlreadyStreaming(_) => ErrorKind::AlreadyStreaming,
            Self::Store(_) => ErrorKind::Storage,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub const fn is_relink_required(&self) -> bool {
        matches!(self, Self::RelinkRequired { .. })
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn relink_is_detected_by_kind() {
        let err = Error::relink("refresh token expired", None);
        assert!(err.is_relink_required());
        assert_eq!(err.kind(), ErrorKind::RelinkRequired);
        assert_eq!(err.to_string(), "Relink required: refresh token expired");
    }

    #[test]
    fn remote_rejection_is_not_relink() {
        let err = Error::RemoteRejected {
            status: 502,
            message: "Bad Gateway".into(),
        };
        assert!(!err.is_relink_required());
        assert_eq!(err.kind(), ErrorKind::RemoteRejected);
    }

    #[test]
    fn malformed_response_counts_as_transport() {
        let err = Error::MalformedResponse("missing accessToken".into());
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn store_errors_convert() {
        let err: Error = seislink_core::Error::Config("bad".into()).into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
