//! Per-endpoint supervision state.

use std::collections::VecDeque;

use serde::Serialize;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Streaming state of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamStatus {
    #[serde(rename = "Not Streaming")]
    NotStreaming,
    Connecting,
    Streaming,
    Error,
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStreaming => "Not Streaming",
            Self::Connecting => "Connecting",
            Self::Streaming => "Streaming",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Registry entry for one configured sink.
#[derive(Debug)]
pub(crate) struct EndpointEntry {
    pub label: String,
    pub status: StreamStatus,
    pub retry_count: u32,
    pub logs: VecDeque<String>,
    log_capacity: usize,
    pub attempt_id: u64,
    /// Unix milliseconds of the most recent transition into `Streaming`.
    pub last_success_at: Option<i64>,
    pub supervision: Option<Supervision>,
}

/// Handle on one supervision task.
///
/// `cancel` stops the task and with it the live process. The task marks the
/// handle released once its streamer has been sent the termination signal,
/// or when it has no process left to signal.
#[derive(Debug, Clone, Default)]
pub struct Supervision {
    cancel: CancellationToken,
    released: CancellationToken,
}

impl Supervision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn release(&self) {
        self.released.cancel();
    }

    /// Releases the handle when dropped.
    #[must_use]
    pub fn release_on_drop(&self) -> DropGuard {
        self.released.clone().drop_guard()
    }

    /// Resolves once the task has released the handle.
    pub async fn released(&self) {
        self.released.cancelled().await;
    }
}

impl EndpointEntry {
    pub fn new(label: impl Into<String>, log_capacity: usize) -> Self {
        Self {
            label: label.into(),
            status: StreamStatus::NotStreaming,
            retry_count: 0,
            logs: VecDeque::with_capacity(log_capacity),
            log_capacity,
            attempt_id: 0,
            last_success_at: None,
            supervision: None,
        }
    }

    pub fn push_log(&mut self, line: String) {
        if self.log_capacity == 0 {
            return;
        }
        while self.logs.len() >= self.log_capacity {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }

    pub fn is_supervised(&self) -> bool {
        self.supervision
            .as_ref()
            .is_some_and(|supervision| !supervision.is_cancelled())
    }

    /// Cancel supervision, if any. Returns the handle when it was still live.
    pub fn stop(&mut self) -> Option<Supervision> {
        let supervision = self.supervision.take()?;
        if supervision.is_cancelled() {
            return None;
        }
        supervision.cancel();
        Some(supervision)
    }
}

/// Snapshot of an entry for status callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub address: String,
    pub label: String,
    pub status: StreamStatus,
    pub retry_count: u32,
    pub logs: Vec<String>,
    pub last_success_at: Option<i64>,
}

impl EndpointStatus {
    pub(crate) fn from_entry(address: &str, entry: &EndpointEntry) -> Self {
        Self {
            address: address.to_string(),
            label: entry.label.clone(),
            status: entry.status,
            retry_count: entry.retry_count,
            logs: entry.logs.iter().cloned().collect(),
            last_success_at: entry.last_success_at,
        }
    }
}
