//! In-memory endpoint registry.
//!
//! Every mutation for an address goes through the registry lock, and every
//! update coming from a spawn attempt is keyed by `(address, attempt_id)` so
//! output from a superseded attempt cannot touch the current one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::backoff::RetryPolicy;
use super::entry::{EndpointEntry, EndpointStatus, StreamStatus, Supervision};

/// Thread-safe registry of configured endpoints.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    entries: Arc<RwLock<HashMap<String, EndpointEntry>>>,
    log_capacity: usize,
    policy: RetryPolicy,
}

impl EndpointRegistry {
    pub fn new(log_capacity: usize, policy: RetryPolicy) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            log_capacity,
            policy,
        }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Create a `NotStreaming` entry unless one exists. An existing entry
    /// with an empty label takes `label`. Returns whether an entry was created.
    pub async fn insert_if_absent(&self, address: &str, label: &str) -> bool {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(address) {
            if entry.label.is_empty() && !label.is_empty() {
                entry.label = label.to_string();
            }
            return false;
        }
        entries.insert(
            address.to_string(),
            EndpointEntry::new(label, self.log_capacity),
        );
        drop(entries);
        debug!(%address, %label, "Endpoint registered");
        true
    }

    /// Delete an entry, cancelling its supervision. Returns `None` when the
    /// address is unknown, otherwise whether a live supervision was stopped.
    pub async fn remove(&self, address: &str) -> Option<bool> {
        let mut entry = self.entries.write().await.remove(address)?;
        let was_live = entry.stop().is_some();
        info!(%address, was_live, "Endpoint removed");
        Some(was_live)
    }

    /// Delete every entry. Returns the number removed and the supervisions
    /// that were still live.
    pub async fn remove_all(&self) -> (usize, Vec<Supervision>) {
        let drained: Vec<(String, EndpointEntry)> = self.entries.write().await.drain().collect();
        let count = drained.len();
        let live: Vec<Supervision> = drained
            .into_iter()
            .filter_map(|(_, mut entry)| entry.stop())
            .collect();
        info!(count, live = live.len(), "All endpoints removed");
        (count, live)
    }

    pub async fn addresses(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn status(&self, address: &str) -> Option<EndpointStatus> {
        self.entries
            .read()
            .await
            .get(address)
            .map(|entry| EndpointStatus::from_entry(address, entry))
    }

    /// Snapshot of every entry, ordered by address.
    pub async fn snapshot(&self) -> Vec<EndpointStatus> {
        let mut statuses: Vec<EndpointStatus> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(address, entry)| EndpointStatus::from_entry(address, entry))
            .collect();
        statuses.sort_by(|a, b| a.address.cmp(&b.address));
        statuses
    }

    /// Whether a supervision task currently owns the entry.
    pub async fn is_supervised(&self, address: &str) -> bool {
        self.entries
            .read()
            .await
            .get(address)
            .is_some_and(EndpointEntry::is_supervised)
    }

    /// Hand the entry to a new supervision task, cancelling any previous one.
    /// Returns `false` when the address is unknown.
    pub async fn install_supervision(&self, address: &str, supervision: Supervision) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(address) else {
            return false;
        };
        if entry.stop().is_some() {
            debug!(%address, "Replaced previous supervision");
        }
        entry.supervision = Some(supervision);
        true
    }

    /// Start a new spawn attempt: bump the attempt id, clear logs and show
    /// the endpoint as connecting. Returns the new attempt id, or `None` when
    /// the entry is gone or `supervision` has been cancelled.
    pub async fn begin_attempt(
        &self,
        address: &str,
        supervision: &Supervision,
    ) -> Option<u64> {
        let mut entries = self.entries.write().await;
        if supervision.is_cancelled() {
            return None;
        }
        let entry = entries.get_mut(address)?;
        entry.attempt_id += 1;
        entry.logs.clear();
        entry.status = StreamStatus::Connecting;
        Some(entry.attempt_id)
    }

    /// Append an output line to the attempt's log ring.
    pub async fn push_log(&self, address: &str, attempt: u64, line: String) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(address) {
            Some(entry) if entry.attempt_id == attempt => {
                entry.push_log(line);
                true
            }
            _ => false,
        }
    }

    /// Record a healthy signal. Returns whether the entry transitioned, in
    /// which case `last_success_at` is set to now.
    pub async fn mark_healthy(&self, address: &str, attempt: u64) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(address).filter(|e| e.attempt_id == attempt) else {
            return false;
        };
        if entry.status == StreamStatus::Streaming && entry.retry_count == 0 {
            return false;
        }
        entry.retry_count = 0;
        entry.status = StreamStatus::Streaming;
        entry.last_success_at = Some(unix_millis());
        true
    }

    /// Count a failed attempt. Returns the new retry count, or `None` if the
    /// attempt is stale or the entry is gone.
    pub async fn record_failure(&self, address: &str, attempt: u64) -> Option<u32> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(address)
            .filter(|e| e.attempt_id == attempt)?;
        entry.retry_count += 1;
        entry.status = self.policy.status_for(entry.retry_count);
        Some(entry.retry_count)
    }

    /// Whether the attempt is still current and its supervision still wanted.
    pub async fn expects_respawn(&self, address: &str, attempt: u64) -> bool {
        self.entries
            .read()
            .await
            .get(address)
            .is_some_and(|e| e.attempt_id == attempt && e.is_supervised())
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
