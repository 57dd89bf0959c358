//! Desired endpoint list reconciliation.

use std::collections::HashSet;

use tracing::{debug, info};

use seislink_core::ServerEntry;

use crate::stream::EndpointRegistry;

/// Changes applied by one [`reconcile`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn added_count(&self) -> usize {
        self.added.len()
    }

    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Make the registry hold exactly the addresses in `desired`.
///
/// Entries missing from `desired` are removed (stopping their streamers).
/// New addresses get a `NotStreaming` entry; nothing is spawned. An existing
/// entry without a label picks up the desired label. When an address appears
/// more than once the first occurrence wins. Entries with a blank address are
/// skipped.
pub async fn reconcile(registry: &EndpointRegistry, desired: &[ServerEntry]) -> ReconcileReport {
    let mut wanted: Vec<(&str, &str)> = Vec::with_capacity(desired.len());
    let mut seen = HashSet::new();
    for entry in desired {
        let address = entry.address.trim();
        if address.is_empty() {
            debug!(label = %entry.label, "Skipping desired entry without address");
            continue;
        }
        if seen.insert(address) {
            wanted.push((address, entry.label.trim()));
        }
    }

    let mut report = ReconcileReport::default();

    for address in registry.addresses().await {
        if !seen.contains(address.as_str()) && registry.remove(&address).await.is_some() {
            report.removed.push(address);
        }
    }

    for (address, label) in wanted {
        if registry.insert_if_absent(address, label).await {
            report.added.push(address.to_string());
        }
    }

    if report.is_noop() {
        debug!(endpoints = seen.len(), "Reconcile: no changes");
    } else {
        info!(
            added = report.added_count(),
            removed = report.removed_count(),
            "Reconciled endpoints"
        );
    }
    report
}
