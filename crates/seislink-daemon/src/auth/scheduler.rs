//! Proactive access-token refresh.
//!
//! Runs [`TokenManager::refresh_if_expiring_soon`] on a fixed interval so a
//! valid token is normally already stored when a streamer is (re)spawned.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use seislink_core::config::MIN_INTERVAL;

use super::manager::{RefreshOutcome, TokenManager};

/// Spawn the periodic refresh task. It stops when `shutdown` changes.
///
/// The first check runs immediately so a token that expired while the device
/// was powered off is replaced at boot. `interval` is floored at
/// [`MIN_INTERVAL`].
pub fn spawn_refresh_scheduler(
    tokens: Arc<TokenManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = interval.max(MIN_INTERVAL);
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "Token refresh scheduler started"
        );
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match tokens.refresh_if_expiring_soon().await {
                        RefreshOutcome::Refreshed => {
                            info!("Access token proactively refreshed");
                        }
                        RefreshOutcome::NotNeeded => {
                            debug!("Access token check: OK (not near expiry)");
                        }
                        RefreshOutcome::RelinkRequired(reason) => {
                            debug!(%reason, "Skipping proactive refresh; relink required");
                        }
                        RefreshOutcome::Failed(e) => {
                            warn!(error = %e, "Proactive token refresh failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Token refresh scheduler shutting down");
                    return;
                }
            }
        }
    })
}
