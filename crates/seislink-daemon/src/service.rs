//! Device agent facade.
//!
//! [`DeviceAgent`] ties the store, host identity, hub client, token manager
//! and stream supervisor together and exposes the operations a local control
//! surface needs: link management, desired-list management, streaming and
//! status reports.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use seislink_core::{
    AgentConfig, DeviceInfo, FileStore, HostConfig, HostSettings, IdentityCache, IdentitySource,
    LinkCredentials, ServerEntry,
};

use crate::auth::{TokenManager, TokenStatus, TokenStatusReport, spawn_refresh_scheduler};
use crate::error::{Error, Result};
use crate::hub::{HubClient, LinkRequest, RingserverHost, UnlinkRequest};
use crate::reconcile::{ReconcileReport, reconcile};
use crate::stream::{EndpointStatus, StreamSupervisor, StreamerCommand};

/// Role the device registers with.
const DEVICE_ROLE: &str = "sensor";

/// Outcome of the hub side of an unlink. Local state is cleared in every case.
#[derive(Debug)]
pub enum RemoteUnlink {
    Succeeded,
    /// The hub call was made and failed.
    Failed(Error),
    /// The hub was not contacted: no usable access token or identifiers.
    Skipped(Error),
}

/// Result of [`DeviceAgent::unlink`].
#[derive(Debug)]
pub struct UnlinkReport {
    pub streams_stopped: usize,
    pub remote: RemoteUnlink,
}

impl UnlinkReport {
    pub const fn remote_succeeded(&self) -> bool {
        matches!(self.remote, RemoteUnlink::Succeeded)
    }

    pub const fn remote_error(&self) -> Option<&Error> {
        match &self.remote {
            RemoteUnlink::Succeeded => None,
            RemoteUnlink::Failed(e) | RemoteUnlink::Skipped(e) => Some(e),
        }
    }
}

/// Device metadata and link state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReport {
    pub device_info: DeviceInfo,
    pub host_config: HostConfig,
    pub linked: bool,
    pub token_status: TokenStatus,
    pub refresh_token_status: TokenStatus,
}

/// The device-resident agent.
#[derive(Debug)]
pub struct DeviceAgent {
    store: Arc<FileStore>,
    identity: Arc<IdentityCache>,
    tokens: Arc<TokenManager>,
    supervisor: StreamSupervisor,
    /// Serializes read-modify-write of the desired endpoint list.
    servers_lock: Mutex<()>,
    refresh_interval: Duration,
    reconcile_interval: Duration,
}

impl DeviceAgent {
    /// Build an agent from configuration: opens the store, reads identity
    /// from the host settings tree and targets the configured hub.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let store = Arc::new(FileStore::open(&config.store.dir)?);
        let identity: Arc<dyn IdentitySource> =
            Arc::new(HostSettings::new(&config.identity.settings_root));
        let hub = HubClient::new(&config.hub)?;
        Ok(Self::from_parts(store, identity, hub, config))
    }

    /// Build an agent from already constructed collaborators.
    pub fn from_parts(
        store: Arc<FileStore>,
        identity: Arc<dyn IdentitySource>,
        hub: HubClient,
        config: &AgentConfig,
    ) -> Self {
        let identity = Arc::new(IdentityCache::new(identity));
        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&store),
            hub,
            config.tokens.clone(),
        ));
        let supervisor = StreamSupervisor::new(
            Arc::clone(&tokens),
            Arc::clone(&identity),
            StreamerCommand::from(&config.streamer),
            &config.supervisor,
        );
        Self {
            store,
            identity,
            tokens,
            supervisor,
            servers_lock: Mutex::new(()),
            refresh_interval: config.tokens.refresh_check_interval(),
            reconcile_interval: config.supervisor.reconcile_interval(),
        }
    }

    pub const fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub const fn supervisor(&self) -> &StreamSupervisor {
        &self.supervisor
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Access token stored and stream id known.
    pub fn is_linked(&self) -> bool {
        if !self.tokens.has_access_token() {
            return false;
        }
        self.identity.get().stream_id().is_some()
            || self
                .store
                .load_device_info()
                .is_ok_and(|info| info.stream_id.is_some_and(|id| !id.is_empty()))
    }

    /// Load the desired list into the registry and, when `autostart` is set
    /// and the device is linked, start every endpoint.
    pub async fn bootstrap(&self, autostart: bool) -> Result<ReconcileReport> {
        let servers = self.store.load_servers()?;
        let report = reconcile(self.supervisor.registry(), &servers).await;
        if autostart && self.is_linked() {
            let addresses = self.supervisor.registry().addresses().await;
            let started = self.start_endpoints(&addresses).await;
            info!(started, configured = addresses.len(), "Autostarted streams");
        } else if autostart {
            info!("Device not linked; streams not started");
        }
        Ok(report)
    }

    /// Link this device to a hub account.
    pub async fn link(&self, credentials: LinkCredentials) -> Result<TokenStatusReport> {
        let identity = self.identity.get();
        let mac_address = identity
            .mac_address
            .clone()
            .ok_or_else(|| Error::MissingIdentifiers("MAC address is not available".into()))?;
        let stream_id = identity.stream_id().ok_or_else(|| {
            Error::MissingIdentifiers("network and station codes are not configured".into())
        })?;

        let request = LinkRequest {
            username: credentials.username.clone().unwrap_or_default(),
            password: credentials.password.clone().unwrap_or_default(),
            role: DEVICE_ROLE,
            longitude: credentials.longitude.or(identity.longitude),
            latitude: credentials.latitude.or(identity.latitude),
            elevation: credentials.elevation.or(identity.elevation),
            mac_address,
            stream_id,
        };
        let grant = self.tokens.hub().link(&request).await?;
        let hub_sent_info = grant.device_info.is_some();
        self.tokens.persist_grant(grant, None)?;
        if !hub_sent_info {
            self.store.save_device_info(&identity.to_device_info())?;
        }
        self.store.save_link_credentials(&LinkCredentials {
            force_relink: false,
            ..credentials
        })?;

        info!(stream_id = %request.stream_id, "Device linked");
        Ok(self.tokens.token_status())
    }

    /// Unlink this device: stop every stream, tell the hub, clear local state.
    ///
    /// Streams and local link state are cleared whatever happens on the hub
    /// side. A token failure skips the hub call; the error kind of either
    /// step is kept in [`UnlinkReport::remote`]. Only a local store failure
    /// is returned as an error.
    pub async fn unlink(&self) -> Result<UnlinkReport> {
        let access_token = self.tokens.ensure_valid_access_token().await;
        let streams_stopped = self.supervisor.remove_all().await;

        let identity = self.identity.get();
        let remote = match (access_token, identity.mac_address.clone(), identity.stream_id()) {
            (Err(e), _, _) => {
                warn!(error = %e, "No usable access token; clearing local link state without the hub");
                RemoteUnlink::Skipped(e)
            }
            (Ok(access_token), Some(mac_address), Some(stream_id)) => {
                let request = UnlinkRequest {
                    mac_address,
                    stream_id,
                };
                match self.tokens.hub().unlink(&access_token, &request).await {
                    Ok(()) => RemoteUnlink::Succeeded,
                    Err(e) => {
                        warn!(error = %e, "Hub unlink failed; clearing local link state anyway");
                        RemoteUnlink::Failed(e)
                    }
                }
            }
            (Ok(_), _, _) => RemoteUnlink::Skipped(Error::MissingIdentifiers(
                "MAC address or stream id is not available".into(),
            )),
        };

        self.clear_link_state().await?;
        info!(streams_stopped, "Device unlinked");
        Ok(UnlinkReport {
            streams_stopped,
            remote,
        })
    }

    /// Forget the local link without contacting the hub.
    pub async fn reset_link(&self) -> Result<usize> {
        let streams_stopped = self.supervisor.remove_all().await;
        self.clear_link_state().await?;
        info!(streams_stopped, "Local link state reset");
        Ok(streams_stopped)
    }

    async fn clear_link_state(&self) -> Result<()> {
        self.tokens.clear().await?;
        self.store.clear_device_info()?;
        Ok(())
    }

    /// Force a token refresh and report both token states.
    pub async fn refresh_token(&self) -> Result<TokenStatusReport> {
        self.tokens.refresh_auth_token().await?;
        Ok(self.tokens.token_status())
    }

    pub fn token_status(&self) -> TokenStatusReport {
        self.tokens.token_status()
    }

    /// Start (or restart) streaming to a registered endpoint.
    pub async fn start_streaming(&self, address: &str) -> Result<()> {
        if !self.is_linked() {
            return Err(Error::NotLinked);
        }
        self.supervisor.start(address).await
    }

    /// Add an endpoint to the desired list and start streaming to it.
    pub async fn add_server(&self, label: &str, address: &str) -> Result<()> {
        if !self.is_linked() {
            return Err(Error::NotLinked);
        }
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::InvalidEndpoint("address is empty".into()));
        }

        {
            let _guard = self.servers_lock.lock().await;
            let mut servers = self.store.load_servers()?;
            if servers.iter().any(|s| s.address.trim() == address) {
                return Err(Error::DuplicateEndpoint(address.to_string()));
            }
            servers.push(ServerEntry::new(label.trim(), address));
            self.store.save_servers(&servers)?;
            reconcile(self.supervisor.registry(), &servers).await;
        }

        info!(%address, %label, "Endpoint added");
        self.supervisor.start(address).await
    }

    /// Remove an endpoint from the desired list, stopping its streamer.
    pub async fn remove_server(&self, address: &str) -> Result<ReconcileReport> {
        let address = address.trim();
        let _guard = self.servers_lock.lock().await;
        let mut servers = self.store.load_servers()?;
        let before = servers.len();
        servers.retain(|s| s.address.trim() != address);
        if servers.len() == before {
            return Err(Error::UnknownEndpoint(address.to_string()));
        }
        self.store.save_servers(&servers)?;
        let report = reconcile(self.supervisor.registry(), &servers).await;
        info!(%address, "Endpoint removed");
        Ok(report)
    }

    /// Candidate sinks advertised by the hub.
    pub async fn ringserver_hosts(&self) -> Result<Vec<RingserverHost>> {
        self.tokens.hub().ringserver_hosts().await
    }

    pub async fn streams_status(&self) -> Vec<EndpointStatus> {
        self.supervisor.statuses().await
    }

    pub fn device_report(&self) -> Result<DeviceReport> {
        let device_info = self.store.load_device_info()?;
        let tokens = self.tokens.token_status();
        Ok(DeviceReport {
            device_info,
            host_config: self.identity.get().host_config(),
            linked: self.is_linked(),
            token_status: tokens.access,
            refresh_token_status: tokens.refresh,
        })
    }

    /// Re-read host identity and persist it as the device info snapshot.
    pub fn refresh_host_metadata(&self) -> Result<DeviceInfo> {
        let identity = self.identity.refresh();
        if identity.net_sta().is_none() {
            return Err(Error::MissingIdentifiers(
                "network and station codes are not configured".into(),
            ));
        }
        let previous = self.store.load_device_info().unwrap_or_default();
        let info = DeviceInfo {
            location: previous.location,
            channel: previous.channel,
            ..identity.to_device_info()
        };
        self.store.save_device_info(&info)?;
        info!(stream_id = ?info.stream_id, "Host metadata refreshed");
        Ok(info)
    }

    /// Reload the desired list and reconcile; start new entries when linked
    /// and `autostart` is set.
    pub async fn sync_servers(&self, autostart: bool) -> Result<ReconcileReport> {
        let report = {
            let _guard = self.servers_lock.lock().await;
            let servers = self.store.load_servers()?;
            reconcile(self.supervisor.registry(), &servers).await
        };
        if autostart && !report.added.is_empty() && self.is_linked() {
            self.start_endpoints(&report.added).await;
        }
        Ok(report)
    }

    /// Start each address, stopping early when a relink is required.
    async fn start_endpoints(&self, addresses: &[String]) -> usize {
        let mut started = 0;
        for address in addresses {
            match self.supervisor.start(address).await {
                Ok(()) => started += 1,
                Err(Error::AlreadyStreaming(_)) => {}
                Err(e) if e.is_relink_required() => {
                    warn!(error = %e, "Cannot start streams until the device is relinked");
                    break;
                }
                Err(e) => warn!(%address, error = %e, "Failed to start stream"),
            }
        }
        started
    }

    /// Spawn the proactive token refresh and periodic reconcile tasks.
    pub fn spawn_background(
        self: &Arc<Self>,
        autostart: bool,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            spawn_refresh_scheduler(
                Arc::clone(&self.tokens),
                self.refresh_interval,
                shutdown.clone(),
            ),
            self.spawn_reconcile_loop(autostart, shutdown.clone()),
        ]
    }

    fn spawn_reconcile_loop(
        self: &Arc<Self>,
        autostart: bool,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let agent = Arc::clone(self);
        let interval = self.reconcile_interval;
        tokio::spawn(async move {
            // Bootstrap has just reconciled; wait a full interval first.
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        match agent.sync_servers(autostart).await {
                            Ok(report) if report.is_noop() => debug!("Periodic reconcile: no changes"),
                            Ok(report) => info!(
                                added = report.added_count(),
                                removed = report.removed_count(),
                                "Periodic reconcile applied changes"
                            ),
                            Err(e) => warn!(error = %e, "Periodic reconcile failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("Reconcile loop shutting down");
                        return;
                    }
                }
            }
        })
    }

    /// Stop every stream and wait for the streamers to exit.
    pub async fn shutdown(&self) -> usize {
        self.supervisor.shutdown().await
    }
}
