//! Streamer supervision.
//!
//! Each started endpoint gets one supervision task that owns the child
//! process. The task spawns the streamer, classifies its output, and on an
//! unexpected exit waits out the backoff before spawning again. Removing the
//! endpoint cancels the task, which terminates the process and skips any
//! pending respawn.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use seislink_core::IdentityCache;
use seislink_core::config::SupervisorConfig;

use super::backoff::RetryPolicy;
use super::classifier::{KeywordClassifier, LineClassifier, LineSignal};
use super::entry::{EndpointStatus, StreamStatus, Supervision};
use super::process::{StreamerCommand, reap, signal_terminate};
use super::registry::EndpointRegistry;
use crate::auth::TokenManager;
use crate::error::{Error, Result};

/// How long to keep reading buffered output after the process has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputSource {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct OutputLine {
    source: OutputSource,
    text: String,
}

/// How a spawn attempt ended.
#[derive(Debug)]
enum AttemptEnd {
    /// Supervision was cancelled; the process was terminated by us.
    Cancelled,
    /// The process could not be started.
    SpawnFailed,
    /// The process exited on its own.
    Exited(std::io::Result<ExitStatus>),
}

/// Per-attempt classification state.
#[derive(Debug, Default)]
struct AttemptState {
    errored: bool,
    healthy: bool,
}

/// Supervises one streamer process per registered endpoint.
#[derive(Clone)]
pub struct StreamSupervisor {
    registry: EndpointRegistry,
    tokens: Arc<TokenManager>,
    identity: Arc<IdentityCache>,
    command: Arc<StreamerCommand>,
    classifier: Arc<dyn LineClassifier>,
    terminate_timeout: Duration,
    health_timeout: Duration,
    tasks: TaskTracker,
}

impl std::fmt::Debug for StreamSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSupervisor")
            .field("registry", &self.registry)
            .field("command", &self.command)
            .field("terminate_timeout", &self.terminate_timeout)
            .field("health_timeout", &self.health_timeout)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl StreamSupervisor {
    pub fn new(
        tokens: Arc<TokenManager>,
        identity: Arc<IdentityCache>,
        command: StreamerCommand,
        config: &SupervisorConfig,
    ) -> Self {
        Self {
            registry: EndpointRegistry::new(config.log_capacity, RetryPolicy::from(config)),
            tokens,
            identity,
            command: Arc::new(command),
            classifier: Arc::new(KeywordClassifier::new(config.permissive_fallback)),
            terminate_timeout: Duration::from_secs(config.terminate_timeout_secs),
            health_timeout: Duration::from_secs(config.health_timeout_secs),
            tasks: TaskTracker::new(),
        }
    }

    /// Replace the output classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn LineClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub const fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Register an endpoint without starting it.
    pub async fn add(&self, address: &str, label: &str) -> bool {
        self.registry.insert_if_absent(address, label).await
    }

    /// Start (or restart) supervision of a registered endpoint.
    ///
    /// Token and identity problems are returned to the caller and nothing is
    /// spawned. Once supervision is running, failures are handled by retrying.
    pub async fn start(&self, address: &str) -> Result<()> {
        let Some(status) = self.registry.status(address).await else {
            return Err(Error::UnknownEndpoint(address.to_string()));
        };
        if status.status == StreamStatus::Streaming && self.registry.is_supervised(address).await {
            return Err(Error::AlreadyStreaming(address.to_string()));
        }

        let access_token = self.tokens.ensure_valid_access_token().await?;
        let net_sta = self.identity.get().net_sta().ok_or_else(|| {
            Error::MissingIdentifiers("network and station codes are not configured".into())
        })?;

        let supervision = Supervision::new();
        if !self
            .registry
            .install_supervision(address, supervision.clone())
            .await
        {
            return Err(Error::UnknownEndpoint(address.to_string()));
        }

        info!(%address, label = %status.label, "Starting stream supervision");
        let supervisor = self.clone();
        let address = address.to_string();
        self.tasks.spawn(async move {
            supervisor
                .supervise(address, net_sta, access_token, supervision)
                .await;
        });
        Ok(())
    }

    /// Stop and forget an endpoint. Returns whether it existed.
    pub async fn remove(&self, address: &str) -> bool {
        self.registry.remove(address).await.is_some()
    }

    /// Stop and forget every endpoint.
    ///
    /// Returns once every running streamer has been sent its termination
    /// signal, without waiting for the processes to exit. A supervision task
    /// that has not released within the terminate timeout is logged and left
    /// to finish on its own.
    pub async fn remove_all(&self) -> usize {
        let (count, live) = self.registry.remove_all().await;
        let released = async {
            for supervision in &live {
                supervision.released().await;
            }
        };
        if tokio::time::timeout(self.terminate_timeout, released)
            .await
            .is_err()
        {
            warn!(
                live = live.len(),
                "Timed out waiting for streamers to be signalled"
            );
        }
        count
    }

    /// Stop every endpoint and wait for the supervision tasks to finish
    /// terminating their processes.
    pub async fn shutdown(&self) -> usize {
        let (count, _) = self.registry.remove_all().await;
        self.tasks.close();
        self.tasks.wait().await;
        count
    }

    pub async fn statuses(&self) -> Vec<EndpointStatus> {
        self.registry.snapshot().await
    }

    pub async fn status(&self, address: &str) -> Option<EndpointStatus> {
        self.registry.status(address).await
    }

    /// Supervision loop for one endpoint.
    async fn supervise(
        self,
        address: String,
        net_sta: String,
        first_token: String,
        supervision: Supervision,
    ) {
        let _release = supervision.release_on_drop();
        let mut prefetched = Some(first_token);

        loop {
            let Some(attempt) = self.registry.begin_attempt(&address, &supervision).await else {
                debug!(%address, "Supervision ended");
                return;
            };

            let token = match prefetched.take() {
                Some(token) => Ok(token),
                None => self.tokens.ensure_valid_access_token().await,
            };

            let end = match token {
                Ok(token) => {
                    self.run_attempt(&address, attempt, &net_sta, &token, &supervision)
                        .await
                }
                Err(e) => {
                    warn!(%address, attempt, error = %e, "No usable access token for respawn");
                    self.registry
                        .push_log(&address, attempt, format!("access token unavailable: {e}"))
                        .await;
                    AttemptEnd::SpawnFailed
                }
            };

            match end {
                AttemptEnd::Cancelled => {
                    info!(%address, attempt, "Streamer stopped");
                    return;
                }
                AttemptEnd::SpawnFailed => {}
                AttemptEnd::Exited(status) => {
                    let note = match &status {
                        Ok(status) => format!("streamer exited: {status}"),
                        Err(e) => format!("streamer wait failed: {e}"),
                    };
                    self.registry.push_log(&address, attempt, note).await;
                }
            }

            let Some(retry_count) = self.registry.record_failure(&address, attempt).await else {
                return;
            };
            let delay = self.registry.policy().delay_for(retry_count);
            warn!(
                %address,
                attempt,
                retry_count,
                delay_secs = delay.as_secs(),
                "Streamer exited unexpectedly, respawn scheduled"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = supervision.cancelled() => {
                    debug!(%address, "Pending respawn cancelled");
                    return;
                }
            }

            if !self.registry.expects_respawn(&address, attempt).await {
                debug!(%address, "Endpoint no longer expects a respawn");
                return;
            }
        }
    }

    /// Spawn the streamer once and follow it until it exits or is cancelled.
    async fn run_attempt(
        &self,
        address: &str,
        attempt: u64,
        net_sta: &str,
        access_token: &str,
        supervision: &Supervision,
    ) -> AttemptEnd {
        let mut child = match self.command.spawn(access_token, net_sta, address) {
            Ok(child) => child,
            Err(e) => {
                error!(%address, attempt, error = %e, "Streamer spawn failed");
                self.registry.push_log(address, attempt, e.to_string()).await;
                return AttemptEnd::SpawnFailed;
            }
        };
        info!(%address, attempt, pid = ?child.id(), "Streamer spawned");

        let (line_tx, mut line_rx) = mpsc::channel::<OutputLine>(64);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, OutputSource::Stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, OutputSource::Stderr, line_tx.clone());
        }
        drop(line_tx);

        let mut state = AttemptState::default();
        let health_deadline = tokio::time::sleep(self.health_timeout);
        tokio::pin!(health_deadline);
        let mut health_warned = false;

        let exit = loop {
            tokio::select! {
                () = supervision.cancelled() => {
                    signal_terminate(&child);
                    supervision.release();
                    reap(&mut child, self.terminate_timeout).await;
                    return AttemptEnd::Cancelled;
                }
                Some(line) = line_rx.recv() => {
                    self.handle_line(address, attempt, line, &mut state).await;
                }
                () = &mut health_deadline, if !state.healthy && !health_warned => {
                    health_warned = true;
                    warn!(
                        %address,
                        attempt,
                        timeout_secs = self.health_timeout.as_secs(),
                        "Streamer has not reported healthy output"
                    );
                    self.registry
                        .push_log(
                            address,
                            attempt,
                            format!(
                                "no healthy output within {}s",
                                self.health_timeout.as_secs()
                            ),
                        )
                        .await;
                }
                status = child.wait() => break status,
            }
        };

        // Output may still be buffered in the pipes after exit.
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Some(line) = line_rx.recv().await {
                self.handle_line(address, attempt, line, &mut state).await;
            }
        })
        .await;

        match &exit {
            Ok(status) => info!(%address, attempt, %status, errored = state.errored, "Streamer exited"),
            Err(e) => warn!(%address, attempt, error = %e, "Failed to wait for streamer"),
        }
        AttemptEnd::Exited(exit)
    }

    async fn handle_line(
        &self,
        address: &str,
        attempt: u64,
        line: OutputLine,
        state: &mut AttemptState,
    ) {
        match line.source {
            OutputSource::Stderr => {
                warn!(%address, attempt, "streamer stderr: {}", line.text);
                self.registry.push_log(address, attempt, line.text).await;
            }
            OutputSource::Stdout => {
                debug!(%address, attempt, "streamer stdout: {}", line.text);
                let signal = self.classifier.classify(&line.text, state.errored);
                self.registry.push_log(address, attempt, line.text).await;
                match signal {
                    LineSignal::Error => {
                        if !state.errored {
                            warn!(%address, attempt, "Streamer reported an error");
                        }
                        state.errored = true;
                    }
                    LineSignal::Healthy | LineSignal::Progress => {
                        state.healthy = true;
                        if self.registry.mark_healthy(address, attempt).await {
                            info!(%address, attempt, "Streamer healthy");
                        }
                    }
                    LineSignal::Neutral => {}
                }
            }
        }
    }
}

fn spawn_line_reader<R>(reader: R, source: OutputSource, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(text)) = lines.next_line().await {
            if tx.send(OutputLine { source, text }).await.is_err() {
                break;
            }
        }
    });
}
