//! Streamer process spawning and termination.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use seislink_core::config::StreamerConfig;

use crate::error::{Error, Result};

/// How to invoke the external streaming binary.
#[derive(Debug, Clone)]
pub struct StreamerCommand {
    pub bin: PathBuf,
    /// Passed first when set.
    pub verbosity_flag: Option<String>,
    /// Local ring buffer the binary reads from (`host:port`).
    pub source_addr: String,
}

impl From<&StreamerConfig> for StreamerCommand {
    fn from(config: &StreamerConfig) -> Self {
        Self {
            bin: config.bin.clone(),
            verbosity_flag: (config.verbose && !config.verbosity_flag.is_empty())
                .then(|| config.verbosity_flag.clone()),
            source_addr: config.source_addr.clone(),
        }
    }
}

impl StreamerCommand {
    /// Arguments for one run: `[verbosity] -a <token> -S <NET_STA> <source> <target>`.
    pub fn args(&self, access_token: &str, net_sta: &str, target: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(7);
        if let Some(flag) = &self.verbosity_flag {
            args.push(flag.clone());
        }
        args.extend([
            "-a".to_string(),
            access_token.to_string(),
            "-S".to_string(),
            net_sta.to_string(),
            self.source_addr.clone(),
            target.to_string(),
        ]);
        args
    }

    /// Spawn the streamer with piped stdout/stderr.
    pub fn spawn(&self, access_token: &str, net_sta: &str, target: &str) -> Result<Child> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(self.args(access_token, net_sta, target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(bin = %self.bin.display(), %target, %net_sta, "Spawning streamer");
        cmd.spawn().map_err(|e| Error::SpawnFailed {
            reason: format!("{}: {e}", self.bin.display()),
        })
    }
}

/// Ask a streamer to stop. On non-unix targets this is a no-op and
/// [`reap`] kills the process once its timeout runs out.
pub fn signal_terminate(child: &Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid belongs to a child we spawned and have not reaped yet;
            // kill(2) with SIGTERM has no memory-safety preconditions.
            #[allow(unsafe_code)]
            #[allow(clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                warn!(pid, error = %err, "Failed to send SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = child;
}

/// Wait up to `timeout` for a signalled streamer to exit, then kill it.
pub async fn reap(child: &mut Child, timeout: Duration) {
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            info!(?status, "Streamer exited after termination signal");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Error waiting for streamer");
            child.kill().await.ok();
        }
        Err(_) => {
            warn!("Timeout waiting for streamer to stop, killing");
            child.kill().await.ok();
        }
    }
}
