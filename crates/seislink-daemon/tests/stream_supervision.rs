#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Streamer supervision with small shell scripts standing in for the
//! streaming binary.

mod common;

use std::path::{Path, PathBuf};
use std::time::Duration;

use seislink_core::AgentConfig;
use seislink_daemon::stream::{EndpointStatus, StreamStatus};
use seislink_daemon::{DeviceAgent, Error};

use common::{agent, identity, offline_hub, save_tokens, save_valid_tokens, script, store};

const ADDR: &str = "rs.example.org:18000";

fn config(bin: &Path, short_backoff_secs: u64, long_backoff_secs: u64) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.streamer.bin = bin.to_path_buf();
    config.streamer.verbose = false;
    config.supervisor.short_backoff_secs = short_backoff_secs;
    config.supervisor.long_backoff_secs = long_backoff_secs;
    config.supervisor.terminate_timeout_secs = 2;
    config
}

/// Linked agent with `ADDR` registered but not started.
async fn linked_agent(dir: &Path, config: &AgentConfig) -> DeviceAgent {
    let store = store(&dir.join("store"));
    save_valid_tokens(&store);
    let agent = agent(store, identity(), offline_hub(), config);
    agent.supervisor().add(ADDR, "Test Hub").await;
    agent
}

async fn wait_for(
    agent: &DeviceAgent,
    what: &str,
    predicate: impl Fn(&EndpointStatus) -> bool,
) -> EndpointStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = agent.supervisor().status(ADDR).await
            && predicate(&status)
        {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}: {:?}",
            agent.supervisor().status(ADDR).await
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn run_count(counter: &Path) -> usize {
    std::fs::read_to_string(counter)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

fn counting_script(dir: &Path, body: &str) -> (PathBuf, PathBuf) {
    let counter = dir.join("runs.log");
    let bin = script(
        dir,
        "streamer.sh",
        &format!("echo run >> '{}'\n{body}", counter.display()),
    );
    (bin, counter)
}

#[tokio::test]
async fn healthy_output_marks_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let bin = script(
        dir.path(),
        "streamer.sh",
        "echo 'Connected to ringserver'\nsleep 30",
    );
    let agent = linked_agent(dir.path(), &config(&bin, 30, 120)).await;

    agent.start_streaming(ADDR).await.unwrap();
    let status = wait_for(&agent, "Streaming", |s| s.status == StreamStatus::Streaming).await;
    assert_eq!(status.retry_count, 0);
    assert!(status.last_success_at.is_some());
    assert!(status.logs.iter().any(|l| l.contains("Connected to ringserver")));

    let err = agent.start_streaming(ADDR).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyStreaming(_)));

    assert_eq!(agent.shutdown().await, 1);
    assert!(agent.streams_status().await.is_empty());
}

#[tokio::test]
async fn streamer_receives_token_and_stream_selector() {
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args.txt");
    let bin = script(
        dir.path(),
        "streamer.sh",
        &format!(
            "echo \"$@\" > '{}'\necho write_success\nsleep 30",
            args_file.display()
        ),
    );
    let cfg = config(&bin, 30, 120);
    let store = store(&dir.path().join("store"));
    let access = save_valid_tokens(&store);
    let agent = agent(store, identity(), offline_hub(), &cfg);
    agent.supervisor().add(ADDR, "Test Hub").await;

    agent.start_streaming(ADDR).await.unwrap();
    wait_for(&agent, "Streaming", |s| s.status == StreamStatus::Streaming).await;

    let args = std::fs::read_to_string(&args_file).unwrap();
    assert_eq!(
        args.trim(),
        format!("-a {access} -S AM_R3B2D docker-host:18000 {ADDR}")
    );
    agent.shutdown().await;
}

#[tokio::test]
async fn unexpected_exit_counts_a_retry() {
    let dir = tempfile::tempdir().unwrap();
    let bin = script(dir.path(), "streamer.sh", "echo 'error: connection refused'\nexit 1");
    let agent = linked_agent(dir.path(), &config(&bin, 60, 120)).await;

    agent.start_streaming(ADDR).await.unwrap();
    let status = wait_for(&agent, "first retry", |s| s.retry_count == 1).await;
    assert_eq!(status.status, StreamStatus::Connecting);
    assert!(status.logs.iter().any(|l| l.contains("connection refused")));
    assert!(status.last_success_at.is_none());

    agent.shutdown().await;
}

#[tokio::test]
async fn streaming_entry_that_exits_is_respawned_after_short_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let (bin, counter) = counting_script(dir.path(), "echo write_success\nsleep 1\nexit 1");
    let agent = linked_agent(dir.path(), &config(&bin, 1, 120)).await;

    agent.start_streaming(ADDR).await.unwrap();
    let status = wait_for(&agent, "Streaming", |s| s.status == StreamStatus::Streaming).await;
    assert_eq!(status.retry_count, 0);

    let status = wait_for(&agent, "first retry", |s| s.retry_count == 1).await;
    assert_eq!(status.status, StreamStatus::Connecting);
    assert_eq!(run_count(&counter), 1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while run_count(&counter) < 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "streamer was not respawned"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let status = wait_for(&agent, "Streaming again", |s| {
        s.status == StreamStatus::Streaming && s.retry_count == 0
    })
    .await;
    assert!(status.last_success_at.is_some());

    agent.shutdown().await;
}

#[tokio::test]
async fn error_output_before_exit_never_reports_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let bin = script(
        dir.path(),
        "streamer.sh",
        "echo 'ERROR: invalid token'\necho 'packet 12 queued'\nexit 1",
    );
    let agent = linked_agent(dir.path(), &config(&bin, 60, 120)).await;

    agent.start_streaming(ADDR).await.unwrap();
    let status = wait_for(&agent, "first retry", |s| s.retry_count == 1).await;
    assert!(status.last_success_at.is_none());
    agent.shutdown().await;
}

#[tokio::test]
async fn repeated_failures_move_to_error() {
    let dir = tempfile::tempdir().unwrap();
    let (bin, counter) = counting_script(dir.path(), "exit 2");
    // No short backoff so the first window burns through immediately.
    let agent = linked_agent(dir.path(), &config(&bin, 0, 120)).await;

    agent.start_streaming(ADDR).await.unwrap();
    let status = wait_for(&agent, "Error", |s| s.status == StreamStatus::Error).await;
    assert_eq!(status.retry_count, 4);

    // The long backoff holds the fifth spawn back.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(run_count(&counter), 4);
    assert_eq!(
        agent.supervisor().status(ADDR).await.unwrap().retry_count,
        4
    );

    agent.shutdown().await;
}

#[tokio::test]
async fn removal_cancels_pending_respawn() {
    let dir = tempfile::tempdir().unwrap();
    let (bin, counter) = counting_script(dir.path(), "exit 1");
    let agent = linked_agent(dir.path(), &config(&bin, 1, 120)).await;

    agent.start_streaming(ADDR).await.unwrap();
    wait_for(&agent, "first retry", |s| s.retry_count == 1).await;
    assert!(agent.supervisor().remove(ADDR).await);
    assert!(!agent.supervisor().remove(ADDR).await);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(run_count(&counter), 1);
    assert!(agent.supervisor().status(ADDR).await.is_none());
    agent.shutdown().await;
}

#[tokio::test]
async fn removal_terminates_running_streamer() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let bin = script(
        dir.path(),
        "streamer.sh",
        &format!("echo $$ > '{}'\necho keepalive\nexec sleep 30", pid_file.display()),
    );
    let agent = linked_agent(dir.path(), &config(&bin, 30, 120)).await;

    agent.start_streaming(ADDR).await.unwrap();
    wait_for(&agent, "Streaming", |s| s.status == StreamStatus::Streaming).await;
    let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();

    let started = std::time::Instant::now();
    assert_eq!(agent.shutdown().await, 1);
    assert!(started.elapsed() < Duration::from_secs(5));

    let alive = std::process::Command::new("kill")
        .args(["-0", &pid])
        .status()
        .unwrap()
        .success();
    assert!(!alive, "streamer {pid} still running");
}

#[tokio::test]
async fn remove_all_returns_after_streamers_are_signalled() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("terminated");
    let bin = script(
        dir.path(),
        "streamer.sh",
        &format!(
            "trap 'echo term > \"{}\"; exit 0' TERM\necho keepalive\nwhile true; do sleep 0.1; done",
            marker.display()
        ),
    );
    let agent = linked_agent(dir.path(), &config(&bin, 30, 120)).await;

    agent.start_streaming(ADDR).await.unwrap();
    wait_for(&agent, "Streaming", |s| s.status == StreamStatus::Streaming).await;

    let started = std::time::Instant::now();
    assert_eq!(agent.supervisor().remove_all().await, 1);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(agent.streams_status().await.is_empty());

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !marker.exists() {
        assert!(
            std::time::Instant::now() < deadline,
            "streamer never received SIGTERM"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    agent.shutdown().await;
}

#[tokio::test]
async fn missing_binary_is_retried_not_thrown() {
    let dir = tempfile::tempdir().unwrap();
    let agent = linked_agent(
        dir.path(),
        &config(Path::new("/nonexistent/slink2dali"), 60, 120),
    )
    .await;

    agent.start_streaming(ADDR).await.unwrap();
    let status = wait_for(&agent, "first retry", |s| s.retry_count == 1).await;
    assert_eq!(status.status, StreamStatus::Connecting);
    assert!(status.logs.iter().any(|l| l.contains("/nonexistent/slink2dali")));
    agent.shutdown().await;
}

#[tokio::test]
async fn relink_required_is_returned_before_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let (bin, counter) = counting_script(dir.path(), "sleep 30");
    let cfg = config(&bin, 30, 120);
    let store = store(&dir.path().join("store"));
    // Expired access token and no refresh token.
    save_tokens(&store, Some(common::mint("access", -30)), None);
    let agent = agent(store, identity(), offline_hub(), &cfg);
    agent.supervisor().add(ADDR, "Test Hub").await;

    let err = agent.supervisor().start(ADDR).await.unwrap_err();
    assert!(err.is_relink_required());

    let status = agent.supervisor().status(ADDR).await.unwrap();
    assert_eq!(status.status, StreamStatus::NotStreaming);
    assert!(!agent.supervisor().registry().is_supervised(ADDR).await);
    assert_eq!(run_count(&counter), 0);
}

#[tokio::test]
async fn starting_unknown_endpoint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let bin = script(dir.path(), "streamer.sh", "sleep 30");
    let agent = linked_agent(dir.path(), &config(&bin, 30, 120)).await;

    let err = agent
        .supervisor()
        .start("other.example.org:18000")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownEndpoint(_)));
}
