//! Supervisor lifecycle tests against a stub transcoder binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use recast_core::config::RtmpServerConfig;
use recast_core::error::Error;
use recast_core::models::{Destination, DestinationState};
use recast_ingest::IngestService;
use recast_relay::{GenericDriver, RelaySupervisor};

fn write_stub(dir: &Path, name: &str, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, script).expect("write stub");
    let mut perms = std::fs::metadata(&path).expect("stat stub").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod stub");
    path
}

fn destination(id: &str, name: &str, key: &str) -> Destination {
    Destination {
        id: id.into(),
        name: name.into(),
        url: "rtmp://live.twitch.tv/app".into(),
        stream_key: key.into(),
        enabled: true,
        ..Destination::default()
    }
}

fn supervisor_with_stub(dir: &Path) -> RelaySupervisor {
    let ingest = Arc::new(IngestService::new(RtmpServerConfig::default()));
    let supervisor = RelaySupervisor::new(ingest);
    supervisor.set_drivers(vec![Arc::new(GenericDriver)]);
    supervisor.set_transcoder_path(write_stub(dir, "fake-ffmpeg", "#!/bin/sh\nsleep 30\n"));
    supervisor
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within timeout");
}

#[tokio::test]
async fn same_name_destinations_are_fully_independent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = supervisor_with_stub(dir.path());
    supervisor.configure(vec![
        destination("a", "twitch", "X"),
        destination("b", "twitch", "Y"),
    ]);

    supervisor.start("a").await.expect("start a");
    supervisor.start("b").await.expect("start b");
    assert_eq!(supervisor.running().len(), 2);

    supervisor.stop("b").expect("stop b");

    let snapshot = supervisor.status_snapshot();
    let by_id = |id: &str| {
        snapshot
            .iter()
            .find(|s| s.id == id)
            .expect("destination in snapshot")
            .clone()
    };
    // `a` is untouched: its child is alive and connected.
    assert_ne!(by_id("a").status, DestinationState::Idle);
    // `b` reads idle immediately, even though its child may still be
    // exiting.
    assert_eq!(by_id("b").status, DestinationState::Idle);
    assert_eq!(supervisor.running(), vec!["a".to_string()]);
}

#[tokio::test]
async fn double_start_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = supervisor_with_stub(dir.path());
    supervisor.configure(vec![destination("a", "twitch", "X")]);

    supervisor.start("a").await.expect("first");
    supervisor.start("a").await.expect("second");
    assert_eq!(supervisor.running().len(), 1);
}

#[tokio::test]
async fn start_by_name_resolves_first_match() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = supervisor_with_stub(dir.path());
    supervisor.configure(vec![
        destination("a", "youtube", "X"),
        destination("b", "youtube", "Y"),
    ]);

    supervisor.start("youtube").await.expect("start by name");
    assert_eq!(supervisor.running(), vec!["a".to_string()]);
}

#[tokio::test]
async fn stop_is_safe_when_already_stopped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = supervisor_with_stub(dir.path());
    supervisor.configure(vec![destination("a", "twitch", "X")]);

    supervisor.stop("a").expect("stop without session");
    assert!(matches!(
        supervisor.stop("nope"),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn disabled_destination_is_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = supervisor_with_stub(dir.path());
    let mut dest = destination("a", "twitch", "X");
    dest.enabled = false;
    supervisor.configure(vec![dest]);

    assert!(matches!(
        supervisor.start("a").await,
        Err(Error::DestinationDisabled(_))
    ));
    assert!(supervisor.running().is_empty());
}

#[tokio::test]
async fn missing_transcoder_is_fatal_at_start() {
    let ingest = Arc::new(IngestService::new(RtmpServerConfig::default()));
    let supervisor = RelaySupervisor::new(ingest);
    supervisor.set_transcoder_path(PathBuf::from("/nonexistent/ffmpeg"));
    supervisor.configure(vec![destination("a", "twitch", "X")]);

    // Spawning a nonexistent binary surfaces as a start error.
    assert!(supervisor.start("a").await.is_err());
    assert!(supervisor.running().is_empty());
}

#[tokio::test]
async fn self_exiting_child_clears_its_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ingest = Arc::new(IngestService::new(RtmpServerConfig::default()));
    let supervisor = RelaySupervisor::new(ingest);
    supervisor.set_transcoder_path(write_stub(dir.path(), "dying-ffmpeg", "#!/bin/sh\nexit 1\n"));
    supervisor.configure(vec![destination("a", "twitch", "X")]);

    supervisor.start("a").await.expect("start");
    wait_until(|| supervisor.running().is_empty()).await;

    let snapshot = supervisor.status_snapshot();
    assert_eq!(snapshot[0].status, DestinationState::Idle);
}

#[tokio::test]
async fn stop_all_clears_every_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = supervisor_with_stub(dir.path());
    supervisor.configure(vec![
        destination("a", "twitch", "X"),
        destination("b", "youtube", "Y"),
    ]);

    assert_eq!(supervisor.start_all().await, 2);
    supervisor.stop_all();
    assert!(supervisor.running().is_empty());
    for status in supervisor.status_snapshot() {
        assert_eq!(status.status, DestinationState::Idle);
    }
}
