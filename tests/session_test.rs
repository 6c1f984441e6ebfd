mod common;

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::{asset, cache_in, silent_settings, wait_for, wav_bytes, FakeStore, HapticCall, RecordingHaptics};
use stillpoint::audio::{DesktopAudioSession, Interruption};
use stillpoint::error::{CacheError, SessionError};
use stillpoint::haptics::NullHapticEngine;
use stillpoint::session::PlaybackSession;
use stillpoint::settings::PipelineSettings;
use stillpoint::state::PlaybackState;

const WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    _dir: TempDir,
    store: Arc<FakeStore>,
    session: PlaybackSession,
}

fn fixture_with(
    settings: PipelineSettings,
    haptics: Box<dyn stillpoint::haptics::HapticEngine>,
    audio_session: DesktopAudioSession,
) -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = FakeStore::new();
    let cache = Arc::new(cache_in(Arc::clone(&store), dir.path()));
    let session = PlaybackSession::new(cache, &settings, haptics, Box::new(audio_session));
    Fixture {
        _dir: dir,
        store,
        session,
    }
}

fn fixture() -> Fixture {
    fixture_with(
        silent_settings(),
        Box::new(NullHapticEngine),
        DesktopAudioSession::new(),
    )
}

#[tokio::test]
async fn test_play_downloads_then_plays() {
    let fx = fixture();
    fx.store
        .publish(asset("m1", 0, "v1"), wav_bytes(8000, 3.0, 0.5));
    let mut snapshots = fx.session.subscribe();

    let duration = fx.session.play(&asset("m1", 0, "v1")).await.unwrap();

    assert!((duration - 3.0).abs() < 0.01);
    assert_eq!(fx.store.fetch_count(), 1);
    let snapshot = wait_for(&mut snapshots, WAIT, |s| s.current_time > 0.1).await;
    assert!(snapshot.is_playing);
    assert_eq!(snapshot.asset_id.as_deref(), Some("m1"));
    assert!((snapshot.duration - 3.0).abs() < 0.01);

    let loud = wait_for(&mut snapshots, WAIT, |s| s.loudness > 0.3).await;
    assert!(loud.loudness <= 1.0);
    fx.session.teardown();
}

#[tokio::test]
async fn test_haptics_follow_transport() {
    let (haptics, log) = RecordingHaptics::new();
    let fx = fixture_with(silent_settings(), haptics, DesktopAudioSession::new());
    fx.store
        .publish(asset("m1", 0, "v1"), wav_bytes(8000, 3.0, 0.5));
    let mut snapshots = fx.session.subscribe();

    fx.session.play(&asset("m1", 0, "v1")).await.unwrap();
    assert!(fx.session.snapshot().haptics.running);
    assert_eq!(log.count(&HapticCall::Start), 1);

    // Ticks push loudness-mapped parameters within the configured range
    wait_for(&mut snapshots, WAIT, |s| s.loudness > 0.3).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let sends = log.sends();
    assert!(!sends.is_empty());
    assert!(sends
        .iter()
        .all(|p| (0.3..=1.0).contains(&p.intensity) && (0.1..=0.7).contains(&p.sharpness)));

    fx.session.pause();
    let snapshot = fx.session.snapshot();
    assert!(snapshot.state.is_paused());
    assert!(!snapshot.haptics.running);
    assert_eq!(snapshot.loudness, 0.0);
    assert_eq!(log.calls().last(), Some(&HapticCall::Stop));

    fx.session.resume();
    assert!(fx.session.snapshot().haptics.running);
    assert_eq!(log.count(&HapticCall::Start), 2);

    fx.session.teardown();
    assert!(!fx.session.snapshot().haptics.running);
}

#[tokio::test]
async fn test_seek_restarts_haptics_and_loudness() {
    let (haptics, log) = RecordingHaptics::new();
    let fx = fixture_with(silent_settings(), haptics, DesktopAudioSession::new());
    fx.store
        .publish(asset("m1", 0, "v1"), wav_bytes(8000, 4.0, 0.5));
    let mut snapshots = fx.session.subscribe();

    fx.session.play(&asset("m1", 0, "v1")).await.unwrap();
    wait_for(&mut snapshots, WAIT, |s| s.loudness > 0.3).await;
    assert_eq!(log.count(&HapticCall::Start), 1);
    assert_eq!(log.count(&HapticCall::Stop), 0);

    assert!(fx.session.seek(2.0));
    assert_eq!(log.count(&HapticCall::Stop), 1);
    assert_eq!(log.count(&HapticCall::Start), 2);
    let snapshot = fx.session.snapshot();
    assert!(snapshot.is_playing);
    assert!(snapshot.haptics.running);

    // Loudness builds up again from the new position
    wait_for(&mut snapshots, WAIT, |s| s.loudness > 0.3).await;

    // A paused seek leaves the effect stopped and loudness at zero
    fx.session.pause();
    assert!(fx.session.skip_back(1.0));
    let snapshot = fx.session.snapshot();
    assert!(snapshot.state.is_paused());
    assert!(!snapshot.haptics.running);
    assert_eq!(snapshot.loudness, 0.0);
    assert_eq!(log.count(&HapticCall::Start), 2);
    fx.session.teardown();
}

#[tokio::test]
async fn test_disabling_haptics_keeps_audio() {
    let (haptics, log) = RecordingHaptics::new();
    let fx = fixture_with(silent_settings(), haptics, DesktopAudioSession::new());
    fx.store
        .publish(asset("m1", 0, "v1"), wav_bytes(8000, 3.0, 0.5));

    fx.session.play(&asset("m1", 0, "v1")).await.unwrap();
    fx.session.set_haptics_enabled(false);

    let snapshot = fx.session.snapshot();
    assert!(snapshot.is_playing);
    assert!(!snapshot.haptics.enabled);
    assert!(!snapshot.haptics.running);

    let sends_before = log.sends().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(log.sends().len(), sends_before);

    fx.session.set_haptics_enabled(true);
    assert!(fx.session.snapshot().haptics.running);
    fx.session.teardown();
}

#[tokio::test]
async fn test_haptic_reset_is_serviced() {
    let (haptics, log) = RecordingHaptics::new();
    let fx = fixture_with(silent_settings(), haptics, DesktopAudioSession::new());
    fx.store
        .publish(asset("m1", 0, "v1"), wav_bytes(8000, 3.0, 0.5));

    fx.session.play(&asset("m1", 0, "v1")).await.unwrap();
    log.reset();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(log.count(&HapticCall::Restart), 1);
    assert!(fx.session.snapshot().haptics.running);
    fx.session.teardown();
}

#[tokio::test]
async fn test_seek_beyond_duration_is_ignored() {
    let fx = fixture();
    // Two minutes at a low rate keeps the fixture small
    fx.store
        .publish(asset("long", 0, "v1"), wav_bytes(1000, 120.0, 0.2));

    let duration = fx.session.play(&asset("long", 0, "v1")).await.unwrap();
    assert!((duration - 120.0).abs() < 0.01);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let before = fx.session.snapshot().current_time;
    assert!(!fx.session.seek(200.0));
    let snapshot = fx.session.snapshot();
    assert!(snapshot.is_playing);
    // Within one 60 Hz poll interval of where it was
    let drift = snapshot.current_time - before;
    assert!((0.0..0.05).contains(&drift), "moved by {}", drift);

    assert!(fx.session.seek(60.0));
    let t = fx.session.snapshot().current_time;
    assert!((t - 60.0).abs() < 0.5, "current_time {}", t);

    assert!(fx.session.skip_back(15.0));
    let t = fx.session.snapshot().current_time;
    assert!((t - 45.0).abs() < 0.5, "current_time {}", t);

    assert!(fx.session.seek_fraction(0.25));
    let t = fx.session.snapshot().current_time;
    assert!((t - 30.0).abs() < 0.5, "current_time {}", t);
    fx.session.teardown();
}

#[tokio::test]
async fn test_natural_completion() {
    let (haptics, log) = RecordingHaptics::new();
    let fx = fixture_with(silent_settings(), haptics, DesktopAudioSession::new());
    fx.store
        .publish(asset("short", 0, "v1"), wav_bytes(8000, 0.4, 0.5));
    let mut snapshots = fx.session.subscribe();

    fx.session.play(&asset("short", 0, "v1")).await.unwrap();
    let done = wait_for(&mut snapshots, WAIT, |s| s.state == PlaybackState::Completed).await;

    assert!(!done.is_playing);
    assert_eq!(done.loudness, 0.0);
    assert!((done.current_time - done.duration).abs() < 1e-9);
    assert!(!done.haptics.running);
    assert_eq!(log.calls().last(), Some(&HapticCall::Stop));

    // Teardown after completion still returns to Idle
    fx.session.teardown();
    assert_eq!(fx.session.state(), PlaybackState::Idle);
}

#[tokio::test]
async fn test_download_failure_surfaces() {
    let fx = fixture();
    fx.store
        .publish(asset("m1", 0, "v1"), wav_bytes(8000, 1.0, 0.5));
    fx.store.set_fail_fetch(true);

    let err = fx.session.play(&asset("m1", 0, "v1")).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Cache(CacheError::AssetDownload { .. })
    ));
    let snapshot = fx.session.snapshot();
    assert!(matches!(snapshot.state, PlaybackState::Failed(_)));
    assert!(!snapshot.is_playing);
    assert_eq!(snapshot.loudness, 0.0);
}

#[tokio::test]
async fn test_undecodable_payload_surfaces() {
    let fx = fixture();
    fx.store
        .publish(asset("bad", 0, "v1"), b"not audio at all".to_vec());

    let err = fx.session.play(&asset("bad", 0, "v1")).await.unwrap_err();

    assert!(matches!(err, SessionError::Audio(_)));
    assert!(matches!(fx.session.state(), PlaybackState::Failed(_)));
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let fx = fixture();
    fx.session.teardown();
    fx.store
        .publish(asset("m1", 0, "v1"), wav_bytes(8000, 2.0, 0.5));
    fx.session.play(&asset("m1", 0, "v1")).await.unwrap();

    fx.session.teardown();
    fx.session.teardown();

    let snapshot = fx.session.snapshot();
    assert_eq!(snapshot.state, PlaybackState::Idle);
    assert_eq!(snapshot.asset_id, None);
    assert_eq!(snapshot.current_time, 0.0);
    assert_eq!(snapshot.loudness, 0.0);
}

#[tokio::test]
async fn test_new_play_replaces_current() {
    let fx = fixture();
    fx.store
        .publish(asset("a", 0, "v1"), wav_bytes(8000, 2.0, 0.5));
    fx.store
        .publish(asset("b", 1, "v1"), wav_bytes(8000, 3.0, 0.5));

    fx.session.play(&asset("a", 0, "v1")).await.unwrap();
    assert!(fx.session.seek(1.5));
    let duration = fx.session.play(&asset("b", 1, "v1")).await.unwrap();

    let snapshot = fx.session.snapshot();
    assert_eq!(snapshot.asset_id.as_deref(), Some("b"));
    assert!((duration - 3.0).abs() < 0.01);
    assert!(snapshot.current_time < 1.0);
    fx.session.teardown();
}

#[tokio::test]
async fn test_teardown_supersedes_pending_play() {
    let fx = fixture();
    fx.store
        .publish(asset("slow", 0, "v1"), wav_bytes(8000, 2.0, 0.5));
    fx.store.set_fetch_delay(Duration::from_millis(200));
    let session = Arc::new(fx.session);

    let pending = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.play(&asset("slow", 0, "v1")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.state(), PlaybackState::Loading);
    session.teardown();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(SessionError::Superseded)));
    assert_eq!(session.state(), PlaybackState::Idle);
    // The download itself was not cancelled
    assert_eq!(fx.store.fetch_count(), 1);
}

#[tokio::test]
async fn test_interruptions_pause_and_resume() {
    let audio_session = DesktopAudioSession::new();
    let interruptions = audio_session.interruption_sender();
    let fx = fixture_with(silent_settings(), Box::new(NullHapticEngine), audio_session);
    fx.store
        .publish(asset("m1", 0, "v1"), wav_bytes(8000, 3.0, 0.5));
    let mut snapshots = fx.session.subscribe();
    fx.session.play(&asset("m1", 0, "v1")).await.unwrap();

    interruptions.send(Interruption::Began).unwrap();
    wait_for(&mut snapshots, WAIT, |s| s.state.is_paused()).await;

    interruptions
        .send(Interruption::Ended {
            should_resume: true,
        })
        .unwrap();
    wait_for(&mut snapshots, WAIT, |s| s.is_playing).await;
    fx.session.teardown();
}

#[tokio::test]
async fn test_drop_releases_resources() {
    let fx = fixture();
    fx.store
        .publish(asset("m1", 0, "v1"), wav_bytes(8000, 2.0, 0.5));
    let snapshots = fx.session.subscribe();
    fx.session.play(&asset("m1", 0, "v1")).await.unwrap();

    drop(fx.session);
    assert_eq!(snapshots.borrow().state, PlaybackState::Idle);
}
