mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use common::write_wav;
use stillpoint::analysis::LoudnessAnalyzer;
use stillpoint::audio::{EngineEvent, Interruption, PlaybackEngine};
use stillpoint::error::AudioError;
use stillpoint::settings::OutputKind;
use stillpoint::state::PlaybackState;

fn engine() -> PlaybackEngine {
    PlaybackEngine::new(OutputKind::Silent, Arc::new(LoudnessAnalyzer::new(0.3)))
}

fn sleep(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}

#[test]
fn test_load_reports_duration_and_plays() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path, 8000, 3.0, 0.5);

    let mut engine = engine();
    let loaded = engine.load(&path).unwrap();

    assert!((loaded.duration - 3.0).abs() < 0.01);
    assert_eq!(loaded.sample_rate, 8000);
    assert!(engine.is_playing());

    sleep(300);
    let t = engine.current_time();
    assert!(t > 0.1 && t < 1.0, "current_time {}", t);
    engine.stop();
}

#[test]
fn test_missing_file_fails_load() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine();

    let err = engine.load(&dir.path().join("absent.wav")).unwrap_err();

    assert!(matches!(err, AudioError::Load(_)));
    assert!(matches!(engine.state(), PlaybackState::Failed(_)));
    assert_eq!(engine.duration(), 0.0);
    assert_eq!(engine.analyzer().loudness(), 0.0);
}

#[test]
fn test_corrupt_file_fails_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.wav");
    std::fs::write(&path, b"definitely not audio").unwrap();

    let mut engine = engine();
    assert!(matches!(engine.load(&path), Err(AudioError::Load(_))));
}

#[test]
fn test_seek_past_end_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path, 8000, 2.0, 0.5);

    let mut engine = engine();
    engine.load(&path).unwrap();
    sleep(100);
    let before = engine.current_time();

    assert!(!engine.seek(200.0));
    assert!(!engine.seek(f64::NAN));
    assert!(engine.is_playing());
    assert!(engine.current_time() >= before);
    assert!(engine.current_time() < 1.0);
}

#[test]
fn test_seek_rebases_clock() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path, 8000, 4.0, 0.5);

    let mut engine = engine();
    engine.load(&path).unwrap();

    assert!(engine.seek(2.5));
    let t = engine.current_time();
    assert!((t - 2.5).abs() < 0.2, "current_time {}", t);
    assert!(engine.is_playing());

    assert!(engine.seek(-3.0));
    assert!(engine.current_time() < 0.2);
}

#[test]
fn test_seek_returns_promptly() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path, 8000, 4.0, 0.5);

    let mut engine = engine();
    engine.load(&path).unwrap();

    for i in 0..20 {
        let target = (i % 4) as f64 * 0.9;
        let started = Instant::now();
        assert!(engine.seek(target));
        let took = started.elapsed();
        assert!(took < Duration::from_millis(300), "seek {} took {:?}", i, took);
        assert!((engine.current_time() - target).abs() < 0.2);
    }
    assert!(engine.is_playing());
}

#[test]
fn test_seek_fraction_and_skip_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path, 8000, 4.0, 0.5);

    let mut engine = engine();
    engine.load(&path).unwrap();

    assert!(engine.seek_fraction(0.5));
    assert!((engine.current_time() - 2.0).abs() < 0.2);

    assert!(engine.skip_back(15.0));
    assert!(engine.current_time() < 0.2);
}

#[test]
fn test_pause_holds_position() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path, 8000, 3.0, 0.5);

    let mut engine = engine();
    engine.load(&path).unwrap();
    sleep(200);

    engine.pause();
    assert!(engine.state().is_paused());
    assert_eq!(engine.analyzer().loudness(), 0.0);
    let held = engine.current_time();
    sleep(200);
    assert!((engine.current_time() - held).abs() < 0.02);

    // Seeking while paused stays paused
    assert!(engine.seek(1.0));
    assert!(engine.state().is_paused());
    assert!((engine.current_time() - 1.0).abs() < 0.05);

    engine.pause();
    engine.resume();
    assert!(engine.is_playing());
    engine.resume();
    assert!(engine.is_playing());
}

#[test]
fn test_stop_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path, 8000, 2.0, 0.5);

    let mut engine = engine();
    engine.stop();
    engine.load(&path).unwrap();
    sleep(50);

    engine.stop();
    engine.stop();

    assert_eq!(engine.state(), PlaybackState::Idle);
    assert_eq!(engine.current_time(), 0.0);
    assert_eq!(engine.analyzer().loudness(), 0.0);
    assert!(!engine.seek(0.5));
}

#[test]
fn test_loudness_tracks_played_audio() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path, 8000, 2.0, 0.5);

    let mut engine = engine();
    engine.load(&path).unwrap();
    sleep(300);

    let loudness = engine.analyzer().loudness();
    assert!(loudness > 0.3 && loudness <= 0.51, "loudness {}", loudness);

    engine.stop();
    assert_eq!(engine.analyzer().loudness(), 0.0);
}

#[test]
fn test_interruption_pauses_and_resumes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path, 8000, 3.0, 0.5);

    let mut engine = engine();
    engine.load(&path).unwrap();

    assert!(engine.handle_interruption(Interruption::Began));
    assert!(engine.state().is_paused());
    assert!(engine.handle_interruption(Interruption::Ended {
        should_resume: true
    }));
    assert!(engine.is_playing());

    // A manual pause is not undone by an interruption ending
    engine.pause();
    assert!(!engine.handle_interruption(Interruption::Began));
    assert!(!engine.handle_interruption(Interruption::Ended {
        should_resume: true
    }));
    assert!(engine.state().is_paused());

    engine.resume();
    engine.handle_interruption(Interruption::Began);
    assert!(!engine.handle_interruption(Interruption::Ended {
        should_resume: false
    }));
    assert!(engine.state().is_paused());
}

#[tokio::test]
async fn test_completion_event_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("short.wav");
    write_wav(&path, 8000, 0.4, 0.5);

    let mut engine = engine();
    let mut loaded = engine.load(&path).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), loaded.events.recv())
        .await
        .unwrap();
    assert_eq!(event, Some(EngineEvent::Completed));
    assert_eq!(engine.state(), PlaybackState::Completed);
    assert_eq!(engine.current_time(), engine.duration());
    assert_eq!(engine.analyzer().loudness(), 0.0);

    // The worker has exited: the channel closes without a second event
    let next = tokio::time::timeout(Duration::from_secs(1), loaded.events.recv())
        .await
        .unwrap();
    assert_eq!(next, None);
}

#[tokio::test]
async fn test_stop_silences_previous_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path, 8000, 0.5, 0.5);

    let mut engine = engine();
    let mut first = engine.load(&path).unwrap();
    engine.load(&path).unwrap();

    // Reloading stopped the first worker before it could complete
    let event = tokio::time::timeout(Duration::from_secs(1), first.events.recv())
        .await
        .unwrap();
    assert_eq!(event, None);
    engine.stop();
}
