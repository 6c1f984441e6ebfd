// Shared fixtures for the integration suites
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stillpoint::assets::{AssetCache, AssetStore, MeditationAsset, RemoteAsset};
use stillpoint::db::DatabaseConnection;
use stillpoint::error::{HapticError, StoreError};
use stillpoint::haptics::{HapticEngine, HapticParameters, ResetNotifier};
use stillpoint::settings::{OutputKind, PipelineSettings};
use stillpoint::state::PlaybackSnapshot;

/// Mono 16-bit WAV holding a constant tone of `amplitude`
pub fn wav_bytes(sample_rate: u32, seconds: f64, amplitude: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
        let frames = (sample_rate as f64 * seconds).round() as usize;
        let value = (amplitude.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        for i in 0..frames {
            // Alternate sign so the tone has no DC offset
            let sample = if i % 2 == 0 { value } else { -value };
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    bytes
}

pub fn write_wav(path: &Path, sample_rate: u32, seconds: f64, amplitude: f32) {
    std::fs::write(path, wav_bytes(sample_rate, seconds, amplitude)).unwrap();
}

pub fn asset(id: &str, sort_order: i64, version_tag: &str) -> MeditationAsset {
    MeditationAsset {
        id: id.to_string(),
        title: format!("Meditation {}", id),
        description: String::new(),
        duration_seconds: 0,
        sort_order,
        version_tag: version_tag.to_string(),
        local_path: None,
    }
}

/// In-memory store with switchable failures and call counters
#[derive(Default)]
pub struct FakeStore {
    assets: Mutex<Vec<MeditationAsset>>,
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    queries: AtomicUsize,
    fetches: AtomicUsize,
    offline: AtomicBool,
    fail_fetch: AtomicBool,
    fetch_delay: Mutex<Duration>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add or replace an asset and its payload
    pub fn publish(&self, asset: MeditationAsset, payload: Vec<u8>) {
        self.payloads.lock().insert(asset.id.clone(), payload);
        let mut assets = self.assets.lock();
        assets.retain(|a| a.id != asset.id);
        assets.push(asset);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = delay;
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetStore for FakeStore {
    async fn query_assets(&self) -> Result<Vec<MeditationAsset>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidResponse("store unreachable".to_string()));
        }
        Ok(self.assets.lock().clone())
    }

    async fn fetch_asset(&self, id: &str) -> Result<RemoteAsset, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) || self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidResponse("store unreachable".to_string()));
        }

        let record = self.assets.lock().iter().find(|a| a.id == id).cloned();
        let payload = self.payloads.lock().get(id).cloned();
        match (record, payload) {
            (Some(record), Some(payload)) => Ok(RemoteAsset { record, payload }),
            _ => Err(StoreError::NotFound(id.to_string())),
        }
    }
}

pub fn cache_in(store: Arc<FakeStore>, dir: &Path) -> AssetCache {
    AssetCache::new(
        store,
        DatabaseConnection::in_memory().unwrap(),
        dir.join("guided-meditations"),
        "wav",
    )
}

pub fn silent_settings() -> PipelineSettings {
    let mut settings = PipelineSettings::default();
    settings.playback.output = OutputKind::Silent;
    settings
}

#[derive(Debug, Clone, PartialEq)]
pub enum HapticCall {
    Start,
    Restart,
    Play(HapticParameters),
    Send(HapticParameters),
    Stop,
}

/// Calls seen by a `RecordingHaptics` engine
#[derive(Default)]
pub struct HapticLog {
    calls: Mutex<Vec<HapticCall>>,
    resets: Mutex<Option<ResetNotifier>>,
}

impl HapticLog {
    pub fn calls(&self) -> Vec<HapticCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &HapticCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn sends(&self) -> Vec<HapticParameters> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HapticCall::Send(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    /// Simulate the OS resetting the hardware engine
    pub fn reset(&self) {
        if let Some(resets) = self.resets.lock().as_ref() {
            resets.notify();
        }
    }
}

pub struct RecordingHaptics(pub Arc<HapticLog>);

impl RecordingHaptics {
    pub fn new() -> (Box<Self>, Arc<HapticLog>) {
        let log = Arc::new(HapticLog::default());
        (Box::new(Self(Arc::clone(&log))), log)
    }
}

impl HapticEngine for RecordingHaptics {
    fn supports_haptics(&self) -> bool {
        true
    }

    fn start(&mut self, resets: ResetNotifier) -> Result<(), HapticError> {
        *self.0.resets.lock() = Some(resets);
        self.0.calls.lock().push(HapticCall::Start);
        Ok(())
    }

    fn restart(&mut self) -> Result<(), HapticError> {
        self.0.calls.lock().push(HapticCall::Restart);
        Ok(())
    }

    fn play_continuous(&mut self, params: HapticParameters) -> Result<(), HapticError> {
        self.0.calls.lock().push(HapticCall::Play(params));
        Ok(())
    }

    fn send_parameters(&mut self, params: HapticParameters) -> Result<(), HapticError> {
        self.0.calls.lock().push(HapticCall::Send(params));
        Ok(())
    }

    fn stop(&mut self) {
        self.0.calls.lock().push(HapticCall::Stop);
    }
}

/// Wait until a published snapshot satisfies `predicate`
pub async fn wait_for<F>(
    snapshots: &mut tokio::sync::watch::Receiver<PlaybackSnapshot>,
    timeout: Duration,
    predicate: F,
) -> PlaybackSnapshot
where
    F: Fn(&PlaybackSnapshot) -> bool,
{
    let waited = tokio::time::timeout(timeout, async {
        loop {
            {
                let snapshot = snapshots.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            if snapshots.changed().await.is_err() {
                panic!("snapshot channel closed");
            }
        }
    })
    .await;
    match waited {
        Ok(snapshot) => snapshot,
        Err(_) => panic!("timed out, last snapshot: {:?}", *snapshots.borrow()),
    }
}
