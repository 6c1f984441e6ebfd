// Playback session
// Ties cache, engine, loudness and haptics together for one selected asset
// and publishes a single snapshot timeline to the UI layer

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::analysis::LoudnessAnalyzer;
use crate::assets::{AssetCache, MeditationAsset};
use crate::audio::{AudioSession, EngineEvent, Interruption, PlaybackEngine};
use crate::error::SessionError;
use crate::haptics::{HapticEngine, HapticMapping, HapticSynchronizer};
use crate::settings::PipelineSettings;
use crate::state::{PlaybackSnapshot, PlaybackState};

/// Everything guarded by the session lock
struct SessionCore {
    engine: PlaybackEngine,
    haptics: HapticSynchronizer,
    audio_session: Box<dyn AudioSession>,
    asset_id: Option<String>,
    duration: f64,
    /// Reported instead of the engine state while loading and after the track ended
    phase: Option<PlaybackState>,
    ticker: Option<JoinHandle<()>>,
    /// Bumped on every teardown so stale play requests and tickers back off
    generation: u64,
}

impl SessionCore {
    fn snapshot(&self) -> PlaybackSnapshot {
        let state = self.phase.clone().unwrap_or_else(|| self.engine.state());
        let current_time = match (&self.phase, &state) {
            (Some(PlaybackState::Completed), _) => self.duration,
            (Some(_), _) | (None, PlaybackState::Idle) => 0.0,
            (None, _) => self.engine.current_time(),
        };
        PlaybackSnapshot {
            is_playing: state.is_playing(),
            state,
            asset_id: self.asset_id.clone(),
            loudness: self.engine.analyzer().loudness(),
            current_time,
            duration: self.duration,
            haptics: self.haptics.state(),
        }
    }

    /// Keep the haptic effect running exactly while audio plays
    fn sync_haptics(&mut self) {
        if self.engine.is_playing() {
            self.haptics.start();
        } else {
            self.haptics.stop();
        }
    }

    /// Release every playback resource. Leaves the state Idle.
    fn release(&mut self) {
        self.generation += 1;
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.engine.stop();
        self.haptics.stop();
        self.audio_session.deactivate();
        self.asset_id = None;
        self.duration = 0.0;
        self.phase = None;
    }
}

struct SessionShared {
    cache: Arc<AssetCache>,
    core: Mutex<SessionCore>,
    snapshots: watch::Sender<PlaybackSnapshot>,
    tick_period: Duration,
}

impl SessionShared {
    fn publish(&self, core: &SessionCore) {
        self.snapshots.send_replace(core.snapshot());
    }

    /// One poll of the ticker. Returns false once the load it belongs to is gone.
    fn tick(&self, generation: u64) -> bool {
        let mut core = self.core.lock();
        if core.generation != generation {
            return false;
        }
        if core.engine.is_playing() {
            let loudness = core.engine.analyzer().loudness();
            core.haptics.update(loudness);
        }
        self.publish(&core);
        true
    }

    /// Natural end of the track: release resources but keep the terminal state
    fn finish(&self, generation: u64, event: EngineEvent) {
        let mut core = self.core.lock();
        if core.generation != generation {
            return;
        }
        // Called from the ticker itself, so detach rather than abort
        core.ticker.take();
        core.engine.stop();
        core.haptics.stop();
        core.audio_session.deactivate();
        core.phase = Some(match event {
            EngineEvent::Completed => {
                info!("Session completed");
                PlaybackState::Completed
            }
            EngineEvent::Failed(reason) => {
                warn!("Session failed during playback: {}", reason);
                PlaybackState::Failed(reason)
            }
        });
        self.publish(&core);
    }

    fn interrupt(&self, interruption: Interruption) {
        let mut core = self.core.lock();
        if core.engine.handle_interruption(interruption) {
            core.sync_haptics();
            self.publish(&core);
        }
    }
}

/// Orchestrates one playback at a time. Cheap to query from any thread;
/// commands take the session lock briefly.
pub struct PlaybackSession {
    shared: Arc<SessionShared>,
    interruptions: Option<JoinHandle<()>>,
}

impl PlaybackSession {
    /// Build a session around its collaborators. Interruptions from
    /// `audio_session` are consumed on the current Tokio runtime if there is one.
    pub fn new(
        cache: Arc<AssetCache>,
        settings: &PipelineSettings,
        haptic_engine: Box<dyn HapticEngine>,
        mut audio_session: Box<dyn AudioSession>,
    ) -> Self {
        let analyzer = Arc::new(LoudnessAnalyzer::new(settings.playback.smoothing));
        let engine = PlaybackEngine::new(settings.playback.output, analyzer);
        let haptics = HapticSynchronizer::new(
            haptic_engine,
            HapticMapping::from(&settings.haptics),
            settings.haptics.enabled,
        );
        let interruption_rx = audio_session.take_interruptions();

        let core = SessionCore {
            engine,
            haptics,
            audio_session,
            asset_id: None,
            duration: 0.0,
            phase: None,
            ticker: None,
            generation: 0,
        };
        let (snapshots, _) = watch::channel(core.snapshot());
        let shared = Arc::new(SessionShared {
            cache,
            core: Mutex::new(core),
            snapshots,
            tick_period: Duration::from_secs_f64(1.0 / settings.playback.poll_hz.max(1) as f64),
        });

        let interruptions = match (interruption_rx, tokio::runtime::Handle::try_current()) {
            (Some(rx), Ok(handle)) => Some(handle.spawn(watch_interruptions(
                Arc::downgrade(&shared),
                rx,
            ))),
            (Some(_), Err(_)) => {
                warn!("No async runtime, audio interruptions will be ignored");
                None
            }
            (None, _) => None,
        };

        Self {
            shared,
            interruptions,
        }
    }

    /// Play `asset` from the start, downloading it first if needed.
    /// Returns the track duration in seconds.
    pub async fn play(&self, asset: &MeditationAsset) -> Result<f64, SessionError> {
        let generation = {
            let mut core = self.shared.core.lock();
            core.release();
            core.asset_id = Some(asset.id.clone());
            core.phase = Some(PlaybackState::Loading);
            self.shared.publish(&core);
            core.generation
        };
        info!("Starting session for {}", asset.id);

        let resolved = self.shared.cache.resolve(asset).await;

        let mut core = self.shared.core.lock();
        if core.generation != generation {
            debug!("Play request for {} superseded", asset.id);
            return Err(SessionError::Superseded);
        }

        let path = match resolved {
            Ok(path) => path,
            Err(e) => {
                let e = SessionError::from(e);
                warn!("Could not resolve {}: {}", asset.id, e);
                core.phase = Some(PlaybackState::Failed(e.reason()));
                self.shared.publish(&core);
                return Err(e);
            }
        };

        if let Err(e) = core.audio_session.activate() {
            warn!("{}, continuing without a configured session", e);
        }

        let loaded = match core.engine.load(&path) {
            Ok(loaded) => loaded,
            Err(e) => {
                core.audio_session.deactivate();
                let e = SessionError::from(e);
                core.phase = Some(PlaybackState::Failed(e.reason()));
                self.shared.publish(&core);
                return Err(e);
            }
        };

        core.phase = None;
        core.duration = loaded.duration;
        core.sync_haptics();
        core.ticker = Some(tokio::spawn(run_ticker(
            Arc::clone(&self.shared),
            generation,
            loaded.events,
        )));
        self.shared.publish(&core);

        Ok(loaded.duration)
    }

    pub fn pause(&self) {
        self.with_core(|core| {
            core.engine.pause();
            core.sync_haptics();
        });
    }

    pub fn resume(&self) {
        self.with_core(|core| {
            core.engine.resume();
            core.sync_haptics();
        });
    }

    /// Seek to `seconds`. Targets past the end are ignored.
    pub fn seek(&self, seconds: f64) -> bool {
        self.seek_with(|engine| engine.seek(seconds))
    }

    /// Seek to a fraction of the duration
    pub fn seek_fraction(&self, fraction: f64) -> bool {
        self.seek_with(|engine| engine.seek_fraction(fraction))
    }

    /// Rewind `seconds`, stopping at the start
    pub fn skip_back(&self, seconds: f64) -> bool {
        self.seek_with(|engine| engine.skip_back(seconds))
    }

    /// Haptics preference. Audio is unaffected.
    pub fn set_haptics_enabled(&self, enabled: bool) {
        self.with_core(|core| {
            let playing = core.engine.is_playing();
            core.haptics.set_enabled(enabled, playing);
        });
    }

    /// Stop everything and return to Idle. Safe to call repeatedly.
    pub fn teardown(&self) {
        self.with_core(|core| {
            if core.asset_id.is_some() {
                debug!("Tearing down session");
            }
            core.release();
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Fresh snapshot, independent of the ticker
    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.shared.core.lock().snapshot()
    }

    pub fn state(&self) -> PlaybackState {
        self.snapshot().state
    }

    /// Run a command under the session lock and publish the result
    /// Loudness restarts from zero and the haptic effect restarts from its
    /// baseline around every seek
    fn seek_with(&self, seek: impl FnOnce(&mut PlaybackEngine) -> bool) -> bool {
        self.with_core(|core| {
            core.haptics.stop();
            let analyzer = core.engine.analyzer();
            analyzer.reset();
            let sought = seek(&mut core.engine);
            if core.engine.is_playing() {
                analyzer.activate();
            }
            core.sync_haptics();
            sought
        })
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut SessionCore) -> R) -> R {
        let mut core = self.shared.core.lock();
        let result = f(&mut core);
        self.shared.publish(&core);
        result
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if let Some(task) = self.interruptions.take() {
            task.abort();
        }
        self.teardown();
    }
}

async fn run_ticker(
    shared: Arc<SessionShared>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
) {
    let mut interval = tokio::time::interval(shared.tick_period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !shared.tick(generation) {
                    return;
                }
            }
            event = events.recv() => {
                if let Some(event) = event {
                    shared.finish(generation, event);
                }
                return;
            }
        }
    }
}

async fn watch_interruptions(
    shared: Weak<SessionShared>,
    mut interruptions: mpsc::UnboundedReceiver<Interruption>,
) {
    while let Some(interruption) = interruptions.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        debug!("Audio interruption: {:?}", interruption);
        shared.interrupt(interruption);
    }
}
