// Playback engine
// Load-and-play of a local file with pause/resume/seek, a decode worker thread
// feeding the output, and a loudness tap on the played audio

use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::decoder::{remap_channels, AudioDecoder};
use super::output::{open_output, OutputSink};
use super::resampler::StreamResampler;
use super::session::Interruption;
use crate::analysis::LoudnessAnalyzer;
use crate::error::AudioError;
use crate::settings::OutputKind;
use crate::state::PlaybackState;

/// Worker back-off when the output is full or draining
const WORKER_IDLE: Duration = Duration::from_millis(4);

/// How long `seek` waits for the worker to pick up the request
const SEEK_ACK_TIMEOUT: Duration = Duration::from_millis(250);

/// Raised by the decode worker, at most one per load
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Completed,
    Failed(String),
}

/// Result of a successful `load`
#[derive(Debug)]
pub struct LoadedTrack {
    pub duration: f64,
    pub sample_rate: u32,
    /// Completion/failure of this load only. Closed once the worker exits.
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
}

enum WorkerCommand {
    Seek {
        target: f64,
        claim: Arc<SeekClaim>,
        ack: std_mpsc::Sender<bool>,
    },
}

const CLAIM_PENDING: u8 = 0;
const CLAIM_TAKEN: u8 = 1;
const CLAIM_ABANDONED: u8 = 2;

/// Hand-off for one seek request: either the worker takes it or the caller
/// abandons it, never both
#[derive(Default)]
struct SeekClaim(AtomicU8);

impl SeekClaim {
    /// Worker side. False once the caller has given up.
    fn take(&self) -> bool {
        self.0
            .compare_exchange(CLAIM_PENDING, CLAIM_TAKEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Caller side. False once the worker has started seeking.
    fn abandon(&self) -> bool {
        self.0
            .compare_exchange(CLAIM_PENDING, CLAIM_ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Origin for position reporting: position = seek_offset + frames since base
struct Timeline {
    seek_offset: f64,
    base_frames: u64,
}

struct TrackShared {
    state: Mutex<PlaybackState>,
    timeline: Mutex<Timeline>,
    stop: AtomicBool,
}

struct ActiveTrack {
    sink: Arc<dyn OutputSink>,
    shared: Arc<TrackShared>,
    commands: std_mpsc::Sender<WorkerCommand>,
    worker: Option<JoinHandle<()>>,
    duration: f64,
}

impl ActiveTrack {
    fn position(&self) -> f64 {
        let timeline = self.shared.timeline.lock();
        let played = self.sink.frames_played().saturating_sub(timeline.base_frames);
        let position = timeline.seek_offset + played as f64 / self.sink.sample_rate() as f64;
        position.clamp(0.0, self.duration)
    }
}

pub struct PlaybackEngine {
    output_kind: OutputKind,
    analyzer: Arc<LoudnessAnalyzer>,
    track: Option<ActiveTrack>,
    /// State reported while no track is held (Idle, Loading, or Failed after a bad load)
    idle_state: PlaybackState,
    interrupted: bool,
}

impl PlaybackEngine {
    pub fn new(output_kind: OutputKind, analyzer: Arc<LoudnessAnalyzer>) -> Self {
        Self {
            output_kind,
            analyzer,
            track: None,
            idle_state: PlaybackState::Idle,
            interrupted: false,
        }
    }

    pub fn analyzer(&self) -> Arc<LoudnessAnalyzer> {
        Arc::clone(&self.analyzer)
    }

    /// Open `path` and start playing it. Stops whatever was playing first.
    pub fn load(&mut self, path: &Path) -> Result<LoadedTrack, AudioError> {
        self.stop();
        self.idle_state = PlaybackState::Loading;

        match self.start_track(path) {
            Ok(loaded) => Ok(loaded),
            Err(e) => {
                warn!("Failed to load {:?}: {}", path, e);
                self.idle_state = PlaybackState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn start_track(&mut self, path: &Path) -> Result<LoadedTrack, AudioError> {
        let (decoder, duration) = AudioDecoder::open_with_duration(path)?;
        let file_rate = decoder.sample_rate();

        let sink = open_output(self.output_kind, file_rate, decoder.channels() as u16);
        let resampler = if sink.sample_rate() != file_rate {
            Some(StreamResampler::new(
                file_rate,
                sink.sample_rate(),
                sink.channels() as usize,
            )?)
        } else {
            None
        };

        let shared = Arc::new(TrackShared {
            state: Mutex::new(PlaybackState::Playing(0.0)),
            timeline: Mutex::new(Timeline {
                seek_offset: 0.0,
                base_frames: sink.frames_played(),
            }),
            stop: AtomicBool::new(false),
        });

        self.analyzer.reset();
        sink.install_tap(Arc::clone(&self.analyzer));
        self.analyzer.activate();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = std_mpsc::channel();

        let worker = DecodeWorker {
            out_channels: sink.channels() as usize,
            decoder,
            resampler,
            sink: Arc::clone(&sink),
            shared: Arc::clone(&shared),
            analyzer: Arc::clone(&self.analyzer),
            commands: commands_rx,
            events: events_tx,
        };
        let handle = std::thread::Builder::new()
            .name("stillpoint-decode".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                sink.remove_tap();
                self.analyzer.reset();
                AudioError::Output(format!("failed to spawn decode worker: {}", e))
            })?;

        info!("Playing {:?} ({:.1}s at {} Hz)", path, duration, file_rate);

        self.track = Some(ActiveTrack {
            sink,
            shared,
            commands: commands_tx,
            worker: Some(handle),
            duration,
        });
        self.interrupted = false;

        Ok(LoadedTrack {
            duration,
            sample_rate: file_rate,
            events: events_rx,
        })
    }

    /// Pause without losing position. No-op unless playing.
    pub fn pause(&mut self) {
        let Some(track) = &self.track else {
            return;
        };
        let position = track.position();
        let mut state = track.shared.state.lock();
        if state.is_playing() {
            track.sink.set_paused(true);
            self.analyzer.reset();
            *state = PlaybackState::Paused(position);
            debug!("Paused at {:.2}s", position);
        }
    }

    /// Resume from the paused position. No-op unless paused.
    pub fn resume(&mut self) {
        let Some(track) = &self.track else {
            return;
        };
        let position = track.position();
        let mut state = track.shared.state.lock();
        if state.is_paused() {
            self.analyzer.activate();
            track.sink.set_paused(false);
            *state = PlaybackState::Playing(position);
            debug!("Resumed at {:.2}s", position);
        }
    }

    /// Stop playback and release the output, the worker and the tap.
    /// When this returns no further event for the previous load can be produced.
    pub fn stop(&mut self) {
        self.interrupted = false;
        if let Some(mut track) = self.track.take() {
            track.shared.stop.store(true, Ordering::Release);
            track.sink.set_paused(true);
            if let Some(worker) = track.worker.take() {
                if worker.join().is_err() {
                    error!("Decode worker panicked");
                }
            }
            track.sink.remove_tap();
            debug!("Playback stopped");
        }
        self.analyzer.reset();
        self.idle_state = PlaybackState::Idle;
    }

    /// Seek to `target` seconds. Negative targets clamp to zero; targets past
    /// the end are rejected. Returns whether the seek happened.
    pub fn seek(&mut self, target: f64) -> bool {
        let Some(track) = &self.track else {
            return false;
        };
        if !target.is_finite() || target > track.duration {
            debug!("Rejected seek to {} (duration {:.2})", target, track.duration);
            return false;
        }
        let target = target.max(0.0);

        let was_playing = {
            let mut state = track.shared.state.lock();
            let was_playing = match *state {
                PlaybackState::Playing(_) => true,
                PlaybackState::Paused(_) => false,
                _ => return false,
            };
            let fraction = if track.duration > 0.0 {
                target / track.duration
            } else {
                0.0
            };
            *state = PlaybackState::Seeking(fraction);
            was_playing
        };

        let (ack_tx, ack_rx) = std_mpsc::channel();
        let claim = Arc::new(SeekClaim::default());
        let sent = track
            .commands
            .send(WorkerCommand::Seek {
                target,
                claim: Arc::clone(&claim),
                ack: ack_tx,
            })
            .is_ok();
        let sought = sent
            && match ack_rx.recv_timeout(SEEK_ACK_TIMEOUT) {
                Ok(ok) => ok,
                Err(std_mpsc::RecvTimeoutError::Timeout) if claim.abandon() => {
                    warn!("Seek to {:.2} not picked up, dropping it", target);
                    false
                }
                // Already being applied; the decoder seek itself is short
                Err(std_mpsc::RecvTimeoutError::Timeout) => ack_rx.recv().unwrap_or(false),
                Err(std_mpsc::RecvTimeoutError::Disconnected) => false,
            };

        let position = track.position();
        let mut state = track.shared.state.lock();
        // The worker may have completed or failed in the meantime
        if matches!(*state, PlaybackState::Seeking(_)) {
            *state = if was_playing {
                PlaybackState::Playing(position)
            } else {
                PlaybackState::Paused(position)
            };
        }
        sought
    }

    /// Seek to a fraction of the duration (scrub bar)
    pub fn seek_fraction(&mut self, fraction: f64) -> bool {
        let duration = self.duration();
        self.seek(fraction.clamp(0.0, 1.0) * duration)
    }

    /// Jump back `seconds`, stopping at the start
    pub fn skip_back(&mut self, seconds: f64) -> bool {
        let target = (self.current_time() - seconds).max(0.0);
        self.seek(target)
    }

    /// Apply a system interruption. Returns true if the transport state changed.
    pub fn handle_interruption(&mut self, interruption: Interruption) -> bool {
        match interruption {
            Interruption::Began => {
                if self.is_playing() {
                    info!("Audio interrupted, pausing");
                    self.pause();
                    self.interrupted = true;
                    return true;
                }
                false
            }
            Interruption::Ended { should_resume } => {
                let was_interrupted = std::mem::take(&mut self.interrupted);
                if was_interrupted && should_resume && self.state().is_paused() {
                    info!("Interruption ended, resuming");
                    self.resume();
                    return true;
                }
                false
            }
        }
    }

    /// Current state, with the live position filled in
    pub fn state(&self) -> PlaybackState {
        let Some(track) = &self.track else {
            return self.idle_state.clone();
        };
        let state = track.shared.state.lock().clone();
        match state {
            PlaybackState::Playing(_) => PlaybackState::Playing(track.position()),
            PlaybackState::Paused(_) => PlaybackState::Paused(track.position()),
            other => other,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state().is_playing()
    }

    /// Elapsed seconds: seek offset plus audio played since the seek
    pub fn current_time(&self) -> f64 {
        let Some(track) = &self.track else {
            return 0.0;
        };
        if matches!(*track.shared.state.lock(), PlaybackState::Completed) {
            return track.duration;
        }
        track.position()
    }

    pub fn duration(&self) -> f64 {
        self.track.as_ref().map(|t| t.duration).unwrap_or(0.0)
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns the decoder on its own thread and keeps the output fed
struct DecodeWorker {
    decoder: AudioDecoder,
    resampler: Option<StreamResampler>,
    out_channels: usize,
    sink: Arc<dyn OutputSink>,
    shared: Arc<TrackShared>,
    analyzer: Arc<LoudnessAnalyzer>,
    commands: std_mpsc::Receiver<WorkerCommand>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl DecodeWorker {
    fn run(mut self) {
        let mut pending: Vec<f32> = Vec::new();
        let mut offset = 0;
        let mut end_of_stream = false;

        loop {
            if self.shared.stop.load(Ordering::Acquire) {
                return;
            }

            match self.commands.try_recv() {
                Ok(WorkerCommand::Seek { target, claim, ack }) => {
                    if !claim.take() {
                        debug!("Skipping abandoned seek to {:.2}", target);
                        continue;
                    }
                    let ok = self.seek(target);
                    if ok {
                        pending.clear();
                        offset = 0;
                        end_of_stream = false;
                    }
                    let _ = ack.send(ok);
                    continue;
                }
                Err(std_mpsc::TryRecvError::Disconnected) => return,
                Err(std_mpsc::TryRecvError::Empty) => {}
            }

            if offset < pending.len() {
                let written = self.sink.write(&pending[offset..]);
                offset += written;
                if written == 0 {
                    std::thread::sleep(WORKER_IDLE);
                }
                continue;
            }

            if end_of_stream {
                if self.sink.queued_frames() == 0 {
                    self.finish(EngineEvent::Completed);
                    return;
                }
                std::thread::sleep(WORKER_IDLE);
                continue;
            }

            match self.next_block() {
                Ok(Some(block)) => {
                    pending = block;
                    offset = 0;
                }
                Ok(None) => {
                    end_of_stream = true;
                    match self.resampler.as_mut().map(|r| r.flush()) {
                        Some(Ok(tail)) => {
                            pending = tail;
                            offset = 0;
                        }
                        Some(Err(e)) => warn!("Dropping resampler tail: {}", e),
                        None => {}
                    }
                }
                Err(e) => {
                    error!("Playback failed: {}", e);
                    self.finish(EngineEvent::Failed(e.to_string()));
                    return;
                }
            }
        }
    }

    /// Decode, remap and resample the next packet
    fn next_block(&mut self) -> Result<Option<Vec<f32>>, AudioError> {
        let Some(samples) = self.decoder.decode_next()? else {
            return Ok(None);
        };
        let mapped = remap_channels(&samples, self.decoder.channels(), self.out_channels);
        match self.resampler.as_mut() {
            Some(resampler) => Ok(Some(resampler.process(&mapped)?)),
            None => Ok(Some(mapped)),
        }
    }

    fn seek(&mut self, target: f64) -> bool {
        if let Err(e) = self.decoder.seek(target) {
            warn!("Seek to {:.2}s failed: {}", target, e);
            return false;
        }
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.sink.clear();
        *self.shared.timeline.lock() = Timeline {
            seek_offset: target,
            base_frames: self.sink.frames_played(),
        };
        debug!("Seeked to {:.2}s", target);
        true
    }

    fn finish(&self, event: EngineEvent) {
        {
            let mut state = self.shared.state.lock();
            *state = match &event {
                EngineEvent::Completed => PlaybackState::Completed,
                EngineEvent::Failed(reason) => PlaybackState::Failed(reason.clone()),
            };
        }
        self.analyzer.reset();
        if event == EngineEvent::Completed {
            info!("Playback completed");
        }
        // The receiver is gone if the session already moved on
        let _ = self.events.send(event);
    }
}
