// Audio output
// cpal device output with a ring buffer, plus a silent real-time paced output

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::analysis::LoudnessAnalyzer;
use crate::error::AudioError;
use crate::settings::OutputKind;

/// Buffered audio ahead of the device, in seconds
const BUFFER_SECONDS: f32 = 0.25;

type RingProducer = ringbuf::HeapProd<f32>;
type RingConsumer = ringbuf::HeapCons<f32>;

/// Where decoded samples go. Implementations are driven by the decode worker
/// on one side and by real time (device callback or wall clock) on the other.
pub trait OutputSink: Send + Sync {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Queue interleaved samples without blocking. Returns how many were accepted.
    /// Accepts nothing while a clear is pending.
    fn write(&self, samples: &[f32]) -> usize;

    /// Drop queued samples (after a seek)
    fn clear(&self);

    fn set_paused(&self, paused: bool);

    /// Frames actually played since the output was opened. Monotonic.
    fn frames_played(&self) -> u64;

    /// Frames queued but not yet played
    fn queued_frames(&self) -> usize;

    /// Route played buffers into a loudness analyzer
    fn install_tap(&self, tap: Arc<LoudnessAnalyzer>);

    fn remove_tap(&self);
}

/// Open the configured output. Device failures fall back to the silent output.
pub fn open_output(
    kind: OutputKind,
    preferred_rate: u32,
    channels: u16,
) -> Arc<dyn OutputSink> {
    match kind {
        OutputKind::Silent => Arc::new(SilentOutput::new(preferred_rate, channels)),
        OutputKind::Device => match CpalOutput::new() {
            Ok(output) => Arc::new(output),
            Err(e) => {
                warn!("No usable audio device ({}), continuing with silent output", e);
                Arc::new(SilentOutput::new(preferred_rate, channels))
            }
        },
    }
}

/// State shared between the cpal callback and the writer side
struct CallbackShared {
    consumer: Mutex<RingConsumer>,
    tap: Mutex<Option<Arc<LoudnessAnalyzer>>>,
    clear_flag: AtomicBool,
    paused: AtomicBool,
    frames_played: AtomicU64,
    channels: u16,
}

pub struct CpalOutput {
    _stream: Stream,
    producer: Mutex<RingProducer>,
    shared: Arc<CallbackShared>,
    sample_rate: u32,
    channels: u16,
}

// SAFETY: the cpal stream handle is only dropped, never used from another thread
// after construction; all shared state goes through Arc/atomics/locks.
unsafe impl Send for CpalOutput {}
unsafe impl Sync for CpalOutput {}

impl CpalOutput {
    /// Create a new audio output with default device
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Output("no output device available".to_string()))?;

        let config = device
            .default_output_config()
            .map_err(|e| AudioError::Output(format!("failed to get default output config: {}", e)))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        let capacity = (sample_rate as f32 * BUFFER_SECONDS) as usize * channels as usize;
        let rb = HeapRb::<f32>::new(capacity.max(1024));
        let (producer, consumer) = rb.split();

        let shared = Arc::new(CallbackShared {
            consumer: Mutex::new(consumer),
            tap: Mutex::new(None),
            clear_flag: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            frames_played: AtomicU64::new(0),
            channels,
        });

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), Arc::clone(&shared))?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), Arc::clone(&shared))?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), Arc::clone(&shared))?
            }
            format => {
                return Err(AudioError::Output(format!(
                    "unsupported sample format: {:?}",
                    format
                )))
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::Output(format!("failed to start stream: {}", e)))?;

        info!("Opened audio device: {} Hz, {} channels", sample_rate, channels);

        Ok(Self {
            _stream: stream,
            producer: Mutex::new(producer),
            shared,
            sample_rate,
            channels,
        })
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        shared: Arc<CallbackShared>,
    ) -> Result<Stream, AudioError> {
        let mut scratch: Vec<f32> = Vec::new();
        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut consumer = shared.consumer.lock();

                    // Drain everything queued before the clear request
                    if shared.clear_flag.load(Ordering::Acquire) {
                        consumer.clear();
                        shared.clear_flag.store(false, Ordering::Release);
                    }

                    if shared.paused.load(Ordering::Acquire) {
                        for sample in data.iter_mut() {
                            *sample = T::from_sample(0.0);
                        }
                        return;
                    }

                    scratch.clear();
                    for sample in data.iter_mut() {
                        match consumer.try_pop() {
                            Some(value) => {
                                scratch.push(value);
                                *sample = T::from_sample(value);
                            }
                            None => *sample = T::from_sample(0.0),
                        }
                    }
                    drop(consumer);

                    if scratch.is_empty() {
                        return;
                    }
                    let frames = scratch.len() / shared.channels.max(1) as usize;
                    shared.frames_played.fetch_add(frames as u64, Ordering::AcqRel);
                    if let Some(tap) = shared.tap.lock().as_ref() {
                        tap.process_buffer(&scratch);
                    }
                },
                move |err| {
                    error!("Audio output error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::Output(format!("failed to build output stream: {}", e)))?;

        Ok(stream)
    }
}

impl OutputSink for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn write(&self, samples: &[f32]) -> usize {
        if self.shared.clear_flag.load(Ordering::Acquire) {
            return 0;
        }
        let mut producer = self.producer.lock();
        // Whole frames only so channels never get out of step
        let frames = producer.vacant_len().min(samples.len()) / self.channels.max(1) as usize;
        producer.push_slice(&samples[..frames * self.channels.max(1) as usize])
    }

    fn clear(&self) {
        // The callback owns the consumer; it drains on its next run
        self.shared.clear_flag.store(true, Ordering::Release);
    }

    fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Release);
    }

    fn frames_played(&self) -> u64 {
        self.shared.frames_played.load(Ordering::Acquire)
    }

    fn queued_frames(&self) -> usize {
        self.producer.lock().occupied_len() / self.channels.max(1) as usize
    }

    fn install_tap(&self, tap: Arc<LoudnessAnalyzer>) {
        *self.shared.tap.lock() = Some(tap);
    }

    fn remove_tap(&self) {
        *self.shared.tap.lock() = None;
    }
}

/// Clock state for the silent output
struct SilentClock {
    queued: u64,
    played: u64,
    carry: f64,
    last_tick: Instant,
    paused: bool,
}

/// Output that plays nothing but consumes samples at real-time rate.
/// Used headless and when no audio device can be opened.
pub struct SilentOutput {
    sample_rate: u32,
    channels: u16,
    capacity_frames: u64,
    clock: Mutex<SilentClock>,
    tap: Mutex<Option<Arc<LoudnessAnalyzer>>>,
}

impl SilentOutput {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            capacity_frames: ((sample_rate as f32 * BUFFER_SECONDS) as u64).max(1),
            clock: Mutex::new(SilentClock {
                queued: 0,
                played: 0,
                carry: 0.0,
                last_tick: Instant::now(),
                paused: false,
            }),
            tap: Mutex::new(None),
        }
    }

    fn advance(&self, clock: &mut SilentClock) {
        let now = Instant::now();
        let elapsed = now.duration_since(clock.last_tick).as_secs_f64();
        clock.last_tick = now;
        if clock.paused {
            return;
        }
        let due = elapsed * self.sample_rate as f64 + clock.carry;
        let whole = due.floor();
        clock.carry = due - whole;
        let consumed = (whole as u64).min(clock.queued);
        clock.queued -= consumed;
        clock.played += consumed;
        if clock.queued == 0 {
            // Underrun: time passing with nothing queued doesn't count as playback
            clock.carry = 0.0;
        }
    }
}

impl OutputSink for SilentOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn write(&self, samples: &[f32]) -> usize {
        let accepted = {
            let mut clock = self.clock.lock();
            self.advance(&mut clock);
            if clock.paused {
                return 0;
            }
            let space = self.capacity_frames.saturating_sub(clock.queued);
            let frames = (samples.len() / self.channels as usize) as u64;
            let accepted = frames.min(space);
            clock.queued += accepted;
            accepted as usize * self.channels as usize
        };

        if accepted > 0 {
            if let Some(tap) = self.tap.lock().as_ref() {
                tap.process_buffer(&samples[..accepted]);
            }
        }
        accepted
    }

    fn clear(&self) {
        let mut clock = self.clock.lock();
        self.advance(&mut clock);
        clock.queued = 0;
        clock.carry = 0.0;
    }

    fn set_paused(&self, paused: bool) {
        let mut clock = self.clock.lock();
        self.advance(&mut clock);
        clock.paused = paused;
    }

    fn frames_played(&self) -> u64 {
        let mut clock = self.clock.lock();
        self.advance(&mut clock);
        clock.played
    }

    fn queued_frames(&self) -> usize {
        let mut clock = self.clock.lock();
        self.advance(&mut clock);
        clock.queued as usize
    }

    fn install_tap(&self, tap: Arc<LoudnessAnalyzer>) {
        *self.tap.lock() = Some(tap);
    }

    fn remove_tap(&self) {
        *self.tap.lock() = None;
    }
}
