// Real-time loudness tracking
// Converts per-buffer amplitude into a smoothed, bounded [0, 1] level

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Weight kept from the previous value on each update
/// 0.3 keeps single-buffer transients out while settling within a few buffers
pub const DEFAULT_SMOOTHING: f32 = 0.3;

/// Lower bound used when converting metering power to linear amplitude
const SILENCE_DB: f32 = -160.0;

/// Root-mean-square of a buffer of samples
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Convert an average power reading in dB to a linear amplitude
pub fn decibels_to_linear(db: f32) -> f32 {
    if db.is_nan() || db <= SILENCE_DB {
        return 0.0;
    }
    10f32.powf(db / 20.0)
}

/// Clamp to [0, 1], mapping NaN to silence
fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Smoothed loudness shared between the audio callback and the UI/haptic side.
///
/// The level is a single `f32` stored as bits in an `AtomicU32`, so the audio
/// thread can update it without locks and readers never see a torn value.
pub struct LoudnessAnalyzer {
    level: AtomicU32,
    smoothing: f32,
    active: AtomicBool,
}

impl LoudnessAnalyzer {
    pub fn new(smoothing: f32) -> Self {
        Self {
            level: AtomicU32::new(0f32.to_bits()),
            smoothing: clamp_unit(smoothing),
            active: AtomicBool::new(false),
        }
    }

    /// Current smoothed loudness in [0, 1]
    pub fn loudness(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Acquire))
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    /// Feed one instantaneous reading and return the new smoothed value.
    /// Ignored while the analyzer is inactive (nothing playing).
    pub fn update(&self, instant: f32) -> f32 {
        if !self.active.load(Ordering::Acquire) {
            return self.loudness();
        }
        self.apply(instant)
    }

    /// Feed one buffer of samples (any channel layout)
    pub fn process_buffer(&self, samples: &[f32]) -> f32 {
        self.update(rms(samples))
    }

    /// Feed a metering-style average power reading in dB
    pub fn update_from_decibels(&self, db: f32) -> f32 {
        self.update(decibels_to_linear(db))
    }

    /// Start accepting updates
    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Stop accepting updates and force the level to zero
    pub fn reset(&self) {
        self.active.store(false, Ordering::Release);
        self.level.store(0f32.to_bits(), Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn apply(&self, instant: f32) -> f32 {
        let input = clamp_unit(instant);
        let alpha = self.smoothing;
        let mut next = 0.0;
        // fetch_update retries if the callback and another writer race
        let _ = self
            .level
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let prev = f32::from_bits(bits);
                next = clamp_unit(alpha * prev + (1.0 - alpha) * input);
                Some(next.to_bits())
            });
        next
    }
}

impl Default for LoudnessAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}
