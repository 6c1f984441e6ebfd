// Haptic synchronizer
// Owns the haptic engine lifecycle and mirrors loudness into effect parameters

use serde::Serialize;
use tracing::{debug, info, warn};

use super::engine::{HapticEngine, HapticParameters, ResetNotifier};
use crate::settings::HapticSettings;

/// Observable state of the haptic channel. `running` implies `supported && enabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HapticChannelState {
    pub supported: bool,
    pub enabled: bool,
    pub running: bool,
}

/// Linear loudness -> actuator mapping: baseline plus a span scaled by loudness
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HapticMapping {
    pub base_intensity: f32,
    pub intensity_span: f32,
    pub base_sharpness: f32,
    pub sharpness_span: f32,
}

impl HapticMapping {
    pub fn map(&self, loudness: f32) -> HapticParameters {
        let loudness = if loudness.is_nan() {
            0.0
        } else {
            loudness.clamp(0.0, 1.0)
        };
        HapticParameters {
            intensity: (self.base_intensity + loudness * self.intensity_span).clamp(0.0, 1.0),
            sharpness: (self.base_sharpness + loudness * self.sharpness_span).clamp(0.0, 1.0),
        }
    }

    /// Parameters of the effect when it starts
    pub fn baseline(&self) -> HapticParameters {
        self.map(0.0)
    }
}

impl Default for HapticMapping {
    fn default() -> Self {
        Self::from(&HapticSettings::default())
    }
}

impl From<&HapticSettings> for HapticMapping {
    fn from(settings: &HapticSettings) -> Self {
        Self {
            base_intensity: settings.base_intensity,
            intensity_span: settings.intensity_span,
            base_sharpness: settings.base_sharpness,
            sharpness_span: settings.sharpness_span,
        }
    }
}

pub struct HapticSynchronizer {
    engine: Box<dyn HapticEngine>,
    mapping: HapticMapping,
    resets: ResetNotifier,
    supported: bool,
    enabled: bool,
    running: bool,
}

impl HapticSynchronizer {
    pub fn new(engine: Box<dyn HapticEngine>, mapping: HapticMapping, enabled: bool) -> Self {
        let supported = engine.supports_haptics();
        if !supported {
            debug!("Haptics not supported, haptic feedback disabled");
        }
        Self {
            engine,
            mapping,
            resets: ResetNotifier::new(),
            supported,
            enabled,
            running: false,
        }
    }

    pub fn state(&self) -> HapticChannelState {
        HapticChannelState {
            supported: self.supported,
            enabled: self.enabled,
            running: self.running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start the continuous effect at the baseline.
    /// No-op when unsupported, disabled or already running; failures are logged.
    pub fn start(&mut self) {
        if !self.supported || !self.enabled || self.running {
            return;
        }

        // Stale resets from a previous run don't apply
        self.resets.take();
        if let Err(e) = self.engine.start(self.resets.clone()) {
            warn!("Haptic engine failed to start: {}", e);
            return;
        }
        if let Err(e) = self.engine.play_continuous(self.mapping.baseline()) {
            warn!("Haptic effect failed to start: {}", e);
            self.engine.stop();
            return;
        }
        self.running = true;
        debug!("Haptic effect started");
    }

    /// Push the effect parameters for `loudness`. No-op when not running.
    pub fn update(&mut self, loudness: f32) {
        if !self.running {
            return;
        }
        if self.resets.take() && !self.recover() {
            return;
        }

        let params = self.mapping.map(loudness);
        if let Err(e) = self.engine.send_parameters(params) {
            debug!("Haptic parameter update dropped: {}", e);
        }
    }

    /// Stop the effect and release the engine. Safe to call at any time.
    pub fn stop(&mut self) {
        if self.running {
            self.engine.stop();
            self.running = false;
            debug!("Haptic effect stopped");
        }
    }

    /// Toggle the user preference. Disabling stops the effect; enabling while
    /// playback is active starts it again.
    pub fn set_enabled(&mut self, enabled: bool, playback_active: bool) {
        self.enabled = enabled;
        if !enabled {
            self.stop();
        } else if playback_active {
            self.start();
        }
    }

    /// Restart after the OS reset the engine. Returns false if the channel stopped.
    fn recover(&mut self) -> bool {
        info!("Haptic engine reset, restarting");
        let restarted = self
            .engine
            .restart()
            .and_then(|_| self.engine.play_continuous(self.mapping.baseline()));
        match restarted {
            Ok(()) => true,
            Err(e) => {
                warn!("Haptic engine restart failed: {}", e);
                self.engine.stop();
                self.running = false;
                false
            }
        }
    }
}

impl Drop for HapticSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}
