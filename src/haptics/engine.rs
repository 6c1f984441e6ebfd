// Haptic hardware interface
// Continuous-effect actuators whose intensity and sharpness can be changed while running

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::HapticError;

/// Dynamic parameters of a continuous effect, both in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HapticParameters {
    pub intensity: f32,
    pub sharpness: f32,
}

/// Handed to the hardware engine at start. The engine calls `notify` when the
/// OS stops or resets it; the synchronizer restarts on its next update.
#[derive(Debug, Clone, Default)]
pub struct ResetNotifier {
    flag: Arc<AtomicBool>,
}

impl ResetNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Consume a pending reset
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

/// Platform haptic engine
pub trait HapticEngine: Send {
    /// Capability query, asked once when the synchronizer is built
    fn supports_haptics(&self) -> bool;

    /// Start the hardware engine. `resets` must be notified when the OS resets it.
    fn start(&mut self, resets: ResetNotifier) -> Result<(), HapticError>;

    /// Restart the hardware engine after a reset
    fn restart(&mut self) -> Result<(), HapticError>;

    /// Begin an indefinite continuous effect
    fn play_continuous(&mut self, params: HapticParameters) -> Result<(), HapticError>;

    /// Change the running effect's parameters immediately
    fn send_parameters(&mut self, params: HapticParameters) -> Result<(), HapticError>;

    /// Stop the effect and release the hardware engine
    fn stop(&mut self);
}

/// Engine for devices without an actuator. Every call is a no-op.
#[derive(Debug, Default)]
pub struct NullHapticEngine;

impl HapticEngine for NullHapticEngine {
    fn supports_haptics(&self) -> bool {
        false
    }

    fn start(&mut self, _resets: ResetNotifier) -> Result<(), HapticError> {
        Err(HapticError::Unsupported)
    }

    fn restart(&mut self) -> Result<(), HapticError> {
        Err(HapticError::Unsupported)
    }

    fn play_continuous(&mut self, _params: HapticParameters) -> Result<(), HapticError> {
        Err(HapticError::Unsupported)
    }

    fn send_parameters(&mut self, _params: HapticParameters) -> Result<(), HapticError> {
        Err(HapticError::Unsupported)
    }

    fn stop(&mut self) {}
}
