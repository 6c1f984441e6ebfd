// System audio session
// Activation and interruption events from the platform audio stack

use cpal::traits::HostTrait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::AudioError;

/// Interruption raised by the system (call, alarm, other app taking the device)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    Began,
    /// `should_resume` is the system's permission to continue playback
    Ended { should_resume: bool },
}

/// Platform audio session. Activation failures are never fatal to playback.
pub trait AudioSession: Send {
    /// Configure and activate the session for playback
    fn activate(&mut self) -> Result<(), AudioError>;

    fn deactivate(&mut self);

    /// Interruption events. The receiver can be taken once.
    fn take_interruptions(&mut self) -> Option<mpsc::UnboundedReceiver<Interruption>>;
}

/// Desktop session: there is no category to set, so activation only checks
/// that an output device exists. Platform glue can push interruptions
/// through `interruption_sender`.
pub struct DesktopAudioSession {
    events_tx: mpsc::UnboundedSender<Interruption>,
    events_rx: Option<mpsc::UnboundedReceiver<Interruption>>,
    active: bool,
}

impl DesktopAudioSession {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx: Some(events_rx),
            active: false,
        }
    }

    /// Handle for raising interruptions from outside the session
    pub fn interruption_sender(&self) -> mpsc::UnboundedSender<Interruption> {
        self.events_tx.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Default for DesktopAudioSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSession for DesktopAudioSession {
    fn activate(&mut self) -> Result<(), AudioError> {
        if cpal::default_host().default_output_device().is_none() {
            return Err(AudioError::SessionConfig(
                "no default output device".to_string(),
            ));
        }
        self.active = true;
        debug!("Audio session activated");
        Ok(())
    }

    fn deactivate(&mut self) {
        if self.active {
            debug!("Audio session deactivated");
        }
        self.active = false;
    }

    fn take_interruptions(&mut self) -> Option<mpsc::UnboundedReceiver<Interruption>> {
        self.events_rx.take()
    }
}
