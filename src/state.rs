// Playback state and the read-only projection handed to the UI layer
use serde::Serialize;

use crate::haptics::HapticChannelState;

/// Playback state machine.
/// Idle -> Loading -> Playing <-> Paused -> Completed, with Seeking transient
/// inside Playing/Paused and Failed reachable from Loading or Playing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "camelCase")]
pub enum PlaybackState {
    Idle,
    Loading,
    /// Position in seconds
    Playing(f64),
    /// Position in seconds
    Paused(f64),
    /// Seek target as a fraction of the duration
    Seeking(f64),
    Completed,
    Failed(String),
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing(_))
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, PlaybackState::Paused(_))
    }

    /// Anything other than Idle holds (or is acquiring) the device
    pub fn is_active(&self) -> bool {
        !matches!(self, PlaybackState::Idle)
    }

    /// Completed and Failed are terminal until the next play or teardown
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Completed | PlaybackState::Failed(_))
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::Idle
    }
}

/// Continuously updated view of the session for display
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub asset_id: Option<String>,
    pub loudness: f32,
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub haptics: HapticChannelState,
}

impl PlaybackSnapshot {
    pub fn remaining(&self) -> f64 {
        (self.duration - self.current_time).max(0.0)
    }

    /// Progress in [0, 1] for a scrub bar
    pub fn progress(&self) -> f64 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        (self.current_time / self.duration).clamp(0.0, 1.0)
    }
}

/// mm:ss formatting used by the command line front end
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
