// Audio playback module
// Uses Symphonia for decoding and cpal for output

pub mod decoder;
pub mod engine;
pub mod output;
pub mod resampler;
pub mod session;

pub use engine::{EngineEvent, LoadedTrack, PlaybackEngine};
pub use output::{open_output, OutputSink, SilentOutput};
pub use session::{AudioSession, DesktopAudioSession, Interruption};
