// Stillpoint - Guided meditation playback
// Module declarations
pub mod analysis;
pub mod assets;
pub mod audio;
pub mod db;
pub mod error;
pub mod haptics;
pub mod session;
pub mod settings;
pub mod state;

pub use analysis::LoudnessAnalyzer;
pub use assets::{AssetCache, AssetListing, AssetStore, HttpAssetStore, MeditationAsset};
pub use audio::{AudioSession, DesktopAudioSession, EngineEvent, Interruption, PlaybackEngine};
pub use error::{AudioError, CacheError, HapticError, SessionError, StoreError};
pub use haptics::{HapticChannelState, HapticEngine, HapticSynchronizer, NullHapticEngine};
pub use session::PlaybackSession;
pub use settings::PipelineSettings;
pub use state::{PlaybackSnapshot, PlaybackState};
