// Settings module
// JSON-persisted pipeline configuration

pub mod settings;

pub use settings::{
    CacheSettings, HapticSettings, OutputKind, PipelineSettings, PlaybackSettings, StoreSettings,
    APP_NAME,
};
