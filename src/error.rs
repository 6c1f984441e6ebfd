// Error types for the playback pipeline
// One enum per layer so callers can tell recoverable failures from blocking ones

use thiserror::Error;

/// Errors raised by the remote asset store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("remote store returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("invalid store response: {0}")]
    InvalidResponse(String),

    #[error("invalid store url {0}")]
    InvalidUrl(String),
}

/// Errors raised by the asset cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// Remote listing failed. Recovered locally by scanning the cache directory.
    #[error("asset list unavailable: {0}")]
    AssetList(String),

    /// Payload fetch failed. Any previous cache entry is still usable.
    #[error("failed to download asset {id}: {reason}")]
    AssetDownload { id: String, reason: String },

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache index error: {0}")]
    Index(#[from] anyhow::Error),
}

/// Errors raised by the audio layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    /// File missing, unreadable or not decodable
    #[error("failed to load audio: {0}")]
    Load(String),

    /// Output device could not be opened or driven
    #[error("audio output error: {0}")]
    Output(String),

    /// System audio session could not be configured. Never fatal.
    #[error("audio session configuration failed: {0}")]
    SessionConfig(String),
}

/// Errors raised by haptic backends. Never surfaced to the UI.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HapticError {
    #[error("haptics not supported on this device")]
    Unsupported,

    #[error("haptic engine error: {0}")]
    Engine(String),
}

/// Errors surfaced by `PlaybackSession::play`
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    /// A newer play request or a teardown happened while this one was loading
    #[error("play request superseded")]
    Superseded,
}

impl SessionError {
    /// Human readable reason recorded in `PlaybackState::Failed`
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
