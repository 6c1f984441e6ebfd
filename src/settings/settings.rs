// Settings management and persistence
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::analysis::loudness::DEFAULT_SMOOTHING;

/// Application name used for platform data/cache directories
pub const APP_NAME: &str = "stillpoint";

/// Remote asset store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub base_url: String,
    pub user_agent: String,
    pub connect_timeout_secs: Option<u64>,
    /// No overall request timeout unless set: a slow download only holds the loading state
    pub request_timeout_secs: Option<u64>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            user_agent: format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")),
            connect_timeout_secs: Some(10),
            request_timeout_secs: None,
        }
    }
}

/// Asset cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Overrides the platform cache directory when set
    pub directory: Option<PathBuf>,
    pub audio_extension: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: None,
            audio_extension: "m4a".to_string(),
        }
    }
}

impl CacheSettings {
    /// Resolve the cache directory, falling back to `<cache dir>/stillpoint/guided-meditations`
    pub fn resolve_directory(&self, app_dir: &Path) -> PathBuf {
        if let Some(dir) = &self.directory {
            return dir.clone();
        }
        dirs::cache_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| app_dir.join("cache"))
            .join("guided-meditations")
    }
}

/// Which audio output the engine opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Default output device via cpal, silent fallback when none is available
    Device,
    /// Real-time paced output that discards samples
    Silent,
}

/// Playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub output: OutputKind,
    pub poll_hz: u32,
    pub smoothing: f32,
    pub skip_back_secs: f64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            output: OutputKind::Device,
            poll_hz: 60,
            smoothing: DEFAULT_SMOOTHING,
            skip_back_secs: 15.0,
        }
    }
}

/// Haptic feedback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HapticSettings {
    pub enabled: bool,
    pub base_intensity: f32,
    pub intensity_span: f32,
    pub base_sharpness: f32,
    pub sharpness_span: f32,
}

impl Default for HapticSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_intensity: 0.3,
            intensity_span: 0.7,
            base_sharpness: 0.1,
            sharpness_span: 0.6,
        }
    }
}

/// Main pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub version: i32, // Settings schema version for future migrations
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub playback: PlaybackSettings,
    pub haptics: HapticSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            version: 1,
            store: StoreSettings::default(),
            cache: CacheSettings::default(),
            playback: PlaybackSettings::default(),
            haptics: HapticSettings::default(),
        }
    }
}

impl PipelineSettings {
    /// Default application data directory
    pub fn default_app_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| PathBuf::from(".").join(APP_NAME))
    }

    /// Get the settings file path
    pub fn get_settings_path(app_dir: &Path) -> PathBuf {
        app_dir.join("settings.json")
    }

    /// Load settings from file, or return defaults if file doesn't exist
    pub fn load(app_dir: &Path) -> Result<Self> {
        let path = Self::get_settings_path(app_dir);

        if !path.exists() {
            debug!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;

        let settings: PipelineSettings = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {:?}", path))?;

        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub fn save(&self, app_dir: &Path) -> Result<()> {
        fs::create_dir_all(app_dir)
            .with_context(|| format!("Failed to create settings directory {:?}", app_dir))?;

        let path = Self::get_settings_path(app_dir);
        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write settings file {:?}", path))?;

        info!("Saved settings to {:?}", path);
        Ok(())
    }
}
