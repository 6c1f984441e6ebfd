// Asset data models
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A guided meditation as listed by the remote store.
/// Identity is the remote id; `version_tag` changes whenever the payload does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MeditationAsset {
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration_seconds: i64,
    pub sort_order: i64,
    pub version_tag: String,
    /// Set when a valid cached payload exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl MeditationAsset {
    /// Asset rebuilt from a cached file while offline: only id and path are known
    pub fn from_cached_file(id: String, local_path: PathBuf, sort_order: i64) -> Self {
        Self {
            id,
            local_path: Some(local_path),
            sort_order,
            ..Default::default()
        }
    }

    pub fn is_cached(&self) -> bool {
        self.local_path.is_some()
    }
}

/// Full record fetched on demand, including the audio payload
#[derive(Debug, Clone)]
pub struct RemoteAsset {
    pub record: MeditationAsset,
    pub payload: Vec<u8>,
}
