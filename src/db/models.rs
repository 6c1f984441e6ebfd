// Data models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persistent record of a downloaded payload: asset id -> (path, version tag)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub asset_id: String,
    pub local_path: PathBuf,
    pub version_tag: String,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// An entry is only valid while its file is still on disk
    pub fn file_exists(&self) -> bool {
        self.local_path.is_file()
    }
}
