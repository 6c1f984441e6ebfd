// Asset cache
// Lazily downloads payloads into the cache directory and tracks them by version tag

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::models::MeditationAsset;
use super::scanner::{encode_id, CacheScanner};
use super::store::AssetStore;
use crate::db::{CacheEntry, DatabaseConnection, DbOperations};
use crate::error::CacheError;
use crate::settings::CacheSettings;

/// Result of `AssetCache::list_assets`. `warning` is set when the remote
/// listing failed and `assets` was rebuilt from the cache directory.
#[derive(Debug)]
pub struct AssetListing {
    pub assets: Vec<MeditationAsset>,
    pub warning: Option<CacheError>,
}

impl AssetListing {
    pub fn is_offline(&self) -> bool {
        self.warning.is_some()
    }
}

/// Counts from `AssetCache::purge_orphans`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub entries_removed: usize,
    pub files_removed: usize,
}

/// Outcome of one download attempt, handed to every caller that joined it
type DownloadRound = Arc<OnceCell<Result<PathBuf, String>>>;

pub struct AssetCache {
    store: Arc<dyn AssetStore>,
    db: DatabaseConnection,
    cache_dir: PathBuf,
    extension: String,
    in_flight: Mutex<HashMap<(String, String), DownloadRound>>,
}

impl AssetCache {
    pub fn new(
        store: Arc<dyn AssetStore>,
        db: DatabaseConnection,
        cache_dir: PathBuf,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            store,
            db,
            cache_dir,
            extension: extension.into(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Cache rooted at the configured directory, indexed by `<app_dir>/cache.db`
    pub fn open(
        store: Arc<dyn AssetStore>,
        settings: &CacheSettings,
        app_dir: &Path,
    ) -> Result<Self, CacheError> {
        let cache_dir = settings.resolve_directory(app_dir);
        std::fs::create_dir_all(&cache_dir)?;
        let db = DatabaseConnection::new(&app_dir.join("cache.db"))?;
        info!("Asset cache at {:?}", cache_dir);
        Ok(Self::new(store, db, cache_dir, settings.audio_extension.clone()))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Canonical payload path for an asset id
    pub fn local_path_for(&self, asset_id: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", encode_id(asset_id), self.extension))
    }

    /// All remote assets sorted by `sort_order`, annotated with their cached
    /// path. Falls back to a scan of the cache directory when the store is
    /// unreachable.
    pub async fn list_assets(&self) -> Result<AssetListing, CacheError> {
        match self.store.query_assets().await {
            Ok(mut assets) => {
                assets.sort_by_key(|asset| asset.sort_order);
                for asset in assets.iter_mut() {
                    asset.local_path = self.cached_path(asset)?;
                }
                debug!("Listed {} assets", assets.len());
                Ok(AssetListing {
                    assets,
                    warning: None,
                })
            }
            Err(e) => {
                warn!("Asset listing failed, using cached files: {}", e);
                let assets = self.scan_cached_assets()?;
                Ok(AssetListing {
                    assets,
                    warning: Some(CacheError::AssetList(e.to_string())),
                })
            }
        }
    }

    /// Local path of the payload for `asset`, downloading it unless a cached
    /// copy with the same version tag exists. Concurrent calls for the same id
    /// share one download and its outcome.
    pub async fn resolve(&self, asset: &MeditationAsset) -> Result<PathBuf, CacheError> {
        if let Some(path) = self.cached_path(asset)? {
            debug!("Cache hit for {}", asset.id);
            return Ok(path);
        }

        let round = self.join_round(asset);
        let outcome = round
            .get_or_init(|| async move {
                // An earlier round may have finished between the check and the join
                match self.cached_path(asset) {
                    Ok(Some(path)) => Ok(path),
                    Ok(None) => self.download(asset).await.map_err(failure_reason),
                    Err(e) => Err(failure_reason(e)),
                }
            })
            .await
            .clone();
        self.end_round(asset, &round);

        outcome.map_err(|reason| CacheError::AssetDownload {
            id: asset.id.clone(),
            reason,
        })
    }

    /// Valid entries, purging any whose file has disappeared
    pub fn cached_entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut valid = Vec::new();
        for entry in DbOperations::get_all_cache_entries(&self.db)? {
            if entry.file_exists() {
                valid.push(entry);
            } else {
                debug!("Purging entry for {}: file missing", entry.asset_id);
                DbOperations::delete_cache_entry(&self.db, &entry.asset_id)?;
            }
        }
        Ok(valid)
    }

    /// Delete the payload and entry for an asset. Returns true if anything was removed.
    pub fn evict(&self, asset_id: &str) -> Result<bool, CacheError> {
        let mut removed = false;
        let path = DbOperations::get_cache_entry(&self.db, asset_id)?
            .map(|entry| entry.local_path)
            .unwrap_or_else(|| self.local_path_for(asset_id));

        if path.is_file() {
            std::fs::remove_file(&path)?;
            removed = true;
        }
        removed |= DbOperations::delete_cache_entry(&self.db, asset_id)?;

        if removed {
            info!("Evicted {}", asset_id);
        }
        Ok(removed)
    }

    /// Remove entries whose file is gone and payload files no entry refers to
    pub fn purge_orphans(&self) -> Result<PurgeReport, CacheError> {
        let mut report = PurgeReport::default();

        let mut known = Vec::new();
        for entry in DbOperations::get_all_cache_entries(&self.db)? {
            if entry.file_exists() {
                known.push(entry.local_path);
            } else {
                DbOperations::delete_cache_entry(&self.db, &entry.asset_id)?;
                report.entries_removed += 1;
            }
        }

        for (id, path) in CacheScanner::scan(&self.cache_dir, &self.extension)? {
            if !known.contains(&path) {
                debug!("Removing orphaned payload for {}", id);
                std::fs::remove_file(&path)?;
                report.files_removed += 1;
            }
        }

        info!(
            "Purged {} stale entries and {} orphaned files",
            report.entries_removed, report.files_removed
        );
        Ok(report)
    }

    /// Path of a valid cached copy matching the asset's version tag
    fn cached_path(&self, asset: &MeditationAsset) -> Result<Option<PathBuf>, CacheError> {
        let entry = match self.valid_entry(&asset.id)? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if entry.version_tag != asset.version_tag {
            debug!(
                "Cached {} is stale ({} != {})",
                asset.id, entry.version_tag, asset.version_tag
            );
            return Ok(None);
        }
        Ok(Some(entry.local_path))
    }

    /// Entry for an id, treating (and lazily purging) entries whose file is missing
    fn valid_entry(&self, asset_id: &str) -> Result<Option<CacheEntry>, CacheError> {
        match DbOperations::get_cache_entry(&self.db, asset_id)? {
            Some(entry) if entry.file_exists() => Ok(Some(entry)),
            Some(_) => {
                debug!("Purging entry for {}: file missing", asset_id);
                DbOperations::delete_cache_entry(&self.db, asset_id)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn download(&self, asset: &MeditationAsset) -> Result<PathBuf, CacheError> {
        info!("Downloading {} ({})", asset.id, asset.version_tag);
        let remote = self
            .store
            .fetch_asset(&asset.id)
            .await
            .map_err(|e| CacheError::AssetDownload {
                id: asset.id.clone(),
                reason: e.to_string(),
            })?;
        if remote.record.version_tag != asset.version_tag {
            debug!(
                "Store now reports {} for {}, recording {}",
                remote.record.version_tag, asset.id, asset.version_tag
            );
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let path = self.local_path_for(&asset.id);
        let temp = self.temp_path_for(&asset.id);
        if let Err(e) = write_then_rename(&temp, &path, &remote.payload).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        DbOperations::upsert_cache_entry(
            &self.db,
            &CacheEntry {
                asset_id: asset.id.clone(),
                local_path: path.clone(),
                version_tag: asset.version_tag.clone(),
                cached_at: Utc::now(),
            },
        )?;

        debug!("Cached {} at {:?}", asset.id, path);
        Ok(path)
    }

    /// Hidden, uniquely suffixed sibling of the canonical path
    fn temp_path_for(&self, asset_id: &str) -> PathBuf {
        let suffix: u32 = rand::thread_rng().gen();
        self.cache_dir.join(format!(
            ".{}.{}.{:08x}.tmp",
            encode_id(asset_id),
            self.extension,
            suffix
        ))
    }

    /// Assets rebuilt from payload files, carrying the recorded version tag
    /// so that resolving them is a cache hit
    fn scan_cached_assets(&self) -> Result<Vec<MeditationAsset>, CacheError> {
        let found = CacheScanner::scan(&self.cache_dir, &self.extension)?;
        let mut assets = Vec::with_capacity(found.len());
        for (order, (id, path)) in found.into_iter().enumerate() {
            let mut asset = MeditationAsset::from_cached_file(id, path, order as i64);
            if let Some(entry) = DbOperations::get_cache_entry(&self.db, &asset.id)? {
                asset.version_tag = entry.version_tag;
            }
            assets.push(asset);
        }
        Ok(assets)
    }

    fn join_round(&self, asset: &MeditationAsset) -> DownloadRound {
        let key = (asset.id.clone(), asset.version_tag.clone());
        Arc::clone(self.in_flight.lock().entry(key).or_default())
    }

    /// Later calls start a fresh round, so a failure is retried
    fn end_round(&self, asset: &MeditationAsset, round: &DownloadRound) {
        let key = (asset.id.clone(), asset.version_tag.clone());
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, round))
        {
            in_flight.remove(&key);
        }
    }
}

fn failure_reason(error: CacheError) -> String {
    match error {
        CacheError::AssetDownload { reason, .. } => reason,
        other => other.to_string(),
    }
}

async fn write_then_rename(temp: &Path, path: &Path, payload: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(temp, payload).await?;
    tokio::fs::rename(temp, path).await
}
