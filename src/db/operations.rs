use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::path::PathBuf;

use crate::db::connection::DatabaseConnection;
use crate::db::models::CacheEntry;

/// Database operations for the asset cache index
pub struct DbOperations;

impl DbOperations {
    /// Look up the cache entry for an asset
    pub fn get_cache_entry(
        db: &DatabaseConnection,
        asset_id: &str,
    ) -> Result<Option<CacheEntry>, anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        let entry = conn
            .query_row(
                "SELECT asset_id, local_path, version_tag, cached_at
                 FROM cache_entries WHERE asset_id = ?1",
                params![asset_id],
                Self::row_to_entry,
            )
            .optional()?;

        Ok(entry)
    }

    /// Insert or replace the entry for an asset
    pub fn upsert_cache_entry(
        db: &DatabaseConnection,
        entry: &CacheEntry,
    ) -> Result<(), anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        conn.execute(
            "INSERT INTO cache_entries (asset_id, local_path, version_tag, cached_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(asset_id) DO UPDATE SET
                local_path = excluded.local_path,
                version_tag = excluded.version_tag,
                cached_at = excluded.cached_at",
            params![
                entry.asset_id,
                entry.local_path.to_string_lossy(),
                entry.version_tag,
                entry.cached_at.timestamp(),
            ],
        )?;

        Ok(())
    }

    /// Remove the entry for an asset. Returns true if a row was deleted.
    pub fn delete_cache_entry(
        db: &DatabaseConnection,
        asset_id: &str,
    ) -> Result<bool, anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE asset_id = ?1",
            params![asset_id],
        )?;

        Ok(deleted > 0)
    }

    /// All entries, oldest first
    pub fn get_all_cache_entries(
        db: &DatabaseConnection,
    ) -> Result<Vec<CacheEntry>, anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        let mut stmt = conn.prepare(
            "SELECT asset_id, local_path, version_tag, cached_at
             FROM cache_entries ORDER BY cached_at, asset_id",
        )?;
        let entries = stmt
            .query_map([], Self::row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
        let local_path: String = row.get(1)?;
        let cached_at: i64 = row.get(3)?;
        Ok(CacheEntry {
            asset_id: row.get(0)?,
            local_path: PathBuf::from(local_path),
            version_tag: row.get(2)?,
            cached_at: DateTime::<Utc>::from_timestamp(cached_at, 0).unwrap_or_default(),
        })
    }
}
