// Database migrations
use anyhow::Result;
use rusqlite::Connection;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    // One row per downloaded asset payload
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cache_entries (
            asset_id TEXT PRIMARY KEY NOT NULL,
            local_path TEXT NOT NULL,
            version_tag TEXT NOT NULL,
            cached_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cache_entries_path ON cache_entries(local_path)",
        [],
    )?;

    Ok(())
}
