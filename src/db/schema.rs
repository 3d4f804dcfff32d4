//! SQL DDL for the local media library.
//!
//! Defines the `media_items` and `schema_meta` tables. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization; later columns arrive through
//! [`super::migrations`].

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- One row per (user, provider media item)
CREATE TABLE IF NOT EXISTS media_items (
    user_id TEXT NOT NULL,
    id TEXT NOT NULL,
    filename TEXT,
    mime_type TEXT NOT NULL,
    product_url TEXT,
    base_url TEXT NOT NULL,
    width INTEGER,
    height INTEGER,
    creation_time TEXT,
    is_video INTEGER NOT NULL DEFAULT 0 CHECK(is_video IN (0, 1)),
    storage_filename TEXT,
    size_bytes INTEGER CHECK(size_bytes IS NULL OR size_bytes >= 0),
    fetched_at TEXT NOT NULL,
    PRIMARY KEY (user_id, id)
);

CREATE INDEX IF NOT EXISTS idx_media_items_creation ON media_items(user_id, creation_time);
CREATE INDEX IF NOT EXISTS idx_media_items_uncached ON media_items(user_id, storage_filename);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
