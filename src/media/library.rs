//! Local media library: the per-user cache of provider media items.
//!
//! The free functions take a `&Connection` and a `user_id`, and every query is scoped to
//! that user. [`LocalLibrary`] wraps a shared connection for async callers and runs each
//! call on the blocking pool.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::media::types::MediaItem;

const SELECT_COLUMNS: &str = "id, filename, mime_type, product_url, base_url, width, height, \
     creation_time, is_video, storage_filename, size_bytes";

/// Item counts for the `stats` command.
#[derive(Debug, Default, Serialize)]
pub struct LibraryStats {
    pub total: usize,
    pub photos: usize,
    pub videos: usize,
    pub cached: usize,
    pub sized: usize,
}

fn row_to_media_item(row: &Row) -> rusqlite::Result<MediaItem> {
    let creation_time: Option<String> = row.get(7)?;
    let size_bytes: Option<i64> = row.get(10)?;
    Ok(MediaItem {
        id: row.get(0)?,
        filename: row.get(1)?,
        mime_type: row.get(2)?,
        product_url: row.get(3)?,
        base_url: row.get(4)?,
        width: row.get(5)?,
        height: row.get(6)?,
        creation_time: creation_time
            .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&Utc)),
        is_video: row.get(8)?,
        storage_filename: row.get(9)?,
        size_bytes: size_bytes.map(|s| s as u64),
    })
}

/// Insert or refresh fetched items in one transaction.
///
/// Provider metadata is overwritten; the locally cached `storage_filename` and
/// `size_bytes` are kept so a refetch never re-downloads anything.
pub fn upsert_media_items(
    conn: &mut Connection,
    user_id: &str,
    items: &[MediaItem],
) -> Result<usize> {
    let fetched_at = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO media_items (user_id, id, filename, mime_type, product_url, base_url, \
                 width, height, creation_time, is_video, fetched_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(user_id, id) DO UPDATE SET \
                 filename = excluded.filename, \
                 mime_type = excluded.mime_type, \
                 product_url = excluded.product_url, \
                 base_url = excluded.base_url, \
                 width = excluded.width, \
                 height = excluded.height, \
                 creation_time = excluded.creation_time, \
                 is_video = excluded.is_video, \
                 fetched_at = excluded.fetched_at",
        )?;
        for item in items {
            stmt.execute(params![
                user_id,
                item.id,
                item.filename,
                item.mime_type,
                item.product_url,
                item.base_url,
                item.width,
                item.height,
                item.creation_time.map(|t| t.to_rfc3339()),
                item.is_video,
                fetched_at,
            ])?;
        }
    }
    tx.commit()?;
    Ok(items.len())
}

/// Look up items by id. Ids not present locally are absent from the map.
pub fn get_id_map(
    conn: &Connection,
    user_id: &str,
    ids: &[String],
) -> Result<HashMap<String, MediaItem>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut map = HashMap::with_capacity(ids.len());
    // Stay well under SQLite's bound-parameter limit
    for chunk in ids.chunks(500) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM media_items WHERE user_id = ? AND id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let args = std::iter::once(user_id).chain(chunk.iter().map(String::as_str));
        let rows = stmt.query_map(params_from_iter(args), row_to_media_item)?;
        for row in rows {
            let item = row?;
            map.insert(item.id.clone(), item);
        }
    }
    Ok(map)
}

pub fn update_storage_filename(
    conn: &Connection,
    user_id: &str,
    id: &str,
    filename: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE media_items SET storage_filename = ?3 WHERE user_id = ?1 AND id = ?2",
        params![user_id, id, filename],
    )?;
    Ok(())
}

pub fn update_size(conn: &Connection, user_id: &str, id: &str, size_bytes: u64) -> Result<()> {
    conn.execute(
        "UPDATE media_items SET size_bytes = ?3 WHERE user_id = ?1 AND id = ?2",
        params![user_id, id, size_bytes as i64],
    )?;
    Ok(())
}

pub fn count(conn: &Connection, user_id: &str) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM media_items WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

pub fn all_ids(conn: &Connection, user_id: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT id FROM media_items WHERE user_id = ?1")?;
    let ids = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(ids)
}

/// Delete items by id. Returns the number of rows removed.
pub fn delete(conn: &mut Connection, user_id: &str, ids: &[String]) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut deleted = 0;
    {
        let mut stmt = tx.prepare("DELETE FROM media_items WHERE user_id = ?1 AND id = ?2")?;
        for id in ids {
            deleted += stmt.execute(params![user_id, id])?;
        }
    }
    tx.commit()?;
    Ok(deleted)
}

/// Every item, oldest first, so a lower index always means an earlier item.
pub fn all(conn: &Connection, user_id: &str) -> Result<Vec<MediaItem>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM media_items WHERE user_id = ?1 \
         ORDER BY creation_time IS NULL, creation_time ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map([user_id], row_to_media_item)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

/// Ids of items whose image has not been cached yet, oldest first.
pub fn uncached_ids(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM media_items WHERE user_id = ?1 AND storage_filename IS NULL \
         ORDER BY creation_time IS NULL, creation_time ASC, id ASC",
    )?;
    let ids = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

pub fn library_stats(conn: &Connection, user_id: &str) -> Result<LibraryStats> {
    let (total, videos, photos, cached, sized): (i64, i64, i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*), \
             COALESCE(SUM(is_video), 0), \
             COALESCE(SUM(is_video = 0 AND mime_type LIKE 'image/%'), 0), \
             COUNT(storage_filename), \
             COUNT(size_bytes) \
         FROM media_items WHERE user_id = ?1",
        [user_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
    )?;
    Ok(LibraryStats {
        total: total as usize,
        photos: photos as usize,
        videos: videos as usize,
        cached: cached as usize,
        sized: sized as usize,
    })
}

/// Whether the last remote listing for this user ran through its final page.
///
/// A user with no recorded listing counts as incomplete.
pub fn listing_complete(conn: &Connection, user_id: &str) -> Result<bool> {
    let complete = conn
        .query_row(
            "SELECT listing_complete FROM sync_state WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(complete.unwrap_or(false))
}

pub fn set_listing_complete(conn: &Connection, user_id: &str, complete: bool) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_state (user_id, listing_complete, updated_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(user_id) DO UPDATE SET \
             listing_complete = excluded.listing_complete, \
             updated_at = excluded.updated_at",
        params![user_id, complete, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

// ── Async handle ─────────────────────────────────────────────────────────────

/// Shared, user-scoped handle to the library for async code.
///
/// Cloning is cheap; all clones share one connection behind a mutex.
#[derive(Clone)]
pub struct LocalLibrary {
    db: Arc<Mutex<Connection>>,
    user_id: Arc<str>,
}

impl LocalLibrary {
    pub fn new(conn: Connection, user_id: impl Into<String>) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            user_id: Arc::from(user_id.into()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let user_id = Arc::clone(&self.user_id);
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| anyhow!("db lock poisoned: {e}"))?;
            f(&mut conn, &user_id)
        })
        .await
        .context("library task panicked")?
    }

    pub async fn upsert(&self, items: Vec<MediaItem>) -> Result<usize> {
        self.with_conn(move |conn, user| upsert_media_items(conn, user, &items))
            .await
    }

    pub async fn get_id_map(&self, ids: Vec<String>) -> Result<HashMap<String, MediaItem>> {
        self.with_conn(move |conn, user| get_id_map(conn, user, &ids)).await
    }

    pub async fn update_storage_filename(&self, id: String, filename: String) -> Result<()> {
        self.with_conn(move |conn, user| update_storage_filename(conn, user, &id, &filename))
            .await
    }

    pub async fn update_size(&self, id: String, size_bytes: u64) -> Result<()> {
        self.with_conn(move |conn, user| update_size(conn, user, &id, size_bytes))
            .await
    }

    pub async fn count(&self) -> Result<usize> {
        self.with_conn(|conn, user| count(conn, user)).await
    }

    pub async fn all(&self) -> Result<Vec<MediaItem>> {
        self.with_conn(|conn, user| all(conn, user)).await
    }

    pub async fn uncached_ids(&self) -> Result<Vec<String>> {
        self.with_conn(|conn, user| uncached_ids(conn, user)).await
    }

    /// Delete local items whose ids are not in `seen`. Returns how many were removed.
    pub async fn prune_missing(&self, seen: HashSet<String>) -> Result<usize> {
        self.with_conn(move |conn, user| {
            let stale: Vec<String> = all_ids(conn, user)?
                .into_iter()
                .filter(|id| !seen.contains(id))
                .collect();
            if stale.is_empty() {
                return Ok(0);
            }
            tracing::info!(
                "deleting {} local media items not found during fetch",
                stale.len()
            );
            delete(conn, user, &stale)
        })
        .await
    }

    pub async fn stats(&self) -> Result<LibraryStats> {
        self.with_conn(|conn, user| library_stats(conn, user)).await
    }

    pub async fn listing_complete(&self) -> Result<bool> {
        self.with_conn(|conn, user| listing_complete(conn, user)).await
    }

    pub async fn set_listing_complete(&self, complete: bool) -> Result<()> {
        self.with_conn(move |conn, user| set_listing_complete(conn, user, complete))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> Connection {
        crate::db::open_in_memory().unwrap()
    }

    fn item(id: &str, day: u32) -> MediaItem {
        MediaItem {
            id: id.into(),
            mime_type: "image/jpeg".into(),
            base_url: format!("https://photos.example/{id}"),
            width: Some(100),
            height: Some(50),
            creation_time: Some(Utc.with_ymd_and_hms(2023, 5, day, 12, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn upsert_then_all_orders_by_creation_time() {
        let mut conn = test_db();
        upsert_media_items(&mut conn, "u1", &[item("b", 3), item("a", 9), item("c", 1)]).unwrap();

        let ids: Vec<String> = all(&conn, "u1").unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(count(&conn, "u1").unwrap(), 3);
        assert_eq!(count(&conn, "u2").unwrap(), 0);
    }

    #[test]
    fn upsert_preserves_cached_state() {
        let mut conn = test_db();
        upsert_media_items(&mut conn, "u1", &[item("a", 1)]).unwrap();
        update_storage_filename(&conn, "u1", "a", "a-250.jpg").unwrap();
        update_size(&conn, "u1", "a", 2048).unwrap();

        let mut refreshed = item("a", 1);
        refreshed.base_url = "https://photos.example/new".into();
        upsert_media_items(&mut conn, "u1", &[refreshed]).unwrap();

        let stored = &get_id_map(&conn, "u1", &["a".into()]).unwrap()["a"];
        assert_eq!(stored.base_url, "https://photos.example/new");
        assert_eq!(stored.storage_filename.as_deref(), Some("a-250.jpg"));
        assert_eq!(stored.size_bytes, Some(2048));
        assert_eq!(stored.pixel_area(), 5000);
    }

    #[test]
    fn get_id_map_skips_unknown_and_other_users() {
        let mut conn = test_db();
        upsert_media_items(&mut conn, "u1", &[item("a", 1)]).unwrap();
        upsert_media_items(&mut conn, "u2", &[item("b", 1)]).unwrap();

        let map = get_id_map(&conn, "u1", &["a".into(), "b".into(), "zzz".into()]).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("a"));
    }

    #[test]
    fn delete_and_uncached_ids() {
        let mut conn = test_db();
        upsert_media_items(&mut conn, "u1", &[item("a", 1), item("b", 2), item("c", 3)]).unwrap();
        update_storage_filename(&conn, "u1", "b", "b-250.jpg").unwrap();

        assert_eq!(uncached_ids(&conn, "u1").unwrap(), vec!["a", "c"]);
        assert_eq!(delete(&mut conn, "u1", &["a".into(), "nope".into()]).unwrap(), 1);
        assert_eq!(all_ids(&conn, "u1").unwrap(), HashSet::from(["b".into(), "c".into()]));
    }

    #[test]
    fn stats_count_each_category() {
        let mut conn = test_db();
        let mut video = item("v", 4);
        video.mime_type = "video/mp4".into();
        video.is_video = true;
        upsert_media_items(&mut conn, "u1", &[item("a", 1), item("b", 2), video]).unwrap();
        update_storage_filename(&conn, "u1", "a", "a-250.jpg").unwrap();
        update_size(&conn, "u1", "v", 10).unwrap();

        let stats = library_stats(&conn, "u1").unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.photos, 2);
        assert_eq!(stats.videos, 1);
        assert_eq!(stats.cached, 1);
        assert_eq!(stats.sized, 1);
    }

    #[test]
    fn listing_flag_is_per_user_and_defaults_to_incomplete() {
        let conn = test_db();
        assert!(!listing_complete(&conn, "u1").unwrap());

        set_listing_complete(&conn, "u1", true).unwrap();
        assert!(listing_complete(&conn, "u1").unwrap());
        assert!(!listing_complete(&conn, "u2").unwrap());

        set_listing_complete(&conn, "u1", false).unwrap();
        assert!(!listing_complete(&conn, "u1").unwrap());
    }

    #[tokio::test]
    async fn prune_missing_removes_unseen_items() {
        let library = LocalLibrary::new(test_db(), "u1");
        library.upsert(vec![item("a", 1), item("b", 2), item("c", 3)]).await.unwrap();

        let seen = HashSet::from(["a".to_string(), "c".to_string()]);
        assert_eq!(library.prune_missing(seen).await.unwrap(), 1);
        assert_eq!(library.count().await.unwrap(), 2);
    }
}
