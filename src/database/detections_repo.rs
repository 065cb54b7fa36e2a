// Detections repository for leafcheck
// Local copy of the detection history: remote mirror rows plus local-only pending uploads

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{CachedDetection, PendingUpload};
use super::DatabaseManager;

const DETECTION_COLUMNS: &str =
    "id, disease_class, confidence, timestamp, image_ref_kind, image_ref, origin";

impl DatabaseManager {
    /// Replace every mirrored remote row, leaving local-only rows untouched
    pub fn replace_remote_mirror(&self, detections: &[CachedDetection]) -> Result<()> {
        self.with_connection(|conn| {
            replace_remote_mirror_impl(conn, detections)
        })
    }

    /// Store a detection that never reached the history service, with its image
    pub fn insert_local_only(&self, pending: &PendingUpload) -> Result<()> {
        self.with_connection(|conn| {
            insert_local_only_impl(conn, pending)
        })
    }

    /// All cached detections (most recent first)
    pub fn list_cached_detections(&self) -> Result<Vec<CachedDetection>> {
        self.with_connection(|conn| {
            list_cached_impl(conn)
        })
    }

    /// Local-only detections with their image bytes, oldest first
    pub fn pending_uploads(&self) -> Result<Vec<PendingUpload>> {
        self.with_connection(|conn| {
            pending_uploads_impl(conn)
        })
    }

    /// Ids of local-only detections awaiting upload, oldest first
    pub fn pending_upload_ids(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            pending_upload_ids_impl(conn)
        })
    }

    /// One local-only detection with its image, if it is still pending
    pub fn pending_upload(&self, id: &str) -> Result<Option<PendingUpload>> {
        self.with_connection(|conn| {
            pending_upload_impl(conn, id)
        })
    }

    /// Delete a cached detection; returns whether a row existed
    pub fn delete_cached_detection(&self, id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            delete_cached_impl(conn, id)
        })
    }

    /// Empty the cache entirely
    pub fn clear_detection_cache(&self) -> Result<usize> {
        self.with_connection(|conn| {
            clear_cache_impl(conn)
        })
    }
}

fn row_to_detection(row: &Row<'_>) -> rusqlite::Result<CachedDetection> {
    Ok(CachedDetection {
        id: row.get(0)?,
        disease_class: row.get(1)?,
        confidence: row.get(2)?,
        timestamp: row.get(3)?,
        image_ref_kind: row.get(4)?,
        image_ref: row.get(5)?,
        origin: row.get(6)?,
    })
}

fn replace_remote_mirror_impl(conn: &Connection, detections: &[CachedDetection]) -> Result<()> {
    let tx = conn.unchecked_transaction()
        .context("Failed to start transaction for replace_remote_mirror")?;

    tx.execute("DELETE FROM detection_cache WHERE origin = 'remote'", [])
        .context("Failed to delete old mirrored detections")?;

    for detection in detections {
        tx.execute(
            r#"
            INSERT INTO detection_cache (
                id, disease_class, confidence, timestamp, image_ref_kind, image_ref, origin
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'remote')
            ON CONFLICT(id) DO UPDATE SET
                disease_class = excluded.disease_class,
                confidence = excluded.confidence,
                timestamp = excluded.timestamp,
                image_ref_kind = excluded.image_ref_kind,
                image_ref = excluded.image_ref,
                cached_at = datetime('now')
            "#,
            params![
                detection.id,
                detection.disease_class,
                detection.confidence,
                detection.timestamp,
                detection.image_ref_kind,
                detection.image_ref,
            ],
        ).context("Failed to insert mirrored detection")?;
    }

    tx.commit().context("Failed to commit replace_remote_mirror")?;
    Ok(())
}

fn insert_local_only_impl(conn: &Connection, pending: &PendingUpload) -> Result<()> {
    let detection = &pending.detection;
    conn.execute(
        r#"
        INSERT OR REPLACE INTO detection_cache (
            id, disease_class, confidence, timestamp, image_ref_kind, image_ref, origin,
            image_name, image_mime, image_data
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'local', ?7, ?8, ?9)
        "#,
        params![
            detection.id,
            detection.disease_class,
            detection.confidence,
            detection.timestamp,
            detection.image_ref_kind,
            detection.image_ref,
            pending.image_name,
            pending.image_mime,
            pending.image_data,
        ],
    ).context("Failed to insert local-only detection")?;

    Ok(())
}

fn list_cached_impl(conn: &Connection) -> Result<Vec<CachedDetection>> {
    let sql = format!(
        "SELECT {} FROM detection_cache ORDER BY timestamp DESC, cached_at DESC",
        DETECTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)
        .context("Failed to prepare list_cached query")?;

    let rows = stmt.query_map([], row_to_detection)
        .context("Failed to query cached detections")?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to collect cached detections")
}

fn row_to_pending(row: &Row<'_>) -> rusqlite::Result<PendingUpload> {
    Ok(PendingUpload {
        detection: row_to_detection(row)?,
        image_name: row.get::<_, Option<String>>(7)?.unwrap_or_else(|| "capture.jpg".to_string()),
        image_mime: row.get::<_, Option<String>>(8)?.unwrap_or_else(|| "image/jpeg".to_string()),
        image_data: row.get(9)?,
    })
}

fn pending_uploads_impl(conn: &Connection) -> Result<Vec<PendingUpload>> {
    let sql = format!(
        r#"
        SELECT {}, image_name, image_mime, image_data
        FROM detection_cache
        WHERE origin = 'local' AND image_data IS NOT NULL
        ORDER BY timestamp ASC
        "#,
        DETECTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)
        .context("Failed to prepare pending_uploads query")?;

    let rows = stmt.query_map([], row_to_pending)
        .context("Failed to query pending uploads")?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to collect pending uploads")
}

fn pending_upload_ids_impl(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM detection_cache WHERE origin = 'local' AND image_data IS NOT NULL ORDER BY timestamp ASC",
    ).context("Failed to prepare pending_upload_ids query")?;

    let rows = stmt.query_map([], |row| row.get(0))
        .context("Failed to query pending upload ids")?;

    rows.collect::<std::result::Result<Vec<String>, _>>()
        .context("Failed to collect pending upload ids")
}

fn pending_upload_impl(conn: &Connection, id: &str) -> Result<Option<PendingUpload>> {
    let sql = format!(
        r#"
        SELECT {}, image_name, image_mime, image_data
        FROM detection_cache
        WHERE id = ?1 AND origin = 'local' AND image_data IS NOT NULL
        "#,
        DETECTION_COLUMNS
    );

    conn.query_row(&sql, params![id], row_to_pending)
        .optional()
        .context("Failed to query pending upload")
}

fn delete_cached_impl(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM detection_cache WHERE id = ?",
        params![id],
    ).context("Failed to delete cached detection")?;

    Ok(deleted > 0)
}

fn clear_cache_impl(conn: &Connection) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM detection_cache", [])
        .context("Failed to clear detection cache")?;

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn create_test_db() -> (TempDir, DatabaseManager) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = DatabaseManager::new(db_path).unwrap();
        (dir, db)
    }

    fn detection(id: &str, timestamp: &str) -> CachedDetection {
        CachedDetection {
            id: id.to_string(),
            disease_class: "Apple Scab".to_string(),
            confidence: 0.873,
            timestamp: timestamp.to_string(),
            image_ref_kind: "server".to_string(),
            image_ref: format!("uploads/images/{}.jpg", id),
            origin: "remote".to_string(),
        }
    }

    fn pending(id: &str, timestamp: &str) -> PendingUpload {
        let mut detection = detection(id, timestamp);
        detection.image_ref_kind = "local".to_string();
        detection.image_ref = "blob:abc".to_string();
        detection.origin = "local".to_string();
        PendingUpload {
            detection,
            image_name: "leaf.png".to_string(),
            image_mime: "image/png".to_string(),
            image_data: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_replace_remote_mirror_keeps_local_rows() {
        let (_dir, db) = create_test_db();

        db.replace_remote_mirror(&[detection("1", "2024-01-01T00:00:00Z")]).unwrap();
        db.insert_local_only(&pending("local-a", "2024-01-03T00:00:00Z")).unwrap();
        db.replace_remote_mirror(&[detection("2", "2024-01-02T00:00:00Z")]).unwrap();

        let cached = db.list_cached_detections().unwrap();
        let ids: Vec<&str> = cached.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["local-a", "2"]);
        assert_eq!(cached[0].origin, "local");
    }

    #[test]
    fn test_pending_uploads_carry_image() {
        let (_dir, db) = create_test_db();

        db.insert_local_only(&pending("local-b", "2024-01-02T00:00:00Z")).unwrap();
        db.insert_local_only(&pending("local-a", "2024-01-01T00:00:00Z")).unwrap();
        db.replace_remote_mirror(&[detection("1", "2024-01-05T00:00:00Z")]).unwrap();

        let uploads = db.pending_uploads().unwrap();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].detection.id, "local-a");
        assert_eq!(uploads[0].image_mime, "image/png");
        assert_eq!(uploads[0].image_data, vec![1, 2, 3]);
    }

    #[test]
    fn test_pending_upload_lookup() {
        let (_dir, db) = create_test_db();

        db.insert_local_only(&pending("local-b", "2024-01-02T00:00:00Z")).unwrap();
        db.insert_local_only(&pending("local-a", "2024-01-01T00:00:00Z")).unwrap();
        db.replace_remote_mirror(&[detection("1", "2024-01-05T00:00:00Z")]).unwrap();

        assert_eq!(db.pending_upload_ids().unwrap(), vec!["local-a", "local-b"]);
        let upload = db.pending_upload("local-b").unwrap().unwrap();
        assert_eq!(upload.image_name, "leaf.png");
        assert_eq!(upload.image_data, vec![1, 2, 3]);
        assert!(db.pending_upload("1").unwrap().is_none());

        db.delete_cached_detection("local-b").unwrap();
        assert!(db.pending_upload("local-b").unwrap().is_none());
    }

    #[test]
    fn test_delete_and_clear() {
        let (_dir, db) = create_test_db();

        db.replace_remote_mirror(&[
            detection("1", "2024-01-01T00:00:00Z"),
            detection("2", "2024-01-02T00:00:00Z"),
        ]).unwrap();

        assert!(db.delete_cached_detection("1").unwrap());
        assert!(!db.delete_cached_detection("1").unwrap());
        assert_eq!(db.list_cached_detections().unwrap().len(), 1);

        assert_eq!(db.clear_detection_cache().unwrap(), 1);
        assert!(db.list_cached_detections().unwrap().is_empty());
    }
}
