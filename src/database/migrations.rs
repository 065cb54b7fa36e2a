// Database migrations for the detection cache
// Creates and updates the database schema

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Current schema version
const SCHEMA_VERSION: i32 = 2;

/// Run all necessary migrations to bring the database up to date
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        anyhow::bail!(
            "database schema version {} is newer than supported version {}",
            current_version,
            SCHEMA_VERSION
        );
    }

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version from the database
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    ).context("Failed to inspect sqlite_master")?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    ).context("Failed to read schema version")?;

    Ok(version.unwrap_or(0))
}

/// Initial schema creation (version 1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    log::info!("Running database migration v1");

    conn.execute_batch(r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Settings table: key-value overrides for client configuration
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            value_type TEXT NOT NULL DEFAULT 'string',
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Local copy of the detection history
        CREATE TABLE IF NOT EXISTS detection_cache (
            id TEXT PRIMARY KEY NOT NULL,
            disease_class TEXT NOT NULL,
            confidence REAL NOT NULL,
            timestamp TEXT NOT NULL,
            image_ref_kind TEXT NOT NULL,
            image_ref TEXT NOT NULL,
            cached_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_detection_cache_timestamp
        ON detection_cache(timestamp DESC);

        INSERT INTO schema_version (version) VALUES (1);
    "#).context("Failed to run migration v1")?;

    Ok(())
}

/// Local-only records (version 2): keep origin and image bytes for later upload
fn migrate_v2(conn: &Connection) -> Result<()> {
    log::info!("Running database migration v2");

    conn.execute_batch(r#"
        ALTER TABLE detection_cache ADD COLUMN origin TEXT NOT NULL DEFAULT 'remote';
        ALTER TABLE detection_cache ADD COLUMN image_name TEXT;
        ALTER TABLE detection_cache ADD COLUMN image_mime TEXT;
        ALTER TABLE detection_cache ADD COLUMN image_data BLOB;

        CREATE INDEX IF NOT EXISTS idx_detection_cache_origin
        ON detection_cache(origin);

        INSERT INTO schema_version (version) VALUES (2);
    "#).context("Failed to run migration v2")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_rejects_newer_schema() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (99)", []).unwrap();

        assert!(run_migrations(&conn).is_err());
    }
}
