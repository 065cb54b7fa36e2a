// Settings repository for leafcheck
// Key/value overrides for the client configuration

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use super::models::{AllSettings, Setting};
use super::DatabaseManager;

impl DatabaseManager {
    /// Get a single setting by key
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            get_setting_impl(conn, key)
        })
    }

    /// Set a single setting
    pub fn set_setting(&self, key: &str, value: &str, value_type: &str) -> Result<()> {
        self.with_connection(|conn| {
            set_setting_impl(conn, key, value, value_type)
        })
    }

    /// Get all settings
    pub fn get_all_settings_list(&self) -> Result<Vec<Setting>> {
        self.with_connection(|conn| {
            get_all_settings_impl(conn)
        })
    }

    /// Load all settings as a structured object
    pub fn load_all_settings(&self) -> Result<AllSettings> {
        self.with_connection(|conn| {
            load_all_settings_impl(conn)
        })
    }

    /// Delete a setting by key
    pub fn delete_setting(&self, key: &str) -> Result<()> {
        self.with_connection(|conn| {
            delete_setting_impl(conn, key)
        })
    }
}

fn get_setting_impl(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT value FROM settings WHERE key = ?"
    ).context("Failed to prepare get_setting query")?;

    let result = stmt.query_row(params![key], |row| row.get(0));

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to get setting"),
    }
}

fn set_setting_impl(conn: &Connection, key: &str, value: &str, value_type: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO settings (key, value, value_type, updated_at)
        VALUES (?1, ?2, ?3, datetime('now'))
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            value_type = excluded.value_type,
            updated_at = datetime('now')
        "#,
        params![key, value, value_type],
    ).context("Failed to set setting")?;

    Ok(())
}

fn get_all_settings_impl(conn: &Connection) -> Result<Vec<Setting>> {
    let mut stmt = conn.prepare(
        "SELECT key, value, value_type, updated_at FROM settings ORDER BY key"
    ).context("Failed to prepare get_all_settings query")?;

    let settings = stmt.query_map([], |row| {
        Ok(Setting {
            key: row.get(0)?,
            value: row.get(1)?,
            value_type: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }).context("Failed to query settings")?;

    settings.collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to collect settings")
}

fn load_all_settings_impl(conn: &Connection) -> Result<AllSettings> {
    let mut settings = AllSettings::default();

    for setting in get_all_settings_impl(conn)? {
        let value = setting.value.trim();
        if value.is_empty() {
            continue;
        }

        match setting.key.as_str() {
            "predict_url" => settings.predict_url = Some(value.to_string()),
            "history_url" => settings.history_url = Some(value.to_string()),
            "base_url" => settings.base_url = Some(value.to_string()),
            "health_poll_interval_ms" => match value.parse::<u64>() {
                Ok(ms) => settings.health_poll_interval_ms = Some(ms),
                Err(_) => log::warn!("Ignoring non-numeric health_poll_interval_ms: {}", value),
            },
            other => {
                log::debug!("Unknown setting key: {}", other);
            }
        }
    }

    Ok(settings)
}

fn delete_setting_impl(conn: &Connection, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM settings WHERE key = ?",
        params![key],
    ).context("Failed to delete setting")?;

    Ok(())
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

    #[test]
    fn test_set_and_get_setting() {
        let (_dir, db) = create_test_db();

        db.set_setting("predict_url", "http://a/predict", "string").unwrap();
        db.set_setting("predict_url", "http://b/predict", "string").unwrap();
        assert_eq!(db.get_setting("predict_url").unwrap(), Some("http://b/predict".to_string()));
        assert_eq!(db.get_setting("missing").unwrap(), None);

        db.delete_setting("predict_url").unwrap();
        assert_eq!(db.get_setting("predict_url").unwrap(), None);
    }

    #[test]
    fn test_load_all_settings() {
        let (_dir, db) = create_test_db();

        db.set_setting("history_url", "http://h/history", "string").unwrap();
        db.set_setting("health_poll_interval_ms", "2500", "integer").unwrap();
        db.set_setting("base_url", "   ", "string").unwrap();
        db.set_setting("legacy_key", "x", "string").unwrap();

        let settings = db.load_all_settings().unwrap();
        assert_eq!(settings.history_url, Some("http://h/history".to_string()));
        assert_eq!(settings.health_poll_interval_ms, Some(2500));
        assert_eq!(settings.base_url, None);
        assert_eq!(settings.predict_url, None);
        assert_eq!(db.get_all_settings_list().unwrap().len(), 4);
    }

    #[test]
    fn test_bad_interval_is_ignored() {
        let (_dir, db) = create_test_db();

        db.set_setting("health_poll_interval_ms", "soon", "integer").unwrap();
        assert_eq!(db.load_all_settings().unwrap().health_poll_interval_ms, None);
    }
}
