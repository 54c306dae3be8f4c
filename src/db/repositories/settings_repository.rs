use std::collections::HashMap;
use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::AppResult;

/// Stored value of one tracker setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingRow {
    pub value: String,
    pub updated_at: String,
}

impl TryFrom<&Row<'_>> for SettingRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            value: row.get("value")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Key/value storage behind `app_settings`.
pub struct SettingsRepository;

impl SettingsRepository {
    pub fn get(conn: &Connection, key: &str) -> AppResult<Option<SettingRow>> {
        let row = conn
            .prepare_cached("SELECT value, updated_at FROM app_settings WHERE key = ?1")?
            .query_row([key], |row| SettingRow::try_from(row))
            .optional()?;
        Ok(row)
    }

    /// Every stored setting keyed by name.
    pub fn load_all(conn: &Connection) -> AppResult<HashMap<String, SettingRow>> {
        let mut stmt = conn.prepare("SELECT key, value, updated_at FROM app_settings")?;
        let entries = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>("key")?, SettingRow::try_from(row)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(entries)
    }

    /// Write several settings stamped with the same time. Callers wanting
    /// atomicity pass a transaction.
    pub fn upsert_many(
        conn: &Connection,
        entries: &[(&str, String)],
        updated_at: &str,
    ) -> AppResult<usize> {
        let mut stmt = conn.prepare_cached(
            r#"
                INSERT INTO app_settings (key, value, updated_at)
                VALUES (:key, :value, :updated_at)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
            "#,
        )?;
        let mut written = 0;
        for (key, value) in entries {
            written += stmt.execute(named_params! {
                ":key": key,
                ":value": value,
                ":updated_at": updated_at,
            })?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use tempfile::TempDir;

    #[test]
    fn upsert_many_overwrites_and_stamps() {
        let dir = TempDir::new().unwrap();
        let pool = DbPool::new(dir.path().join("kv.db")).unwrap();
        pool.with_connection(|conn| {
            SettingsRepository::upsert_many(
                conn,
                &[("a", "1".to_string()), ("b", "2".to_string())],
                "2025-01-01T00:00:00+00:00",
            )?;
            SettingsRepository::upsert_many(
                conn,
                &[("a", "3".to_string())],
                "2025-02-01T00:00:00+00:00",
            )?;

            let all = SettingsRepository::load_all(conn)?;
            assert_eq!(all.len(), 2);
            assert_eq!(all["a"].value, "3");
            assert_eq!(all["a"].updated_at, "2025-02-01T00:00:00+00:00");
            assert_eq!(
                SettingsRepository::get(conn, "b")?.map(|row| row.value),
                Some("2".to_string())
            );
            assert!(SettingsRepository::get(conn, "missing")?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
