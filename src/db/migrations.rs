use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::info;

use crate::error::{AppError, AppResult};

struct Migration {
    version: i32,
    description: &'static str,
    apply: fn(&Connection) -> AppResult<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "recurring rules, occurrence overrides and activity links",
        apply: migrate_to_v1,
    },
    Migration {
        version: 2,
        description: "materialized expenses",
        apply: migrate_to_v2,
    },
];

/// A migration as recorded in `migration_history`.
#[derive(Debug)]
pub struct MigrationInfo {
    pub version: i32,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

pub fn latest_version() -> i32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Apply every migration newer than `PRAGMA user_version`, in order. Returns
/// the versions applied by this call.
pub fn run(conn: &Connection) -> AppResult<Vec<i32>> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migration_history (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let mut applied = Vec::new();
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            target: "app::db",
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        (migration.apply)(conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO migration_history (version, description, applied_at)
             VALUES (?1, ?2, ?3)",
            params![migration.version, migration.description, Utc::now().to_rfc3339()],
        )?;
        conn.pragma_update(None, "user_version", migration.version)?;
        applied.push(migration.version);
    }
    Ok(applied)
}

pub fn history(conn: &Connection) -> AppResult<Vec<MigrationInfo>> {
    let mut stmt = conn.prepare(
        "SELECT version, description, applied_at FROM migration_history ORDER BY version",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(version, description, raw)| {
            let applied_at = DateTime::parse_from_rfc3339(&raw)
                .map_err(|err| {
                    AppError::database(format!("migration {version} has bad timestamp: {err}"))
                })?
                .with_timezone(&Utc);
            Ok(MigrationInfo {
                version,
                description,
                applied_at,
            })
        })
        .collect()
}

fn migrate_to_v1(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS recurring_rules (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL CHECK (owner IN ('task', 'expense')),
            frequency TEXT NOT NULL CHECK (frequency IN ('daily', 'weekly', 'monthly')),
            interval_value INTEGER NOT NULL DEFAULT 1 CHECK (interval_value BETWEEN 1 AND 999),
            start_date TEXT NOT NULL,
            end_date TEXT,
            data TEXT NOT NULL,
            segments TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            ended_on TEXT,
            purged INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS occurrence_overrides (
            rule_id TEXT NOT NULL,
            occurrence_date TEXT NOT NULL,
            patch TEXT NOT NULL,
            completed INTEGER,
            skipped INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (rule_id, occurrence_date),
            FOREIGN KEY (rule_id) REFERENCES recurring_rules(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_recurring_rules_status
            ON recurring_rules(status);
        "#,
    )?;

    ensure_column(conn, "activities", "rule_id", "TEXT")?;
    ensure_column(conn, "activities", "occurrence_date", "TEXT")?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_activities_rule ON activities(rule_id, occurrence_date);",
    )?;

    Ok(())
}

fn migrate_to_v2(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            amount REAL NOT NULL,
            category TEXT NOT NULL,
            date TEXT NOT NULL,
            description TEXT,
            rule_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_expenses_rule_date
            ON expenses(rule_id, date);
        "#,
    )?;

    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, column: &str, definition: &str) -> AppResult<()> {
    if !column_exists(conn, table, column)? {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {definition};"))?;
    }
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name.eq_ignore_ascii_case(column)))
}
