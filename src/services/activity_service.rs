use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::repositories::activity_repository::{ActivityRepository, ActivityRow};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::activity::{ActivityCreateInput, ActivityRecord};
use crate::models::category::CategoryRegistry;
use crate::services::csv_import::{self, ImportRowError};

/// Activities loaded for aggregation. `degraded` marks a load that failed and
/// was replaced by an empty set.
#[derive(Debug, Clone, Default)]
pub struct ActivitySnapshot {
    pub activities: Vec<ActivityRecord>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvImportReport {
    pub imported: Vec<ActivityRecord>,
    pub errors: Vec<ImportRowError>,
}

#[derive(Clone)]
pub struct ActivityService {
    db: DbPool,
}

impl ActivityService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        input: ActivityCreateInput,
        registry: &CategoryRegistry,
    ) -> AppResult<ActivityRecord> {
        let record = ActivityRecord::from_input(input, registry)?;
        let row = ActivityRow::from_record(&record)?;
        self.db
            .with_connection(|conn| ActivityRepository::insert(conn, &row))?;
        info!(target: "app::db", activity_id = %record.id, "activity created");
        Ok(record)
    }

    pub fn get(&self, id: &str) -> AppResult<ActivityRecord> {
        let row = self
            .db
            .with_connection(|conn| ActivityRepository::find_by_id(conn, id))?
            .ok_or_else(AppError::not_found)?;
        row.into_record()
    }

    pub fn list(&self) -> AppResult<Vec<ActivityRecord>> {
        let rows = self
            .db
            .with_connection(|conn| ActivityRepository::list_all(conn))?;
        let activities = rows
            .into_iter()
            .map(|row| row.into_record())
            .collect::<AppResult<Vec<_>>>()?;
        debug!(target: "app::db", count = activities.len(), "activities listed");
        Ok(activities)
    }

    pub fn list_between(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<ActivityRecord>> {
        let rows = self
            .db
            .with_connection(|conn| ActivityRepository::list_between(conn, from, to))?;
        rows.into_iter().map(|row| row.into_record()).collect()
    }

    /// Load every activity, falling back to an empty set when storage fails so
    /// that summaries can still be served.
    pub fn load_or_empty(&self) -> ActivitySnapshot {
        match self.list() {
            Ok(activities) => ActivitySnapshot {
                activities,
                degraded: false,
            },
            Err(err) => {
                warn!(
                    target: "app::points",
                    error = %err,
                    "activity load failed, continuing with an empty set"
                );
                ActivitySnapshot {
                    activities: Vec::new(),
                    degraded: true,
                }
            }
        }
    }

    pub fn toggle(&self, id: &str) -> AppResult<ActivityRecord> {
        let mut record = self.get(id)?;
        record.toggle_completion();
        self.save(&record)?;
        info!(
            target: "app::db",
            activity_id = %record.id,
            completed = record.is_completed(),
            "activity toggled"
        );
        Ok(record)
    }

    pub fn set_progress(&self, id: &str, value: f64) -> AppResult<ActivityRecord> {
        let mut record = self.get(id)?;
        record.set_progress(value)?;
        self.save(&record)?;
        Ok(record)
    }

    pub fn delete(&self, id: &str) -> AppResult<()> {
        self.db
            .with_connection(|conn| ActivityRepository::delete(conn, id))?;
        info!(target: "app::db", activity_id = %id, "activity deleted");
        Ok(())
    }

    /// Import CSV text. Valid rows are stored together; invalid rows are
    /// reported back without aborting the import.
    pub fn import_csv(&self, text: &str, registry: &CategoryRegistry) -> AppResult<CsvImportReport> {
        let parsed = csv_import::parse_activities(text, registry)?;
        let rows = parsed
            .records
            .iter()
            .map(ActivityRow::from_record)
            .collect::<AppResult<Vec<_>>>()?;

        self.db.with_transaction(|conn| {
            for row in &rows {
                ActivityRepository::insert(conn, row)?;
            }
            Ok(())
        })?;

        info!(
            target: "app::import",
            imported = parsed.records.len(),
            rejected = parsed.errors.len(),
            "csv import finished"
        );
        Ok(CsvImportReport {
            imported: parsed.records,
            errors: parsed.errors,
        })
    }

    fn save(&self, record: &ActivityRecord) -> AppResult<()> {
        record.validate()?;
        let mut row = ActivityRow::from_record(record)?;
        row.updated_at = Utc::now().to_rfc3339();
        self.db
            .with_connection(|conn| ActivityRepository::update(conn, &row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn setup() -> (ActivityService, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = DbPool::new(dir.path().join("activities.db")).unwrap();
        (ActivityService::new(pool), dir)
    }

    fn input(name: &str) -> ActivityCreateInput {
        ActivityCreateInput {
            name: name.into(),
            categories: vec!["Work".into()],
            points: BTreeMap::from([("Work".to_string(), 4)]),
            date: NaiveDate::from_ymd_opt(2025, 8, 24),
            ..Default::default()
        }
    }

    #[test]
    fn toggle_persists_completion() {
        let (service, _dir) = setup();
        let registry = CategoryRegistry::default();
        let created = service.create(input("Ship"), &registry).unwrap();
        assert!(!created.is_completed());

        service.toggle(&created.id).unwrap();
        assert!(service.get(&created.id).unwrap().is_completed());
    }

    #[test]
    fn delete_of_missing_activity_is_not_found() {
        let (service, _dir) = setup();
        assert!(matches!(service.delete("nope"), Err(AppError::NotFound)));
    }

    #[test]
    fn load_reports_degraded_when_storage_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activities.db");
        let service = ActivityService::new(DbPool::new(&path).unwrap());
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let snapshot = service.load_or_empty();
        assert!(snapshot.degraded);
        assert!(snapshot.activities.is_empty());
    }
}
