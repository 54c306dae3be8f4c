use std::convert::TryFrom;

use chrono::{NaiveDate, Utc};
use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::db::repositories::{format_date, from_json, parse_date, parse_optional_date, to_json};
use crate::error::{AppError, AppResult};
use crate::models::activity::{
    ActivityPayload, ActivityRecord, ActivityStatus, Completion, RecurrenceLink,
};

const BASE_SELECT: &str = r#"
    SELECT
        id,
        name,
        categories,
        points,
        date,
        status,
        current_value,
        target_value,
        unit,
        description,
        duration,
        rule_id,
        occurrence_date,
        created_at,
        updated_at
    FROM activities
"#;

#[derive(Debug, Clone)]
pub struct ActivityRow {
    pub id: String,
    pub name: String,
    pub categories: String,
    pub points: String,
    pub date: Option<String>,
    pub status: String,
    pub current_value: Option<f64>,
    pub target_value: Option<f64>,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub duration: Option<i64>,
    pub rule_id: Option<String>,
    pub occurrence_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ActivityRow {
    pub fn from_record(record: &ActivityRecord) -> AppResult<Self> {
        let (current_value, target_value, unit) = match &record.completion {
            Completion::Binary { .. } => (None, None, None),
            Completion::Progress {
                current_value,
                target_value,
                unit,
            } => (Some(*current_value), Some(*target_value), unit.clone()),
        };
        let now = Utc::now().to_rfc3339();

        Ok(Self {
            id: record.id.clone(),
            name: record.name.clone(),
            categories: to_json(&record.categories)?,
            points: to_json(&record.points)?,
            date: record.date.map(format_date),
            status: status_str(record.status()).to_string(),
            current_value,
            target_value,
            unit,
            description: record.description.clone(),
            duration: record.duration,
            rule_id: record.recurrence.as_ref().map(|link| link.rule_id.clone()),
            occurrence_date: record
                .recurrence
                .as_ref()
                .map(|link| format_date(link.occurrence_date)),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn into_record(self) -> AppResult<ActivityRecord> {
        let recurrence = match (self.rule_id, self.occurrence_date) {
            (Some(rule_id), Some(date)) => Some(RecurrenceLink {
                rule_id,
                occurrence_date: parse_date(&date)?,
            }),
            _ => None,
        };
        let payload = ActivityPayload {
            id: self.id,
            name: self.name,
            categories: from_json(Some(self.categories))?,
            points: from_json(Some(self.points))?,
            date: parse_optional_date(self.date)?,
            status: parse_status(&self.status)?,
            current_value: self.current_value,
            target_value: self.target_value,
            unit: self.unit,
            description: self.description,
            duration: self.duration,
            recurrence,
        };
        ActivityRecord::try_from(payload)
    }
}

impl TryFrom<&Row<'_>> for ActivityRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(ActivityRow {
            id: row.get("id")?,
            name: row.get("name")?,
            categories: row.get("categories")?,
            points: row.get("points")?,
            date: row.get("date")?,
            status: row.get("status")?,
            current_value: row.get("current_value")?,
            target_value: row.get("target_value")?,
            unit: row.get("unit")?,
            description: row.get("description")?,
            duration: row.get("duration")?,
            rule_id: row.get("rule_id")?,
            occurrence_date: row.get("occurrence_date")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub struct ActivityRepository;

impl ActivityRepository {
    pub fn insert(conn: &Connection, row: &ActivityRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO activities (
                    id, name, categories, points, date, status,
                    current_value, target_value, unit, description, duration,
                    rule_id, occurrence_date, created_at, updated_at
                ) VALUES (
                    :id, :name, :categories, :points, :date, :status,
                    :current_value, :target_value, :unit, :description, :duration,
                    :rule_id, :occurrence_date, :created_at, :updated_at
                )
            "#,
            named_params! {
                ":id": &row.id,
                ":name": &row.name,
                ":categories": &row.categories,
                ":points": &row.points,
                ":date": &row.date,
                ":status": &row.status,
                ":current_value": &row.current_value,
                ":target_value": &row.target_value,
                ":unit": &row.unit,
                ":description": &row.description,
                ":duration": &row.duration,
                ":rule_id": &row.rule_id,
                ":occurrence_date": &row.occurrence_date,
                ":created_at": &row.created_at,
                ":updated_at": &row.updated_at,
            },
        )?;

        Ok(())
    }

    /// Insert a materialized occurrence, or refresh its template fields when it
    /// already exists. Completion state of an existing row is preserved.
    pub fn upsert_materialized(conn: &Connection, row: &ActivityRow) -> AppResult<()> {
        if row.rule_id.is_none() {
            return Err(AppError::validation(
                "Only rule-linked activities can be materialized",
            ));
        }
        conn.execute(
            r#"
                INSERT INTO activities (
                    id, name, categories, points, date, status,
                    current_value, target_value, unit, description, duration,
                    rule_id, occurrence_date, created_at, updated_at
                ) VALUES (
                    :id, :name, :categories, :points, :date, :status,
                    :current_value, :target_value, :unit, :description, :duration,
                    :rule_id, :occurrence_date, :created_at, :updated_at
                )
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    categories = excluded.categories,
                    points = excluded.points,
                    description = excluded.description,
                    duration = excluded.duration,
                    updated_at = excluded.updated_at
            "#,
            named_params! {
                ":id": &row.id,
                ":name": &row.name,
                ":categories": &row.categories,
                ":points": &row.points,
                ":date": &row.date,
                ":status": &row.status,
                ":current_value": &row.current_value,
                ":target_value": &row.target_value,
                ":unit": &row.unit,
                ":description": &row.description,
                ":duration": &row.duration,
                ":rule_id": &row.rule_id,
                ":occurrence_date": &row.occurrence_date,
                ":created_at": &row.created_at,
                ":updated_at": &row.updated_at,
            },
        )?;

        Ok(())
    }

    pub fn update(conn: &Connection, row: &ActivityRow) -> AppResult<()> {
        let affected = conn.execute(
            r#"
                UPDATE activities SET
                    name = :name,
                    categories = :categories,
                    points = :points,
                    date = :date,
                    status = :status,
                    current_value = :current_value,
                    target_value = :target_value,
                    unit = :unit,
                    description = :description,
                    duration = :duration,
                    updated_at = :updated_at
                WHERE id = :id
            "#,
            named_params! {
                ":id": &row.id,
                ":name": &row.name,
                ":categories": &row.categories,
                ":points": &row.points,
                ":date": &row.date,
                ":status": &row.status,
                ":current_value": &row.current_value,
                ":target_value": &row.target_value,
                ":unit": &row.unit,
                ":description": &row.description,
                ":duration": &row.duration,
                ":updated_at": &row.updated_at,
            },
        )?;

        if affected == 0 {
            return Err(AppError::not_found());
        }

        Ok(())
    }

    pub fn delete(conn: &Connection, id: &str) -> AppResult<()> {
        let affected = conn.execute("DELETE FROM activities WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(AppError::not_found());
        }
        Ok(())
    }

    /// Remove materialized instances of a rule dated on or after `from`.
    pub fn delete_materialized_from(
        conn: &Connection,
        rule_id: &str,
        from: NaiveDate,
    ) -> AppResult<usize> {
        let affected = conn.execute(
            "DELETE FROM activities WHERE rule_id = ?1 AND occurrence_date >= ?2",
            [rule_id, format_date(from).as_str()],
        )?;
        Ok(affected)
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<ActivityRow>> {
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", BASE_SELECT))?;
        let row = stmt
            .query_row([id], |row| ActivityRow::try_from(row))
            .optional()?;
        Ok(row)
    }

    pub fn list_all(conn: &Connection) -> AppResult<Vec<ActivityRow>> {
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY date IS NULL, date ASC, created_at ASC",
            BASE_SELECT
        ))?;
        let rows = stmt
            .query_map([], |row| ActivityRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_between(
        conn: &Connection,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<ActivityRow>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE date >= ?1 AND date <= ?2 ORDER BY date ASC, created_at ASC",
            BASE_SELECT
        ))?;
        let rows = stmt
            .query_map([format_date(from), format_date(to)], |row| {
                ActivityRow::try_from(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_by_rule(conn: &Connection, rule_id: &str) -> AppResult<Vec<ActivityRow>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE rule_id = ?1 ORDER BY occurrence_date ASC",
            BASE_SELECT
        ))?;
        let rows = stmt
            .query_map([rule_id], |row| ActivityRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn status_str(status: ActivityStatus) -> &'static str {
    match status {
        ActivityStatus::Completed => "completed",
        ActivityStatus::Pending => "pending",
    }
}

fn parse_status(raw: &str) -> AppResult<ActivityStatus> {
    match raw {
        "completed" => Ok(ActivityStatus::Completed),
        "pending" => Ok(ActivityStatus::Pending),
        other => Err(AppError::database(format!(
            "stored activity status '{other}' is invalid"
        ))),
    }
}
