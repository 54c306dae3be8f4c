use std::convert::TryFrom;

use chrono::{DateTime, Utc};
use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::db::repositories::{format_date, from_json, parse_date, parse_optional_date, to_json};
use crate::error::{AppError, AppResult};
use crate::models::category::Category;
use crate::models::goal::{Goal, GoalStatus};

const BASE_SELECT: &str = r#"
    SELECT
        id,
        name,
        category,
        points,
        current_value,
        start_date,
        target_date,
        status,
        created_at,
        updated_at
    FROM goals
"#;

#[derive(Debug, Clone)]
pub struct GoalRow {
    pub id: String,
    pub name: String,
    pub category: String,
    pub points: String,
    pub current_value: i64,
    pub start_date: Option<String>,
    pub target_date: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl GoalRow {
    pub fn from_goal(goal: &Goal) -> AppResult<Self> {
        Ok(Self {
            id: goal.id.clone(),
            name: goal.name.clone(),
            category: goal.category.to_string(),
            points: to_json(&goal.points)?,
            current_value: goal.current_value,
            start_date: goal.start_date.map(format_date),
            target_date: format_date(goal.target_date),
            status: goal.status.as_str().to_string(),
            created_at: goal.created_at.to_rfc3339(),
            updated_at: goal.updated_at.to_rfc3339(),
        })
    }

    pub fn into_goal(self) -> AppResult<Goal> {
        Ok(Goal {
            id: self.id,
            name: self.name,
            category: Category::new(&self.category)?,
            points: from_json(Some(self.points))?,
            current_value: self.current_value,
            start_date: parse_optional_date(self.start_date)?,
            target_date: parse_date(&self.target_date)?,
            status: self.status.parse::<GoalStatus>()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for GoalRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(GoalRow {
            id: row.get("id")?,
            name: row.get("name")?,
            category: row.get("category")?,
            points: row.get("points")?,
            current_value: row.get("current_value")?,
            start_date: row.get("start_date")?,
            target_date: row.get("target_date")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub struct GoalRepository;

impl GoalRepository {
    pub fn insert(conn: &Connection, row: &GoalRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO goals (
                    id, name, category, points, current_value,
                    start_date, target_date, status, created_at, updated_at
                ) VALUES (
                    :id, :name, :category, :points, :current_value,
                    :start_date, :target_date, :status, :created_at, :updated_at
                )
            "#,
            named_params! {
                ":id": &row.id,
                ":name": &row.name,
                ":category": &row.category,
                ":points": &row.points,
                ":current_value": row.current_value,
                ":start_date": &row.start_date,
                ":target_date": &row.target_date,
                ":status": &row.status,
                ":created_at": &row.created_at,
                ":updated_at": &row.updated_at,
            },
        )?;
        Ok(())
    }

    pub fn update(conn: &Connection, row: &GoalRow) -> AppResult<()> {
        let affected = conn.execute(
            r#"
                UPDATE goals SET
                    name = :name,
                    category = :category,
                    points = :points,
                    current_value = :current_value,
                    start_date = :start_date,
                    target_date = :target_date,
                    status = :status,
                    updated_at = :updated_at
                WHERE id = :id
            "#,
            named_params! {
                ":id": &row.id,
                ":name": &row.name,
                ":category": &row.category,
                ":points": &row.points,
                ":current_value": row.current_value,
                ":start_date": &row.start_date,
                ":target_date": &row.target_date,
                ":status": &row.status,
                ":updated_at": &row.updated_at,
            },
        )?;
        if affected == 0 {
            return Err(AppError::not_found());
        }
        Ok(())
    }

    /// Write recomputed progress. Returns false when the row no longer exists.
    pub fn update_progress(
        conn: &Connection,
        id: &str,
        current_value: i64,
        status: GoalStatus,
        updated_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let affected = conn.execute(
            r#"
                UPDATE goals SET
                    current_value = :current_value,
                    status = :status,
                    updated_at = :updated_at
                WHERE id = :id
            "#,
            named_params! {
                ":id": id,
                ":current_value": current_value,
                ":status": status.as_str(),
                ":updated_at": updated_at.to_rfc3339(),
            },
        )?;
        Ok(affected > 0)
    }

    pub fn delete(conn: &Connection, id: &str) -> AppResult<()> {
        let affected = conn.execute("DELETE FROM goals WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(AppError::not_found());
        }
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<GoalRow>> {
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", BASE_SELECT))?;
        let row = stmt
            .query_row([id], |row| GoalRow::try_from(row))
            .optional()?;
        Ok(row)
    }

    pub fn list_all(conn: &Connection) -> AppResult<Vec<GoalRow>> {
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY target_date ASC, created_at ASC",
            BASE_SELECT
        ))?;
        let rows = stmt
            .query_map([], |row| GoalRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| AppError::database(format!("stored timestamp '{raw}' is invalid: {err}")))
}
