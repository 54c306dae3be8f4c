use std::convert::TryFrom;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::db::repositories::{format_date, from_json, parse_date, parse_optional_date, to_json};
use crate::error::{AppError, AppResult};
use crate::models::recurring::{
    Frequency, OccurrenceOverride, RecurringRule, RuleOwner, RuleState,
};

const RULE_SELECT: &str = r#"
    SELECT
        id,
        owner,
        frequency,
        interval_value,
        start_date,
        end_date,
        data,
        segments,
        status,
        ended_on,
        purged,
        created_at,
        updated_at
    FROM recurring_rules
"#;

const OVERRIDE_SELECT: &str = r#"
    SELECT
        rule_id,
        occurrence_date,
        patch,
        completed,
        skipped,
        updated_at
    FROM occurrence_overrides
"#;

#[derive(Debug, Clone)]
pub struct RuleRow {
    pub id: String,
    pub owner: String,
    pub frequency: String,
    pub interval_value: i64,
    pub start_date: String,
    pub end_date: Option<String>,
    pub data: String,
    pub segments: Option<String>,
    pub status: String,
    pub ended_on: Option<String>,
    pub purged: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl RuleRow {
    pub fn from_rule(rule: &RecurringRule) -> AppResult<Self> {
        let (status, ended_on, purged) = match rule.state {
            RuleState::Active => ("active", None, false),
            RuleState::Inactive { ended_on, purged } => {
                ("inactive", Some(format_date(ended_on)), purged)
            }
        };
        let segments = if rule.segments.is_empty() {
            None
        } else {
            Some(to_json(&rule.segments)?)
        };
        let now = Utc::now().to_rfc3339();

        Ok(Self {
            id: rule.id.clone(),
            owner: rule.owner.as_str().to_string(),
            frequency: rule.frequency.to_string(),
            interval_value: rule.interval as i64,
            start_date: format_date(rule.start_date),
            end_date: rule.end_date.map(format_date),
            data: to_json(&rule.data)?,
            segments,
            status: status.to_string(),
            ended_on,
            purged,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn into_rule(self) -> AppResult<RecurringRule> {
        let state = match self.status.as_str() {
            "active" => RuleState::Active,
            "inactive" => RuleState::Inactive {
                ended_on: parse_optional_date(self.ended_on)?.ok_or_else(|| {
                    AppError::database(format!("inactive rule {} has no end date", self.id))
                })?,
                purged: self.purged,
            },
            other => {
                return Err(AppError::database(format!(
                    "stored rule status '{other}' is invalid"
                )))
            }
        };
        let interval = u32::try_from(self.interval_value).map_err(|_| {
            AppError::database(format!("stored interval {} is invalid", self.interval_value))
        })?;

        Ok(RecurringRule {
            id: self.id,
            owner: self.owner.parse::<RuleOwner>()?,
            frequency: self.frequency.parse::<Frequency>()?,
            interval,
            start_date: parse_date(&self.start_date)?,
            end_date: parse_optional_date(self.end_date)?,
            data: serde_json::from_str(&self.data)?,
            segments: from_json(self.segments)?,
            state,
        })
    }
}

impl TryFrom<&Row<'_>> for RuleRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(RuleRow {
            id: row.get("id")?,
            owner: row.get("owner")?,
            frequency: row.get("frequency")?,
            interval_value: row.get("interval_value")?,
            start_date: row.get("start_date")?,
            end_date: row.get("end_date")?,
            data: row.get("data")?,
            segments: row.get("segments")?,
            status: row.get("status")?,
            ended_on: row.get("ended_on")?,
            purged: row.get::<_, i64>("purged")? != 0,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OverrideRow {
    pub rule_id: String,
    pub occurrence_date: String,
    pub patch: String,
    pub completed: Option<bool>,
    pub skipped: bool,
    pub updated_at: String,
}

impl OverrideRow {
    pub fn from_override(record: &OccurrenceOverride) -> AppResult<Self> {
        Ok(Self {
            rule_id: record.rule_id.clone(),
            occurrence_date: format_date(record.occurrence_date),
            patch: to_json(&record.patch)?,
            completed: record.completed,
            skipped: record.skipped,
            updated_at: record.updated_at.to_rfc3339(),
        })
    }

    pub fn into_override(self) -> AppResult<OccurrenceOverride> {
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|value| value.with_timezone(&Utc))
            .map_err(|err| AppError::database(format!("stored timestamp is invalid: {err}")))?;
        Ok(OccurrenceOverride {
            rule_id: self.rule_id,
            occurrence_date: parse_date(&self.occurrence_date)?,
            patch: from_json(Some(self.patch))?,
            completed: self.completed,
            skipped: self.skipped,
            updated_at,
        })
    }
}

impl TryFrom<&Row<'_>> for OverrideRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(OverrideRow {
            rule_id: row.get("rule_id")?,
            occurrence_date: row.get("occurrence_date")?,
            patch: row.get("patch")?,
            completed: row
                .get::<_, Option<i64>>("completed")?
                .map(|value| value != 0),
            skipped: row.get::<_, i64>("skipped")? != 0,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub struct RecurringRepository;

impl RecurringRepository {
    /// Insert a rule or replace every mutable column of an existing one.
    pub fn upsert(conn: &Connection, row: &RuleRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO recurring_rules (
                    id, owner, frequency, interval_value, start_date, end_date,
                    data, segments, status, ended_on, purged, created_at, updated_at
                ) VALUES (
                    :id, :owner, :frequency, :interval_value, :start_date, :end_date,
                    :data, :segments, :status, :ended_on, :purged, :created_at, :updated_at
                )
                ON CONFLICT(id) DO UPDATE SET
                    owner = excluded.owner,
                    frequency = excluded.frequency,
                    interval_value = excluded.interval_value,
                    start_date = excluded.start_date,
                    end_date = excluded.end_date,
                    data = excluded.data,
                    segments = excluded.segments,
                    status = excluded.status,
                    ended_on = excluded.ended_on,
                    purged = excluded.purged,
                    updated_at = excluded.updated_at
            "#,
            named_params! {
                ":id": &row.id,
                ":owner": &row.owner,
                ":frequency": &row.frequency,
                ":interval_value": row.interval_value,
                ":start_date": &row.start_date,
                ":end_date": &row.end_date,
                ":data": &row.data,
                ":segments": &row.segments,
                ":status": &row.status,
                ":ended_on": &row.ended_on,
                ":purged": row.purged as i64,
                ":created_at": &row.created_at,
                ":updated_at": &row.updated_at,
            },
        )?;
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<RuleRow>> {
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", RULE_SELECT))?;
        let row = stmt
            .query_row([id], |row| RuleRow::try_from(row))
            .optional()?;
        Ok(row)
    }

    pub fn list_all(conn: &Connection) -> AppResult<Vec<RuleRow>> {
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY start_date ASC, created_at ASC",
            RULE_SELECT
        ))?;
        let rows = stmt
            .query_map([], |row| RuleRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_active(conn: &Connection) -> AppResult<Vec<RuleRow>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE status = 'active' ORDER BY start_date ASC, created_at ASC",
            RULE_SELECT
        ))?;
        let rows = stmt
            .query_map([], |row| RuleRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert_override(conn: &Connection, row: &OverrideRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO occurrence_overrides (
                    rule_id, occurrence_date, patch, completed, skipped, updated_at
                ) VALUES (
                    :rule_id, :occurrence_date, :patch, :completed, :skipped, :updated_at
                )
                ON CONFLICT(rule_id, occurrence_date) DO UPDATE SET
                    patch = excluded.patch,
                    completed = excluded.completed,
                    skipped = excluded.skipped,
                    updated_at = excluded.updated_at
            "#,
            named_params! {
                ":rule_id": &row.rule_id,
                ":occurrence_date": &row.occurrence_date,
                ":patch": &row.patch,
                ":completed": row.completed.map(|value| value as i64),
                ":skipped": row.skipped as i64,
                ":updated_at": &row.updated_at,
            },
        )?;
        Ok(())
    }

    pub fn find_override(
        conn: &Connection,
        rule_id: &str,
        occurrence_date: NaiveDate,
    ) -> AppResult<Option<OverrideRow>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE rule_id = ?1 AND occurrence_date = ?2",
            OVERRIDE_SELECT
        ))?;
        let row = stmt
            .query_row([rule_id, format_date(occurrence_date).as_str()], |row| {
                OverrideRow::try_from(row)
            })
            .optional()?;
        Ok(row)
    }

    pub fn list_overrides(conn: &Connection, rule_id: &str) -> AppResult<Vec<OverrideRow>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE rule_id = ?1 ORDER BY occurrence_date ASC",
            OVERRIDE_SELECT
        ))?;
        let rows = stmt
            .query_map([rule_id], |row| OverrideRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_overrides_from(
        conn: &Connection,
        rule_id: &str,
        from: NaiveDate,
    ) -> AppResult<usize> {
        let affected = conn.execute(
            "DELETE FROM occurrence_overrides WHERE rule_id = ?1 AND occurrence_date >= ?2",
            [rule_id, format_date(from).as_str()],
        )?;
        Ok(affected)
    }
}
