use std::convert::TryFrom;

use chrono::{NaiveDate, Utc};
use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::db::repositories::{format_date, parse_date};
use crate::error::AppResult;
use crate::models::category::Category;
use crate::models::recurring::ExpenseRecord;

#[derive(Debug, Clone)]
pub struct ExpenseRow {
    pub id: String,
    pub amount: f64,
    pub category: String,
    pub date: String,
    pub description: Option<String>,
    pub rule_id: String,
    pub created_at: String,
}

impl ExpenseRow {
    pub fn from_record(record: &ExpenseRecord) -> Self {
        Self {
            id: record.id.clone(),
            amount: record.amount,
            category: record.category.to_string(),
            date: format_date(record.date),
            description: record.description.clone(),
            rule_id: record.rule_id.clone(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn into_record(self) -> AppResult<ExpenseRecord> {
        Ok(ExpenseRecord {
            id: self.id,
            amount: self.amount,
            category: Category::new(&self.category)?,
            date: parse_date(&self.date)?,
            description: self.description,
            rule_id: self.rule_id,
        })
    }
}

impl TryFrom<&Row<'_>> for ExpenseRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(ExpenseRow {
            id: row.get("id")?,
            amount: row.get("amount")?,
            category: row.get("category")?,
            date: row.get("date")?,
            description: row.get("description")?,
            rule_id: row.get("rule_id")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Storage for expenses produced by recurring rules.
pub struct ExpenseRepository;

impl ExpenseRepository {
    pub fn upsert(conn: &Connection, row: &ExpenseRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO expenses (id, amount, category, date, description, rule_id, created_at)
                VALUES (:id, :amount, :category, :date, :description, :rule_id, :created_at)
                ON CONFLICT(id) DO UPDATE SET
                    amount = excluded.amount,
                    category = excluded.category,
                    description = excluded.description
            "#,
            named_params! {
                ":id": &row.id,
                ":amount": row.amount,
                ":category": &row.category,
                ":date": &row.date,
                ":description": &row.description,
                ":rule_id": &row.rule_id,
                ":created_at": &row.created_at,
            },
        )?;
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<ExpenseRow>> {
        let row = conn
            .prepare_cached(
                "SELECT id, amount, category, date, description, rule_id, created_at
                 FROM expenses WHERE id = ?1",
            )?
            .query_row([id], |row| ExpenseRow::try_from(row))
            .optional()?;
        Ok(row)
    }

    pub fn list_by_rule(conn: &Connection, rule_id: &str) -> AppResult<Vec<ExpenseRow>> {
        let mut stmt = conn.prepare(
            r#"
                SELECT id, amount, category, date, description, rule_id, created_at
                FROM expenses
                WHERE rule_id = ?1
                ORDER BY date ASC
            "#,
        )?;
        let rows = stmt
            .query_map([rule_id], |row| ExpenseRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_from(conn: &Connection, rule_id: &str, from: NaiveDate) -> AppResult<usize> {
        let affected = conn.execute(
            "DELETE FROM expenses WHERE rule_id = ?1 AND date >= ?2",
            [rule_id, format_date(from).as_str()],
        )?;
        Ok(affected)
    }
}
