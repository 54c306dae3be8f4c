//! Normalizes task rows exported from spreadsheets into activity records.
//!
//! The first non-empty line is a header. Columns are matched by name, case
//! insensitively: `name`, `categories`, `points`, `status`, `date`,
//! `description`, `duration`. Rows that fail validation are reported with
//! their line number and do not stop the rest of the import.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::models::activity::{ActivityCreateInput, ActivityRecord, ActivityStatus};
use crate::models::category::CategoryRegistry;

const DATE_FORMATS: [&str; 3] = ["%d-%b-%Y", "%d/%m/%Y", "%Y-%m-%d"];

static POINTS_PAIR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<category>[^:]+?)\s*:\s*(?P<points>-?\d+)\s*$")
        .expect("valid points pair regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowError {
    /// 1-based line number in the submitted text.
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedImport {
    pub records: Vec<ActivityRecord>,
    pub errors: Vec<ImportRowError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    Name,
    Categories,
    Points,
    Status,
    Date,
    Description,
    Duration,
}

impl Column {
    fn from_header(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "name" | "title" | "task" => Some(Column::Name),
            "categories" | "category" => Some(Column::Categories),
            "points" => Some(Column::Points),
            "status" => Some(Column::Status),
            "date" => Some(Column::Date),
            "description" | "notes" => Some(Column::Description),
            "duration" => Some(Column::Duration),
            _ => None,
        }
    }
}

/// Parse CSV text into activity records, validating each row against the
/// registry.
pub fn parse_activities(text: &str, registry: &CategoryRegistry) -> AppResult<ParsedImport> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| AppError::validation("CSV file is empty"))?;
    let columns = map_columns(&parse_csv_row(header))?;

    let mut parsed = ParsedImport::default();
    for (idx, line) in lines {
        let line_no = idx + 1;
        let fields = parse_csv_row(line);
        match build_input(&columns, &fields)
            .and_then(|input| ActivityRecord::from_input(input, registry))
        {
            Ok(record) => parsed.records.push(record),
            Err(err) => {
                warn!(
                    target: "app::import",
                    line = line_no,
                    error = %err,
                    "skipping invalid csv row"
                );
                parsed.errors.push(ImportRowError {
                    line: line_no,
                    message: error_message(&err),
                });
            }
        }
    }

    debug!(
        target: "app::import",
        imported = parsed.records.len(),
        rejected = parsed.errors.len(),
        "csv parsed"
    );
    Ok(parsed)
}

/// Accepts `31-Jan-2025`, `31/01/2025` and `2025-01-31`.
pub fn parse_import_date(raw: &str) -> AppResult<NaiveDate> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| AppError::validation(format!("Unrecognized date: {trimmed}")))
}

/// Normalize any accepted date spelling to `YYYY-MM-DD`.
pub fn normalize_date(raw: &str) -> AppResult<String> {
    parse_import_date(raw).map(|date| date.format("%Y-%m-%d").to_string())
}

fn map_columns(header: &[String]) -> AppResult<HashMap<Column, usize>> {
    let mut columns = HashMap::new();
    for (idx, name) in header.iter().enumerate() {
        if let Some(column) = Column::from_header(name) {
            columns.entry(column).or_insert(idx);
        }
    }
    for required in [Column::Name, Column::Categories] {
        if !columns.contains_key(&required) {
            return Err(AppError::validation(format!(
                "CSV header is missing the {:?} column",
                required
            )));
        }
    }
    Ok(columns)
}

fn build_input(
    columns: &HashMap<Column, usize>,
    fields: &[String],
) -> AppResult<ActivityCreateInput> {
    let field = |column: Column| {
        columns
            .get(&column)
            .and_then(|idx| fields.get(*idx))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    };

    let name = field(Column::Name)
        .ok_or_else(|| AppError::validation("Task name cannot be empty"))?
        .to_string();
    let categories = split_categories(field(Column::Categories).unwrap_or_default());
    let points = match field(Column::Points) {
        Some(raw) => parse_points(raw, &categories)?,
        None => BTreeMap::new(),
    };
    let date = field(Column::Date).map(parse_import_date).transpose()?;
    let status = field(Column::Status).map(parse_status);
    let duration = field(Column::Duration)
        .map(|raw| {
            raw.parse::<i64>()
                .map_err(|_| AppError::validation(format!("Invalid duration: {raw}")))
        })
        .transpose()?;

    Ok(ActivityCreateInput {
        name,
        categories,
        points,
        date,
        status,
        description: field(Column::Description).map(str::to_string),
        duration,
        ..Default::default()
    })
}

fn split_categories(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ';' || c == '|')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

/// A bare integer applies to every category, otherwise `Category:points`
/// pairs separated by `;`, `|` or `,`.
fn parse_points(raw: &str, categories: &[String]) -> AppResult<BTreeMap<String, i64>> {
    if let Ok(value) = raw.parse::<i64>() {
        return Ok(categories
            .iter()
            .map(|category| (category.clone(), value))
            .collect());
    }

    let mut points = BTreeMap::new();
    for token in raw
        .split(|c: char| c == ';' || c == '|' || c == ',')
        .filter(|token| !token.trim().is_empty())
    {
        let captures = POINTS_PAIR_RE
            .captures(token)
            .ok_or_else(|| AppError::validation(format!("Invalid points entry: {}", token.trim())))?;
        let value = captures["points"]
            .parse::<i64>()
            .map_err(|_| AppError::validation(format!("Invalid points value: {}", token.trim())))?;
        points.insert(captures["category"].to_string(), value);
    }
    Ok(points)
}

fn parse_status(raw: &str) -> ActivityStatus {
    match raw.to_lowercase().as_str() {
        "completed" | "complete" | "done" | "true" | "yes" | "1" => ActivityStatus::Completed,
        _ => ActivityStatus::Pending,
    }
}

fn error_message(err: &AppError) -> String {
    match err {
        AppError::Validation { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Split one CSV line, honoring double-quoted fields and `""` escapes.
fn parse_csv_row(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                result.push(std::mem::take(&mut current_field));
            }
            _ => current_field.push(c),
        }
    }
    result.push(current_field);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::category::Category;

    #[test]
    fn all_date_spellings_normalize_to_iso() {
        for raw in ["31-Jan-2025", "31/01/2025", "2025-01-31", " 31-jan-2025 "] {
            assert_eq!(normalize_date(raw).unwrap(), "2025-01-31");
        }
        assert!(normalize_date("01/31/2025").is_err());
        assert!(normalize_date("yesterday").is_err());
    }

    #[test]
    fn quoted_fields_keep_commas() {
        let row = parse_csv_row(r#"Plan,"Work;Mind","Work:3, Mind:2","say ""hi"""#);
        assert_eq!(row[1], "Work;Mind");
        assert_eq!(row[2], "Work:3, Mind:2");
        assert_eq!(row[3], r#"say "hi""#);
    }

    #[test]
    fn single_points_value_applies_to_every_category() {
        let points = parse_points("2", &["Work".into(), "Mind".into()]).unwrap();
        assert_eq!(points.get("Work"), Some(&2));
        assert_eq!(points.get("Mind"), Some(&2));
        assert!(parse_points("Work=3", &["Work".into()]).is_err());
    }

    #[test]
    fn invalid_rows_are_reported_and_valid_rows_kept() {
        let registry = CategoryRegistry::default();
        let text = "\
Name,Categories,Points,Status,Date,Description,Duration
Run,Health,3,done,24-Aug-2025,,30
Paint,Art,2,pending,2025-08-24,,
Read,Mind|Spirit,\"Mind:2;Spirit:1\",pending,24/08/2025,chapter 3,
Journal,,1,pending,,,
";
        let parsed = parse_activities(text, &registry).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(
            parsed.errors.iter().map(|e| e.line).collect::<Vec<_>>(),
            vec![3, 5]
        );

        let run = &parsed.records[0];
        assert!(run.is_completed());
        assert_eq!(run.duration, Some(30));
        let read = &parsed.records[1];
        assert_eq!(read.points.get(&Category::new("Spirit").unwrap()), Some(1));
        assert_eq!(read.date, NaiveDate::from_ymd_opt(2025, 8, 24));
        assert_eq!(read.description.as_deref(), Some("chapter 3"));
    }

    #[test]
    fn header_must_name_required_columns() {
        let registry = CategoryRegistry::default();
        assert!(parse_activities("Title,Points\nRun,3", &registry).is_err());
        assert!(parse_activities("", &registry).is_err());
    }
}
