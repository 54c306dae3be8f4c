use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

use crate::error::AppError;
use crate::models::activity::{ActivityCreateInput, ActivityRecord, ActivityStatus};
use crate::services::activity_service::CsvImportReport;

use super::{run_blocking, AppState, CommandResult};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskListFilters {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<ActivityStatus>,
    pub category: Option<String>,
    /// Only undated (long-term) tasks.
    pub long_term: Option<bool>,
}

pub async fn tasks_list(
    state: &AppState,
    filters: Option<TaskListFilters>,
) -> CommandResult<Vec<ActivityRecord>> {
    let state = state.clone();
    let filters = filters.unwrap_or_default();

    run_blocking(move || {
        let service = state.activities();
        let records = match (filters.from, filters.to) {
            (Some(from), Some(to)) => {
                if from > to {
                    return Err(AppError::validation(format!(
                        "Range start {from} is after its end {to}"
                    )));
                }
                service.list_between(from, to)?
            }
            _ => service.list()?,
        };
        let filtered = apply_filters(records, &filters);
        debug!(target: "app::command", count = filtered.len(), "tasks listed");
        Ok(filtered)
    })
    .await
}

pub async fn tasks_create(
    state: &AppState,
    payload: ActivityCreateInput,
) -> CommandResult<ActivityRecord> {
    let state = state.clone();
    run_blocking(move || {
        let registry = state.settings().registry()?;
        state.activities().create(payload, &registry)
    })
    .await
}

pub async fn tasks_toggle(state: &AppState, id: String) -> CommandResult<ActivityRecord> {
    let state = state.clone();
    run_blocking(move || state.activities().toggle(&id)).await
}

pub async fn tasks_set_progress(
    state: &AppState,
    id: String,
    value: f64,
) -> CommandResult<ActivityRecord> {
    let state = state.clone();
    run_blocking(move || state.activities().set_progress(&id, value)).await
}

/// Delete a task. A materialized recurring instance is skipped instead, so
/// the occurrence does not come back from its rule.
pub async fn tasks_delete(state: &AppState, id: String) -> CommandResult<()> {
    let state = state.clone();
    run_blocking(move || match state.activities().get(&id)?.recurrence {
        Some(link) => {
            state
                .recurring()
                .skip_occurrence(&link.rule_id, link.occurrence_date)?;
            debug!(
                target: "app::command",
                rule_id = %link.rule_id,
                date = %link.occurrence_date,
                "recurring instance deleted as a skip"
            );
            Ok(())
        }
        None => state.activities().delete(&id),
    })
    .await
}

pub async fn tasks_import_csv(state: &AppState, text: String) -> CommandResult<CsvImportReport> {
    let state = state.clone();
    run_blocking(move || {
        let registry = state.settings().registry()?;
        state.activities().import_csv(&text, &registry)
    })
    .await
}

fn apply_filters(records: Vec<ActivityRecord>, filters: &TaskListFilters) -> Vec<ActivityRecord> {
    let category = filters
        .category
        .as_deref()
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty());

    records
        .into_iter()
        .filter(|record| {
            filters
                .status
                .map_or(true, |status| record.status() == status)
        })
        .filter(|record| {
            filters
                .long_term
                .map_or(true, |long_term| record.is_long_term() == long_term)
        })
        .filter(|record| {
            category.as_deref().map_or(true, |wanted| {
                record
                    .categories
                    .iter()
                    .any(|category| category.as_str().to_lowercase() == wanted)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::activity::Completion;
    use crate::models::category::Category;

    fn record(id: &str, category: &str, date: Option<NaiveDate>, completed: bool) -> ActivityRecord {
        let category = Category::new(category).unwrap();
        ActivityRecord {
            id: id.into(),
            name: id.into(),
            categories: vec![category.clone()],
            points: [(category, 1)].into_iter().collect(),
            date,
            completion: Completion::Binary { completed },
            recurrence: None,
            description: None,
            duration: None,
        }
    }

    #[test]
    fn filters_combine() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 1);
        let records = vec![
            record("a", "Work", day, true),
            record("b", "Work", None, false),
            record("c", "Mind", day, false),
        ];
        let filters = TaskListFilters {
            category: Some("work".into()),
            status: Some(ActivityStatus::Pending),
            ..Default::default()
        };
        let ids: Vec<_> = apply_filters(records.clone(), &filters)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["b"]);

        let long_term = TaskListFilters {
            long_term: Some(false),
            ..Default::default()
        };
        assert_eq!(apply_filters(records, &long_term).len(), 2);
    }
}
