use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::commands::{run_blocking, AppState, CommandResult};
use crate::error::AppError;
use crate::models::recurring::{
    DeleteScope, EditScope, OccurrenceOverride, RecurringRule, RecurringRuleInput, TemplatePatch,
};
use crate::services::recurrence::ScopedEditOutcome;
use crate::services::recurring_service::{
    MaterializeReport, OccurrenceEntry, RuleDeletionReport,
};

/// Body of an occurrence edit.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringEditInput {
    pub scope: EditScope,
    pub anchor_date: NaiveDate,
    #[serde(default)]
    pub patch: TemplatePatch,
    /// Completion flag for a single occurrence; only valid with `single`.
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub skip: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringDeleteInput {
    #[serde(default = "default_delete_scope")]
    pub scope: DeleteScope,
    /// First day without occurrences; defaults to today (UTC).
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

fn default_delete_scope() -> DeleteScope {
    DeleteScope::FutureOnly
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecurringListFilter {
    pub include_inactive: bool,
}

/// Create a rule, or replace the active rule carrying the same id.
pub async fn recurring_put(
    state: &AppState,
    payload: RecurringRuleInput,
) -> CommandResult<RecurringRule> {
    let state = state.clone();
    run_blocking(move || {
        let registry = state.settings().registry()?;
        state.recurring().put(payload, &registry)
    })
    .await
}

pub async fn recurring_get(state: &AppState, id: String) -> CommandResult<RecurringRule> {
    let state = state.clone();
    run_blocking(move || state.recurring().get(&id)).await
}

pub async fn recurring_list(
    state: &AppState,
    filter: Option<RecurringListFilter>,
) -> CommandResult<Vec<RecurringRule>> {
    let state = state.clone();
    let filter = filter.unwrap_or_default();
    run_blocking(move || state.recurring().list(filter.include_inactive)).await
}

pub async fn recurring_delete(
    state: &AppState,
    id: String,
    payload: RecurringDeleteInput,
) -> CommandResult<RuleDeletionReport> {
    let state = state.clone();
    let as_of = payload.as_of.unwrap_or_else(|| Utc::now().date_naive());
    run_blocking(move || state.recurring().delete(&id, payload.scope, as_of)).await
}

/// Apply an edit to one occurrence or to the series from the anchor on.
/// Completion and skip requests only make sense for a single occurrence.
pub async fn recurring_edit(
    state: &AppState,
    id: String,
    payload: RecurringEditInput,
) -> CommandResult<ScopedEditOutcome> {
    let state = state.clone();
    run_blocking(move || {
        let service = state.recurring();
        if payload.scope == EditScope::Series && (payload.completed.is_some() || payload.skip) {
            return Err(AppError::validation(
                "Completion and skip apply to a single occurrence only",
            ));
        }
        if payload.skip {
            let record = service.skip_occurrence(&id, payload.anchor_date)?;
            return Ok(ScopedEditOutcome::Single { r#override: record });
        }

        let mut last: Option<OccurrenceOverride> = None;
        if !payload.patch.is_empty() {
            let registry = state.settings().registry()?;
            let outcome = service.edit(
                &id,
                payload.patch,
                payload.scope,
                payload.anchor_date,
                &registry,
            )?;
            match outcome {
                ScopedEditOutcome::Single { r#override } => last = Some(r#override),
                series => return Ok(series),
            }
        }
        if let Some(completed) = payload.completed {
            last = Some(service.set_completion(&id, payload.anchor_date, completed)?);
        }
        last.map(|record| ScopedEditOutcome::Single { r#override: record })
            .ok_or_else(|| AppError::validation("Edit contains no changes"))
    })
    .await
}

pub async fn recurring_occurrences(
    state: &AppState,
    id: String,
    window: OccurrenceWindow,
) -> CommandResult<Vec<OccurrenceEntry>> {
    let state = state.clone();
    run_blocking(move || {
        let config = state.settings().expansion_config()?;
        state
            .recurring()
            .occurrences(&id, window.from, window.to, &config)
    })
    .await
}

pub async fn recurring_materialize(
    state: &AppState,
    id: String,
    window: OccurrenceWindow,
) -> CommandResult<MaterializeReport> {
    let state = state.clone();
    run_blocking(move || {
        let settings = state.settings();
        let registry = settings.registry()?;
        let config = settings.expansion_config()?;
        state
            .recurring()
            .materialize(&id, window.from, window.to, &registry, &config)
    })
    .await
}
