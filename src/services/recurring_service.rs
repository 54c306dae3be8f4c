use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::db::repositories::activity_repository::{ActivityRepository, ActivityRow};
use crate::db::repositories::expense_repository::{ExpenseRepository, ExpenseRow};
use crate::db::repositories::recurring_repository::{OverrideRow, RecurringRepository, RuleRow};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::activity::ActivityRecord;
use crate::models::category::CategoryRegistry;
use crate::models::recurring::{
    DeleteScope, EditScope, MaterializedOccurrence, OccurrenceOverride, RecurringRule,
    RecurringRuleInput, RuleOwner, RulePayload, TemplatePatch,
};
use crate::services::recurrence::{
    ExpansionConfig, RecurrenceExpander, RuleDeletion, ScopedEditOutcome,
};

/// Widest window accepted for listing or materializing occurrences.
pub const MAX_WINDOW_DAYS: i64 = 3_660;

/// Owned view of one occurrence with its override state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceEntry {
    pub rule_id: String,
    pub index: u32,
    pub date: NaiveDate,
    pub payload: RulePayload,
    pub completed: Option<bool>,
    pub skipped: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeReport {
    pub rule_id: String,
    pub records: Vec<MaterializedOccurrence>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDeletionReport {
    #[serde(flatten)]
    pub deletion: RuleDeletion,
    pub removed_activities: usize,
    pub removed_expenses: usize,
    pub removed_overrides: usize,
}

/// Recurring rules, their per-occurrence overrides and materialized instances.
#[derive(Clone)]
pub struct RecurringService {
    db: DbPool,
}

impl RecurringService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Create a rule or replace an active one with the same id.
    pub fn put(
        &self,
        input: RecurringRuleInput,
        registry: &CategoryRegistry,
    ) -> AppResult<RecurringRule> {
        let rule = RecurringRule::from_input(input, registry)?;
        let row = RuleRow::from_rule(&rule)?;

        self.db.with_transaction(|conn| {
            if let Some(existing) = RecurringRepository::find_by_id(conn, &rule.id)? {
                if !existing.into_rule()?.is_active() {
                    return Err(AppError::conflict(format!(
                        "recurring rule {} was deleted and cannot be replaced",
                        rule.id
                    )));
                }
            }
            RecurringRepository::upsert(conn, &row)
        })?;

        info!(
            target: "app::recurrence",
            rule_id = %rule.id,
            frequency = %rule.frequency,
            interval = rule.interval,
            "recurring rule saved"
        );
        Ok(rule)
    }

    pub fn get(&self, id: &str) -> AppResult<RecurringRule> {
        self.db
            .with_connection(|conn| RecurringRepository::find_by_id(conn, id))?
            .ok_or_else(AppError::not_found)?
            .into_rule()
    }

    pub fn list(&self, include_inactive: bool) -> AppResult<Vec<RecurringRule>> {
        let rows = self.db.with_connection(|conn| {
            if include_inactive {
                RecurringRepository::list_all(conn)
            } else {
                RecurringRepository::list_active(conn)
            }
        })?;
        rows.into_iter().map(|row| row.into_rule()).collect()
    }

    pub fn overrides(&self, rule_id: &str) -> AppResult<Vec<OccurrenceOverride>> {
        let rows = self
            .db
            .with_connection(|conn| RecurringRepository::list_overrides(conn, rule_id))?;
        rows.into_iter().map(|row| row.into_override()).collect()
    }

    pub fn edit(
        &self,
        rule_id: &str,
        patch: TemplatePatch,
        scope: EditScope,
        anchor_date: NaiveDate,
        registry: &CategoryRegistry,
    ) -> AppResult<ScopedEditOutcome> {
        self.db.with_transaction(|conn| {
            let mut rule = RecurringRepository::find_by_id(conn, rule_id)?
                .ok_or_else(AppError::not_found)?
                .into_rule()?;
            let existing = RecurringRepository::find_override(conn, rule_id, anchor_date)?
                .map(OverrideRow::into_override)
                .transpose()?;

            let outcome = RecurrenceExpander::apply_scoped_edit(
                &mut rule,
                patch,
                scope,
                anchor_date,
                existing,
                registry,
            )?;
            let refreshed = match &outcome {
                ScopedEditOutcome::Single { r#override } => {
                    RecurringRepository::upsert_override(
                        conn,
                        &OverrideRow::from_override(r#override)?,
                    )?;
                    refresh_stored_instance(
                        conn,
                        &rule,
                        std::slice::from_ref(r#override),
                        anchor_date,
                        registry,
                    )?
                }
                ScopedEditOutcome::Series { effective_from } => {
                    RecurringRepository::upsert(conn, &RuleRow::from_rule(&rule)?)?;
                    let overrides = RecurringRepository::list_overrides(conn, rule_id)?
                        .into_iter()
                        .map(OverrideRow::into_override)
                        .collect::<AppResult<Vec<_>>>()?;
                    let mut dates = stored_instance_dates(conn, rule_id)?;
                    dates.retain(|date| date >= effective_from);
                    let mut refreshed = 0;
                    for date in dates {
                        refreshed +=
                            refresh_stored_instance(conn, &rule, &overrides, date, registry)?;
                    }
                    refreshed
                }
            };
            info!(
                target: "app::recurrence",
                rule_id,
                anchor = %anchor_date,
                scope = ?scope,
                refreshed,
                "recurring rule edited"
            );
            Ok(outcome)
        })
    }

    /// Record completion of one occurrence, updating its materialized task
    /// when one exists.
    pub fn set_completion(
        &self,
        rule_id: &str,
        occurrence_date: NaiveDate,
        completed: bool,
    ) -> AppResult<OccurrenceOverride> {
        self.db.with_transaction(|conn| {
            let rule = RecurringRepository::find_by_id(conn, rule_id)?
                .ok_or_else(AppError::not_found)?
                .into_rule()?;
            let existing = RecurringRepository::find_override(conn, rule_id, occurrence_date)?
                .map(OverrideRow::into_override)
                .transpose()?;
            let record = RecurrenceExpander::set_occurrence_completion(
                &rule,
                occurrence_date,
                completed,
                existing,
            )?;
            RecurringRepository::upsert_override(conn, &OverrideRow::from_override(&record)?)?;

            let activity_id = format!("{rule_id}:{occurrence_date}");
            if let Some(row) = ActivityRepository::find_by_id(conn, &activity_id)? {
                let mut activity = row.into_record()?;
                if activity.is_completed() != completed {
                    activity.toggle_completion();
                    ActivityRepository::update(conn, &ActivityRow::from_record(&activity)?)?;
                }
            }
            Ok(record)
        })
    }

    /// Suppress one occurrence and drop its materialized instance, if any.
    pub fn skip_occurrence(
        &self,
        rule_id: &str,
        occurrence_date: NaiveDate,
    ) -> AppResult<OccurrenceOverride> {
        self.db.with_transaction(|conn| {
            let rule = RecurringRepository::find_by_id(conn, rule_id)?
                .ok_or_else(AppError::not_found)?
                .into_rule()?;
            if !RecurrenceExpander::is_occurrence(&rule, occurrence_date) {
                return Err(AppError::validation(format!(
                    "{occurrence_date} is not an occurrence of rule {rule_id}"
                )));
            }
            let mut record = RecurringRepository::find_override(conn, rule_id, occurrence_date)?
                .map(OverrideRow::into_override)
                .transpose()?
                .unwrap_or_else(|| OccurrenceOverride::new(rule_id, occurrence_date));
            record.skipped = true;
            record.updated_at = Utc::now();
            RecurringRepository::upsert_override(conn, &OverrideRow::from_override(&record)?)?;

            let instance_id = format!("{rule_id}:{occurrence_date}");
            if ActivityRepository::find_by_id(conn, &instance_id)?.is_some() {
                ActivityRepository::delete(conn, &instance_id)?;
            }
            Ok(record)
        })
    }

    pub fn occurrences(
        &self,
        rule_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        config: &ExpansionConfig,
    ) -> AppResult<Vec<OccurrenceEntry>> {
        ensure_window(from, to)?;
        let rule = self.get(rule_id)?;
        let overrides = self.overrides(rule_id)?;

        let entries: Vec<OccurrenceEntry> =
            RecurrenceExpander::occurrences_in_range(&rule, from, to, config)
                .map(|occurrence| {
                    let layer = overrides
                        .iter()
                        .find(|candidate| candidate.occurrence_date == occurrence.date);
                    OccurrenceEntry {
                        rule_id: rule.id.clone(),
                        index: occurrence.index,
                        date: occurrence.date,
                        payload: occurrence.payload.clone(),
                        completed: layer.and_then(|layer| layer.completed),
                        skipped: layer.map(|layer| layer.skipped).unwrap_or(false),
                    }
                })
                .collect();
        debug!(
            target: "app::recurrence",
            rule_id,
            count = entries.len(),
            "occurrences listed"
        );
        Ok(entries)
    }

    /// Produce and store concrete instances for the window. Re-running over
    /// the same window refreshes template fields and keeps completion state.
    pub fn materialize(
        &self,
        rule_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        registry: &CategoryRegistry,
        config: &ExpansionConfig,
    ) -> AppResult<MaterializeReport> {
        ensure_window(from, to)?;
        let rule = self.get(rule_id)?;
        let overrides = self.overrides(rule_id)?;
        let records =
            RecurrenceExpander::materialize(&rule, &overrides, from, to, registry, config)?;

        self.db.with_transaction(|conn| {
            for record in &records {
                match record {
                    MaterializedOccurrence::Task(activity) => {
                        ActivityRepository::upsert_materialized(
                            conn,
                            &ActivityRow::from_record(activity)?,
                        )?;
                    }
                    MaterializedOccurrence::Expense(expense) => {
                        ExpenseRepository::upsert(conn, &ExpenseRow::from_record(expense))?;
                    }
                }
            }
            Ok(())
        })?;

        info!(
            target: "app::recurrence",
            rule_id,
            from = %from,
            to = %to,
            count = records.len(),
            "occurrences materialized"
        );
        Ok(MaterializeReport {
            rule_id: rule.id,
            records,
        })
    }

    /// Unsaved task instances of every rule inside the window, overrides
    /// applied.
    pub fn project_activities(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        registry: &CategoryRegistry,
        config: &ExpansionConfig,
    ) -> AppResult<Vec<ActivityRecord>> {
        ensure_window(from, to)?;
        let mut projected = Vec::new();
        for rule in self.list(true)? {
            if rule.owner != RuleOwner::Task {
                continue;
            }
            let overrides = self.overrides(&rule.id)?;
            let records =
                RecurrenceExpander::materialize(&rule, &overrides, from, to, registry, config)?;
            projected.extend(
                records
                    .into_iter()
                    .filter_map(MaterializedOccurrence::into_activity),
            );
        }
        Ok(projected)
    }

    /// Unsaved task instances of every rule from its first occurrence through
    /// `horizon`, plus occurrences after `horizon` already marked complete.
    /// Each rule is expanded on its own, bounded only by the occurrence cap.
    pub fn project_through(
        &self,
        horizon: NaiveDate,
        registry: &CategoryRegistry,
        config: &ExpansionConfig,
    ) -> AppResult<Vec<ActivityRecord>> {
        let mut projected = Vec::new();
        for rule in self.list(true)? {
            if rule.owner != RuleOwner::Task {
                continue;
            }
            let overrides = self.overrides(&rule.id)?;
            let mut records = if rule.start_date <= horizon {
                RecurrenceExpander::materialize(
                    &rule,
                    &overrides,
                    rule.start_date,
                    horizon,
                    registry,
                    config,
                )?
            } else {
                Vec::new()
            };
            let completed_later = overrides.iter().filter(|layer| {
                layer.occurrence_date > horizon && layer.completed == Some(true) && !layer.skipped
            });
            for layer in completed_later {
                records.extend(RecurrenceExpander::materialize(
                    &rule,
                    &overrides,
                    layer.occurrence_date,
                    layer.occurrence_date,
                    registry,
                    config,
                )?);
            }
            projected.extend(
                records
                    .into_iter()
                    .filter_map(MaterializedOccurrence::into_activity),
            );
        }
        debug!(
            target: "app::recurrence",
            horizon = %horizon,
            count = projected.len(),
            "recurring instances projected"
        );
        Ok(projected)
    }

    /// Deactivate a rule from `as_of` on. With `IncludeMaterialized`, stored
    /// instances and overrides dated on or after `as_of` are removed as well.
    pub fn delete(
        &self,
        rule_id: &str,
        scope: DeleteScope,
        as_of: NaiveDate,
    ) -> AppResult<RuleDeletionReport> {
        self.db.with_transaction(|conn| {
            let mut rule = RecurringRepository::find_by_id(conn, rule_id)?
                .ok_or_else(AppError::not_found)?
                .into_rule()?;
            let deletion = RecurrenceExpander::delete_rule(&mut rule, scope, as_of)?;
            RecurringRepository::upsert(conn, &RuleRow::from_rule(&rule)?)?;

            let (removed_activities, removed_expenses, removed_overrides) = match deletion.purge_from {
                Some(from) => (
                    ActivityRepository::delete_materialized_from(conn, rule_id, from)?,
                    ExpenseRepository::delete_from(conn, rule_id, from)?,
                    RecurringRepository::delete_overrides_from(conn, rule_id, from)?,
                ),
                None => (0, 0, 0),
            };

            info!(
                target: "app::recurrence",
                rule_id,
                ended_on = %deletion.ended_on,
                removed_activities,
                removed_expenses,
                "recurring rule deleted"
            );
            Ok(RuleDeletionReport {
                deletion,
                removed_activities,
                removed_expenses,
                removed_overrides,
            })
        })
    }
}

/// Rebuild the stored instance of one occurrence, if it was materialized,
/// from the current template and overrides. Completion state is kept.
fn refresh_stored_instance(
    conn: &Connection,
    rule: &RecurringRule,
    overrides: &[OccurrenceOverride],
    date: NaiveDate,
    registry: &CategoryRegistry,
) -> AppResult<usize> {
    let records = RecurrenceExpander::materialize(
        rule,
        overrides,
        date,
        date,
        registry,
        &ExpansionConfig::default(),
    )?;
    let mut refreshed = 0;
    for record in records {
        match record {
            MaterializedOccurrence::Task(activity) => {
                if ActivityRepository::find_by_id(conn, &activity.id)?.is_some() {
                    ActivityRepository::upsert_materialized(
                        conn,
                        &ActivityRow::from_record(&activity)?,
                    )?;
                    refreshed += 1;
                }
            }
            MaterializedOccurrence::Expense(expense) => {
                if ExpenseRepository::find_by_id(conn, &expense.id)?.is_some() {
                    ExpenseRepository::upsert(conn, &ExpenseRow::from_record(&expense))?;
                    refreshed += 1;
                }
            }
        }
    }
    Ok(refreshed)
}

fn stored_instance_dates(conn: &Connection, rule_id: &str) -> AppResult<Vec<NaiveDate>> {
    let mut dates = Vec::new();
    for row in ActivityRepository::list_by_rule(conn, rule_id)? {
        if let Some(link) = row.into_record()?.recurrence {
            dates.push(link.occurrence_date);
        }
    }
    for row in ExpenseRepository::list_by_rule(conn, rule_id)? {
        dates.push(row.into_record()?.date);
    }
    dates.sort_unstable();
    dates.dedup();
    Ok(dates)
}

fn ensure_window(from: NaiveDate, to: NaiveDate) -> AppResult<()> {
    if from > to {
        return Err(AppError::validation(format!(
            "Range start {from} is after its end {to}"
        )));
    }
    if (to - from).num_days() >= MAX_WINDOW_DAYS {
        return Err(AppError::validation(format!(
            "Range cannot exceed {MAX_WINDOW_DAYS} days"
        )));
    }
    Ok(())
}
