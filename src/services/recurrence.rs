use chrono::{Datelike, Days, Months, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::models::activity::{ActivityRecord, Completion, RecurrenceLink};
use crate::models::category::CategoryRegistry;
use crate::models::recurring::{
    DeleteScope, EditScope, ExpenseRecord, Frequency, MaterializedOccurrence,
    OccurrenceOverride, RecurringRule, RulePayload, RuleState, TemplatePatch, TemplateSegment,
};

/// Configuration for occurrence expansion
#[derive(Debug, Clone, Copy)]
pub struct ExpansionConfig {
    /// Hard ceiling on the number of steps a single expansion may walk
    pub max_iterations: u32,
}

pub const DEFAULT_MAX_ITERATIONS: u32 = 10_000;

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// One concrete date produced by a rule, with the template in force that day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence<'a> {
    pub rule_id: &'a str,
    pub index: u32,
    pub date: NaiveDate,
    pub payload: &'a RulePayload,
}

/// Lazy walk over a rule's occurrences inside a window. Cloning restarts
/// from the same position.
#[derive(Debug, Clone)]
pub struct Occurrences<'a> {
    rule: &'a RecurringRule,
    next_index: u32,
    range_start: NaiveDate,
    last_date: Option<NaiveDate>,
    walked: u32,
    max_iterations: u32,
    exhausted: bool,
}

impl<'a> Iterator for Occurrences<'a> {
    type Item = Occurrence<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.exhausted {
                return None;
            }
            let last_date = match self.last_date {
                Some(date) => date,
                None => {
                    self.exhausted = true;
                    return None;
                }
            };
            if self.walked >= self.max_iterations {
                warn!(
                    target: "app::recurrence",
                    rule_id = %self.rule.id,
                    cap = self.max_iterations,
                    "occurrence expansion hit the iteration cap"
                );
                self.exhausted = true;
                return None;
            }
            self.walked += 1;

            let index = self.next_index;
            let date = match RecurrenceExpander::nth_date(self.rule, index) {
                Some(date) => date,
                None => {
                    self.exhausted = true;
                    return None;
                }
            };
            self.next_index = match index.checked_add(1) {
                Some(next) => next,
                None => {
                    self.exhausted = true;
                    index
                }
            };

            if date > last_date {
                self.exhausted = true;
                return None;
            }
            if date < self.range_start {
                continue;
            }
            return Some(Occurrence {
                rule_id: &self.rule.id,
                index,
                date,
                payload: self.rule.template_on(date),
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum ScopedEditOutcome {
    /// A standalone override for one occurrence; the rule is untouched.
    Single { r#override: OccurrenceOverride },
    /// The rule template changed for occurrences on or after `effective_from`.
    Series {
        #[serde(rename = "effectiveFrom")]
        effective_from: NaiveDate,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDeletion {
    pub rule_id: String,
    pub ended_on: NaiveDate,
    /// Materialized instances dated on or after this day must be removed.
    pub purge_from: Option<NaiveDate>,
}

/// Expands recurring rules into dated occurrences and applies scoped edits.
pub struct RecurrenceExpander;

impl RecurrenceExpander {
    pub fn occurrences_in_range<'a>(
        rule: &'a RecurringRule,
        range_start: NaiveDate,
        range_end: NaiveDate,
        config: &ExpansionConfig,
    ) -> Occurrences<'a> {
        let last_date = match rule.generation_end() {
            Some(end) => Some(end.min(range_end)),
            None => Some(range_end),
        }
        .filter(|last| *last >= range_start && *last >= rule.start_date);

        Occurrences {
            rule,
            next_index: Self::first_candidate_index(rule, range_start),
            range_start,
            last_date,
            walked: 0,
            max_iterations: config.max_iterations,
            exhausted: false,
        }
    }

    /// Date of the `index`-th occurrence, always computed from the anchor so
    /// monthly clamping never drifts (Jan 31, Feb 28, Mar 31, ...).
    pub fn nth_date(rule: &RecurringRule, index: u32) -> Option<NaiveDate> {
        let steps = index.checked_mul(rule.interval)?;
        match rule.frequency {
            Frequency::Daily => rule.start_date.checked_add_days(Days::new(steps as u64)),
            Frequency::Weekly => rule
                .start_date
                .checked_add_days(Days::new(steps as u64 * 7)),
            Frequency::Monthly => rule.start_date.checked_add_months(Months::new(steps)),
        }
    }

    /// Whether `date` is produced by the rule. Computed from the anchor, so
    /// it holds for dates beyond any expansion cap.
    pub fn is_occurrence(rule: &RecurringRule, date: NaiveDate) -> bool {
        if date < rule.start_date || rule.generation_end().is_some_and(|end| date > end) {
            return false;
        }
        // Monthly candidates start one step early; two steps past it is
        // always beyond `date`.
        let first = Self::first_candidate_index(rule, date);
        (first..=first.saturating_add(2))
            .filter_map(|index| Self::nth_date(rule, index))
            .any(|candidate| candidate == date)
    }

    fn first_candidate_index(rule: &RecurringRule, range_start: NaiveDate) -> u32 {
        if range_start <= rule.start_date || rule.interval == 0 {
            return 0;
        }
        let interval = rule.interval as i64;
        let index = match rule.frequency {
            Frequency::Daily | Frequency::Weekly => {
                let step_days = if rule.frequency == Frequency::Weekly {
                    interval * 7
                } else {
                    interval
                };
                let elapsed = (range_start - rule.start_date).num_days();
                (elapsed + step_days - 1) / step_days
            }
            Frequency::Monthly => {
                let months = (range_start.year() - rule.start_date.year()) as i64 * 12
                    + range_start.month() as i64
                    - rule.start_date.month() as i64;
                // Clamped month ends can land a step early, so back off one.
                (months / interval - 1).max(0)
            }
        };
        u32::try_from(index).unwrap_or(u32::MAX)
    }

    pub fn apply_scoped_edit(
        rule: &mut RecurringRule,
        patch: TemplatePatch,
        scope: EditScope,
        anchor_date: NaiveDate,
        existing: Option<OccurrenceOverride>,
        registry: &CategoryRegistry,
    ) -> AppResult<ScopedEditOutcome> {
        if !rule.is_active() {
            return Err(AppError::invalid_transition("inactive", "edited"));
        }
        if !Self::is_occurrence(rule, anchor_date) {
            return Err(AppError::validation(format!(
                "{anchor_date} is not an occurrence of rule {}",
                rule.id
            )));
        }

        match scope {
            EditScope::Single => {
                // Reject patches that would not produce a valid instance.
                rule.template_on(anchor_date).patched(&patch, registry)?;
                let mut record = existing
                    .filter(|existing| {
                        existing.rule_id == rule.id && existing.occurrence_date == anchor_date
                    })
                    .unwrap_or_else(|| OccurrenceOverride::new(&rule.id, anchor_date));
                record.merge_patch(patch);
                debug!(
                    target: "app::recurrence",
                    rule_id = %rule.id,
                    date = %anchor_date,
                    "single occurrence override recorded"
                );
                Ok(ScopedEditOutcome::Single { r#override: record })
            }
            EditScope::Series => {
                if patch.is_empty() {
                    return Err(AppError::validation("Series edit contains no changes"));
                }
                let next = rule.template_on(anchor_date).patched(&patch, registry)?;
                if anchor_date == rule.start_date {
                    rule.data = next;
                    rule.segments.clear();
                } else {
                    rule.segments
                        .retain(|segment| segment.effective_from < anchor_date);
                    rule.segments.push(TemplateSegment {
                        effective_from: anchor_date,
                        data: next,
                    });
                }
                debug!(
                    target: "app::recurrence",
                    rule_id = %rule.id,
                    effective_from = %anchor_date,
                    segments = rule.segments.len(),
                    "series template updated"
                );
                Ok(ScopedEditOutcome::Series {
                    effective_from: anchor_date,
                })
            }
        }
    }

    /// Mark a single occurrence done or not done through the override layer.
    pub fn set_occurrence_completion(
        rule: &RecurringRule,
        occurrence_date: NaiveDate,
        completed: bool,
        existing: Option<OccurrenceOverride>,
    ) -> AppResult<OccurrenceOverride> {
        if !Self::is_occurrence(rule, occurrence_date) {
            return Err(AppError::validation(format!(
                "{occurrence_date} is not an occurrence of rule {}",
                rule.id
            )));
        }
        let mut record = existing
            .unwrap_or_else(|| OccurrenceOverride::new(&rule.id, occurrence_date));
        record.completed = Some(completed);
        record.updated_at = chrono::Utc::now();
        Ok(record)
    }

    /// Turn occurrences into concrete records, applying per-instance overrides.
    pub fn materialize(
        rule: &RecurringRule,
        overrides: &[OccurrenceOverride],
        range_start: NaiveDate,
        range_end: NaiveDate,
        registry: &CategoryRegistry,
        config: &ExpansionConfig,
    ) -> AppResult<Vec<MaterializedOccurrence>> {
        let mut records = Vec::new();
        for occurrence in Self::occurrences_in_range(rule, range_start, range_end, config) {
            let layer = overrides.iter().find(|candidate| {
                candidate.rule_id == rule.id && candidate.occurrence_date == occurrence.date
            });
            if layer.map(|layer| layer.skipped).unwrap_or(false) {
                continue;
            }

            let payload = match layer {
                Some(layer) if !layer.patch.is_empty() => {
                    occurrence.payload.patched(&layer.patch, registry)?
                }
                _ => occurrence.payload.clone(),
            };
            let completed = layer.and_then(|layer| layer.completed).unwrap_or(false);
            let id = format!("{}:{}", rule.id, occurrence.date);

            let record = match payload {
                RulePayload::Task(template) => MaterializedOccurrence::Task(ActivityRecord {
                    id,
                    name: template.name,
                    categories: template.categories,
                    points: template.points,
                    date: Some(occurrence.date),
                    completion: Completion::Binary { completed },
                    recurrence: Some(RecurrenceLink {
                        rule_id: rule.id.clone(),
                        occurrence_date: occurrence.date,
                    }),
                    description: template.description,
                    duration: template.duration,
                }),
                RulePayload::Expense(template) => MaterializedOccurrence::Expense(ExpenseRecord {
                    id,
                    amount: template.amount,
                    category: template.category,
                    date: occurrence.date,
                    description: template.description,
                    rule_id: rule.id.clone(),
                }),
            };
            records.push(record);
        }
        debug!(
            target: "app::recurrence",
            rule_id = %rule.id,
            count = records.len(),
            "materialized occurrences"
        );
        Ok(records)
    }

    /// Deactivate a rule from `as_of` on. Occurrences before `as_of` are kept.
    pub fn delete_rule(
        rule: &mut RecurringRule,
        scope: DeleteScope,
        as_of: NaiveDate,
    ) -> AppResult<RuleDeletion> {
        if !rule.is_active() {
            return Err(AppError::invalid_transition("inactive", "inactive"));
        }
        let ended_on = as_of
            .pred_opt()
            .ok_or_else(|| AppError::validation("Deletion date is out of range"))?;
        let purge = scope == DeleteScope::IncludeMaterialized;
        rule.state = RuleState::Inactive {
            ended_on,
            purged: purge,
        };
        Ok(RuleDeletion {
            rule_id: rule.id.clone(),
            ended_on,
            purge_from: purge.then_some(as_of),
        })
    }
}
