use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::activity::{validate_category_selection, validate_points, ActivityRecord};
use crate::models::category::{Category, CategoryKind, CategoryRegistry};
use crate::models::points::PointsMap;

pub const MAX_INTERVAL: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for Frequency {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(AppError::validation(format!("Invalid frequency: {s}"))),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOwner {
    Task,
    Expense,
}

impl RuleOwner {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOwner::Task => "task",
            RuleOwner::Expense => "expense",
        }
    }
}

impl FromStr for RuleOwner {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(RuleOwner::Task),
            "expense" => Ok(RuleOwner::Expense),
            _ => Err(AppError::validation(format!("Invalid rule owner: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTemplate {
    pub name: String,
    pub categories: Vec<Category>,
    #[serde(default)]
    pub points: PointsMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseTemplate {
    pub amount: f64,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Per-occurrence template carried by a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RulePayload {
    Task(TaskTemplate),
    Expense(ExpenseTemplate),
}

impl RulePayload {
    pub fn owner(&self) -> RuleOwner {
        match self {
            RulePayload::Task(_) => RuleOwner::Task,
            RulePayload::Expense(_) => RuleOwner::Expense,
        }
    }

    /// Validate and rewrite category names to their registered spelling.
    pub fn canonicalize(self, registry: &CategoryRegistry) -> AppResult<Self> {
        match self {
            RulePayload::Task(mut template) => {
                if template.name.trim().is_empty() {
                    return Err(AppError::validation("Recurring task name cannot be empty"));
                }
                template.name = template.name.trim().to_string();
                template.categories =
                    registry.resolve_all(CategoryKind::Task, &template.categories)?;
                let mut points = PointsMap::new();
                for (category, value) in template.points.iter() {
                    points.insert(registry.resolve(CategoryKind::Task, category.as_str())?, value);
                }
                template.points = points;
                validate_category_selection(&template.categories)?;
                validate_points(&template.categories, &template.points)?;
                if matches!(template.duration, Some(duration) if duration < 0) {
                    return Err(AppError::validation("Duration cannot be negative"));
                }
                Ok(RulePayload::Task(template))
            }
            RulePayload::Expense(mut template) => {
                if !template.amount.is_finite() || template.amount < 0.0 {
                    return Err(AppError::validation(
                        "Expense amount must be a non-negative number",
                    ));
                }
                template.category =
                    registry.resolve(CategoryKind::Expense, template.category.as_str())?;
                Ok(RulePayload::Expense(template))
            }
        }
    }

    /// Produce a new payload with the edited fields applied.
    pub fn patched(&self, patch: &TemplatePatch, registry: &CategoryRegistry) -> AppResult<Self> {
        let next = match self {
            RulePayload::Task(template) => {
                if patch.amount.is_some() || patch.category.is_some() {
                    return Err(AppError::validation(
                        "Expense fields cannot be edited on a recurring task",
                    ));
                }
                let mut template = template.clone();
                if let Some(name) = &patch.name {
                    template.name = name.clone();
                }
                if let Some(categories) = &patch.categories {
                    template.categories = categories
                        .iter()
                        .map(|raw| Category::new(raw))
                        .collect::<AppResult<Vec<_>>>()?;
                    let kept: PointsMap = template
                        .points
                        .iter()
                        .filter(|(category, _)| template.categories.contains(category))
                        .map(|(category, value)| (category.clone(), value))
                        .collect();
                    template.points = kept;
                }
                if let Some(points) = &patch.points {
                    let mut map = PointsMap::new();
                    for (raw, value) in points {
                        map.insert(Category::new(raw)?, *value);
                    }
                    template.points = map;
                }
                if let Some(duration) = patch.duration {
                    template.duration = duration;
                }
                if let Some(description) = &patch.description {
                    template.description = description.clone();
                }
                RulePayload::Task(template)
            }
            RulePayload::Expense(template) => {
                if patch.name.is_some() || patch.categories.is_some() || patch.points.is_some() {
                    return Err(AppError::validation(
                        "Task fields cannot be edited on a recurring expense",
                    ));
                }
                let mut template = template.clone();
                if let Some(amount) = patch.amount {
                    template.amount = amount;
                }
                if let Some(category) = &patch.category {
                    template.category = Category::new(category)?;
                }
                if let Some(description) = &patch.description {
                    template.description = description.clone();
                }
                RulePayload::Expense(template)
            }
        };
        next.canonicalize(registry)
    }
}

/// Fields a user may edit on a rule template or a single occurrence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<BTreeMap<String, i64>>,
    /// `null` clears the field, absence leaves it alone.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::models::double_option"
    )]
    pub duration: Option<Option<i64>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::models::double_option"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl TemplatePatch {
    pub fn is_empty(&self) -> bool {
        *self == TemplatePatch::default()
    }
}

/// Template version in force from `effective_from` onwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSegment {
    pub effective_from: NaiveDate,
    pub data: RulePayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RuleState {
    #[default]
    Active,
    Inactive {
        #[serde(rename = "endedOn")]
        ended_on: NaiveDate,
        purged: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringRule {
    pub id: String,
    pub owner: RuleOwner,
    pub frequency: Frequency,
    pub interval: u32,
    pub start_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub data: RulePayload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<TemplateSegment>,
    #[serde(default)]
    pub state: RuleState,
}

impl RecurringRule {
    pub fn from_input(input: RecurringRuleInput, registry: &CategoryRegistry) -> AppResult<Self> {
        let data = input.data.canonicalize(registry)?;
        let owner = input.owner.unwrap_or_else(|| data.owner());
        let rule = Self {
            id: input
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            owner,
            frequency: input.frequency,
            interval: input.interval.unwrap_or(1),
            start_date: input.start_date,
            end_date: input.end_date,
            data,
            segments: Vec::new(),
            state: RuleState::Active,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Schedule checks. Runaway intervals are rejected here rather than
    /// discovered during expansion.
    pub fn validate(&self) -> AppResult<()> {
        if self.interval == 0 {
            return Err(AppError::validation("Interval must be greater than 0"));
        }
        if self.interval > MAX_INTERVAL {
            return Err(AppError::validation(format!(
                "Interval must be at most {MAX_INTERVAL}"
            )));
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(AppError::validation(
                    "Recurrence end date must not be before its start date",
                ));
            }
        }
        if self.owner != self.data.owner() {
            return Err(AppError::validation(
                "Recurring rule owner does not match its template",
            ));
        }
        for segment in &self.segments {
            if segment.data.owner() != self.owner {
                return Err(AppError::validation(
                    "Template segment owner does not match the rule",
                ));
            }
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, RuleState::Active)
    }

    /// Last date on which occurrences may be produced.
    pub fn generation_end(&self) -> Option<NaiveDate> {
        let ended_on = match self.state {
            RuleState::Active => None,
            RuleState::Inactive { ended_on, .. } => Some(ended_on),
        };
        match (self.end_date, ended_on) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Template governing the occurrence on `date`.
    pub fn template_on(&self, date: NaiveDate) -> &RulePayload {
        self.segments
            .iter()
            .rev()
            .find(|segment| segment.effective_from <= date)
            .map(|segment| &segment.data)
            .unwrap_or(&self.data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringRuleInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub owner: Option<RuleOwner>,
    pub frequency: Frequency,
    #[serde(default)]
    pub interval: Option<u32>,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub data: RulePayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditScope {
    Single,
    Series,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteScope {
    /// Stop producing occurrences from the cut-off date on.
    FutureOnly,
    /// Also remove future-dated instances that were already materialized.
    IncludeMaterialized,
}

/// Per-instance override layered on top of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceOverride {
    pub rule_id: String,
    pub occurrence_date: NaiveDate,
    #[serde(default)]
    pub patch: TemplatePatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default)]
    pub skipped: bool,
    pub updated_at: DateTime<Utc>,
}

impl OccurrenceOverride {
    pub fn new(rule_id: &str, occurrence_date: NaiveDate) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            occurrence_date,
            patch: TemplatePatch::default(),
            completed: None,
            skipped: false,
            updated_at: Utc::now(),
        }
    }

    /// Layer another patch on top of this one, later fields win.
    pub fn merge_patch(&mut self, patch: TemplatePatch) {
        let current = &mut self.patch;
        if patch.name.is_some() {
            current.name = patch.name;
        }
        if patch.categories.is_some() {
            current.categories = patch.categories;
        }
        if patch.points.is_some() {
            current.points = patch.points;
        }
        if patch.duration.is_some() {
            current.duration = patch.duration;
        }
        if patch.description.is_some() {
            current.description = patch.description;
        }
        if patch.amount.is_some() {
            current.amount = patch.amount;
        }
        if patch.category.is_some() {
            current.category = patch.category;
        }
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseRecord {
    pub id: String,
    pub amount: f64,
    pub category: Category,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub rule_id: String,
}

/// Concrete record produced from one occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "owner", content = "record", rename_all = "lowercase")]
pub enum MaterializedOccurrence {
    Task(ActivityRecord),
    Expense(ExpenseRecord),
}

impl MaterializedOccurrence {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            MaterializedOccurrence::Task(record) => record.date,
            MaterializedOccurrence::Expense(record) => Some(record.date),
        }
    }

    pub fn into_activity(self) -> Option<ActivityRecord> {
        match self {
            MaterializedOccurrence::Task(record) => Some(record),
            MaterializedOccurrence::Expense(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_rule_json() -> &'static str {
        r#"{
            "id": "rule-1",
            "owner": "task",
            "frequency": "weekly",
            "interval": 2,
            "startDate": "2025-08-24",
            "endDate": "2025-12-31",
            "data": {
                "name": "Long run",
                "categories": ["Health", "Strength"],
                "points": {"Health": 2, "Strength": 3},
                "duration": 60
            }
        }"#
    }

    #[test]
    fn rule_survives_json_boundary() {
        let rule: RecurringRule = serde_json::from_str(task_rule_json()).unwrap();
        assert_eq!(rule.owner, RuleOwner::Task);
        assert!(rule.is_active());
        let encoded = serde_json::to_string(&rule).unwrap();
        let decoded: RecurringRule = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, rule);
    }

    #[test]
    fn untagged_payload_distinguishes_expenses() {
        let json = r#"{"amount": 12.5, "category": "Food"}"#;
        let payload: RulePayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.owner(), RuleOwner::Expense);
    }

    #[test]
    fn zero_interval_is_rejected_at_creation() {
        let registry = CategoryRegistry::default();
        let mut input: RecurringRuleInput = serde_json::from_str(task_rule_json()).unwrap();
        input.interval = Some(0);
        assert!(RecurringRule::from_input(input, &registry).is_err());
    }

    #[test]
    fn end_before_start_is_rejected() {
        let registry = CategoryRegistry::default();
        let mut input: RecurringRuleInput = serde_json::from_str(task_rule_json()).unwrap();
        input.end_date = NaiveDate::from_ymd_opt(2025, 8, 1);
        assert!(RecurringRule::from_input(input, &registry).is_err());
    }

    #[test]
    fn patching_task_with_expense_fields_fails() {
        let registry = CategoryRegistry::default();
        let rule: RecurringRule = serde_json::from_str(task_rule_json()).unwrap();
        let patch = TemplatePatch {
            amount: Some(3.0),
            ..Default::default()
        };
        assert!(rule.data.patched(&patch, &registry).is_err());
    }

    #[test]
    fn narrowing_categories_drops_orphaned_points() {
        let registry = CategoryRegistry::default();
        let rule: RecurringRule = serde_json::from_str(task_rule_json()).unwrap();
        let patch = TemplatePatch {
            categories: Some(vec!["health".into()]),
            ..Default::default()
        };
        let RulePayload::Task(template) = rule.data.patched(&patch, &registry).unwrap() else {
            panic!("expected task payload");
        };
        assert_eq!(template.categories.len(), 1);
        assert_eq!(template.points.len(), 1);
        assert_eq!(template.categories[0].as_str(), "Health");
    }

    #[test]
    fn generation_end_is_earliest_cutoff() {
        let mut rule: RecurringRule = serde_json::from_str(task_rule_json()).unwrap();
        let ended = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        rule.state = RuleState::Inactive {
            ended_on: ended,
            purged: false,
        };
        assert_eq!(rule.generation_end(), Some(ended));
    }

    #[test]
    fn explicit_null_in_patch_means_clear() {
        let patch: TemplatePatch =
            serde_json::from_str(r#"{"description": null, "name": "Walk"}"#).unwrap();
        assert_eq!(patch.description, Some(None));
        assert_eq!(patch.duration, None);

        let stored = serde_json::to_string(&patch).unwrap();
        let reloaded: TemplatePatch = serde_json::from_str(&stored).unwrap();
        assert_eq!(reloaded, patch);
    }
}
