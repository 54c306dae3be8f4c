use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::category::{Category, CategoryKind, CategoryRegistry};
use crate::models::points::PointsMap;

pub const MAX_ACTIVITY_CATEGORIES: usize = 5;
const MAX_NAME_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Completed,
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Binary {
        completed: bool,
    },
    Progress {
        current_value: f64,
        target_value: f64,
        unit: Option<String>,
    },
}

impl Completion {
    pub fn is_completed(&self) -> bool {
        match self {
            Completion::Binary { completed } => *completed,
            Completion::Progress {
                current_value,
                target_value,
                ..
            } => *target_value > 0.0 && current_value >= target_value,
        }
    }
}

/// Link back to the recurring rule an activity was materialized from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceLink {
    pub rule_id: String,
    pub occurrence_date: NaiveDate,
}

/// A single unit of user activity (a task) with its category attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ActivityPayload", try_from = "ActivityPayload")]
pub struct ActivityRecord {
    pub id: String,
    pub name: String,
    pub categories: Vec<Category>,
    pub points: PointsMap,
    pub date: Option<NaiveDate>,
    pub completion: Completion,
    pub recurrence: Option<RecurrenceLink>,
    pub description: Option<String>,
    pub duration: Option<i64>,
}

impl ActivityRecord {
    pub fn from_input(input: ActivityCreateInput, registry: &CategoryRegistry) -> AppResult<Self> {
        let name = input.name.trim().to_string();
        let categories = input
            .categories
            .iter()
            .map(|raw| registry.resolve(CategoryKind::Task, raw))
            .collect::<AppResult<Vec<_>>>()?;

        let mut points = PointsMap::new();
        for (raw, value) in &input.points {
            let category = registry.resolve(CategoryKind::Task, raw)?;
            points.insert(category, *value);
        }

        let completion = match input.target_value {
            Some(target_value) => Completion::Progress {
                current_value: input.current_value.unwrap_or(0.0),
                target_value,
                unit: input.unit,
            },
            None => Completion::Binary {
                completed: input.status == Some(ActivityStatus::Completed),
            },
        };

        let record = Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            categories,
            points,
            date: input.date,
            completion,
            recurrence: None,
            description: input
                .description
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            duration: input.duration,
        };
        record.validate()?;
        Ok(record)
    }

    /// Structural checks shared by every entry point.
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("Task name cannot be empty"));
        }
        if self.name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::validation(format!(
                "Task name cannot exceed {MAX_NAME_LEN} characters"
            )));
        }
        validate_category_selection(&self.categories)?;
        validate_points(&self.categories, &self.points)?;
        if let Completion::Progress {
            current_value,
            target_value,
            ..
        } = &self.completion
        {
            if !current_value.is_finite() || !target_value.is_finite() {
                return Err(AppError::validation("Progress values must be finite"));
            }
            if *current_value < 0.0 || *target_value <= 0.0 {
                return Err(AppError::validation(
                    "Progress target must be positive and current value non-negative",
                ));
            }
        }
        if let Some(duration) = self.duration {
            if duration < 0 {
                return Err(AppError::validation("Duration cannot be negative"));
            }
        }
        Ok(())
    }

    pub fn ensure_registered(&self, registry: &CategoryRegistry) -> AppResult<()> {
        for category in self.categories.iter().chain(self.points.categories()) {
            if !registry.contains(CategoryKind::Task, category) {
                return Err(AppError::validation(format!(
                    "Unknown task category: {category}"
                )));
            }
        }
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.completion.is_completed()
    }

    pub fn is_long_term(&self) -> bool {
        self.date.is_none()
    }

    pub fn status(&self) -> ActivityStatus {
        if self.is_completed() {
            ActivityStatus::Completed
        } else {
            ActivityStatus::Pending
        }
    }

    /// Flip completion. Progress tasks jump to their target or back to zero.
    pub fn toggle_completion(&mut self) {
        let completed = self.is_completed();
        match &mut self.completion {
            Completion::Binary { completed: flag } => *flag = !completed,
            Completion::Progress {
                current_value,
                target_value,
                ..
            } => {
                *current_value = if completed { 0.0 } else { *target_value };
            }
        }
    }

    pub fn set_progress(&mut self, value: f64) -> AppResult<()> {
        match &mut self.completion {
            Completion::Progress { current_value, .. } => {
                if !value.is_finite() || value < 0.0 {
                    return Err(AppError::validation(
                        "Progress value must be a non-negative number",
                    ));
                }
                *current_value = value;
                Ok(())
            }
            Completion::Binary { .. } => Err(AppError::validation(
                "Only progress-style tasks track a current value",
            )),
        }
    }
}

pub(crate) fn validate_category_selection(categories: &[Category]) -> AppResult<()> {
    if categories.is_empty() {
        return Err(AppError::validation("Select at least one category"));
    }
    if categories.len() > MAX_ACTIVITY_CATEGORIES {
        return Err(AppError::validation(format!(
            "A task can have at most {MAX_ACTIVITY_CATEGORIES} categories"
        )));
    }
    for (idx, category) in categories.iter().enumerate() {
        if categories[..idx].contains(category) {
            return Err(AppError::validation(format!(
                "Category listed twice: {category}"
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_points(categories: &[Category], points: &PointsMap) -> AppResult<()> {
    for (category, value) in points.iter() {
        if !categories.contains(category) {
            return Err(AppError::validation(format!(
                "Points assigned to unselected category: {category}"
            )));
        }
        if value < 0 {
            return Err(AppError::validation(format!(
                "Points for {category} cannot be negative"
            )));
        }
    }
    Ok(())
}

/// Wire shape exchanged with the task collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPayload {
    pub id: String,
    pub name: String,
    pub categories: Vec<Category>,
    #[serde(default)]
    pub points: PointsMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceLink>,
}

impl From<ActivityRecord> for ActivityPayload {
    fn from(record: ActivityRecord) -> Self {
        let status = record.status();
        let (current_value, target_value, unit) = match record.completion {
            Completion::Binary { .. } => (None, None, None),
            Completion::Progress {
                current_value,
                target_value,
                unit,
            } => (Some(current_value), Some(target_value), unit),
        };
        Self {
            id: record.id,
            name: record.name,
            categories: record.categories,
            points: record.points,
            date: record.date,
            status,
            current_value,
            target_value,
            unit,
            description: record.description,
            duration: record.duration,
            recurrence: record.recurrence,
        }
    }
}

impl TryFrom<ActivityPayload> for ActivityRecord {
    type Error = AppError;

    fn try_from(payload: ActivityPayload) -> Result<Self, Self::Error> {
        let completion = match payload.target_value {
            Some(target_value) => Completion::Progress {
                current_value: payload.current_value.unwrap_or(0.0),
                target_value,
                unit: payload.unit,
            },
            None => Completion::Binary {
                completed: payload.status == ActivityStatus::Completed,
            },
        };
        let record = Self {
            id: payload.id,
            name: payload.name,
            categories: payload.categories,
            points: payload.points,
            date: payload.date,
            completion,
            recurrence: payload.recurrence,
            description: payload.description,
            duration: payload.duration,
        };
        record.validate()?;
        Ok(record)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityCreateInput {
    pub name: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub points: BTreeMap<String, i64>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub status: Option<ActivityStatus>,
    #[serde(default)]
    pub current_value: Option<f64>,
    #[serde(default)]
    pub target_value: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(categories: &[&str], points: &[(&str, i64)]) -> ActivityCreateInput {
        ActivityCreateInput {
            name: "Morning run".into(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            points: points.iter().map(|(c, p)| (c.to_string(), *p)).collect(),
            date: NaiveDate::from_ymd_opt(2025, 8, 24),
            ..Default::default()
        }
    }

    #[test]
    fn creates_record_with_registered_spelling() {
        let registry = CategoryRegistry::default();
        let record =
            ActivityRecord::from_input(input(&["health"], &[("HEALTH", 3)]), &registry).unwrap();
        assert_eq!(record.categories[0].as_str(), "Health");
        assert_eq!(record.points.get(&record.categories[0]), Some(3));
        assert!(!record.is_completed());
    }

    #[test]
    fn rejects_unknown_categories_and_negative_points() {
        let registry = CategoryRegistry::default();
        assert!(ActivityRecord::from_input(input(&["Cooking"], &[]), &registry).is_err());
        assert!(
            ActivityRecord::from_input(input(&["Mind"], &[("Mind", -2)]), &registry).is_err()
        );
        assert!(ActivityRecord::from_input(input(&[], &[]), &registry).is_err());
    }

    #[test]
    fn points_must_belong_to_selected_categories() {
        let registry = CategoryRegistry::default();
        let result = ActivityRecord::from_input(input(&["Mind"], &[("Work", 2)]), &registry);
        assert!(result.is_err());
    }

    #[test]
    fn toggling_progress_task_jumps_to_target() {
        let registry = CategoryRegistry::default();
        let mut create = input(&["Strength"], &[("Strength", 4)]);
        create.current_value = Some(2.0);
        create.target_value = Some(10.0);
        create.unit = Some("km".into());
        let mut record = ActivityRecord::from_input(create, &registry).unwrap();
        assert!(!record.is_completed());
        record.toggle_completion();
        assert!(record.is_completed());
        record.toggle_completion();
        assert!(!record.is_completed());
        assert!(record.set_progress(f64::NAN).is_err());
    }

    #[test]
    fn wire_payload_uses_status_and_progress_fields() {
        let json = r#"{
            "id": "t1",
            "name": "Read",
            "categories": ["Mind"],
            "points": {"Mind": 5},
            "date": "2025-08-24",
            "status": "pending",
            "currentValue": 20,
            "targetValue": 40,
            "unit": "pages"
        }"#;
        let record: ActivityRecord = serde_json::from_str(json).unwrap();
        assert!(matches!(record.completion, Completion::Progress { .. }));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["targetValue"], 40.0);
    }

    #[test]
    fn wire_payload_is_validated() {
        let json = r#"{"id":"t1","name":"Read","categories":[],"status":"pending"}"#;
        assert!(serde_json::from_str::<ActivityRecord>(json).is_err());
    }
}
