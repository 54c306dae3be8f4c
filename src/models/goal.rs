use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{AppError, AppResult};
use crate::models::category::{Category, CategoryKind, CategoryRegistry};
use crate::models::points::PointsMap;

pub const GOAL_POINTS_MIN: i64 = 0;
pub const GOAL_POINTS_MAX: i64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub points: PointsMap,
    pub current_value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    pub target_date: NaiveDate,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Completed,
    Abandoned,
}

/// Events that can move a goal between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalEvent {
    /// Raised by recomputation when progress reaches 100.
    TargetReached,
    /// Raised by the user only.
    Abandon,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Completed => "completed",
            GoalStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, GoalStatus::Active)
    }

    pub fn transition(self, event: GoalEvent) -> AppResult<GoalStatus> {
        match (self, event) {
            (GoalStatus::Active, GoalEvent::TargetReached) => Ok(GoalStatus::Completed),
            (GoalStatus::Active, GoalEvent::Abandon) => Ok(GoalStatus::Abandoned),
            (GoalStatus::Completed, GoalEvent::TargetReached) => Ok(GoalStatus::Completed),
            (GoalStatus::Abandoned, GoalEvent::Abandon) => Ok(GoalStatus::Abandoned),
            (from, GoalEvent::TargetReached) => {
                Err(AppError::invalid_transition(from.as_str(), "completed"))
            }
            (from, GoalEvent::Abandon) => {
                Err(AppError::invalid_transition(from.as_str(), "abandoned"))
            }
        }
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoalStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(GoalStatus::Active),
            "completed" => Ok(GoalStatus::Completed),
            "abandoned" => Ok(GoalStatus::Abandoned),
            _ => Err(AppError::validation(format!("Invalid goal status: {s}"))),
        }
    }
}

impl Goal {
    pub fn from_input(input: GoalCreateInput, registry: &CategoryRegistry) -> AppResult<Self> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("Goal name cannot be empty"));
        }
        let target_date = input
            .target_date
            .ok_or_else(|| AppError::validation("Goal target date is required"))?;
        if let Some(start) = input.start_date {
            if start > target_date {
                return Err(AppError::validation(
                    "Goal start date must not be after its target date",
                ));
            }
        }

        let category = registry.resolve(CategoryKind::Task, &input.category)?;
        let points = sanitize_targets(&input.targets, registry)?;
        if !points.contains(&category) {
            return Err(AppError::validation(format!(
                "Primary category {category} must be one of the selected targets"
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            category,
            points,
            current_value: 0,
            start_date: input.start_date,
            target_date,
            status: GoalStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    /// Target for the primary category, only when it is usable as a
    /// denominator.
    pub fn target_points(&self) -> Option<i64> {
        self.points.get(&self.category).filter(|points| *points > 0)
    }

    pub fn abandon(&mut self) -> AppResult<()> {
        self.status = self.status.transition(GoalEvent::Abandon)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Apply a recomputed progress. Returns whether anything changed.
    pub fn apply_progress(&mut self, progress: &GoalProgress) -> bool {
        let changed =
            self.current_value != progress.current_value || self.status != progress.status;
        if changed {
            self.current_value = progress.current_value;
            self.status = progress.status;
            self.updated_at = Utc::now();
        }
        changed
    }

    pub fn apply_update(
        &mut self,
        update: GoalUpdateInput,
        registry: &CategoryRegistry,
    ) -> AppResult<()> {
        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::validation("Goal name cannot be empty"));
            }
            self.name = name;
        }
        if let Some(target_date) = update.target_date {
            self.target_date = target_date;
        }
        if let Some(start_date) = update.start_date {
            self.start_date = start_date;
        }
        if let Some(start) = self.start_date {
            if start > self.target_date {
                return Err(AppError::validation(
                    "Goal start date must not be after its target date",
                ));
            }
        }
        if let Some(targets) = update.targets {
            let points = sanitize_targets(&targets, registry)?;
            if !points.contains(&self.category) {
                return Err(AppError::validation(format!(
                    "Primary category {} must be one of the selected targets",
                    self.category
                )));
            }
            self.points = points;
        }
        if let Some(current_value) = update.current_value {
            if current_value < 0 {
                return Err(AppError::validation("Goal current value cannot be negative"));
            }
            self.current_value = current_value;
        }
        match update.status {
            Some(GoalStatus::Abandoned) => self.abandon()?,
            Some(status) if status == self.status => {}
            Some(status) => {
                return Err(AppError::invalid_transition(
                    self.status.as_str(),
                    status.as_str(),
                ))
            }
            None => {}
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Clamp a submitted per-category target into `0..=10`. Anything that is not
/// a number (or a numeric string) counts as zero.
pub fn sanitize_goal_points(value: &JsonValue) -> i64 {
    let raw = match value {
        JsonValue::Number(number) => number.as_f64(),
        JsonValue::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(points) if points.is_finite() => {
            (points.round() as i64).clamp(GOAL_POINTS_MIN, GOAL_POINTS_MAX)
        }
        _ => GOAL_POINTS_MIN,
    }
}

fn sanitize_targets(
    targets: &[GoalTargetInput],
    registry: &CategoryRegistry,
) -> AppResult<PointsMap> {
    let mut points = PointsMap::new();
    for target in targets.iter().filter(|target| target.selected) {
        let category = registry.resolve(CategoryKind::Task, &target.category)?;
        points.insert(category, sanitize_goal_points(&target.points));
    }
    if points.is_empty() {
        return Err(AppError::validation("Select at least one goal category"));
    }
    Ok(points)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalProgress {
    pub current_value: i64,
    pub target_points: i64,
    /// Raw percentage, may exceed 100.
    pub progress: i64,
    /// Percentage clamped to `0..=100` for display.
    pub display_progress: u8,
    pub status: GoalStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalTargetInput {
    pub category: String,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub points: JsonValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalCreateInput {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub targets: Vec<GoalTargetInput>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalUpdateInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
    /// `null` clears the start date, absence leaves it alone.
    #[serde(default, deserialize_with = "crate::models::double_option")]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub targets: Option<Vec<GoalTargetInput>>,
    #[serde(default)]
    pub current_value: Option<i64>,
    #[serde(default)]
    pub status: Option<GoalStatus>,
}
