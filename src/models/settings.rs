use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::category::{Category, CategoryKind, CategoryRegistry};
use crate::services::recurrence::DEFAULT_MAX_ITERATIONS;

pub const MAX_OCCURRENCE_CAP: u32 = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSettings {
    pub task_categories: Vec<Category>,
    pub expense_categories: Vec<Category>,
    pub investment_categories: Vec<Category>,
    /// Upper bound on steps walked when expanding one recurring rule.
    pub occurrence_cap: u32,
    pub updated_at: String,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        let registry = CategoryRegistry::default();
        Self {
            task_categories: registry.categories(CategoryKind::Task).to_vec(),
            expense_categories: registry.categories(CategoryKind::Expense).to_vec(),
            investment_categories: registry.categories(CategoryKind::Investment).to_vec(),
            occurrence_cap: DEFAULT_MAX_ITERATIONS,
            updated_at: String::new(),
        }
    }
}

impl TrackerSettings {
    pub fn categories(&self, kind: CategoryKind) -> &[Category] {
        match kind {
            CategoryKind::Task => &self.task_categories,
            CategoryKind::Expense => &self.expense_categories,
            CategoryKind::Investment => &self.investment_categories,
        }
    }

    pub fn registry(&self) -> AppResult<CategoryRegistry> {
        CategoryRegistry::from_settings(self)
    }
}

impl CategoryRegistry {
    pub fn from_settings(settings: &TrackerSettings) -> AppResult<Self> {
        Self::new(
            settings.task_categories.clone(),
            settings.expense_categories.clone(),
            settings.investment_categories.clone(),
        )
    }
}

pub fn ensure_valid_occurrence_cap(cap: u32) -> AppResult<()> {
    if !(1..=MAX_OCCURRENCE_CAP).contains(&cap) {
        return Err(AppError::validation(format!(
            "Occurrence cap must be between 1 and {MAX_OCCURRENCE_CAP}"
        )));
    }
    Ok(())
}

/// Replacement lists submitted from the settings screen. Missing lists keep
/// their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySettingsInput {
    #[serde(default)]
    pub task_categories: Option<Vec<String>>,
    #[serde(default)]
    pub expense_categories: Option<Vec<String>>,
    #[serde(default)]
    pub investment_categories: Option<Vec<String>>,
    #[serde(default)]
    pub occurrence_cap: Option<u32>,
}

impl CategorySettingsInput {
    pub fn list(&self, kind: CategoryKind) -> Option<&Vec<String>> {
        match kind {
            CategoryKind::Task => self.task_categories.as_ref(),
            CategoryKind::Expense => self.expense_categories.as_ref(),
            CategoryKind::Investment => self.investment_categories.as_ref(),
        }
    }
}
