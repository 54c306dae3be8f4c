use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AppError, AppResult};

const MAX_CATEGORY_NAME_LEN: usize = 40;

pub const DEFAULT_TASK_CATEGORIES: [&str; 5] = ["Health", "Strength", "Mind", "Work", "Spirit"];
pub const DEFAULT_EXPENSE_CATEGORIES: [&str; 7] = [
    "Food",
    "Transport",
    "Housing",
    "Utilities",
    "Entertainment",
    "Health",
    "Other",
];
pub const DEFAULT_INVESTMENT_CATEGORIES: [&str; 4] = ["Stocks", "Crypto", "Bonds", "Real Estate"];

/// A category label. Matching is case-insensitive, display keeps the case it
/// was created with.
#[derive(Debug, Clone)]
pub struct Category(String);

impl Category {
    pub fn new(raw: &str) -> AppResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::validation("Category name cannot be empty"));
        }
        if trimmed.chars().count() > MAX_CATEGORY_NAME_LEN {
            return Err(AppError::validation(format!(
                "Category name cannot exceed {MAX_CATEGORY_NAME_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn folded(&self) -> String {
        self.0.to_lowercase()
    }
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        self.folded() == other.folded()
    }
}

impl Eq for Category {}

impl Hash for Category {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded().hash(state);
    }
}

impl PartialOrd for Category {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Category {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(&other.folded())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Category {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Category::new(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Task,
    Expense,
    Investment,
}

impl CategoryKind {
    /// Maximum number of active categories, `None` when unlimited.
    pub fn cap(self) -> Option<usize> {
        match self {
            CategoryKind::Task => Some(5),
            CategoryKind::Expense => Some(7),
            CategoryKind::Investment => None,
        }
    }

    pub fn defaults(self) -> &'static [&'static str] {
        match self {
            CategoryKind::Task => &DEFAULT_TASK_CATEGORIES,
            CategoryKind::Expense => &DEFAULT_EXPENSE_CATEGORIES,
            CategoryKind::Investment => &DEFAULT_INVESTMENT_CATEGORIES,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryKind::Task => "task",
            CategoryKind::Expense => "expense",
            CategoryKind::Investment => "investment",
        }
    }
}

/// The set of categories a user has configured, handed explicitly to every
/// component that validates incoming data.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRegistry {
    task: Vec<Category>,
    expense: Vec<Category>,
    investment: Vec<Category>,
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        let defaults = |kind: CategoryKind| {
            kind.defaults()
                .iter()
                .map(|name| Category(name.to_string()))
                .collect::<Vec<_>>()
        };
        Self {
            task: defaults(CategoryKind::Task),
            expense: defaults(CategoryKind::Expense),
            investment: defaults(CategoryKind::Investment),
        }
    }
}

impl CategoryRegistry {
    pub fn new(
        task: Vec<Category>,
        expense: Vec<Category>,
        investment: Vec<Category>,
    ) -> AppResult<Self> {
        Ok(Self {
            task: validate_category_list(CategoryKind::Task, task)?,
            expense: validate_category_list(CategoryKind::Expense, expense)?,
            investment: validate_category_list(CategoryKind::Investment, investment)?,
        })
    }

    pub fn categories(&self, kind: CategoryKind) -> &[Category] {
        match kind {
            CategoryKind::Task => &self.task,
            CategoryKind::Expense => &self.expense,
            CategoryKind::Investment => &self.investment,
        }
    }

    pub fn contains(&self, kind: CategoryKind, category: &Category) -> bool {
        self.categories(kind).iter().any(|known| known == category)
    }

    /// Resolve free text to the registered category, keeping the registered
    /// spelling.
    pub fn resolve(&self, kind: CategoryKind, raw: &str) -> AppResult<Category> {
        let candidate = Category::new(raw)?;
        self.categories(kind)
            .iter()
            .find(|known| **known == candidate)
            .cloned()
            .ok_or_else(|| {
                AppError::validation_with_details(
                    format!("Unknown {} category: {}", kind.as_str(), candidate),
                    serde_json::json!({
                        "kind": kind.as_str(),
                        "category": candidate.as_str(),
                        "allowed": self.categories(kind),
                    }),
                )
            })
    }

    pub fn resolve_all<'a, I>(&self, kind: CategoryKind, raw: I) -> AppResult<Vec<Category>>
    where
        I: IntoIterator<Item = &'a Category>,
    {
        raw.into_iter()
            .map(|category| self.resolve(kind, category.as_str()))
            .collect()
    }
}

pub fn validate_category_list(
    kind: CategoryKind,
    categories: Vec<Category>,
) -> AppResult<Vec<Category>> {
    if categories.is_empty() {
        return Err(AppError::validation(format!(
            "At least one {} category is required",
            kind.as_str()
        )));
    }
    if let Some(cap) = kind.cap() {
        if categories.len() > cap {
            return Err(AppError::validation(format!(
                "At most {cap} {} categories can be active",
                kind.as_str()
            )));
        }
    }
    let mut seen: Vec<&Category> = Vec::with_capacity(categories.len());
    for category in &categories {
        if seen.contains(&category) {
            return Err(AppError::validation(format!(
                "Duplicate {} category: {}",
                kind.as_str(),
                category
            )));
        }
        seen.push(category);
    }
    Ok(categories)
}
