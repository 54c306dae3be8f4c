use std::sync::RwLock;

use chrono::Utc;
use tracing::{info, warn};

use crate::db::repositories::settings_repository::SettingsRepository;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::category::{validate_category_list, Category, CategoryKind, CategoryRegistry};
use crate::models::settings::{
    ensure_valid_occurrence_cap, CategorySettingsInput, TrackerSettings,
};
use crate::services::recurrence::ExpansionConfig;

const KEY_TASK_CATEGORIES: &str = "task_categories";
const KEY_EXPENSE_CATEGORIES: &str = "expense_categories";
const KEY_INVESTMENT_CATEGORIES: &str = "investment_categories";
const KEY_OCCURRENCE_CAP: &str = "occurrence_cap";

const CATEGORY_KINDS: [CategoryKind; 3] = [
    CategoryKind::Task,
    CategoryKind::Expense,
    CategoryKind::Investment,
];

fn category_key(kind: CategoryKind) -> &'static str {
    match kind {
        CategoryKind::Task => KEY_TASK_CATEGORIES,
        CategoryKind::Expense => KEY_EXPENSE_CATEGORIES,
        CategoryKind::Investment => KEY_INVESTMENT_CATEGORIES,
    }
}

/// Tracker configuration backed by `app_settings`, cached after first read.
pub struct SettingsService {
    db: DbPool,
    cache: RwLock<Option<TrackerSettings>>,
}

impl SettingsService {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            cache: RwLock::new(None),
        }
    }

    pub fn get(&self) -> AppResult<TrackerSettings> {
        let cached = self.cache.read().ok().and_then(|guard| guard.clone());
        match cached {
            Some(settings) => Ok(settings),
            None => {
                let settings = self.load_settings_from_db()?;
                self.remember(&settings);
                Ok(settings)
            }
        }
    }

    fn remember(&self, settings: &TrackerSettings) {
        if let Ok(mut guard) = self.cache.write() {
            *guard = Some(settings.clone());
        }
    }

    pub fn registry(&self) -> AppResult<CategoryRegistry> {
        self.get()?.registry()
    }

    pub fn expansion_config(&self) -> AppResult<ExpansionConfig> {
        Ok(ExpansionConfig {
            max_iterations: self.get()?.occurrence_cap,
        })
    }

    /// Replace category lists and the occurrence cap. Everything is validated
    /// before anything is written.
    pub fn update_categories(&self, input: CategorySettingsInput) -> AppResult<TrackerSettings> {
        let mut current = self.get()?;
        let mut changes: Vec<(&'static str, String)> = Vec::new();

        for kind in CATEGORY_KINDS {
            let Some(raw) = input.list(kind) else {
                continue;
            };
            let categories = raw
                .iter()
                .map(|name| Category::new(name))
                .collect::<AppResult<Vec<_>>>()?;
            let categories = validate_category_list(kind, categories)?;
            changes.push((category_key(kind), serde_json::to_string(&categories)?));
            match kind {
                CategoryKind::Task => current.task_categories = categories,
                CategoryKind::Expense => current.expense_categories = categories,
                CategoryKind::Investment => current.investment_categories = categories,
            }
        }

        if let Some(cap) = input.occurrence_cap {
            ensure_valid_occurrence_cap(cap)?;
            current.occurrence_cap = cap;
            changes.push((KEY_OCCURRENCE_CAP, cap.to_string()));
        }

        if changes.is_empty() {
            return Ok(current);
        }

        let now = Utc::now().to_rfc3339();
        self.db
            .with_transaction(|tx| SettingsRepository::upsert_many(tx, &changes, &now))?;
        current.updated_at = now;

        info!(
            target: "app::settings",
            keys = ?changes.iter().map(|(key, _)| *key).collect::<Vec<_>>(),
            "tracker settings updated"
        );

        self.remember(&current);
        Ok(current)
    }

    fn load_settings_from_db(&self) -> AppResult<TrackerSettings> {
        self.db.with_connection(|conn| {
            let map = SettingsRepository::load_all(conn)?;
            let latest_updated_at = map.values().map(|row| row.updated_at.clone()).max();

            let mut settings = TrackerSettings::default();
            for kind in CATEGORY_KINDS {
                let Some(row) = map.get(category_key(kind)) else {
                    continue;
                };
                match decode_categories(kind, &row.value) {
                    Some(categories) => match kind {
                        CategoryKind::Task => settings.task_categories = categories,
                        CategoryKind::Expense => settings.expense_categories = categories,
                        CategoryKind::Investment => settings.investment_categories = categories,
                    },
                    None => warn!(
                        target: "app::settings",
                        kind = kind.as_str(),
                        "stored category list invalid, falling back to defaults"
                    ),
                }
            }

            if let Some(row) = map.get(KEY_OCCURRENCE_CAP) {
                match row.value.parse::<u32>() {
                    Ok(cap) if ensure_valid_occurrence_cap(cap).is_ok() => {
                        settings.occurrence_cap = cap
                    }
                    _ => warn!(
                        target: "app::settings",
                        value = %row.value,
                        "stored occurrence cap invalid, falling back to default"
                    ),
                }
            }

            settings.updated_at = latest_updated_at.unwrap_or_else(|| Utc::now().to_rfc3339());
            Ok(settings)
        })
    }
}

fn decode_categories(kind: CategoryKind, raw: &str) -> Option<Vec<Category>> {
    let categories: Vec<Category> = serde_json::from_str(raw).ok()?;
    validate_category_list(kind, categories).ok()
}
