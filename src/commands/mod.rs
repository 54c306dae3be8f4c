pub mod goal_commands;
pub mod points;
pub mod recurring_commands;
pub mod settings;
pub mod task;

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, error};

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::services::activity_service::ActivityService;
use crate::services::goal_service::GoalService;
use crate::services::recurring_service::RecurringService;
use crate::services::settings_service::SettingsService;

/// Shared handle to every service, cloned into each command.
#[derive(Clone)]
pub struct AppState {
    activity_service: Arc<ActivityService>,
    goal_service: Arc<GoalService>,
    recurring_service: Arc<RecurringService>,
    settings_service: Arc<SettingsService>,
}

impl AppState {
    pub fn new(db_pool: DbPool) -> AppResult<Self> {
        let settings_service = Arc::new(SettingsService::new(db_pool.clone()));
        // Surface unreadable storage at startup rather than on first command.
        settings_service.get()?;

        Ok(Self {
            activity_service: Arc::new(ActivityService::new(db_pool.clone())),
            goal_service: Arc::new(GoalService::new(db_pool.clone())),
            recurring_service: Arc::new(RecurringService::new(db_pool)),
            settings_service,
        })
    }

    pub fn activities(&self) -> Arc<ActivityService> {
        Arc::clone(&self.activity_service)
    }

    pub fn goals(&self) -> Arc<GoalService> {
        Arc::clone(&self.goal_service)
    }

    pub fn recurring(&self) -> Arc<RecurringService> {
        Arc::clone(&self.recurring_service)
    }

    pub fn settings(&self) -> Arc<SettingsService> {
        Arc::clone(&self.settings_service)
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Error shape returned by every command: a stable `code`, a readable
/// message and optional structured context.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl CommandError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<JsonValue>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details,
        }
    }
}

impl From<AppError> for CommandError {
    fn from(error: AppError) -> Self {
        let code = error.code();
        let (message, details) = match error {
            AppError::Validation { message, details } => (message, details),
            AppError::NotFound => ("The requested record does not exist".to_string(), None),
            AppError::InvalidTransition { from, to } => (
                format!("Cannot move from {from} to {to}"),
                Some(json!({ "from": from, "to": to })),
            ),
            AppError::Conflict { message } | AppError::Accounting { message } => (message, None),
            AppError::Serialization(err) => (format!("Serialization failed: {err}"), None),
            AppError::Io(err) => (format!("File system access failed: {err}"), None),
            AppError::Database { message } | AppError::Other(message) => (message, None),
        };
        if code == "UNKNOWN" {
            error!(target: "app::command", %message, "command failed");
        } else {
            debug!(target: "app::command", code, %message, "command rejected");
        }
        CommandError::new(code, message, details)
    }
}

pub(crate) async fn run_blocking<T: Send + 'static>(
    task: impl FnOnce() -> Result<T, AppError> + Send + 'static,
) -> CommandResult<T> {
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| CommandError::new("UNKNOWN", format!("Command task failed: {err}"), None))?
        .map_err(CommandError::from)
}
