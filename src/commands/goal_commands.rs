use crate::commands::points::sync_goals_from_windows;
use crate::commands::{run_blocking, AppState, CommandResult};
use crate::error::AppError;
use crate::models::goal::{Goal, GoalCreateInput, GoalUpdateInput};
use crate::models::points::PointsMap;
use crate::services::goal_service::{GoalSyncReport, GoalWithProgress};
use crate::services::points_accounting::PointsAccounting;

/// Goals with progress derived from their stored current value.
pub async fn goals_list(state: &AppState) -> CommandResult<Vec<GoalWithProgress>> {
    let state = state.clone();
    run_blocking(move || {
        let goals = state.goals().list()?;
        Ok(goals
            .into_iter()
            .map(|goal| {
                let progress = PointsAccounting::compute_goal_progress(&goal, &PointsMap::new());
                GoalWithProgress { goal, progress }
            })
            .collect())
    })
    .await
}

pub async fn goals_create(state: &AppState, payload: GoalCreateInput) -> CommandResult<Goal> {
    let state = state.clone();
    run_blocking(move || {
        let registry = state.settings().registry()?;
        state.goals().create(payload, &registry)
    })
    .await
}

pub async fn goals_update(
    state: &AppState,
    id: String,
    payload: GoalUpdateInput,
) -> CommandResult<Goal> {
    let state = state.clone();
    run_blocking(move || {
        let registry = state.settings().registry()?;
        state.goals().update(&id, payload, &registry)
    })
    .await
}

pub async fn goals_delete(state: &AppState, id: String) -> CommandResult<()> {
    let state = state.clone();
    run_blocking(move || state.goals().delete(&id)).await
}

/// Recompute every goal over its window, unsaved recurring instances
/// included, and persist changes.
pub async fn goals_sync(state: &AppState) -> CommandResult<GoalSyncReport> {
    let state = state.clone();
    run_blocking(move || {
        sync_goals_from_windows(&state)?.ok_or_else(|| {
            AppError::other("Activities could not be loaded, goal progress left unchanged")
        })
    })
    .await
}
