use crate::models::settings::{CategorySettingsInput, TrackerSettings};

use super::{run_blocking, AppState, CommandResult};

pub async fn settings_get(state: &AppState) -> CommandResult<TrackerSettings> {
    let app_state = state.clone();
    run_blocking(move || app_state.settings().get()).await
}

/// Replace one or more category lists and the expansion cap. Omitted fields
/// keep their current value.
pub async fn settings_update_categories(
    state: &AppState,
    payload: CategorySettingsInput,
) -> CommandResult<TrackerSettings> {
    let app_state = state.clone();
    run_blocking(move || app_state.settings().update_categories(payload)).await
}
