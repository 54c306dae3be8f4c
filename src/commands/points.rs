use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::models::activity::ActivityRecord;
use crate::models::points::{DailyCumulativeSeries, Period, PointsSummary};
use crate::services::goal_service::GoalSyncReport;
use crate::services::points_accounting::PointsAccounting;
use crate::services::recurring_service::MAX_WINDOW_DAYS;

use super::{run_blocking, AppState, CommandResult};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PointsQuery {
    /// `day`, `week`, `month` or `lifetime`; ignored when `from`/`to` are set.
    pub period: Option<String>,
    pub date: Option<NaiveDate>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// Recompute goal progress from the same activity set.
    pub sync_goals: bool,
}

impl PointsQuery {
    fn period(&self) -> AppResult<Period> {
        match (self.from, self.to) {
            (Some(from), Some(to)) => Period::range(from, to),
            _ => Period::parse(self.period.as_deref().unwrap_or("lifetime"), self.date),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsResponse {
    #[serde(flatten)]
    pub summary: PointsSummary,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goals: Option<GoalSyncReport>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCumulativeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCumulativeResponse {
    #[serde(flatten)]
    pub series: DailyCumulativeSeries,
    pub degraded: bool,
}

pub async fn points_fetch(state: &AppState, query: PointsQuery) -> CommandResult<PointsResponse> {
    let state = state.clone();
    run_blocking(move || {
        let period = query.period()?;
        let projection = match period.bounds() {
            Some((from, to)) => Projection::Window { from, to },
            // Lifetime covers everything up to the reference day, plus any
            // occurrence already marked complete.
            None => Projection::Through(query.date.unwrap_or_else(|| Utc::now().date_naive())),
        };
        let (activities, degraded) = collect_activities(&state, projection);
        let summary = PointsAccounting::summarize(&activities, &period)?;

        let goals = if query.sync_goals {
            sync_goals_from_windows(&state)?
        } else {
            None
        };

        debug!(
            target: "app::points",
            period = period.label(),
            total = summary.total,
            achievable = summary.achievable_total,
            degraded,
            "points summary served"
        );
        Ok(PointsResponse {
            summary,
            degraded,
            goals,
        })
    })
    .await
}

pub async fn points_daily_cumulative(
    state: &AppState,
    query: DailyCumulativeQuery,
) -> CommandResult<DailyCumulativeResponse> {
    let state = state.clone();
    run_blocking(move || {
        let (activities, degraded) = collect_activities(
            &state,
            Projection::Window {
                from: query.from,
                to: query.to,
            },
        );
        let series = PointsAccounting::daily_cumulative(&activities, query.from, query.to)?;
        Ok(DailyCumulativeResponse { series, degraded })
    })
    .await
}

/// Which unsaved recurring instances join the stored activities.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Projection {
    /// Occurrences inside the window.
    Window { from: NaiveDate, to: NaiveDate },
    /// Every occurrence from each rule's start through the given day, plus
    /// completed occurrences dated later.
    Through(NaiveDate),
}

/// Recompute goals over stored activities plus every recurring instance up
/// to the latest goal target date, so the result does not depend on which
/// view triggered it. Returns `None` when the activity set is degraded, since
/// syncing it would overwrite stored progress.
pub(crate) fn sync_goals_from_windows(state: &AppState) -> AppResult<Option<GoalSyncReport>> {
    let goals = state.goals().list()?;
    let Some(horizon) = goals.iter().map(|goal| goal.target_date).max() else {
        return Ok(Some(state.goals().sync_goals(&[])?));
    };
    let (activities, degraded) = collect_activities(state, Projection::Through(horizon));
    if degraded {
        warn!(target: "app::goals", "goal sync skipped on degraded activity set");
        return Ok(None);
    }
    state.goals().sync_goals(&activities).map(Some)
}

/// Stored activities plus the projected unsaved recurring instances.
/// Storage failures degrade to whatever could be loaded.
pub(crate) fn collect_activities(
    state: &AppState,
    projection: Projection,
) -> (Vec<ActivityRecord>, bool) {
    let snapshot = state.activities().load_or_empty();
    let mut activities = snapshot.activities;
    let mut degraded = snapshot.degraded;

    let projected = state.settings().get().and_then(|settings| {
        let registry = settings.registry()?;
        let config = state.settings().expansion_config()?;
        let recurring = state.recurring();
        match projection {
            Projection::Window { from, to } if (to - from).num_days() < MAX_WINDOW_DAYS => {
                recurring.project_activities(from, to, &registry, &config)
            }
            // Per-rule expansion has no window limit, only the occurrence cap.
            Projection::Window { to, .. } | Projection::Through(to) => {
                recurring.project_through(to, &registry, &config)
            }
        }
    });
    match projected {
        Ok(projected) => {
            let stored: HashSet<String> = activities.iter().map(|a| a.id.clone()).collect();
            activities.extend(
                projected
                    .into_iter()
                    .filter(|activity| !stored.contains(&activity.id)),
            );
        }
        Err(err) => {
            warn!(
                target: "app::points",
                error = %err,
                "recurring projection failed, continuing with stored activities"
            );
            degraded = true;
        }
    }
    (activities, degraded)
}
