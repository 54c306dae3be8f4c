use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::repositories::goal_repository::{GoalRepository, GoalRow};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::activity::ActivityRecord;
use crate::models::category::CategoryRegistry;
use crate::models::goal::{Goal, GoalCreateInput, GoalProgress, GoalUpdateInput};
use crate::models::points::PointsMap;
use crate::services::points_accounting::PointsAccounting;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalWithProgress {
    pub goal: Goal,
    pub progress: GoalProgress,
}

/// Result of a sync. `goals` reflect the locally applied progress even when
/// some of them could not be written back.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSyncReport {
    pub goals: Vec<GoalWithProgress>,
    pub changed: usize,
    pub persisted: usize,
    pub failed: Vec<String>,
}

#[derive(Clone)]
pub struct GoalService {
    db: DbPool,
}

impl GoalService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn create(&self, input: GoalCreateInput, registry: &CategoryRegistry) -> AppResult<Goal> {
        let goal = Goal::from_input(input, registry)?;
        let row = GoalRow::from_goal(&goal)?;
        self.db
            .with_connection(|conn| GoalRepository::insert(conn, &row))?;
        info!(target: "app::goals", goal_id = %goal.id, "goal created");
        Ok(goal)
    }

    pub fn get(&self, id: &str) -> AppResult<Goal> {
        self.db
            .with_connection(|conn| GoalRepository::find_by_id(conn, id))?
            .ok_or_else(AppError::not_found)?
            .into_goal()
    }

    pub fn list(&self) -> AppResult<Vec<Goal>> {
        let rows = self.db.with_connection(|conn| GoalRepository::list_all(conn))?;
        rows.into_iter().map(|row| row.into_goal()).collect()
    }

    pub fn update(
        &self,
        id: &str,
        update: GoalUpdateInput,
        registry: &CategoryRegistry,
    ) -> AppResult<Goal> {
        let mut goal = self.get(id)?;
        goal.apply_update(update, registry)?;
        let row = GoalRow::from_goal(&goal)?;
        self.db
            .with_connection(|conn| GoalRepository::update(conn, &row))?;
        info!(target: "app::goals", goal_id = %goal.id, status = %goal.status, "goal updated");
        Ok(goal)
    }

    pub fn delete(&self, id: &str) -> AppResult<()> {
        self.db
            .with_connection(|conn| GoalRepository::delete(conn, id))?;
        info!(target: "app::goals", goal_id = %id, "goal deleted");
        Ok(())
    }

    /// Phase one: recompute every goal against `activities` in memory.
    /// Returns each goal with its progress and whether it changed.
    pub fn apply_progress_locally(
        goals: Vec<Goal>,
        activities: &[ActivityRecord],
    ) -> AppResult<Vec<(GoalWithProgress, bool)>> {
        goals
            .into_iter()
            .map(|mut goal| {
                let earned = PointsAccounting::goal_window_points(&goal, activities)?;
                let mut by_category = PointsMap::new();
                by_category.insert(goal.category.clone(), earned);
                let progress = PointsAccounting::compute_goal_progress(&goal, &by_category);
                let changed = goal.apply_progress(&progress);
                Ok((GoalWithProgress { goal, progress }, changed))
            })
            .collect()
    }

    /// Phase two: write changed goals back. Each write is independent and a
    /// failure only affects that goal.
    pub fn reconcile(&self, goals: &[&Goal]) -> (usize, Vec<String>) {
        let mut persisted = 0;
        let mut failed = Vec::new();
        for goal in goals {
            let result = self.db.with_connection(|conn| {
                GoalRepository::update_progress(
                    conn,
                    &goal.id,
                    goal.current_value,
                    goal.status,
                    goal.updated_at,
                )
            });
            match result {
                Ok(true) => persisted += 1,
                Ok(false) => {
                    warn!(
                        target: "app::goals",
                        goal_id = %goal.id,
                        "goal disappeared before progress could be saved"
                    );
                    failed.push(goal.id.clone());
                }
                Err(err) => {
                    warn!(
                        target: "app::goals",
                        goal_id = %goal.id,
                        error = %err,
                        "goal progress sync failed"
                    );
                    failed.push(goal.id.clone());
                }
            }
        }
        (persisted, failed)
    }

    /// Recompute and persist goal progress. Running it twice on the same data
    /// changes nothing the second time.
    pub fn sync_goals(&self, activities: &[ActivityRecord]) -> AppResult<GoalSyncReport> {
        let goals = self.list()?;
        let applied = Self::apply_progress_locally(goals, activities)?;

        let changed: Vec<&Goal> = applied
            .iter()
            .filter(|(_, changed)| *changed)
            .map(|(entry, _)| &entry.goal)
            .collect();
        let changed_count = changed.len();
        let (persisted, failed) = self.reconcile(&changed);

        debug!(
            target: "app::goals",
            total = applied.len(),
            changed = changed_count,
            persisted,
            failed = failed.len(),
            "goal sync finished"
        );

        Ok(GoalSyncReport {
            goals: applied.into_iter().map(|(entry, _)| entry).collect(),
            changed: changed_count,
            persisted,
            failed,
        })
    }
}
