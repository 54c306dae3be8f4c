use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::activity::{ActivityRecord, Completion};
use crate::models::category::Category;
use crate::models::goal::{Goal, GoalProgress, GoalStatus};
use crate::models::points::{DailyCumulativeSeries, DailyPoints, Period, PointsMap, PointsSummary};

/// Longest window accepted by `daily_cumulative`.
const MAX_SERIES_DAYS: i64 = 3_660;

/// Pure aggregation of activities and goals into points. Holds no state and
/// never reads the clock.
pub struct PointsAccounting;

impl PointsAccounting {
    pub fn summarize(activities: &[ActivityRecord], period: &Period) -> AppResult<PointsSummary> {
        let mut actual = PointsMap::new();
        let mut achievable = PointsMap::new();
        let mut included = 0usize;

        for activity in activities.iter().filter(|a| Self::in_period(a, period)) {
            included += 1;
            for (category, points) in activity.points.iter() {
                achievable.accumulate(category, Self::checked_points(activity, category, points)?)?;
                actual.accumulate(category, Self::earned_points(activity, points)?)?;
            }
        }

        let total = actual.total()?;
        let achievable_total = achievable.total()?;
        let progress_percentage = percentage(total, achievable_total)?;

        debug!(
            target: "app::points",
            period = period.label(),
            activities = included,
            total,
            achievable_total,
            "points summarized"
        );

        Ok(PointsSummary {
            period: period.label().to_string(),
            date: period.anchor_date(),
            categories: actual,
            total,
            achievable_categories: achievable,
            achievable_total,
            progress_percentage,
        })
    }

    /// Progress of a goal against points earned in its primary category.
    /// Falls back to the stored value when the map has no entry for it.
    pub fn compute_goal_progress(goal: &Goal, earned_by_category: &PointsMap) -> GoalProgress {
        let current_value = earned_by_category
            .get(&goal.category)
            .unwrap_or(goal.current_value);

        let Some(target_points) = goal.target_points() else {
            return GoalProgress {
                current_value,
                target_points: goal.points.get(&goal.category).unwrap_or(0),
                progress: 0,
                display_progress: 0,
                status: goal.status,
            };
        };

        let progress = ratio_percent(current_value, target_points);
        let status = match goal.status {
            GoalStatus::Active if progress >= 100 => GoalStatus::Completed,
            other => other,
        };

        GoalProgress {
            current_value,
            target_points,
            progress,
            display_progress: progress.clamp(0, 100) as u8,
            status,
        }
    }

    /// Points earned in the goal's primary category between its start date
    /// (open when unset) and its target date.
    pub fn goal_window_points(goal: &Goal, activities: &[ActivityRecord]) -> AppResult<i64> {
        let from = goal.start_date.unwrap_or(NaiveDate::MIN);
        let window = Period::range(from, goal.target_date)?;
        let summary = Self::summarize(activities, &window)?;
        Ok(summary.categories.get(&goal.category).unwrap_or(0))
    }

    pub fn daily_cumulative(
        activities: &[ActivityRecord],
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<DailyCumulativeSeries> {
        if from > to {
            return Err(AppError::validation(format!(
                "Series start {from} is after its end {to}"
            )));
        }
        let span = (to - from).num_days() + 1;
        if span > MAX_SERIES_DAYS {
            return Err(AppError::validation(format!(
                "Series window cannot exceed {MAX_SERIES_DAYS} days"
            )));
        }

        let mut by_day: BTreeMap<NaiveDate, Vec<&ActivityRecord>> = BTreeMap::new();
        for activity in activities {
            if let Some(date) = activity.date.filter(|date| *date >= from && *date <= to) {
                by_day.entry(date).or_default().push(activity);
            }
        }

        let mut running = PointsMap::new();
        let mut series = Vec::with_capacity(span as usize);
        let mut day = from;
        loop {
            for activity in by_day.get(&day).into_iter().flatten() {
                for (category, points) in activity.points.iter() {
                    Self::checked_points(activity, category, points)?;
                    running.accumulate(category, Self::earned_points(activity, points)?)?;
                }
            }
            series.push(DailyPoints {
                date: day,
                categories: running.clone(),
                total: running.total()?,
            });
            if day >= to {
                break;
            }
            day = match day.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        debug!(
            target: "app::points",
            from = %from,
            to = %to,
            days = series.len(),
            "daily cumulative series built"
        );
        Ok(DailyCumulativeSeries { series })
    }

    fn in_period(activity: &ActivityRecord, period: &Period) -> bool {
        match period {
            Period::Lifetime => true,
            _ => activity.date.map(|date| period.contains(date)).unwrap_or(false),
        }
    }

    fn checked_points(activity: &ActivityRecord, category: &Category, points: i64) -> AppResult<i64> {
        if points < 0 {
            return Err(AppError::accounting(format!(
                "activity {} carries negative points for {category}",
                activity.id
            )));
        }
        Ok(points)
    }

    /// Points an activity has actually earned out of `points`. Unfinished
    /// progress tasks earn their completed fraction, rounded half away from
    /// zero.
    fn earned_points(activity: &ActivityRecord, points: i64) -> AppResult<i64> {
        if activity.is_completed() {
            return Ok(points);
        }
        match &activity.completion {
            Completion::Binary { .. } => Ok(0),
            Completion::Progress {
                current_value,
                target_value,
                ..
            } => {
                if *target_value <= 0.0 {
                    return Ok(0);
                }
                let earned = (current_value / target_value * points as f64).round();
                if !earned.is_finite() || earned < 0.0 {
                    return Err(AppError::accounting(format!(
                        "activity {} has an invalid progress value",
                        activity.id
                    )));
                }
                Ok((earned as i64).min(points))
            }
        }
    }
}

fn percentage(part: i64, whole: i64) -> AppResult<i64> {
    if whole <= 0 {
        return Ok(0);
    }
    let value = (part as f64 * 100.0 / whole as f64).round();
    if !value.is_finite() {
        return Err(AppError::accounting("progress percentage is not finite"));
    }
    Ok(value as i64)
}

fn ratio_percent(current: i64, target: i64) -> i64 {
    (current as f64 * 100.0 / target as f64).round() as i64
}
