use std::collections::BTreeMap;

use chrono::NaiveDate;
use momentum_app_lib::db::DbPool;
use momentum_app_lib::models::activity::{ActivityCreateInput, ActivityStatus};
use momentum_app_lib::models::category::CategoryRegistry;
use momentum_app_lib::models::goal::{
    GoalCreateInput, GoalStatus, GoalTargetInput, GoalUpdateInput,
};
use momentum_app_lib::services::activity_service::ActivityService;
use momentum_app_lib::services::goal_service::GoalService;
use serde_json::json;
use tempfile::tempdir;

fn strength_session(points: i64, day: u32) -> ActivityCreateInput {
    ActivityCreateInput {
        name: format!("Session {day}"),
        categories: vec!["Strength".into()],
        points: BTreeMap::from([("Strength".to_string(), points)]),
        date: NaiveDate::from_ymd_opt(2025, 6, day),
        status: Some(ActivityStatus::Completed),
        ..Default::default()
    }
}

fn strength_goal(name: &str) -> GoalCreateInput {
    GoalCreateInput {
        name: name.into(),
        category: "strength".into(),
        targets: vec![
            GoalTargetInput {
                category: "Strength".into(),
                selected: true,
                points: json!(10),
            },
            GoalTargetInput {
                category: "Mind".into(),
                selected: false,
                points: json!(4),
            },
        ],
        start_date: NaiveDate::from_ymd_opt(2025, 6, 1),
        target_date: NaiveDate::from_ymd_opt(2025, 6, 30),
    }
}

#[test]
fn goals_progress_to_completion_and_stay_there() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("goals.sqlite")).expect("db pool");
    let activities = ActivityService::new(pool.clone());
    let goals = GoalService::new(pool);
    let registry = CategoryRegistry::default();

    let goal = goals
        .create(strength_goal("Get strong"), &registry)
        .expect("create goal");
    assert_eq!(goal.points.len(), 1);
    assert_eq!(goal.category.as_str(), "Strength");

    activities
        .create(strength_session(6, 2), &registry)
        .expect("first session");
    let report = goals
        .sync_goals(&activities.list().expect("list"))
        .expect("sync");
    assert_eq!(report.changed, 1);
    assert_eq!(report.goals[0].progress.progress, 60);
    assert_eq!(report.goals[0].goal.status, GoalStatus::Active);

    let second = activities
        .create(strength_session(5, 3), &registry)
        .expect("second session");
    let report = goals
        .sync_goals(&activities.list().expect("list"))
        .expect("sync");
    assert_eq!(report.goals[0].progress.progress, 110);
    assert_eq!(report.goals[0].progress.display_progress, 100);
    assert_eq!(
        goals.get(&goal.id).expect("stored goal").status,
        GoalStatus::Completed
    );

    let again = goals
        .sync_goals(&activities.list().expect("list"))
        .expect("sync");
    assert_eq!(again.changed, 0);
    assert!(again.failed.is_empty());

    activities.delete(&second.id).expect("delete session");
    goals
        .sync_goals(&activities.list().expect("list"))
        .expect("sync");
    let stored = goals.get(&goal.id).expect("stored goal");
    assert_eq!(stored.current_value, 6);
    assert_eq!(stored.status, GoalStatus::Completed);
}

#[test]
fn activities_outside_goal_window_do_not_count() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("window.sqlite")).expect("db pool");
    let activities = ActivityService::new(pool.clone());
    let goals = GoalService::new(pool);
    let registry = CategoryRegistry::default();

    let goal = goals
        .create(strength_goal("June only"), &registry)
        .expect("create goal");
    activities
        .create(
            ActivityCreateInput {
                date: NaiveDate::from_ymd_opt(2025, 7, 1),
                ..strength_session(9, 1)
            },
            &registry,
        )
        .expect("july session");

    let report = goals
        .sync_goals(&activities.list().expect("list"))
        .expect("sync");
    assert_eq!(report.changed, 0);
    assert_eq!(goals.get(&goal.id).expect("goal").current_value, 0);
}

#[test]
fn abandoned_goals_ignore_progress() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("abandon.sqlite")).expect("db pool");
    let activities = ActivityService::new(pool.clone());
    let goals = GoalService::new(pool);
    let registry = CategoryRegistry::default();

    let goal = goals
        .create(strength_goal("Maybe later"), &registry)
        .expect("create goal");
    goals
        .update(
            &goal.id,
            GoalUpdateInput {
                status: Some(GoalStatus::Abandoned),
                ..Default::default()
            },
            &registry,
        )
        .expect("abandon");

    activities
        .create(strength_session(10, 5), &registry)
        .expect("session");
    goals
        .sync_goals(&activities.list().expect("list"))
        .expect("sync");
    let stored = goals.get(&goal.id).expect("goal");
    assert_eq!(stored.status, GoalStatus::Abandoned);
    assert_eq!(stored.current_value, 10);
}
