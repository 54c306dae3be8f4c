use std::collections::BTreeMap;

use chrono::NaiveDate;
use momentum_app_lib::commands::goal_commands::{goals_create, goals_list, goals_sync};
use momentum_app_lib::commands::points::{
    points_daily_cumulative, points_fetch, DailyCumulativeQuery, PointsQuery,
};
use momentum_app_lib::commands::recurring_commands::{
    recurring_delete, recurring_edit, recurring_get, recurring_list, recurring_materialize,
    recurring_occurrences, recurring_put, OccurrenceWindow, RecurringDeleteInput,
    RecurringEditInput, RecurringListFilter,
};
use momentum_app_lib::commands::settings::{settings_get, settings_update_categories};
use momentum_app_lib::commands::task::{
    tasks_create, tasks_delete, tasks_import_csv, tasks_list, tasks_toggle, TaskListFilters,
};
use momentum_app_lib::commands::AppState;
use momentum_app_lib::db::DbPool;
use momentum_app_lib::models::activity::ActivityCreateInput;
use momentum_app_lib::models::goal::{GoalCreateInput, GoalStatus, GoalTargetInput};
use momentum_app_lib::models::points::PointsSummary;
use momentum_app_lib::models::recurring::{
    DeleteScope, EditScope, RecurringRuleInput, TemplatePatch,
};
use momentum_app_lib::models::settings::CategorySettingsInput;
use serde_json::json;
use tempfile::TempDir;

fn init_state() -> (TempDir, AppState) {
    let dir = TempDir::new().expect("temp dir");
    let pool = DbPool::new(dir.path().join("commands.sqlite")).expect("db pool");
    let state = AppState::new(pool).expect("app state");
    (dir, state)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn task(name: &str, category: &str, points: i64, day: NaiveDate) -> ActivityCreateInput {
    ActivityCreateInput {
        name: name.into(),
        categories: vec![category.into()],
        points: BTreeMap::from([(category.to_string(), points)]),
        date: Some(day),
        ..Default::default()
    }
}

fn daily_rule(id: &str, start: &str) -> RecurringRuleInput {
    serde_json::from_value(json!({
        "id": id,
        "frequency": "daily",
        "startDate": start,
        "data": {"name": "Meditate", "categories": ["Mind"], "points": {"Mind": 1}}
    }))
    .expect("rule input")
}

#[tokio::test]
async fn unknown_category_is_a_validation_error() {
    let (_dir, state) = init_state();
    let result = tasks_create(&state, task("Paint", "Art", 2, date(2025, 1, 1))).await;
    let err = result.expect_err("unknown category");
    assert_eq!(err.code, "VALIDATION_ERROR");
    let details = err.details.expect("validation details");
    assert_eq!(details["category"], "Art");
    assert_eq!(details["allowed"].as_array().map(Vec::len), Some(5));
}

#[tokio::test]
async fn settings_update_changes_what_tasks_accept() {
    let (_dir, state) = init_state();
    let settings = settings_update_categories(
        &state,
        CategorySettingsInput {
            task_categories: Some(vec!["Art".into(), "Work".into()]),
            ..Default::default()
        },
    )
    .await
    .expect("update settings");
    assert_eq!(settings.task_categories.len(), 2);

    tasks_create(&state, task("Paint", "art", 2, date(2025, 1, 1)))
        .await
        .expect("art accepted");
    let err = tasks_create(&state, task("Run", "Health", 2, date(2025, 1, 1)))
        .await
        .expect_err("health removed");
    assert_eq!(err.code, "VALIDATION_ERROR");

    let fetched = settings_get(&state).await.expect("settings");
    assert_eq!(fetched.task_categories[0].as_str(), "Art");

    let err = settings_update_categories(
        &state,
        CategorySettingsInput {
            task_categories: Some((0..6).map(|i| format!("Cat {i}")).collect()),
            ..Default::default()
        },
    )
    .await
    .expect_err("over the cap");
    assert_eq!(err.code, "VALIDATION_ERROR");
}

#[tokio::test]
async fn points_fetch_merges_unsaved_recurring_instances() {
    let (_dir, state) = init_state();
    let created = tasks_create(&state, task("Plan", "Work", 4, date(2025, 3, 4)))
        .await
        .expect("create task");
    tasks_toggle(&state, created.id.clone())
        .await
        .expect("toggle");

    recurring_put(&state, daily_rule("meditate", "2025-03-01"))
        .await
        .expect("put rule");
    recurring_edit(
        &state,
        "meditate".into(),
        RecurringEditInput {
            scope: EditScope::Single,
            anchor_date: date(2025, 3, 3),
            patch: Default::default(),
            completed: Some(true),
            skip: false,
        },
    )
    .await
    .expect("complete one occurrence");

    let week = points_fetch(
        &state,
        PointsQuery {
            period: Some("week".into()),
            date: Some(date(2025, 3, 5)),
            ..Default::default()
        },
    )
    .await
    .expect("points");
    assert!(!week.degraded);
    assert_eq!(week.summary.total, 5);
    assert_eq!(week.summary.achievable_total, 11);

    let series = points_daily_cumulative(
        &state,
        DailyCumulativeQuery {
            from: date(2025, 3, 3),
            to: date(2025, 3, 4),
        },
    )
    .await
    .expect("series");
    let totals: Vec<i64> = series.series.series.iter().map(|d| d.total).collect();
    assert_eq!(totals, vec![1, 5]);

    tasks_delete(&state, created.id).await.expect("delete");
    let listed = tasks_list(&state, Some(TaskListFilters::default()))
        .await
        .expect("list");
    assert!(listed.is_empty());
}

#[tokio::test]
async fn recurring_commands_round_trip() {
    let (_dir, state) = init_state();
    recurring_put(&state, daily_rule("meditate", "2025-05-01"))
        .await
        .expect("put rule");
    let rule = recurring_get(&state, "meditate".into())
        .await
        .expect("get rule");
    assert_eq!(rule.interval, 1);

    let window = OccurrenceWindow {
        from: date(2025, 5, 1),
        to: date(2025, 5, 7),
    };
    recurring_edit(
        &state,
        "meditate".into(),
        RecurringEditInput {
            scope: EditScope::Single,
            anchor_date: date(2025, 5, 2),
            patch: Default::default(),
            completed: None,
            skip: true,
        },
    )
    .await
    .expect("skip");
    let occurrences = recurring_occurrences(&state, "meditate".into(), window)
        .await
        .expect("occurrences");
    assert_eq!(occurrences.len(), 7);
    assert!(occurrences[1].skipped);

    let report = recurring_materialize(&state, "meditate".into(), window)
        .await
        .expect("materialize");
    assert_eq!(report.records.len(), 6);

    let err = recurring_edit(
        &state,
        "meditate".into(),
        RecurringEditInput {
            scope: EditScope::Series,
            anchor_date: date(2025, 5, 3),
            patch: Default::default(),
            completed: Some(true),
            skip: false,
        },
    )
    .await
    .expect_err("completion on a series");
    assert_eq!(err.code, "VALIDATION_ERROR");

    let deleted = recurring_delete(
        &state,
        "meditate".into(),
        RecurringDeleteInput {
            scope: DeleteScope::IncludeMaterialized,
            as_of: Some(date(2025, 5, 5)),
        },
    )
    .await
    .expect("delete");
    assert_eq!(deleted.removed_activities, 3);

    let active = recurring_list(&state, None).await.expect("list");
    assert!(active.is_empty());
    let all = recurring_list(
        &state,
        Some(RecurringListFilter {
            include_inactive: true,
        }),
    )
    .await
    .expect("list all");
    assert_eq!(all.len(), 1);

    let err = recurring_get(&state, "missing".into())
        .await
        .expect_err("missing rule");
    assert_eq!(err.code, "NOT_FOUND");
}

#[tokio::test]
async fn goals_sync_through_commands() {
    let (_dir, state) = init_state();
    let goal = goals_create(
        &state,
        GoalCreateInput {
            name: "Focus".into(),
            category: "Work".into(),
            targets: vec![GoalTargetInput {
                category: "Work".into(),
                selected: true,
                points: json!("15"),
            }],
            start_date: None,
            target_date: Some(date(2025, 12, 31)),
        },
    )
    .await
    .expect("create goal");
    assert_eq!(goal.target_points(), Some(10));

    let created = tasks_create(&state, task("Ship", "Work", 10, date(2025, 2, 1)))
        .await
        .expect("task");
    tasks_toggle(&state, created.id).await.expect("toggle");

    let report = goals_sync(&state).await.expect("sync");
    assert_eq!(report.persisted, 1);

    let listed = goals_list(&state).await.expect("list goals");
    assert_eq!(listed[0].goal.status, GoalStatus::Completed);
    assert_eq!(listed[0].progress.progress, 100);

    let imported = tasks_import_csv(
        &state,
        "Name,Categories,Points,Status,Date\nFocus block,Work,2,done,2025-02-02\n".into(),
    )
    .await
    .expect("import");
    assert_eq!(imported.imported.len(), 1);
    assert!(imported.errors.is_empty());
}

fn complete_occurrence(day: NaiveDate) -> RecurringEditInput {
    RecurringEditInput {
        scope: EditScope::Single,
        anchor_date: day,
        patch: Default::default(),
        completed: Some(true),
        skip: false,
    }
}

async fn day_summary(state: &AppState, day: NaiveDate) -> PointsSummary {
    points_fetch(
        state,
        PointsQuery {
            period: Some("day".into()),
            date: Some(day),
            ..Default::default()
        },
    )
    .await
    .expect("day points")
    .summary
}

#[tokio::test]
async fn goal_progress_does_not_depend_on_the_viewed_period() {
    let (_dir, state) = init_state();
    recurring_put(&state, daily_rule("meditate", "2025-03-01"))
        .await
        .expect("put rule");
    for day in 1..=3 {
        recurring_edit(&state, "meditate".into(), complete_occurrence(date(2025, 3, day)))
            .await
            .expect("complete occurrence");
    }
    goals_create(
        &state,
        GoalCreateInput {
            name: "Calm March".into(),
            category: "Mind".into(),
            targets: vec![GoalTargetInput {
                category: "Mind".into(),
                selected: true,
                points: json!(10),
            }],
            start_date: Some(date(2025, 3, 1)),
            target_date: Some(date(2025, 3, 31)),
        },
    )
    .await
    .expect("create goal");

    let mut totals = Vec::new();
    for period in ["month", "day", "lifetime"] {
        let response = points_fetch(
            &state,
            PointsQuery {
                period: Some(period.into()),
                date: Some(date(2025, 3, 2)),
                sync_goals: true,
                ..Default::default()
            },
        )
        .await
        .expect("points with sync");
        assert!(!response.degraded);
        assert!(response.goals.is_some());
        totals.push(response.summary.total);

        let goals = goals_list(&state).await.expect("list goals");
        assert_eq!(goals[0].goal.current_value, 3, "after syncing from {period}");
    }
    // month, day, lifetime: the completed 03-03 counts for lifetime too.
    assert_eq!(totals, vec![3, 1, 3]);

    let report = goals_sync(&state).await.expect("sync");
    assert_eq!(report.changed, 0);
}

#[tokio::test]
async fn single_edit_and_delete_reach_materialized_instances() {
    let (_dir, state) = init_state();
    recurring_put(&state, daily_rule("meditate", "2025-03-01"))
        .await
        .expect("put rule");
    recurring_materialize(
        &state,
        "meditate".into(),
        OccurrenceWindow {
            from: date(2025, 3, 1),
            to: date(2025, 3, 2),
        },
    )
    .await
    .expect("materialize");

    let patch: TemplatePatch =
        serde_json::from_value(json!({"points": {"Mind": 7}})).expect("patch");
    recurring_edit(
        &state,
        "meditate".into(),
        RecurringEditInput {
            scope: EditScope::Single,
            anchor_date: date(2025, 3, 1),
            patch,
            completed: None,
            skip: false,
        },
    )
    .await
    .expect("single edit");
    assert_eq!(day_summary(&state, date(2025, 3, 1)).await.achievable_total, 7);

    tasks_delete(&state, "meditate:2025-03-02".into())
        .await
        .expect("delete instance");
    assert_eq!(day_summary(&state, date(2025, 3, 2)).await.achievable_total, 0);
    let occurrences = recurring_occurrences(
        &state,
        "meditate".into(),
        OccurrenceWindow {
            from: date(2025, 3, 2),
            to: date(2025, 3, 2),
        },
    )
    .await
    .expect("occurrences");
    assert!(occurrences[0].skipped);
}
