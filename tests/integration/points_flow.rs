use std::collections::BTreeMap;

use chrono::NaiveDate;
use momentum_app_lib::db::DbPool;
use momentum_app_lib::models::activity::{ActivityCreateInput, ActivityStatus};
use momentum_app_lib::models::category::{Category, CategoryRegistry};
use momentum_app_lib::models::points::Period;
use momentum_app_lib::services::activity_service::ActivityService;
use momentum_app_lib::services::points_accounting::PointsAccounting;
use tempfile::tempdir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn activity(
    name: &str,
    points: &[(&str, i64)],
    date: Option<NaiveDate>,
    status: ActivityStatus,
) -> ActivityCreateInput {
    ActivityCreateInput {
        name: name.into(),
        categories: points.iter().map(|(c, _)| c.to_string()).collect(),
        points: points
            .iter()
            .map(|(c, p)| (c.to_string(), *p))
            .collect::<BTreeMap<_, _>>(),
        date,
        status: Some(status),
        ..Default::default()
    }
}

#[test]
fn week_and_lifetime_summaries_follow_completion() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("points.sqlite")).expect("db pool");
    let service = ActivityService::new(pool);
    let registry = CategoryRegistry::default();

    service
        .create(
            activity(
                "Deep work",
                &[("work", 4), ("Mind", 2)],
                Some(date(2025, 8, 25)),
                ActivityStatus::Completed,
            ),
            &registry,
        )
        .expect("create deep work");
    let walk = service
        .create(
            activity(
                "Walk",
                &[("Health", 3)],
                Some(date(2025, 8, 26)),
                ActivityStatus::Pending,
            ),
            &registry,
        )
        .expect("create walk");
    service
        .create(
            ActivityCreateInput {
                current_value: Some(3.0),
                target_value: Some(10.0),
                unit: Some("sets".into()),
                ..activity(
                    "Push-ups",
                    &[("Strength", 10)],
                    Some(date(2025, 8, 27)),
                    ActivityStatus::Pending,
                )
            },
            &registry,
        )
        .expect("create push-ups");
    service
        .create(
            activity("Retreat", &[("Spirit", 5)], None, ActivityStatus::Completed),
            &registry,
        )
        .expect("create retreat");

    let activities = service.list().expect("list");
    let week = PointsAccounting::summarize(&activities, &Period::week_of(date(2025, 8, 27)))
        .expect("week summary");
    assert_eq!(week.period, "week");
    assert_eq!(week.date, Some(date(2025, 8, 25)));
    assert_eq!(week.total, 9);
    assert_eq!(week.achievable_total, 19);
    assert_eq!(week.progress_percentage, 47);
    let strength = Category::new("Strength").expect("category");
    assert_eq!(week.categories.get(&strength), Some(3));

    let lifetime = PointsAccounting::summarize(&activities, &Period::Lifetime).expect("lifetime");
    assert_eq!(lifetime.total, 14);
    assert_eq!(lifetime.achievable_total, 24);
    assert_eq!(lifetime.progress_percentage, 58);

    service.toggle(&walk.id).expect("toggle walk");
    let activities = service.list().expect("list");
    let week = PointsAccounting::summarize(&activities, &Period::week_of(date(2025, 8, 27)))
        .expect("week summary");
    assert_eq!(week.total, 12);
    assert_eq!(week.progress_percentage, 63);
}

#[test]
fn empty_window_has_zero_progress() {
    let summary = PointsAccounting::summarize(&[], &Period::day(date(2025, 1, 1))).expect("summary");
    assert_eq!(summary.total, 0);
    assert_eq!(summary.achievable_total, 0);
    assert_eq!(summary.progress_percentage, 0);
}

#[test]
fn daily_cumulative_carries_running_totals() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("series.sqlite")).expect("db pool");
    let service = ActivityService::new(pool);
    let registry = CategoryRegistry::default();

    for (name, points, day) in [
        ("Plan", 4, date(2025, 8, 25)),
        ("Review", 2, date(2025, 8, 27)),
    ] {
        service
            .create(
                activity(name, &[("Work", points)], Some(day), ActivityStatus::Completed),
                &registry,
            )
            .expect("create activity");
    }

    let activities = service.list().expect("list");
    let series =
        PointsAccounting::daily_cumulative(&activities, date(2025, 8, 24), date(2025, 8, 27))
            .expect("series");
    let totals: Vec<i64> = series.series.iter().map(|day| day.total).collect();
    assert_eq!(totals, vec![0, 4, 4, 6]);
    assert_eq!(series.series[0].date, date(2025, 8, 24));
}
