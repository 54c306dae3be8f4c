use chrono::NaiveDate;
use momentum_app_lib::db::repositories::expense_repository::ExpenseRepository;
use momentum_app_lib::db::DbPool;
use momentum_app_lib::models::category::CategoryRegistry;
use momentum_app_lib::models::recurring::{
    DeleteScope, EditScope, MaterializedOccurrence, RecurringRuleInput, RulePayload,
    TemplatePatch,
};
use momentum_app_lib::services::activity_service::ActivityService;
use momentum_app_lib::services::recurrence::{ExpansionConfig, ScopedEditOutcome};
use momentum_app_lib::services::recurring_service::RecurringService;
use tempfile::{tempdir, TempDir};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn setup() -> (TempDir, DbPool) {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("recurring.sqlite")).expect("db pool");
    (dir, pool)
}

fn monthly_rule() -> RecurringRuleInput {
    serde_json::from_value(serde_json::json!({
        "id": "rent-review",
        "frequency": "monthly",
        "startDate": "2025-01-31",
        "data": {
            "name": "Budget review",
            "categories": ["Work"],
            "points": {"Work": 3}
        }
    }))
    .expect("rule input")
}

#[test]
fn month_end_rule_clamps_without_drifting() {
    let (_dir, pool) = setup();
    let service = RecurringService::new(pool);
    let registry = CategoryRegistry::default();
    service.put(monthly_rule(), &registry).expect("put rule");

    let dates: Vec<NaiveDate> = service
        .occurrences(
            "rent-review",
            date(2025, 1, 1),
            date(2025, 5, 31),
            &ExpansionConfig::default(),
        )
        .expect("occurrences")
        .into_iter()
        .map(|entry| entry.date)
        .collect();
    assert_eq!(
        dates,
        vec![
            date(2025, 1, 31),
            date(2025, 2, 28),
            date(2025, 3, 31),
            date(2025, 4, 30),
            date(2025, 5, 31),
        ]
    );
}

#[test]
fn distant_window_skips_ahead_with_correct_index() {
    let (_dir, pool) = setup();
    let service = RecurringService::new(pool);
    let registry = CategoryRegistry::default();
    let input: RecurringRuleInput = serde_json::from_value(serde_json::json!({
        "id": "stretch",
        "frequency": "daily",
        "startDate": "2020-01-01",
        "data": {"name": "Stretch", "categories": ["Health"], "points": {"Health": 1}}
    }))
    .expect("rule input");
    service.put(input, &registry).expect("put rule");

    let entries = service
        .occurrences(
            "stretch",
            date(2025, 1, 1),
            date(2025, 1, 3),
            &ExpansionConfig { max_iterations: 10 },
        )
        .expect("occurrences");
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].index, 1827);
    assert_eq!(entries[0].date, date(2025, 1, 1));
}

#[test]
fn scoped_edits_materialize_and_purge() {
    let (_dir, pool) = setup();
    let service = RecurringService::new(pool.clone());
    let activities = ActivityService::new(pool);
    let registry = CategoryRegistry::default();
    let config = ExpansionConfig::default();
    service.put(monthly_rule(), &registry).expect("put rule");

    let series = service
        .edit(
            "rent-review",
            TemplatePatch {
                points: Some([("Work".to_string(), 5)].into_iter().collect()),
                ..Default::default()
            },
            EditScope::Series,
            date(2025, 3, 31),
            &registry,
        )
        .expect("series edit");
    assert_eq!(
        series,
        ScopedEditOutcome::Series {
            effective_from: date(2025, 3, 31)
        }
    );

    let single = service
        .edit(
            "rent-review",
            TemplatePatch {
                name: Some("Quarter close".into()),
                ..Default::default()
            },
            EditScope::Single,
            date(2025, 4, 30),
            &registry,
        )
        .expect("single edit");
    assert!(matches!(single, ScopedEditOutcome::Single { .. }));

    assert!(service
        .edit(
            "rent-review",
            TemplatePatch {
                name: Some("Nope".into()),
                ..Default::default()
            },
            EditScope::Single,
            date(2025, 4, 29),
            &registry,
        )
        .is_err());

    let report = service
        .materialize(
            "rent-review",
            date(2025, 1, 1),
            date(2025, 5, 31),
            &registry,
            &config,
        )
        .expect("materialize");
    let tasks: Vec<_> = report
        .records
        .into_iter()
        .filter_map(MaterializedOccurrence::into_activity)
        .collect();
    assert_eq!(tasks.len(), 5);
    let work = momentum_app_lib::models::category::Category::new("Work").expect("category");
    assert_eq!(tasks[1].points.get(&work), Some(3));
    assert_eq!(tasks[2].points.get(&work), Some(5));
    assert_eq!(tasks[3].name, "Quarter close");
    assert_eq!(tasks[4].name, "Budget review");
    assert_eq!(activities.list().expect("list").len(), 5);

    let deletion = service
        .delete("rent-review", DeleteScope::IncludeMaterialized, date(2025, 4, 1))
        .expect("delete");
    assert_eq!(deletion.removed_activities, 2);
    assert_eq!(deletion.removed_overrides, 1);
    assert_eq!(deletion.deletion.ended_on, date(2025, 3, 31));

    let remaining = activities.list().expect("list");
    assert_eq!(remaining.len(), 3);
    assert!(remaining
        .iter()
        .all(|activity| activity.date.expect("dated") < date(2025, 4, 1)));

    let after = service
        .occurrences("rent-review", date(2025, 1, 1), date(2025, 12, 31), &config)
        .expect("occurrences");
    assert_eq!(after.len(), 3);
}

#[test]
fn expense_rule_materializes_into_expenses() {
    let (_dir, pool) = setup();
    let service = RecurringService::new(pool.clone());
    let registry = CategoryRegistry::default();
    let input: RecurringRuleInput = serde_json::from_value(serde_json::json!({
        "id": "lunch",
        "frequency": "weekly",
        "interval": 2,
        "startDate": "2025-03-03",
        "endDate": "2025-03-31",
        "data": {"amount": 12.5, "category": "food", "description": "Team lunch"}
    }))
    .expect("rule input");
    let rule = service.put(input, &registry).expect("put rule");
    let RulePayload::Expense(template) = &rule.data else {
        panic!("expected expense payload");
    };
    assert_eq!(template.category.as_str(), "Food");

    let report = service
        .materialize(
            "lunch",
            date(2025, 3, 1),
            date(2025, 4, 30),
            &registry,
            &ExpansionConfig::default(),
        )
        .expect("materialize");
    assert_eq!(report.records.len(), 3);

    let stored = pool
        .with_connection(|conn| ExpenseRepository::list_by_rule(conn, "lunch"))
        .expect("expenses");
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[2].date, "2025-03-31");
}
