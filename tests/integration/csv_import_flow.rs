use chrono::NaiveDate;
use momentum_app_lib::db::DbPool;
use momentum_app_lib::models::category::CategoryRegistry;
use momentum_app_lib::models::points::Period;
use momentum_app_lib::services::activity_service::ActivityService;
use momentum_app_lib::services::points_accounting::PointsAccounting;
use tempfile::tempdir;

const EXPORT: &str = "\
Task,Category,Points,Status,Date,Notes,Duration
Morning run,Health,3,Completed,01-Sep-2025,,45
Sketching,Art,2,Pending,01/09/2025,,
Read chapter,Mind|Spirit,\"Mind:2; Spirit:1\",pending,2025-09-02,\"notes, with comma\",
,Work,1,pending,2025-09-02,,
Ship release,Work,5,done,31/02/2025,,
Retro,Work,2,done,,,
";

#[test]
fn import_keeps_valid_rows_and_reports_the_rest() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("import.sqlite")).expect("db pool");
    let service = ActivityService::new(pool);
    let registry = CategoryRegistry::default();

    let report = service.import_csv(EXPORT, &registry).expect("import");
    let names: Vec<&str> = report.imported.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Morning run", "Read chapter", "Retro"]);
    let rejected: Vec<usize> = report.errors.iter().map(|e| e.line).collect();
    assert_eq!(rejected, vec![3, 5, 6]);

    let stored = service.list().expect("list");
    assert_eq!(stored.len(), 3);
    let read = stored
        .iter()
        .find(|a| a.name == "Read chapter")
        .expect("read chapter stored");
    assert_eq!(read.date, NaiveDate::from_ymd_opt(2025, 9, 2));
    assert_eq!(read.description.as_deref(), Some("notes, with comma"));

    let lifetime = PointsAccounting::summarize(&stored, &Period::Lifetime).expect("summary");
    assert_eq!(lifetime.total, 5);
    assert_eq!(lifetime.achievable_total, 8);
}

#[test]
fn malformed_header_rejects_whole_file() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("header.sqlite")).expect("db pool");
    let service = ActivityService::new(pool);
    let registry = CategoryRegistry::default();

    let result = service.import_csv("Points,Date\n3,2025-01-01\n", &registry);
    assert!(result.is_err());
    assert!(service.list().expect("list").is_empty());
}
