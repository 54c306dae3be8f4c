pub mod activity_service;
pub mod csv_import;
pub mod goal_service;
pub mod points_accounting;
pub mod recurrence;
pub mod recurring_service;
pub mod settings_service;
