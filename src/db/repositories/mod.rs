use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AppError, AppResult};

pub mod activity_repository;
pub mod expense_repository;
pub mod goal_repository;
pub mod recurring_repository;
pub mod settings_repository;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|err| AppError::database(format!("stored date '{raw}' is invalid: {err}")))
}

pub(crate) fn parse_optional_date(raw: Option<String>) -> AppResult<Option<NaiveDate>> {
    match raw {
        Some(value) if !value.is_empty() => parse_date(&value).map(Some),
        _ => Ok(None),
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> AppResult<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned + Default>(raw: Option<String>) -> AppResult<T> {
    match raw {
        Some(value) if !value.is_empty() => Ok(serde_json::from_str(&value)?),
        _ => Ok(T::default()),
    }
}
