use std::collections::BTreeMap;

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::category::Category;

/// Category to point value mapping. Ordered so that summaries serialize the
/// same way every time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointsMap(BTreeMap<Category, i64>);

impl PointsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: &Category) -> Option<i64> {
        self.0.get(category).copied()
    }

    pub fn insert(&mut self, category: Category, points: i64) -> Option<i64> {
        self.0.insert(category, points)
    }

    pub fn remove(&mut self, category: &Category) -> Option<i64> {
        self.0.remove(category)
    }

    pub fn contains(&self, category: &Category) -> bool {
        self.0.contains_key(category)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Category, i64)> {
        self.0.iter().map(|(category, points)| (category, *points))
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Add to a category, failing on overflow.
    pub fn accumulate(&mut self, category: &Category, points: i64) -> AppResult<()> {
        let slot = self.0.entry(category.clone()).or_insert(0);
        *slot = slot.checked_add(points).ok_or_else(|| {
            AppError::accounting(format!("points overflow in category {category}"))
        })?;
        Ok(())
    }

    pub fn total(&self) -> AppResult<i64> {
        self.0.values().try_fold(0i64, |acc, value| {
            acc.checked_add(*value)
                .ok_or_else(|| AppError::accounting("points total overflow"))
        })
    }
}

impl FromIterator<(Category, i64)> for PointsMap {
    fn from_iter<T: IntoIterator<Item = (Category, i64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Accounting window. Everything except `Lifetime` has inclusive date bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day(NaiveDate),
    /// Monday-anchored week.
    Week(NaiveDate),
    /// First day of the month.
    Month(NaiveDate),
    Range { from: NaiveDate, to: NaiveDate },
    Lifetime,
}

impl Period {
    pub fn day(date: NaiveDate) -> Self {
        Period::Day(date)
    }

    pub fn week_of(date: NaiveDate) -> Self {
        let offset = u64::from(date.weekday().num_days_from_monday());
        // The first representable week may start before NaiveDate::MIN.
        Period::Week(date.checked_sub_days(Days::new(offset)).unwrap_or(NaiveDate::MIN))
    }

    pub fn month_of(date: NaiveDate) -> Self {
        Period::Month(date.with_day(1).unwrap_or(date))
    }

    pub fn range(from: NaiveDate, to: NaiveDate) -> AppResult<Self> {
        if from > to {
            return Err(AppError::validation(format!(
                "Period start {from} is after its end {to}"
            )));
        }
        Ok(Period::Range { from, to })
    }

    /// Parse the `period` query of the points endpoint.
    pub fn parse(label: &str, date: Option<NaiveDate>) -> AppResult<Self> {
        let label = label.trim().to_lowercase();
        if label == "lifetime" {
            return Ok(Period::Lifetime);
        }
        let date = date.ok_or_else(|| {
            AppError::validation(format!("Period '{label}' requires a reference date"))
        })?;
        match label.as_str() {
            "day" | "daily" => Ok(Period::day(date)),
            "week" | "weekly" => Ok(Period::week_of(date)),
            "month" | "monthly" => Ok(Period::month_of(date)),
            other => Err(AppError::validation(format!("Unknown period: {other}"))),
        }
    }

    pub fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        match *self {
            Period::Day(date) => Some((date, date)),
            Period::Week(monday) => Some((
                monday,
                monday.checked_add_days(Days::new(6)).unwrap_or(NaiveDate::MAX),
            )),
            Period::Month(first) => {
                let last = first
                    .checked_add_months(Months::new(1))
                    .and_then(|next| next.pred_opt())
                    .unwrap_or(first);
                Some((first, last))
            }
            Period::Range { from, to } => Some((from, to)),
            Period::Lifetime => None,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        match self.bounds() {
            Some((from, to)) => from <= date && date <= to,
            None => true,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Period::Day(_) => "day",
            Period::Week(_) => "week",
            Period::Month(_) => "month",
            Period::Range { .. } => "range",
            Period::Lifetime => "lifetime",
        }
    }

    pub fn anchor_date(&self) -> Option<NaiveDate> {
        self.bounds().map(|(from, _)| from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsSummary {
    pub period: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub categories: PointsMap,
    pub total: i64,
    pub achievable_categories: PointsMap,
    pub achievable_total: i64,
    pub progress_percentage: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoints {
    pub date: NaiveDate,
    pub categories: PointsMap,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCumulativeSeries {
    pub series: Vec<DailyPoints>,
}
