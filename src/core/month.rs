//! Calendar month arithmetic for monthly panels.

use crate::error::{ForecastError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A calendar month, stored as months since January of year 0.
///
/// Months order chronologically and support integer offsets, which is all the
/// panel code needs. The text form is `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Month(i32);

impl Month {
    /// Create a month from a year and a 1-based month number.
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(ForecastError::InvalidParameter(format!(
                "month must be in 1..=12, got {month}"
            )));
        }
        Ok(Self(year * 12 + month as i32 - 1))
    }

    /// The month containing a calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.year() * 12 + date.month0() as i32)
    }

    /// Parse `YYYY-MM` (a trailing `-DD` is accepted and ignored).
    pub fn parse(text: &str) -> Result<Self> {
        let bad = || ForecastError::InvalidParameter(format!("invalid month '{text}'"));
        let mut parts = text.trim().split('-');
        let year: i32 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let month: u32 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        Self::new(year, month).map_err(|_| bad())
    }

    pub fn year(&self) -> i32 {
        self.0.div_euclid(12)
    }

    /// 1-based month of year.
    pub fn month(&self) -> u32 {
        self.0.rem_euclid(12) as u32 + 1
    }

    /// First day of the month.
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year(), self.month(), 1)
    }

    /// The month `n` months later (earlier for negative `n`).
    pub fn offset(&self, n: i32) -> Self {
        Self(self.0 + n)
    }

    /// The following month.
    pub fn succ(&self) -> Self {
        self.offset(1)
    }

    /// Signed number of months from `self` to `other`.
    pub fn months_until(&self, other: Month) -> i32 {
        other.0 - self.0
    }

    /// `count` consecutive months starting at `self`.
    pub fn range(&self, count: usize) -> Vec<Month> {
        (0..count as i32).map(|i| self.offset(i)).collect()
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl TryFrom<String> for Month {
    type Error = ForecastError;

    fn try_from(value: String) -> Result<Self> {
        Month::parse(&value)
    }
}

impl From<Month> for String {
    fn from(value: Month) -> Self {
        value.to_string()
    }
}
