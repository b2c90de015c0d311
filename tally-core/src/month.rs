use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

const MONTH_ABBR: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Totally-ordered encoding of a calendar (year, month) pair.
///
/// The code is `year * 12 + month` with months numbered from 1, so `+1`
/// arithmetic carries across year boundaries and ranges of months are plain
/// integer ranges. Usage lines and exchange rates are keyed by this value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonthKey(i32);

impl MonthKey {
    /// Build a key from a calendar year and a 1-based month number.
    pub const fn new(year: i32, month: u32) -> Self {
        debug_assert!(month >= 1 && month <= 12);
        Self(year * 12 + month as i32)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month())
    }

    pub const fn from_code(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub const fn year(self) -> i32 {
        (self.0 - 1).div_euclid(12)
    }

    /// 1-based month number, e.g. Jan = 1.
    pub const fn month(self) -> u32 {
        (self.0 - self.year() * 12) as u32
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn first_day(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year(), self.month(), 1)
            .expect("month key always holds a valid calendar month")
    }

    pub fn last_day(self) -> NaiveDate {
        self.next()
            .first_day()
            .pred_opt()
            .expect("previous day of a first-of-month always exists")
    }

    /// Inclusive iterator over every month from `start` to `end`.
    pub fn range(start: MonthKey, end: MonthKey) -> impl Iterator<Item = MonthKey> {
        (start.0..=end.0).map(MonthKey)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", MONTH_ABBR[self.month() as usize - 1], self.year())
    }
}
