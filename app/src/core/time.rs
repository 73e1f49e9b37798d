use std::{
    fmt::Display,
    ops::{Add, Sub},
};

use chrono::{FixedOffset, NaiveTime, TimeDelta};
use tokio::task_local;

task_local! {
    pub static FIXED_NOW: DateTime;
}

//Japan has no daylight saving time, a fixed offset is exact
fn jst() -> FixedOffset {
    //+09:00 is always within the valid range of +-24h
    FixedOffset::east_opt(9 * 3600).unwrap()
}

/// Point in time, always represented in Japan Standard Time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DateTime {
    delegate: chrono::DateTime<FixedOffset>,
}

impl DateTime {
    fn new<T: chrono::TimeZone>(delegate: chrono::DateTime<T>) -> Self {
        Self {
            delegate: delegate.with_timezone(&jst()),
        }
    }

    pub fn now() -> Self {
        FIXED_NOW
            .try_with(|t| *t)
            .unwrap_or_else(|_| chrono::Utc::now().into())
    }

    pub fn from_iso(iso8601: &str) -> anyhow::Result<Self> {
        Ok(chrono::DateTime::parse_from_rfc3339(iso8601)?.into())
    }

    pub fn to_iso_string(&self) -> String {
        self.delegate.to_rfc3339()
    }

    pub fn start_of_day(&self) -> Self {
        let since_midnight = self.delegate.time().signed_duration_since(NaiveTime::MIN);
        Self::new(self.delegate - since_midnight)
    }

    pub fn on_prev_day(&self) -> Self {
        *self - TimeDelta::days(1)
    }

    pub fn hours_before(&self, hours: i64) -> Self {
        *self - TimeDelta::hours(hours)
    }
}

impl Display for DateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.delegate.to_rfc3339())
    }
}

impl Add<TimeDelta> for DateTime {
    type Output = DateTime;

    fn add(self, rhs: TimeDelta) -> Self::Output {
        Self::new(self.delegate + rhs)
    }
}

impl Sub<TimeDelta> for DateTime {
    type Output = DateTime;

    fn sub(self, rhs: TimeDelta) -> Self::Output {
        Self::new(self.delegate - rhs)
    }
}

impl<T: chrono::TimeZone> From<chrono::DateTime<T>> for DateTime {
    fn from(delegate: chrono::DateTime<T>) -> Self {
        Self::new(delegate)
    }
}
