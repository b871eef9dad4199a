use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ProcessingError, Result};
use crate::models::TimeKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Daily,
    Monthly,
}

/// The span of hourly observations one pipeline run processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadWindow {
    kind: WindowKind,
    start: NaiveDate,
}

impl LoadWindow {
    pub fn daily(date: NaiveDate) -> Self {
        Self {
            kind: WindowKind::Daily,
            start: date,
        }
    }

    pub fn monthly(year: i32, month: u32) -> Result<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            ProcessingError::Config(format!("Invalid month: {}-{:02}", year, month))
        })?;
        Ok(Self {
            kind: WindowKind::Monthly,
            start,
        })
    }

    /// Daily window `lag_days` before `today`. ERA5 lags real time by ~5 days.
    pub fn lagged(today: NaiveDate, lag_days: u32) -> Self {
        Self::daily(today - Duration::days(i64::from(lag_days)))
    }

    /// Parse `YYYY-MM` (or `YYYY_MM`) into a monthly window.
    pub fn parse_month(value: &str) -> Result<Self> {
        let invalid = || ProcessingError::Config(format!("Expected YYYY-MM, got '{}'", value));
        let (year, month) = value
            .split_once(['-', '_'])
            .ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::monthly(year, month)
    }

    /// Every monthly window from `from` to `to`, inclusive.
    pub fn months_between(from: LoadWindow, to: LoadWindow) -> Result<Vec<LoadWindow>> {
        if from.start > to.start {
            return Err(ProcessingError::Config(format!(
                "Backfill range is reversed: {} > {}",
                from, to
            )));
        }
        let mut windows = Vec::new();
        let mut current = Self::monthly(from.start.year(), from.start.month())?;
        while current.start <= to.start {
            windows.push(current);
            current = Self {
                kind: WindowKind::Monthly,
                start: current.end_exclusive(),
            };
        }
        Ok(windows)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// First day after the window.
    pub fn end_exclusive(&self) -> NaiveDate {
        match self.kind {
            WindowKind::Daily => self.start + Duration::days(1),
            WindowKind::Monthly => {
                let (year, month) = if self.start.month() == 12 {
                    (self.start.year() + 1, 1)
                } else {
                    (self.start.year(), self.start.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MAX)
            }
        }
    }

    pub fn first_hour(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    pub fn last_hour(&self) -> NaiveDateTime {
        self.end_exclusive().and_time(NaiveTime::MIN) - Duration::hours(1)
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        timestamp.date() >= self.start && timestamp.date() < self.end_exclusive()
    }

    /// Inclusive TimeKey bounds covering every hour of the window.
    pub fn time_key_range(&self) -> (TimeKey, TimeKey) {
        (
            TimeKey::from_datetime(&self.first_hour()),
            TimeKey::from_datetime(&self.last_hour()),
        )
    }

    /// Directory label: `2024-01-01` for days, `2024_01` for months.
    pub fn label(&self) -> String {
        match self.kind {
            WindowKind::Daily => self.start.format("%Y-%m-%d").to_string(),
            WindowKind::Monthly => self.start.format("%Y_%m").to_string(),
        }
    }
}

impl fmt::Display for LoadWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
