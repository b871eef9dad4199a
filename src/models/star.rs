use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use clickhouse::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::utils::hash::location_hash;

/// Hour-resolution time surrogate key, `YYYYMMDDHH` read as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeKey(i64);

impl TimeKey {
    /// Minutes and seconds do not contribute: every timestamp within the same
    /// hour maps onto one key.
    pub fn from_datetime(ts: &NaiveDateTime) -> Self {
        let key = i64::from(ts.year()) * 1_000_000
            + i64::from(ts.month()) * 10_000
            + i64::from(ts.day()) * 100
            + i64::from(ts.hour());
        Self(key)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque 64-bit location surrogate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationKey(i64);

impl LocationKey {
    pub fn from_coordinates(latitude: f64, longitude: f64) -> Self {
        Self(location_hash(latitude, longitude))
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

/// Raw ERA5 values for one grid point after joining all sources, in source
/// units (K, Pa, m, m/s, fraction, W/m²).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawMeasurements {
    pub t2m: f64,
    pub d2m: f64,
    pub mx2t: f64,
    pub mn2t: f64,
    pub msl: f64,
    pub tp: f64,
    pub u10: f64,
    pub v10: f64,
    pub tcc: f64,
    pub avg_sdswrf: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinedObservation {
    pub time: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub raw: RawMeasurements,
}

/// The wide table row: keys, natural coordinates and converted facts.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedObservation {
    pub time: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub time_key: TimeKey,
    pub location_key: LocationKey,
    pub temperature_c: f64,
    pub dewpoint_c: f64,
    pub max_temp_c: f64,
    pub min_temp_c: f64,
    pub pressure_hpa: f64,
    pub precipitation_mm: f32,
    pub wind_speed_ms: f64,
    pub cloud_cover: f32,
    pub solar_radiation: f32,
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize, Validate)]
pub struct DimTimeRow {
    pub time_id: i64,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub timestamp: DateTime<Utc>,
    pub year: u16,
    #[validate(range(min = 1, max = 12))]
    pub month: u8,
    #[validate(range(min = 1, max = 31))]
    pub day: u8,
    #[validate(range(max = 23))]
    pub hour: u8,
    /// ISO weekday, 1 = Monday .. 7 = Sunday.
    #[validate(range(min = 1, max = 7))]
    pub day_of_week: u8,
    #[validate(range(min = 1, max = 4))]
    pub quarter: u8,
}

impl DimTimeRow {
    pub fn from_datetime(ts: &NaiveDateTime) -> Self {
        let month = ts.month() as u8;
        Self {
            time_id: TimeKey::from_datetime(ts).get(),
            timestamp: ts.and_utc(),
            year: ts.year() as u16,
            month,
            day: ts.day() as u8,
            hour: ts.hour() as u8,
            day_of_week: ts.weekday().number_from_monday() as u8,
            quarter: (month - 1) / 3 + 1,
        }
    }

    /// `yyyy-MM-dd HH:mm:ss`, the textual form consumers join on.
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize, Validate)]
pub struct DimLocationRow {
    pub location_id: i64,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 360.0))]
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct FactWeatherRow {
    pub time_id: i64,
    pub location_id: i64,
    pub temperature_c: f64,
    pub dewpoint_c: f64,
    pub max_temp_c: f64,
    pub min_temp_c: f64,
    pub pressure_hpa: f64,
    pub precipitation_mm: f32,
    pub wind_speed_ms: f64,
    pub cloud_cover: f32,
    pub solar_radiation: f32,
}

/// The three projected tables of one load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StarSchema {
    pub dim_time: Vec<DimTimeRow>,
    pub dim_location: Vec<DimLocationRow>,
    pub facts: Vec<FactWeatherRow>,
}

impl StarSchema {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Smallest and largest TimeKey referenced by the facts.
    pub fn time_key_range(&self) -> Option<(TimeKey, TimeKey)> {
        let min = self.facts.iter().map(|f| f.time_id).min()?;
        let max = self.facts.iter().map(|f| f.time_id).max()?;
        Some((TimeKey(min), TimeKey(max)))
    }
}
