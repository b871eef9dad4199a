use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ProcessingError, Result};
use crate::utils::constants::{ACCUM_FILE, AVG_FILE, INSTANT_FILE, MAX_FILE};
use crate::utils::hash::canonical_bits;

/// ERA5 splits a download by statistical processing type; each lands in its
/// own normalised file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Instant,
    Accumulated,
    Averaged,
    Maximum,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Instant,
        SourceKind::Accumulated,
        SourceKind::Averaged,
        SourceKind::Maximum,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            SourceKind::Instant => INSTANT_FILE,
            SourceKind::Accumulated => ACCUM_FILE,
            SourceKind::Averaged => AVG_FILE,
            SourceKind::Maximum => MAX_FILE,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceKind::Instant => "instant",
            SourceKind::Accumulated => "accum",
            SourceKind::Averaged => "avg",
            SourceKind::Maximum => "max",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Join key over (time, latitude, longitude). Coordinates compare by bit
/// pattern, so two grids only match when their coordinates are identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridKey {
    time_us: i64,
    lat_bits: u64,
    lon_bits: u64,
}

impl GridKey {
    pub fn new(time: &NaiveDateTime, latitude: f64, longitude: f64) -> Self {
        Self {
            time_us: time.and_utc().timestamp_micros(),
            lat_bits: canonical_bits(latitude),
            lon_bits: canonical_bits(longitude),
        }
    }
}

/// A flat table: key columns plus named measurement columns of equal length.
/// This is the in-memory shape of one normalised Parquet file.
#[derive(Debug, Clone, Default)]
pub struct GridTable {
    pub times: Vec<NaiveDateTime>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub variables: BTreeMap<String, Vec<f64>>,
}

impl GridTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn key(&self, row: usize) -> GridKey {
        GridKey::new(&self.times[row], self.latitudes[row], self.longitudes[row])
    }

    pub fn variable(&self, name: &str) -> Option<&[f64]> {
        self.variables.get(name).map(Vec::as_slice)
    }

    /// Append one row. Every row must carry the same set of variables.
    pub fn push_row(
        &mut self,
        time: NaiveDateTime,
        latitude: f64,
        longitude: f64,
        values: &[(&str, f64)],
    ) -> Result<()> {
        if !self.variables.is_empty() {
            if values.len() != self.variables.len() {
                return Err(ProcessingError::DataMerge(format!(
                    "row has {} variables, table has {}",
                    values.len(),
                    self.variables.len()
                )));
            }
            if let Some((name, _)) = values.iter().find(|(n, _)| !self.variables.contains_key(*n)) {
                return Err(ProcessingError::DataMerge(format!(
                    "variable '{}' is not present in earlier rows",
                    name
                )));
            }
        }
        for (name, value) in values {
            self.variables
                .entry((*name).to_string())
                .or_default()
                .push(*value);
        }
        self.times.push(time);
        self.latitudes.push(latitude);
        self.longitudes.push(longitude);
        Ok(())
    }

    /// Check that every column has the same length as the key columns.
    pub fn check_shape(&self) -> Result<()> {
        let rows = self.times.len();
        if self.latitudes.len() != rows || self.longitudes.len() != rows {
            return Err(ProcessingError::DataMerge(
                "key columns have mismatched lengths".to_string(),
            ));
        }
        for (name, column) in &self.variables {
            if column.len() != rows {
                return Err(ProcessingError::DataMerge(format!(
                    "column '{}' has {} rows, expected {}",
                    name,
                    column.len(),
                    rows
                )));
            }
        }
        Ok(())
    }
}

/// A normalised table tagged with the ERA5 step type it was produced from.
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub kind: SourceKind,
    pub table: GridTable,
}

impl SourceTable {
    pub fn new(kind: SourceKind, table: GridTable) -> Self {
        Self { kind, table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn midnight() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_grid_key_equality() {
        let t = midnight();
        assert_eq!(GridKey::new(&t, 45.0, 70.0), GridKey::new(&t, 45.0, 70.0));
        assert_eq!(GridKey::new(&t, -0.0, 70.0), GridKey::new(&t, 0.0, 70.0));
        assert_ne!(GridKey::new(&t, 45.0, 70.0), GridKey::new(&t, 45.0, 70.25));
    }

    #[test]
    fn test_push_row_rejects_ragged_variables() {
        let t = midnight();
        let mut table = GridTable::new();
        table.push_row(t, 45.0, 70.0, &[("tp", 0.001)]).unwrap();
        assert!(table.push_row(t, 45.0, 70.25, &[("tp", 0.0), ("e", 1.0)]).is_err());
        assert!(table.push_row(t, 45.0, 70.25, &[("e", 1.0)]).is_err());
        assert_eq!(table.len(), 1);
        assert!(table.check_shape().is_ok());
    }

    #[test]
    fn test_source_kind_file_names() {
        assert_eq!(
            SourceKind::Instant.file_name(),
            "data_stream-oper_stepType-instant.parquet"
        );
        assert_eq!(SourceKind::Maximum.to_string(), "max");
    }
}
