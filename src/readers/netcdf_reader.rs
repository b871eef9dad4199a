//! NetCDF input for the format normaliser.
//!
//! Only the reader itself needs libnetcdf; CF time-unit handling is plain
//! Rust and always compiled.

use crate::error::{ProcessingError, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::path::Path;

#[cfg(feature = "netcdf")]
pub use self::source::NetcdfSource;

/// Parse a CF `units` attribute such as `seconds since 1970-01-01` into the
/// size of one step in microseconds and the epoch.
pub fn parse_time_units(path: &Path, units: &str) -> Result<(i64, NaiveDateTime)> {
    let (step, base) = units.split_once(" since ").ok_or_else(|| {
        ProcessingError::invalid_format(path, format!("not a CF time unit: '{}'", units))
    })?;

    let micros_per_step = match step.trim().to_ascii_lowercase().as_str() {
        "microseconds" | "microsecond" => 1,
        "milliseconds" | "millisecond" => 1_000,
        "seconds" | "second" | "s" => 1_000_000,
        "minutes" | "minute" => 60_000_000,
        "hours" | "hour" | "h" => 3_600_000_000,
        "days" | "day" | "d" => 86_400_000_000,
        other => {
            return Err(ProcessingError::invalid_format(
                path,
                format!("unsupported time step '{}'", other),
            ))
        }
    };

    let base = base.trim().trim_end_matches('Z');
    let epoch = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(base, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(base, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| {
            ProcessingError::invalid_format(path, format!("unparseable time epoch '{}'", base))
        })?;

    Ok((micros_per_step, epoch))
}

/// Convert raw time offsets into datetimes at microsecond precision.
pub fn offsets_to_datetimes(
    path: &Path,
    offsets: &[f64],
    micros_per_step: i64,
    epoch: NaiveDateTime,
) -> Result<Vec<NaiveDateTime>> {
    offsets
        .iter()
        .map(|offset| {
            if !offset.is_finite() {
                return Err(ProcessingError::invalid_format(path, "non-finite time offset"));
            }
            let micros = (offset * micros_per_step as f64).round() as i64;
            Ok(epoch + Duration::microseconds(micros))
        })
        .collect()
}

#[cfg(feature = "netcdf")]
mod source {
    use super::{offsets_to_datetimes, parse_time_units};
    use crate::error::Result;
    use crate::models::{CoordinateValues, GridDataset, GridVariable};
    use crate::readers::GridSource;
    use netcdf::AttributeValue;
    use std::path::Path;
    use tracing::debug;

    /// Reads ERA5 NetCDF files through libnetcdf. Packed variables are
    /// unpacked with `scale_factor`/`add_offset`; fill values become NaN.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NetcdfSource;

    impl GridSource for NetcdfSource {
        fn read_dataset(&self, path: &Path) -> Result<GridDataset> {
            let file = netcdf::open(path)?;
            let mut dataset = GridDataset::new();

            for var in file.variables() {
                let name = var.name();
                let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();

                if dims.len() == 1 && dims[0] == name {
                    let raw = unpacked_values(&var)?;
                    let coord = match string_attribute(&var, "units") {
                        Some(units) if units.contains(" since ") => {
                            let (step, epoch) = parse_time_units(path, &units)?;
                            CoordinateValues::Time(offsets_to_datetimes(path, &raw, step, epoch)?)
                        }
                        _ => CoordinateValues::Numeric(raw),
                    };
                    dataset.coords.insert(name, coord);
                } else if dims.len() >= 2 {
                    let values = unpacked_values(&var)?;
                    let dim_refs: Vec<&str> = dims.iter().map(String::as_str).collect();
                    dataset.variables.push(GridVariable::new(name, &dim_refs, values));
                } else {
                    debug!(variable = %name, "Skipping auxiliary variable");
                }
            }

            file.close()?;
            Ok(dataset)
        }
    }

    fn unpacked_values(var: &netcdf::Variable) -> Result<Vec<f64>> {
        let mut values = var.get_values::<f64, _>(..)?;
        let fill = numeric_attribute(var, "_FillValue").or_else(|| numeric_attribute(var, "missing_value"));
        let scale = numeric_attribute(var, "scale_factor").unwrap_or(1.0);
        let offset = numeric_attribute(var, "add_offset").unwrap_or(0.0);

        for value in values.iter_mut() {
            if fill.is_some_and(|f| *value == f) {
                *value = f64::NAN;
            } else {
                *value = *value * scale + offset;
            }
        }
        Ok(values)
    }

    fn numeric_attribute(var: &netcdf::Variable, name: &str) -> Option<f64> {
        match var.attribute_value(name)?.ok()? {
            AttributeValue::Double(v) => Some(v),
            AttributeValue::Float(v) => Some(f64::from(v)),
            AttributeValue::Short(v) => Some(f64::from(v)),
            AttributeValue::Ushort(v) => Some(f64::from(v)),
            AttributeValue::Int(v) => Some(f64::from(v)),
            AttributeValue::Uint(v) => Some(f64::from(v)),
            AttributeValue::Longlong(v) => Some(v as f64),
            AttributeValue::Ulonglong(v) => Some(v as f64),
            AttributeValue::Schar(v) => Some(f64::from(v)),
            AttributeValue::Uchar(v) => Some(f64::from(v)),
            _ => None,
        }
    }

    fn string_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
        match var.attribute_value(name)?.ok()? {
            AttributeValue::Str(s) => Some(s),
            _ => None,
        }
    }
}
