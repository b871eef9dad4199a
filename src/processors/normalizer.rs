use crate::error::{ProcessingError, Result};
use crate::models::{CoordinateValues, GridDataset, GridTable, GridVariable};
use crate::readers::GridSource;
use crate::utils::constants::{
    ENSEMBLE_DIM, EXPVER_DIM, EXPVER_FINAL, EXPVER_PRELIMINARY, LATITUDE_COLUMN,
    LONGITUDE_COLUMN, RAW_TIME_COLUMN, TIME_COLUMN,
};
use crate::utils::filename::{is_raw_file, normalised_path};
use crate::utils::progress::ProgressReporter;
use crate::writers::ParquetWriter;
use chrono::SubsecRound;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Outcome of normalising one directory of raw files.
#[derive(Debug, Default, Clone, Serialize)]
pub struct NormalizeReport {
    pub converted: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub rows_written: usize,
}

impl NormalizeReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} converted ({} rows), {} skipped, {} failed",
            self.converted.len(),
            self.rows_written,
            self.skipped.len(),
            self.failed.len()
        )
    }
}

/// Converts raw gridded files into flat Parquet tables, one per input.
pub struct Normalizer {
    writer: ParquetWriter,
}

impl Normalizer {
    pub fn new(writer: ParquetWriter) -> Self {
        Self { writer }
    }

    /// Normalise every raw file in `dir`. A file that fails is logged and
    /// left in place; the remaining files are still processed.
    pub fn normalize_dir(
        &self,
        dir: &Path,
        source: &dyn GridSource,
        progress: Option<&ProgressReporter>,
    ) -> Result<NormalizeReport> {
        let mut inputs: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_raw_file(path))
            .collect();
        inputs.sort();

        let mut report = NormalizeReport::default();
        if inputs.is_empty() {
            warn!(dir = %dir.display(), "No raw files to normalise");
            return Ok(report);
        }

        for input in inputs {
            if let Some(p) = progress {
                p.set_message(&format!("Normalising {}", input.display()));
            }

            let output = normalised_path(&input);
            if output.exists() {
                debug!(file = %input.display(), "Output already present, skipping");
                report.skipped.push(input);
                continue;
            }

            match self.normalize_file(&input, &output, source) {
                Ok(rows) => {
                    info!(file = %input.display(), rows, "Normalised");
                    report.rows_written += rows;
                    report.converted.push(input);
                }
                Err(e) => {
                    error!(file = %input.display(), error = %e, "Failed to normalise");
                    report.failed.push((input, e.to_string()));
                }
            }

            if let Some(p) = progress {
                p.increment(1);
            }
        }

        Ok(report)
    }

    /// Convert one file and return the number of rows written. The source
    /// is removed only after the output has been closed.
    pub fn normalize_file(
        &self,
        input: &Path,
        output: &Path,
        source: &dyn GridSource,
    ) -> Result<usize> {
        let dataset = source.read_dataset(input)?;
        let dataset = resolve_expver(dataset, input)?;
        let dataset = drop_ensemble(dataset, input)?;
        let table = flatten(&dataset, input)?;

        self.writer.write_grid_table(&table, output)?;

        if let Err(e) = fs::remove_file(input) {
            warn!(file = %input.display(), error = %e, "Could not delete source file");
        }
        Ok(table.len())
    }
}

/// Collapse the `expver` dimension: take the final data version and fill
/// its gaps from the preliminary one. A scalar `expver` coordinate is
/// simply dropped.
pub fn resolve_expver(mut dataset: GridDataset, path: &Path) -> Result<GridDataset> {
    let Some(coord) = dataset.coords.remove(EXPVER_DIM) else {
        return Ok(dataset);
    };
    if !dataset.has_dim(EXPVER_DIM) {
        debug!(file = %path.display(), "Dropping scalar expver coordinate");
        return Ok(dataset);
    }

    let versions = match coord {
        CoordinateValues::Numeric(v) => v,
        CoordinateValues::Time(_) => {
            return Err(ProcessingError::invalid_format(path, "expver is not numeric"))
        }
    };
    let final_idx = versions.iter().position(|v| *v == f64::from(EXPVER_FINAL));
    let prelim_idx = versions
        .iter()
        .position(|v| *v == f64::from(EXPVER_PRELIMINARY));

    let (primary, fallback) = match (final_idx, prelim_idx) {
        (Some(f), p) => (f, p),
        (None, Some(p)) => (p, None),
        (None, None) if !versions.is_empty() => {
            warn!(file = %path.display(), ?versions, "No known expver, using the first");
            (0, None)
        }
        (None, None) => return Err(ProcessingError::invalid_format(path, "empty expver")),
    };
    let len = versions.len();

    for variable in dataset.variables.iter_mut() {
        let Some(axis) = variable.dim_position(EXPVER_DIM) else {
            continue;
        };
        let shape = shape_with(&dataset.coords, variable, EXPVER_DIM, len, path)?;
        let mut values = select_along(&variable.values, &shape, axis, primary);
        if let Some(fb) = fallback {
            let backup = select_along(&variable.values, &shape, axis, fb);
            for (value, spare) in values.iter_mut().zip(backup) {
                if value.is_nan() {
                    *value = spare;
                }
            }
        }
        variable.values = values;
        variable.dims.remove(axis);
    }

    Ok(dataset)
}

/// Remove a length-one ensemble `number` dimension or coordinate.
pub fn drop_ensemble(mut dataset: GridDataset, path: &Path) -> Result<GridDataset> {
    let Some(coord) = dataset.coords.remove(ENSEMBLE_DIM) else {
        return Ok(dataset);
    };
    let len = coord.len();
    if !dataset.has_dim(ENSEMBLE_DIM) {
        return Ok(dataset);
    }
    if len != 1 {
        return Err(ProcessingError::invalid_format(
            path,
            format!("ensemble dimension has {} members, expected 1", len),
        ));
    }

    for variable in dataset.variables.iter_mut() {
        if let Some(axis) = variable.dim_position(ENSEMBLE_DIM) {
            variable.dims.remove(axis);
        }
    }
    Ok(dataset)
}

/// One row per (time, latitude, longitude), time-major. The time axis may
/// be called `valid_time` or `time`; it always comes out as `time`.
pub fn flatten(dataset: &GridDataset, path: &Path) -> Result<GridTable> {
    let time_name = if dataset.coords.contains_key(RAW_TIME_COLUMN) {
        RAW_TIME_COLUMN
    } else {
        TIME_COLUMN
    };

    let times = match dataset.coords.get(time_name) {
        Some(CoordinateValues::Time(t)) => t,
        Some(_) => {
            return Err(ProcessingError::invalid_format(
                path,
                format!("'{}' is not a time coordinate", time_name),
            ))
        }
        None => return Err(ProcessingError::invalid_format(path, "no time coordinate")),
    };
    let latitudes = numeric_coord(dataset, LATITUDE_COLUMN, path)?;
    let longitudes = numeric_coord(dataset, LONGITUDE_COLUMN, path)?;

    let expected_dims = [time_name, LATITUDE_COLUMN, LONGITUDE_COLUMN];
    let rows = times.len() * latitudes.len() * longitudes.len();

    let mut table = GridTable::new();
    for variable in &dataset.variables {
        if variable.dims != expected_dims {
            return Err(ProcessingError::invalid_format(
                path,
                format!(
                    "variable '{}' has dimensions {:?}, expected {:?}",
                    variable.name, variable.dims, expected_dims
                ),
            ));
        }
        if variable.values.len() != rows {
            return Err(ProcessingError::invalid_format(
                path,
                format!(
                    "variable '{}' has {} values for a {}-cell grid",
                    variable.name,
                    variable.values.len(),
                    rows
                ),
            ));
        }
        table
            .variables
            .insert(variable.name.clone(), variable.values.clone());
    }
    if table.variables.is_empty() {
        return Err(ProcessingError::invalid_format(path, "no data variables"));
    }

    table.times.reserve(rows);
    table.latitudes.reserve(rows);
    table.longitudes.reserve(rows);
    for time in times {
        let time = time.trunc_subsecs(6);
        for lat in latitudes {
            for lon in longitudes {
                table.times.push(time);
                table.latitudes.push(*lat);
                table.longitudes.push(*lon);
            }
        }
    }

    table.check_shape()?;
    Ok(table)
}

fn numeric_coord<'a>(dataset: &'a GridDataset, name: &str, path: &Path) -> Result<&'a [f64]> {
    match dataset.coords.get(name) {
        Some(CoordinateValues::Numeric(v)) => Ok(v),
        _ => Err(ProcessingError::invalid_format(
            path,
            format!("missing numeric coordinate '{}'", name),
        )),
    }
}

/// Shape of `variable`, where `dim` (already removed from the coordinate
/// map) has length `len`.
fn shape_with(
    coords: &std::collections::BTreeMap<String, CoordinateValues>,
    variable: &GridVariable,
    dim: &str,
    len: usize,
    path: &Path,
) -> Result<Vec<usize>> {
    let shape = variable
        .dims
        .iter()
        .map(|d| {
            if d == dim {
                Some(len)
            } else {
                coords.get(d).map(CoordinateValues::len)
            }
        })
        .collect::<Option<Vec<usize>>>()
        .ok_or_else(|| {
            ProcessingError::invalid_format(
                path,
                format!("variable '{}' uses an undeclared dimension", variable.name),
            )
        })?;

    if shape.iter().product::<usize>() != variable.values.len() {
        return Err(ProcessingError::invalid_format(
            path,
            format!("variable '{}' does not match its shape {:?}", variable.name, shape),
        ));
    }
    Ok(shape)
}

/// Row-major slice of `values` at `index` along `axis`.
fn select_along(values: &[f64], shape: &[usize], axis: usize, index: usize) -> Vec<f64> {
    let outer: usize = shape[..axis].iter().product();
    let inner: usize = shape[axis + 1..].iter().product();
    let len = shape[axis];

    let mut out = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        let start = (o * len + index) * inner;
        out.extend_from_slice(&values[start..start + inner]);
    }
    out
}
