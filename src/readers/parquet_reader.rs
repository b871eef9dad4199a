use crate::error::{ProcessingError, Result};
use crate::models::{GridTable, SourceKind, SourceTable};
use crate::utils::constants::{
    ENSEMBLE_DIM, EXPVER_DIM, LATITUDE_COLUMN, LONGITUDE_COLUMN, TIME_COLUMN,
};
use arrow::array::{Array, ArrayRef, Float64Array, TimestampMicrosecondArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::Path;
use tracing::debug;

const READ_BATCH_SIZE: usize = 8192;

/// Reads normalised Parquet files back into [`GridTable`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParquetReader;

impl ParquetReader {
    pub fn new() -> Self {
        Self
    }

    /// Read the four step-type sources of a window directory.
    pub fn read_sources(&self, window_dir: &Path) -> Result<Vec<SourceTable>> {
        SourceKind::ALL
            .iter()
            .map(|kind| {
                let path = window_dir.join(kind.file_name());
                if !path.exists() {
                    return Err(ProcessingError::MissingData(format!(
                        "{} source not found at {}",
                        kind,
                        path.display()
                    )));
                }
                let table = self.read_table(&path)?;
                debug!(source = %kind, rows = table.len(), "Read source table");
                Ok(SourceTable::new(*kind, table))
            })
            .collect()
    }

    /// Read one normalised file. Any numeric column other than the keys and
    /// the bookkeeping dimensions becomes a variable.
    pub fn read_table(&self, path: &Path) -> Result<GridTable> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(READ_BATCH_SIZE)
            .build()?;

        let mut table = GridTable::new();
        for batch_result in reader {
            let batch = batch_result?;
            self.append_batch(path, &batch, &mut table)?;
        }
        table.check_shape()?;
        Ok(table)
    }

    fn append_batch(&self, path: &Path, batch: &RecordBatch, table: &mut GridTable) -> Result<()> {
        let schema = batch.schema();
        let times = timestamps(path, required_column(path, batch, TIME_COLUMN)?)?;
        let latitudes = float_values(required_column(path, batch, LATITUDE_COLUMN)?)?;
        let longitudes = float_values(required_column(path, batch, LONGITUDE_COLUMN)?)?;

        table.times.extend(times);
        table.latitudes.extend(latitudes);
        table.longitudes.extend(longitudes);

        for (index, field) in schema.fields().iter().enumerate() {
            let name = field.name().as_str();
            if matches!(
                name,
                TIME_COLUMN | LATITUDE_COLUMN | LONGITUDE_COLUMN | EXPVER_DIM | ENSEMBLE_DIM
            ) || !field.data_type().is_numeric()
            {
                continue;
            }
            let values = float_values(batch.column(index))?;
            table
                .variables
                .entry(name.to_string())
                .or_default()
                .extend(values);
        }
        Ok(())
    }
}

fn required_column<'a>(path: &Path, batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ProcessingError::invalid_format(path, format!("missing '{}' column", name)))
}

/// Numeric column as f64, nulls as NaN.
fn float_values(array: &ArrayRef) -> Result<Vec<f64>> {
    let converted = cast(array, &DataType::Float64)?;
    let floats = converted
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| ProcessingError::DataMerge("Float64 cast produced wrong array".to_string()))?;
    Ok((0..floats.len())
        .map(|i| if floats.is_null(i) { f64::NAN } else { floats.value(i) })
        .collect())
}

/// Timestamp column of any unit as naive UTC datetimes.
fn timestamps(path: &Path, array: &ArrayRef) -> Result<Vec<NaiveDateTime>> {
    if !matches!(array.data_type(), DataType::Timestamp(_, _)) {
        return Err(ProcessingError::invalid_format(
            path,
            format!("time column has type {}", array.data_type()),
        ));
    }
    let converted = cast(array, &DataType::Timestamp(TimeUnit::Microsecond, None))?;
    let micros = converted
        .as_any()
        .downcast_ref::<TimestampMicrosecondArray>()
        .ok_or_else(|| ProcessingError::invalid_format(path, "unreadable time column"))?;

    (0..micros.len())
        .map(|i| {
            if micros.is_null(i) {
                return Err(ProcessingError::invalid_format(path, format!("null time at row {}", i)));
            }
            DateTime::from_timestamp_micros(micros.value(i))
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| ProcessingError::invalid_format(path, format!("time out of range at row {}", i)))
        })
        .collect()
}
