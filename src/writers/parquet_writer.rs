use crate::error::{ProcessingError, Result};
use crate::models::{DimLocationRow, DimTimeRow, FactWeatherRow, GridTable, StarSchema};
use crate::utils::constants::{
    DEFAULT_ROW_GROUP_SIZE, LATITUDE_COLUMN, LONGITUDE_COLUMN, TIME_COLUMN,
};
use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DIM_TIME_EXPORT: &str = "dim_time.parquet";
pub const DIM_LOCATION_EXPORT: &str = "dim_location.parquet";
pub const FACT_WEATHER_EXPORT: &str = "fact_weather.parquet";

pub struct ParquetWriter {
    compression: Compression,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = match compression.to_lowercase().as_str() {
            "snappy" => Compression::SNAPPY,
            "gzip" => Compression::GZIP(GzipLevel::default()),
            "lz4" => Compression::LZ4,
            "zstd" => Compression::ZSTD(parquet::basic::ZstdLevel::default()),
            "none" => Compression::UNCOMPRESSED,
            _ => {
                return Err(ProcessingError::Config(format!(
                    "Unsupported compression: {}",
                    compression
                )))
            }
        };
        Ok(self)
    }

    fn properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(DEFAULT_ROW_GROUP_SIZE)
            .build()
    }

    /// Write a normalised grid table. The file appears under its final name
    /// only once it has been fully written and closed.
    pub fn write_grid_table(&self, table: &GridTable, path: &Path) -> Result<()> {
        table.check_shape()?;

        let mut fields = vec![
            Field::new(
                TIME_COLUMN,
                DataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
            Field::new(LATITUDE_COLUMN, DataType::Float64, false),
            Field::new(LONGITUDE_COLUMN, DataType::Float64, false),
        ];
        fields.extend(
            table
                .variables
                .keys()
                .map(|name| Field::new(name, DataType::Float32, true)),
        );
        let schema = Arc::new(Schema::new(fields));

        let staging = staging_path(path);
        let file = File::create(&staging)?;
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(self.properties()))?;

        let rows = table.len();
        let mut offset = 0;
        while offset < rows {
            let end = (offset + DEFAULT_ROW_GROUP_SIZE).min(rows);
            let batch = grid_batch(table, offset..end, schema.clone())?;
            writer.write(&batch)?;
            offset = end;
        }
        writer.close()?;

        fs::rename(&staging, path)?;
        Ok(())
    }

    /// Snapshot the three projected tables into `dir`.
    pub fn write_star_schema(&self, star: &StarSchema, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;

        let dim_time_path = dir.join(DIM_TIME_EXPORT);
        self.write_batched(&star.dim_time, dim_time_schema(), dim_time_batch, &dim_time_path)?;

        let dim_location_path = dir.join(DIM_LOCATION_EXPORT);
        self.write_batched(
            &star.dim_location,
            dim_location_schema(),
            dim_location_batch,
            &dim_location_path,
        )?;

        let fact_path = dir.join(FACT_WEATHER_EXPORT);
        self.write_batched(&star.facts, fact_schema(), fact_batch, &fact_path)?;

        Ok(vec![dim_time_path, dim_location_path, fact_path])
    }

    fn write_batched<T>(
        &self,
        rows: &[T],
        schema: Arc<Schema>,
        to_batch: fn(&[T], Arc<Schema>) -> Result<RecordBatch>,
        path: &Path,
    ) -> Result<()> {
        let staging = staging_path(path);
        let file = File::create(&staging)?;
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(self.properties()))?;

        for chunk in rows.chunks(DEFAULT_ROW_GROUP_SIZE) {
            let batch = to_batch(chunk, schema.clone())?;
            writer.write(&batch)?;
        }

        writer.close()?;
        fs::rename(&staging, path)?;
        Ok(())
    }

    pub fn get_file_info(&self, path: &Path) -> Result<ParquetFileInfo> {
        use parquet::file::reader::{FileReader, SerializedFileReader};

        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        let file_metadata = metadata.file_metadata();
        let row_groups = metadata.num_row_groups();
        let total_rows = file_metadata.num_rows();
        let file_size = fs::metadata(path)?.len();

        let mut row_group_sizes = Vec::new();
        for i in 0..row_groups {
            let rg_metadata = metadata.row_group(i);
            row_group_sizes.push(rg_metadata.num_rows());
        }

        let compression = if row_groups > 0 && metadata.row_group(0).num_columns() > 0 {
            metadata.row_group(0).column(0).compression()
        } else {
            self.compression
        };

        let columns = file_metadata
            .schema_descr()
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), format!("{:?}", c.physical_type())))
            .collect();

        Ok(ParquetFileInfo {
            total_rows,
            row_groups: row_groups as i32,
            row_group_sizes,
            file_size,
            compression,
            columns,
        })
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn grid_batch(
    table: &GridTable,
    range: std::ops::Range<usize>,
    schema: Arc<Schema>,
) -> Result<RecordBatch> {
    let times: Vec<i64> = table.times[range.clone()]
        .iter()
        .map(|t| t.and_utc().timestamp_micros())
        .collect();

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(TimestampMicrosecondArray::from(times)),
        Arc::new(Float64Array::from(table.latitudes[range.clone()].to_vec())),
        Arc::new(Float64Array::from(table.longitudes[range.clone()].to_vec())),
    ];
    for values in table.variables.values() {
        let narrowed: Vec<f32> = values[range.clone()].iter().map(|v| *v as f32).collect();
        columns.push(Arc::new(Float32Array::from(narrowed)));
    }

    Ok(RecordBatch::try_new(schema, columns)?)
}

fn dim_time_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("time_id", DataType::Int64, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Second, None),
            false,
        ),
        Field::new("year", DataType::UInt16, false),
        Field::new("month", DataType::UInt8, false),
        Field::new("day", DataType::UInt8, false),
        Field::new("hour", DataType::UInt8, false),
        Field::new("day_of_week", DataType::UInt8, false),
        Field::new("quarter", DataType::UInt8, false),
    ]))
}

fn dim_time_batch(rows: &[DimTimeRow], schema: Arc<Schema>) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.time_id))),
        Arc::new(TimestampSecondArray::from_iter_values(
            rows.iter().map(|r| r.timestamp.timestamp()),
        )),
        Arc::new(UInt16Array::from_iter_values(rows.iter().map(|r| r.year))),
        Arc::new(UInt8Array::from_iter_values(rows.iter().map(|r| r.month))),
        Arc::new(UInt8Array::from_iter_values(rows.iter().map(|r| r.day))),
        Arc::new(UInt8Array::from_iter_values(rows.iter().map(|r| r.hour))),
        Arc::new(UInt8Array::from_iter_values(rows.iter().map(|r| r.day_of_week))),
        Arc::new(UInt8Array::from_iter_values(rows.iter().map(|r| r.quarter))),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}

fn dim_location_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("location_id", DataType::Int64, false),
        Field::new("latitude", DataType::Float64, false),
        Field::new("longitude", DataType::Float64, false),
    ]))
}

fn dim_location_batch(rows: &[DimLocationRow], schema: Arc<Schema>) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.location_id))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.latitude))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.longitude))),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}

fn fact_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("time_id", DataType::Int64, false),
        Field::new("location_id", DataType::Int64, false),
        Field::new("temperature_c", DataType::Float64, false),
        Field::new("dewpoint_c", DataType::Float64, false),
        Field::new("max_temp_c", DataType::Float64, false),
        Field::new("min_temp_c", DataType::Float64, false),
        Field::new("pressure_hpa", DataType::Float64, false),
        Field::new("precipitation_mm", DataType::Float32, false),
        Field::new("wind_speed_ms", DataType::Float64, false),
        Field::new("cloud_cover", DataType::Float32, false),
        Field::new("solar_radiation", DataType::Float32, false),
    ]))
}

fn fact_batch(rows: &[FactWeatherRow], schema: Arc<Schema>) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.time_id))),
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.location_id))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.temperature_c))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.dewpoint_c))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.max_temp_c))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.min_temp_c))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.pressure_hpa))),
        Arc::new(Float32Array::from_iter_values(rows.iter().map(|r| r.precipitation_mm))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.wind_speed_ms))),
        Arc::new(Float32Array::from_iter_values(rows.iter().map(|r| r.cloud_cover))),
        Arc::new(Float32Array::from_iter_values(rows.iter().map(|r| r.solar_radiation))),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}

#[derive(Debug)]
pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub row_groups: i32,
    pub row_group_sizes: Vec<i64>,
    pub file_size: u64,
    pub compression: Compression,
    pub columns: Vec<(String, String)>,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        let avg_rows = if self.row_groups > 0 {
            self.total_rows as f64 / self.row_groups as f64
        } else {
            0.0
        };
        let mut summary = format!(
            "Parquet File Summary:\n\
            - Total rows: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} MB\n\
            - Compression: {:?}\n\
            - Avg rows per group: {:.0}\n\
            - Columns:",
            self.total_rows,
            self.row_groups,
            self.file_size as f64 / 1_048_576.0,
            self.compression,
            avg_rows
        );
        for (name, physical) in &self.columns {
            summary.push_str(&format!("\n    {} ({})", name, physical));
        }
        summary
    }
}
