pub mod netcdf_reader;
pub mod parquet_reader;

#[cfg(feature = "netcdf")]
pub use netcdf_reader::NetcdfSource;
pub use parquet_reader::ParquetReader;

use crate::error::Result;
use crate::models::GridDataset;
use std::path::Path;

/// Anything that can open a raw multidimensional weather file.
pub trait GridSource {
    fn read_dataset(&self, path: &Path) -> Result<GridDataset>;
}

/// The raw-file reader this build supports.
#[cfg(feature = "netcdf")]
pub fn default_grid_source() -> Result<Box<dyn GridSource>> {
    Ok(Box::new(NetcdfSource))
}

#[cfg(not(feature = "netcdf"))]
pub fn default_grid_source() -> Result<Box<dyn GridSource>> {
    Err(crate::error::ProcessingError::Config(
        "this binary was built without NetCDF support; rebuild with `--features netcdf` to ingest raw files"
            .to_string(),
    ))
}
