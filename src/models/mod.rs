pub mod dataset;
pub mod grid;
pub mod star;
pub mod window;

pub use dataset::{CoordinateValues, GridDataset, GridVariable};
pub use grid::{GridKey, GridTable, SourceKind, SourceTable};
pub use star::{
    DerivedObservation, DimLocationRow, DimTimeRow, FactWeatherRow, JoinedObservation,
    LocationKey, RawMeasurements, StarSchema, TimeKey,
};
pub use window::{LoadWindow, WindowKind};
