use crate::error::{ProcessingError, Result};
use crate::models::{DerivedObservation, JoinedObservation, LocationKey, TimeKey};
use crate::utils::constants::{KELVIN_OFFSET, MM_PER_M, PA_PER_HPA};
use crate::utils::rounding::round_to;
use chrono::Timelike;
use rayon::prelude::*;
use tracing::{debug, warn};

pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    round_to(kelvin - KELVIN_OFFSET, 2)
}

pub fn pascal_to_hpa(pascal: f64) -> f64 {
    round_to(pascal / PA_PER_HPA, 2)
}

pub fn metres_to_mm(metres: f64) -> f64 {
    round_to(metres * MM_PER_M, 4)
}

/// Horizontal wind speed from its eastward and northward components.
pub fn wind_speed(u: f64, v: f64) -> f64 {
    round_to(u.hypot(v), 2)
}

/// Derives surrogate keys and physical units from joined raw rows.
pub struct DimensionalTransform {
    max_workers: usize,
}

impl DimensionalTransform {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    /// Derive every row on a dedicated rayon pool. Output order matches
    /// input order.
    pub fn derive(&self, joined: &[JoinedObservation]) -> Result<Vec<DerivedObservation>> {
        let sub_hourly = joined
            .iter()
            .filter(|row| row.time.minute() != 0 || row.time.second() != 0 || row.time.nanosecond() != 0)
            .count();
        if sub_hourly > 0 {
            warn!(
                rows = sub_hourly,
                "Timestamps below hour resolution share their hour's time key"
            );
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| ProcessingError::Config(e.to_string()))?;

        let derived: Vec<DerivedObservation> =
            pool.install(|| joined.par_iter().map(derive_row).collect());

        debug!(rows = derived.len(), workers = self.max_workers, "Derived observations");
        Ok(derived)
    }
}

impl Default for DimensionalTransform {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

pub fn derive_row(row: &JoinedObservation) -> DerivedObservation {
    let raw = &row.raw;
    DerivedObservation {
        time: row.time,
        latitude: row.latitude,
        longitude: row.longitude,
        time_key: TimeKey::from_datetime(&row.time),
        location_key: LocationKey::from_coordinates(row.latitude, row.longitude),
        temperature_c: kelvin_to_celsius(raw.t2m),
        dewpoint_c: kelvin_to_celsius(raw.d2m),
        max_temp_c: kelvin_to_celsius(raw.mx2t),
        min_temp_c: kelvin_to_celsius(raw.mn2t),
        pressure_hpa: pascal_to_hpa(raw.msl),
        precipitation_mm: metres_to_mm(raw.tp) as f32,
        wind_speed_ms: wind_speed(raw.u10, raw.v10),
        cloud_cover: raw.tcc as f32,
        solar_radiation: raw.avg_sdswrf as f32,
    }
}
