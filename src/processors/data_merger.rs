use crate::error::{ProcessingError, Result};
use crate::models::{
    GridKey, GridTable, JoinedObservation, RawMeasurements, SourceKind, SourceTable,
};
use crate::utils::constants::{
    VAR_D2M, VAR_MN2T, VAR_MSL, VAR_MX2T, VAR_SSRD, VAR_T2M, VAR_TCC, VAR_TP, VAR_U10, VAR_V10,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Variables a joined row must carry, in `RawMeasurements` field order.
pub const REQUIRED_VARIABLES: [&str; 10] = [
    VAR_T2M, VAR_D2M, VAR_MX2T, VAR_MN2T, VAR_MSL, VAR_TP, VAR_U10, VAR_V10, VAR_TCC, VAR_SSRD,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceJoinStats {
    pub kind: SourceKind,
    pub rows: usize,
    /// Rows of this source that found no partner in every other source.
    pub dropped: usize,
    /// Rows whose key already appeared earlier in this source.
    pub duplicate_keys: usize,
}

/// Row accounting for one inner join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinReport {
    pub sources: Vec<SourceJoinStats>,
    pub joined_rows: usize,
}

impl JoinReport {
    pub fn total_dropped(&self) -> usize {
        self.sources.iter().map(|s| s.dropped).sum()
    }

    pub fn has_losses(&self) -> bool {
        self.total_dropped() > 0
    }

    pub fn dropped_for(&self, kind: SourceKind) -> Option<usize> {
        self.sources.iter().find(|s| s.kind == kind).map(|s| s.dropped)
    }

    pub fn has_duplicates(&self) -> bool {
        self.sources.iter().any(|s| s.duplicate_keys > 0)
    }
}

fn duplicate_keys(table: &GridTable) -> usize {
    let mut seen = HashSet::with_capacity(table.len());
    (0..table.len()).filter(|row| !seen.insert(table.key(*row))).count()
}

/// Inner-joins the step-type sources of one window on (time, lat, lon).
pub struct DataMerger {
    driver: SourceKind,
}

impl DataMerger {
    pub fn new() -> Self {
        Self {
            driver: SourceKind::Instant,
        }
    }

    /// Join all sources. Output follows the row order of the instant table;
    /// a row survives only when every source has a matching key. A key
    /// repeated within a source yields one joined row per matching pair.
    pub fn merge_sources(
        &self,
        sources: &[SourceTable],
    ) -> Result<(Vec<JoinedObservation>, JoinReport)> {
        for source in sources {
            source.table.check_shape()?;
        }

        let driver_idx = sources
            .iter()
            .position(|s| s.kind == self.driver)
            .ok_or_else(|| {
                ProcessingError::MissingData(format!("no {} source to drive the join", self.driver))
            })?;

        let columns = self.resolve_variables(sources)?;

        // Key -> every row index carrying it, for every source except the driver
        let indices: Vec<Option<HashMap<GridKey, Vec<usize>>>> = sources
            .iter()
            .enumerate()
            .map(|(i, source)| {
                if i == driver_idx {
                    return None;
                }
                let mut index: HashMap<GridKey, Vec<usize>> =
                    HashMap::with_capacity(source.len());
                for row in 0..source.len() {
                    index.entry(source.table.key(row)).or_default().push(row);
                }
                Some(index)
            })
            .collect();

        let mut matched: Vec<Vec<bool>> = sources.iter().map(|s| vec![false; s.len()]).collect();
        let driver = &sources[driver_idx].table;
        let mut joined = Vec::with_capacity(driver.len());
        let driver_rows: Vec<usize> = (0..driver.len()).collect();
        let mut candidates: Vec<&[usize]> = Vec::with_capacity(sources.len());
        let mut cursor = vec![0usize; sources.len()];
        let mut rows = vec![0usize; sources.len()];

        'driver: for row in 0..driver.len() {
            let key = driver.key(row);
            candidates.clear();
            for index in &indices {
                match index {
                    None => candidates.push(&driver_rows[row..=row]),
                    Some(index) => match index.get(&key) {
                        Some(hits) => candidates.push(hits),
                        None => continue 'driver,
                    },
                }
            }

            // One joined row per combination of matching rows
            cursor.iter_mut().for_each(|c| *c = 0);
            loop {
                for (i, hits) in candidates.iter().enumerate() {
                    rows[i] = hits[cursor[i]];
                    matched[i][rows[i]] = true;
                }

                let value = |v: usize| {
                    let (source, column) = columns[v];
                    column[rows[source]]
                };
                joined.push(JoinedObservation {
                    time: driver.times[row],
                    latitude: driver.latitudes[row],
                    longitude: driver.longitudes[row],
                    raw: RawMeasurements {
                        t2m: value(0),
                        d2m: value(1),
                        mx2t: value(2),
                        mn2t: value(3),
                        msl: value(4),
                        tp: value(5),
                        u10: value(6),
                        v10: value(7),
                        tcc: value(8),
                        avg_sdswrf: value(9),
                    },
                });

                let mut axis = candidates.len();
                loop {
                    if axis == 0 {
                        continue 'driver;
                    }
                    axis -= 1;
                    cursor[axis] += 1;
                    if cursor[axis] < candidates[axis].len() {
                        break;
                    }
                    cursor[axis] = 0;
                }
            }
        }

        let report = JoinReport {
            sources: sources
                .iter()
                .zip(&matched)
                .map(|(source, hits)| SourceJoinStats {
                    kind: source.kind,
                    rows: source.len(),
                    dropped: hits.iter().filter(|hit| !**hit).count(),
                    duplicate_keys: duplicate_keys(&source.table),
                })
                .collect(),
            joined_rows: joined.len(),
        };

        for stats in report.sources.iter().filter(|s| s.duplicate_keys > 0) {
            warn!(
                source = %stats.kind,
                duplicates = stats.duplicate_keys,
                "Repeated grid keys; each repeat multiplies joined rows"
            );
        }
        for stats in report.sources.iter().filter(|s| s.dropped > 0) {
            warn!(
                source = %stats.kind,
                rows = stats.rows,
                dropped = stats.dropped,
                "Rows lost in join"
            );
        }
        debug!(joined = report.joined_rows, "Join complete");

        Ok((joined, report))
    }

    /// Locate each required variable; the first source that carries it wins.
    fn resolve_variables<'a>(&self, sources: &'a [SourceTable]) -> Result<Vec<(usize, &'a [f64])>> {
        REQUIRED_VARIABLES
            .iter()
            .map(|name| {
                sources
                    .iter()
                    .enumerate()
                    .find_map(|(i, s)| s.table.variable(name).map(|column| (i, column)))
                    .ok_or_else(|| {
                        ProcessingError::MissingData(format!(
                            "variable '{}' is not present in any source",
                            name
                        ))
                    })
            })
            .collect()
    }
}

impl Default for DataMerger {
    fn default() -> Self {
        Self::new()
    }
}
