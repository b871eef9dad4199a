use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use era5_warehouse::models::{GridTable, JoinedObservation, SourceKind, SourceTable};
use era5_warehouse::processors::{split_star_schema, DataMerger, DimensionalTransform};

// One day of hourly data over a square grid, split the way ERA5 splits it
fn create_sources(grid_side: usize) -> Vec<SourceTable> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();

    SourceKind::ALL
        .iter()
        .map(|kind| {
            let mut table = GridTable::new();
            for hour in 0..24 {
                let time = start + Duration::hours(hour);
                for i in 0..grid_side {
                    for j in 0..grid_side {
                        let lat = 40.0 + i as f64 * 0.25;
                        let lon = 60.0 + j as f64 * 0.25;
                        let base = 270.0 + hour as f64 * 0.1 + i as f64 * 0.01;
                        let values: Vec<(&str, f64)> = match kind {
                            SourceKind::Instant => vec![
                                ("t2m", base),
                                ("d2m", base - 3.0),
                                ("msl", 101_325.0 - j as f64),
                                ("u10", 2.0 + j as f64 * 0.1),
                                ("v10", -1.5),
                                ("tcc", 0.4),
                            ],
                            SourceKind::Accumulated => vec![("tp", 0.0002)],
                            SourceKind::Averaged => vec![("avg_sdswrf", 150.0)],
                            SourceKind::Maximum => vec![("mx2t", base + 2.0), ("mn2t", base - 2.0)],
                        };
                        table.push_row(time, lat, lon, &values).unwrap();
                    }
                }
            }
            SourceTable::new(*kind, table)
        })
        .collect()
}

fn joined(grid_side: usize) -> Vec<JoinedObservation> {
    let (rows, _) = DataMerger::new()
        .merge_sources(&create_sources(grid_side))
        .unwrap();
    rows
}

fn benchmark_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("join");
    for side in [10, 40] {
        let sources = create_sources(side);
        group.bench_with_input(BenchmarkId::new("grid_side", side), &sources, |b, sources| {
            b.iter(|| DataMerger::new().merge_sources(black_box(sources)).unwrap())
        });
    }
    group.finish();
}

fn benchmark_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform");
    let rows = joined(40);
    for workers in [1, 4] {
        let transform = DimensionalTransform::new(workers);
        group.bench_with_input(BenchmarkId::new("workers", workers), &rows, |b, rows| {
            b.iter(|| transform.derive(black_box(rows)).unwrap())
        });
    }
    group.finish();
}

fn benchmark_split(c: &mut Criterion) {
    let derived = DimensionalTransform::new(4).derive(&joined(40)).unwrap();
    c.bench_function("split_star_schema", |b| {
        b.iter(|| split_star_schema(black_box(&derived)))
    });
}

criterion_group!(
    benches,
    benchmark_join,
    benchmark_transform,
    benchmark_split
);
criterion_main!(benches);
