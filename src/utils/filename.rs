use crate::models::LoadWindow;
use crate::utils::constants::{NORMALISED_EXTENSION, RAW_EXTENSION};
use chrono::{Datelike, Local};
use std::path::{Path, PathBuf};

/// Directory holding the raw and normalised files of a window:
/// `raw_data/2024-01-01` for a day, `raw_data/2024_01` for a month.
pub fn window_dir_name(window: &LoadWindow) -> String {
    window.label()
}

pub fn window_dir(data_dir: &Path, window: &LoadWindow) -> PathBuf {
    data_dir.join(window_dir_name(window))
}

/// Advisory lock file name for a window.
pub fn lock_file_name(window: &LoadWindow) -> String {
    format!("load-{}.lock", window.label())
}

/// `foo.nc` -> `foo.parquet` next to the source.
pub fn normalised_path(raw: &Path) -> PathBuf {
    raw.with_extension(NORMALISED_EXTENSION)
}

pub fn is_raw_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(RAW_EXTENSION))
}

/// Default load report filename with format: era5-load-{YYMMDD}.json
pub fn generate_default_report_filename() -> PathBuf {
    let now = Local::now();
    let year = now.year() % 100;
    let month = now.month();
    let day = now.day();

    let filename = format!("era5-load-{:02}{:02}{:02}.json", year, month, day);
    PathBuf::from("output").join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_window_dir_names() {
        let daily = LoadWindow::daily(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(window_dir_name(&daily), "2025-12-01");

        let monthly = LoadWindow::monthly(2024, 7).unwrap();
        assert_eq!(window_dir_name(&monthly), "2024_07");
        assert_eq!(
            window_dir(Path::new("raw_data"), &monthly),
            PathBuf::from("raw_data/2024_07")
        );
        assert_eq!(lock_file_name(&monthly), "load-2024_07.lock");
    }

    #[test]
    fn test_normalised_path() {
        assert_eq!(
            normalised_path(Path::new("raw_data/2024_07/data_stream-oper_stepType-accum.nc")),
            PathBuf::from("raw_data/2024_07/data_stream-oper_stepType-accum.parquet")
        );
    }

    #[test]
    fn test_generate_default_report_filename() {
        let filename = generate_default_report_filename();
        let filename_str = filename.to_string_lossy();

        assert!(filename_str.starts_with("output/"));
        assert!(filename_str.contains("era5-load-"));
        assert!(filename_str.ends_with(".json"));
    }
}
