use crate::error::{ProcessingError, Result};
use crate::utils::constants::DOWNLOAD_ARCHIVE;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

/// Unpacks the zip a CDS download produces into its window directory.
/// The archive is removed once its entries are on disk.
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the download archive of `window_dir`, if there is one, next to
    /// it. Returns the extracted paths; `None` when no archive is present.
    pub fn extract_download(&self, window_dir: &Path) -> Result<Option<Vec<PathBuf>>> {
        let zip_path = window_dir.join(DOWNLOAD_ARCHIVE);
        if !zip_path.is_file() {
            debug!(dir = %window_dir.display(), "No download archive");
            return Ok(None);
        }

        let bytes = self.estimate_extraction_size(&zip_path)?;
        debug!(archive = %zip_path.display(), bytes, "Unpacking download archive");

        let extracted = self.extract_all(&zip_path, window_dir)?;
        info!(
            archive = %zip_path.display(),
            files = extracted.len(),
            bytes,
            "Unpacked download archive"
        );

        fs::remove_file(&zip_path)?;
        Ok(Some(extracted))
    }

    /// Extract every file entry of `zip_path` into `dest`. Entries whose
    /// names would escape `dest` are rejected.
    pub fn extract_all(&self, zip_path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
        let file = File::open(zip_path)?;
        let mut archive = ZipArchive::new(file)?;
        let mut extracted_paths = Vec::new();

        for i in 0..archive.len() {
            let mut zip_file = archive.by_index(i)?;
            if zip_file.is_dir() {
                continue;
            }

            let relative = zip_file.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
                ProcessingError::invalid_format(
                    zip_path,
                    format!("unsafe entry name '{}'", zip_file.name()),
                )
            })?;
            let dest_path = dest.join(relative);

            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut dest_file = File::create(&dest_path)?;
            let mut writer = BufWriter::new(&mut dest_file);
            std::io::copy(&mut zip_file, &mut writer)?;
            writer.flush()?;

            extracted_paths.push(dest_path);
        }

        Ok(extracted_paths)
    }

    /// Total uncompressed size of the archive's entries.
    pub fn estimate_extraction_size(&self, zip_path: &Path) -> Result<u64> {
        let file = File::open(zip_path)?;
        let mut archive = ZipArchive::new(file)?;
        let mut total_size = 0u64;

        for i in 0..archive.len() {
            let zip_file = archive.by_index(i)?;
            total_size += zip_file.size();
        }

        Ok(total_size)
    }
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self::new()
    }
}
