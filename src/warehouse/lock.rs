use crate::error::{ProcessingError, Result};
use crate::models::LoadWindow;
use crate::utils::filename::lock_file_name;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Advisory per-window lock: a file created with `create_new`, removed on
/// release or drop. A crashed process leaves the file behind; it names the
/// owning pid so an operator can clear it.
#[derive(Debug)]
pub struct LoadLock {
    path: PathBuf,
    released: bool,
}

impl LoadLock {
    pub fn acquire(lock_dir: &Path, window: &LoadWindow) -> Result<Self> {
        Self::acquire_with(lock_dir, window, write_owner)
    }

    fn acquire_with<F>(lock_dir: &Path, window: &LoadWindow, write_owner: F) -> Result<Self>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        fs::create_dir_all(lock_dir)?;
        let path = lock_dir.join(lock_file_name(window));

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ProcessingError::LoadInProgress {
                    window: window.label(),
                    lock: path,
                })
            }
            Err(e) => return Err(e.into()),
        };

        // The guard owns the file from here; a failed write removes it on drop
        let lock = Self {
            path,
            released: false,
        };
        let written = write_owner(&mut file);
        drop(file);
        written?;

        debug!(lock = %lock.path.display(), "Acquired load lock");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_file(&self.path)?;
        debug!(lock = %self.path.display(), "Released load lock");
        Ok(())
    }
}

fn write_owner(file: &mut File) -> io::Result<()> {
    writeln!(
        file,
        "pid={}\nstarted={}",
        std::process::id(),
        Utc::now().to_rfc3339()
    )
}

impl Drop for LoadLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to remove load lock");
        }
    }
}
