//! Temporary staging area for downloads
//!
//! This module provides RAII-based temporary files and directories with
//! automatic cleanup. Downloads are written into a guard first and only
//! relocated into their final folder once complete, so an interrupted
//! transfer never leaves a partial file where a finished one is expected.

use std::fs::{self, File};
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Name of the staging folder created inside the output root
pub(crate) const STAGING_DIR: &str = ".incoming";

/// Guard for temporary resources that automatically cleans up on drop
#[derive(Debug)]
pub(crate) enum TempGuard {
    /// Temporary file that will be deleted when dropped
    File(PathBuf),
    /// Temporary directory that will be deleted, with its contents, when dropped
    Directory(PathBuf),
}

impl TempGuard {
    /// Get the path to the temporary resource
    pub(crate) fn path(&self) -> &Path {
        match self {
            TempGuard::File(path) | TempGuard::Directory(path) => path,
        }
    }

    /// Moves a finished temporary file to `destination`
    ///
    /// Parent directories of the destination are created as needed. On
    /// failure the guard is dropped and the temporary file removed.
    pub(crate) fn persist(self, destination: &Path) -> io::Result<PathBuf> {
        relocate(self.path(), destination)?;
        // Nothing left to clean up; the drop below only hits a missing path
        Ok(destination.to_path_buf())
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        match self {
            TempGuard::File(path) => {
                // Silently ignore errors during cleanup
                let _ = fs::remove_file(path);
            }
            TempGuard::Directory(path) => {
                let _ = fs::remove_dir_all(path);
            }
        }
    }
}

impl Deref for TempGuard {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.path()
    }
}

/// Returns the staging folder for `output_root`, creating it if needed
pub(crate) fn staging_dir(output_root: &Path) -> io::Result<PathBuf> {
    let dir = output_root.join(STAGING_DIR);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Creates a temporary file in `dir` and returns a guard that will clean it up on drop
///
/// The file name is made unique with a ULID (monotonic, sortable unique identifier).
///
/// # Examples
///
/// ```ignore
/// let temp = create_temp_file_in(&staging, "episode", "part")?;
/// // write into temp.path(), then temp.persist(&final_path)?
/// ```
pub(crate) fn create_temp_file_in(dir: &Path, prefix: &str, extension: &str) -> io::Result<TempGuard> {
    let ulid = ulid::Ulid::new();
    let path = dir.join(format!("{}_{}.{}", prefix, ulid, extension));

    File::create(&path)?;

    Ok(TempGuard::File(path))
}

/// Creates a temporary directory in `dir` and returns a guard that removes it on drop
pub(crate) fn create_temp_dir_in(dir: &Path, prefix: &str) -> io::Result<TempGuard> {
    let ulid = ulid::Ulid::new();
    let path = dir.join(format!("{}_{}", prefix, ulid));

    fs::create_dir_all(&path)?;

    Ok(TempGuard::Directory(path))
}

/// Moves `source` to `destination`, creating the destination's parent folders
///
/// A plain rename is attempted first. When source and destination live on
/// different filesystems the file is copied to a sibling of the destination
/// and renamed from there, so the destination only ever appears complete.
pub(crate) fn relocate(source: &Path, destination: &Path) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(_) => {
            let mut sibling = destination.as_os_str().to_owned();
            sibling.push(format!(".{}.tmp", ulid::Ulid::new()));
            let sibling = PathBuf::from(sibling);

            if let Err(e) = fs::copy(source, &sibling).and_then(|_| fs::rename(&sibling, destination)) {
                let _ = fs::remove_file(&sibling);
                return Err(e);
            }
            fs::remove_file(source)
        }
    }
}
