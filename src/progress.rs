//! Persistence of per-series download progress
//!
//! A series' progress is a single [`Watermark`]: the season and episode of
//! the newest confirmed download. Stores only ever move it forward, and
//! the orchestrator only asks them to after a file has been relocated into
//! its final folder.
//!
//! Stores follow a single-writer contract: one process advances a given
//! series at a time. [`YamlProgressStore`] additionally serializes its own
//! read-modify-write cycles behind a mutex and reloads the file right
//! before each write to keep the window for lost updates small.

use crate::config::{ConfigError, load_config, save_config};
use crate::episode::Watermark;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while reading or advancing progress
#[derive(Debug, Error)]
pub enum ProgressError {
    /// The backing configuration could not be read or written
    #[error("Progress store error: {0}")]
    Config(#[from] ConfigError),

    /// The series is not tracked by this store
    #[error("Series not found in progress store: {0}")]
    UnknownSeries(String),

    /// A previous writer panicked while holding the store lock
    #[error("Progress store lock poisoned")]
    Poisoned,
}

/// Storage for per-series watermarks
pub trait ProgressStore {
    /// Current watermark of `series_id`
    fn watermark(&self, series_id: &str) -> Result<Watermark, ProgressError>;

    /// Moves the watermark of `series_id` to `to` if that is ahead of the stored one
    ///
    /// Returns `true` when the stored value changed. A mark that is not
    /// ahead leaves the store untouched and returns `false`.
    fn advance(&self, series_id: &str, to: Watermark) -> Result<bool, ProgressError>;
}

/// Progress kept in the series entries of the YAML configuration file
pub struct YamlProgressStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl YamlProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressStore for YamlProgressStore {
    fn watermark(&self, series_id: &str) -> Result<Watermark, ProgressError> {
        let config = load_config(&self.path)?;
        config
            .series
            .iter()
            .find(|s| s.name == series_id)
            .map(|s| s.watermark())
            .ok_or_else(|| ProgressError::UnknownSeries(series_id.to_string()))
    }

    fn advance(&self, series_id: &str, to: Watermark) -> Result<bool, ProgressError> {
        let _guard = self.lock.lock().map_err(|_| ProgressError::Poisoned)?;

        // Reload right before writing so edits made since the run started survive
        let mut config = load_config(&self.path)?;
        let entry = config
            .series
            .iter_mut()
            .find(|s| s.name == series_id)
            .ok_or_else(|| ProgressError::UnknownSeries(series_id.to_string()))?;

        if to <= entry.watermark() {
            debug!(
                "Not moving '{}' back from {} to {}",
                series_id,
                entry.watermark(),
                to
            );
            return Ok(false);
        }

        entry.season = to.season;
        entry.episode = to.episode;
        save_config(&config, &self.path)?;

        info!("Saved progress for '{}': {}", series_id, to);
        Ok(true)
    }
}

/// Progress kept in memory
///
/// Useful when embedding the engine with its own persistence, and for
/// tests.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    marks: Mutex<HashMap<String, Watermark>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `series_id` at `mark`
    pub fn track(&self, series_id: &str, mark: Watermark) -> Result<(), ProgressError> {
        let mut marks = self.marks.lock().map_err(|_| ProgressError::Poisoned)?;
        marks.insert(series_id.to_string(), mark);
        Ok(())
    }
}

impl ProgressStore for MemoryProgressStore {
    fn watermark(&self, series_id: &str) -> Result<Watermark, ProgressError> {
        let marks = self.marks.lock().map_err(|_| ProgressError::Poisoned)?;
        marks
            .get(series_id)
            .copied()
            .ok_or_else(|| ProgressError::UnknownSeries(series_id.to_string()))
    }

    fn advance(&self, series_id: &str, to: Watermark) -> Result<bool, ProgressError> {
        let mut marks = self.marks.lock().map_err(|_| ProgressError::Poisoned)?;
        let current = marks
            .get_mut(series_id)
            .ok_or_else(|| ProgressError::UnknownSeries(series_id.to_string()))?;

        if to <= *current {
            return Ok(false);
        }
        *current = to;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, SeriesConfig};

    fn write_config(path: &Path, episode: u32) {
        let mut config = AppConfig::default();
        config.series.push(SeriesConfig {
            name: "Dark".to_string(),
            url: "https://filecrypt.cc/Container/A.html".to_string(),
            season: 1,
            episode,
        });
        config.series.push(SeriesConfig {
            name: "1899".to_string(),
            url: "https://filecrypt.cc/Container/B.html".to_string(),
            season: 1,
            episode: 2,
        });
        save_config(&config, path).unwrap();
    }

    #[test]
    fn test_yaml_store_advances_only_named_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, 3);
        let store = YamlProgressStore::new(&path);

        assert!(store.advance("Dark", Watermark::new(1, 4)).unwrap());

        assert_eq!(store.watermark("Dark").unwrap(), Watermark::new(1, 4));
        assert_eq!(store.watermark("1899").unwrap(), Watermark::new(1, 2));
    }

    #[test]
    fn test_yaml_store_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, 6);
        let store = YamlProgressStore::new(&path);

        assert!(!store.advance("Dark", Watermark::new(1, 5)).unwrap());
        assert!(!store.advance("Dark", Watermark::new(1, 6)).unwrap());
        assert_eq!(store.watermark("Dark").unwrap(), Watermark::new(1, 6));
    }

    #[test]
    fn test_yaml_store_reloads_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, 3);
        let store = YamlProgressStore::new(&path);

        // Simulate an external edit between runs
        let mut edited = load_config(&path).unwrap();
        edited.settings.download_retries = 9;
        save_config(&edited, &path).unwrap();

        store.advance("Dark", Watermark::new(1, 4)).unwrap();

        let reloaded = load_config(&path).unwrap();
        assert_eq!(reloaded.settings.download_retries, 9);
        assert_eq!(reloaded.series[0].episode, 4);
    }

    #[test]
    fn test_unknown_series_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, 3);
        let store = YamlProgressStore::new(&path);

        assert!(matches!(
            store.advance("Westworld", Watermark::new(1, 1)),
            Err(ProgressError::UnknownSeries(_))
        ));
    }

    #[test]
    fn test_memory_store_is_monotonic() {
        let store = MemoryProgressStore::new();
        store.track("Dark", Watermark::new(1, 3)).unwrap();

        assert!(store.advance("Dark", Watermark::new(2, 1)).unwrap());
        assert!(!store.advance("Dark", Watermark::new(1, 9)).unwrap());
        assert_eq!(store.watermark("Dark").unwrap(), Watermark::new(2, 1));
    }
}
