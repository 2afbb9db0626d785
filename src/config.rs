//! Configuration file handling
//!
//! The configuration lives in a YAML file with a `settings` section and a
//! list of tracked `series`. The same file doubles as the progress record:
//! each series entry carries the season and episode downloaded last.

use crate::episode::{Source, Watermark};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the configuration file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Check interval used when no configuration could be loaded
pub const DEFAULT_CHECK_INTERVAL_MINUTES: u64 = 10;

/// Errors that can occur while reading or writing the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    /// The configuration file could not be read or written
    #[error("IO error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// The configuration file is not valid YAML for this schema
    #[error("Invalid configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// The configuration could not be serialized
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// The whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub settings: Settings,
    pub series: Vec<SeriesConfig>,
}

/// One tracked series and how far it has been downloaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesConfig {
    /// Display name; also names the output folder and identifies the series
    pub name: String,
    /// Location of the listing page
    pub url: String,
    /// Season of the last downloaded episode; 0 means not given and counts as season 1
    #[serde(default)]
    pub season: u32,
    /// Number of the last downloaded episode
    #[serde(default, alias = "series")]
    pub episode: u32,
}

impl SeriesConfig {
    /// Progress of this series, with a missing season read as season 1
    pub fn watermark(&self) -> Watermark {
        Watermark::new(self.season.max(1), self.episode)
    }
}

/// Global settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root folder; every series gets a subfolder named after it
    pub download_directory: PathBuf,
    /// Minutes between two checks
    pub check_interval_minutes: u64,
    /// Attempts per download phase
    pub download_retries: u32,
    /// Seconds between download attempts
    pub download_retry_delay: u64,
    /// Program and leading arguments of the external downloader
    pub yt_dlp_command: Vec<String>,
    /// Extra arguments appended to every external downloader call
    #[serde(alias = "yt-dlp_args")]
    pub yt_dlp_args: Vec<String>,
    /// Credential for the phased pixeldrain downloader
    pub pixeldrain_api_key: Option<String>,
    pub cookies: CookieSettings,
    /// Sources tried first to last; unlisted sources come after these
    pub source_priority: Vec<Source>,
    /// Helper command for pages that need a real browser
    pub renderer_command: Option<Vec<String>>,
    pub pacing: PacingSettings,
    pub network: NetworkSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_directory: PathBuf::from("downloads"),
            check_interval_minutes: DEFAULT_CHECK_INTERVAL_MINUTES,
            download_retries: 3,
            download_retry_delay: 5,
            yt_dlp_command: vec!["yt-dlp".to_string()],
            yt_dlp_args: vec!["--concurrent-fragments".to_string(), "4".to_string()],
            pixeldrain_api_key: None,
            cookies: CookieSettings::default(),
            source_priority: vec![Source::GoFile, Source::PixelDrain],
            renderer_command: None,
            pacing: PacingSettings::default(),
            network: NetworkSettings::default(),
        }
    }
}

impl Settings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes * 60)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.download_retry_delay)
    }

    /// The credential, ignoring blank values
    pub fn credential(&self) -> Option<&str> {
        self.pixeldrain_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Cookie injection from an exported browser cookie file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub enable: bool,
    pub browser: String,
    /// Explicit export path; defaults to `cookies/<browser>.txt` next to the config file
    pub file: Option<PathBuf>,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            enable: false,
            browser: "firefox".to_string(),
            file: None,
        }
    }
}

/// Inclusive range of whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseRange {
    pub min: u64,
    pub max: u64,
}

impl PauseRange {
    pub fn seconds(&self) -> RangeInclusive<u64> {
        self.min.min(self.max)..=self.max.max(self.min)
    }
}

/// Random pauses that keep request patterns from looking bursty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingSettings {
    /// Pause between two series
    pub series_pause: PauseRange,
    /// Pause before the first download of a series
    pub download_pause: PauseRange,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            series_pause: PauseRange { min: 10, max: 25 },
            download_pause: PauseRange { min: 5, max: 15 },
        }
    }
}

/// Retry behaviour of page requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub retries: u32,
    pub backoff_seconds: u64,
    pub timeout_seconds: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_seconds: 5,
            timeout_seconds: 30,
        }
    }
}

/// Loads the configuration from `path`
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Saves the configuration to `path`
///
/// The YAML is written to a sibling file first and renamed over the
/// original, so readers never observe a half-written file.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    let yaml = serde_yaml::to_string(config)?;

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    fs::write(&temp, yaml)
        .and_then(|_| fs::rename(&temp, path))
        .map_err(|source| {
            let _ = fs::remove_file(&temp);
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        })
}
