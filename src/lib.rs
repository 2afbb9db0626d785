//! Episode Courier - Watch link pages for new episodes and download them
//!
//! This library checks a list of tracked series on link-aggregation pages,
//! finds the episodes released since the last run, downloads each one from
//! the best available file host and records its progress so every episode
//! is fetched exactly once.

pub mod config;
pub mod cookies;
pub mod downloader;
pub mod episode;
pub mod http;
pub mod logging;
pub mod orchestrator;
pub mod progress;
pub mod provider;
pub mod retry;
pub mod timing;

mod temp;

use config::{AppConfig, DEFAULT_CHECK_INTERVAL_MINUTES, load_config};
use cookies::{CookieSupplier, NetscapeCookieFile};
use downloader::DownloaderRegistry;
use http::{HttpSessionFactory, SessionSettings};
use progress::YamlProgressStore;
use provider::{CommandRenderer, PageRenderer, ProviderRegistry};
use retry::RetryPolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

// Re-export error types
pub use config::ConfigError;
pub use cookies::CookieError;
pub use downloader::DownloadError;
pub use http::HttpError;
pub use orchestrator::SeriesError;
pub use progress::ProgressError;
pub use provider::{ProviderError, RenderError};

pub use episode::{Episode, LinkToken, Source, Watermark};
pub use orchestrator::{CheckSummary, Orchestrator, SeriesOutcome};
pub use timing::CancelFlag;

/// Progress event emitted during a check
///
/// These events allow library users to track progress and provide feedback
/// while series are checked and episodes downloaded.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The configuration could not be loaded; the check is skipped
    ConfigUnavailable { path: PathBuf, reason: String },

    /// Check started
    CheckStarted { series_count: usize },

    /// Waiting before the next burst of requests
    Pausing { duration: Duration },

    /// Processing a specific series
    SeriesStarted {
        index: usize,
        total: usize,
        series: String,
    },

    /// The listing page showed no episodes at all
    PossiblyBlocked { series: String },

    /// The listing page showed no episodes after the watermark
    NothingNew { series: String },

    /// New episodes were found
    NewEpisodes { series: String, count: usize },

    /// Working on one episode with the given alternative sources
    EpisodeStarted {
        series: String,
        season: u32,
        episode: u32,
        sources: Vec<Source>,
    },

    /// Trying one source for an episode
    SourceAttempt {
        series: String,
        season: u32,
        episode: u32,
        source: Source,
    },

    /// A source did not deliver the episode
    SourceFailed {
        series: String,
        season: u32,
        episode: u32,
        source: Source,
        reason: String,
    },

    /// Episode downloaded and recorded
    EpisodeDownloaded {
        series: String,
        season: u32,
        episode: u32,
        source: Source,
        path: PathBuf,
    },

    /// Every source failed for an episode
    EpisodeFailed {
        series: String,
        season: u32,
        episode: u32,
    },

    /// A series could not be processed
    SeriesFailed { series: String, reason: String },

    /// The check could not be set up
    CheckAborted { reason: String },

    /// The user interrupted the check
    Cancelled,

    /// Check complete
    CheckComplete { summary: CheckSummary },
}

/// Top-level error type for Episode Courier operations
///
/// Configuration failures are reported through [`ProgressEvent::ConfigUnavailable`]
/// and errors inside a series are contained by the orchestrator, so only
/// setting up the downloaders can abort a whole check.
#[derive(Debug, Error)]
pub enum CourierError {
    /// Error while setting up downloaders
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),
}

/// Performs one check of every configured series
///
/// The configuration is (re)loaded from `config_path` on every call, so
/// edits take effect at the next check. Progress is written back to the
/// same file after each downloaded episode.
///
/// Returns the time to wait before the next check. When the configuration
/// cannot be loaded the failure is reported through `progress_callback`
/// and the default interval is returned; the check will simply be retried.
///
/// # Examples
///
/// ```no_run
/// use episode_courier::{run_check, CancelFlag, ProgressEvent};
/// use std::path::Path;
///
/// let cancel = CancelFlag::new();
/// let next = run_check(Path::new("config.yaml"), &cancel, |event| {
///     if let ProgressEvent::EpisodeDownloaded { path, .. } = event {
///         println!("Saved {}", path.display());
///     }
/// });
/// std::thread::sleep(next);
/// ```
pub fn run_check<F>(config_path: &Path, cancel: &CancelFlag, mut progress_callback: F) -> Duration
where
    F: FnMut(ProgressEvent),
{
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Cannot load configuration: {}", e);
            progress_callback(ProgressEvent::ConfigUnavailable {
                path: config_path.to_path_buf(),
                reason: e.to_string(),
            });
            return Duration::from_secs(DEFAULT_CHECK_INTERVAL_MINUTES * 60);
        }
    };

    let interval = config.settings.check_interval();

    if let Err(e) = check_series(&config, config_path, cancel, &mut progress_callback) {
        error!("Check aborted: {}", e);
        progress_callback(ProgressEvent::CheckAborted {
            reason: e.to_string(),
        });
    }

    interval
}

/// Builds the production collaborators for `config` and runs one check
pub fn check_series<F>(
    config: &AppConfig,
    config_path: &Path,
    cancel: &CancelFlag,
    progress_callback: &mut F,
) -> Result<CheckSummary, CourierError>
where
    F: FnMut(ProgressEvent),
{
    let settings = &config.settings;

    let renderer: Option<Box<dyn PageRenderer>> = settings
        .renderer_command
        .as_deref()
        .and_then(CommandRenderer::from_command)
        .map(|renderer| Box::new(renderer) as Box<dyn PageRenderer>);
    let retry = RetryPolicy::new(
        settings.network.retries,
        Duration::from_secs(settings.network.backoff_seconds),
    );
    let providers = ProviderRegistry::standard(renderer, retry);
    let downloaders = DownloaderRegistry::standard(settings)?;

    let session_settings = SessionSettings {
        retry,
        timeout: Duration::from_secs(settings.network.timeout_seconds),
        ..SessionSettings::default()
    };
    let sessions = HttpSessionFactory::new(session_settings, cookie_supplier(config, config_path));
    let store = YamlProgressStore::new(config_path);

    info!(
        "Checking {} series, saving to {}",
        config.series.len(),
        settings.download_directory.display()
    );

    let summary = Orchestrator::new(settings, &providers, &downloaders, &sessions, &store)
        .with_cancel(cancel.clone())
        .run(&config.series, &mut *progress_callback);

    info!(
        "Check finished: {} downloaded, {} failed, {} blocked, {} errored",
        summary.downloaded, summary.failed, summary.blocked, summary.errored
    );

    Ok(summary)
}

/// The cookie file configured for this run, if cookie injection is enabled
fn cookie_supplier(config: &AppConfig, config_path: &Path) -> Option<Box<dyn CookieSupplier>> {
    let cookies = &config.settings.cookies;
    if !cookies.enable {
        return None;
    }

    let path = cookies.file.clone().unwrap_or_else(|| {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        NetscapeCookieFile::default_path(config_dir, &cookies.browser)
    });

    Some(Box::new(NetscapeCookieFile::new(cookies.browser.clone(), path)))
}
