//! One check cycle over every tracked series
//!
//! For each series the orchestrator selects a provider, discovers the
//! episodes ahead of the stored watermark, groups the alternatives per
//! episode and tries their sources in priority order. The watermark is
//! advanced right after each confirmed download, before the next episode
//! is touched.

use crate::ProgressEvent;
use crate::config::{SeriesConfig, Settings};
use crate::downloader::{Destination, DownloadError, DownloaderRegistry, FetchOptions};
use crate::episode::{Episode, Source, Watermark};
use crate::http::{HttpError, PageFetcher, SessionFactory};
use crate::progress::{ProgressError, ProgressStore};
use crate::provider::{Provider, ProviderError, ProviderRegistry};
use crate::timing::{CancelFlag, Sleeper, ThreadSleeper, random_pause, sleep_cancellable};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that end the processing of a single series
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Session error: {0}")]
    Session(#[from] HttpError),

    #[error("Progress store error: {0}")]
    Progress(#[from] ProgressError),
}

/// Tally of one check cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckSummary {
    /// Episodes downloaded and recorded
    pub downloaded: usize,
    /// Episodes for which every source failed
    pub failed: usize,
    /// Series whose listing page showed no episodes at all
    pub blocked: usize,
    /// Series that could not be processed
    pub errored: usize,
    /// The run stopped early on user request
    pub cancelled: bool,
}

/// How a single series ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesOutcome {
    /// The listing had no parseable episodes, likely a block or CAPTCHA
    PossiblyBlocked,
    /// The listing had episodes, none of them new
    NothingNew { total_known: usize },
    /// New episodes were worked through
    Processed { downloaded: usize, failed: usize },
    /// Cancelled while working through new episodes
    Cancelled { downloaded: usize, failed: usize },
}

/// Drives discovery and downloads for a list of series
pub struct Orchestrator<'a> {
    settings: &'a Settings,
    providers: &'a ProviderRegistry,
    downloaders: &'a DownloaderRegistry,
    sessions: &'a dyn SessionFactory,
    progress: &'a dyn ProgressStore,
    sleeper: &'a dyn Sleeper,
    cancel: CancelFlag,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        settings: &'a Settings,
        providers: &'a ProviderRegistry,
        downloaders: &'a DownloaderRegistry,
        sessions: &'a dyn SessionFactory,
        progress: &'a dyn ProgressStore,
    ) -> Self {
        Self {
            settings,
            providers,
            downloaders,
            sessions,
            progress,
            sleeper: &ThreadSleeper,
            cancel: CancelFlag::new(),
        }
    }

    /// Uses `sleeper` for pacing pauses and download retry delays
    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Processes every series in order and reports the tally
    ///
    /// A failing series is reported and skipped; only cancellation stops
    /// the cycle early.
    pub fn run<F>(&self, series: &[SeriesConfig], mut progress_callback: F) -> CheckSummary
    where
        F: FnMut(ProgressEvent),
    {
        let mut summary = CheckSummary::default();

        progress_callback(ProgressEvent::CheckStarted {
            series_count: series.len(),
        });

        for (index, entry) in series.iter().enumerate() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            if index > 0 {
                self.pause(&self.settings.pacing.series_pause.seconds(), &mut progress_callback);
            }

            progress_callback(ProgressEvent::SeriesStarted {
                index,
                total: series.len(),
                series: entry.name.clone(),
            });

            match self.process_series(entry, &mut progress_callback) {
                Ok(SeriesOutcome::PossiblyBlocked) => summary.blocked += 1,
                Ok(SeriesOutcome::NothingNew { .. }) => {}
                Ok(SeriesOutcome::Processed { downloaded, failed }) => {
                    summary.downloaded += downloaded;
                    summary.failed += failed;
                }
                Ok(SeriesOutcome::Cancelled { downloaded, failed }) => {
                    summary.downloaded += downloaded;
                    summary.failed += failed;
                    summary.cancelled = true;
                    break;
                }
                Err(e) => {
                    error!("Series '{}' failed: {}", entry.name, e);
                    summary.errored += 1;
                    progress_callback(ProgressEvent::SeriesFailed {
                        series: entry.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if summary.cancelled {
            progress_callback(ProgressEvent::Cancelled);
        }
        progress_callback(ProgressEvent::CheckComplete {
            summary: summary.clone(),
        });

        summary
    }

    /// Discovers and downloads the new episodes of one series
    pub fn process_series<F>(
        &self,
        series: &SeriesConfig,
        progress_callback: &mut F,
    ) -> Result<SeriesOutcome, SeriesError>
    where
        F: FnMut(ProgressEvent),
    {
        let provider = self.providers.select(&series.url)?;
        let watermark = self.progress.watermark(&series.name)?;
        debug!(
            "Checking '{}' with {} from {}",
            series.name,
            provider.name(),
            watermark
        );

        let session = self.sessions.open_session(&series.url)?;
        let discovery = provider.discover_episodes(session.as_ref(), &series.url, watermark)?;

        if discovery.total_known == 0 {
            warn!(
                "No episodes found for '{}'; the page may be blocked or asking for a CAPTCHA",
                series.name
            );
            progress_callback(ProgressEvent::PossiblyBlocked {
                series: series.name.clone(),
            });
            return Ok(SeriesOutcome::PossiblyBlocked);
        }

        if discovery.candidates.is_empty() {
            debug!(
                "'{}' lists {} episode link(s), none after {}",
                series.name, discovery.total_known, watermark
            );
            progress_callback(ProgressEvent::NothingNew {
                series: series.name.clone(),
            });
            return Ok(SeriesOutcome::NothingNew {
                total_known: discovery.total_known,
            });
        }

        let groups = group_by_episode(discovery.candidates, &self.settings.source_priority);
        info!("'{}' has {} new episode(s)", series.name, groups.len());
        progress_callback(ProgressEvent::NewEpisodes {
            series: series.name.clone(),
            count: groups.len(),
        });

        self.pause(&self.settings.pacing.download_pause.seconds(), progress_callback);

        let mut downloaded = 0;
        let mut failed = 0;

        for (mark, alternatives) in groups {
            if self.cancel.is_cancelled() {
                return Ok(SeriesOutcome::Cancelled { downloaded, failed });
            }

            progress_callback(ProgressEvent::EpisodeStarted {
                series: series.name.clone(),
                season: mark.season,
                episode: mark.episode,
                sources: alternatives.iter().map(|e| e.source).collect(),
            });

            match self.download_group(
                series,
                provider,
                session.as_ref(),
                mark,
                &alternatives,
                progress_callback,
            ) {
                GroupResult::Downloaded { source, path } => {
                    if !self.progress.advance(&series.name, mark)? {
                        debug!("'{}' was already recorded at or past {}", series.name, mark);
                    }
                    downloaded += 1;
                    progress_callback(ProgressEvent::EpisodeDownloaded {
                        series: series.name.clone(),
                        season: mark.season,
                        episode: mark.episode,
                        source,
                        path,
                    });
                }
                GroupResult::Exhausted => {
                    warn!(
                        "All sources failed for '{}' {}, moving on",
                        series.name, mark
                    );
                    failed += 1;
                    progress_callback(ProgressEvent::EpisodeFailed {
                        series: series.name.clone(),
                        season: mark.season,
                        episode: mark.episode,
                    });
                }
                GroupResult::Cancelled => {
                    return Ok(SeriesOutcome::Cancelled { downloaded, failed });
                }
            }
        }

        Ok(SeriesOutcome::Processed { downloaded, failed })
    }

    /// Tries each alternative of one episode until a download succeeds
    fn download_group<F>(
        &self,
        series: &SeriesConfig,
        provider: &dyn Provider,
        session: &dyn PageFetcher,
        mark: Watermark,
        alternatives: &[Episode],
        progress_callback: &mut F,
    ) -> GroupResult
    where
        F: FnMut(ProgressEvent),
    {
        let destination = Destination {
            series_name: &series.name,
            season: mark.season,
            episode: mark.episode,
        };
        let options = FetchOptions {
            output_root: &self.settings.download_directory,
            retries: self.settings.download_retries,
            retry_delay: self.settings.retry_delay(),
            credential: self.settings.credential(),
            sleeper: self.sleeper,
            cancel: &self.cancel,
        };

        for candidate in alternatives {
            if self.cancel.is_cancelled() {
                return GroupResult::Cancelled;
            }

            progress_callback(ProgressEvent::SourceAttempt {
                series: series.name.clone(),
                season: mark.season,
                episode: mark.episode,
                source: candidate.source,
            });

            let attempt = provider
                .resolve_download_url(session, &candidate.link)
                .map_err(SourceFailure::Resolve)
                .and_then(|url| {
                    debug!("Resolved {} to {}", candidate.link, url);
                    self.downloaders
                        .get(candidate.source)
                        .and_then(|downloader| downloader.fetch(&url, &destination, &options))
                        .map_err(SourceFailure::Download)
                });

            match attempt {
                Ok(path) => {
                    return GroupResult::Downloaded {
                        source: candidate.source,
                        path,
                    };
                }
                Err(SourceFailure::Download(DownloadError::Cancelled)) => {
                    return GroupResult::Cancelled;
                }
                Err(failure) => {
                    warn!(
                        "Source {} failed for '{}' {}: {}",
                        candidate.source, series.name, mark, failure
                    );
                    progress_callback(ProgressEvent::SourceFailed {
                        series: series.name.clone(),
                        season: mark.season,
                        episode: mark.episode,
                        source: candidate.source,
                        reason: failure.to_string(),
                    });
                }
            }
        }

        GroupResult::Exhausted
    }

    fn pause<F>(&self, range: &RangeInclusive<u64>, progress_callback: &mut F)
    where
        F: FnMut(ProgressEvent),
    {
        let duration = random_pause(range);
        if duration.is_zero() {
            return;
        }
        progress_callback(ProgressEvent::Pausing { duration });
        if !sleep_cancellable(self.sleeper, duration, &self.cancel) {
            debug!("Pause interrupted");
        }
    }
}

/// Why a single source did not deliver an episode
#[derive(Debug, Error)]
enum SourceFailure {
    #[error("could not resolve link: {0}")]
    Resolve(ProviderError),

    #[error("{0}")]
    Download(DownloadError),
}

enum GroupResult {
    Downloaded { source: Source, path: PathBuf },
    Exhausted,
    Cancelled,
}

/// Groups candidates per `(season, episode)` in ascending order
///
/// Within a group, sources are ordered by their position in `priority`;
/// unlisted sources follow the listed ones and ties keep discovery order.
pub fn group_by_episode(
    candidates: Vec<Episode>,
    priority: &[Source],
) -> Vec<(Watermark, Vec<Episode>)> {
    let mut groups: BTreeMap<Watermark, Vec<Episode>> = BTreeMap::new();
    for candidate in candidates {
        groups
            .entry(candidate.watermark())
            .or_default()
            .push(candidate);
    }

    let rank = |source: Source| {
        priority
            .iter()
            .position(|s| *s == source)
            .unwrap_or(priority.len())
    };

    groups
        .into_iter()
        .map(|(mark, mut alternatives)| {
            alternatives.sort_by_key(|e| rank(e.source));
            (mark, alternatives)
        })
        .collect()
}
