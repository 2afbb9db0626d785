//! Transfer of resolved episode URLs into the output tree
//!
//! A [`Downloader`] pulls the bytes behind one class of resolved URL into
//! local storage. Every downloader stages its work in a temporary location
//! below the output root and relocates the finished file into the series
//! folder only once it is complete. Downloaders are looked up by the
//! [`Source`] an episode candidate came from.

mod external;
mod phased;

pub use external::ExternalProcessDownloader;
pub use phased::{
    HttpTransport, PhasedHttpDownloader, ReqwestTransport, SpeedThresholds, TransferError,
    TransferResponse,
};

use crate::config::Settings;
use crate::episode::Source;
use crate::timing::{CancelFlag, Sleeper};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that end a download attempt or a whole download
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The host demands a CAPTCHA; retrying with the same parameters will not help
    #[error("Rate limited: the file requires a CAPTCHA to download without a credential")]
    RateLimited,

    /// The credential-gated phase was needed but no credential is configured
    #[error("No credential configured for the credential-gated download phase")]
    MissingCredential,

    /// Every attempt failed
    #[error("Download failed after {attempts} attempt(s)")]
    Exhausted { attempts: u32 },

    /// The external downloader could not be started
    #[error("Failed to start external downloader: {0}")]
    ProcessSpawn(String),

    /// The external downloader reported a failure
    #[error("External downloader failed with exit code {code:?}")]
    ProcessFailed { code: Option<i32> },

    /// The external downloader succeeded but left no file behind
    #[error("No downloaded file found in {0}")]
    NoOutputFile(PathBuf),

    /// The external downloader left more than one file behind
    #[error("Expected a single downloaded file in {dir}, found {count}")]
    UnexpectedOutput { dir: PathBuf, count: usize },

    /// The URL does not have the shape this downloader expects
    #[error("Invalid download URL: {0}")]
    InvalidUrl(String),

    /// No downloader is registered for the source
    #[error("No downloader registered for source '{0}'")]
    UnknownSource(Source),

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// The user interrupted the transfer
    #[error("Download cancelled")]
    Cancelled,

    /// IO error while staging or relocating the file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Where a download belongs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination<'a> {
    pub series_name: &'a str,
    pub season: u32,
    pub episode: u32,
}

impl Destination<'_> {
    /// Folder below `output_root` that collects this series' episodes
    pub fn series_folder(&self, output_root: &Path) -> PathBuf {
        output_root.join(sanitize_filename(self.series_name))
    }

    /// `Series - S01E02` with the series name made filesystem-safe
    pub fn base_name(&self) -> String {
        crate::episode::episode_base_name(
            &sanitize_filename(self.series_name),
            self.season,
            self.episode,
        )
    }
}

/// Knobs and collaborators for one `fetch` call
#[derive(Clone, Copy)]
pub struct FetchOptions<'a> {
    pub output_root: &'a Path,
    /// Attempts per phase
    pub retries: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
    /// Credential for downloaders with an authenticated mode
    pub credential: Option<&'a str>,
    pub sleeper: &'a dyn Sleeper,
    pub cancel: &'a CancelFlag,
}

/// Pulls the file behind a resolved URL into the output tree
pub trait Downloader {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    /// Downloads `url` into the series folder of `destination`
    ///
    /// Returns the path of the finished file. Nothing is written to the
    /// series folder unless the transfer completed.
    fn fetch(
        &self,
        url: &str,
        destination: &Destination<'_>,
        options: &FetchOptions<'_>,
    ) -> Result<PathBuf, DownloadError>;
}

/// Downloaders keyed by the source they serve
#[derive(Default)]
pub struct DownloaderRegistry {
    downloaders: HashMap<Source, Box<dyn Downloader>>,
}

impl DownloaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in downloaders configured from `settings`
    pub fn standard(settings: &Settings) -> Result<Self, DownloadError> {
        let external =
            ExternalProcessDownloader::from_command(&settings.yt_dlp_command, &settings.yt_dlp_args)
                .ok_or_else(|| {
                    DownloadError::ProcessSpawn("yt_dlp_command is empty".to_string())
                })?;
        let phased = PhasedHttpDownloader::new(Box::new(ReqwestTransport::new()?));

        Ok(Self::new()
            .with(Source::GoFile, Box::new(external))
            .with(Source::PixelDrain, Box::new(phased)))
    }

    /// Registers `downloader` for `source`, replacing any previous one
    pub fn with(mut self, source: Source, downloader: Box<dyn Downloader>) -> Self {
        self.downloaders.insert(source, downloader);
        self
    }

    pub fn get(&self, source: Source) -> Result<&dyn Downloader, DownloadError> {
        self.downloaders
            .get(&source)
            .map(|d| d.as_ref())
            .ok_or(DownloadError::UnknownSource(source))
    }
}

/// Sanitizes a string for use in filenames by replacing problematic characters
///
/// Replaces characters that are invalid or problematic in filenames across platforms:
/// - Path separators: / \
/// - Reserved characters: : * ? " < > |
/// - Control characters
/// - Trim leading/trailing whitespace and dots
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();

    sanitized
        .trim_matches(|c: char| c.is_whitespace() || c == '.')
        .to_string()
}
