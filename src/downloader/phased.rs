//! Two-phase HTTP downloads from pixeldrain.com
//!
//! Phase one downloads anonymously. Shortly after a transfer starts its
//! average speed is measured once; when it falls below the anonymous
//! threshold the transfer is abandoned and phase two repeats the download
//! with the configured API key, which lifts the host's throttling.

use super::{Destination, DownloadError, Downloader, FetchOptions};
use crate::http::DEFAULT_USER_AGENT;
use crate::temp;
use crate::timing::{CancelFlag, Clock, SystemClock};
use humansize::{DECIMAL, format_size};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use serde::Deserialize;
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const API_FILE_URL: &str = "https://pixeldrain.com/api/file";

/// Error value the API returns when anonymous downloads need a CAPTCHA
const CAPTCHA_REQUIRED: &str = "file_rate_limited_captcha_required";

/// Time after which the transfer speed is measured
const SPEED_CHECK_AFTER: Duration = Duration::from_secs(5);

const CHUNK_SIZE: usize = 64 * 1024;

/// Errors of a single transfer attempt
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Request failed: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Download is rate limited and requires a CAPTCHA")]
    RateLimited,

    #[error("Transfer ended after {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// An opened transfer: response metadata plus the body stream
pub struct TransferResponse {
    pub content_disposition: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read>,
}

/// Opens a streaming GET, optionally authenticated with an API key
pub trait HttpTransport {
    fn open(&self, url: &str, credential: Option<&str>) -> Result<TransferResponse, TransferError>;
}

#[derive(Deserialize)]
struct ApiErrorBody {
    value: Option<String>,
}

/// True when a 403 body is the API's CAPTCHA-required error
fn is_captcha_response(body: &str) -> bool {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|error| error.value)
        .is_some_and(|value| value == CAPTCHA_REQUIRED)
}

/// Transport backed by a blocking reqwest client
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            // Bodies are large; the speed gate handles stalls
            .timeout(None)
            .build()
            .map_err(DownloadError::ClientBuild)?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn open(&self, url: &str, credential: Option<&str>) -> Result<TransferResponse, TransferError> {
        let mut request = self.client.get(url);
        if let Some(key) = credential {
            request = request.basic_auth("", Some(key));
        }

        let response = request
            .send()
            .map_err(|e| TransferError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 403 {
            let captcha = response
                .text()
                .is_ok_and(|body| is_captcha_response(&body));
            return Err(if captcha {
                TransferError::RateLimited
            } else {
                TransferError::Status(403)
            });
        }
        if !status.is_success() {
            return Err(TransferError::Status(status.as_u16()));
        }

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_disposition = header(CONTENT_DISPOSITION);
        let content_type = header(CONTENT_TYPE);
        let content_length = response.content_length();

        Ok(TransferResponse {
            content_disposition,
            content_type,
            content_length,
            body: Box::new(response),
        })
    }
}

/// Minimum average speed in KB/s per phase; None disables the check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedThresholds {
    pub without_credential: Option<f64>,
    pub with_credential: Option<f64>,
}

impl Default for SpeedThresholds {
    fn default() -> Self {
        Self {
            without_credential: Some(1100.0),
            with_credential: None,
        }
    }
}

/// How a single attempt ended when it did not error
enum AttemptStatus {
    Completed(PathBuf),
    LowSpeed(f64),
}

/// How a phase ended
enum PhaseOutcome {
    Completed(PathBuf),
    LowSpeed,
    Failed { rate_limited: bool },
}

enum StreamStatus {
    Complete(u64),
    LowSpeed(f64),
}

/// Downloader for pixeldrain.com share links
pub struct PhasedHttpDownloader {
    transport: Box<dyn HttpTransport>,
    clock: Box<dyn Clock>,
    thresholds: SpeedThresholds,
}

impl PhasedHttpDownloader {
    pub fn new(transport: Box<dyn HttpTransport>) -> Self {
        Self {
            transport,
            clock: Box::new(SystemClock),
            thresholds: SpeedThresholds::default(),
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_thresholds(mut self, thresholds: SpeedThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    fn run_phase(
        &self,
        phase: u8,
        api_url: &str,
        credential: Option<&str>,
        min_speed: Option<f64>,
        destination: &Destination<'_>,
        options: &FetchOptions<'_>,
    ) -> Result<PhaseOutcome, DownloadError> {
        let attempts = options.retries.max(1);
        let mut rate_limited = false;

        for attempt in 1..=attempts {
            if options.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            info!(
                "[{}] Phase {}: downloading {} (attempt {}/{})",
                self.name(),
                phase,
                destination.base_name(),
                attempt,
                attempts
            );

            match self.attempt(api_url, credential, min_speed, destination, options) {
                Ok(AttemptStatus::Completed(path)) => return Ok(PhaseOutcome::Completed(path)),
                Ok(AttemptStatus::LowSpeed(speed)) => {
                    info!(
                        "[{}] Phase {}: speed {:.0} KB/s is below the threshold, giving up on this phase",
                        self.name(),
                        phase,
                        speed
                    );
                    return Ok(PhaseOutcome::LowSpeed);
                }
                Err(TransferError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(e) => {
                    rate_limited = matches!(e, TransferError::RateLimited);
                    warn!(
                        "[{}] Phase {}: attempt {} failed: {}",
                        self.name(),
                        phase,
                        attempt,
                        e
                    );
                    if attempt < attempts {
                        options.sleeper.sleep(options.retry_delay);
                    }
                }
            }
        }

        Ok(PhaseOutcome::Failed { rate_limited })
    }

    fn attempt(
        &self,
        api_url: &str,
        credential: Option<&str>,
        min_speed: Option<f64>,
        destination: &Destination<'_>,
        options: &FetchOptions<'_>,
    ) -> Result<AttemptStatus, TransferError> {
        let response = self.transport.open(api_url, credential)?;
        let file_name = resolve_file_name(
            &destination.base_name(),
            response.content_disposition.as_deref(),
            response.content_type.as_deref(),
        );

        let staging = temp::staging_dir(options.output_root)?;
        let partial = temp::create_temp_file_in(&staging, "pixeldrain", "part")?;
        let mut file = OpenOptions::new().write(true).truncate(true).open(partial.path())?;

        let mut body = response.body;
        let received = match self.stream(
            &mut body,
            &mut file,
            response.content_length,
            min_speed,
            options.cancel,
        )? {
            StreamStatus::Complete(bytes) => bytes,
            StreamStatus::LowSpeed(speed) => return Ok(AttemptStatus::LowSpeed(speed)),
        };

        if let Some(expected) = response.content_length
            && received < expected
        {
            return Err(TransferError::Truncated { received, expected });
        }

        file.sync_all()?;
        drop(file);

        let final_path = destination.series_folder(options.output_root).join(&file_name);
        let stored = partial.persist(&final_path)?;
        info!(
            "[{}] Saved {} ({})",
            self.name(),
            stored.display(),
            format_size(received, DECIMAL)
        );
        Ok(AttemptStatus::Completed(stored))
    }

    /// Copies the body into `file`, measuring the average speed once
    fn stream(
        &self,
        body: &mut dyn Read,
        file: &mut dyn Write,
        total: Option<u64>,
        min_speed: Option<f64>,
        cancel: &CancelFlag,
    ) -> Result<StreamStatus, TransferError> {
        let started = self.clock.now();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut received: u64 = 0;
        let mut speed_checked = false;
        let mut last_reported_percent = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let n = body.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])?;
            received += n as u64;

            let elapsed = self.clock.now().saturating_duration_since(started);
            if !speed_checked && elapsed > SPEED_CHECK_AFTER {
                speed_checked = true;
                let speed = received as f64 / elapsed.as_secs_f64() / 1024.0;
                debug!("Average speed after {:?}: {:.0} KB/s", elapsed, speed);
                if let Some(min) = min_speed
                    && speed < min
                {
                    return Ok(StreamStatus::LowSpeed(speed));
                }
            }

            if let Some(total) = total.filter(|t| *t > 0) {
                let percent = (received * 100 / total) as u32;
                if percent >= last_reported_percent + 10 {
                    debug!(
                        "Progress: {}% ({} / {})",
                        percent,
                        format_size(received, DECIMAL),
                        format_size(total, DECIMAL)
                    );
                    last_reported_percent = percent - (percent % 10);
                }
            }
        }

        file.flush()?;
        Ok(StreamStatus::Complete(received))
    }
}

impl Downloader for PhasedHttpDownloader {
    fn name(&self) -> &'static str {
        "pixeldrain"
    }

    fn fetch(
        &self,
        url: &str,
        destination: &Destination<'_>,
        options: &FetchOptions<'_>,
    ) -> Result<PathBuf, DownloadError> {
        let api_url = api_file_url(url)?;
        debug!("Resolved {} to {}", url, api_url);

        let first = self.run_phase(
            1,
            &api_url,
            None,
            self.thresholds.without_credential,
            destination,
            options,
        )?;
        let first_failure = match first {
            PhaseOutcome::Completed(path) => return Ok(path),
            PhaseOutcome::LowSpeed => None,
            PhaseOutcome::Failed { rate_limited } => Some(rate_limited),
        };

        let Some(credential) = options.credential else {
            warn!(
                "[{}] No API key configured, cannot continue with phase 2",
                self.name()
            );
            return Err(match first_failure {
                Some(true) => DownloadError::RateLimited,
                Some(false) => DownloadError::Exhausted {
                    attempts: options.retries.max(1),
                },
                None => DownloadError::MissingCredential,
            });
        };

        match self.run_phase(
            2,
            &api_url,
            Some(credential),
            self.thresholds.with_credential,
            destination,
            options,
        )? {
            PhaseOutcome::Completed(path) => Ok(path),
            PhaseOutcome::Failed { rate_limited: true } => Err(DownloadError::RateLimited),
            PhaseOutcome::Failed { .. } | PhaseOutcome::LowSpeed => Err(DownloadError::Exhausted {
                attempts: options.retries.max(1) * 2,
            }),
        }
    }
}

/// Maps a share link such as `https://pixeldrain.com/u/abc` to its API download URL
fn api_file_url(url: &str) -> Result<String, DownloadError> {
    let parsed = url::Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;
    let file_id = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .ok_or_else(|| DownloadError::InvalidUrl(url.to_string()))?;
    Ok(format!("{}/{}", API_FILE_URL, file_id))
}

/// Final file name: the episode base name plus the best known extension
///
/// The extension comes from the `filename` of the content disposition,
/// else from the content type. Without either the base name is used bare.
pub(crate) fn resolve_file_name(
    base_name: &str,
    content_disposition: Option<&str>,
    content_type: Option<&str>,
) -> String {
    let extension = content_disposition
        .and_then(disposition_extension)
        .or_else(|| content_type.and_then(mime_extension).map(str::to_string));

    match extension {
        Some(ext) => format!("{}.{}", base_name, ext),
        None => base_name.to_string(),
    }
}

fn disposition_extension(header: &str) -> Option<String> {
    let file_name = header.split(';').find_map(|part| {
        part.trim()
            .strip_prefix("filename=")
            .map(|name| name.trim_matches('"'))
    })?;
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
}

fn mime_extension(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim();
    match mime.to_ascii_lowercase().as_str() {
        "video/mp4" => Some("mp4"),
        "video/x-matroska" => Some("mkv"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::testing::{ManualClock, RecordingSleeper};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::fs;

    /// Body that hands out fixed chunks and advances a clock per chunk
    struct TimedBody {
        chunks: VecDeque<Vec<u8>>,
        offset: usize,
        clock: ManualClock,
        per_chunk: Duration,
        /// Raises the flag once this many chunks were handed out
        cancel_after: Option<(usize, CancelFlag)>,
        delivered: usize,
    }

    impl Read for TimedBody {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(chunk) = self.chunks.front() else {
                return Ok(0);
            };
            if self.offset == 0 {
                self.clock.advance(self.per_chunk);
            }
            let len = chunk.len();
            let n = (len - self.offset).min(buf.len());
            buf[..n].copy_from_slice(&chunk[self.offset..self.offset + n]);
            self.offset += n;
            if self.offset == len {
                self.chunks.pop_front();
                self.offset = 0;
                self.delivered += 1;
                if let Some((after, flag)) = &self.cancel_after
                    && *after == self.delivered
                {
                    flag.cancel();
                }
            }
            Ok(n)
        }
    }

    enum Scripted {
        Body {
            chunks: usize,
            chunk_size: usize,
            per_chunk: Duration,
            content_type: Option<&'static str>,
        },
        /// Announces `announced` chunks but delivers only `chunks`
        Truncated { chunks: usize, announced: usize },
        /// Delivers chunks until the user interrupts after `after` of them
        Interrupted { chunks: usize, after: usize },
        Fail(fn() -> TransferError),
    }

    const SMALL_CHUNK: usize = 256 * 1024;

    /// Transport replaying scripted responses and recording requests
    struct FakeTransport {
        clock: ManualClock,
        cancel: CancelFlag,
        script: RefCell<VecDeque<Scripted>>,
        requests: RefCell<Vec<(String, Option<String>)>>,
    }

    impl FakeTransport {
        fn new(clock: &ManualClock, cancel: &CancelFlag, script: Vec<Scripted>) -> Self {
            Self {
                clock: clock.clone(),
                cancel: cancel.clone(),
                script: RefCell::new(script.into()),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn body(&self, chunks: usize, chunk_size: usize, per_chunk: Duration) -> TimedBody {
            TimedBody {
                chunks: (0..chunks).map(|_| vec![7u8; chunk_size]).collect(),
                offset: 0,
                clock: self.clock.clone(),
                per_chunk,
                cancel_after: None,
                delivered: 0,
            }
        }
    }

    impl HttpTransport for FakeTransport {
        fn open(&self, url: &str, credential: Option<&str>) -> Result<TransferResponse, TransferError> {
            self.requests
                .borrow_mut()
                .push((url.to_string(), credential.map(str::to_string)));

            match self.script.borrow_mut().pop_front() {
                Some(Scripted::Body {
                    chunks,
                    chunk_size,
                    per_chunk,
                    content_type,
                }) => Ok(TransferResponse {
                    content_disposition: None,
                    content_type: content_type.map(str::to_string),
                    content_length: Some((chunks * chunk_size) as u64),
                    body: Box::new(self.body(chunks, chunk_size, per_chunk)),
                }),
                Some(Scripted::Truncated { chunks, announced }) => Ok(TransferResponse {
                    content_disposition: None,
                    content_type: Some("video/mp4".to_string()),
                    content_length: Some((announced * SMALL_CHUNK) as u64),
                    body: Box::new(self.body(chunks, SMALL_CHUNK, Duration::from_millis(100))),
                }),
                Some(Scripted::Interrupted { chunks, after }) => {
                    let mut body = self.body(chunks, SMALL_CHUNK, Duration::from_millis(100));
                    body.cancel_after = Some((after, self.cancel.clone()));
                    Ok(TransferResponse {
                        content_disposition: None,
                        content_type: Some("video/mp4".to_string()),
                        content_length: Some((chunks * SMALL_CHUNK) as u64),
                        body: Box::new(body),
                    })
                }
                Some(Scripted::Fail(make)) => Err(make()),
                None => Err(TransferError::Status(500)),
            }
        }
    }

    /// Shares a transport between the downloader and the test
    struct Shared(std::rc::Rc<FakeTransport>);

    impl HttpTransport for Shared {
        fn open(&self, url: &str, credential: Option<&str>) -> Result<TransferResponse, TransferError> {
            self.0.open(url, credential)
        }
    }

    fn fast_body() -> Scripted {
        // 2 MiB per second, well above the anonymous gate
        Scripted::Body {
            chunks: 10,
            chunk_size: 2 * 1024 * 1024,
            per_chunk: Duration::from_secs(1),
            content_type: Some("video/x-matroska"),
        }
    }

    fn slow_body() -> Scripted {
        // 100 KiB per second, far below the anonymous gate
        Scripted::Body {
            chunks: 20,
            chunk_size: 100 * 1024,
            per_chunk: Duration::from_secs(1),
            content_type: Some("video/mp4"),
        }
    }

    const DESTINATION: Destination<'static> = Destination {
        series_name: "Dark",
        season: 1,
        episode: 5,
    };

    struct Harness {
        root: tempfile::TempDir,
        sleeper: RecordingSleeper,
        cancel: CancelFlag,
        transport: std::rc::Rc<FakeTransport>,
        downloader: PhasedHttpDownloader,
    }

    impl Harness {
        fn new(script: Vec<Scripted>) -> Self {
            let clock = ManualClock::new();
            let cancel = CancelFlag::new();
            let transport = std::rc::Rc::new(FakeTransport::new(&clock, &cancel, script));
            let downloader = PhasedHttpDownloader::new(Box::new(Shared(transport.clone())))
                .with_clock(Box::new(clock));
            Self {
                root: tempfile::tempdir().unwrap(),
                sleeper: RecordingSleeper::default(),
                cancel,
                transport,
                downloader,
            }
        }

        fn fetch(&self, credential: Option<&str>) -> Result<PathBuf, DownloadError> {
            let options = FetchOptions {
                output_root: self.root.path(),
                retries: 3,
                retry_delay: Duration::from_secs(5),
                credential,
                sleeper: &self.sleeper,
                cancel: &self.cancel,
            };
            self.downloader
                .fetch("https://pixeldrain.com/u/AbC123", &DESTINATION, &options)
        }

        fn credentials_used(&self) -> Vec<Option<String>> {
            self.transport
                .requests
                .borrow()
                .iter()
                .map(|(_, credential)| credential.clone())
                .collect()
        }
    }

    #[test]
    fn test_fast_anonymous_download_completes_in_phase_one() {
        let harness = Harness::new(vec![fast_body()]);

        let path = harness.fetch(Some("key")).unwrap();

        assert_eq!(path, harness.root.path().join("Dark").join("Dark - S01E05.mkv"));
        assert_eq!(fs::metadata(&path).unwrap().len(), 10 * 2 * 1024 * 1024);
        assert_eq!(harness.credentials_used(), vec![None]);
        assert_eq!(
            harness.transport.requests.borrow()[0].0,
            "https://pixeldrain.com/api/file/AbC123"
        );
    }

    #[test]
    fn test_low_speed_switches_to_credential_phase() {
        let harness = Harness::new(vec![slow_body(), slow_body()]);

        let path = harness.fetch(Some("secret")).unwrap();

        assert_eq!(path, harness.root.path().join("Dark").join("Dark - S01E05.mp4"));
        assert_eq!(
            harness.credentials_used(),
            vec![None, Some("secret".to_string())]
        );
        // The slow phase-one transfer was abandoned without retry pauses
        assert_eq!(harness.sleeper.count(), 0);
        let staging = harness.root.path().join(temp::STAGING_DIR);
        assert_eq!(fs::read_dir(staging).unwrap().count(), 0);
    }

    #[test]
    fn test_low_speed_without_credential_is_reported() {
        let harness = Harness::new(vec![slow_body()]);

        let result = harness.fetch(None);

        assert!(matches!(result, Err(DownloadError::MissingCredential)));
        assert!(!harness.root.path().join("Dark").exists());
    }

    #[test]
    fn test_rate_limit_counts_as_failed_attempt() {
        let harness = Harness::new(vec![
            Scripted::Fail(|| TransferError::RateLimited),
            Scripted::Fail(|| TransferError::RateLimited),
            Scripted::Fail(|| TransferError::RateLimited),
        ]);

        let result = harness.fetch(None);

        assert!(matches!(result, Err(DownloadError::RateLimited)));
        assert_eq!(harness.credentials_used().len(), 3);
        assert_eq!(harness.sleeper.count(), 2);
    }

    #[test]
    fn test_phase_one_failures_fall_through_to_phase_two() {
        let harness = Harness::new(vec![
            Scripted::Fail(|| TransferError::Status(503)),
            Scripted::Fail(|| TransferError::Network("reset".to_string())),
            Scripted::Fail(|| TransferError::RateLimited),
            fast_body(),
        ]);

        let path = harness.fetch(Some("secret")).unwrap();

        assert!(path.exists());
        assert_eq!(
            harness.credentials_used(),
            vec![None, None, None, Some("secret".to_string())]
        );
    }

    #[test]
    fn test_failing_host_without_credential_is_exhausted() {
        let harness = Harness::new(vec![
            Scripted::Fail(|| TransferError::Status(502)),
            Scripted::Fail(|| TransferError::Network("reset".to_string())),
            Scripted::Fail(|| TransferError::Status(503)),
        ]);

        let result = harness.fetch(None);

        assert!(matches!(result, Err(DownloadError::Exhausted { attempts: 3 })));
        assert_eq!(harness.credentials_used(), vec![None, None, None]);
    }

    #[test]
    fn test_truncated_body_is_retried() {
        let harness = Harness::new(vec![
            Scripted::Truncated {
                chunks: 3,
                announced: 4,
            },
            fast_body(),
        ]);

        let path = harness.fetch(None).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), 10 * 2 * 1024 * 1024);
        assert_eq!(harness.credentials_used(), vec![None, None]);
        assert_eq!(*harness.sleeper.calls.borrow(), vec![Duration::from_secs(5)]);
        let staging = harness.root.path().join(temp::STAGING_DIR);
        assert_eq!(fs::read_dir(staging).unwrap().count(), 0);
    }

    #[test]
    fn test_interrupt_mid_transfer_leaves_nothing_behind() {
        let harness = Harness::new(vec![
            Scripted::Interrupted {
                chunks: 8,
                after: 3,
            },
            fast_body(),
        ]);

        let result = harness.fetch(Some("secret"));

        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert_eq!(harness.credentials_used(), vec![None]);
        assert_eq!(harness.sleeper.count(), 0);
        let staging = harness.root.path().join(temp::STAGING_DIR);
        assert_eq!(fs::read_dir(staging).unwrap().count(), 0);
        assert!(!harness.root.path().join("Dark").exists());
    }

    #[test]
    fn test_both_phases_exhausted() {
        let harness = Harness::new(Vec::new());

        let result = harness.fetch(Some("secret"));

        assert!(matches!(result, Err(DownloadError::Exhausted { attempts: 6 })));
        // Two pauses per phase, none after a phase's last attempt
        assert_eq!(harness.sleeper.count(), 4);
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            api_file_url("not a url"),
            Err(DownloadError::InvalidUrl(_))
        ));
        assert_eq!(
            api_file_url("https://pixeldrain.com/u/xyz/").unwrap(),
            "https://pixeldrain.com/api/file/xyz"
        );
    }

    #[test]
    fn test_captcha_detection() {
        assert!(is_captcha_response(
            r#"{"success":false,"value":"file_rate_limited_captcha_required","message":"..."}"#
        ));
        assert!(!is_captcha_response(r#"{"success":false,"value":"forbidden"}"#));
        assert!(!is_captcha_response("<html>403</html>"));
    }

    #[test]
    fn test_file_name_resolution() {
        let base = "Dark - S01E05";
        assert_eq!(
            resolve_file_name(base, Some("attachment; filename=\"Dark.S01E05.mkv\""), Some("video/mp4")),
            "Dark - S01E05.mkv"
        );
        assert_eq!(
            resolve_file_name(base, None, Some("video/mp4; charset=binary")),
            "Dark - S01E05.mp4"
        );
        assert_eq!(
            resolve_file_name(base, Some("inline"), Some("video/x-matroska")),
            "Dark - S01E05.mkv"
        );
        assert_eq!(
            resolve_file_name(base, None, Some("application/octet-stream")),
            "Dark - S01E05"
        );
    }
}
