//! Logging init: file under the platform data dir, or graceful fallback to stderr

use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

const DEFAULT_FILTER: &str = "info,episode_courier=debug";
const LOG_FILE_NAME: &str = "episode_courier.log";

/// Errors that can occur while setting up logging
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Could not determine data directory")]
    NoDataDirectory,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Subscriber init failed: {0}")]
    Init(String),
}

/// Writer that is either a file or stderr (used when file clone fails)
enum FileOrStderr {
    File(fs::File),
    Stderr,
}

impl io::Write for FileOrStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileOrStderr::File(f) => f.write(buf),
            FileOrStderr::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileOrStderr::File(f) => f.flush(),
            FileOrStderr::Stderr => io::stderr().lock().flush(),
        }
    }
}

struct FileMakeWriter(fs::File);

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileOrStderr;

    fn make_writer(&'a self) -> Self::Writer {
        self.0
            .try_clone()
            .map(FileOrStderr::File)
            .unwrap_or(FileOrStderr::Stderr)
    }
}

/// Platform data directory of the application
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "episode_courier")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize structured logging to `<data dir>/episode_courier.log`
///
/// On failure (e.g. log dir unwritable) returns Err so the caller can fall back to stderr.
pub fn init_logging() -> Result<PathBuf, LogError> {
    let log_dir = data_dir().ok_or(LogError::NoDataDirectory)?;
    fs::create_dir_all(&log_dir)?;
    let log_file_path = log_dir.join(LOG_FILE_NAME);

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)?;

    let writer = BoxMakeWriter::new(FileMakeWriter(file));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| LogError::Init(e.to_string()))?;

    tracing::info!("Logging initialized at {}", log_file_path.display());

    Ok(log_file_path)
}

/// Initialize logging to stderr only. Use when `init_logging()` fails so the CLI doesn't crash.
pub fn init_logging_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}
