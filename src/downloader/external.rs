//! Downloads through an external command-line tool (yt-dlp by default)

use super::{Destination, DownloadError, Downloader, FetchOptions};
use crate::temp;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// File suffixes the tool uses for unfinished work
const PARTIAL_SUFFIXES: [&str; 4] = [".part", ".ytdl", ".temp", ".tmp"];

/// Downloader that delegates the transfer to an external tool
///
/// The tool is invoked as
/// `<program> <args...> --output <template> --quiet --progress <extra_args...> <url>`
/// inside a private staging directory. The template names the file
/// `Series - S01E02.<ext>` and leaves the extension to the tool. On success
/// the staging directory must hold exactly one finished file, which is then
/// moved into the series folder.
#[derive(Debug, Clone)]
pub struct ExternalProcessDownloader {
    program: String,
    args: Vec<String>,
    extra_args: Vec<String>,
}

impl ExternalProcessDownloader {
    /// Creates a downloader from a command line and extra tool arguments
    ///
    /// Returns None when `command` is empty.
    pub fn from_command(command: &[String], extra_args: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            extra_args: extra_args.to_vec(),
        })
    }

    fn attempt(
        &self,
        url: &str,
        destination: &Destination<'_>,
        options: &FetchOptions<'_>,
    ) -> Result<PathBuf, DownloadError> {
        let staging = temp::staging_dir(options.output_root)?;
        let work_dir = temp::create_temp_dir_in(&staging, "ytdlp")?;
        let template = work_dir.join(format!("{}.%(ext)s", destination.base_name()));

        debug!("Running {} for {}", self.program, url);

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg("--output")
            .arg(&template)
            .arg("--quiet")
            .arg("--progress")
            .args(&self.extra_args)
            .arg(url)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| DownloadError::ProcessSpawn(format!("{}: {}", self.program, e)))?;

        if options.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        if !status.success() {
            return Err(DownloadError::ProcessFailed {
                code: status.code(),
            });
        }

        let produced = single_output_file(&work_dir)?;
        let Some(file_name) = produced.file_name() else {
            return Err(DownloadError::NoOutputFile(work_dir.to_path_buf()));
        };
        let final_path = destination.series_folder(options.output_root).join(file_name);

        temp::relocate(&produced, &final_path)?;
        Ok(final_path)
    }
}

impl Downloader for ExternalProcessDownloader {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn fetch(
        &self,
        url: &str,
        destination: &Destination<'_>,
        options: &FetchOptions<'_>,
    ) -> Result<PathBuf, DownloadError> {
        let attempts = options.retries.max(1);

        for attempt in 1..=attempts {
            if options.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            info!(
                "[{}] Downloading {} (attempt {}/{})",
                self.name(),
                destination.base_name(),
                attempt,
                attempts
            );

            match self.attempt(url, destination, options) {
                Ok(path) => {
                    info!("[{}] Saved {}", self.name(), path.display());
                    return Ok(path);
                }
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(e) => {
                    warn!("[{}] Attempt {} failed: {}", self.name(), attempt, e);
                    if attempt < attempts {
                        options.sleeper.sleep(options.retry_delay);
                    }
                }
            }
        }

        Err(DownloadError::Exhausted { attempts })
    }
}

/// The one finished file the tool left in `dir`
fn single_output_file(dir: &Path) -> Result<PathBuf, DownloadError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path.to_string_lossy();
        if PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            continue;
        }
        files.push(path);
    }

    match files.len() {
        0 => Err(DownloadError::NoOutputFile(dir.to_path_buf())),
        1 => Ok(files.remove(0)),
        count => Err(DownloadError::UnexpectedOutput {
            dir: dir.to_path_buf(),
            count,
        }),
    }
}
