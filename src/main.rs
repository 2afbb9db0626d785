use clap::Parser;
use episode_courier::config::DEFAULT_CONFIG_FILE;
use episode_courier::logging::{init_logging, init_logging_stderr};
use episode_courier::timing::{ThreadSleeper, sleep_cancellable};
use episode_courier::{CancelFlag, ProgressEvent, run_check};
use humansize::{DECIMAL, format_size};
use std::path::PathBuf;
use std::process;

/// Watch link pages for new episodes and download them
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Run a single check and exit
    #[arg(long)]
    once: bool,
}

/// Handles progress events and prints formatted output to stdout
fn handle_progress_event(event: ProgressEvent) {
    match event {
        ProgressEvent::ConfigUnavailable { path, reason } => {
            eprintln!(
                "Error: Cannot load configuration from {}: {}",
                path.display(),
                reason
            );
        }
        ProgressEvent::CheckStarted { series_count } => {
            println!("\n=== Checking {} series ===", series_count);
        }
        ProgressEvent::Pausing { duration } => {
            println!("  Waiting {}s...", duration.as_secs());
        }
        ProgressEvent::SeriesStarted {
            index,
            total,
            series,
        } => {
            println!("\n[{}/{}] {}", index + 1, total, series);
        }
        ProgressEvent::PossiblyBlocked { series } => {
            println!(
                "  No episodes found for '{}'. The page may be blocked or asking for a CAPTCHA.",
                series
            );
        }
        ProgressEvent::NothingNew { .. } => {
            println!("  No new episodes.");
        }
        ProgressEvent::NewEpisodes { count, .. } => {
            println!("  Found {} new episode(s)", count);
        }
        ProgressEvent::EpisodeStarted {
            season,
            episode,
            sources,
            ..
        } => {
            let sources: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
            println!(
                "  S{:02}E{:02}: available from {}",
                season,
                episode,
                sources.join(", ")
            );
        }
        ProgressEvent::SourceAttempt { source, .. } => {
            println!("    Trying {}...", source);
        }
        ProgressEvent::SourceFailed { source, reason, .. } => {
            println!("    {} failed: {}", source, reason);
        }
        ProgressEvent::EpisodeDownloaded { path, .. } => {
            let size = std::fs::metadata(&path)
                .map(|m| format_size(m.len(), DECIMAL))
                .unwrap_or_else(|_| "unknown size".to_string());
            println!("    Saved {} ({})", path.display(), size);
        }
        ProgressEvent::EpisodeFailed {
            series,
            season,
            episode,
        } => {
            println!(
                "    All sources failed for {} S{:02}E{:02}, will retry next check",
                series, season, episode
            );
        }
        ProgressEvent::SeriesFailed { series, reason } => {
            eprintln!("  Error checking '{}': {}", series, reason);
        }
        ProgressEvent::CheckAborted { reason } => {
            eprintln!("\nError: Check aborted: {}", reason);
        }
        ProgressEvent::Cancelled => {
            println!("\nInterrupted, stopping.");
        }
        ProgressEvent::CheckComplete { summary } => {
            println!(
                "\nCheck complete! Downloaded {}, failed {}, blocked {}, errors {}.",
                summary.downloaded, summary.failed, summary.blocked, summary.errored
            );
        }
    }
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging() {
        init_logging_stderr();
        tracing::warn!("File logging unavailable ({}), logging to stderr", e);
    }

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.cancel()) {
        eprintln!("Error: Failed to install Ctrl-C handler: {}", e);
        process::exit(1);
    }

    loop {
        let next_check = run_check(&args.config, &cancel, handle_progress_event);

        if args.once || cancel.is_cancelled() {
            break;
        }

        println!("\nNext check in {} minute(s).", next_check.as_secs() / 60);
        if !sleep_cancellable(&ThreadSleeper, next_check, &cancel) {
            println!("Interrupted, exiting.");
            break;
        }
    }
}
