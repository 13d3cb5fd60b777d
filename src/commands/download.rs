//! `debrid-dl download` – unlock, fetch and record a batch of links.

use anyhow::{Context, Result, bail};
use chrono::Local;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::acquirer::Progress;
use crate::batch::{Batch, BatchObserver, DuplicateDecision, LinkOutcome};
use crate::config::Config;
use crate::error::DebridError;
use crate::links::extract_links;
use crate::models::HistoryEntry;
use crate::resolver::PollProgress;

/// Prints batch events and draws one progress bar per file.
struct TerminalObserver {
    skip_duplicates: bool,
    bar: Option<ProgressBar>,
}

impl TerminalObserver {
    fn new(skip_duplicates: bool) -> Self {
        Self {
            skip_duplicates,
            bar: None,
        }
    }

    fn spinner(&mut self, message: String) {
        let bar = self.bar.get_or_insert_with(|| {
            let pb = ProgressBar::new_spinner();
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        });
        bar.set_message(message);
    }

    fn clear(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
    }
}

impl BatchObserver for TerminalObserver {
    fn on_duplicates_dropped(&mut self, count: usize) {
        println!("{} duplicate link(s) found; each is processed only once", count);
    }

    fn on_duplicate(&mut self, link: &str, previous: &HistoryEntry) -> DuplicateDecision {
        let when = previous.date.with_timezone(&Local).format("%Y-%m-%d");
        if self.skip_duplicates {
            println!("Skipping {} (downloaded on {})", link, when);
            DuplicateDecision::Skip
        } else {
            println!("{} was downloaded on {}; downloading again", link, when);
            DuplicateDecision::Redownload
        }
    }

    fn on_link_start(&mut self, index: usize, total: usize, link: &str) {
        println!("[{}/{}] {}", index + 1, total, link);
    }

    fn on_poll(&mut self, _link: &str, progress: &PollProgress) {
        let status = progress
            .status
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "no answer".to_string());
        self.spinner(format!(
            "Waiting for magnet: {} ({}/{})",
            status, progress.attempt, progress.max_attempts
        ));
    }

    fn on_download_start(&mut self, filename: &str) {
        self.clear();
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg} {bytes} ({bytes_per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(filename.to_string());
        self.bar = Some(pb);
    }

    fn on_download_progress(&mut self, filename: &str, progress: Progress) {
        let Some(pb) = &self.bar else { return };
        match progress {
            Progress::Known { percent, done, total } => {
                if pb.length() != Some(total) {
                    pb.set_length(total);
                    pb.set_style(
                        ProgressStyle::default_bar()
                            .template("{msg:30} {bar:40} {bytes}/{total_bytes} ({bytes_per_sec})")
                            .unwrap_or_else(|_| ProgressStyle::default_bar())
                            .progress_chars("=>-"),
                    );
                }
                pb.set_position(done);
                tracing::trace!("{} {:.0}%", filename, percent);
            }
            Progress::Unknown { done } => pb.set_position(done),
        }
    }

    fn on_download_done(&mut self, path: &Path) {
        self.clear();
        println!("Downloaded {}", path.display());
    }

    fn on_link_failed(&mut self, link: &str, error: &DebridError) {
        self.clear();
        println!("Failed {}: {}", link, error);
    }

    fn on_packing(&mut self, file_count: usize) {
        self.clear();
        println!("Zipping {} files into a single archive...", file_count);
    }
}

fn read_input(links: Vec<String>, from_file: Option<PathBuf>) -> Result<String> {
    let mut text = links.join("\n");
    if let Some(path) = from_file {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        text.push('\n');
        text.push_str(&content);
    }
    if text.trim().is_empty() && !std::io::stdin().is_terminal() {
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read links from stdin")?;
    }
    Ok(text)
}

pub async fn run_download(
    config: &Config,
    links: Vec<String>,
    from_file: Option<PathBuf>,
    skip_duplicates: bool,
) -> Result<()> {
    config.require_api_key()?;

    let text = read_input(links, from_file)?;
    let found = extract_links(&text);
    if found.is_empty() {
        bail!("No links found");
    }
    tracing::info!("extracted {} link(s)", found.len());

    let batch = Batch::new(config)?;
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut observer = TerminalObserver::new(skip_duplicates);
    let report = batch.run(found, &mut observer, &cancel).await?;
    observer.clear();

    let cancelled = report
        .outcomes
        .iter()
        .filter(|(_, o)| matches!(o, LinkOutcome::Cancelled))
        .count();
    let skipped = report
        .outcomes
        .iter()
        .filter(|(_, o)| matches!(o, LinkOutcome::Skipped))
        .count();

    for (link, outcome) in &report.outcomes {
        if let LinkOutcome::Failed(err) = outcome {
            println!("  failed: {} ({})", link, err);
        }
    }
    if let Some(output) = &report.output {
        let size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        println!("\nSaved to {} ({})", output.display(), HumanBytes(size));
    }
    if let Some(err) = &report.history_error {
        println!("Warning: the download was not recorded in history: {}", err);
    }
    println!(
        "Done: {} success, {} failed, {} skipped, {} cancelled",
        report.succeeded(),
        report.failed(),
        skipped,
        cancelled
    );

    if report.succeeded() == 0 && report.failed() > 0 {
        bail!("No link could be downloaded");
    }
    Ok(())
}
