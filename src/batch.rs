//! Sequences one submission: unlock or resolve each link, download, then
//! pack multi-file results and record the batch in history.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::acquirer::{FileAcquirer, Progress, filename_from_url, sanitize_filename};
use crate::api::DebridClient;
use crate::archive;
use crate::config::Config;
use crate::error::{DebridError, DebridResult};
use crate::history::HistoryStore;
use crate::links::{dedupe_links, is_magnet};
use crate::models::{HistoryEntry, LinkEntry};
use crate::resolver::{MagnetResolver, PollProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateDecision {
    Redownload,
    Skip,
}

#[derive(Debug)]
pub enum LinkOutcome {
    Downloaded(Vec<PathBuf>),
    Skipped,
    Failed(DebridError),
    Cancelled,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(String, LinkOutcome)>,
    /// The archive, or the single downloaded file.
    pub output: Option<PathBuf>,
    pub history_entry: Option<HistoryEntry>,
    /// Set when the history could not be written; the files stay on disk.
    pub history_error: Option<String>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, LinkOutcome::Downloaded(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, LinkOutcome::Failed(_)))
            .count()
    }
}

/// Hooks for whoever renders the batch. Every method has a quiet default.
#[allow(unused_variables)]
pub trait BatchObserver: Send {
    fn on_duplicates_dropped(&mut self, count: usize) {}

    /// A link already appears in history.
    fn on_duplicate(&mut self, link: &str, previous: &HistoryEntry) -> DuplicateDecision {
        DuplicateDecision::Redownload
    }

    fn on_link_start(&mut self, index: usize, total: usize, link: &str) {}
    fn on_poll(&mut self, link: &str, progress: &PollProgress) {}
    fn on_download_start(&mut self, filename: &str) {}
    fn on_download_progress(&mut self, filename: &str, progress: Progress) {}
    fn on_download_done(&mut self, path: &Path) {}
    fn on_link_failed(&mut self, link: &str, error: &DebridError) {}
    fn on_packing(&mut self, file_count: usize) {}
}

pub struct Batch {
    client: DebridClient,
    resolver: MagnetResolver<DebridClient>,
    acquirer: FileAcquirer,
    history: HistoryStore,
    download_dir: PathBuf,
}

impl Batch {
    pub fn new(config: &Config) -> Result<Self> {
        let client = DebridClient::new(config)?;
        Ok(Self {
            resolver: MagnetResolver::new(client.clone(), config.poll_strategy()),
            client,
            acquirer: FileAcquirer::new(config)?,
            history: HistoryStore::new(config.history_file()?)
                .with_legacy_file(config.legacy_history_file()),
            download_dir: config.download_dir(),
        })
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Processes `links` one after another. Per-link failures are recorded in
    /// the report; only directory creation and packing fail the whole batch.
    /// An unreadable history disables duplicate detection and a failed
    /// history write is reported in `history_error`.
    pub async fn run(
        &self,
        links: Vec<String>,
        observer: &mut dyn BatchObserver,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let (unique, dropped) = dedupe_links(links);
        if dropped > 0 {
            observer.on_duplicates_dropped(dropped);
        }

        let mut report = BatchReport::default();
        if unique.is_empty() {
            return Ok(report);
        }

        fs::create_dir_all(&self.download_dir).with_context(|| {
            format!(
                "Failed to create download directory {}",
                self.download_dir.display()
            )
        })?;

        let mut claimed = HashSet::new();
        let total = unique.len();
        for (index, link) in unique.iter().enumerate() {
            if cancel.is_cancelled() {
                report.outcomes.push((link.clone(), LinkOutcome::Cancelled));
                continue;
            }
            observer.on_link_start(index, total, link);

            let previous = match self.history.find_by_link(link).await {
                Ok(previous) => previous,
                Err(e) => {
                    warn!("history lookup for {} failed: {:#}", link, e);
                    None
                }
            };
            if let Some(previous) = previous {
                if observer.on_duplicate(link, &previous) == DuplicateDecision::Skip {
                    info!("skipping previously downloaded {}", link);
                    report.outcomes.push((link.clone(), LinkOutcome::Skipped));
                    continue;
                }
            }

            let outcome = match self.process_link(link, &mut claimed, observer, cancel).await {
                Ok(paths) => LinkOutcome::Downloaded(paths),
                Err(DebridError::Cancelled) => LinkOutcome::Cancelled,
                Err(e) => {
                    if e.is_timeout() {
                        warn!("{} timed out: {}", link, e);
                    } else {
                        error!("{} failed: {}", link, e);
                    }
                    observer.on_link_failed(link, &e);
                    LinkOutcome::Failed(e)
                }
            };
            report.outcomes.push((link.clone(), outcome));
        }

        self.finish(&mut report, observer).await?;
        Ok(report)
    }

    async fn process_link(
        &self,
        link: &str,
        claimed: &mut HashSet<String>,
        observer: &mut dyn BatchObserver,
        cancel: &CancellationToken,
    ) -> DebridResult<Vec<PathBuf>> {
        let entries = if is_magnet(link) {
            self.resolver
                .resolve(link, |p| observer.on_poll(link, &p), cancel)
                .await?
        } else {
            vec![LinkEntry {
                link: link.to_string(),
                filename: String::new(),
                host: String::new(),
                size: 0,
                date: 0,
            }]
        };

        let mut paths = Vec::with_capacity(entries.len());
        for entry in &entries {
            match self.fetch_entry(entry, claimed, observer, cancel).await {
                Ok(path) => paths.push(path),
                Err(e) => {
                    for path in &paths {
                        let _ = fs::remove_file(path);
                    }
                    return Err(e);
                }
            }
        }
        Ok(paths)
    }

    async fn fetch_entry(
        &self,
        entry: &LinkEntry,
        claimed: &mut HashSet<String>,
        observer: &mut dyn BatchObserver,
        cancel: &CancellationToken,
    ) -> DebridResult<PathBuf> {
        let direct = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DebridError::Cancelled),
            res = self.client.unlock(&entry.link) => res?,
        };

        let remote_name = if entry.filename.is_empty() {
            filename_from_url(&direct)
        } else {
            entry.filename.clone()
        };
        let filename = claim_name(&sanitize_filename(&remote_name), claimed);
        info!("unlocked {} as {}", entry.link, filename);

        observer.on_download_start(&filename);
        let path = self
            .acquirer
            .acquire(
                &direct,
                &self.download_dir,
                &filename,
                |p| observer.on_download_progress(&filename, p),
                cancel,
            )
            .await?;
        observer.on_download_done(&path);
        Ok(path)
    }

    async fn finish(&self, report: &mut BatchReport, observer: &mut dyn BatchObserver) -> Result<()> {
        let mut links = Vec::new();
        let mut files = Vec::new();
        for (link, outcome) in &report.outcomes {
            if let LinkOutcome::Downloaded(paths) = outcome {
                links.push(link.clone());
                files.extend(paths.iter().cloned());
            }
        }

        let entry = match files.len() {
            0 => return Ok(()),
            1 => {
                let path = files.remove(0);
                HistoryEntry::new(file_name_of(&path), links, path)
            }
            count => {
                observer.on_packing(count);
                let zip_name = format!("alldebrid-downloads-{}.zip", Utc::now().timestamp_millis());
                let zip_path = self.download_dir.join(&zip_name);

                let inputs = files.clone();
                let target = zip_path.clone();
                tokio::task::spawn_blocking(move || archive::pack(&inputs, &target))
                    .await
                    .context("Archive task panicked")??;

                for file in &files {
                    if let Err(e) = fs::remove_file(file) {
                        warn!("failed to delete {} after packing: {}", file.display(), e);
                    }
                }

                let mut entry = HistoryEntry::new(zip_name, links, zip_path);
                entry.contained_files = Some(files.iter().map(|f| file_name_of(f)).collect());
                entry
            }
        };

        report.output = Some(entry.output.clone());
        match self.history.append(entry.clone()).await {
            Ok(()) => report.history_entry = Some(entry),
            Err(e) => {
                error!("failed to record {} in history: {:#}", entry.title, e);
                report.history_error = Some(format!("{:#}", e));
            }
        }
        Ok(())
    }
}

/// Reserves `name` for this batch, or `name (N).ext` when it is taken.
fn claim_name(name: &str, claimed: &mut HashSet<String>) -> String {
    if claimed.insert(name.to_string()) {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
    let mut n = 1;
    loop {
        let candidate = match &extension {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        if claimed.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Reply, Request, TestServer};
    use std::fs::File;
    use std::io::Read;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        skip_duplicates: bool,
        dropped: usize,
        failed: Vec<String>,
        packed: Option<usize>,
        polls: usize,
        remove_before_packing: Option<PathBuf>,
    }

    impl BatchObserver for Recorder {
        fn on_duplicates_dropped(&mut self, count: usize) {
            self.dropped = count;
        }

        fn on_duplicate(&mut self, _link: &str, _previous: &HistoryEntry) -> DuplicateDecision {
            if self.skip_duplicates {
                DuplicateDecision::Skip
            } else {
                DuplicateDecision::Redownload
            }
        }

        fn on_poll(&mut self, _link: &str, _progress: &PollProgress) {
            self.polls += 1;
        }

        fn on_link_failed(&mut self, link: &str, _error: &DebridError) {
            self.failed.push(link.to_string());
        }

        fn on_packing(&mut self, file_count: usize) {
            self.packed = Some(file_count);
            if let Some(dir) = &self.remove_before_packing {
                fs::remove_dir_all(dir).unwrap();
            }
        }
    }

    fn host_url(req: &Request, path: &str) -> String {
        format!("http://{}{}", req.header("host").unwrap_or("127.0.0.1"), path)
    }

    /// Unlocks `https://host.example/<name>` to `/files/<name>`; `broken` links are rejected.
    fn debrid_server(downloads: Arc<AtomicUsize>) -> TestServer {
        TestServer::start(move |req| match req.path.as_str() {
            "/v4/link/unlock" => {
                let link = req.query("link").unwrap_or_default();
                if link.contains("broken") {
                    return Reply::json(r#"{"status":"error","error":{"code":"LINK_DOWN","message":"down"}}"#);
                }
                let name = link.rsplit('/').next().unwrap_or("x").to_string();
                let direct = if link.contains("/same/") {
                    host_url(req, &format!("/files/{name}/video.mp4"))
                } else {
                    host_url(req, &format!("/files/{name}"))
                };
                Reply::json(&format!(r#"{{"status":"success","data":{{"link":"{direct}"}}}}"#))
            }
            "/v4/magnet/upload" => Reply::json(r#"{"status":"success","data":{"magnets":[{"id":3}]}}"#),
            "/v4/magnet/status" => Reply::json(
                r#"{"status":"success","data":{"magnets":{"id":3,"filename":"pack","size":4096,"status":"Ready","links":[
                    {"link":"https://host.example/ep1.mkv","filename":"ep1.mkv","size":2048},
                    {"link":"https://host.example/ep2.mkv","filename":"ep2.mkv","size":2048}
                ]}}}"#,
            ),
            path if path.starts_with("/files/") => {
                downloads.fetch_add(1, Ordering::SeqCst);
                Reply::bytes(vec![path.as_bytes()[7]; 2048])
            }
            other => Reply::status(404, other),
        })
    }

    fn batch_for(server: &TestServer, dir: &TempDir) -> Batch {
        let config = Config {
            api_key: "k".into(),
            api_base: server.url("/v4"),
            download_dir: Some(dir.path().join("downloads")),
            history_file: Some(dir.path().join("history.json")),
            poll_interval_ms: 0,
            poll_max_attempts: 3,
            transfer_timeout_secs: 10,
            ..Config::default()
        };
        Batch::new(&config).unwrap()
    }

    #[tokio::test]
    async fn two_links_are_zipped_and_recorded_once() {
        let server = debrid_server(Arc::new(AtomicUsize::new(0)));
        let dir = TempDir::new().unwrap();
        let batch = batch_for(&server, &dir);
        let mut recorder = Recorder::default();

        let report = batch
            .run(
                vec!["https://host.example/one.bin".into(), "https://host.example/two.bin".into()],
                &mut recorder,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 2);
        assert_eq!(recorder.packed, Some(2));
        let zip_path = report.output.clone().unwrap();
        assert!(zip_path.exists());
        let archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);

        let downloads = dir.path().join("downloads");
        assert!(!downloads.join("one.bin").exists());
        assert!(!downloads.join("two.bin").exists());

        let history = batch.history().list().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(
            history[0].contained_files,
            Some(vec!["one.bin".to_string(), "two.bin".to_string()])
        );
        assert_eq!(history[0].output, zip_path);
    }

    #[tokio::test]
    async fn single_file_is_recorded_without_contained_files() {
        let server = debrid_server(Arc::new(AtomicUsize::new(0)));
        let dir = TempDir::new().unwrap();
        let batch = batch_for(&server, &dir);
        let mut recorder = Recorder::default();

        let report = batch
            .run(
                vec!["https://host.example/solo.bin".into(), "https://host.example/solo.bin".into()],
                &mut recorder,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(recorder.dropped, 1);
        assert_eq!(report.outcomes.len(), 1);
        let entry = report.history_entry.unwrap();
        assert_eq!(entry.title, "solo.bin");
        assert!(entry.contained_files.is_none());
        assert!(dir.path().join("downloads").join("solo.bin").exists());
    }

    #[tokio::test]
    async fn failed_link_does_not_stop_the_batch() {
        let server = debrid_server(Arc::new(AtomicUsize::new(0)));
        let dir = TempDir::new().unwrap();
        let batch = batch_for(&server, &dir);
        let mut recorder = Recorder::default();

        let report = batch
            .run(
                vec!["https://host.example/broken".into(), "https://host.example/ok.bin".into()],
                &mut recorder,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(recorder.failed, vec!["https://host.example/broken".to_string()]);
        let entry = report.history_entry.unwrap();
        assert_eq!(entry.links, vec!["https://host.example/ok.bin".to_string()]);
    }

    #[tokio::test]
    async fn previously_downloaded_link_can_be_skipped() {
        let downloads = Arc::new(AtomicUsize::new(0));
        let server = debrid_server(Arc::clone(&downloads));
        let dir = TempDir::new().unwrap();
        let batch = batch_for(&server, &dir);
        let link = "https://host.example/again.bin".to_string();

        batch
            .run(vec![link.clone()], &mut Recorder::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(downloads.load(Ordering::SeqCst), 1);

        let mut recorder = Recorder {
            skip_duplicates: true,
            ..Recorder::default()
        };
        let report = batch
            .run(vec![link], &mut recorder, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(report.outcomes[0].1, LinkOutcome::Skipped));
        assert!(report.history_entry.is_none());
        assert_eq!(downloads.load(Ordering::SeqCst), 1);
        assert_eq!(batch.history().list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn magnet_files_are_unlocked_and_packed() {
        let server = debrid_server(Arc::new(AtomicUsize::new(0)));
        let dir = TempDir::new().unwrap();
        let batch = batch_for(&server, &dir);
        let mut recorder = Recorder::default();

        let report = batch
            .run(vec!["magnet:?xt=urn:btih:abc".into()], &mut recorder, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(recorder.polls, 1);
        let entry = report.history_entry.unwrap();
        assert_eq!(
            entry.contained_files,
            Some(vec!["ep1.mkv".to_string(), "ep2.mkv".to_string()])
        );
    }

    #[tokio::test]
    async fn cancelled_batch_downloads_nothing() {
        let downloads = Arc::new(AtomicUsize::new(0));
        let server = debrid_server(Arc::clone(&downloads));
        let dir = TempDir::new().unwrap();
        let batch = batch_for(&server, &dir);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = batch
            .run(vec!["https://host.example/a.bin".into()], &mut Recorder::default(), &cancel)
            .await
            .unwrap();

        assert!(matches!(report.outcomes[0].1, LinkOutcome::Cancelled));
        assert!(report.history_entry.is_none());
        assert_eq!(downloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn claimed_names_get_a_counter_before_the_extension() {
        let mut claimed = HashSet::new();
        assert_eq!(claim_name("video.mp4", &mut claimed), "video.mp4");
        assert_eq!(claim_name("video.mp4", &mut claimed), "video (1).mp4");
        assert_eq!(claim_name("video.mp4", &mut claimed), "video (2).mp4");
        assert_eq!(claim_name("README", &mut claimed), "README");
        assert_eq!(claim_name("README", &mut claimed), "README (1)");
    }

    #[tokio::test]
    async fn same_named_files_are_both_kept_in_the_archive() {
        let server = debrid_server(Arc::new(AtomicUsize::new(0)));
        let dir = TempDir::new().unwrap();
        let batch = batch_for(&server, &dir);

        let report = batch
            .run(
                vec!["https://host.example/same/1".into(), "https://host.example/same/2".into()],
                &mut Recorder::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 2);
        let entry = report.history_entry.unwrap();
        assert_eq!(
            entry.contained_files,
            Some(vec!["video.mp4".to_string(), "video (1).mp4".to_string()])
        );

        let mut archive = zip::ZipArchive::new(File::open(&entry.output).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        for (name, fill) in [("video.mp4", b'1'), ("video (1).mp4", b'2')] {
            let mut content = Vec::new();
            archive.by_name(name).unwrap().read_to_end(&mut content).unwrap();
            assert_eq!(content.len(), 2048);
            assert!(content.iter().all(|&b| b == fill));
        }
    }

    #[tokio::test]
    async fn corrupt_history_does_not_stop_downloads() {
        let server = debrid_server(Arc::new(AtomicUsize::new(0)));
        let dir = TempDir::new().unwrap();
        let history_path = dir.path().join("history.json");
        fs::write(&history_path, "{not json").unwrap();
        let batch = batch_for(&server, &dir);

        let report = batch
            .run(
                vec!["https://host.example/one".into()],
                &mut Recorder::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 1);
        let output = report.output.clone().unwrap();
        assert_eq!(output, dir.path().join("downloads").join("one"));
        assert!(output.exists());
        assert!(report.history_entry.is_none());
        assert!(report.history_error.is_some());
        assert_eq!(fs::read_to_string(&history_path).unwrap(), "{not json");
    }

    #[tokio::test]
    async fn packing_failure_fails_the_batch_and_records_nothing() {
        let server = debrid_server(Arc::new(AtomicUsize::new(0)));
        let dir = TempDir::new().unwrap();
        let batch = batch_for(&server, &dir);
        let mut recorder = Recorder {
            remove_before_packing: Some(dir.path().join("downloads")),
            ..Recorder::default()
        };

        let result = batch
            .run(
                vec!["https://host.example/a.bin".into(), "https://host.example/b.bin".into()],
                &mut recorder,
                &CancellationToken::new(),
            )
            .await;

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DebridError>(),
            Some(DebridError::Pack { .. })
        ));
        assert_eq!(recorder.packed, Some(2));
        assert!(batch.history().list().await.unwrap().is_empty());
        assert!(!dir.path().join("history.json").exists());
    }
}
