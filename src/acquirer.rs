use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, REFERER};
use reqwest::{Client, redirect};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{DebridError, DebridResult};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const REFERER_URL: &str = "https://alldebrid.com/";
const SHARE_PREFIX: &str = "https://alldebrid.com/f/";
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
const SMALL_FILE_BYTES: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Known { percent: f64, done: u64, total: u64 },
    Unknown { done: u64 },
}

/// Replaces characters that are unsafe in file names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' => '_',
            c => c,
        })
        .collect();
    if cleaned.trim().is_empty() {
        fallback_filename()
    } else {
        cleaned
    }
}

fn fallback_filename() -> String {
    format!("download-{}.bin", chrono::Utc::now().timestamp_millis())
}

/// Last path segment of a direct URL, percent-decoded.
pub fn filename_from_url(direct_url: &str) -> String {
    url::Url::parse(direct_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            urlencoding::decode(&segment)
                .map(|s| s.into_owned())
                .unwrap_or(segment)
        })
        .unwrap_or_else(fallback_filename)
}

/// Share links on the service's own domain only resolve through its `service` redirector.
pub fn wrap_share_link(url: &str) -> String {
    if url.starts_with(SHARE_PREFIX) {
        format!(
            "https://alldebrid.com/service?url={}",
            urlencoding::encode(url)
        )
    } else {
        url.to_string()
    }
}

pub struct FileAcquirer {
    client: Client,
    transfer_timeout: Duration,
}

impl FileAcquirer {
    pub fn new(config: &Config) -> DebridResult<Self> {
        Self::with_timeout(config.transfer_timeout())
    }

    pub fn with_timeout(transfer_timeout: Duration) -> DebridResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect::Policy::limited(5))
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            transfer_timeout,
        })
    }

    /// Streams `url` into `dest_dir`, returning the final path.
    ///
    /// The whole transfer, headers included, must finish within the
    /// configured ceiling. On timeout or cancellation the `.part` file is
    /// removed.
    pub async fn acquire<F>(
        &self,
        url: &str,
        dest_dir: &Path,
        desired_filename: &str,
        mut on_progress: F,
        cancel: &CancellationToken,
    ) -> DebridResult<PathBuf>
    where
        F: FnMut(Progress) + Send,
    {
        let file_name = sanitize_filename(desired_filename);
        let output_path = dest_dir.join(&file_name);
        let partial_path = dest_dir.join(format!("{}.part", file_name));
        let real_url = wrap_share_link(url);
        debug!("downloading {} -> {}", real_url, output_path.display());

        let transfer = self.transfer(&real_url, &partial_path, &mut on_progress);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DebridError::Cancelled),
            res = tokio::time::timeout(self.transfer_timeout, transfer) => match res {
                Ok(inner) => inner,
                Err(_) => Err(DebridError::AcquisitionTimeout(self.transfer_timeout)),
            },
        };

        if let Err(e) = outcome {
            if partial_path.exists() {
                let _ = fs::remove_file(&partial_path);
            }
            return Err(e);
        }

        fs::rename(&partial_path, &output_path)
            .map_err(|e| DebridError::write(&output_path, e))?;

        let actual_size = fs::metadata(&output_path)
            .map_err(|_| DebridError::Verification(output_path.clone()))?
            .len();
        if actual_size < SMALL_FILE_BYTES {
            warn!(
                "downloaded file is very small: {} ({} bytes)",
                output_path.display(),
                actual_size
            );
        }
        info!(
            "finished {} ({:.2} MB)",
            output_path.display(),
            actual_size as f64 / (1024.0 * 1024.0)
        );

        Ok(output_path)
    }

    async fn transfer<F>(&self, url: &str, partial_path: &Path, on_progress: &mut F) -> DebridResult<u64>
    where
        F: FnMut(Progress) + Send,
    {
        let response = tokio::time::timeout(
            Duration::from_secs(30),
            self.client
                .get(url)
                .header(ACCEPT, "*/*")
                .header(REFERER, REFERER_URL)
                .send(),
        )
        .await
        .map_err(|_| DebridError::AcquisitionTimeout(Duration::from_secs(30)))??
        .error_for_status()?;

        let total_bytes = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&n| n > 0);

        let mut file = File::create(partial_path).map_err(|e| DebridError::write(partial_path, e))?;

        let mut downloaded = 0u64;
        let mut last_report = Instant::now();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .map_err(|e| DebridError::write(partial_path, e))?;
            downloaded += chunk.len() as u64;

            if last_report.elapsed() >= PROGRESS_INTERVAL {
                last_report = Instant::now();
                on_progress(match total_bytes {
                    Some(total) => Progress::Known {
                        percent: (downloaded as f64 / total as f64 * 100.0).min(100.0),
                        done: downloaded,
                        total,
                    },
                    None => Progress::Unknown { done: downloaded },
                });
            }
        }

        file.flush().map_err(|e| DebridError::write(partial_path, e))?;
        Ok(downloaded)
    }
}
