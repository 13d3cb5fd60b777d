use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::models::HistoryEntry;

/// JSON-array history of completed batches, most recent first.
///
/// Read-modify-write cycles are serialized within this process and the file
/// is replaced atomically, but two processes appending at once can still
/// lose an update.
///
/// When `history_file` does not exist yet, entries are read from the legacy
/// file instead; the next append writes them all to `history_file`.
pub struct HistoryStore {
    history_file: PathBuf,
    legacy_file: Option<PathBuf>,
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(history_file: impl Into<PathBuf>) -> Self {
        Self {
            history_file: history_file.into(),
            legacy_file: None,
            lock: Mutex::new(()),
        }
    }

    pub fn with_legacy_file(mut self, legacy_file: Option<PathBuf>) -> Self {
        self.legacy_file = legacy_file;
        self
    }

    fn load(&self) -> Result<Vec<HistoryEntry>> {
        let source = if self.history_file.exists() {
            &self.history_file
        } else {
            match &self.legacy_file {
                Some(legacy) if legacy.exists() => legacy,
                _ => return Ok(Vec::new()),
            }
        };

        let content = fs::read_to_string(source)
            .with_context(|| format!("Failed to read history file {}", source.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse history file {}", source.display()))
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)
            .context("Failed to serialize history")?;

        if let Some(parent) = self.history_file.parent() {
            fs::create_dir_all(parent).context("Failed to create history directory")?;
        }
        let tmp = self.history_file.with_extension("json.tmp");
        fs::write(&tmp, content).context("Failed to write history file")?;
        fs::rename(&tmp, &self.history_file).context("Failed to replace history file")?;

        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<HistoryEntry>> {
        let _guard = self.lock.lock().await;
        self.load()
    }

    /// Prepends `entry`.
    pub async fn append(&self, entry: HistoryEntry) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load()?;
        entries.insert(0, entry);
        self.save(&entries)
    }

    /// Most recent entry whose link set contains `link`.
    pub async fn find_by_link(&self, link: &str) -> Result<Option<HistoryEntry>> {
        let _guard = self.lock.lock().await;
        Ok(self.load()?.into_iter().find(|e| e.contains_link(link)))
    }
}
