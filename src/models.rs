use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A file the remote service can hand out, either from an unlock or from a
/// ready magnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub link: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub date: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MagnetStatus {
    Queued,
    Downloading,
    Uploading,
    Processing,
    Ready,
    Error,
    Other(String),
}

impl MagnetStatus {
    pub fn from_label(label: &str) -> Self {
        match label {
            "In Queue" | "Queued" => MagnetStatus::Queued,
            "Downloading" => MagnetStatus::Downloading,
            "Uploading" => MagnetStatus::Uploading,
            "Processing" => MagnetStatus::Processing,
            "Ready" => MagnetStatus::Ready,
            "Error" => MagnetStatus::Error,
            other => MagnetStatus::Other(other.to_string()),
        }
    }

    /// Still moving on the remote side; worth polling again.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            MagnetStatus::Queued
                | MagnetStatus::Downloading
                | MagnetStatus::Uploading
                | MagnetStatus::Processing
        )
    }
}

impl fmt::Display for MagnetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MagnetStatus::Queued => "In Queue",
            MagnetStatus::Downloading => "Downloading",
            MagnetStatus::Uploading => "Uploading",
            MagnetStatus::Processing => "Processing",
            MagnetStatus::Ready => "Ready",
            MagnetStatus::Error => "Error",
            MagnetStatus::Other(label) => label,
        };
        f.write_str(label)
    }
}

impl<'de> Deserialize<'de> for MagnetStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(MagnetStatus::from_label(&label))
    }
}

impl Serialize for MagnetStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagnetRecord {
    pub id: u64,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    pub status: MagnetStatus,
    #[serde(default)]
    pub links: Vec<LinkEntry>,
}

/// One completed download batch, as persisted in the history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub date: DateTime<Utc>,
    pub title: String,
    pub links: Vec<String>,
    pub output: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contained_files: Option<Vec<String>>,
}

impl HistoryEntry {
    pub fn new(title: String, links: Vec<String>, output: PathBuf) -> Self {
        Self {
            date: Utc::now(),
            title,
            links,
            output,
            contained_files: None,
        }
    }

    pub fn contains_link(&self, link: &str) -> bool {
        self.links.iter().any(|l| l == link)
    }
}
