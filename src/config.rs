use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resolver::PollStrategy;

pub const DEFAULT_API_BASE: &str = "https://api.alldebrid.com/v4";
pub const DEFAULT_AGENT: &str = "debrid-dl";
pub const API_KEY_ENV: &str = "ALLDEBRID_API_KEY";
const LEGACY_HISTORY_FILE: &str = ".download-history.json";

/// Settings loaded from `~/.config/debrid-dl/config.toml`, then overridden
/// by the environment and command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// AllDebrid API key. Required by every command that talks to the service.
    pub api_key: String,
    pub api_base: String,
    /// Sent as the `agent` query parameter on every request.
    pub agent: String,
    /// Where downloads land. Defaults to `~/Downloads`.
    pub download_dir: Option<PathBuf>,
    /// History file. Defaults to `~/.local/share/debrid-dl/history.json`.
    pub history_file: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub poll_max_attempts: u32,
    /// Hard ceiling for a single file transfer.
    pub transfer_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            agent: DEFAULT_AGENT.to_string(),
            download_dir: None,
            history_file: None,
            poll_interval_ms: 1000,
            poll_max_attempts: 60,
            transfer_timeout_secs: 300,
        }
    }
}

impl Config {
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Downloads")
        })
    }

    pub fn history_file(&self) -> Result<PathBuf> {
        if let Some(path) = &self.history_file {
            return Ok(path.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("debrid-dl")?;
        xdg_dirs
            .place_data_file("history.json")
            .context("Failed to create data directory for history")
    }

    /// `~/.download-history.json`, read when the default history file does
    /// not exist yet. Not consulted when `history_file` is set explicitly.
    pub fn legacy_history_file(&self) -> Option<PathBuf> {
        if self.history_file.is_some() {
            return None;
        }
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(LEGACY_HISTORY_FILE))
    }

    pub fn poll_strategy(&self) -> PollStrategy {
        PollStrategy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.poll_max_attempts.max(1),
        }
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    /// Fails when no API key was configured anywhere.
    pub fn require_api_key(&self) -> Result<&str> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow!(
                "No API key configured. Set api_key in {}, export {} or pass --api-key",
                config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "config.toml".to_string()),
                API_KEY_ENV
            ));
        }
        Ok(self.api_key.trim())
    }

    /// Applies `ALLDEBRID_API_KEY` and explicit flag values over the file contents.
    pub fn with_overrides(
        mut self,
        env_api_key: Option<String>,
        api_key: Option<String>,
        output: Option<PathBuf>,
    ) -> Self {
        if let Some(key) = env_api_key.filter(|k| !k.trim().is_empty()) {
            self.api_key = key;
        }
        if let Some(key) = api_key {
            self.api_key = key;
        }
        if let Some(dir) = output {
            self.download_dir = Some(dir);
        }
        self
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("debrid-dl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from `path` (or the XDG default), creating a default file if none exists.
pub fn load_or_init(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_path()?,
    };
    if !path.exists() {
        let default_cfg = Config::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)
            .with_context(|| format!("Failed to write default config to {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let cfg: Config = toml::from_str(&data)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    Ok(cfg)
}
