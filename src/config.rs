use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PatcherError, Result};

const DEFAULT_API_URL: &str = "https://api.patchkit.net";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RETRY_BUDGET: u32 = 100;
const DEFAULT_RETRY_BACKOFF_SECS: u64 = 10;
const DEFAULT_TORRENT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TORRENT_POLL_MS: u64 = 1000;
const MAX_RETRY_BUDGET: usize = 10_000;
const MAX_TIMEOUT_SECS: usize = 3600;

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PatcherConfig {
    pub api_url: String,
    pub app_secret: String,
    pub key_secret: Option<String>,
    pub use_torrents: bool,
    pub check_integrity: bool,
    pub check_file_sizes: bool,
    pub check_file_hashes: bool,
    pub http_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub retry_budget: u32,
    pub retry_backoff_secs: u64,
    pub torrent_timeout_secs: u64,
    pub torrent_poll_interval_ms: u64,
    pub proxy: Option<String>,
    pub torrent_client_path: Option<PathBuf>,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            app_secret: String::new(),
            key_secret: None,
            use_torrents: false,
            check_integrity: true,
            check_file_sizes: false,
            check_file_hashes: false,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            retry_budget: DEFAULT_RETRY_BUDGET,
            retry_backoff_secs: DEFAULT_RETRY_BACKOFF_SECS,
            torrent_timeout_secs: DEFAULT_TORRENT_TIMEOUT_SECS,
            torrent_poll_interval_ms: DEFAULT_TORRENT_POLL_MS,
            proxy: None,
            torrent_client_path: None,
        }
    }
}

impl PatcherConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|err| PatcherError::Config(format!("{}: {}", path.display(), err)))
    }

    pub fn apply_env(&mut self) {
        if let Some(value) = env_string("PATCHER_API_URL") {
            self.api_url = value;
        }
        if let Some(value) = env_string("PATCHER_APP_SECRET") {
            self.app_secret = value;
        }
        if let Some(value) = env_string("PATCHER_KEY_SECRET") {
            self.key_secret = Some(value);
        }
        if let Some(value) = env_string("PATCHER_PROXY") {
            self.proxy = Some(value);
        }
        if let Some(value) = env_string("PATCHER_TORRENT_CLIENT") {
            self.torrent_client_path = Some(PathBuf::from(value));
        }
        if let Some(value) = env_bool("PATCHER_USE_TORRENTS") {
            self.use_torrents = value;
        }
        if let Some(value) = env_bool("PATCHER_CHECK_INTEGRITY") {
            self.check_integrity = value;
        }
        if let Some(value) = env_usize("PATCHER_HTTP_TIMEOUT_SECONDS") {
            self.http_timeout_secs = value.clamp(1, MAX_TIMEOUT_SECS) as u64;
        }
        if let Some(value) = env_usize("PATCHER_RETRY_BUDGET") {
            self.retry_budget = value.clamp(1, MAX_RETRY_BUDGET) as u32;
        }
        if let Some(value) = env_usize("PATCHER_RETRY_BACKOFF_SECONDS") {
            self.retry_backoff_secs = value.min(MAX_TIMEOUT_SECS) as u64;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_secret.trim().is_empty() {
            return Err(PatcherError::Config("app secret is required".to_string()));
        }
        if self.api_url.trim().is_empty() {
            return Err(PatcherError::Config("api url is required".to_string()));
        }
        if self.retry_budget == 0 {
            return Err(PatcherError::Config(
                "retry budget must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn torrent_timeout(&self) -> Duration {
        Duration::from_secs(self.torrent_timeout_secs.max(1))
    }

    pub fn torrent_poll_interval(&self) -> Duration {
        Duration::from_millis(self.torrent_poll_interval_ms.max(10))
    }

    pub fn build_http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.http_timeout())
            .connect_timeout(self.connect_timeout());
        if let Some(proxy) = self.proxy.as_deref().filter(|value| !value.trim().is_empty()) {
            let proxy = reqwest::Proxy::all(proxy.trim())
                .map_err(|err| PatcherError::Config(format!("invalid proxy: {}", err)))?;
            builder = builder.proxy(proxy);
        }
        Ok(builder.build()?)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|value| {
        let normalized = value.to_ascii_lowercase();
        matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
    })
}

fn env_usize(key: &str) -> Option<usize> {
    env_string(key).and_then(|value| value.parse::<usize>().ok())
}
