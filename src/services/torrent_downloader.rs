use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::config::PatcherConfig;
use crate::errors::{PatcherError, Result};
use crate::models::RemoteResource;
use crate::services::control::PatchControl;
use crate::services::download_sink::PlainFileSink;
use crate::services::mirror_downloader::{
    Mirror, MirrorDownloader, MirrorTransport, ProgressCallback, RetryPolicy,
};
use crate::services::torrent_client::{quote_path, TorrentClient};
use crate::utils::file::remove_path;

#[derive(Deserialize, Debug)]
struct StatusReply {
    status: String,
    #[serde(default)]
    data: Option<StatusData>,
}

#[derive(Deserialize, Debug)]
struct StatusData {
    #[serde(default)]
    count: usize,
    #[serde(default)]
    torrents: Vec<TorrentStatus>,
}

#[derive(Deserialize, Debug)]
struct TorrentStatus {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    is_seeding: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct TorrentSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl TorrentSettings {
    pub fn from_config(config: &PatcherConfig) -> Self {
        Self {
            timeout: config.torrent_timeout(),
            poll_interval: config.torrent_poll_interval(),
            retry: RetryPolicy::from_config(config),
        }
    }
}

/// Removes the `.torrent` file and scratch directory whatever the outcome.
struct TorrentScratch {
    torrent_file: PathBuf,
    download_dir: PathBuf,
}

impl Drop for TorrentScratch {
    fn drop(&mut self) {
        if let Err(err) = remove_path(&self.download_dir) {
            tracing::warn!("failed to remove {}: {}", self.download_dir.display(), err);
        }
        if let Err(err) = remove_path(&self.torrent_file) {
            tracing::warn!("failed to remove {}: {}", self.torrent_file.display(), err);
        }
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Fetches a resource through an external torrent engine. Single use.
pub struct TorrentDownloader {
    destination: PathBuf,
    resource: RemoteResource,
    client: Arc<dyn TorrentClient>,
    http: Arc<dyn MirrorTransport>,
    settings: TorrentSettings,
}

impl TorrentDownloader {
    pub fn new(
        destination: &Path,
        resource: RemoteResource,
        client: Arc<dyn TorrentClient>,
        http: Arc<dyn MirrorTransport>,
        settings: TorrentSettings,
    ) -> Self {
        Self {
            destination: destination.to_path_buf(),
            resource,
            client,
            http,
            settings,
        }
    }

    pub async fn download(self, progress: &ProgressCallback, control: &PatchControl) -> Result<()> {
        if self.resource.torrent_urls.is_empty() {
            return Err(PatcherError::DownloadFailed(
                "resource has no torrent urls".to_string(),
            ));
        }
        let scratch = TorrentScratch {
            torrent_file: sibling_with_suffix(&self.destination, ".torrent"),
            download_dir: sibling_with_suffix(&self.destination, ".torrent_dir"),
        };

        self.fetch_torrent_file(&scratch.torrent_file, control).await?;
        std::fs::create_dir_all(&scratch.download_dir)?;
        self.add_torrent(&scratch).await?;
        self.wait_until_seeding(progress, control).await?;
        self.move_downloaded_file(&scratch.download_dir)?;
        tracing::info!("torrent download finished: {}", self.destination.display());
        Ok(())
    }

    async fn fetch_torrent_file(&self, target: &Path, control: &PatchControl) -> Result<()> {
        tracing::debug!("downloading torrent file to {}", target.display());
        let mirrors = self
            .resource
            .torrent_urls
            .iter()
            .map(|url| Mirror::Http(url.clone()))
            .collect();
        let mut sink = PlainFileSink::new(target, None)?;
        MirrorDownloader::new(mirrors, self.http.clone(), self.settings.retry)
            .download(&mut sink, &|_, _| {}, control)
            .await
    }

    async fn add_torrent(&self, scratch: &TorrentScratch) -> Result<()> {
        let command = format!(
            "add-torrent {} {}",
            quote_path(&scratch.torrent_file),
            quote_path(&scratch.download_dir)
        );
        let reply: StatusReply = serde_json::from_value(self.client.execute(&command).await?)?;
        if reply.status != "ok" {
            return Err(PatcherError::DownloadFailed(format!(
                "torrent client refused torrent: {}",
                reply.status
            )));
        }
        Ok(())
    }

    async fn wait_until_seeding(&self, progress: &ProgressCallback, control: &PatchControl) -> Result<()> {
        let mut last_progress = 0.0f64;
        let mut last_advance = Instant::now();
        loop {
            control.wait_for_running().await?;
            let status = self.poll_status().await?;
            if status.progress > last_progress {
                last_progress = status.progress;
                last_advance = Instant::now();
            }
            if last_advance.elapsed() > self.settings.timeout {
                return Err(PatcherError::DownloadFailed(
                    "torrent download has timed out".to_string(),
                ));
            }
            let size = self.resource.size;
            let done = ((size as f64) * status.progress.clamp(0.0, 1.0)).ceil() as u64;
            progress(done.min(size), size);
            if status.is_seeding {
                return Ok(());
            }
            control.sleep(self.settings.poll_interval).await?;
        }
    }

    async fn poll_status(&self) -> Result<TorrentStatus> {
        let reply: StatusReply = serde_json::from_value(self.client.execute("status").await?)?;
        if reply.status != "ok" {
            return Err(PatcherError::DownloadFailed(format!(
                "invalid torrent client status: {}",
                reply.status
            )));
        }
        let data = reply.data.ok_or_else(|| {
            PatcherError::DownloadFailed("torrent client status has no data".to_string())
        })?;
        if data.count < 1 {
            return Err(PatcherError::DownloadFailed(
                "torrent download is not listed".to_string(),
            ));
        }
        let status = data.torrents.into_iter().next().ok_or_else(|| {
            PatcherError::DownloadFailed("torrent download is not listed".to_string())
        })?;
        if let Some(error) = status.error.as_deref().filter(|error| !error.is_empty()) {
            return Err(PatcherError::DownloadFailed(error.to_string()));
        }
        Ok(status)
    }

    fn move_downloaded_file(&self, download_dir: &Path) -> Result<()> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(download_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        let source = files.into_iter().next().ok_or_else(|| {
            PatcherError::DownloadFailed("missing files in torrent download directory".to_string())
        })?;
        remove_path(&self.destination)?;
        std::fs::rename(&source, &self.destination)?;
        Ok(())
    }
}
