use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{PatcherError, Result};
use crate::models::RemoteResource;
use crate::services::chunked_writer::ChunkedFileWriter;
use crate::services::control::PatchControl;
use crate::services::download_sink::{ChunkedSink, DownloadSink, PlainFileSink};
use crate::services::mirror_downloader::{Mirror, MirrorDownloader, MirrorTransport, ProgressCallback};
use crate::services::torrent_client::TorrentClient;
use crate::services::torrent_downloader::{TorrentDownloader, TorrentSettings};
use crate::utils::file::remove_path;
use crate::utils::hashing::{hash_file, hashes_match, ChunkHasher};

/// Checks a finished download against the published size and, when there is one,
/// the published hash.
pub fn validate_download(path: &Path, resource: &RemoteResource) -> Result<()> {
    let size = std::fs::metadata(path)
        .map_err(|err| {
            PatcherError::DownloadFailed(format!("{} is missing: {}", path.display(), err))
        })?
        .len();
    if size != resource.size {
        return Err(PatcherError::DownloadFailed(format!(
            "{} has {} bytes, expected {}",
            path.display(),
            size,
            resource.size
        )));
    }
    let expected = resource
        .hash_code
        .as_deref()
        .map(str::trim)
        .filter(|hash| !hash.is_empty());
    if let Some(expected) = expected {
        let actual = hash_file(path)?;
        if !hashes_match(&actual, expected) {
            return Err(PatcherError::DownloadFailed(format!(
                "{} hash is {}, expected {}",
                path.display(),
                actual,
                expected
            )));
        }
    }
    Ok(())
}

/// Picks a transport for one remote resource: torrent first when allowed, then HTTP
/// with chunk verification when the resource publishes a chunk table. Whatever the
/// transport, the finished file goes through [`validate_download`].
pub struct ResourceDownloader {
    destination: PathBuf,
    meta_destination: Option<PathBuf>,
    resource: RemoteResource,
    http: Arc<dyn MirrorTransport>,
    torrent_client: Option<Arc<dyn TorrentClient>>,
    use_torrents: bool,
    settings: TorrentSettings,
    hasher: Arc<dyn ChunkHasher>,
}

impl ResourceDownloader {
    pub fn new(
        destination: &Path,
        resource: RemoteResource,
        http: Arc<dyn MirrorTransport>,
        hasher: Arc<dyn ChunkHasher>,
        settings: TorrentSettings,
    ) -> Self {
        Self {
            destination: destination.to_path_buf(),
            meta_destination: None,
            resource,
            http,
            torrent_client: None,
            use_torrents: false,
            settings,
            hasher,
        }
    }

    pub fn with_torrents(mut self, client: Option<Arc<dyn TorrentClient>>, enabled: bool) -> Self {
        self.torrent_client = client;
        self.use_torrents = enabled;
        self
    }

    /// Also fetch the package meta file into `path` when the resource publishes one.
    pub fn with_meta_destination(mut self, path: &Path) -> Self {
        self.meta_destination = Some(path.to_path_buf());
        self
    }

    pub async fn download(self, progress: &ProgressCallback, control: &PatchControl) -> Result<()> {
        if let Some(parent) = self.destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.download_meta(control).await?;

        if self.try_torrent(progress, control).await? {
            return Ok(());
        }

        if self.resource.urls.is_empty() {
            return Err(PatcherError::DownloadFailed(format!(
                "no download urls for {}",
                self.destination.display()
            )));
        }
        let mirrors: Vec<Mirror> = self
            .resource
            .urls
            .iter()
            .map(|url| Mirror::Http(url.clone()))
            .collect();
        let downloader = MirrorDownloader::new(mirrors, self.http.clone(), self.settings.retry);

        let mut sink: Box<dyn DownloadSink> = match self.chunk_writer()? {
            Some(mut writer) => {
                let verified = writer.resume_verified_prefix()?;
                if verified > 0 {
                    tracing::info!(
                        "resuming {} from {} verified bytes",
                        self.destination.display(),
                        verified
                    );
                }
                Box::new(ChunkedSink::new(writer))
            }
            None => Box::new(PlainFileSink::new(&self.destination, Some(self.resource.size))?),
        };
        downloader.download(&mut *sink, progress, control).await?;
        drop(sink);
        validate_download(&self.destination, &self.resource)
    }

    async fn download_meta(&self, control: &PatchControl) -> Result<()> {
        let Some(path) = self.meta_destination.as_deref() else {
            return Ok(());
        };
        if !self.resource.has_meta_urls() {
            return Ok(());
        }
        tracing::debug!("downloading package meta to {}", path.display());
        let mirrors: Vec<Mirror> = self
            .resource
            .meta_urls
            .iter()
            .map(|url| Mirror::Http(url.clone()))
            .collect();
        let mut sink = PlainFileSink::new(path, None)?;
        MirrorDownloader::new(mirrors, self.http.clone(), self.settings.retry)
            .download(&mut sink, &|_, _| {}, control)
            .await
    }

    fn chunk_writer(&self) -> Result<Option<ChunkedFileWriter>> {
        let Some(chunks) = self.resource.chunks.as_ref().filter(|chunks| chunks.is_available()) else {
            return Ok(None);
        };
        chunks.validate(self.resource.size)?;
        let writer = ChunkedFileWriter::create(
            &self.destination,
            chunks.chunk_size,
            self.resource.size,
            chunks.expected_hashes()?,
            self.hasher.clone(),
        )?;
        Ok(Some(writer))
    }

    /// Returns `Ok(true)` when the torrent produced a complete, verified file.
    async fn try_torrent(&self, progress: &ProgressCallback, control: &PatchControl) -> Result<bool> {
        let Some(client) = self.torrent_client.clone() else {
            return Ok(false);
        };
        if !self.use_torrents || self.resource.torrent_urls.is_empty() {
            return Ok(false);
        }

        let torrent = TorrentDownloader::new(
            &self.destination,
            self.resource.clone(),
            client,
            self.http.clone(),
            self.settings,
        );
        match torrent.download(progress, control).await {
            Ok(()) => {}
            Err(PatcherError::Cancelled) => return Err(PatcherError::Cancelled),
            Err(err) => {
                tracing::warn!("torrent download failed, falling back to http: {}", err);
                return Ok(false);
            }
        }

        if let Some(mut writer) = self.chunk_writer()? {
            writer.resume_verified_prefix()?;
            if !writer.is_complete() {
                tracing::warn!(
                    "torrent payload verified only {} of {} bytes, continuing over http",
                    writer.verified_length(),
                    writer.total_length()
                );
                return Ok(false);
            }
        }
        match validate_download(&self.destination, &self.resource) {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::warn!("torrent payload is invalid, falling back to http: {}", err);
                remove_path(&self.destination)?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunksData;
    use crate::services::mirror_downloader::{DownloadOutcome, RetryPolicy};
    use crate::utils::hashing::{hash_bytes, XxHasher};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    struct ServeTransport {
        payload: Vec<u8>,
        offsets: Mutex<Vec<u64>>,
        by_url: HashMap<String, Vec<u8>>,
    }

    impl ServeTransport {
        fn new(payload: &[u8]) -> Self {
            Self {
                payload: payload.to_vec(),
                offsets: Mutex::new(Vec::new()),
                by_url: HashMap::new(),
            }
        }

        fn with_url(mut self, url: &str, payload: &[u8]) -> Self {
            self.by_url.insert(url.to_string(), payload.to_vec());
            self
        }
    }

    #[async_trait]
    impl MirrorTransport for ServeTransport {
        async fn fetch(
            &self,
            mirror: &Mirror,
            sink: &mut dyn DownloadSink,
            _progress: &ProgressCallback,
            _control: &PatchControl,
        ) -> Result<DownloadOutcome> {
            if let Some(payload) = self.by_url.get(mirror.url()) {
                sink.write(payload)?;
                sink.end_of_stream();
                return Ok(DownloadOutcome::Completed);
            }
            let offset = sink.resume_offset();
            self.offsets.lock().expect("offsets lock").push(offset);
            sink.write(&self.payload[offset as usize..])?;
            sink.end_of_stream();
            Ok(DownloadOutcome::Completed)
        }
    }

    struct BrokenEngine;

    #[async_trait]
    impl TorrentClient for BrokenEngine {
        async fn execute(&self, _command: &str) -> Result<serde_json::Value> {
            Ok(json!({"status": "error"}))
        }
    }

    /// Engine that finishes at once with whatever payload it was given.
    struct SeedingEngine {
        payload: Vec<u8>,
    }

    #[async_trait]
    impl TorrentClient for SeedingEngine {
        async fn execute(&self, command: &str) -> Result<serde_json::Value> {
            if let Some(rest) = command.strip_prefix("add-torrent ") {
                let dir = rest.rsplit(' ').next().expect("download dir");
                std::fs::write(Path::new(dir).join("payload.bin"), &self.payload)
                    .expect("write torrent payload");
                return Ok(json!({"status": "ok"}));
            }
            Ok(json!({
                "status": "ok",
                "data": {
                    "count": 1,
                    "torrents": [{"error": "", "progress": 1.0, "is_seeding": true}]
                }
            }))
        }
    }

    fn settings() -> TorrentSettings {
        TorrentSettings {
            timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(5),
            retry: RetryPolicy {
                budget: 3,
                backoff: Duration::from_millis(1),
            },
        }
    }

    fn chunked_resource(payload: &[u8], chunk_size: usize) -> RemoteResource {
        RemoteResource {
            urls: vec!["http://mirror.invalid/pkg".to_string()],
            torrent_urls: vec!["http://mirror.invalid/pkg.torrent".to_string()],
            size: payload.len() as u64,
            hash_code: None,
            chunks: Some(ChunksData {
                chunk_size: chunk_size as u64,
                hashes: payload
                    .chunks(chunk_size)
                    .map(hash_bytes)
                    .collect(),
            }),
            ..Default::default()
        }
    }

    fn destination() -> PathBuf {
        std::env::temp_dir()
            .join(format!("otoshi-patcher-resource-{}", Uuid::new_v4()))
            .join("downloads")
            .join("content-1.package")
    }

    #[tokio::test]
    async fn resumes_partial_file_from_verified_chunks() {
        let payload: Vec<u8> = (0..20u8).collect();
        let target = destination();
        std::fs::create_dir_all(target.parent().expect("parent")).expect("create parent");
        let mut partial = payload[..8].to_vec();
        partial.extend_from_slice(&[0u8; 12]);
        std::fs::write(&target, &partial).expect("write partial download");

        let transport = Arc::new(ServeTransport::new(&payload));
        ResourceDownloader::new(
            &target,
            chunked_resource(&payload, 4),
            transport.clone(),
            Arc::new(XxHasher),
            settings(),
        )
        .download(&|_, _| {}, &PatchControl::new())
        .await
        .expect("download");

        assert_eq!(*transport.offsets.lock().expect("offsets lock"), vec![8]);
        assert_eq!(std::fs::read(&target).expect("read back"), payload);
    }

    #[tokio::test]
    async fn failed_torrent_falls_back_to_http() {
        let payload: Vec<u8> = (0..10u8).collect();
        let target = destination();
        let transport = Arc::new(ServeTransport::new(&payload));
        let mut resource = chunked_resource(&payload, 4);
        resource.chunks = None;
        ResourceDownloader::new(&target, resource, transport.clone(), Arc::new(XxHasher), settings())
            .with_torrents(Some(Arc::new(BrokenEngine)), true)
            .download(&|_, _| {}, &PatchControl::new())
            .await
            .expect("download");
        assert_eq!(std::fs::read(&target).expect("read back"), payload);
    }

    #[tokio::test]
    async fn corrupt_http_payload_is_rejected() {
        let payload: Vec<u8> = (0..10u8).collect();
        let mut served = payload.clone();
        served[3] ^= 0xff;
        let target = destination();
        let mut resource = chunked_resource(&payload, 4);
        resource.chunks = None;
        resource.hash_code = Some(hash_bytes(&payload));

        let err = ResourceDownloader::new(
            &target,
            resource,
            Arc::new(ServeTransport::new(&served)),
            Arc::new(XxHasher),
            settings(),
        )
        .download(&|_, _| {}, &PatchControl::new())
        .await
        .expect_err("corrupt payload must fail");
        assert!(matches!(err, PatcherError::DownloadFailed(_)));
    }

    #[tokio::test]
    async fn corrupt_torrent_payload_falls_back_to_http() {
        let payload: Vec<u8> = (0..10u8).collect();
        let mut corrupt = payload.clone();
        corrupt[0] ^= 0xff;
        let target = destination();
        let mut resource = chunked_resource(&payload, 4);
        resource.chunks = None;
        resource.hash_code = Some(hash_bytes(&payload));
        let transport = Arc::new(
            ServeTransport::new(&payload).with_url("http://mirror.invalid/pkg.torrent", b"d8:announcee"),
        );

        ResourceDownloader::new(&target, resource, transport.clone(), Arc::new(XxHasher), settings())
            .with_torrents(Some(Arc::new(SeedingEngine { payload: corrupt })), true)
            .download(&|_, _| {}, &PatchControl::new())
            .await
            .expect("download");
        assert_eq!(std::fs::read(&target).expect("read back"), payload);
        assert_eq!(*transport.offsets.lock().expect("offsets lock"), vec![0]);
    }

    #[tokio::test]
    async fn short_torrent_payload_without_chunks_is_not_trusted() {
        let payload: Vec<u8> = (0..10u8).collect();
        let target = destination();
        let mut resource = chunked_resource(&payload, 4);
        resource.chunks = None;
        let transport = Arc::new(
            ServeTransport::new(&payload).with_url("http://mirror.invalid/pkg.torrent", b"d8:announcee"),
        );

        ResourceDownloader::new(&target, resource, transport.clone(), Arc::new(XxHasher), settings())
            .with_torrents(Some(Arc::new(SeedingEngine { payload: payload[..6].to_vec() })), true)
            .download(&|_, _| {}, &PatchControl::new())
            .await
            .expect("download");
        assert_eq!(std::fs::read(&target).expect("read back"), payload);
    }

    #[tokio::test]
    async fn fetches_package_meta_alongside_the_package() {
        let payload: Vec<u8> = (0..10u8).collect();
        let target = destination();
        let meta_path = target.with_extension("package.meta");
        let mut resource = chunked_resource(&payload, 4);
        resource.meta_urls = vec!["http://mirror.invalid/pkg.meta".to_string()];
        let transport = Arc::new(
            ServeTransport::new(&payload).with_url("http://mirror.invalid/pkg.meta", br#"{"files":[]}"#),
        );

        ResourceDownloader::new(&target, resource, transport, Arc::new(XxHasher), settings())
            .with_meta_destination(&meta_path)
            .download(&|_, _| {}, &PatchControl::new())
            .await
            .expect("download");
        assert_eq!(std::fs::read(&meta_path).expect("meta"), br#"{"files":[]}"#);
        assert_eq!(std::fs::read(&target).expect("read back"), payload);
    }
}
