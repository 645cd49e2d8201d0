use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{PatcherError, Result};
use crate::models::{is_directory_entry, ContentSummary, RemoteResource, VersionId};
use crate::services::app_data::AppData;
use crate::services::chunked_writer::ChunkedFileWriter;
use crate::services::control::PatchControl;
use crate::services::download_sink::{ChunkedSink, PlainFileSink};
use crate::services::integrity::{check_version_integrity, FileIntegrityStatus, IntegrityOptions};
use crate::services::mirror_downloader::{Mirror, MirrorDownloader, MirrorTransport};
use crate::services::pack1::{Pack1Entry, Pack1EntryKind, Pack1Meta, Pack1Unarchiver};
use crate::services::resource_downloader::ResourceDownloader;
use crate::services::status::{GeneralStatusReporter, StatusMonitor, StatusWeights};
use crate::services::torrent_downloader::TorrentSettings;
use crate::services::unarchiver::PackageFormat;
use crate::utils::file::remove_path;
use crate::utils::hashing::{hash_file, hashes_match, ChunkHasher};

/// What a repair did to the installed version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Fetched again from the content package.
    pub restored: Vec<String>,
    /// Correct on disk, only the ledger entry was wrong.
    pub reregistered: Vec<String>,
}

/// Restores the broken files of an installed version from its pack1 content package.
/// With a chunk table only the chunks holding each file are downloaded.
pub struct ContentRepairer {
    version: VersionId,
    summary: ContentSummary,
    resource: RemoteResource,
    password: String,
    http: Arc<dyn MirrorTransport>,
    hasher: Arc<dyn ChunkHasher>,
    settings: TorrentSettings,
    status: Option<GeneralStatusReporter>,
}

impl ContentRepairer {
    pub fn new(
        version: VersionId,
        summary: ContentSummary,
        resource: RemoteResource,
        password: &str,
        http: Arc<dyn MirrorTransport>,
        hasher: Arc<dyn ChunkHasher>,
        settings: TorrentSettings,
    ) -> Self {
        Self {
            version,
            summary,
            resource,
            password: password.to_string(),
            http,
            hasher,
            settings,
            status: None,
        }
    }

    /// Only pack1 packages with a published meta file can be repaired file by file.
    pub fn is_supported(summary: &ContentSummary, resource: &RemoteResource) -> bool {
        let format = PackageFormat::from_method(summary.compression_method.as_deref());
        matches!(format, Ok(PackageFormat::Pack1)) && resource.has_meta_urls()
    }

    pub fn prepare(&mut self, status: &StatusMonitor) {
        let bytes = self.summary.uncompressed_size.max(self.summary.total_file_size());
        self.status = Some(status.create_general_reporter(StatusWeights::integrity_check(bytes)));
    }

    pub async fn repair(self, app_data: &mut AppData, control: &PatchControl) -> Result<RepairReport> {
        if !Self::is_supported(&self.summary, &self.resource) {
            return Err(PatcherError::InvalidOperation(format!(
                "version {} has no pack1 package meta to repair from",
                self.version
            )));
        }
        let meta_path = app_data.downloads.content_package_meta_path(self.version);
        self.download_meta(&meta_path, control).await?;
        let meta = Pack1Meta::load(&meta_path)?;

        let options = IntegrityOptions {
            check_sizes: true,
            check_hashes: true,
        };
        let integrity =
            check_version_integrity(self.version, &self.summary, app_data, options, control, None)?;

        let mut report = RepairReport::default();
        let mut broken = Vec::new();
        for file in &integrity.files {
            match file.status {
                FileIntegrityStatus::Ok => {}
                FileIntegrityStatus::InvalidVersion | FileIntegrityStatus::MissingMetaData
                    if self.matches_published_file(app_data, &file.path)? =>
                {
                    app_data.metadata.add_or_update_file(&file.path, self.version)?;
                    report.reregistered.push(file.path.clone());
                }
                _ => broken.push(file.path.clone()),
            }
        }
        tracing::info!(
            "repairing version {}: {} files to restore, {} re-registered",
            self.version,
            broken.len(),
            report.reregistered.len()
        );

        let needs_package = broken.iter().any(|name| !is_directory_entry(name));
        let whole_package = if self.resource.has_chunks() || !needs_package {
            None
        } else {
            Some(self.download_whole_package(app_data, control).await?)
        };

        let total = broken.len() as u64;
        for (index, name) in broken.into_iter().enumerate() {
            control.check()?;
            if is_directory_entry(&name) {
                app_data.local.create_directory(&name)?;
            } else {
                let entry = meta
                    .entry(&name)
                    .filter(|entry| entry.kind == Pack1EntryKind::Regular)
                    .ok_or_else(|| {
                        PatcherError::Installer(format!("{} is not in the package meta", name))
                    })?;
                self.restore_file(app_data, &meta, entry, whole_package.as_deref(), control)
                    .await?;
            }
            app_data.metadata.add_or_update_file(&name, self.version)?;
            tracing::debug!("restored {}", name);
            report.restored.push(name);
            if let Some(reporter) = self.status.as_ref() {
                reporter.set_fraction(index as u64 + 1, total);
            }
        }
        if let Some(reporter) = self.status.as_ref() {
            reporter.set_progress(1.0);
        }

        if let Some(package) = whole_package {
            remove_path(&package)?;
        }
        remove_path(&meta_path)?;
        Ok(report)
    }

    async fn download_meta(&self, path: &Path, control: &PatchControl) -> Result<()> {
        let mut sink = PlainFileSink::new(path, None)?;
        self.downloader(&self.resource.meta_urls)
            .download(&mut sink, &|_, _| {}, control)
            .await
    }

    async fn download_whole_package(&self, app_data: &AppData, control: &PatchControl) -> Result<PathBuf> {
        tracing::warn!(
            "content package of version {} has no chunk table, downloading all of it",
            self.version
        );
        let package = app_data.downloads.content_package_path(self.version);
        ResourceDownloader::new(
            &package,
            self.resource.clone(),
            self.http.clone(),
            self.hasher.clone(),
            self.settings,
        )
        .download(&|_, _| {}, control)
        .await?;
        Ok(package)
    }

    fn downloader(&self, urls: &[String]) -> MirrorDownloader {
        let mirrors = urls.iter().map(|url| Mirror::Http(url.clone())).collect();
        MirrorDownloader::new(mirrors, self.http.clone(), self.settings.retry)
    }

    /// A file whose ledger entry is wrong is kept when it still matches the published
    /// size and hash.
    fn matches_published_file(&self, app_data: &AppData, name: &str) -> Result<bool> {
        if is_directory_entry(name) || !app_data.local.file_exists(name)? {
            return Ok(false);
        }
        let Some(file) = self.summary.files.iter().find(|file| file.path == name) else {
            return Ok(false);
        };
        if let Some(size) = file.size {
            if app_data.local.file_size(name)? != size {
                return Ok(false);
            }
        }
        match file.hash.as_deref() {
            Some(expected) => Ok(hashes_match(&hash_file(&app_data.local.file_path(name)?)?, expected)),
            None => Ok(false),
        }
    }

    async fn restore_file(
        &self,
        app_data: &AppData,
        meta: &Pack1Meta,
        entry: &Pack1Entry,
        whole_package: Option<&Path>,
        control: &PatchControl,
    ) -> Result<()> {
        let scratch = app_data.temporary.root();
        let output = app_data.temporary.unique_path()?;

        if entry.size.unwrap_or(0) == 0 {
            Pack1Unarchiver::new(output.path(), meta.clone(), scratch, &self.password)?
                .unarchive_entry(entry, output.path(), control)?;
            return app_data.local.create_or_update_file(&entry.name, output.path());
        }

        let partial = app_data.temporary.unique_path()?;
        let unarchiver = match whole_package {
            Some(package) => Pack1Unarchiver::new(package, meta.clone(), scratch, &self.password)?,
            None => {
                let range = entry.byte_range()?;
                let chunks = self.resource.chunks.as_ref().ok_or_else(|| {
                    PatcherError::InvalidChunkTable("content package has no chunk table".to_string())
                })?;
                chunks.validate(self.resource.size)?;
                let writer = ChunkedFileWriter::create_range(
                    partial.path(),
                    chunks.chunk_size,
                    self.resource.size,
                    chunks.expected_hashes()?,
                    self.hasher.clone(),
                    range,
                )?;
                tracing::debug!("fetching {} from package bytes {}", entry.name, range);
                let mut sink = ChunkedSink::new(writer);
                self.downloader(&self.resource.urls)
                    .download(&mut sink, &|_, _| {}, control)
                    .await?;
                let window = sink.into_inner().effective_range().ok_or_else(|| {
                    PatcherError::DownloadFailed(format!("nothing downloaded for {}", entry.name))
                })?;
                Pack1Unarchiver::new(partial.path(), meta.clone(), scratch, &self.password)?
                    .with_range(window)
            }
        };
        unarchiver.unarchive_entry(entry, output.path(), control)?;
        app_data.local.create_or_update_file(&entry.name, output.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunksData, ContentFile};
    use crate::services::download_sink::DownloadSink;
    use crate::services::mirror_downloader::{DownloadOutcome, FailureReason, ProgressCallback, RetryPolicy};
    use crate::services::pack1::resource_password;
    use crate::services::pack1::tests::write_pack1;
    use crate::utils::hashing::{hash_bytes, XxHasher};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    const PACKAGE_URL: &str = "mem://content-1";
    const META_URL: &str = "mem://content-1.meta";

    /// Serves the requested byte range of each payload and records it.
    #[derive(Default)]
    struct RangeTransport {
        files: HashMap<String, Vec<u8>>,
        requests: Mutex<Vec<(String, u64, Option<u64>)>>,
    }

    #[async_trait]
    impl MirrorTransport for RangeTransport {
        async fn fetch(
            &self,
            mirror: &Mirror,
            sink: &mut dyn DownloadSink,
            _progress: &ProgressCallback,
            _control: &PatchControl,
        ) -> Result<DownloadOutcome> {
            let Some(payload) = self.files.get(mirror.url()) else {
                return Ok(DownloadOutcome::Permanent(FailureReason::NotFound));
            };
            let start = sink.resume_offset();
            let end = sink.range_end();
            self.requests
                .lock()
                .expect("requests lock")
                .push((mirror.url().to_string(), start, end));
            let last = end.map_or(payload.len() - 1, |end| end as usize);
            sink.write(&payload[start as usize..=last])?;
            sink.end_of_stream();
            Ok(DownloadOutcome::Completed)
        }
    }

    fn noise(seed: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|index| (index.wrapping_add(seed).wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect()
    }

    fn settings() -> TorrentSettings {
        TorrentSettings {
            timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(5),
            retry: RetryPolicy {
                budget: 2,
                backoff: Duration::from_millis(1),
            },
        }
    }

    struct Fixture {
        root: PathBuf,
        package: Vec<u8>,
        summary: ContentSummary,
        resource: RemoteResource,
        transport: Arc<RangeTransport>,
        contents: Vec<(&'static str, Vec<u8>)>,
    }

    fn fixture(chunk_size: Option<u64>) -> Fixture {
        let root = std::env::temp_dir().join(format!("otoshi-patcher-repair-{}", Uuid::new_v4()));
        let contents = vec![
            ("a.txt", noise(1, 400)),
            ("b.txt", noise(2, 400)),
            ("c.txt", noise(3, 400)),
        ];
        let entries: Vec<(&str, &[u8])> = contents
            .iter()
            .map(|(name, data)| (*name, data.as_slice()))
            .collect();
        let source = root.join("published");
        write_pack1(
            &source.join("content.pack1"),
            &source.join("content.meta"),
            &resource_password("secret", 1),
            &entries,
        );
        let package = std::fs::read(source.join("content.pack1")).expect("read package");
        let meta = std::fs::read(source.join("content.meta")).expect("read meta");

        let summary = ContentSummary {
            size: package.len() as u64,
            compression_method: Some("pack1".to_string()),
            files: contents
                .iter()
                .map(|(name, data)| ContentFile {
                    path: name.to_string(),
                    hash: Some(hash_bytes(data)),
                    size: Some(data.len() as u64),
                })
                .collect(),
            ..Default::default()
        };
        let resource = RemoteResource {
            urls: vec![PACKAGE_URL.to_string()],
            meta_urls: vec![META_URL.to_string()],
            size: package.len() as u64,
            chunks: chunk_size.map(|chunk_size| ChunksData {
                chunk_size,
                hashes: package.chunks(chunk_size as usize).map(hash_bytes).collect(),
            }),
            ..Default::default()
        };
        let mut transport = RangeTransport::default();
        transport.files.insert(PACKAGE_URL.to_string(), package.clone());
        transport.files.insert(META_URL.to_string(), meta);
        Fixture {
            root,
            package,
            summary,
            resource,
            transport: Arc::new(transport),
            contents,
        }
    }

    fn install(fixture: &Fixture) -> AppData {
        let mut data = AppData::open(&fixture.root.join("app")).expect("open app data");
        for (name, content) in &fixture.contents {
            std::fs::write(data.local.file_path(name).expect("path"), content).expect("write file");
            data.metadata.add_or_update_file(name, 1).expect("register");
        }
        data
    }

    fn repairer(fixture: &Fixture) -> ContentRepairer {
        ContentRepairer::new(
            1,
            fixture.summary.clone(),
            fixture.resource.clone(),
            &resource_password("secret", 1),
            fixture.transport.clone(),
            Arc::new(XxHasher),
            settings(),
        )
    }

    #[tokio::test]
    async fn restores_damaged_file_from_its_chunks_only() {
        let fixture = fixture(Some(64));
        let mut data = install(&fixture);
        let damaged = data.local.file_path("b.txt").expect("path");
        std::fs::write(&damaged, noise(9, 400)).expect("damage file");
        data.metadata.add_or_update_file("c.txt", 2).expect("register stale version");

        let report = repairer(&fixture)
            .repair(&mut data, &PatchControl::new())
            .await
            .expect("repair");

        assert_eq!(report.restored, vec!["b.txt".to_string()]);
        assert_eq!(report.reregistered, vec!["c.txt".to_string()]);
        assert_eq!(std::fs::read(&damaged).expect("read restored"), fixture.contents[1].1);
        assert_eq!(data.metadata.get_file_version("c.txt"), Some(1));

        let requests = fixture.transport.requests.lock().expect("requests lock");
        let package_requests: Vec<_> = requests.iter().filter(|request| request.0 == PACKAGE_URL).collect();
        assert_eq!(package_requests.len(), 1);
        let (_, start, end) = package_requests[0].clone();
        let end = end.expect("bounded request");
        assert_eq!(start % 64, 0);
        assert!(end - start + 1 < fixture.package.len() as u64);
        assert!(!data.downloads.content_package_meta_path(1).exists());
    }

    #[tokio::test]
    async fn missing_file_without_chunk_table_uses_whole_package() {
        let fixture = fixture(None);
        let mut data = install(&fixture);
        std::fs::remove_file(data.local.file_path("a.txt").expect("path")).expect("remove file");

        let report = repairer(&fixture)
            .repair(&mut data, &PatchControl::new())
            .await
            .expect("repair");

        assert_eq!(report.restored, vec!["a.txt".to_string()]);
        assert_eq!(
            std::fs::read(data.local.file_path("a.txt").expect("path")).expect("read restored"),
            fixture.contents[0].1
        );
        assert!(!data.downloads.content_package_path(1).exists());
    }

    #[tokio::test]
    async fn zip_content_cannot_be_repaired() {
        let mut fixture = fixture(Some(64));
        fixture.summary.compression_method = Some("zip".to_string());
        let mut data = install(&fixture);
        assert!(!ContentRepairer::is_supported(&fixture.summary, &fixture.resource));
        let result = repairer(&fixture).repair(&mut data, &PatchControl::new()).await;
        assert!(matches!(result, Err(PatcherError::InvalidOperation(_))));
    }
}
