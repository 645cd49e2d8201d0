use std::path::Path;
use std::sync::Arc;

use crate::config::PatcherConfig;
use crate::errors::{PatcherError, Result};
use crate::models::{RemoteResource, VersionId};
use crate::services::app_data::AppData;
use crate::services::content_installer::ContentInstaller;
use crate::services::control::PatchControl;
use crate::services::diff_installer::DiffInstaller;
use crate::services::file_patcher::BinaryPatcher;
use crate::services::integrity::{check_version_integrity, IntegrityOptions};
use crate::services::local_metadata::InstalledState;
use crate::services::mirror_downloader::MirrorTransport;
use crate::services::pack1::resource_password;
use crate::services::remote_metadata::RemoteMetaData;
use crate::services::repair::ContentRepairer;
use crate::services::resource_downloader::ResourceDownloader;
use crate::services::status::{DownloadStatusReporter, StatusMonitor, StatusWeights};
use crate::services::strategy::{UpdateStrategy, UpdateStrategyResolver};
use crate::services::torrent_client::TorrentClient;
use crate::services::torrent_downloader::TorrentSettings;
use crate::services::unarchiver::Pack1Source;
use crate::services::uninstaller::uninstall;
use crate::utils::file::remove_path;
use crate::utils::hashing::{ChunkHasher, XxHasher};

/// Everything one patch run shares with its caller.
#[derive(Clone)]
pub struct UpdaterContext {
    pub config: PatcherConfig,
    pub control: PatchControl,
    pub status: StatusMonitor,
}

impl UpdaterContext {
    pub fn new(config: PatcherConfig) -> Self {
        Self {
            config,
            control: PatchControl::new(),
            status: StatusMonitor::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateReport {
    pub strategy: UpdateStrategy,
    pub installed_version: Option<VersionId>,
}

struct DiffStep {
    version: VersionId,
    resource: RemoteResource,
    download_status: DownloadStatusReporter,
    installer: DiffInstaller,
}

/// Brings one installation up to the latest published version. Single use.
pub struct AppUpdater {
    app_data: AppData,
    remote: Arc<dyn RemoteMetaData>,
    transport: Arc<dyn MirrorTransport>,
    torrent_client: Option<Arc<dyn TorrentClient>>,
    patcher: Arc<dyn BinaryPatcher>,
    hasher: Arc<dyn ChunkHasher>,
    context: UpdaterContext,
}

impl AppUpdater {
    pub fn new(
        app_data: AppData,
        remote: Arc<dyn RemoteMetaData>,
        transport: Arc<dyn MirrorTransport>,
        patcher: Arc<dyn BinaryPatcher>,
        context: UpdaterContext,
    ) -> Self {
        Self {
            app_data,
            remote,
            transport,
            torrent_client: None,
            patcher,
            hasher: Arc::new(XxHasher),
            context,
        }
    }

    pub fn with_torrent_client(mut self, client: Option<Arc<dyn TorrentClient>>) -> Self {
        self.torrent_client = client;
        self
    }

    pub async fn patch(mut self) -> Result<UpdateReport> {
        self.context.control.check()?;
        self.context.status.set_description("Checking for updates...");
        let strategy = {
            let resolver = UpdateStrategyResolver::new(self.remote.as_ref(), &self.context.config);
            resolver
                .resolve(&self.app_data, &self.context.control, None)
                .await?
        };
        tracing::info!("update strategy: {}", strategy);
        let strategy = self.run(strategy).await?;
        Ok(self.finish(strategy))
    }

    /// Restores the broken files of the installed version without changing it. Falls
    /// back to reinstalling that version when a file-level repair is not possible.
    pub async fn repair(mut self) -> Result<UpdateReport> {
        self.context.control.check()?;
        let version = match self.app_data.metadata.installed_state() {
            InstalledState::Installed(version) => version,
            state => {
                return Err(PatcherError::InvalidOperation(format!(
                    "cannot repair an installation that is {:?}",
                    state
                )))
            }
        };
        let strategy = self.run(UpdateStrategy::Repair { version }).await?;
        Ok(self.finish(strategy))
    }

    /// Carries out `strategy` and returns the one that actually ran.
    async fn run(&mut self, strategy: UpdateStrategy) -> Result<UpdateStrategy> {
        match strategy {
            UpdateStrategy::Empty => {}
            UpdateStrategy::Content { version } => self.patch_content(version).await?,
            UpdateStrategy::Diff { from, to } => self.patch_diffs(from, to).await?,
            UpdateStrategy::Repair { version } => {
                if !self.repair_version(version).await? {
                    return self.run_fallback(strategy).await;
                }
            }
            UpdateStrategy::RepairAndDiff { from, to } => {
                if !self.repair_version(from).await? {
                    return self.run_fallback(strategy).await;
                }
                self.patch_diffs(from, to).await?;
            }
        }
        Ok(strategy)
    }

    async fn run_fallback(&mut self, strategy: UpdateStrategy) -> Result<UpdateStrategy> {
        let Some(UpdateStrategy::Content { version }) = strategy.fallback() else {
            return Err(PatcherError::InvalidOperation(format!(
                "no fallback for strategy {}",
                strategy
            )));
        };
        tracing::warn!("{} did not succeed, reinstalling version {}", strategy, version);
        self.patch_content(version).await?;
        Ok(UpdateStrategy::Content { version })
    }

    fn finish(&mut self, strategy: UpdateStrategy) -> UpdateReport {
        if let Err(err) = self.app_data.temporary.clear() {
            tracing::warn!("failed to clear temporary data: {}", err);
        }
        self.context.status.set_description("Ready");
        let installed_version = match self.app_data.metadata.installed_state() {
            InstalledState::Installed(version) => Some(version),
            _ => None,
        };
        UpdateReport {
            strategy,
            installed_version,
        }
    }

    /// Returns `true` when `version` is intact after the repair. Failures other than
    /// cancellation are reported as `false` so the caller can fall back.
    async fn repair_version(&mut self, version: VersionId) -> Result<bool> {
        match self.try_repair(version).await {
            Ok(intact) => Ok(intact),
            Err(PatcherError::Cancelled) => Err(PatcherError::Cancelled),
            Err(err) => {
                tracing::warn!("repair of version {} failed: {}", version, err);
                Ok(false)
            }
        }
    }

    async fn try_repair(&mut self, version: VersionId) -> Result<bool> {
        let control = self.context.control.clone();
        let status = self.context.status.clone();
        let config = &self.context.config;

        let summary = self.remote.get_content_summary(version).await?;
        let resource = self
            .remote
            .get_content_package_resource(version, config.key_secret.as_deref())
            .await?;
        if !ContentRepairer::is_supported(&summary, &resource) {
            tracing::info!("version {} cannot be repaired file by file", version);
            return Ok(false);
        }
        let mut repairer = ContentRepairer::new(
            version,
            summary.clone(),
            resource,
            &resource_password(&config.app_secret, version),
            self.transport.clone(),
            self.hasher.clone(),
            TorrentSettings::from_config(config),
        );
        repairer.prepare(&status);

        status.set_description("Repairing...");
        let report = repairer.repair(&mut self.app_data, &control).await?;
        tracing::info!(
            "repair of version {}: {} restored, {} re-registered",
            version,
            report.restored.len(),
            report.reregistered.len()
        );

        let options = IntegrityOptions {
            check_sizes: true,
            check_hashes: true,
        };
        let integrity = check_version_integrity(version, &summary, &self.app_data, options, &control, None)?;
        Ok(integrity.is_ok())
    }

    fn pack1_source(&self, meta: &Path, version: VersionId) -> Pack1Source {
        Pack1Source {
            meta: meta.to_path_buf(),
            password: resource_password(&self.context.config.app_secret, version),
        }
    }

    async fn patch_content(&mut self, version: VersionId) -> Result<()> {
        let control = self.context.control.clone();
        let status = self.context.status.clone();
        let key_secret = self.context.config.key_secret.clone();

        let summary = self.remote.get_content_summary(version).await?;
        let resource = self
            .remote
            .get_content_package_resource(version, key_secret.as_deref())
            .await?;
        let uninstall_status =
            status.create_general_reporter(StatusWeights::copy_files(summary.uncompressed_size));
        let download_status = status.create_download_reporter(StatusWeights::download(resource.size));
        let package = self.app_data.downloads.content_package_path(version);
        let meta = self.app_data.downloads.content_package_meta_path(version);
        let mut installer = ContentInstaller::new(&package, version, summary)
            .with_pack1(self.pack1_source(&meta, version));
        installer.prepare(&status);

        status.set_description("Uninstalling...");
        uninstall(&mut self.app_data, &control, Some(&uninstall_status))?;
        uninstall_status.set_progress(1.0);

        status.set_description("Downloading...");
        self.download(&package, Some(&meta), resource, &download_status).await?;

        status.set_description("Installing...");
        installer.install(&mut self.app_data, &control)?;
        remove_path(&package)?;
        remove_path(&meta)?;
        Ok(())
    }

    async fn patch_diffs(&mut self, from: VersionId, to: VersionId) -> Result<()> {
        let control = self.context.control.clone();
        let status = self.context.status.clone();
        let key_secret = self.context.config.key_secret.clone();

        // Every step is registered up front so overall progress covers the whole chain.
        let mut steps = Vec::with_capacity((to - from) as usize);
        for version in from + 1..=to {
            let summary = self.remote.get_diff_summary(version).await?;
            let resource = self
                .remote
                .get_diff_package_resource(version, key_secret.as_deref())
                .await?;
            let download_status = status.create_download_reporter(StatusWeights::download(resource.size));
            let package = self.app_data.downloads.diff_package_path(version);
            let meta = self.app_data.downloads.diff_package_meta_path(version);
            let mut installer = DiffInstaller::new(&package, version, summary, self.patcher.clone())
                .with_pack1(self.pack1_source(&meta, version));
            installer.prepare(&status);
            steps.push(DiffStep {
                version,
                resource,
                download_status,
                installer,
            });
        }

        for step in steps {
            control.check()?;
            let package = self.app_data.downloads.diff_package_path(step.version);
            let meta = self.app_data.downloads.diff_package_meta_path(step.version);
            status.set_description(&format!("Downloading update {}...", step.version));
            self.download(&package, Some(&meta), step.resource, &step.download_status)
                .await?;

            status.set_description(&format!("Installing update {}...", step.version));
            step.installer.install(&mut self.app_data, &control)?;
            remove_path(&package)?;
            remove_path(&meta)?;

            let state = self.app_data.metadata.installed_state();
            if state != InstalledState::Installed(step.version) {
                return Err(PatcherError::VersionMismatch {
                    file: "installation".to_string(),
                    expected: step.version,
                    actual: match state {
                        InstalledState::Installed(version) => Some(version),
                        _ => None,
                    },
                });
            }
            tracing::info!("installation is now at version {}", step.version);
        }
        Ok(())
    }

    async fn download(
        &self,
        destination: &Path,
        meta: Option<&Path>,
        resource: RemoteResource,
        reporter: &DownloadStatusReporter,
    ) -> Result<()> {
        let config = &self.context.config;
        let mut downloader = ResourceDownloader::new(
            destination,
            resource,
            self.transport.clone(),
            self.hasher.clone(),
            TorrentSettings::from_config(config),
        )
        .with_torrents(self.torrent_client.clone(), config.use_torrents);
        if let Some(meta) = meta {
            downloader = downloader.with_meta_destination(meta);
        }

        reporter.on_download_started();
        let progress = {
            let reporter = reporter.clone();
            move |bytes: u64, total: u64| reporter.on_download_progress(bytes, total)
        };
        let result = downloader.download(&progress, &self.context.control).await;
        reporter.on_download_ended();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentFile, ContentSummary, DiffSummary};
    use crate::services::download_sink::DownloadSink;
    use crate::services::file_patcher::tests::make_delta;
    use crate::services::file_patcher::RsyncPatcher;
    use crate::services::pack1::tests::write_pack1;
    use crate::services::mirror_downloader::{DownloadOutcome, Mirror, ProgressCallback};
    use crate::services::remote_metadata::fake::StaticRemote;
    use crate::services::unarchiver::tests::write_package;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use crate::models::ChunksData;
    use crate::utils::hashing::hash_bytes;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Serves payloads by URL, honouring the requested range. When `observe` is set,
    /// records the status monitor's byte count right after each progress report.
    #[derive(Default)]
    struct MemoryTransport {
        files: HashMap<String, Vec<u8>>,
        observe: Option<StatusMonitor>,
        observed: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl MirrorTransport for MemoryTransport {
        async fn fetch(
            &self,
            mirror: &Mirror,
            sink: &mut dyn DownloadSink,
            progress: &ProgressCallback,
            _control: &PatchControl,
        ) -> Result<DownloadOutcome> {
            let Some(payload) = self.files.get(mirror.url()) else {
                return Ok(DownloadOutcome::Permanent(
                    crate::services::mirror_downloader::FailureReason::NotFound,
                ));
            };
            let offset = sink.resume_offset() as usize;
            let end = sink
                .range_end()
                .map_or(payload.len(), |end| end as usize + 1);
            sink.write(&payload[offset..end])?;
            progress(payload.len() as u64, payload.len() as u64);
            if let Some(monitor) = self.observe.as_ref() {
                let bytes = monitor.snapshot().download_bytes;
                self.observed.lock().expect("observed lock").push(bytes);
            }
            sink.end_of_stream();
            Ok(DownloadOutcome::Completed)
        }
    }

    fn temp_root(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("otoshi-patcher-{}-{}", label, Uuid::new_v4()))
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let path = temp_root("package").join("package.zip");
        write_package(&path, entries);
        std::fs::read(&path).expect("read package")
    }

    fn resource(url: &str, payload: &[u8]) -> RemoteResource {
        RemoteResource {
            urls: vec![url.to_string()],
            size: payload.len() as u64,
            ..Default::default()
        }
    }

    fn files(paths: &[&str]) -> Vec<ContentFile> {
        paths
            .iter()
            .map(|path| ContentFile {
                path: path.to_string(),
                ..Default::default()
            })
            .collect()
    }

    fn context() -> UpdaterContext {
        let mut config = PatcherConfig::default();
        config.retry_budget = 2;
        config.retry_backoff_secs = 0;
        UpdaterContext::new(config)
    }

    fn updater(
        root: &Path,
        remote: StaticRemote,
        transport: MemoryTransport,
        context: UpdaterContext,
    ) -> AppUpdater {
        AppUpdater::new(
            AppData::open(root).expect("open app data"),
            Arc::new(remote),
            Arc::new(transport),
            Arc::new(RsyncPatcher::default()),
            context,
        )
    }

    #[tokio::test]
    async fn fresh_install_uses_content_package() {
        let root = temp_root("updater");
        let package = zip_bytes(&[("bin/", b""), ("bin/app", b"binary"), ("readme.txt", b"hi")]);
        let mut remote = StaticRemote {
            latest: 2,
            ..Default::default()
        };
        remote.contents.insert(
            2,
            (
                ContentSummary {
                    size: package.len() as u64,
                    files: files(&["bin/", "bin/app", "readme.txt"]),
                    ..Default::default()
                },
                resource("mem://content-2", &package),
            ),
        );
        let mut transport = MemoryTransport::default();
        transport.files.insert("mem://content-2".to_string(), package);
        let context = context();
        let status = context.status.clone();

        let report = updater(&root, remote, transport, context)
            .patch()
            .await
            .expect("patch");

        assert_eq!(report.strategy, UpdateStrategy::Content { version: 2 });
        assert_eq!(report.installed_version, Some(2));
        assert_eq!(std::fs::read(root.join("bin/app")).expect("read app"), b"binary");
        let data = AppData::open(&root).expect("reopen app data");
        assert_eq!(data.metadata.installed_state(), InstalledState::Installed(2));
        assert!(!data.downloads.content_package_path(2).exists());
        assert!(!data.temporary.root().exists());
        let snapshot = status.snapshot();
        assert!((snapshot.progress - 1.0).abs() < 1e-9);
        assert!(!snapshot.is_downloading);
    }

    #[tokio::test]
    async fn applies_diff_chain_in_order() {
        let root = temp_root("updater");
        let v1: Vec<u8> = (0..3000u32).map(|value| (value % 199) as u8).collect();
        let mut v2 = v1.clone();
        v2[0..16].copy_from_slice(&[2u8; 16]);
        let mut v3 = v2.clone();
        v3.extend_from_slice(b"version three");

        {
            let mut data = AppData::open(&root).expect("open app data");
            std::fs::write(root.join("app.bin"), &v1).expect("write v1");
            data.metadata.add_or_update_file("app.bin", 1).expect("register");
        }

        let diff2 = zip_bytes(&[("app.bin", &make_delta(&v1, &v2)), ("notes.txt", b"two")]);
        let diff3 = zip_bytes(&[("app.bin", &make_delta(&v2, &v3))]);
        let mut remote = StaticRemote {
            latest: 3,
            ..Default::default()
        };
        remote.contents.insert(
            1,
            (
                ContentSummary {
                    size: 1_000_000,
                    files: files(&["app.bin"]),
                    ..Default::default()
                },
                RemoteResource::default(),
            ),
        );
        remote.contents.insert(
            3,
            (
                ContentSummary {
                    size: 1_000_000,
                    files: files(&["app.bin", "notes.txt"]),
                    ..Default::default()
                },
                RemoteResource::default(),
            ),
        );
        remote.diffs.insert(
            2,
            (
                DiffSummary {
                    size: diff2.len() as u64,
                    added_files: vec!["notes.txt".to_string()],
                    modified_files: vec!["app.bin".to_string()],
                    ..Default::default()
                },
                resource("mem://diff-2", &diff2),
            ),
        );
        remote.diffs.insert(
            3,
            (
                DiffSummary {
                    size: diff3.len() as u64,
                    modified_files: vec!["app.bin".to_string()],
                    unchanged_files: vec!["notes.txt".to_string()],
                    ..Default::default()
                },
                resource("mem://diff-3", &diff3),
            ),
        );
        let mut transport = MemoryTransport::default();
        transport.files.insert("mem://diff-2".to_string(), diff2);
        transport.files.insert("mem://diff-3".to_string(), diff3);

        let report = updater(&root, remote, transport, context())
            .patch()
            .await
            .expect("patch");

        assert_eq!(report.strategy, UpdateStrategy::Diff { from: 1, to: 3 });
        assert_eq!(report.installed_version, Some(3));
        assert_eq!(std::fs::read(root.join("app.bin")).expect("read app"), v3);
        assert_eq!(std::fs::read(root.join("notes.txt")).expect("read notes"), b"two");
        let data = AppData::open(&root).expect("reopen app data");
        assert_eq!(data.metadata.get_file_version("notes.txt"), Some(3));
        assert!(!data.downloads.diff_package_path(2).exists());
        assert!(!data.downloads.diff_package_path(3).exists());
    }

    #[tokio::test]
    async fn cancelled_run_does_nothing() {
        let root = temp_root("updater");
        let context = context();
        context.control.cancel();
        let result = updater(&root, StaticRemote::default(), MemoryTransport::default(), context)
            .patch()
            .await;
        assert!(matches!(result, Err(PatcherError::Cancelled)));
        assert!(AppData::open(&root).expect("reopen").metadata.is_empty());
    }

    #[tokio::test]
    async fn download_progress_reaches_the_status_monitor() {
        let root = temp_root("updater");
        let package = zip_bytes(&[("readme.txt", b"hello")]);
        let mut remote = StaticRemote {
            latest: 1,
            ..Default::default()
        };
        remote.contents.insert(
            1,
            (
                ContentSummary {
                    size: package.len() as u64,
                    files: files(&["readme.txt"]),
                    ..Default::default()
                },
                resource("mem://content-1", &package),
            ),
        );
        let context = context();
        let mut transport = MemoryTransport {
            observe: Some(context.status.clone()),
            ..Default::default()
        };
        let observed = transport.observed.clone();
        transport.files.insert("mem://content-1".to_string(), package.clone());

        updater(&root, remote, transport, context)
            .patch()
            .await
            .expect("patch");

        assert_eq!(*observed.lock().expect("observed lock"), vec![package.len() as u64]);
    }

    /// Published pack1 content of version 1 and the bytes of each file.
    struct Pack1Content {
        summary: ContentSummary,
        resource: RemoteResource,
        package: Vec<u8>,
        meta: Vec<u8>,
    }

    fn pack1_content(entries: &[(&str, &[u8])]) -> Pack1Content {
        let dir = temp_root("published");
        let context = context();
        let password = resource_password(&context.config.app_secret, 1);
        write_pack1(&dir.join("content.pack1"), &dir.join("content.meta"), &password, entries);
        let package = std::fs::read(dir.join("content.pack1")).expect("read package");
        let meta = std::fs::read(dir.join("content.meta")).expect("read meta");
        let summary = ContentSummary {
            size: package.len() as u64,
            compression_method: Some("pack1".to_string()),
            files: entries
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
            urls: vec!["mem://content-1".to_string()],
            meta_urls: vec!["mem://content-1.meta".to_string()],
            size: package.len() as u64,
            chunks: Some(ChunksData {
                chunk_size: 32,
                hashes: package.chunks(32).map(hash_bytes).collect(),
            }),
            ..Default::default()
        };
        Pack1Content {
            summary,
            resource,
            package,
            meta,
        }
    }

    fn install_files(root: &Path, entries: &[(&str, &[u8])]) {
        let mut data = AppData::open(root).expect("open app data");
        for (name, content) in entries {
            std::fs::write(root.join(name), content).expect("write file");
            data.metadata.add_or_update_file(name, 1).expect("register");
        }
    }

    #[tokio::test]
    async fn repair_restores_broken_files_in_place() {
        let root = temp_root("updater");
        let entries: [(&str, &[u8]); 2] = [("a.txt", b"first file"), ("b.txt", b"second file")];
        install_files(&root, &entries);
        std::fs::write(root.join("b.txt"), b"SECOND FILE").expect("damage file");

        let published = pack1_content(&entries);
        let mut remote = StaticRemote {
            latest: 1,
            ..Default::default()
        };
        remote.contents.insert(1, (published.summary.clone(), published.resource.clone()));
        let mut transport = MemoryTransport::default();
        transport.files.insert("mem://content-1".to_string(), published.package.clone());
        transport.files.insert("mem://content-1.meta".to_string(), published.meta.clone());

        let report = updater(&root, remote, transport, context())
            .repair()
            .await
            .expect("repair");

        assert_eq!(report.strategy, UpdateStrategy::Repair { version: 1 });
        assert_eq!(report.installed_version, Some(1));
        assert_eq!(std::fs::read(root.join("b.txt")).expect("read b"), b"second file");
    }

    #[tokio::test]
    async fn repair_then_diff_reaches_latest() {
        let root = temp_root("updater");
        let entries: [(&str, &[u8]); 2] = [("a.txt", b"first file"), ("b.txt", b"second file")];
        install_files(&root, &entries);
        std::fs::remove_file(root.join("a.txt")).expect("remove file");

        let published = pack1_content(&entries);
        let diff2 = zip_bytes(&[("c.txt", b"third file")]);
        let mut remote = StaticRemote {
            latest: 2,
            ..Default::default()
        };
        remote.contents.insert(1, (published.summary.clone(), published.resource.clone()));
        remote.contents.insert(
            2,
            (
                ContentSummary {
                    size: 1_000_000,
                    files: files(&["a.txt", "b.txt", "c.txt"]),
                    ..Default::default()
                },
                RemoteResource::default(),
            ),
        );
        remote.diffs.insert(
            2,
            (
                DiffSummary {
                    size: diff2.len() as u64,
                    added_files: vec!["c.txt".to_string()],
                    unchanged_files: vec!["a.txt".to_string(), "b.txt".to_string()],
                    ..Default::default()
                },
                resource("mem://diff-2", &diff2),
            ),
        );
        let mut transport = MemoryTransport::default();
        transport.files.insert("mem://content-1".to_string(), published.package.clone());
        transport.files.insert("mem://content-1.meta".to_string(), published.meta.clone());
        transport.files.insert("mem://diff-2".to_string(), diff2);

        let report = updater(&root, remote, transport, context())
            .patch()
            .await
            .expect("patch");

        assert_eq!(report.strategy, UpdateStrategy::RepairAndDiff { from: 1, to: 2 });
        assert_eq!(report.installed_version, Some(2));
        assert_eq!(std::fs::read(root.join("a.txt")).expect("read a"), b"first file");
        assert_eq!(std::fs::read(root.join("c.txt")).expect("read c"), b"third file");
    }

    #[tokio::test]
    async fn failed_repair_falls_back_to_content() {
        let root = temp_root("updater");
        let entries: [(&str, &[u8]); 1] = [("a.txt", b"first file")];
        install_files(&root, &entries);
        std::fs::remove_file(root.join("a.txt")).expect("remove file");

        let published = pack1_content(&entries);
        let content2 = zip_bytes(&[("a.txt", b"new first file")]);
        let mut remote = StaticRemote {
            latest: 2,
            ..Default::default()
        };
        remote.contents.insert(1, (published.summary.clone(), published.resource.clone()));
        remote.contents.insert(
            2,
            (
                ContentSummary {
                    size: 1_000_000,
                    files: files(&["a.txt"]),
                    ..Default::default()
                },
                resource("mem://content-2", &content2),
            ),
        );
        remote.diffs.insert(
            2,
            (
                DiffSummary {
                    size: 10,
                    ..Default::default()
                },
                RemoteResource::default(),
            ),
        );
        // The meta file of version 1 is gone from the mirrors.
        let mut transport = MemoryTransport::default();
        transport.files.insert("mem://content-2".to_string(), content2);

        let report = updater(&root, remote, transport, context())
            .patch()
            .await
            .expect("patch");

        assert_eq!(report.strategy, UpdateStrategy::Content { version: 2 });
        assert_eq!(report.installed_version, Some(2));
        assert_eq!(std::fs::read(root.join("a.txt")).expect("read a"), b"new first file");
    }
}
