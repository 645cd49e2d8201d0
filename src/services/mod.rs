pub mod api_client;
pub mod app_data;
pub mod app_updater;
pub mod chunked_writer;
pub mod content_installer;
pub mod control;
pub mod diff_installer;
pub mod download_sink;
pub mod file_patcher;
pub mod http_transport;
pub mod integrity;
pub mod local_data;
pub mod local_metadata;
pub mod mirror_downloader;
pub mod pack1;
pub mod remote_metadata;
pub mod repair;
pub mod resource_downloader;
pub mod status;
pub mod strategy;
pub mod temporary_data;
pub mod torrent_client;
pub mod torrent_downloader;
pub mod unarchiver;
pub mod uninstaller;

pub use api_client::ApiClient;
pub use app_data::AppData;
pub use app_updater::{AppUpdater, UpdateReport, UpdaterContext};
pub use chunked_writer::{ChunkedFileWriter, WriteStatus};
pub use content_installer::ContentInstaller;
pub use control::{ControlState, PatchControl};
pub use diff_installer::DiffInstaller;
pub use download_sink::{ChunkedSink, DownloadSink, PlainFileSink};
pub use file_patcher::{BinaryPatcher, RsyncPatcher};
pub use http_transport::HttpTransport;
pub use integrity::{check_version_integrity, FileIntegrityStatus, IntegrityOptions, VersionIntegrity};
pub use local_data::LocalData;
pub use local_metadata::{InstalledState, LocalMetaData};
pub use mirror_downloader::{
    DownloadOutcome, FailureReason, Mirror, MirrorDownloader, MirrorTransport, RetryPolicy,
};
pub use pack1::{resource_password, Pack1Meta, Pack1Unarchiver};
pub use remote_metadata::{ApiRemoteMetaData, RemoteMetaData};
pub use repair::{ContentRepairer, RepairReport};
pub use resource_downloader::{validate_download, ResourceDownloader};
pub use status::{OverallStatus, StatusMonitor};
pub use strategy::{UpdateStrategy, UpdateStrategyResolver};
pub use temporary_data::{DownloadData, TemporaryData};
pub use torrent_client::{ProcessTorrentClient, TorrentClient};
pub use torrent_downloader::{TorrentDownloader, TorrentSettings};
pub use unarchiver::{unpack_package, Pack1Source, PackageFormat, Unarchiver};
pub use uninstaller::uninstall;
