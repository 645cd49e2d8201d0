use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use otoshi_patcher::config::PatcherConfig;
use otoshi_patcher::errors::{PatcherError, Result};
use otoshi_patcher::logging;
use otoshi_patcher::services::{
    ApiClient, ApiRemoteMetaData, AppData, AppUpdater, HttpTransport, ProcessTorrentClient,
    RsyncPatcher, TorrentClient, UpdateReport, UpdaterContext,
};
use otoshi_patcher::utils::paths::{default_config_path, resolve_log_dir};

const EXIT_FAILURE: u8 = 1;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "otoshi-patcher", version, about = "Keeps an application installation up to date")]
struct Cli {
    /// Installation root to patch.
    #[arg(long, env = "PATCHER_INSTALL_DIR")]
    install_dir: PathBuf,

    #[arg(long)]
    app_secret: Option<String>,

    #[arg(long)]
    api_url: Option<String>,

    /// Licence key secret sent with package url requests.
    #[arg(long)]
    key_secret: Option<String>,

    /// JSON config file; defaults to `patcher.config.json` in the installation root.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    use_torrents: bool,

    #[arg(long)]
    skip_integrity_check: bool,

    /// Restore damaged files of the installed version instead of updating.
    #[arg(long)]
    repair: bool,

    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> Result<PatcherConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| default_config_path(&self.install_dir));
        let mut config = PatcherConfig::load_file(&path)?;
        config.apply_env();
        if let Some(value) = self.app_secret.as_ref() {
            config.app_secret = value.clone();
        }
        if let Some(value) = self.api_url.as_ref() {
            config.api_url = value.clone();
        }
        if let Some(value) = self.key_secret.as_ref() {
            config.key_secret = Some(value.clone());
        }
        if self.use_torrents {
            config.use_torrents = true;
        }
        if self.skip_integrity_check {
            config.check_integrity = false;
        }
        config.validate()?;
        Ok(config)
    }
}

fn torrent_client(config: &PatcherConfig) -> Option<Arc<dyn TorrentClient>> {
    if !config.use_torrents {
        return None;
    }
    let Some(program) = config.torrent_client_path.as_ref() else {
        tracing::warn!("torrents enabled but no torrent client configured");
        return None;
    };
    match ProcessTorrentClient::spawn(program, &[]) {
        Ok(client) => Some(Arc::new(client)),
        Err(err) => {
            tracing::warn!("torrent client {} unavailable: {}", program.display(), err);
            None
        }
    }
}

async fn run(cli: Cli) -> Result<UpdateReport> {
    let config = cli.load_config()?;
    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| resolve_log_dir(&cli.install_dir));
    logging::init(&log_dir)?;
    tracing::info!(
        "{} {} against {}",
        if cli.repair { "repairing" } else { "patching" },
        cli.install_dir.display(),
        config.api_url
    );

    let remote = ApiRemoteMetaData::new(ApiClient::from_config(&config)?, config.app_secret.clone());
    let transport = HttpTransport::from_config(&config)?;
    let torrents = torrent_client(&config);
    let app_data = AppData::open(&cli.install_dir)?;
    let context = UpdaterContext::new(config);

    let control = context.control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            control.cancel();
        }
    });

    let mut status = context.status.subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            tracing::debug!(
                "{} {:.1}% ({} / {} bytes)",
                snapshot.description,
                snapshot.progress * 100.0,
                snapshot.download_bytes,
                snapshot.download_total_bytes
            );
        }
    });

    let updater = AppUpdater::new(
        app_data,
        Arc::new(remote),
        Arc::new(transport),
        Arc::new(RsyncPatcher::default()),
        context,
    )
    .with_torrent_client(torrents);
    if cli.repair {
        updater.repair().await
    } else {
        updater.patch().await
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(report) => {
            match report.installed_version {
                Some(version) => println!("up to date at version {} ({})", version, report.strategy),
                None => println!("finished ({})", report.strategy),
            }
            ExitCode::SUCCESS
        }
        Err(PatcherError::Cancelled) => {
            tracing::warn!("patching cancelled");
            eprintln!("cancelled");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(err) => {
            tracing::error!("patching failed: {}", err);
            eprintln!("error: {}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
