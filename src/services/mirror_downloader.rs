use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::PatcherConfig;
use crate::errors::{PatcherError, Result};
use crate::services::control::PatchControl;
use crate::services::download_sink::DownloadSink;

/// Receives `(downloaded_bytes, total_bytes)`; total is 0 when unknown.
pub type ProgressCallback = dyn Fn(u64, u64) + Send + Sync;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mirror {
    Http(String),
    Torrent(String),
}

impl Mirror {
    pub fn url(&self) -> &str {
        match self {
            Mirror::Http(url) | Mirror::Torrent(url) => url,
        }
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mirror::Http(url) => write!(f, "http:{}", url),
            Mirror::Torrent(url) => write!(f, "torrent:{}", url),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    NotFound,
    EmptyStream,
    CorruptData,
    Timeout,
    Other(String),
}

impl FailureReason {
    /// A missing resource will stay missing; everything else may heal.
    pub fn outcome(self) -> DownloadOutcome {
        match self {
            FailureReason::NotFound => DownloadOutcome::Permanent(self),
            other => DownloadOutcome::Retryable(other),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotFound => write!(f, "not found"),
            FailureReason::EmptyStream => write!(f, "empty stream"),
            FailureReason::CorruptData => write!(f, "corrupt data"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Other(message) => write!(f, "{}", message),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed,
    Retryable(FailureReason),
    Permanent(FailureReason),
}

/// One attempt against one mirror. `Err` is reserved for local failures
/// (sink I/O, cancellation) that no other mirror could fix.
#[async_trait]
pub trait MirrorTransport: Send + Sync {
    async fn fetch(
        &self,
        mirror: &Mirror,
        sink: &mut dyn DownloadSink,
        progress: &ProgressCallback,
        control: &PatchControl,
    ) -> Result<DownloadOutcome>;
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub budget: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: 100,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PatcherConfig) -> Self {
        Self {
            budget: config.retry_budget.max(1),
            backoff: config.retry_backoff(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadState {
    NotStarted,
    Downloading { mirror_index: usize },
    Retrying { delay: Duration },
    Completed,
    Failed,
}

/// Drives a sink to completion across a list of mirrors. Consumed by `download`,
/// so every instance runs at most once.
pub struct MirrorDownloader {
    mirrors: Vec<Mirror>,
    transport: Arc<dyn MirrorTransport>,
    policy: RetryPolicy,
    state: watch::Sender<DownloadState>,
}

impl MirrorDownloader {
    pub fn new(mirrors: Vec<Mirror>, transport: Arc<dyn MirrorTransport>, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(DownloadState::NotStarted);
        Self {
            mirrors,
            transport,
            policy,
            state,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DownloadState> {
        self.state.subscribe()
    }

    pub async fn download(
        self,
        sink: &mut dyn DownloadSink,
        progress: &ProgressCallback,
        control: &PatchControl,
    ) -> Result<()> {
        let Self {
            mut mirrors,
            transport,
            policy,
            state,
        } = self;

        control.check()?;
        if sink.total_length().is_some() && sink.is_complete() {
            state.send_replace(DownloadState::Completed);
            return Ok(());
        }

        let mut budget = policy.budget;
        while !mirrors.is_empty() && budget > 0 {
            let mut index = 0;
            while index < mirrors.len() && budget > 0 {
                control.wait_for_running().await?;
                budget -= 1;
                state.send_replace(DownloadState::Downloading {
                    mirror_index: index,
                });
                sink.begin_attempt()?;
                let mirror = &mirrors[index];
                tracing::info!(
                    "downloading from {} at offset {} [attempts left {}]",
                    mirror,
                    sink.resume_offset(),
                    budget
                );

                let mut outcome = transport.fetch(mirror, sink, progress, control).await?;
                if outcome == DownloadOutcome::Completed && !sink.is_complete() {
                    outcome = DownloadOutcome::Retryable(FailureReason::Other(
                        "transport reported completion for an incomplete resource".to_string(),
                    ));
                }

                match outcome {
                    DownloadOutcome::Completed => {
                        sink.finish()?;
                        state.send_replace(DownloadState::Completed);
                        tracing::info!("download completed from {}", mirror);
                        return Ok(());
                    }
                    DownloadOutcome::Permanent(reason) => {
                        tracing::warn!("dropping mirror {}: {}", mirror, reason);
                        mirrors.remove(index);
                    }
                    DownloadOutcome::Retryable(reason) => {
                        tracing::warn!(
                            "{} failed: {} (verified {} bytes)",
                            mirror,
                            reason,
                            sink.resume_offset()
                        );
                        index += 1;
                    }
                }
            }

            if mirrors.is_empty() || budget == 0 {
                break;
            }
            state.send_replace(DownloadState::Retrying {
                delay: policy.backoff,
            });
            tracing::info!("all mirrors failed this round, retrying in {:?}", policy.backoff);
            control.sleep(policy.backoff).await?;
        }

        state.send_replace(DownloadState::Failed);
        if budget == 0 {
            return Err(PatcherError::DownloadFailed(format!(
                "too many retries ({} attempts)",
                policy.budget
            )));
        }
        Err(PatcherError::DownloadFailed(
            "cannot download resource: no usable mirrors".to_string(),
        ))
    }
}
