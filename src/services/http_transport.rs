use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;

use crate::config::PatcherConfig;
use crate::errors::{PatcherError, Result};
use crate::services::chunked_writer::WriteStatus;
use crate::services::control::PatchControl;
use crate::services::download_sink::DownloadSink;
use crate::services::mirror_downloader::{
    DownloadOutcome, FailureReason, Mirror, MirrorTransport, ProgressCallback,
};
use crate::utils::byte_range::ByteRange;

/// Streams a resource over HTTP, resuming with a `Range` request.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &PatcherConfig) -> Result<Self> {
        Ok(Self::new(config.build_http_client()?))
    }
}

fn classify_error(url: &str, err: &reqwest::Error) -> DownloadOutcome {
    if err.is_timeout() {
        return DownloadOutcome::Retryable(FailureReason::Timeout);
    }
    DownloadOutcome::Retryable(FailureReason::Other(format!("{} -> {}", url, err)))
}

/// Start offset announced by a `Content-Range: bytes start-end/total` header.
fn content_range_start(response: &reqwest::Response) -> Option<u64> {
    let value = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
    let range = value.trim().strip_prefix("bytes")?.trim();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

#[async_trait]
impl MirrorTransport for HttpTransport {
    async fn fetch(
        &self,
        mirror: &Mirror,
        sink: &mut dyn DownloadSink,
        progress: &ProgressCallback,
        control: &PatchControl,
    ) -> Result<DownloadOutcome> {
        let url = match mirror {
            Mirror::Http(url) => url,
            Mirror::Torrent(url) => {
                tracing::warn!("http transport cannot serve torrent mirror {}", url);
                return Ok(DownloadOutcome::Retryable(FailureReason::Other(
                    "torrent mirror needs a torrent client".to_string(),
                )));
            }
        };

        let offset = sink.resume_offset();
        let range_end = sink.range_end();
        let total = sink.total_length().unwrap_or(0);
        let mut request = self.client.get(url);
        if offset > 0 || range_end.is_some() {
            request = request.header(RANGE, ByteRange::new(offset, range_end)?.to_string());
        }

        let response = tokio::select! {
            _ = control.cancelled() => return Err(PatcherError::Cancelled),
            response = request.send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => return Ok(classify_error(url, &err)),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(FailureReason::NotFound.outcome());
        }
        let mut skip = match status {
            StatusCode::OK => offset,
            StatusCode::PARTIAL_CONTENT => {
                if let Some(start) = content_range_start(&response) {
                    if start != offset {
                        return Ok(DownloadOutcome::Retryable(FailureReason::Other(format!(
                            "{} -> range starts at {} instead of {}",
                            url, start, offset
                        ))));
                    }
                }
                0
            }
            other => {
                return Ok(DownloadOutcome::Retryable(FailureReason::Other(format!(
                    "{} -> HTTP {}",
                    url, other
                ))));
            }
        };
        if skip > 0 {
            tracing::debug!("{} ignored the range request, skipping {} bytes", url, skip);
        }

        let mut stream = response.bytes_stream();
        let mut received = 0u64;
        loop {
            let next = tokio::select! {
                _ = control.cancelled() => return Err(PatcherError::Cancelled),
                next = stream.next() => next,
            };
            let Some(next) = next else {
                break;
            };
            control.wait_for_running().await?;
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(err) => return Ok(classify_error(url, &err)),
            };
            received += bytes.len() as u64;

            let mut data = &bytes[..];
            if skip > 0 {
                let dropped = (skip as usize).min(data.len());
                data = &data[dropped..];
                skip -= dropped as u64;
            }
            if let Some(total) = sink.total_length() {
                let room = total.saturating_sub(sink.saved_length()) as usize;
                if data.len() > room {
                    data = &data[..room];
                }
            }
            if data.is_empty() {
                continue;
            }

            match sink.write(data)? {
                WriteStatus::Rejected => {
                    return Ok(DownloadOutcome::Retryable(FailureReason::CorruptData));
                }
                WriteStatus::Completed => {
                    progress(sink.saved_length(), total.max(sink.saved_length()));
                    return Ok(DownloadOutcome::Completed);
                }
                WriteStatus::Accepted => progress(sink.saved_length(), total),
            }
        }

        if sink.end_of_stream() {
            progress(sink.saved_length(), total.max(sink.saved_length()));
            return Ok(DownloadOutcome::Completed);
        }
        if received == 0 {
            return Ok(FailureReason::EmptyStream.outcome());
        }
        Ok(DownloadOutcome::Retryable(FailureReason::Other(format!(
            "{} -> stream ended at {} of {} bytes",
            url,
            sink.saved_length(),
            total
        ))))
    }
}
