use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::errors::{PatcherError, Result};

const RESPONSE_TERMINATOR: &[u8] = b"#=end";

/// Command channel to a torrent engine. Commands are plain text lines; replies are
/// JSON documents.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    async fn execute(&self, command: &str) -> Result<serde_json::Value>;
}

struct ClientPipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Drives an external `torrent-client` executable over stdin/stdout. Each reply is
/// terminated by `#=end`.
pub struct ProcessTorrentClient {
    pipes: Mutex<ClientPipes>,
    _child: Child,
}

impl ProcessTorrentClient {
    pub fn spawn(program: &Path, args: &[&str]) -> Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = program.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            command.env("LD_LIBRARY_PATH", dir);
            command.env("DYLD_LIBRARY_PATH", dir);
        }
        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PatcherError::Config("torrent client stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PatcherError::Config("torrent client stdout unavailable".to_string()))?;
        tracing::info!("started torrent client {}", program.display());
        Ok(Self {
            pipes: Mutex::new(ClientPipes {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            _child: child,
        })
    }
}

#[async_trait]
impl TorrentClient for ProcessTorrentClient {
    async fn execute(&self, command: &str) -> Result<serde_json::Value> {
        let mut pipes = self.pipes.lock().await;
        pipes.stdin.write_all(command.as_bytes()).await?;
        pipes.stdin.write_all(b"\n").await?;
        pipes.stdin.flush().await?;

        let mut reply = Vec::new();
        while !reply.ends_with(RESPONSE_TERMINATOR) {
            let available = pipes.stdout.fill_buf().await?;
            if available.is_empty() {
                return Err(PatcherError::DownloadFailed(
                    "torrent client process has exited".to_string(),
                ));
            }
            let byte = available[0];
            pipes.stdout.consume(1);
            reply.push(byte);
        }
        reply.truncate(reply.len() - RESPONSE_TERMINATOR.len());
        Ok(serde_json::from_slice(&reply)?)
    }
}

/// Escapes a path the way the torrent client's command parser expects.
pub fn quote_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").replace(' ', "\\ ")
}
