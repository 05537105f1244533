//! Drives `git upload-pack` / `git receive-pack` in stateless-RPC mode
//!
//! Request bodies are copied into the child's stdin by a background task
//! while stdout is handed back as a byte stream, so packs of any size move
//! through a fixed-size buffer instead of being collected in memory.

use crate::{Error, Result, Service};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Copy buffer for pack data in both directions
pub const PACK_BUFFER_SIZE: usize = 64 * 1024;

pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

#[derive(Debug, Clone)]
pub struct GitProcess {
    git_bin: PathBuf,
}

impl Default for GitProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl GitProcess {
    pub fn new() -> Self {
        Self {
            git_bin: PathBuf::from("git"),
        }
    }

    fn command(&self, service: Service, repo: &Path, git_protocol: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.git_bin);
        cmd.arg(service.subcommand()).arg("--stateless-rpc");
        if let Some(protocol) = git_protocol {
            cmd.env("GIT_PROTOCOL", protocol);
        }
        cmd.kill_on_drop(true);
        cmd.current_dir(repo);
        cmd
    }

    /// Raw ref advertisement (without the `# service=` preamble).
    pub async fn advertise_refs(
        &self,
        repo: &Path,
        service: Service,
        git_protocol: Option<&str>,
    ) -> Result<Bytes> {
        ensure_repo(repo)?;
        let output = self
            .command(service, repo, git_protocol)
            .arg("--advertise-refs")
            .arg(".")
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::ProcessFailed {
                service: service.as_str(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(Bytes::from(output.stdout))
    }

    /// Run one stateless RPC round, streaming `input` into the child and
    /// returning its stdout. Dropping the returned stream kills the child.
    pub fn stateless_rpc<R>(
        &self,
        repo: &Path,
        service: Service,
        git_protocol: Option<&str>,
        input: R,
    ) -> Result<ByteStream>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        ensure_repo(repo)?;
        let mut child = self
            .command(service, repo, git_protocol)
            .arg(".")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ProtocolError("git stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ProtocolError("git stdout unavailable".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let name = service.as_str();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(service = name, "git: {}", line);
                }
            });
        }

        let feeder = tokio::spawn(async move {
            let mut reader = BufReader::with_capacity(PACK_BUFFER_SIZE, input);
            let mut stdin = stdin;
            let copied = tokio::io::copy_buf(&mut reader, &mut stdin).await?;
            stdin.shutdown().await?;
            Ok::<u64, std::io::Error>(copied)
        });

        let state = RpcState {
            stdout: ReaderStream::with_capacity(stdout, PACK_BUFFER_SIZE),
            child,
            feeder,
            service,
        };
        Ok(Box::pin(stream::unfold(Some(state), next_chunk)))
    }

    /// `git init --bare <path>`
    pub async fn init_bare(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        let output = Command::new(&self.git_bin)
            .arg("init")
            .arg("--bare")
            .arg("--quiet")
            .arg(path)
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::ProcessFailed {
                service: "init",
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

struct RpcState {
    stdout: ReaderStream<ChildStdout>,
    child: Child,
    feeder: JoinHandle<std::io::Result<u64>>,
    service: Service,
}

async fn next_chunk(
    state: Option<RpcState>,
) -> Option<(std::io::Result<Bytes>, Option<RpcState>)> {
    let mut state = state?;
    if let Some(chunk) = state.stdout.next().await {
        return Some((chunk, Some(state)));
    }

    match (&mut state.feeder).await {
        Ok(Ok(bytes)) => debug!(service = %state.service, bytes, "request body delivered"),
        // git may stop reading early, e.g. when it rejects the request
        Ok(Err(e)) => debug!(service = %state.service, "request body copy ended: {}", e),
        Err(e) => warn!(service = %state.service, "request body task failed: {}", e),
    }
    match state.child.wait().await {
        Ok(status) if status.success() => None,
        Ok(status) => {
            warn!(service = %state.service, %status, "git exited unsuccessfully");
            None
        }
        Err(e) => Some((Err(e), None)),
    }
}

fn ensure_repo(repo: &Path) -> Result<()> {
    if repo.is_dir() {
        Ok(())
    } else {
        Err(Error::RepoNotFound(repo.display().to_string()))
    }
}
