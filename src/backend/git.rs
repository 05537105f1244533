//! Bare repositories on local disk, served by the git binary

use super::{BodyReader, ByteStream, GitBackend, GitRpcRequest};
use crate::repo::{GitOperationContext, RepoRef};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, stream, StreamExt};
use hubgate_git::protocol::{is_protocol_v2, service_announcement};
use hubgate_git::GitProcess;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, info, warn};

pub const PUSH_TOO_LARGE: &str = "File too large. Please track it using Git LFS.";

pub struct LocalGitBackend {
    /// Repositories live at `<root>/<type>s/<namespace>/<name>.git`
    root: PathBuf,
    git: GitProcess,
    max_push_bytes: u64,
}

impl LocalGitBackend {
    pub fn new(root: impl Into<PathBuf>, max_push_bytes: u64) -> Self {
        Self {
            root: root.into(),
            git: GitProcess::new(),
            max_push_bytes,
        }
    }

    pub fn repo_path(&self, repo: &RepoRef) -> PathBuf {
        self.root.join(repo.git_path())
    }

    /// Create an empty bare repository
    pub async fn init_repo(&self, repo: &RepoRef) -> Result<PathBuf> {
        let path = self.repo_path(repo);
        self.git.init_bare(&path).await?;
        info!(%repo, path = %path.display(), "initialized repository");
        Ok(path)
    }

    fn run(&self, ctx: &GitOperationContext, request: GitRpcRequest) -> Result<ByteStream> {
        debug!(repo = %ctx.repo, service = %ctx.service, length = ?request.content_length, "git rpc");
        Ok(self.git.stateless_rpc(
            &self.repo_path(&ctx.repo),
            ctx.service,
            ctx.git_protocol.as_deref(),
            request.body,
        )?)
    }
}

#[async_trait]
impl GitBackend for LocalGitBackend {
    async fn advertise_refs(&self, ctx: &GitOperationContext) -> Result<ByteStream> {
        let refs = self
            .git
            .advertise_refs(
                &self.repo_path(&ctx.repo),
                ctx.service,
                ctx.git_protocol.as_deref(),
            )
            .await?;

        // v2 capability advertisements carry no service preamble
        let mut chunks = Vec::with_capacity(2);
        if !is_protocol_v2(ctx.git_protocol.as_deref()) {
            chunks.push(Ok(service_announcement(ctx.service)));
        }
        chunks.push(Ok(refs));
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn upload_pack(
        &self,
        ctx: &GitOperationContext,
        request: GitRpcRequest,
    ) -> Result<ByteStream> {
        self.run(ctx, request)
    }

    async fn receive_pack(
        &self,
        ctx: &GitOperationContext,
        request: GitRpcRequest,
    ) -> Result<ByteStream> {
        if request.content_length.is_some_and(|len| len > self.max_push_bytes) {
            return Err(Error::TooLarge(PUSH_TOO_LARGE.to_string()));
        }

        // Chunked bodies carry no length, so count what actually arrives
        let exceeded = Arc::new(AtomicBool::new(false));
        let body = PushBody::new(request.body, self.max_push_bytes, exceeded.clone());
        let mut output = self.run(
            ctx,
            GitRpcRequest {
                body: Box::new(body),
                content_length: request.content_length,
            },
        )?;

        // receive-pack answers only once it has consumed the pack
        let first = output.next().await;
        if exceeded.load(Ordering::SeqCst) {
            warn!(repo = %ctx.repo, limit = self.max_push_bytes, "push body over limit");
            return Err(Error::TooLarge(PUSH_TOO_LARGE.to_string()));
        }

        let trailer = stream::once(async move {
            exceeded
                .load(Ordering::SeqCst)
                .then(|| Err::<Bytes, _>(io::Error::other(PUSH_TOO_LARGE)))
        })
        .filter_map(future::ready);
        Ok(Box::pin(stream::iter(first).chain(output).chain(trailer)))
    }
}

/// Request body that fails once more than `remaining` bytes have been read
struct PushBody {
    inner: BodyReader,
    remaining: u64,
    exceeded: Arc<AtomicBool>,
}

impl PushBody {
    fn new(inner: BodyReader, limit: u64, exceeded: Arc<AtomicBool>) -> Self {
        Self {
            inner,
            remaining: limit,
            exceeded,
        }
    }
}

impl AsyncRead for PushBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let read = (buf.filled().len() - before) as u64;
        if read > this.remaining {
            this.exceeded.store(true, Ordering::SeqCst);
            return Poll::Ready(Err(io::Error::other(PUSH_TOO_LARGE)));
        }
        this.remaining -= read;
        Poll::Ready(Ok(()))
    }
}
