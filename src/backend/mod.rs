//! Contracts of the collaborators the gateway sits on, plus local
//! implementations that make a single-node gateway usable on its own.

pub mod deploy;
pub mod git;
pub mod lfs;
pub mod locks;

use crate::deploy::{DeployActRequest, DeployInfo, DeployStatus, LogStreamHandle};
use crate::repo::{GitOperationContext, RepoRef};
use crate::Result;
use async_trait::async_trait;
use hubgate_lfs::{LockPage, LockRecord, ObjectResponse, Pointer};
use tokio::io::AsyncRead;

pub use deploy::LocalDeployPlane;
pub use git::LocalGitBackend;
pub use hubgate_git::ByteStream;
pub use lfs::LocalLfsBackend;
pub use locks::LocalLockBackend;

/// Request body handed to a backend as a plain byte reader
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

pub struct GitRpcRequest {
    pub body: BodyReader,
    /// Declared `Content-Length`, absent for chunked uploads
    pub content_length: Option<u64>,
}

#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Ref advertisement, including any `# service=` preamble
    async fn advertise_refs(&self, ctx: &GitOperationContext) -> Result<ByteStream>;

    async fn upload_pack(&self, ctx: &GitOperationContext, request: GitRpcRequest)
        -> Result<ByteStream>;

    async fn receive_pack(
        &self,
        ctx: &GitOperationContext,
        request: GitRpcRequest,
    ) -> Result<ByteStream>;
}

/// A batch request after repository and caller have been resolved
#[derive(Debug, Clone)]
pub struct LfsBatchRequest {
    pub repo: RepoRef,
    pub user: Option<String>,
    /// `Authorization` header of the batch call, echoed into upload actions
    pub authorization: Option<String>,
    pub operation: String,
    pub objects: Vec<Pointer>,
    pub transfers: Vec<String>,
}

#[async_trait]
pub trait LfsBackend: Send + Sync {
    /// One response per requested object, in request order. Problems with
    /// single objects are reported inside their response entry.
    async fn resolve_objects(
        &self,
        request: &LfsBatchRequest,
        is_upload: bool,
    ) -> Result<Vec<ObjectResponse>>;

    async fn upload(&self, repo: &RepoRef, pointer: &Pointer, body: BodyReader) -> Result<()>;

    /// Where the client can fetch the object; never the bytes themselves
    async fn download_url(
        &self,
        repo: &RepoRef,
        pointer: &Pointer,
        save_as: Option<&str>,
    ) -> Result<String>;

    /// Confirm the object is stored completely at the declared size
    async fn verify(&self, repo: &RepoRef, pointer: &Pointer) -> Result<()>;
}

#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Fails with `Error::LockConflict` carrying the current holder when the
    /// path is already locked.
    async fn create(&self, repo: &RepoRef, path: &str, owner: &str) -> Result<LockRecord>;

    /// Lock `id`, only if it belongs to `repo`
    async fn get(&self, repo: &RepoRef, id: u64) -> Result<Option<LockRecord>>;

    async fn find_by_path(&self, repo: &RepoRef, path: &str) -> Result<Option<LockRecord>>;

    async fn list(&self, repo: &RepoRef, cursor: usize, limit: usize) -> Result<LockPage>;

    /// Remove the lock. Without `force` only its owner may do so.
    async fn release(&self, repo: &RepoRef, id: u64, user: &str, force: bool)
        -> Result<LockRecord>;
}

#[async_trait]
pub trait DeployControl: Send + Sync {
    /// Look up the deploy named by `request`. A deploy that exists but
    /// belongs to another repository is reported as not found.
    async fn describe(&self, request: &DeployActRequest) -> Result<DeployInfo>;

    async fn status(&self, request: &DeployActRequest) -> Result<DeployStatus>;

    async fn instance_logs(&self, request: &DeployActRequest) -> Result<LogStreamHandle>;
}
