//! Shared harness: a real gateway on 127.0.0.1:0 with stub collaborators
//! that count how often they are reached.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use hubgate::backend::{
    BodyReader, ByteStream, DeployControl, GitBackend, GitRpcRequest, LfsBackend,
    LfsBatchRequest, LocalLfsBackend, LocalLockBackend,
};
use hubgate::config::{AccessConfig, Grant, UserEntry};
use hubgate::deploy::{DeployActRequest, DeployInfo, DeployStatus, LogStreamHandle};
use hubgate::repo::{GitOperationContext, RepoRef};
use hubgate::{AppState, Error, GatewaySettings, HubServer, IdentityTable, PolicyAccessControl, Result};
use hubgate_lfs::{Action, ObjectResponse, Pointer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const PUSH_LIMIT: u64 = 64;

fn once(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(stream::once(async move { Ok(data) }))
}

async fn read_all(mut body: BodyReader) -> Vec<u8> {
    let mut buf = Vec::new();
    body.read_to_end(&mut buf).await.unwrap();
    buf
}

/// Advertises a fixed text and echoes RPC bodies back
#[derive(Default)]
pub struct StubGit {
    pub calls: AtomicUsize,
}

impl StubGit {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GitBackend for StubGit {
    async fn advertise_refs(&self, ctx: &GitOperationContext) -> Result<ByteStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(once(format!("refs of {} for {}", ctx.repo, ctx.service)))
    }

    async fn upload_pack(
        &self,
        _ctx: &GitOperationContext,
        request: GitRpcRequest,
    ) -> Result<ByteStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(once(read_all(request.body).await))
    }

    async fn receive_pack(
        &self,
        _ctx: &GitOperationContext,
        request: GitRpcRequest,
    ) -> Result<ByteStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.content_length.unwrap_or(0) > PUSH_LIMIT {
            return Err(Error::TooLarge(hubgate::backend::git::PUSH_TOO_LARGE.to_string()));
        }
        Ok(once(read_all(request.body).await))
    }
}

/// Resolves every object to a fixed storage URL and keeps uploads in memory
#[derive(Default)]
pub struct StubLfs {
    pub calls: AtomicUsize,
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl StubLfs {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LfsBackend for StubLfs {
    async fn resolve_objects(
        &self,
        request: &LfsBatchRequest,
        is_upload: bool,
    ) -> Result<Vec<ObjectResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let action = if is_upload { "upload" } else { "download" };
        Ok(request
            .objects
            .iter()
            .map(|p| {
                let href = format!("http://storage.test/{}", p.oid);
                ObjectResponse::with_action(p, action, Action::new(href))
            })
            .collect())
    }

    async fn upload(&self, _repo: &RepoRef, pointer: &Pointer, body: BodyReader) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let data = read_all(body).await;
        self.uploads.lock().unwrap().push((pointer.oid.clone(), data));
        Ok(())
    }

    async fn download_url(
        &self,
        _repo: &RepoRef,
        pointer: &Pointer,
        save_as: Option<&str>,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "http://storage.test/{}?save_as={}",
            pointer.oid,
            save_as.unwrap_or_default()
        ))
    }

    async fn verify(&self, _repo: &RepoRef, pointer: &Pointer) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let uploads = self.uploads.lock().unwrap();
        if uploads.iter().any(|(oid, _)| *oid == pointer.oid) {
            Ok(())
        } else {
            Err(Error::not_found("Object does not exist"))
        }
    }
}

/// Knows deploy 1 of every alice repository; owner alice
#[derive(Default)]
pub struct StubDeploy {
    pub status_calls: AtomicUsize,
    /// Handed out once by `instance_logs`; `None` means no live log
    pub logs: Mutex<Option<mpsc::Receiver<Bytes>>>,
}

impl StubDeploy {
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeployControl for StubDeploy {
    async fn describe(&self, request: &DeployActRequest) -> Result<DeployInfo> {
        if request.deploy_id != 1 || request.repo.namespace != "alice" {
            return Err(Error::not_found("invalid deploy found"));
        }
        Ok(DeployInfo {
            id: 1,
            repo: request.repo.clone(),
            deploy_type: request.deploy_type,
            owner: "alice".to_string(),
        })
    }

    async fn status(&self, _request: &DeployActRequest) -> Result<DeployStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(DeployStatus::from_code(23))
    }

    async fn instance_logs(&self, _request: &DeployActRequest) -> Result<LogStreamHandle> {
        Ok(match self.logs.lock().unwrap().take() {
            Some(rx) => LogStreamHandle::live(rx),
            None => LogStreamHandle::empty(),
        })
    }
}

/// alice, bob, carol, dave and root, each with token `<name>-token`.
/// root is admin, models/alice/secret is private with a read grant for bob,
/// carol may write models/alice/demo.
pub fn access_config() -> AccessConfig {
    AccessConfig {
        admins: vec!["root".into()],
        private_repos: vec!["models/alice/secret".into()],
        users: ["alice", "bob", "carol", "dave", "root"]
            .iter()
            .map(|name| UserEntry {
                username: name.to_string(),
                token: format!("{}-token", name),
            })
            .collect(),
        grants: vec![
            Grant { repo: "models/alice/secret".into(), user: "bob".into(), write: false },
            Grant { repo: "models/alice/demo".into(), user: "carol".into(), write: true },
        ],
    }
}

pub struct Harness {
    pub git: Arc<dyn GitBackend>,
    pub lfs: Arc<dyn LfsBackend>,
    pub locks: Arc<LocalLockBackend>,
    pub deploy: Arc<dyn DeployControl>,
    pub settings: GatewaySettings,
    pub storage: Option<Arc<LocalLfsBackend>>,
}

impl Harness {
    pub fn new(git: Arc<dyn GitBackend>, lfs: Arc<dyn LfsBackend>, deploy: Arc<dyn DeployControl>) -> Self {
        Self {
            git,
            lfs,
            locks: Arc::new(LocalLockBackend::in_memory()),
            deploy,
            settings: GatewaySettings {
                realm: "hubgate-git".to_string(),
                status_interval: Duration::from_millis(50),
                heartbeat: Duration::from_millis(200),
            },
            storage: None,
        }
    }

    pub fn stubs() -> (Self, Arc<StubGit>, Arc<StubLfs>, Arc<StubDeploy>) {
        let git = Arc::new(StubGit::default());
        let lfs = Arc::new(StubLfs::default());
        let deploy = Arc::new(StubDeploy::default());
        let harness = Self::new(git.clone(), lfs.clone(), deploy.clone());
        (harness, git, lfs, deploy)
    }

    /// Start serving; the token shuts the server down
    pub async fn start(self) -> (SocketAddr, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (addr, self.serve(listener))
    }

    /// Serve on a listener bound by the test, for backends that need to
    /// know the address up front
    pub fn serve(self, listener: TcpListener) -> CancellationToken {
        let access = access_config();
        let state = AppState {
            git: self.git,
            lfs: self.lfs,
            locks: self.locks,
            deploy: self.deploy,
            access: Arc::new(PolicyAccessControl::from_config(&access)),
            identities: Arc::new(IdentityTable::from_config(&access)),
            settings: Arc::new(self.settings),
            shutdown: CancellationToken::new(),
        };
        let shutdown = state.shutdown.clone();
        let mut server = HubServer::new(state, "127.0.0.1:0".to_string());
        if let Some(lfs) = self.storage {
            server = server.with_storage(lfs);
        }

        tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        });
        shutdown
    }
}

/// Create a reqwest client with reasonable timeouts
pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Client without an overall timeout, for event streams
pub fn stream_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

pub fn as_user(request: reqwest::RequestBuilder, user: &str) -> reqwest::RequestBuilder {
    request.basic_auth(user, Some(format!("{}-token", user)))
}
