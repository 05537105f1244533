//! HTTP surface of the gateway
//!
//! One router serves the Git smart HTTP endpoints, the LFS batch, transfer
//! and locking API, the deploy SSE streams and the signed LFS storage links.
//! Collaborators are held as trait objects in [`AppState`] so the same
//! routes run against the local backends or test doubles.

mod auth;
mod deploy;
mod git;
mod lfs;
mod locks;
mod respond;
mod storage;

use crate::access::{AccessControl, IdentityTable, PolicyAccessControl};
use crate::backend::{
    DeployControl, GitBackend, LfsBackend, LocalDeployPlane, LocalGitBackend, LocalLfsBackend,
    LocalLockBackend, LockBackend,
};
use crate::config::{ensure_signing_key, Config};
use crate::repo::RepoRef;
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use hubgate_lfs::UrlSigner;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use auth::CurrentUser;
pub use deploy::{log_events, status_events, StreamEvent};

/// Knobs of the protocol surfaces that are not backend concerns
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Realm of `WWW-Authenticate: Basic` challenges
    pub realm: String,
    pub status_interval: Duration,
    pub heartbeat: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            realm: "hubgate-git".to_string(),
            status_interval: Duration::from_secs(5),
            heartbeat: Duration::from_secs(30),
        }
    }
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            realm: config.server.realm.clone(),
            status_interval: config.deploy.status_interval(),
            heartbeat: config.deploy.heartbeat(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub git: Arc<dyn GitBackend>,
    pub lfs: Arc<dyn LfsBackend>,
    pub locks: Arc<dyn LockBackend>,
    pub deploy: Arc<dyn DeployControl>,
    pub access: Arc<dyn AccessControl>,
    pub identities: Arc<IdentityTable>,
    pub settings: Arc<GatewaySettings>,
    /// Cancelled on shutdown; every open event stream watches it
    pub shutdown: CancellationToken,
}

/// `/{repo_type}/{namespace}/{name}` prefix shared by the git and LFS routes
#[derive(Debug, Deserialize)]
pub(crate) struct RepoPath {
    repo_type: String,
    namespace: String,
    name: String,
}

impl RepoPath {
    pub(crate) fn repo(&self) -> crate::Result<RepoRef> {
        RepoRef::from_segments(&self.repo_type, &self.namespace, &self.name)
    }
}

pub struct HubServer {
    state: AppState,
    storage: Option<Arc<LocalLfsBackend>>,
    addr: String,
}

impl HubServer {
    pub fn new(state: AppState, addr: String) -> Self {
        Self {
            state,
            storage: None,
            addr,
        }
    }

    /// Serve signed object links out of a local LFS store
    pub fn with_storage(mut self, lfs: Arc<LocalLfsBackend>) -> Self {
        self.storage = Some(lfs);
        self
    }

    /// Wire the local backends up from config
    pub async fn from_config(config: &Config) -> Result<Self> {
        let data_dir = PathBuf::from(&config.storage.data_dir);
        let lfs_root = data_dir.join("lfs");

        let git = LocalGitBackend::new(data_dir.join("repos"), config.storage.max_push_bytes);
        let signing_key = ensure_signing_key(&config.lfs)?;
        let lfs = Arc::new(LocalLfsBackend::new(
            &lfs_root,
            UrlSigner::new(signing_key),
            &config.server.public_domain,
            Duration::from_secs(config.lfs.link_expiry_secs),
            config.lfs.max_object_size,
        ));
        let locks = LocalLockBackend::open(lfs_root.join("locks.json"))
            .context("Failed to load lfs locks")?;
        let deploy = LocalDeployPlane::from_config(&config.deploy.units)
            .await
            .context("Invalid deploy unit in config")?;

        let state = AppState {
            git: Arc::new(git),
            lfs: lfs.clone(),
            locks: Arc::new(locks),
            deploy: Arc::new(deploy),
            access: Arc::new(PolicyAccessControl::from_config(&config.access)),
            identities: Arc::new(IdentityTable::from_config(&config.access)),
            settings: Arc::new(GatewaySettings::from_config(config)),
            shutdown: CancellationToken::new(),
        };
        Ok(Self::new(state, config.server.bind_address.clone()).with_storage(lfs))
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn router(&self) -> Router {
        let mut app = Router::new()
            // Git smart HTTP
            .route("/:repo_type/:namespace/:name/info/refs", get(git::info_refs))
            .route("/:repo_type/:namespace/:name/git-upload-pack", post(git::service_rpc))
            .route("/:repo_type/:namespace/:name/git-receive-pack", post(git::service_rpc))
            // LFS batch and transfer
            .route("/:repo_type/:namespace/:name/info/lfs/objects/batch", post(lfs::batch))
            .route(
                "/:repo_type/:namespace/:name/info/lfs/objects/:oid/:size",
                put(lfs::upload).get(lfs::download),
            )
            .route("/:repo_type/:namespace/:name/info/lfs/verify", post(lfs::verify))
            .route("/hf/:namespace/:name/info/lfs/objects/batch", post(lfs::hf_batch))
            // LFS locks
            .route(
                "/:repo_type/:namespace/:name/info/lfs/locks",
                get(locks::list_locks).post(locks::create_lock),
            )
            .route("/:repo_type/:namespace/:name/info/lfs/locks/verify", post(locks::verify_locks))
            .route(
                "/:repo_type/:namespace/:name/info/lfs/locks/:lid/unlock",
                post(locks::unlock),
            )
            // Deploy streams
            .route(
                "/api/v1/models/:namespace/:name/run/:id/status",
                get(deploy::status::<deploy::ModelRun>),
            )
            .route(
                "/api/v1/models/:namespace/:name/run/:id/logs/:instance",
                get(deploy::logs::<deploy::ModelRun>),
            )
            .route(
                "/api/v1/spaces/:namespace/:name/run/:id/status",
                get(deploy::status::<deploy::SpaceRun>),
            )
            .route(
                "/api/v1/spaces/:namespace/:name/run/:id/logs/:instance",
                get(deploy::logs::<deploy::SpaceRun>),
            )
            .route(
                "/api/v1/models/:namespace/:name/finetune/:id/status",
                get(deploy::status::<deploy::Finetune>),
            )
            .route(
                "/api/v1/models/:namespace/:name/finetune/:id/logs/:instance",
                get(deploy::logs::<deploy::Finetune>),
            )
            .route(
                "/api/v1/models/:namespace/:name/serverless/:id/status",
                get(deploy::status::<deploy::Serverless>),
            )
            .route(
                "/api/v1/models/:namespace/:name/serverless/:id/logs/:instance",
                get(deploy::logs::<deploy::Serverless>),
            )
            .route(
                "/api/v1/models/:namespace/:name/serverless/:id/versions/:commit_id/logs",
                get(deploy::logs::<deploy::Serverless>),
            )
            .with_state(self.state.clone());

        if let Some(lfs) = &self.storage {
            let storage_routes = Router::new()
                .route("/_storage/lfs/:oid", get(storage::fetch_object))
                .with_state(lfs.clone());
            app = app.merge(storage_routes);
        }

        // Pack and object bodies are streamed, never buffered whole
        app.layer(DefaultBodyLimit::disable())
    }

    /// Serve on an already bound listener until the shutdown token fires
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let shutdown = self.state.shutdown.clone();
        let app = self.router();
        info!(addr = %listener.local_addr()?, "hubgate listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        Ok(())
    }

    /// Bind the configured address and serve until ctrl-c
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.addr))?;
        let shutdown = self.state.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
                shutdown.cancel();
            }
        });
        self.serve(listener).await
    }
}
