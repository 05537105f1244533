//! Deploy status and log streams over server-sent events
//!
//! Both streams are plain `Stream`s of [`StreamEvent`] built with `unfold`,
//! so they only wake on a tick, a log chunk or cancellation. Dropping the
//! response body (client gone) drops the stream and whatever backend call
//! it was waiting on.

use super::auth::CurrentUser;
use super::AppState;
use crate::backend::DeployControl;
use crate::deploy::{DeployActRequest, DeployStatus, DeployType, SinceWindow};
use crate::repo::{RepoRef, RepoType};
use crate::{Error, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const NO_ACCESS: &str = "You do not have permission to access this deploy.";

/// Repository and deploy kind a family of routes serves
pub trait DeployRoute {
    const REPO_TYPE: RepoType;
    const DEPLOY_TYPE: DeployType;
}

/// `/api/v1/models/{ns}/{name}/run/{id}`
pub struct ModelRun;
/// `/api/v1/spaces/{ns}/{name}/run/{id}`
pub struct SpaceRun;
pub struct Finetune;
pub struct Serverless;

impl DeployRoute for ModelRun {
    const REPO_TYPE: RepoType = RepoType::Model;
    const DEPLOY_TYPE: DeployType = DeployType::Inference;
}

impl DeployRoute for SpaceRun {
    const REPO_TYPE: RepoType = RepoType::Space;
    const DEPLOY_TYPE: DeployType = DeployType::Space;
}

impl DeployRoute for Finetune {
    const REPO_TYPE: RepoType = RepoType::Model;
    const DEPLOY_TYPE: DeployType = DeployType::Finetune;
}

impl DeployRoute for Serverless {
    const REPO_TYPE: RepoType = RepoType::Model;
    const DEPLOY_TYPE: DeployType = DeployType::Serverless;
}

#[derive(Debug, Deserialize)]
pub struct DeployPath {
    namespace: String,
    name: String,
    id: String,
    #[serde(default)]
    instance: Option<String>,
    #[serde(default)]
    commit_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    since: Option<String>,
    /// Instance of the versioned serverless log route
    instance_name: Option<String>,
}

fn act_request<R: DeployRoute>(
    path: DeployPath,
    query: LogQuery,
    user: Option<String>,
) -> Result<DeployActRequest> {
    let repo = RepoRef::new(R::REPO_TYPE, &path.namespace, &path.name)?;
    let deploy_id = path
        .id
        .parse::<i64>()
        .map_err(|_| Error::invalid("id", format!("invalid deploy id: {}", path.id)))?;
    let since = query
        .since
        .as_deref()
        .filter(|since| !since.is_empty())
        .map(SinceWindow::parse)
        .transpose()?;
    Ok(DeployActRequest {
        repo,
        user,
        deploy_id,
        deploy_type: R::DEPLOY_TYPE,
        instance: path.instance.or(query.instance_name),
        since,
        commit_id: path.commit_id,
    })
}

/// Checked once per stream, never per tick
async fn authorize(state: &AppState, request: &DeployActRequest) -> Result<()> {
    let info = state.deploy.describe(request).await?;
    state
        .access
        .check_deploy(request.user.as_deref(), &info)
        .await?
        .require(NO_ACCESS)
}

/// GET .../{id}/status
pub async fn status<R: DeployRoute>(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<DeployPath>,
) -> Result<Response> {
    let request = act_request::<R>(path, LogQuery::default(), user)?;
    authorize(&state, &request).await?;
    debug!(repo = %request.repo, id = request.deploy_id, "deploy status stream opened");

    let events = status_events(
        state.deploy.clone(),
        request,
        state.settings.status_interval,
        state.shutdown.clone(),
    );
    Ok(sse_response(events))
}

/// GET .../{id}/logs/{instance}?since= and the versioned serverless route
pub async fn logs<R: DeployRoute>(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<DeployPath>,
    Query(query): Query<LogQuery>,
) -> Result<Response> {
    let request = act_request::<R>(path, query, user)?;
    authorize(&state, &request).await?;

    let handle = state.deploy.instance_logs(&request).await?;
    let run_log = handle.run_log.ok_or(Error::LogUnavailable)?;
    debug!(repo = %request.repo, id = request.deploy_id, instance = ?request.instance, "deploy log stream opened");

    Ok(sse_response(log_events(
        run_log,
        state.settings.heartbeat,
        state.shutdown.clone(),
    )))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Status(DeployStatus),
    /// Status poll failed; the stream carries on
    Error(String),
    Container(Bytes),
    Heartbeat,
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Status(_) => "status",
            StreamEvent::Error(_) => "error",
            StreamEvent::Container(_) => "Container",
            StreamEvent::Heartbeat => "Heartbeat",
        }
    }

    fn into_event(self) -> Event {
        let event = Event::default().event(self.name());
        match self {
            StreamEvent::Status(status) => match serde_json::to_string(&status) {
                Ok(json) => event.data(json),
                Err(_) => event.data(sse_data(status.status.as_bytes())),
            },
            StreamEvent::Error(message) => event.data(sse_data(message.as_bytes())),
            StreamEvent::Container(chunk) => event.data(sse_data(&chunk)),
            StreamEvent::Heartbeat => event.data("keep-alive"),
        }
    }
}

/// SSE data cannot carry carriage returns, and a trailing newline would
/// only add an empty `data:` line
fn sse_data(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim_end_matches('\n')
        .to_string()
}

/// Poll the deploy's status every `period` until `shutdown` fires. The
/// first poll happens one period after opening.
pub fn status_events(
    deploy: Arc<dyn DeployControl>,
    request: DeployActRequest,
    period: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    let ticker = interval_at(Instant::now() + period, period);
    stream::unfold(
        (deploy, request, ticker, shutdown),
        |(deploy, request, mut ticker, shutdown)| async move {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return None,
                event = async {
                    ticker.tick().await;
                    match deploy.status(&request).await {
                        Ok(status) => StreamEvent::Status(status),
                        Err(err) => {
                            debug!(id = request.deploy_id, error = %err, "deploy status poll failed");
                            StreamEvent::Error(err.to_string())
                        }
                    }
                } => event,
            };
            Some((event, (deploy, request, ticker, shutdown)))
        },
    )
}

/// Forward log chunks in arrival order, with a heartbeat whenever
/// `heartbeat` passes. Ends when the channel closes or `shutdown` fires.
pub fn log_events(
    run_log: mpsc::Receiver<Bytes>,
    heartbeat: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    let ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    stream::unfold(
        (run_log, ticker, shutdown),
        |(mut run_log, mut ticker, shutdown)| async move {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                chunk = run_log.recv() => match chunk {
                    Some(chunk) => StreamEvent::Container(chunk),
                    None => return None,
                },
                _ = ticker.tick() => StreamEvent::Heartbeat,
            };
            Some((event, (run_log, ticker, shutdown)))
        },
    )
}

fn sse_response<S>(events: S) -> Response
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let mut response =
        Sse::new(events.map(|event| Ok::<_, Infallible>(event.into_event()))).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    response
}
