//! Git smart HTTP routes
//!
//!   - GET  /{type}/{ns}/{name}/info/refs?service=git-upload-pack|git-receive-pack
//!   - POST /{type}/{ns}/{name}/git-upload-pack
//!   - POST /{type}/{ns}/{name}/git-receive-pack

use super::auth::{challenge, CurrentUser};
use super::respond::{log_failure, status_of};
use super::{AppState, RepoPath};
use crate::access::Permission;
use crate::backend::{BodyReader, ByteStream, GitRpcRequest};
use crate::negotiate::{git_protocol, gzip_decode, gzip_encode, is_gzip_body, response_encoding, Encoding};
use crate::repo::GitOperationContext;
use crate::{Error, Result};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
};
use futures::TryStreamExt;
use hubgate_git::Service;
use serde::Deserialize;
use serde_json::json;
use std::io;
use tokio_util::io::StreamReader;

const NO_PERMISSION: &str = "You do not have permission to access this repository.";

#[derive(Debug, Deserialize)]
pub struct InfoRefsQuery {
    #[serde(default)]
    service: String,
}

/// GET /{type}/{ns}/{name}/info/refs
pub async fn info_refs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<RepoPath>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Response {
    let result = advertise(&state, user, &path, &query.service, &headers).await;
    result.unwrap_or_else(|err| git_error(err, &state.settings.realm))
}

async fn advertise(
    state: &AppState,
    user: Option<String>,
    path: &RepoPath,
    rpc: &str,
    headers: &HeaderMap,
) -> Result<Response> {
    let ctx = GitOperationContext::new(path.repo()?, rpc, git_protocol(headers), user)?;
    authorize(state, &ctx).await?;

    let refs = state.git.advertise_refs(&ctx).await?;
    stream_response(
        ctx.service.advertisement_content_type(),
        refs,
        response_encoding(headers),
    )
}

/// POST /{type}/{ns}/{name}/git-upload-pack and git-receive-pack.
/// The RPC verb is the last path segment.
pub async fn service_rpc(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<RepoPath>,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let rpc = uri.path().rsplit('/').next().unwrap_or_default();
    let result = run_rpc(&state, user, &path, rpc, &headers, body).await;
    result.unwrap_or_else(|err| git_error(err, &state.settings.realm))
}

async fn run_rpc(
    state: &AppState,
    user: Option<String>,
    path: &RepoPath,
    rpc: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response> {
    let ctx = GitOperationContext::new(path.repo()?, rpc, git_protocol(headers), user)?;
    authorize(state, &ctx).await?;

    let request = GitRpcRequest {
        body: request_reader(headers, body),
        content_length: headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()),
    };
    let output = match ctx.service {
        Service::UploadPack => state.git.upload_pack(&ctx, request).await?,
        Service::ReceivePack => state.git.receive_pack(&ctx, request).await?,
    };
    // Results stream while git is still running, so only advertisements are compressed
    stream_response(ctx.service.result_content_type(), output, Encoding::Identity)
}

async fn authorize(state: &AppState, ctx: &GitOperationContext) -> Result<()> {
    let permission = if ctx.service.is_write() {
        Permission::Write
    } else {
        Permission::Read
    };
    state
        .access
        .check_repo(&ctx.repo, ctx.user.as_deref(), permission)
        .await?
        .require(NO_PERMISSION)
}

/// Request body as a reader, gunzipped when the client compressed it
fn request_reader(headers: &HeaderMap, body: Body) -> BodyReader {
    let raw = body.into_data_stream().map_err(io::Error::other);
    let stream: ByteStream = if is_gzip_body(headers) {
        Box::pin(gzip_decode(raw))
    } else {
        Box::pin(raw)
    };
    Box::new(StreamReader::new(stream))
}

fn stream_response(content_type: String, body: ByteStream, encoding: Encoding) -> Result<Response> {
    let content_type =
        HeaderValue::try_from(content_type).map_err(|e| Error::Internal(e.into()))?;
    let mut response = match encoding {
        Encoding::Gzip => Body::from_stream(gzip_encode(body)).into_response(),
        Encoding::Identity => Body::from_stream(body).into_response(),
    };
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if encoding == Encoding::Gzip {
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }
    Ok(response)
}

/// Git clients only understand an empty-body challenge on 401 and print the
/// `error` field of JSON bodies.
fn git_error(err: Error, realm: &str) -> Response {
    let status = status_of(&err);
    log_failure(&err, status);
    match err {
        Error::Unauthorized => challenge(realm),
        Error::Forbidden(message) => {
            (StatusCode::FORBIDDEN, Json(json!({ "error": message }))).into_response()
        }
        Error::TooLarge(message) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
        Error::NotFound(message) => {
            (StatusCode::NOT_FOUND, Json(json!({ "msg": message }))).into_response()
        }
        Error::InvalidRequest { message, .. } => {
            (StatusCode::BAD_REQUEST, Json(json!({ "msg": message }))).into_response()
        }
        Error::LockConflict(_)
        | Error::NotLockOwner(_)
        | Error::LogUnavailable
        | Error::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "msg": "Internal Server Error" })),
        )
            .into_response(),
    }
}
