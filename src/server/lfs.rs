//! Git LFS batch API and basic transfer endpoints
//!
//! Every response carries the LFS media type and errors are
//! `{"message": ...}`, which is what `git lfs` prints to the user.

use super::auth::{add_challenge, authorization, CurrentUser};
use super::respond::{log_failure, status_of};
use super::{AppState, RepoPath};
use crate::access::{AccessDecision, Permission};
use crate::backend::LfsBatchRequest;
use crate::repo::{RepoRef, RepoType};
use crate::{Error, Result};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use hubgate_lfs::{BatchRequest, BatchResponse, LfsError, Operation, Pointer, LFS_MEDIA_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use tokio_util::io::StreamReader;
use tracing::debug;

const NO_WRITE: &str = "You do not have permission to write to this repository.";
const NO_READ: &str = "You do not have permission to read this repository.";
const REPO_MISSING: &str = "Repository not found";

#[derive(Debug, Deserialize)]
pub struct HfPath {
    namespace: String,
    name: String,
}

#[derive(Debug, Deserialize)]
pub struct ObjectPath {
    oid: String,
    size: String,
}

impl ObjectPath {
    fn pointer(&self) -> Result<Pointer> {
        let size = self
            .size
            .parse::<i64>()
            .ok()
            .filter(|size| *size >= 0)
            .ok_or_else(|| LfsError::InvalidSize(self.size.clone()))?;
        let pointer = Pointer::new(self.oid.clone(), size);
        pointer.validate()?;
        Ok(pointer)
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    save_as: Option<String>,
}

/// POST /{type}/{ns}/{name}/info/lfs/objects/batch
pub async fn batch(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<RepoPath>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = match path.repo() {
        Ok(repo) => negotiate(&state, repo, user, &headers, &body).await,
        Err(err) => Err(err),
    };
    result.unwrap_or_else(|err| lfs_error(err, &state.settings.realm))
}

/// POST /hf/{ns}/{name}/info/lfs/objects/batch, the huggingface client's
/// endpoint for model repositories
pub async fn hf_batch(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<HfPath>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = match RepoRef::new(RepoType::Model, &path.namespace, &path.name) {
        Ok(repo) => negotiate(&state, repo, user, &headers, &body).await,
        Err(err) => Err(err),
    };
    result.unwrap_or_else(|err| lfs_error(err, &state.settings.realm))
}

async fn negotiate(
    state: &AppState,
    repo: RepoRef,
    user: Option<String>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response> {
    let request: BatchRequest = serde_json::from_slice(body)
        .map_err(|e| Error::invalid("body", format!("invalid batch request: {}", e)))?;
    let operation = request.operation()?;
    batch_access(state, &repo, user.as_deref(), operation).await?;

    let request = LfsBatchRequest {
        repo,
        user,
        authorization: authorization(headers),
        operation: request.operation,
        objects: request.objects,
        transfers: request.transfers,
    };
    debug!(repo = %request.repo, %operation, objects = request.objects.len(), "lfs batch");
    let objects = state
        .lfs
        .resolve_objects(&request, operation.is_upload())
        .await?;
    Ok(lfs_json(StatusCode::OK, &BatchResponse::basic(objects)))
}

/// Uploads need a user with write access; someone who can only read gets a
/// 403. Callers who cannot even read are told the repository does not
/// exist, unless they are anonymous and credentials could help.
async fn batch_access(
    state: &AppState,
    repo: &RepoRef,
    user: Option<&str>,
    operation: Operation,
) -> Result<()> {
    if operation.is_upload() {
        if user.is_none() {
            return Err(Error::Unauthorized);
        }
        if state.access.check_repo(repo, user, Permission::Write).await?.is_authorized() {
            return Ok(());
        }
        return match state.access.check_repo(repo, user, Permission::Read).await? {
            AccessDecision::Authorized => Err(Error::forbidden(NO_WRITE)),
            _ => Err(Error::not_found(REPO_MISSING)),
        };
    }

    match state.access.check_repo(repo, user, Permission::Read).await? {
        AccessDecision::Authorized => Ok(()),
        AccessDecision::Unauthorized => Err(Error::Unauthorized),
        AccessDecision::Forbidden => Err(Error::not_found(REPO_MISSING)),
    }
}

/// PUT /{type}/{ns}/{name}/info/lfs/objects/{oid}/{size}
pub async fn upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<RepoPath>,
    Path(object): Path<ObjectPath>,
    body: Body,
) -> Response {
    let result = async {
        let repo = path.repo()?;
        let pointer = object.pointer()?;
        state
            .access
            .check_repo(&repo, user.as_deref(), Permission::Write)
            .await?
            .require(NO_WRITE)?;

        let reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
        state.lfs.upload(&repo, &pointer, Box::new(reader)).await?;
        debug!(%repo, oid = %pointer.oid, size = pointer.size, "lfs object stored");
        Ok::<_, Error>(StatusCode::OK.into_response())
    }
    .await;
    result.unwrap_or_else(|err| lfs_error(err, &state.settings.realm))
}

/// GET /{type}/{ns}/{name}/info/lfs/objects/{oid}/{size}?save_as=
///
/// Redirects to the storage location; object bytes never pass through here.
pub async fn download(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<RepoPath>,
    Path(object): Path<ObjectPath>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let result = async {
        let repo = path.repo()?;
        let pointer = object.pointer()?;
        state
            .access
            .check_repo(&repo, user.as_deref(), Permission::Read)
            .await?
            .require(NO_READ)?;

        let save_as = query.save_as.as_deref().filter(|name| !name.is_empty());
        let location = state.lfs.download_url(&repo, &pointer, save_as).await?;
        let location = HeaderValue::try_from(location).map_err(|e| Error::Internal(e.into()))?;
        Ok::<_, Error>((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
    }
    .await;
    result.unwrap_or_else(|err| lfs_error(err, &state.settings.realm))
}

/// POST /{type}/{ns}/{name}/info/lfs/verify
pub async fn verify(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<RepoPath>,
    body: Bytes,
) -> Response {
    let result = async {
        let repo = path.repo()?;
        let pointer: Pointer = serde_json::from_slice(&body)
            .map_err(|e| Error::invalid("body", format!("invalid lfs pointer: {}", e)))?;
        pointer.validate()?;
        state
            .access
            .check_repo(&repo, user.as_deref(), Permission::Write)
            .await?
            .require(NO_WRITE)?;

        state.lfs.verify(&repo, &pointer).await?;
        Ok::<_, Error>(lfs_response(StatusCode::OK, Body::empty()))
    }
    .await;
    result.unwrap_or_else(|err| lfs_error(err, &state.settings.realm))
}

fn lfs_response(status: StatusCode, body: Body) -> Response {
    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(LFS_MEDIA_TYPE));
    response
}

fn lfs_json<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => lfs_response(status, Body::from(body)),
        Err(err) => lfs_error(Error::Internal(err.into()), ""),
    }
}

fn lfs_error(err: Error, realm: &str) -> Response {
    let status = status_of(&err);
    log_failure(&err, status);
    let message = match &err {
        Error::Unauthorized => "Credentials needed".to_string(),
        Error::Internal(_) | Error::LogUnavailable => "Internal Server Error".to_string(),
        Error::Forbidden(_)
        | Error::NotFound(_)
        | Error::InvalidRequest { .. }
        | Error::LockConflict(_)
        | Error::NotLockOwner(_)
        | Error::TooLarge(_) => err.to_string(),
    };
    let body = json!({ "message": message }).to_string();
    let mut response = lfs_response(status, Body::from(body));
    if matches!(err, Error::Unauthorized) {
        add_challenge(&mut response, realm);
    }
    response
}
