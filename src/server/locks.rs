//! Git LFS file locking API
//!
//! Bodies stay plain LFS JSON even on errors (`{lock?, message}`), and any
//! access denial is a 401 with a challenge so `git lfs` asks for
//! credentials.

use super::auth::{add_challenge, CurrentUser};
use super::respond::{log_failure, status_of};
use super::{AppState, RepoPath};
use crate::access::Permission;
use crate::repo::RepoRef;
use crate::{Error, Result};
use axum::{
    body::Bytes,
    extract::{Form, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use hubgate_lfs::lock::{
    CreateLockRequest, CreateLockResponse, ListLocksResponse, LockErrorResponse, UnlockRequest,
    UnlockResponse, VerifyLocksResponse,
};
use hubgate_lfs::{Lock, LFS_MEDIA_TYPE};
use serde::{Deserialize, Serialize};
use tracing::info;

const INVALID_REQUEST: &str = "unable to delete lock : Invalid request";

/// Which endpoint failed; each reports errors with its own wording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockOp {
    Create,
    List,
    Verify,
    Unlock,
}

impl LockOp {
    fn permission(self) -> Permission {
        match self {
            LockOp::Create | LockOp::Unlock => Permission::Write,
            LockOp::List | LockOp::Verify => Permission::Read,
        }
    }

    fn denied(self) -> &'static str {
        match self {
            LockOp::Create | LockOp::Unlock => "You must have push access to create locks",
            LockOp::List | LockOp::Verify => "You must have access to read locks",
        }
    }

    fn internal(self) -> &'static str {
        match self {
            LockOp::List => "unable to list locks : Internal Server Error",
            LockOp::Create | LockOp::Verify | LockOp::Unlock => {
                "unable to delete lock : Internal Server Error"
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    path: Option<String>,
    id: Option<String>,
    cursor: Option<String>,
    limit: Option<String>,
}

/// `cursor` and `limit` of the verify call come as form fields
#[derive(Debug, Default, Deserialize)]
pub struct VerifyForm {
    cursor: Option<String>,
    limit: Option<String>,
}

/// Missing, unparsable and negative values all mean 0
fn clamp(value: Option<&str>) -> usize {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(0)
        .max(0) as usize
}

async fn lock_access(
    state: &AppState,
    repo: &RepoRef,
    user: Option<&str>,
    op: LockOp,
) -> Result<()> {
    let decision = state.access.check_repo(repo, user, op.permission()).await?;
    if decision.is_authorized() {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

/// GET /{type}/{ns}/{name}/info/lfs/locks?path=&id=&cursor=&limit=
pub async fn list_locks(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<RepoPath>,
    Query(query): Query<ListQuery>,
) -> Response {
    let op = LockOp::List;
    let result = async {
        let repo = path.repo()?;
        let id = match query.id.as_deref().filter(|id| !id.is_empty()) {
            Some(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| Error::invalid("id", format!("invalid lock id: {}", raw)))?,
            ),
            None => None,
        };
        lock_access(&state, &repo, user.as_deref(), op).await?;

        let filter_path = query.path.as_deref().filter(|p| !p.is_empty());
        let response = if let Some(id) = id {
            let lock = state.locks.get(&repo, id).await?;
            ListLocksResponse {
                locks: lock
                    .filter(|lock| filter_path.map_or(true, |p| lock.path == p))
                    .map(|lock| Lock::from(&lock))
                    .into_iter()
                    .collect(),
                next_cursor: None,
            }
        } else if let Some(filter_path) = filter_path {
            let lock = state.locks.find_by_path(&repo, filter_path).await?;
            ListLocksResponse {
                locks: lock.iter().map(Lock::from).collect(),
                next_cursor: None,
            }
        } else {
            let cursor = clamp(query.cursor.as_deref());
            let limit = clamp(query.limit.as_deref());
            let page = state.locks.list(&repo, cursor, limit).await?;
            ListLocksResponse {
                locks: page.locks.iter().map(Lock::from).collect(),
                next_cursor: page.next_cursor.map(|c| c.to_string()),
            }
        };
        Ok::<_, Error>(lfs_json(StatusCode::OK, &response))
    }
    .await;
    result.unwrap_or_else(|err| lock_error(op, err, &state.settings.realm))
}

/// POST /{type}/{ns}/{name}/info/lfs/locks
pub async fn create_lock(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<RepoPath>,
    body: Bytes,
) -> Response {
    let op = LockOp::Create;
    let result = async {
        let request: CreateLockRequest = serde_json::from_slice(&body)
            .map_err(|e| Error::invalid("body", format!("invalid lock request: {}", e)))?;
        if request.path.is_empty() {
            return Err(Error::invalid("path", "lock path is empty"));
        }
        let repo = path.repo()?;
        lock_access(&state, &repo, user.as_deref(), op).await?;
        let owner = user.as_deref().ok_or(Error::Unauthorized)?;

        let record = state.locks.create(&repo, &request.path, owner).await?;
        info!(%repo, id = record.id, path = %record.path, %owner, "lfs lock created");
        let response = CreateLockResponse {
            lock: Lock::from(&record),
        };
        Ok::<_, Error>(lfs_json(StatusCode::OK, &response))
    }
    .await;
    result.unwrap_or_else(|err| lock_error(op, err, &state.settings.realm))
}

/// POST /{type}/{ns}/{name}/info/lfs/locks/verify
///
/// The page window is read from form fields; a JSON body carries only the
/// ref, which is not needed to partition locks.
pub async fn verify_locks(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<RepoPath>,
    form: Option<Form<VerifyForm>>,
) -> Response {
    let op = LockOp::Verify;
    let form = form.map(|Form(form)| form).unwrap_or_default();
    let result = async {
        let repo = path.repo()?;
        lock_access(&state, &repo, user.as_deref(), op).await?;

        let cursor = clamp(form.cursor.as_deref());
        let limit = clamp(form.limit.as_deref());
        let page = state.locks.list(&repo, cursor, limit).await?;
        let (ours, theirs): (Vec<_>, Vec<_>) = page
            .locks
            .iter()
            .partition(|lock| user.as_deref() == Some(lock.owner.as_str()));
        let response = VerifyLocksResponse {
            ours: ours.into_iter().map(Lock::from).collect(),
            theirs: theirs.into_iter().map(Lock::from).collect(),
            next_cursor: page.next_cursor.map(|c| c.to_string()),
        };
        Ok::<_, Error>(lfs_json(StatusCode::OK, &response))
    }
    .await;
    result.unwrap_or_else(|err| lock_error(op, err, &state.settings.realm))
}

#[derive(Debug, Deserialize)]
pub struct UnlockPath {
    lid: String,
}

/// POST /{type}/{ns}/{name}/info/lfs/locks/{lid}/unlock
pub async fn unlock(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(path): Path<RepoPath>,
    Path(target): Path<UnlockPath>,
    body: Bytes,
) -> Response {
    let op = LockOp::Unlock;
    let result = async {
        let request: UnlockRequest = if body.is_empty() {
            UnlockRequest::default()
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| Error::invalid("body", format!("invalid unlock request: {}", e)))?
        };
        let id = target
            .lid
            .parse::<u64>()
            .map_err(|_| Error::invalid("id", format!("invalid lock id: {}", target.lid)))?;
        let repo = path.repo()?;
        lock_access(&state, &repo, user.as_deref(), op).await?;
        let user = user.as_deref().ok_or(Error::Unauthorized)?;

        let record = state.locks.release(&repo, id, user, request.force).await?;
        info!(%repo, id, path = %record.path, %user, force = request.force, "lfs lock released");
        let response = UnlockResponse {
            lock: Lock::from(&record),
        };
        Ok::<_, Error>(lfs_json(StatusCode::OK, &response))
    }
    .await;
    result.unwrap_or_else(|err| lock_error(op, err, &state.settings.realm))
}

fn lfs_json<T: Serialize>(status: StatusCode, value: &T) -> Response {
    let mut response = (status, Json(value)).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(LFS_MEDIA_TYPE));
    response
}

fn lock_error(op: LockOp, err: Error, realm: &str) -> Response {
    let status = status_of(&err);
    log_failure(&err, status);
    let (status, lock, message) = match err {
        Error::Unauthorized | Error::Forbidden(_) => {
            let body = LockErrorResponse {
                lock: None,
                message: op.denied().to_string(),
            };
            let mut response = lfs_json(StatusCode::UNAUTHORIZED, &body);
            add_challenge(&mut response, realm);
            return response;
        }
        Error::LockConflict(existing) => (
            StatusCode::CONFLICT,
            Some(Lock::from(existing.as_ref())),
            "already created lock".to_string(),
        ),
        Error::InvalidRequest { field: "id", .. } if op == LockOp::Unlock => (
            StatusCode::BAD_REQUEST,
            None,
            "unable to delete lock : Invalid id".to_string(),
        ),
        Error::InvalidRequest { .. } => {
            (StatusCode::BAD_REQUEST, None, INVALID_REQUEST.to_string())
        }
        Error::NotFound(_) => (
            StatusCode::NOT_FOUND,
            None,
            "unable to delete lock : not found".to_string(),
        ),
        Error::NotLockOwner(_) => (
            StatusCode::METHOD_NOT_ALLOWED,
            None,
            "unable to delete lock : this lock is not created by you, try --force if you still want unlock it"
                .to_string(),
        ),
        Error::TooLarge(_) | Error::LogUnavailable | Error::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            op.internal().to_string(),
        ),
    };
    lfs_json(status, &LockErrorResponse { lock, message })
}
