//! The platform's generic `{"msg": ...}` error envelope
//!
//! Used by the deploy and storage routes. Git and LFS routes have their
//! own shapes because their clients parse them.

use crate::Error;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::{debug, error};

pub fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        Error::LockConflict(_) => StatusCode::CONFLICT,
        Error::NotLockOwner(_) => StatusCode::METHOD_NOT_ALLOWED,
        Error::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        Error::LogUnavailable | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Log a failure once, at the level its class deserves
pub fn log_failure(err: &Error, status: StatusCode) {
    if status.is_server_error() {
        error!(error = %err, "request failed");
    } else {
        debug!(error = %err, %status, "request rejected");
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_of(&self);
        log_failure(&self, status);
        let msg = match &self {
            Error::Internal(_) => "Internal Server Error".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "msg": msg }))).into_response()
    }
}
