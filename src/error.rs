//! Error classification shared by every backend boundary
//!
//! Backends and access checks return [`Error`]; each protocol surface in
//! `server` matches it exhaustively and renders the wire shape its clients
//! expect.

use hubgate_lfs::{LfsError, LockRecord};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No (valid) credentials; clients should retry with some
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated, but not allowed
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Malformed id, size, body or query value
    #[error("{message}")]
    InvalidRequest { field: &'static str, message: String },

    /// The path is already locked; carries the current lock
    #[error("lock already exists for {}", .0.path)]
    LockConflict(Box<LockRecord>),

    #[error("lock {0} is held by another user")]
    NotLockOwner(u64),

    #[error("{0}")]
    TooLarge(String),

    /// The deploy exists but has no live log stream for the instance
    #[error("don't find any deploy instance log")]
    LogUnavailable,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidRequest {
            field,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Error::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }
}

impl From<LfsError> for Error {
    fn from(err: LfsError) -> Self {
        match err {
            LfsError::InvalidOid(_) => Error::invalid("oid", err.to_string()),
            LfsError::InvalidSize(_) => Error::invalid("size", err.to_string()),
            LfsError::InvalidOperation(_) => Error::invalid("operation", err.to_string()),
            LfsError::SizeMismatch { .. } | LfsError::OidMismatch { .. } => {
                Error::invalid("object", err.to_string())
            }
            LfsError::NotFound(_) | LfsError::LockNotFound(_) => Error::NotFound(err.to_string()),
            LfsError::ObjectTooLarge { .. } => Error::TooLarge(err.to_string()),
            LfsError::LockExists(existing) => Error::LockConflict(existing),
            LfsError::NotLockOwner(id) => Error::NotLockOwner(id),
            LfsError::Io(e) => Error::Internal(e.into()),
            LfsError::Json(e) => Error::Internal(e.into()),
        }
    }
}

impl From<hubgate_git::Error> for Error {
    fn from(err: hubgate_git::Error) -> Self {
        use hubgate_git::Error as GitError;
        match err {
            GitError::UnknownService(_) => Error::NotFound("service not found".to_string()),
            GitError::RepoNotFound(_) => Error::NotFound("repository not found".to_string()),
            GitError::ProtocolError(_) | GitError::ProcessFailed { .. } | GitError::Io(_) => {
                Error::Internal(anyhow::Error::new(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lfs_classification() {
        let err: Error = LfsError::InvalidSize("-3".into()).into();
        assert!(matches!(err, Error::InvalidRequest { field: "size", .. }));
        assert_eq!(err.to_string(), "Invalid lfs file size: -3");

        let err: Error = LfsError::NotLockOwner(7).into();
        assert!(matches!(err, Error::NotLockOwner(7)));

        let err: Error = LfsError::Io(std::io::Error::other("disk")).into();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_git_classification() {
        let err: Error = hubgate_git::Error::UnknownService("git-received-pack".into()).into();
        assert!(matches!(err, Error::NotFound(ref m) if m == "service not found"));
    }
}
