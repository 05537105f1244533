use crate::lock::LockRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LfsError {
    #[error("invalid oid: {0}")]
    InvalidOid(String),

    #[error("Invalid lfs file size: {0}")]
    InvalidSize(String),

    #[error("invalid lfs batch operation: {0}")]
    InvalidOperation(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("oid mismatch: expected {expected}, got {actual}")]
    OidMismatch { expected: String, actual: String },

    #[error("object too large: {size} bytes exceeds limit of {limit} bytes")]
    ObjectTooLarge { size: u64, limit: u64 },

    #[error("lock already exists for {}", .0.path)]
    LockExists(Box<LockRecord>),

    #[error("lock not found: {0}")]
    LockNotFound(u64),

    #[error("lock {0} is held by another user")]
    NotLockOwner(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LfsError {
    /// Status used when the error is reported per object inside a batch
    pub fn status_code(&self) -> u16 {
        match self {
            LfsError::InvalidOid(_) | LfsError::InvalidSize(_) => 422,
            LfsError::InvalidOperation(_) => 400,
            LfsError::NotFound(_) | LfsError::LockNotFound(_) => 404,
            LfsError::SizeMismatch { .. } | LfsError::OidMismatch { .. } => 400,
            LfsError::ObjectTooLarge { .. } => 413,
            LfsError::LockExists(_) => 409,
            LfsError::NotLockOwner(_) => 403,
            LfsError::Io(_) | LfsError::Json(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, LfsError>;
