//! Error types for hubgate-git

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("service not found: {0}")]
    UnknownService(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("git {service} exited with {status}: {stderr}")]
    ProcessFailed {
        service: &'static str,
        status: String,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
