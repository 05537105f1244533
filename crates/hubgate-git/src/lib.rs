//! Git smart HTTP transport primitives for hubgate
//!
//! The gateway never interprets pack data itself. It frames the service
//! advertisement, picks the right content types and pipes request and
//! response bodies through `git upload-pack` / `git receive-pack` running
//! in stateless-RPC mode.

pub mod error;
pub mod process;
pub mod protocol;
pub mod service;

pub use error::{Error, Result};
pub use process::{ByteStream, GitProcess};
pub use service::Service;
