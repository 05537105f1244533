//! Git LFS building blocks for hubgate
//!
//! Wire types follow the git-lfs batch and locking APIs so that the stock
//! `git lfs` client talks to the gateway unmodified. Storage pieces are
//! deliberately small: a content-addressed object directory, an in-memory
//! lock table that can be snapshotted to JSON, and HMAC-signed links.

pub mod batch;
pub mod error;
pub mod lock;
pub mod lock_table;
pub mod object_store;
pub mod pointer;
pub mod signing;

pub use batch::{Action, BatchRequest, BatchResponse, ObjectError, ObjectResponse, Operation};
pub use error::{LfsError, Result};
pub use lock::{Lock, LockOwner, LockRecord};
pub use lock_table::{LockPage, LockTable};
pub use object_store::ObjectStore;
pub use pointer::Pointer;
pub use signing::UrlSigner;

/// Media type of every LFS API request and response body
pub const LFS_MEDIA_TYPE: &str = "application/vnd.git-lfs+json";
