pub mod access;
pub mod backend;
pub mod config;
pub mod deploy;
pub mod error;
pub mod negotiate;
pub mod repo;
pub mod server;

pub use access::{AccessControl, AccessDecision, IdentityTable, Permission, PolicyAccessControl};
pub use config::Config;
pub use error::{Error, Result};
pub use repo::{GitOperationContext, RepoRef, RepoType};
pub use server::{AppState, GatewaySettings, HubServer};
