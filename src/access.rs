//! Identity resolution and repository/deploy access decisions

use crate::config::AccessConfig;
use crate::deploy::{DeployInfo, DeployType};
use crate::repo::RepoRef;
use crate::Result;
use async_trait::async_trait;
use base64::Engine;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Authorized,
    /// Anonymous caller; a credential might change the answer
    Unauthorized,
    Forbidden,
}

impl AccessDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AccessDecision::Authorized)
    }

    /// Turn a denial into the matching error, using `message` for 403s.
    pub fn require(self, message: &str) -> Result<()> {
        match self {
            AccessDecision::Authorized => Ok(()),
            AccessDecision::Unauthorized => Err(crate::Error::Unauthorized),
            AccessDecision::Forbidden => Err(crate::Error::forbidden(message)),
        }
    }
}

#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn check_repo(
        &self,
        repo: &RepoRef,
        user: Option<&str>,
        permission: Permission,
    ) -> Result<AccessDecision>;

    async fn check_deploy(&self, user: Option<&str>, deploy: &DeployInfo)
        -> Result<AccessDecision>;
}

/// Static policy read from the `[access]` config section.
///
/// Public repositories are world readable. A namespace belongs to the user
/// of the same name; admins can do everything.
#[derive(Debug, Clone, Default)]
pub struct PolicyAccessControl {
    admins: HashSet<String>,
    private_repos: HashSet<String>,
    /// (repo, user) -> write allowed
    grants: HashMap<(String, String), bool>,
}

impl PolicyAccessControl {
    pub fn from_config(config: &AccessConfig) -> Self {
        Self {
            admins: config.admins.iter().cloned().collect(),
            private_repos: config.private_repos.iter().cloned().collect(),
            grants: config
                .grants
                .iter()
                .map(|g| ((g.repo.clone(), g.user.clone()), g.write))
                .collect(),
        }
    }

    pub fn is_admin(&self, user: &str) -> bool {
        self.admins.contains(user)
    }

    fn is_private(&self, repo: &RepoRef) -> bool {
        self.private_repos.contains(&repo.to_string())
    }

    fn grant(&self, repo: &RepoRef, user: &str) -> Option<bool> {
        self.grants.get(&(repo.to_string(), user.to_string())).copied()
    }
}

#[async_trait]
impl AccessControl for PolicyAccessControl {
    async fn check_repo(
        &self,
        repo: &RepoRef,
        user: Option<&str>,
        permission: Permission,
    ) -> Result<AccessDecision> {
        if permission == Permission::Read && !self.is_private(repo) {
            return Ok(AccessDecision::Authorized);
        }
        let Some(user) = user else {
            return Ok(AccessDecision::Unauthorized);
        };
        if self.is_admin(user) || repo.namespace == user {
            return Ok(AccessDecision::Authorized);
        }
        let allowed = match (permission, self.grant(repo, user)) {
            (Permission::Read, Some(_)) => true,
            (Permission::Write, Some(write)) => write,
            (_, None) => false,
        };
        Ok(if allowed {
            AccessDecision::Authorized
        } else {
            AccessDecision::Forbidden
        })
    }

    async fn check_deploy(
        &self,
        user: Option<&str>,
        deploy: &DeployInfo,
    ) -> Result<AccessDecision> {
        let Some(user) = user else {
            return Ok(AccessDecision::Unauthorized);
        };
        let allowed = match deploy.deploy_type {
            DeployType::Serverless => self.is_admin(user),
            _ => self.is_admin(user) || deploy.owner == user,
        };
        Ok(if allowed {
            AccessDecision::Authorized
        } else {
            AccessDecision::Forbidden
        })
    }
}

/// Maps `Authorization` headers to user names.
///
/// Accepts `Basic base64(user:token)` and `Bearer token`. Anything that does
/// not match a configured user resolves to anonymous.
#[derive(Debug, Clone, Default)]
pub struct IdentityTable {
    /// token -> username
    tokens: HashMap<String, String>,
}

impl IdentityTable {
    pub fn from_config(config: &AccessConfig) -> Self {
        Self {
            tokens: config
                .users
                .iter()
                .map(|u| (u.token.clone(), u.username.clone()))
                .collect(),
        }
    }

    pub fn resolve(&self, authorization: Option<&str>) -> Option<String> {
        let header = authorization?.trim();
        if let Some(token) = header.strip_prefix("Bearer ") {
            return self.tokens.get(token.trim()).cloned();
        }

        let encoded = header.strip_prefix("Basic ")?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, token) = decoded.split_once(':')?;
        match self.tokens.get(token) {
            Some(owner) if owner == username => Some(owner.clone()),
            _ => None,
        }
    }
}
