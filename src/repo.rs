//! Repository identity and per-request Git context

use crate::{Error, Result};
use hubgate_git::Service;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    Model,
    Dataset,
    Code,
    Space,
    Prompt,
    Mcp,
    Skill,
}

impl RepoType {
    pub const ALL: [RepoType; 7] = [
        RepoType::Model,
        RepoType::Dataset,
        RepoType::Code,
        RepoType::Space,
        RepoType::Prompt,
        RepoType::Mcp,
        RepoType::Skill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RepoType::Model => "model",
            RepoType::Dataset => "dataset",
            RepoType::Code => "code",
            RepoType::Space => "space",
            RepoType::Prompt => "prompt",
            RepoType::Mcp => "mcp",
            RepoType::Skill => "skill",
        }
    }

    /// URL segment form: `models`, `datasets`, ...
    pub fn plural(&self) -> &'static str {
        match self {
            RepoType::Model => "models",
            RepoType::Dataset => "datasets",
            RepoType::Code => "codes",
            RepoType::Space => "spaces",
            RepoType::Prompt => "prompts",
            RepoType::Mcp => "mcps",
            RepoType::Skill => "skills",
        }
    }
}

impl FromStr for RepoType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RepoType::ALL
            .into_iter()
            .find(|t| t.as_str() == s || t.plural() == s)
            .ok_or_else(|| Error::invalid("repo_type", format!("unknown repository type: {}", s)))
    }
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<type>/<namespace>/<name>`, with any `.git` suffix removed from name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub repo_type: RepoType,
    pub namespace: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(repo_type: RepoType, namespace: &str, name: &str) -> Result<Self> {
        let name = name.strip_suffix(".git").unwrap_or(name);
        check_segment("namespace", namespace)?;
        check_segment("name", name)?;
        Ok(Self {
            repo_type,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// Parse from the raw URL segments, e.g. `("models", "alice", "demo.git")`.
    pub fn from_segments(repo_type: &str, namespace: &str, name: &str) -> Result<Self> {
        Self::new(repo_type.parse()?, namespace, name)
    }

    /// `alice/demo`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Path of the repository below the gateway root, e.g. `models/alice/demo.git`
    pub fn git_path(&self) -> String {
        format!("{}/{}/{}.git", self.repo_type.plural(), self.namespace, self.name)
    }
}

/// Parses the display form, `models/alice/demo`
impl FromStr for RepoRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut segments = s.trim_matches('/').splitn(3, '/');
        match (segments.next(), segments.next(), segments.next()) {
            (Some(repo_type), Some(namespace), Some(name)) => {
                Self::from_segments(repo_type, namespace, name)
            }
            _ => Err(Error::invalid(
                "repo",
                format!("expected <type>/<namespace>/<name>, got {}", s),
            )),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.repo_type.plural(), self.namespace, self.name)
    }
}

fn check_segment(field: &'static str, value: &str) -> Result<()> {
    let bad = value.is_empty()
        || value.starts_with('.')
        || value.contains(['/', '\\', '\0'])
        || value.contains("..");
    if bad {
        return Err(Error::invalid(field, format!("invalid repository {}: {:?}", field, value)));
    }
    Ok(())
}

/// Everything a Git RPC needs to know about the request it serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOperationContext {
    pub repo: RepoRef,
    pub service: Service,
    /// Raw `Git-Protocol` header, if the client sent one
    pub git_protocol: Option<String>,
    pub user: Option<String>,
}

impl GitOperationContext {
    /// Fails with NotFound ("service not found") for anything but the two
    /// smart HTTP verbs.
    pub fn new(
        repo: RepoRef,
        rpc: &str,
        git_protocol: Option<String>,
        user: Option<String>,
    ) -> Result<Self> {
        let service: Service = rpc.parse()?;
        Ok(Self {
            repo,
            service,
            git_protocol,
            user,
        })
    }
}
