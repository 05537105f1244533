//! Batch API request/response bodies

use crate::{LfsError, Pointer, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    Download,
}

impl Operation {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "upload" => Ok(Operation::Upload),
            "download" => Ok(Operation::Download),
            other => Err(LfsError::InvalidOperation(other.to_string())),
        }
    }

    pub fn is_upload(&self) -> bool {
        matches!(self, Operation::Upload)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Upload => f.write_str("upload"),
            Operation::Download => f.write_str("download"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefSpec {
    pub name: String,
}

/// Body of `POST .../info/lfs/objects/batch`.
///
/// `operation` stays a string so that unknown values reach
/// [`Operation::parse`] and are reported as a request error instead of a
/// deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub operation: String,
    #[serde(default)]
    pub transfers: Vec<String>,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<RefSpec>,
    #[serde(default)]
    pub objects: Vec<Pointer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_algo: Option<String>,
}

impl BatchRequest {
    pub fn operation(&self) -> Result<Operation> {
        Operation::parse(&self.operation)
    }
}

/// A link the client follows to move or confirm one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub href: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub header: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Action {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            header: BTreeMap::new(),
            expires_at: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(name.into(), value.into());
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectError {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectResponse {
    pub oid: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<BTreeMap<String, Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ObjectError>,
}

impl ObjectResponse {
    /// Object the server already has; no transfer needed.
    pub fn present(pointer: &Pointer) -> Self {
        Self {
            oid: pointer.oid.clone(),
            size: pointer.size,
            authenticated: Some(true),
            actions: None,
            error: None,
        }
    }

    pub fn with_action(pointer: &Pointer, name: &str, action: Action) -> Self {
        Self::present(pointer).and_action(name, action)
    }

    pub fn and_action(mut self, name: &str, action: Action) -> Self {
        self.actions
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), action);
        self
    }

    pub fn error(pointer: &Pointer, code: u16, message: impl Into<String>) -> Self {
        Self {
            oid: pointer.oid.clone(),
            size: pointer.size,
            authenticated: None,
            actions: None,
            error: Some(ObjectError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn from_error(pointer: &Pointer, err: &LfsError) -> Self {
        Self::error(pointer, err.status_code(), err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub transfer: String,
    pub objects: Vec<ObjectResponse>,
    #[serde(default = "default_hash_algo")]
    pub hash_algo: String,
}

fn default_hash_algo() -> String {
    "sha256".to_string()
}

impl BatchResponse {
    pub fn basic(objects: Vec<ObjectResponse>) -> Self {
        Self {
            transfer: "basic".to_string(),
            objects,
            hash_algo: default_hash_algo(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request_from_client() {
        let body = json!({
            "operation": "download",
            "transfers": ["basic", "lfs-standalone-file"],
            "ref": {"name": "refs/heads/main"},
            "objects": [{"oid": "abc", "size": 10}],
            "hash_algo": "sha256"
        });
        let req: BatchRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.operation().unwrap(), Operation::Download);
        assert_eq!(req.transfers, vec!["basic", "lfs-standalone-file"]);
        assert_eq!(req.git_ref.unwrap().name, "refs/heads/main");
        assert_eq!(req.objects, vec![Pointer::new("abc", 10)]);
    }

    #[test]
    fn test_unknown_operation_is_request_error() {
        let req: BatchRequest =
            serde_json::from_value(json!({"operation": "delete", "objects": []})).unwrap();
        let err = req.operation().unwrap_err();
        assert_eq!(err.to_string(), "invalid lfs batch operation: delete");
    }

    #[test]
    fn test_response_shape() {
        let pointer = Pointer::new("abc", 10);
        let action = Action::new("https://hub.example/objects/abc/10")
            .with_header("Authorization", "Basic Zm9vOmJhcg==");
        let resp = BatchResponse::basic(vec![
            ObjectResponse::with_action(&pointer, "upload", action),
            ObjectResponse::error(&pointer, 404, "Object does not exist"),
        ]);

        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["transfer"], "basic");
        assert_eq!(value["hash_algo"], "sha256");
        assert_eq!(
            value["objects"][0]["actions"]["upload"]["header"]["Authorization"],
            "Basic Zm9vOmJhcg=="
        );
        assert!(value["objects"][0].get("error").is_none());
        assert_eq!(value["objects"][1]["error"]["code"], 404);
        assert!(value["objects"][1].get("actions").is_none());
    }
}
