//! Deployment identity, status documents and log stream handles

use crate::repo::RepoRef;
use crate::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployType {
    Space,
    Inference,
    Finetune,
    Serverless,
}

/// `since` windows accepted by the log endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinceWindow {
    TenMinutes,
    ThirtyMinutes,
    OneHour,
    SixHours,
    OneDay,
    TwoDays,
    OneWeek,
}

impl SinceWindow {
    pub fn parse(token: &str) -> Result<Self> {
        Ok(match token {
            "10mins" => SinceWindow::TenMinutes,
            "30mins" => SinceWindow::ThirtyMinutes,
            "1hour" => SinceWindow::OneHour,
            "6hours" => SinceWindow::SixHours,
            "1day" => SinceWindow::OneDay,
            "2days" => SinceWindow::TwoDays,
            "1week" => SinceWindow::OneWeek,
            other => return Err(Error::invalid("since", format!("invalid since value: {}", other))),
        })
    }

    pub fn duration(&self) -> Duration {
        let minutes = match self {
            SinceWindow::TenMinutes => 10,
            SinceWindow::ThirtyMinutes => 30,
            SinceWindow::OneHour => 60,
            SinceWindow::SixHours => 6 * 60,
            SinceWindow::OneDay => 24 * 60,
            SinceWindow::TwoDays => 2 * 24 * 60,
            SinceWindow::OneWeek => 7 * 24 * 60,
        };
        Duration::from_secs(minutes * 60)
    }
}

/// Names exactly one deployment unit, plus what the caller wants from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployActRequest {
    pub repo: RepoRef,
    pub user: Option<String>,
    pub deploy_id: i64,
    pub deploy_type: DeployType,
    pub instance: Option<String>,
    pub since: Option<SinceWindow>,
    /// Revision filter for versioned serverless logs
    pub commit_id: Option<String>,
}

/// What the control plane knows about a deploy, enough to authorize it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployInfo {
    pub id: i64,
    pub repo: RepoRef,
    pub deploy_type: DeployType,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub name: String,
    pub status: String,
}

/// Payload of a `status` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployStatus {
    pub status: String,
    #[serde(default)]
    pub details: Vec<InstanceStatus>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
}

impl DeployStatus {
    pub fn from_code(code: i32) -> Self {
        Self {
            status: status_label(code).to_string(),
            ..Default::default()
        }
    }
}

/// Collapse control plane status codes into the labels clients display.
pub fn status_label(code: i32) -> &'static str {
    match code {
        0 => "Pending",
        10 | 11 => "Building",
        12 => "BuildingFailed",
        13 | 20 | 22 => "Deploying",
        21 => "DeployFailed",
        23 => "Running",
        24 => "RuntimeError",
        25 => "Sleeping",
        26 => "Stopped",
        27 => "Deleted",
        28 => "Unhealthy",
        _ => "Stopped",
    }
}

/// Live log feed of one instance.
///
/// `run_log` is `None` when the control plane has no stream for the
/// instance. That is reported to the client as an error, unlike a live
/// channel that simply has not produced anything yet.
#[derive(Debug, Default)]
pub struct LogStreamHandle {
    pub run_log: Option<mpsc::Receiver<Bytes>>,
}

impl LogStreamHandle {
    pub fn live(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { run_log: Some(rx) }
    }

    pub fn empty() -> Self {
        Self { run_log: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label(0), "Pending");
        assert_eq!(status_label(11), "Building");
        assert_eq!(status_label(12), "BuildingFailed");
        assert_eq!(status_label(22), "Deploying");
        assert_eq!(status_label(23), "Running");
        assert_eq!(status_label(28), "Unhealthy");
        assert_eq!(status_label(99), "Stopped");
    }

    #[test]
    fn test_since_window() {
        assert_eq!(SinceWindow::parse("1hour").unwrap().duration(), Duration::from_secs(3600));
        assert_eq!(
            SinceWindow::parse("1week").unwrap().duration(),
            Duration::from_secs(7 * 24 * 3600)
        );
        assert!(SinceWindow::parse("5mins").is_err());
    }

    #[test]
    fn test_status_document_shape() {
        let status = DeployStatus::from_code(23);
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"status": "Running", "details": [], "message": "", "reason": ""})
        );
    }
}
