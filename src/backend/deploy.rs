//! In-process deployment registry
//!
//! Stands in for the cluster control plane: it tracks a status code per
//! deploy and a log feed per instance. Each feed keeps a bounded backlog so
//! that `since` windows can be replayed before live lines.

use super::DeployControl;
use crate::config::DeployUnitConfig;
use crate::deploy::{
    status_label, DeployActRequest, DeployInfo, DeployStatus, InstanceStatus, LogStreamHandle,
};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};

const BACKLOG_LINES: usize = 1000;
const FEED_CAPACITY: usize = 256;

struct Instance {
    backlog: VecDeque<(DateTime<Utc>, Bytes)>,
    /// `None` once the instance has stopped producing logs
    feed: Option<broadcast::Sender<Bytes>>,
}

impl Instance {
    fn running() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            backlog: VecDeque::new(),
            feed: Some(feed),
        }
    }
}

struct Unit {
    info: DeployInfo,
    status_code: i32,
    commit_id: Option<String>,
    instances: BTreeMap<String, Instance>,
}

#[derive(Default)]
pub struct LocalDeployPlane {
    units: RwLock<HashMap<i64, Unit>>,
}

impl LocalDeployPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_config(units: &[DeployUnitConfig]) -> Result<Self> {
        let plane = Self::new();
        for unit in units {
            let info = DeployInfo {
                id: unit.id,
                repo: unit.repo.parse()?,
                deploy_type: unit.deploy_type,
                owner: unit.owner.clone(),
            };
            plane
                .register(info, unit.status_code, unit.commit_id.clone(), &unit.instances)
                .await;
        }
        Ok(plane)
    }

    pub async fn register(
        &self,
        info: DeployInfo,
        status_code: i32,
        commit_id: Option<String>,
        instances: &[String],
    ) {
        let unit = Unit {
            status_code,
            commit_id,
            instances: instances
                .iter()
                .map(|name| (name.clone(), Instance::running()))
                .collect(),
            info,
        };
        debug!(id = unit.info.id, repo = %unit.info.repo, "registered deploy");
        self.units.write().await.insert(unit.info.id, unit);
    }

    pub async fn set_status(&self, id: i64, status_code: i32) -> Result<()> {
        let mut units = self.units.write().await;
        let unit = units.get_mut(&id).ok_or_else(|| deploy_missing(id))?;
        unit.status_code = status_code;
        Ok(())
    }

    /// Record a log chunk and hand it to every open stream of the instance.
    pub async fn append_log(&self, id: i64, instance: &str, data: Bytes) -> Result<()> {
        let mut units = self.units.write().await;
        let unit = units.get_mut(&id).ok_or_else(|| deploy_missing(id))?;
        let instance = unit
            .instances
            .entry(instance.to_string())
            .or_insert_with(Instance::running);

        if instance.backlog.len() == BACKLOG_LINES {
            instance.backlog.pop_front();
        }
        instance.backlog.push_back((Utc::now(), data.clone()));
        if let Some(feed) = &instance.feed {
            // No subscribers is fine
            let _ = feed.send(data);
        }
        Ok(())
    }

    /// Close the instance's feed; open log streams end after draining.
    pub async fn stop_instance(&self, id: i64, instance: &str) -> Result<()> {
        let mut units = self.units.write().await;
        let unit = units.get_mut(&id).ok_or_else(|| deploy_missing(id))?;
        if let Some(instance) = unit.instances.get_mut(instance) {
            instance.feed = None;
        }
        Ok(())
    }
}

fn deploy_missing(id: i64) -> Error {
    Error::not_found(format!("deploy {} not found", id))
}

fn matching<'a>(units: &'a HashMap<i64, Unit>, request: &DeployActRequest) -> Result<&'a Unit> {
    let unit = units
        .get(&request.deploy_id)
        .ok_or_else(|| deploy_missing(request.deploy_id))?;
    if unit.info.repo != request.repo || unit.info.deploy_type != request.deploy_type {
        return Err(Error::not_found("invalid deploy found"));
    }
    Ok(unit)
}

#[async_trait]
impl DeployControl for LocalDeployPlane {
    async fn describe(&self, request: &DeployActRequest) -> Result<DeployInfo> {
        let units = self.units.read().await;
        Ok(matching(&units, request)?.info.clone())
    }

    async fn status(&self, request: &DeployActRequest) -> Result<DeployStatus> {
        let units = self.units.read().await;
        let unit = matching(&units, request)?;
        let label = status_label(unit.status_code);
        Ok(DeployStatus {
            status: label.to_string(),
            details: unit
                .instances
                .iter()
                .map(|(name, instance)| InstanceStatus {
                    name: name.clone(),
                    status: (if instance.feed.is_some() { label } else { "Stopped" }).to_string(),
                })
                .collect(),
            message: String::new(),
            reason: String::new(),
        })
    }

    async fn instance_logs(&self, request: &DeployActRequest) -> Result<LogStreamHandle> {
        let units = self.units.read().await;
        let unit = matching(&units, request)?;

        if let Some(commit) = &request.commit_id {
            if unit.commit_id.as_ref() != Some(commit) {
                return Ok(LogStreamHandle::empty());
            }
        }
        let Some(instance) = request.instance.as_ref().and_then(|n| unit.instances.get(n)) else {
            return Ok(LogStreamHandle::empty());
        };
        let Some(feed) = &instance.feed else {
            return Ok(LogStreamHandle::empty());
        };

        let cutoff = request.since.and_then(|since| {
            chrono::Duration::from_std(since.duration())
                .ok()
                .map(|window| Utc::now() - window)
        });
        let backlog: Vec<Bytes> = instance
            .backlog
            .iter()
            .filter(|(at, _)| cutoff.map_or(true, |cutoff| *at >= cutoff))
            .map(|(_, data)| data.clone())
            .collect();
        // Subscribed under the same lock the backlog was read with, so no
        // line is lost or repeated between the two.
        let live = feed.subscribe();

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let id = request.deploy_id;
        tokio::spawn(forward_logs(id, backlog, live, tx));
        Ok(LogStreamHandle::live(rx))
    }
}

async fn forward_logs(
    id: i64,
    backlog: Vec<Bytes>,
    mut live: broadcast::Receiver<Bytes>,
    tx: mpsc::Sender<Bytes>,
) {
    for chunk in backlog {
        if tx.send(chunk).await.is_err() {
            return;
        }
    }
    loop {
        tokio::select! {
            _ = tx.closed() => return,
            received = live.recv() => match received {
                Ok(chunk) => {
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(deploy = id, skipped, "log reader fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::{DeployType, SinceWindow};
    use crate::repo::{RepoRef, RepoType};

    fn repo() -> RepoRef {
        RepoRef::new(RepoType::Model, "alice", "demo").unwrap()
    }

    async fn plane() -> LocalDeployPlane {
        let plane = LocalDeployPlane::new();
        let info = DeployInfo {
            id: 7,
            repo: repo(),
            deploy_type: DeployType::Inference,
            owner: "alice".into(),
        };
        plane
            .register(info, 23, Some("abc123".into()), &["demo-0".to_string()])
            .await;
        plane
    }

    fn request(instance: Option<&str>) -> DeployActRequest {
        DeployActRequest {
            repo: repo(),
            user: Some("alice".into()),
            deploy_id: 7,
            deploy_type: DeployType::Inference,
            instance: instance.map(str::to_string),
            since: None,
            commit_id: None,
        }
    }

    #[tokio::test]
    async fn test_status_and_describe() {
        let plane = plane().await;
        let status = plane.status(&request(None)).await.unwrap();
        assert_eq!(status.status, "Running");
        assert_eq!(status.details[0].name, "demo-0");

        plane.set_status(7, 12).await.unwrap();
        assert_eq!(plane.status(&request(None)).await.unwrap().status, "BuildingFailed");

        let mut wrong_repo = request(None);
        wrong_repo.repo = RepoRef::new(RepoType::Model, "bob", "demo").unwrap();
        let err = plane.describe(&wrong_repo).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ref m) if m == "invalid deploy found"));
    }

    #[tokio::test]
    async fn test_logs_replay_then_live() {
        let plane = plane().await;
        plane.append_log(7, "demo-0", Bytes::from("booting")).await.unwrap();

        let mut req = request(Some("demo-0"));
        req.since = Some(SinceWindow::TenMinutes);
        let mut rx = plane.instance_logs(&req).await.unwrap().run_log.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("booting"));

        plane.append_log(7, "demo-0", Bytes::from("ready")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("ready"));

        plane.stop_instance(7, "demo-0").await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_logs_without_stream() {
        let plane = plane().await;
        assert!(plane.instance_logs(&request(Some("nope"))).await.unwrap().run_log.is_none());
        assert!(plane.instance_logs(&request(None)).await.unwrap().run_log.is_none());

        let mut versioned = request(Some("demo-0"));
        versioned.commit_id = Some("other".into());
        assert!(plane.instance_logs(&versioned).await.unwrap().run_log.is_none());
        versioned.commit_id = Some("abc123".into());
        assert!(plane.instance_logs(&versioned).await.unwrap().run_log.is_some());
    }

    async fn live_readers(plane: &LocalDeployPlane) -> usize {
        let units = plane.units.read().await;
        units[&7].instances["demo-0"]
            .feed
            .as_ref()
            .map_or(0, |feed| feed.receiver_count())
    }

    #[tokio::test]
    async fn test_dropped_reader_ends_forwarding() {
        let plane = plane().await;
        let handle = plane.instance_logs(&request(Some("demo-0"))).await.unwrap();
        assert_eq!(live_readers(&plane).await, 1);

        drop(handle.run_log);
        plane.append_log(7, "demo-0", Bytes::from("after close")).await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while live_readers(&plane).await > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("forwarder still subscribed");
    }
}
