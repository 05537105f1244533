use super::LockBackend;
use crate::repo::RepoRef;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use hubgate_lfs::{LfsError, LockPage, LockRecord, LockTable};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::info;

/// Lock table behind a mutex, optionally snapshotted to a JSON file after
/// every change
pub struct LocalLockBackend {
    table: Mutex<LockTable>,
    snapshot: Option<PathBuf>,
}

impl LocalLockBackend {
    pub fn in_memory() -> Self {
        Self {
            table: Mutex::new(LockTable::new()),
            snapshot: None,
        }
    }

    pub fn open(snapshot: impl Into<PathBuf>) -> Result<Self> {
        let snapshot = snapshot.into();
        let table = LockTable::load(&snapshot)?;
        info!(path = %snapshot.display(), locks = table.len(), "loaded lfs locks");
        Ok(Self {
            table: Mutex::new(table),
            snapshot: Some(snapshot),
        })
    }

    fn persist(&self, table: &LockTable) -> Result<()> {
        if let Some(path) = &self.snapshot {
            table.save(path)?;
        }
        Ok(())
    }
}

#[async_trait]
impl LockBackend for LocalLockBackend {
    async fn create(&self, repo: &RepoRef, path: &str, owner: &str) -> Result<LockRecord> {
        let mut table = self.table.lock().await;
        let record = table.create(&repo.to_string(), path, owner, Utc::now().trunc_subsecs(0))?;
        if let Err(e) = self.persist(&table) {
            table.remove(record.id);
            return Err(e);
        }
        info!(%repo, path, owner, id = record.id, "lock created");
        Ok(record)
    }

    async fn get(&self, repo: &RepoRef, id: u64) -> Result<Option<LockRecord>> {
        let table = self.table.lock().await;
        let repo = repo.to_string();
        Ok(table.get(id).filter(|lock| lock.repo == repo).cloned())
    }

    async fn find_by_path(&self, repo: &RepoRef, path: &str) -> Result<Option<LockRecord>> {
        let table = self.table.lock().await;
        Ok(table.find_by_path(&repo.to_string(), path).cloned())
    }

    async fn list(&self, repo: &RepoRef, cursor: usize, limit: usize) -> Result<LockPage> {
        let table = self.table.lock().await;
        Ok(table.list(&repo.to_string(), cursor, limit))
    }

    async fn release(
        &self,
        repo: &RepoRef,
        id: u64,
        user: &str,
        force: bool,
    ) -> Result<LockRecord> {
        let mut table = self.table.lock().await;
        let lock = match table.get(id) {
            Some(lock) if lock.repo == repo.to_string() => lock,
            _ => return Err(LfsError::LockNotFound(id).into()),
        };
        if lock.owner != user && !force {
            return Err(Error::NotLockOwner(id));
        }

        let removed = table.remove(id).ok_or(LfsError::LockNotFound(id))?;
        if let Err(e) = self.persist(&table) {
            table.restore(removed);
            return Err(e);
        }
        info!(%repo, id, user, force, owner = %removed.owner, "lock released");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::RepoType;
    use tempfile::tempdir;

    fn repo() -> RepoRef {
        RepoRef::new(RepoType::Model, "alice", "demo").unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let locks = LocalLockBackend::in_memory();
        let lock = locks.create(&repo(), "a.bin", "alice").await.unwrap();

        match locks.create(&repo(), "a.bin", "bob").await {
            Err(Error::LockConflict(existing)) => assert_eq!(*existing, lock),
            other => panic!("expected conflict, got {:?}", other),
        }

        assert!(matches!(
            locks.release(&repo(), lock.id, "bob", false).await,
            Err(Error::NotLockOwner(_))
        ));
        let released = locks.release(&repo(), lock.id, "bob", true).await.unwrap();
        assert_eq!(released, lock);
        assert!(locks.find_by_path(&repo(), "a.bin").await.unwrap().is_none());
        assert!(matches!(
            locks.release(&repo(), lock.id, "alice", false).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_ids_are_scoped_to_repo() {
        let locks = LocalLockBackend::in_memory();
        let lock = locks.create(&repo(), "a.bin", "alice").await.unwrap();
        let other = RepoRef::new(RepoType::Model, "bob", "other").unwrap();

        assert!(locks.get(&other, lock.id).await.unwrap().is_none());
        assert!(locks.get(&repo(), lock.id).await.unwrap().is_some());
        assert!(matches!(
            locks.release(&other, lock.id, "alice", true).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locks.json");
        let created = {
            let locks = LocalLockBackend::open(&path).unwrap();
            locks.create(&repo(), "a.bin", "alice").await.unwrap()
        };

        let locks = LocalLockBackend::open(&path).unwrap();
        let found = locks.find_by_path(&repo(), "a.bin").await.unwrap().unwrap();
        assert_eq!(found, created);
    }
}
