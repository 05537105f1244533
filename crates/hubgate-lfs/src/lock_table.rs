//! Lock bookkeeping with at most one lock per (repository, path)

use crate::{LfsError, LockRecord, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockTable {
    next_id: u64,
    locks: BTreeMap<u64, LockRecord>,
}

/// One page of a repository's locks, ordered by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockPage {
    pub locks: Vec<LockRecord>,
    /// Offset of the following page, set when this page came back full
    pub next_cursor: Option<usize>,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            locks: BTreeMap::new(),
        }
    }

    /// Load a snapshot written by [`LockTable::save`]; a missing file is an
    /// empty table.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the snapshot at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| LfsError::Io(e.error))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Take the lock on `path`, or return the lock already holding it.
    pub fn create(
        &mut self,
        repo: &str,
        path: &str,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<LockRecord> {
        if let Some(existing) = self.find_by_path(repo, path) {
            return Err(LfsError::LockExists(Box::new(existing.clone())));
        }

        let record = LockRecord {
            id: self.next_id,
            repo: repo.to_string(),
            path: path.to_string(),
            owner: owner.to_string(),
            locked_at: now,
        };
        self.next_id += 1;
        self.locks.insert(record.id, record.clone());
        Ok(record)
    }

    pub fn get(&self, id: u64) -> Option<&LockRecord> {
        self.locks.get(&id)
    }

    pub fn find_by_path(&self, repo: &str, path: &str) -> Option<&LockRecord> {
        self.locks
            .values()
            .find(|lock| lock.repo == repo && lock.path == path)
    }

    /// Locks of `repo` starting at offset `cursor`. A `limit` of zero
    /// returns everything after the cursor.
    pub fn list(&self, repo: &str, cursor: usize, limit: usize) -> LockPage {
        let matching = self.locks.values().filter(|lock| lock.repo == repo).skip(cursor);
        let locks: Vec<LockRecord> = if limit > 0 {
            matching.take(limit).cloned().collect()
        } else {
            matching.cloned().collect()
        };

        let next_cursor = (limit > 0 && locks.len() == limit).then(|| cursor + limit);
        LockPage { locks, next_cursor }
    }

    pub fn remove(&mut self, id: u64) -> Option<LockRecord> {
        self.locks.remove(&id)
    }

    /// Put back a lock taken out by [`LockTable::remove`]
    pub fn restore(&mut self, record: LockRecord) {
        self.next_id = self.next_id.max(record.id + 1);
        self.locks.insert(record.id, record);
    }
}
