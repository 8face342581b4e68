//! The thread registry: one record per live thread, keyed by [`ThreadId`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tangle_types::{ThreadId, ThreadSnapshot, unix_ms};

use crate::error::{Resource, SyncError, SyncResult};
use crate::site::Site;

pub(crate) struct ThreadRecord {
    id: ThreadId,
    name: Mutex<String>,
    created_at: SystemTime,
    created_site: Site,
}

impl ThreadRecord {
    pub(crate) fn name(&self) -> String {
        self.name.lock().clone()
    }

    fn snapshot(&self) -> ThreadSnapshot {
        ThreadSnapshot {
            id: self.id,
            name: self.name(),
            created_unix_ms: unix_ms(self.created_at),
            created_site: self.created_site.to_string(),
            awaiting: None,
        }
    }
}

pub struct ThreadRegistry {
    records: Mutex<HashMap<ThreadId, Arc<ThreadRecord>>>,
}

impl ThreadRegistry {
    pub(crate) fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, id: ThreadId, name: &str, site: Site) -> SyncResult<()> {
        let mut records = self.records.lock();
        if records.contains_key(&id) {
            return Err(SyncError::AlreadyExists(Resource::Thread(id)));
        }
        records.insert(
            id,
            Arc::new(ThreadRecord {
                id,
                name: Mutex::new(name.to_owned()),
                created_at: SystemTime::now(),
                created_site: site,
            }),
        );
        Ok(())
    }

    pub(crate) fn remove(&self, id: ThreadId) -> Option<Arc<ThreadRecord>> {
        self.records.lock().remove(&id)
    }

    pub(crate) fn get(&self, id: ThreadId) -> Option<Arc<ThreadRecord>> {
        self.records.lock().get(&id).cloned()
    }

    pub(crate) fn set_name(&self, id: ThreadId, name: &str) -> SyncResult<()> {
        let record = self
            .get(id)
            .ok_or(SyncError::NotInitialized(Resource::Thread(id)))?;
        *record.name.lock() = name.to_owned();
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Threads with `awaiting` left empty; the caller joins it from the locks.
    pub(crate) fn snapshot(&self) -> Vec<ThreadSnapshot> {
        self.records
            .lock()
            .values()
            .map(|record| record.snapshot())
            .collect()
    }
}

/// Handle to a thread started through [`SyncContext::spawn`](crate::SyncContext::spawn).
///
/// Dropping it detaches the thread; its record is still removed when it exits.
pub struct TrackedThread<T> {
    id: ThreadId,
    inner: std::thread::JoinHandle<T>,
}

impl<T> TrackedThread<T> {
    pub(crate) fn new(id: ThreadId, inner: std::thread::JoinHandle<T>) -> Self {
        Self { id, inner }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the thread. By the time this returns the thread has been
    /// deregistered, whether it returned or unwound.
    pub fn join(self) -> SyncResult<T> {
        let id = self.id;
        self.inner
            .join()
            .map_err(|_| SyncError::Panicked { thread: id })
    }

    pub fn detach(self) {}
}
