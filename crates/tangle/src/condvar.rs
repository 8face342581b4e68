//! Condition variables, each bound to one tracked mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tangle_types::{CondvarId, LockId, LockKind, ThreadId};
use tracing::{debug, error};

use crate::error::{Resource, SyncError, SyncResult};
use crate::locks::{Access, LockRegistry, Primitive};
use crate::provider::{self, Acquired, NativeCondvar};
use crate::site::Site;

pub(crate) struct CondvarRecord {
    lock: LockId,
    name: String,
    created_by: ThreadId,
    created_site: Site,
    native: NativeCondvar,
}

pub struct CondvarRegistry {
    records: Mutex<HashMap<CondvarId, Arc<CondvarRecord>>>,
}

impl CondvarRegistry {
    pub(crate) fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn initialize(
        &self,
        locks: &LockRegistry,
        id: CondvarId,
        lock: LockId,
        name: &str,
        site: Site,
    ) -> SyncResult<()> {
        let record = locks.require(lock, site)?;
        if !matches!(record.primitive(), Primitive::Mutex(_)) {
            return Err(SyncError::WrongKind {
                lock,
                kind: LockKind::RwLock,
            });
        }
        let mut records = self.records.lock();
        if let Some(existing) = records.get(&id) {
            error!(
                cond = %id,
                site = %site,
                existing_name = %existing.name,
                created_by = %existing.created_by,
                created_at = %existing.created_site,
                "condition variable initialized twice"
            );
            return Err(SyncError::AlreadyExists(Resource::Condvar(id)));
        }
        records.insert(
            id,
            Arc::new(CondvarRecord {
                lock,
                name: name.to_owned(),
                created_by: provider::current_id(),
                created_site: site,
                native: NativeCondvar::new(),
            }),
        );
        debug!(cond = %id, lock = %lock, name, site = %site, "condition variable initialized");
        Ok(())
    }

    fn require(&self, id: CondvarId, site: Site) -> SyncResult<Arc<CondvarRecord>> {
        self.records.lock().get(&id).cloned().ok_or_else(|| {
            error!(cond = %id, site = %site, "operation on uninitialized condition variable");
            SyncError::NotInitialized(Resource::Condvar(id))
        })
    }

    pub(crate) fn destroy(&self, id: CondvarId, site: Site) -> SyncResult<()> {
        if self.records.lock().remove(&id).is_none() {
            error!(cond = %id, site = %site, "destroy of uninitialized condition variable");
            return Err(SyncError::NotInitialized(Resource::Condvar(id)));
        }
        Ok(())
    }

    /// Release the associated lock, wait, and re-acquire it. The lock is held
    /// again on return, including when the result is [`SyncError::Timeout`].
    ///
    /// Re-acquisition goes through the tracked path, so a thread blocked there
    /// shows up as attempting the lock.
    pub(crate) fn wait(
        &self,
        locks: &LockRegistry,
        id: CondvarId,
        deadline: Option<Instant>,
        site: Site,
    ) -> SyncResult<Acquired> {
        let cond = self.require(id, site)?;
        let record = locks.require(cond.lock, site)?;
        let Primitive::Mutex(mutex) = record.primitive() else {
            return Err(SyncError::WrongKind {
                lock: cond.lock,
                kind: LockKind::RwLock,
            });
        };
        let me = provider::current_id();

        // Nobody owns the lock while we sleep on the condition.
        let ours = record.owner().filter(|hold| hold.thread == me);
        if ours.is_some() {
            record.clear_owner();
        }

        match cond.native.wait_released(mutex, deadline) {
            Ok(timed_out) => {
                let acquired = locks.acquire(&record, me, Access::Exclusive, site);
                if timed_out {
                    Err(SyncError::Timeout)
                } else {
                    Ok(acquired)
                }
            }
            Err(err) => {
                if ours.is_some() {
                    record.set_owner(ours);
                }
                error!(
                    cond = %id,
                    lock = %cond.lock,
                    thread = %me,
                    site = %site,
                    error = %err,
                    "condition wait failed"
                );
                Err(SyncError::Native(err))
            }
        }
    }

    pub(crate) fn signal(&self, id: CondvarId, site: Site) -> SyncResult<()> {
        self.require(id, site)?.native.signal();
        Ok(())
    }

    pub(crate) fn broadcast(&self, id: CondvarId, site: Site) -> SyncResult<()> {
        self.require(id, site)?.native.broadcast();
        Ok(())
    }
}
