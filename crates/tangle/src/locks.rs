//! The lock registry: one record per live lock, keyed by [`LockId`].
//!
//! A record carries the native primitive plus a small metadata lock guarding
//! the display name, the current owner, and the threads attempting the lock.
//! The attempt list and the owner change together in one transition, so a
//! snapshot never shows a thread both waiting for and holding the same lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tangle_types::{
    AttemptSnapshot, HoldSnapshot, LockId, LockKind, LockSnapshot, ThreadId, duration_ms, unix_ms,
};
use tracing::{debug, error, warn};

use crate::error::{Resource, SyncError, SyncResult};
use crate::provider::{self, Acquired, NativeMutex, NativeRwLock};
use crate::site::Site;

/// How a caller wants to hold a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Plain mutex acquisition.
    Exclusive,
    /// Shared hold of a reader/writer lock. Not tracked as ownership.
    Read,
    /// Exclusive hold of a reader/writer lock.
    Write,
}

impl Access {
    fn kind(self) -> LockKind {
        match self {
            Self::Exclusive => LockKind::Mutex,
            Self::Read | Self::Write => LockKind::RwLock,
        }
    }

    fn tracks_owner(self) -> bool {
        !matches!(self, Self::Read)
    }
}

pub(crate) enum Primitive {
    Mutex(NativeMutex),
    RwLock(NativeRwLock),
}

impl Primitive {
    fn new(kind: LockKind) -> Self {
        match kind {
            LockKind::Mutex => Self::Mutex(NativeMutex::new()),
            LockKind::RwLock => Self::RwLock(NativeRwLock::new()),
        }
    }

    fn kind(&self) -> LockKind {
        match self {
            Self::Mutex(_) => LockKind::Mutex,
            Self::RwLock(_) => LockKind::RwLock,
        }
    }

    fn acquire(&self, access: Access) -> Acquired {
        match (self, access) {
            (Self::Mutex(m), _) => m.lock(),
            (Self::RwLock(l), Access::Read) => l.read(),
            (Self::RwLock(l), _) => l.write(),
        }
    }

    fn try_acquire(&self, access: Access) -> Option<Acquired> {
        match (self, access) {
            (Self::Mutex(m), _) => m.try_lock(),
            (Self::RwLock(l), Access::Read) => l.try_read(),
            (Self::RwLock(l), _) => l.try_write(),
        }
    }

    fn unlock(&self) -> Result<(), provider::NativeError> {
        match self {
            Self::Mutex(m) => m.unlock(),
            Self::RwLock(l) => l.unlock(),
        }
    }

    fn abandon(&self, holder: ThreadId) -> bool {
        match self {
            Self::Mutex(m) => m.abandon(holder),
            Self::RwLock(l) => l.abandon(holder),
        }
    }

    fn is_locked(&self) -> bool {
        match self {
            Self::Mutex(m) => m.holder().is_some(),
            Self::RwLock(l) => l.is_locked(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Hold {
    pub(crate) thread: ThreadId,
    pub(crate) since: Instant,
    pub(crate) at: SystemTime,
    pub(crate) site: Site,
}

#[derive(Debug, Clone, Copy)]
struct Attempt {
    thread: ThreadId,
    since: Instant,
    at: SystemTime,
    site: Site,
}

struct LockMeta {
    name: String,
    owner: Option<Hold>,
    attempts: Vec<Attempt>,
}

pub(crate) struct LockRecord {
    id: LockId,
    created_by: ThreadId,
    created_at: SystemTime,
    created_site: Site,
    primitive: Primitive,
    meta: Mutex<LockMeta>,
}

impl LockRecord {
    pub(crate) fn id(&self) -> LockId {
        self.id
    }

    pub(crate) fn name(&self) -> String {
        self.meta.lock().name.clone()
    }

    pub(crate) fn primitive(&self) -> &Primitive {
        &self.primitive
    }

    pub(crate) fn owner(&self) -> Option<Hold> {
        self.meta.lock().owner
    }

    pub(crate) fn set_owner(&self, hold: Option<Hold>) {
        self.meta.lock().owner = hold;
    }

    fn begin_attempt(&self, thread: ThreadId, site: Site) {
        self.meta.lock().attempts.push(Attempt {
            thread,
            since: Instant::now(),
            at: SystemTime::now(),
            site,
        });
    }

    /// Turn `thread`'s attempt into a grant in one step.
    fn grant(&self, thread: ThreadId, site: Site, access: Access) {
        let mut meta = self.meta.lock();
        meta.attempts.retain(|a| a.thread != thread);
        if access.tracks_owner() {
            meta.owner = Some(Hold {
                thread,
                since: Instant::now(),
                at: SystemTime::now(),
                site,
            });
        }
    }

    pub(crate) fn clear_owner(&self) -> Option<Hold> {
        self.meta.lock().owner.take()
    }

    /// Creation and last-ownership context for log lines.
    fn context(&self) -> String {
        let meta = self.meta.lock();
        let held = match meta.owner {
            Some(hold) => format!(
                "held by {} for {}ms from {}",
                hold.thread,
                duration_ms(hold.since.elapsed()),
                hold.site
            ),
            None => "not held".to_owned(),
        };
        format!(
            "{:?} {:?} created by {} at {}; {held}",
            self.primitive.kind(),
            meta.name,
            self.created_by,
            self.created_site
        )
    }

    fn snapshot(&self, now: Instant, now_sys: SystemTime) -> LockSnapshot {
        let meta = self.meta.lock();
        let since_ms = |since: Instant, at: SystemTime| {
            // Wall clock for display, monotonic clock for durations.
            let elapsed = now.saturating_duration_since(since);
            (unix_ms(at).min(unix_ms(now_sys)), duration_ms(elapsed))
        };
        LockSnapshot {
            id: self.id,
            kind: self.primitive.kind(),
            name: meta.name.clone(),
            created_by: self.created_by,
            created_unix_ms: unix_ms(self.created_at),
            created_site: self.created_site.to_string(),
            owner: meta.owner.map(|hold| {
                let (since_unix_ms, held_ms) = since_ms(hold.since, hold.at);
                HoldSnapshot {
                    thread: hold.thread,
                    since_unix_ms,
                    held_ms,
                    site: hold.site.to_string(),
                }
            }),
            waiters: meta
                .attempts
                .iter()
                .map(|attempt| {
                    let (since_unix_ms, waiting_ms) = since_ms(attempt.since, attempt.at);
                    AttemptSnapshot {
                        thread: attempt.thread,
                        lock: self.id,
                        since_unix_ms,
                        waiting_ms,
                        site: attempt.site.to_string(),
                    }
                })
                .collect(),
        }
    }
}

/// A lock found owned by a departing thread.
pub(crate) struct HeldLock {
    pub(crate) record: Arc<LockRecord>,
    pub(crate) hold: Hold,
}

pub struct LockRegistry {
    records: Mutex<HashMap<LockId, Arc<LockRecord>>>,
    slow_wait: Duration,
}

impl LockRegistry {
    pub(crate) fn new(slow_wait: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            slow_wait,
        }
    }

    pub(crate) fn initialize(
        &self,
        id: LockId,
        kind: LockKind,
        name: &str,
        site: Site,
    ) -> SyncResult<()> {
        let mut records = self.records.lock();
        if let Some(existing) = records.get(&id) {
            error!(
                lock = %id,
                site = %site,
                existing = %existing.context(),
                "lock initialized twice"
            );
            return Err(SyncError::AlreadyExists(Resource::Lock(id)));
        }
        let record = LockRecord {
            id,
            created_by: provider::current_id(),
            created_at: SystemTime::now(),
            created_site: site,
            primitive: Primitive::new(kind),
            meta: Mutex::new(LockMeta {
                name: name.to_owned(),
                owner: None,
                attempts: Vec::new(),
            }),
        };
        records.insert(id, Arc::new(record));
        debug!(lock = %id, name, kind = ?kind, site = %site, "lock initialized");
        Ok(())
    }

    pub(crate) fn get(&self, id: LockId) -> Option<Arc<LockRecord>> {
        self.records.lock().get(&id).cloned()
    }

    /// Look a record up for an operation, logging the miss.
    pub(crate) fn require(&self, id: LockId, site: Site) -> SyncResult<Arc<LockRecord>> {
        self.get(id).ok_or_else(|| {
            error!(lock = %id, site = %site, "operation on uninitialized lock");
            SyncError::NotInitialized(Resource::Lock(id))
        })
    }

    fn require_kind(&self, id: LockId, access: Access, site: Site) -> SyncResult<Arc<LockRecord>> {
        let record = self.require(id, site)?;
        let kind = record.primitive.kind();
        if kind != access.kind() {
            error!(lock = %id, site = %site, ?access, "{}", record.context());
            return Err(SyncError::WrongKind { lock: id, kind });
        }
        Ok(record)
    }

    /// The calling thread, unless it has deregistered itself.
    fn caller(&self, id: LockId, site: Site) -> SyncResult<ThreadId> {
        let me = provider::current_id();
        if provider::is_retired() {
            error!(
                lock = %id,
                thread = %me,
                site = %site,
                "lock requested by a deregistered thread"
            );
            return Err(SyncError::NotInitialized(Resource::Thread(me)));
        }
        Ok(me)
    }

    /// Blocking acquisition.
    pub(crate) fn obtain(&self, id: LockId, access: Access, site: Site) -> SyncResult<Acquired> {
        let record = self.require_kind(id, access, site)?;
        let me = self.caller(id, site)?;
        Ok(self.acquire(&record, me, access, site))
    }

    /// Record the attempt, acquire, and turn the attempt into a grant. Tries
    /// without blocking first so that uncontended acquisitions are not timed.
    pub(crate) fn acquire(
        &self,
        record: &LockRecord,
        me: ThreadId,
        access: Access,
        site: Site,
    ) -> Acquired {
        record.begin_attempt(me, site);
        let acquired = match record.primitive.try_acquire(access) {
            Some(acquired) => acquired,
            None => {
                let start = Instant::now();
                let acquired = record.primitive.acquire(access);
                let waited = start.elapsed();
                if waited >= self.slow_wait {
                    debug!(
                        lock = %record.id,
                        thread = %me,
                        site = %site,
                        waited_ms = duration_ms(waited),
                        "slow lock acquisition"
                    );
                }
                acquired
            }
        };
        record.grant(me, site, access);
        if acquired.is_recovered() {
            warn!(
                lock = %record.id,
                thread = %me,
                site = %site,
                "recovered lock abandoned by its previous owner"
            );
        }
        acquired
    }

    pub(crate) fn try_obtain(
        &self,
        id: LockId,
        access: Access,
        site: Site,
    ) -> SyncResult<Acquired> {
        let record = self.require_kind(id, access, site)?;
        let me = self.caller(id, site)?;
        let acquired = record.primitive.try_acquire(access).ok_or(SyncError::Busy)?;
        record.grant(me, site, access);
        if acquired.is_recovered() {
            warn!(
                lock = %id,
                thread = %me,
                site = %site,
                "recovered lock abandoned by its previous owner"
            );
        }
        Ok(acquired)
    }

    /// Ownership is cleared before the primitive is released, whatever the
    /// primitive reports, so no stale owner survives a release.
    pub(crate) fn release(&self, id: LockId, site: Site) -> SyncResult<()> {
        let record = self.require(id, site)?;
        let previous = record.clear_owner();
        record.primitive.unlock().map_err(|err| {
            error!(
                lock = %id,
                thread = %provider::current_id(),
                site = %site,
                previous_owner = ?previous.map(|h| h.thread),
                error = %err,
                "release failed: {}",
                record.context()
            );
            record.set_owner(previous);
            SyncError::Native(err)
        })
    }

    pub(crate) fn test(&self, id: LockId) -> SyncResult<bool> {
        let record = self
            .get(id)
            .ok_or(SyncError::NotInitialized(Resource::Lock(id)))?;
        Ok(record.primitive.is_locked())
    }

    pub(crate) fn have(&self, id: LockId) -> SyncResult<bool> {
        let record = self
            .get(id)
            .ok_or(SyncError::NotInitialized(Resource::Lock(id)))?;
        Ok(record
            .owner()
            .is_some_and(|hold| provider::is_current(hold.thread)))
    }

    pub(crate) fn rename(&self, id: LockId, name: &str) -> SyncResult<()> {
        let record = self
            .get(id)
            .ok_or(SyncError::NotInitialized(Resource::Lock(id)))?;
        record.meta.lock().name = name.to_owned();
        Ok(())
    }

    pub(crate) fn destroy(&self, id: LockId, site: Site) -> SyncResult<()> {
        let removed = self.records.lock().remove(&id);
        let Some(record) = removed else {
            error!(lock = %id, site = %site, "destroy of uninitialized lock");
            return Err(SyncError::NotInitialized(Resource::Lock(id)));
        };
        if record.primitive.is_locked() {
            warn!(lock = %id, site = %site, "destroying a held lock: {}", record.context());
        }
        debug!(lock = %id, site = %site, "lock destroyed");
        Ok(())
    }

    /// Locks whose recorded owner is `thread`.
    pub(crate) fn held_by(&self, thread: ThreadId) -> Vec<Arc<LockRecord>> {
        self.records
            .lock()
            .values()
            .filter(|record| record.owner().is_some_and(|hold| hold.thread == thread))
            .cloned()
            .collect()
    }

    /// Locks owned by `thread`, with the hold each one records. Nothing changes.
    pub(crate) fn holds(&self, thread: ThreadId) -> Vec<HeldLock> {
        self.held_by(thread)
            .into_iter()
            .filter_map(|record| {
                let hold = record.owner().filter(|hold| hold.thread == thread)?;
                Some(HeldLock { record, hold })
            })
            .collect()
    }

    /// Take back every lock still owned by `thread`, which must have exited.
    /// The primitives are marked owner-dead so the next acquirer is told to
    /// re-validate.
    pub(crate) fn reclaim(&self, thread: ThreadId) -> Vec<HeldLock> {
        self.held_by(thread)
            .into_iter()
            .filter_map(|record| {
                let hold = {
                    let mut meta = record.meta.lock();
                    match meta.owner {
                        Some(hold) if hold.thread == thread => meta.owner.take(),
                        _ => None,
                    }
                }?;
                record.primitive.abandon(thread);
                Some(HeldLock { record, hold })
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<LockSnapshot> {
        let records = self.records.lock();
        let now = Instant::now();
        let now_sys = SystemTime::now();
        records
            .values()
            .map(|record| record.snapshot(now, now_sys))
            .collect()
    }
}
