use facet::Facet;

use crate::{LockId, ThreadId};

/// What kind of native primitive backs a lock record.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum LockKind {
    /// Plain mutual-exclusion lock.
    Mutex,
    /// Reader/writer lock. Only exclusive holds are tracked as ownership.
    RwLock,
}

/// Who holds a lock, since when, and from where.
#[derive(Facet, Clone, Debug, PartialEq, Eq)]
pub struct HoldSnapshot {
    pub thread: ThreadId,
    pub since_unix_ms: u64,
    /// How long the hold had lasted when the snapshot was taken.
    pub held_ms: u64,
    pub site: String,
}

/// A thread blocked trying to obtain a lock.
#[derive(Facet, Clone, Debug, PartialEq, Eq)]
pub struct AttemptSnapshot {
    pub thread: ThreadId,
    pub lock: LockId,
    pub since_unix_ms: u64,
    /// How long the attempt had lasted when the snapshot was taken.
    pub waiting_ms: u64,
    pub site: String,
}

/// Point-in-time copy of one lock record.
#[derive(Facet, Clone, Debug)]
pub struct LockSnapshot {
    pub id: LockId,
    pub kind: LockKind,
    pub name: String,
    pub created_by: ThreadId,
    pub created_unix_ms: u64,
    pub created_site: String,
    pub owner: Option<HoldSnapshot>,
    /// Threads attempting this lock, oldest first.
    pub waiters: Vec<AttemptSnapshot>,
}

/// Point-in-time copy of one thread record.
#[derive(Facet, Clone, Debug)]
pub struct ThreadSnapshot {
    pub id: ThreadId,
    pub name: String,
    pub created_unix_ms: u64,
    pub created_site: String,
    /// Lock this thread is blocked on, joined from the lock records.
    pub awaiting: Option<AttemptSnapshot>,
}

/// Private copy of both registries, safe to inspect without holding any live lock.
#[derive(Facet, Clone, Debug, Default)]
pub struct RegistrySnapshot {
    pub taken_unix_ms: u64,
    pub locks: Vec<LockSnapshot>,
    pub threads: Vec<ThreadSnapshot>,
}

impl RegistrySnapshot {
    pub fn lock(&self, id: LockId) -> Option<&LockSnapshot> {
        self.locks.iter().find(|lock| lock.id == id)
    }

    pub fn thread(&self, id: ThreadId) -> Option<&ThreadSnapshot> {
        self.threads.iter().find(|thread| thread.id == id)
    }

    /// Locks whose recorded owner is `thread`.
    pub fn held_by(&self, thread: ThreadId) -> impl Iterator<Item = &LockSnapshot> {
        self.locks
            .iter()
            .filter(move |lock| lock.owner.as_ref().is_some_and(|o| o.thread == thread))
    }

    pub fn to_json(&self) -> Result<String, String> {
        facet_json::to_string(self).map_err(|e| e.to_string())
    }
}

/// One thread found on a wait-for cycle.
#[derive(Facet, Clone, Debug, PartialEq, Eq)]
pub struct DeadlockedThread {
    pub thread: ThreadId,
    pub thread_name: String,
    pub lock: LockId,
    pub lock_name: String,
    pub holder: ThreadId,
    pub holder_name: String,
    pub waiting_ms: u64,
    /// Where the stuck thread started waiting.
    pub site: String,
}

/// A lock still owned by a thread when that thread went away.
#[derive(Facet, Clone, Debug, PartialEq, Eq)]
pub struct AbandonedLock {
    pub thread: ThreadId,
    pub thread_name: String,
    pub lock: LockId,
    pub lock_name: String,
    pub held_ms: u64,
    pub acquired_site: String,
    /// Where the owning thread was deregistered.
    pub exit_site: String,
}
