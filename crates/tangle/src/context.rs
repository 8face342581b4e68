//! [`SyncContext`]: the one surface the rest of the emulator synchronizes through.
//!
//! A context owns the lock, thread, and condition-variable registries. It is
//! built once at startup and shared as an `Arc`; nothing in this crate keeps
//! process-global registry state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Condvar, Mutex};
use tangle_types::{
    AbandonedLock, AttemptSnapshot, CondvarId, DeadlockedThread, LockFilter, LockId, LockKind,
    RegistrySnapshot, SortKey, ThreadFilter, ThreadId, duration_ms, unix_ms,
};
use tracing::{debug, error, info, warn};

use crate::condvar::CondvarRegistry;
use crate::config::Config;
use crate::detect::WaitGraph;
use crate::error::{Resource, SyncError, SyncResult};
use crate::locks::{Access, HeldLock, LockRegistry};
use crate::provider::{self, Acquired};
use crate::report;
use crate::site::Site;
use crate::threads::{ThreadRegistry, TrackedThread};

pub struct SyncContext {
    config: Config,
    locks: LockRegistry,
    threads: ThreadRegistry,
    condvars: CondvarRegistry,
    shutting_down: AtomicBool,
    shutdown_signal: Condvar,
    shutdown_lock: Mutex<()>,
    abandoned: Mutex<VecDeque<AbandonedLock>>,
}

/// Deregisters a spawned thread when it leaves its entry point, by return or unwind.
struct Registration {
    cx: Arc<SyncContext>,
    id: ThreadId,
    site: Site,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(thread = %self.id, site = %self.site, "thread unwinding");
        }
        self.cx.exit(self.id, self.site);
    }
}

impl SyncContext {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            locks: LockRegistry::new(config.slow_wait_threshold),
            threads: ThreadRegistry::new(),
            condvars: CondvarRegistry::new(),
            shutting_down: AtomicBool::new(false),
            shutdown_signal: Condvar::new(),
            shutdown_lock: Mutex::new(()),
            abandoned: Mutex::new(VecDeque::new()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── threads ──────────────────────────────────────────────

    /// Id of the calling thread, whether or not it is registered here.
    pub fn current_thread(&self) -> ThreadId {
        provider::current_id()
    }

    /// Register a thread that was not started through [`spawn`](Self::spawn),
    /// such as the process's main thread.
    pub fn register_current(&self, name: &str, site: Site) -> SyncResult<ThreadId> {
        let id = provider::current_id();
        provider::set_retired(false);
        self.threads.insert(id, name, site).inspect_err(|_| {
            error!(thread = %id, name, site = %site, "thread registered twice");
        })?;
        debug!(thread = %id, name, site = %site, "thread registered");
        Ok(id)
    }

    /// Start a tracked thread. Its record exists before the thread can run, and
    /// it is deregistered however `f` ends.
    pub fn spawn<F, T>(
        self: &Arc<Self>,
        name: &str,
        site: Site,
        f: F,
    ) -> SyncResult<TrackedThread<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = ThreadId::next();
        self.threads.insert(id, name, site)?;
        let registration = Registration {
            cx: Arc::clone(self),
            id,
            site,
        };
        let spawned = provider::spawn(name, move || {
            provider::adopt(id);
            let _registration = registration;
            f()
        });
        match spawned {
            Ok(handle) => {
                debug!(thread = %id, name, site = %site, "thread created");
                Ok(TrackedThread::new(id, handle))
            }
            Err(err) => {
                // The closure, and the registration inside it, were dropped by the
                // failed spawn, so the record is already gone.
                error!(
                    thread = %id,
                    name,
                    site = %site,
                    error = %err,
                    "thread creation failed"
                );
                Err(SyncError::Spawn(err))
            }
        }
    }

    /// Remove `thread`'s record while it may still be running. Locks it owns
    /// are reported as abandoned but stay held: the thread can still release
    /// them, and nobody else can take them until it does. A thread that
    /// deregisters itself may not acquire anything afterwards.
    pub fn deregister(&self, thread: ThreadId, site: Site) -> SyncResult<Vec<AbandonedLock>> {
        let Some(record) = self.threads.remove(thread) else {
            return Err(SyncError::NotInitialized(Resource::Thread(thread)));
        };
        if provider::is_current(thread) {
            provider::set_retired(true);
        }
        debug!(thread = %thread, site = %site, "thread deregistered");
        if self.is_shutting_down() {
            return Ok(Vec::new());
        }

        let thread_name = record.name();
        let abandoned: Vec<_> = self
            .locks
            .holds(thread)
            .iter()
            .map(|held| self.abandon_report(thread, &thread_name, held, site))
            .collect();
        self.remember_abandoned(&abandoned);
        Ok(abandoned)
    }

    /// Early deregistration of the calling thread. See [`deregister`](Self::deregister).
    pub fn deregister_current(&self, site: Site) -> SyncResult<Vec<AbandonedLock>> {
        self.deregister(provider::current_id(), site)
    }

    /// The spawned thread has left its entry point. Whatever it still owns is
    /// unlocked so other threads can recover it.
    fn exit(&self, thread: ThreadId, site: Site) {
        let record = self.threads.remove(thread);
        if self.is_shutting_down() {
            return;
        }
        let reclaimed = self.locks.reclaim(thread);
        let Some(record) = record else {
            // Already reported when the thread deregistered itself.
            for held in &reclaimed {
                debug!(
                    thread = %thread,
                    lock = %held.record.id(),
                    site = %site,
                    "released lock left by a deregistered thread"
                );
            }
            return;
        };
        debug!(thread = %thread, site = %site, "thread deregistered");

        let thread_name = record.name();
        let abandoned: Vec<_> = reclaimed
            .iter()
            .map(|held| self.abandon_report(thread, &thread_name, held, site))
            .collect();
        self.remember_abandoned(&abandoned);
    }

    fn abandon_report(
        &self,
        thread: ThreadId,
        thread_name: &str,
        held: &HeldLock,
        site: Site,
    ) -> AbandonedLock {
        let lock = AbandonedLock {
            thread,
            thread_name: thread_name.to_owned(),
            lock: held.record.id(),
            lock_name: held.record.name(),
            held_ms: duration_ms(held.hold.since.elapsed()),
            acquired_site: held.hold.site.to_string(),
            exit_site: site.to_string(),
        };
        warn!(
            thread = %thread,
            thread_name,
            lock = %lock.lock,
            lock_name = %lock.lock_name,
            held_ms = lock.held_ms,
            acquired_at = %lock.acquired_site,
            exit_site = %site,
            "abandoned lock: thread deregistered while holding it"
        );
        lock
    }

    fn remember_abandoned(&self, locks: &[AbandonedLock]) {
        let capacity = self.config.abandoned_history;
        if capacity == 0 || locks.is_empty() {
            return;
        }
        let mut history = self.abandoned.lock();
        for lock in locks {
            if history.len() == capacity {
                history.pop_front();
            }
            history.push_back(lock.clone());
        }
    }

    /// Most recent abandoned-lock reports, oldest first.
    pub fn recent_abandonments(&self) -> Vec<AbandonedLock> {
        self.abandoned.lock().iter().cloned().collect()
    }

    pub fn thread_name(&self, thread: ThreadId) -> Option<String> {
        self.threads.get(thread).map(|record| record.name())
    }

    pub fn set_thread_name(&self, thread: ThreadId, name: &str) -> SyncResult<()> {
        self.threads.set_name(thread, name)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    // ── locks ────────────────────────────────────────────────

    pub fn initialize_lock(&self, id: LockId, name: &str, site: Site) -> SyncResult<()> {
        self.locks.initialize(id, LockKind::Mutex, name, site)
    }

    pub fn initialize_rwlock(&self, id: LockId, name: &str, site: Site) -> SyncResult<()> {
        self.locks.initialize(id, LockKind::RwLock, name, site)
    }

    /// Initialize a mutex under a freshly allocated id.
    pub fn create_lock(&self, name: &str, site: Site) -> SyncResult<LockId> {
        let id = LockId::next();
        self.initialize_lock(id, name, site)?;
        Ok(id)
    }

    /// Initialize a reader/writer lock under a freshly allocated id.
    pub fn create_rwlock(&self, name: &str, site: Site) -> SyncResult<LockId> {
        let id = LockId::next();
        self.initialize_rwlock(id, name, site)?;
        Ok(id)
    }

    pub fn obtain(&self, id: LockId, site: Site) -> SyncResult<Acquired> {
        self.locks.obtain(id, Access::Exclusive, site)
    }

    /// Returns [`SyncError::Busy`] without blocking if the lock is held.
    pub fn try_obtain(&self, id: LockId, site: Site) -> SyncResult<Acquired> {
        self.locks.try_obtain(id, Access::Exclusive, site)
    }

    pub fn obtain_read(&self, id: LockId, site: Site) -> SyncResult<Acquired> {
        self.locks.obtain(id, Access::Read, site)
    }

    pub fn obtain_write(&self, id: LockId, site: Site) -> SyncResult<Acquired> {
        self.locks.obtain(id, Access::Write, site)
    }

    pub fn try_read(&self, id: LockId, site: Site) -> SyncResult<Acquired> {
        self.locks.try_obtain(id, Access::Read, site)
    }

    pub fn try_write(&self, id: LockId, site: Site) -> SyncResult<Acquired> {
        self.locks.try_obtain(id, Access::Write, site)
    }

    /// Release a mutex, or whichever mode of a reader/writer lock the caller holds.
    pub fn release(&self, id: LockId, site: Site) -> SyncResult<()> {
        self.locks.release(id, site)
    }

    /// Whether anyone holds the lock. No bookkeeping side effects.
    pub fn test(&self, id: LockId) -> SyncResult<bool> {
        self.locks.test(id)
    }

    /// Whether the calling thread is the recorded owner.
    ///
    /// Best effort: the answer can be stale by the time the caller reads it, so
    /// it must not stand in for actually holding the lock.
    pub fn have(&self, id: LockId) -> SyncResult<bool> {
        self.locks.have(id)
    }

    pub fn rename_lock(&self, id: LockId, name: &str) -> SyncResult<()> {
        self.locks.rename(id, name)
    }

    pub fn destroy_lock(&self, id: LockId, site: Site) -> SyncResult<()> {
        self.locks.destroy(id, site)
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    // ── condition variables ─────────────────────────────────

    /// Initialize a condition variable bound to the mutex `lock`.
    pub fn initialize_condvar(
        &self,
        id: CondvarId,
        lock: LockId,
        name: &str,
        site: Site,
    ) -> SyncResult<()> {
        self.condvars.initialize(&self.locks, id, lock, name, site)
    }

    pub fn create_condvar(&self, lock: LockId, name: &str, site: Site) -> SyncResult<CondvarId> {
        let id = CondvarId::next();
        self.initialize_condvar(id, lock, name, site)?;
        Ok(id)
    }

    pub fn destroy_condvar(&self, id: CondvarId, site: Site) -> SyncResult<()> {
        self.condvars.destroy(id, site)
    }

    /// Wait for a signal. The caller must hold the bound lock, and holds it
    /// again when this returns.
    pub fn wait(&self, id: CondvarId, site: Site) -> SyncResult<Acquired> {
        self.condvars.wait(&self.locks, id, None, site)
    }

    /// Like [`wait`](Self::wait), giving up after `timeout` with
    /// [`SyncError::Timeout`]. The lock is held again in that case too.
    pub fn timed_wait(&self, id: CondvarId, timeout: Duration, site: Site) -> SyncResult<Acquired> {
        self.condvars
            .wait(&self.locks, id, Some(Instant::now() + timeout), site)
    }

    pub fn signal(&self, id: CondvarId, site: Site) -> SyncResult<()> {
        self.condvars.signal(id, site)
    }

    pub fn broadcast(&self, id: CondvarId, site: Site) -> SyncResult<()> {
        self.condvars.broadcast(id, site)
    }

    // ── detection and diagnostics ───────────────────────────

    /// Private copy of both registries. Locks are copied first; each thread's
    /// awaited lock is then joined from the lock records.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let taken = SystemTime::now();
        let locks = self.locks.snapshot();
        let mut threads = self.threads.snapshot();

        // A thread can only wait on one lock; if copies taken at different
        // moments disagree, the youngest attempt is the current one.
        let mut awaiting: HashMap<ThreadId, AttemptSnapshot> = HashMap::new();
        for attempt in locks.iter().flat_map(|lock| lock.waiters.iter()) {
            match awaiting.get(&attempt.thread) {
                Some(seen) if seen.waiting_ms <= attempt.waiting_ms => {}
                _ => {
                    awaiting.insert(attempt.thread, attempt.clone());
                }
            }
        }
        for thread in &mut threads {
            thread.awaiting = awaiting.remove(&thread.id);
        }

        RegistrySnapshot {
            taken_unix_ms: unix_ms(taken),
            locks,
            threads,
        }
    }

    pub fn detect_deadlocks(&self) -> Vec<DeadlockedThread> {
        let snapshot = self.snapshot();
        WaitGraph::new(&snapshot, self.config.deadlock_threshold).deadlocked()
    }

    /// Log every deadlocked thread and return how many there are.
    pub fn report_deadlocks(&self) -> usize {
        let found = self.detect_deadlocks();
        for stuck in &found {
            error!(
                thread = %stuck.thread,
                thread_name = %stuck.thread_name,
                lock = %stuck.lock,
                lock_name = %stuck.lock_name,
                holder = %stuck.holder,
                holder_name = %stuck.holder_name,
                waiting_ms = stuck.waiting_ms,
                site = %stuck.site,
                "deadlock: thread is waiting on a lock held by a thread that will never release it"
            );
        }
        found.len()
    }

    pub fn list_locks(&self, filter: LockFilter, sort: SortKey) -> String {
        report::list_locks(&self.snapshot(), filter, sort)
    }

    pub fn list_threads(&self, filter: ThreadFilter, sort: SortKey) -> String {
        report::list_threads(&self.snapshot(), filter, sort)
    }

    // ── lifecycle ────────────────────────────────────────────

    /// Start the background detector if the config asks for one.
    pub fn start_watchdog(self: &Arc<Self>) -> SyncResult<Option<TrackedThread<()>>> {
        let Some(interval) = self.config.watchdog_interval else {
            return Ok(None);
        };
        let cx = Arc::clone(self);
        let handle = self.spawn("tangle-watchdog", Site::caller(), move || {
            info!(interval_ms = duration_ms(interval), "deadlock watchdog started");
            while cx.sleep_unless_shutdown(interval) {
                let count = cx.report_deadlocks();
                if count > 0 {
                    warn!(count, "watchdog found deadlocked threads");
                }
            }
            debug!("deadlock watchdog stopped");
        })?;
        Ok(Some(handle))
    }

    /// Returns false once shutdown has begun.
    fn sleep_unless_shutdown(&self, interval: Duration) -> bool {
        let mut guard = self.shutdown_lock.lock();
        if self.is_shutting_down() {
            return false;
        }
        let _ = self.shutdown_signal.wait_for(&mut guard, interval);
        !self.is_shutting_down()
    }

    /// From here on, exiting threads are not scanned for abandoned locks and
    /// the watchdog stops.
    pub fn begin_shutdown(&self) {
        let _guard = self.shutdown_lock.lock();
        self.shutting_down.store(true, Ordering::Release);
        self.shutdown_signal.notify_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests;
