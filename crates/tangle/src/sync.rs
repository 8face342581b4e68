//! Typed wrappers that own their data and release on drop.
//!
//! These sit on top of the id-based [`SyncContext`] calls: each wrapper
//! initializes a fresh lock under its own id and destroys it when dropped.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tangle_types::{CondvarId, LockId};

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::provider::Acquired;
use crate::site::Site;

/// Guards hold a lock on behalf of one thread and must be released there.
type NotSend = PhantomData<*const ()>;

pub struct Mutex<T> {
    cx: Arc<SyncContext>,
    id: LockId,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by the tracked lock `id`.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    acquired: Acquired,
    site: Site,
    _not_send: NotSend,
}

impl<T> Mutex<T> {
    #[track_caller]
    pub fn new(cx: &Arc<SyncContext>, name: &str, value: T) -> SyncResult<Self> {
        let id = cx.create_lock(name, Site::caller())?;
        Ok(Self {
            cx: Arc::clone(cx),
            id,
            value: UnsafeCell::new(value),
        })
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    #[track_caller]
    pub fn lock(&self) -> SyncResult<MutexGuard<'_, T>> {
        let site = Site::caller();
        let acquired = self.cx.obtain(self.id, site)?;
        Ok(self.guard(acquired, site))
    }

    #[track_caller]
    pub fn try_lock(&self) -> SyncResult<MutexGuard<'_, T>> {
        let site = Site::caller();
        let acquired = self.cx.try_obtain(self.id, site)?;
        Ok(self.guard(acquired, site))
    }

    fn guard(&self, acquired: Acquired, site: Site) -> MutexGuard<'_, T> {
        MutexGuard {
            mutex: self,
            acquired,
            site,
            _not_send: PhantomData,
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        let _ = self.cx.destroy_lock(self.id, Site::caller());
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<T> MutexGuard<'_, T> {
    /// Whether this acquisition took over a lock whose previous holder exited
    /// without releasing it. The protected value may need re-validation.
    pub fn recovered(&self) -> bool {
        self.acquired.is_recovered()
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the tracked lock is held.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the tracked lock is held exclusively.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // Failures are logged by the registry.
        let _ = self.mutex.cx.release(self.mutex.id, self.site);
    }
}

pub struct RwLock<T> {
    cx: Arc<SyncContext>,
    id: LockId,
    value: UnsafeCell<T>,
}

// SAFETY: readers only get `&T`, so sharing needs `T: Sync`; writers are exclusive.
unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
    site: Site,
    _not_send: NotSend,
}

pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
    site: Site,
    _not_send: NotSend,
}

impl<T> RwLock<T> {
    #[track_caller]
    pub fn new(cx: &Arc<SyncContext>, name: &str, value: T) -> SyncResult<Self> {
        let id = cx.create_rwlock(name, Site::caller())?;
        Ok(Self {
            cx: Arc::clone(cx),
            id,
            value: UnsafeCell::new(value),
        })
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    #[track_caller]
    pub fn read(&self) -> SyncResult<RwLockReadGuard<'_, T>> {
        let site = Site::caller();
        self.cx.obtain_read(self.id, site)?;
        Ok(RwLockReadGuard {
            lock: self,
            site,
            _not_send: PhantomData,
        })
    }

    #[track_caller]
    pub fn try_read(&self) -> SyncResult<RwLockReadGuard<'_, T>> {
        let site = Site::caller();
        self.cx.try_read(self.id, site)?;
        Ok(RwLockReadGuard {
            lock: self,
            site,
            _not_send: PhantomData,
        })
    }

    #[track_caller]
    pub fn write(&self) -> SyncResult<RwLockWriteGuard<'_, T>> {
        let site = Site::caller();
        self.cx.obtain_write(self.id, site)?;
        Ok(RwLockWriteGuard {
            lock: self,
            site,
            _not_send: PhantomData,
        })
    }

    #[track_caller]
    pub fn try_write(&self) -> SyncResult<RwLockWriteGuard<'_, T>> {
        let site = Site::caller();
        self.cx.try_write(self.id, site)?;
        Ok(RwLockWriteGuard {
            lock: self,
            site,
            _not_send: PhantomData,
        })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

impl<T> Drop for RwLock<T> {
    fn drop(&mut self) {
        let _ = self.cx.destroy_lock(self.id, Site::caller());
    }
}

impl<T> fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLock").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a shared hold excludes writers.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        let _ = self.lock.cx.release(self.lock.id, self.site);
    }
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the write hold is exclusive.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the write hold is exclusive.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        let _ = self.lock.cx.release(self.lock.id, self.site);
    }
}

/// A condition variable bound to one [`Mutex`].
pub struct Condvar {
    cx: Arc<SyncContext>,
    id: CondvarId,
    lock: LockId,
}

impl Condvar {
    #[track_caller]
    pub fn new<T>(mutex: &Mutex<T>, name: &str) -> SyncResult<Self> {
        let id = mutex.cx.create_condvar(mutex.id, name, Site::caller())?;
        Ok(Self {
            cx: Arc::clone(&mutex.cx),
            id,
            lock: mutex.id,
        })
    }

    /// Sleep until signalled. `guard` must come from the bound mutex.
    #[track_caller]
    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>) -> SyncResult<()> {
        self.check(guard)?;
        guard.acquired = self.cx.wait(self.id, Site::caller())?;
        Ok(())
    }

    /// Returns `Ok(false)` if `timeout` elapsed first. The guard holds the lock
    /// again either way.
    #[track_caller]
    pub fn wait_timeout<T>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        timeout: Duration,
    ) -> SyncResult<bool> {
        self.check(guard)?;
        match self.cx.timed_wait(self.id, timeout, Site::caller()) {
            Ok(acquired) => {
                guard.acquired = acquired;
                Ok(true)
            }
            Err(SyncError::Timeout) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn check<T>(&self, guard: &MutexGuard<'_, T>) -> SyncResult<()> {
        if guard.mutex.id == self.lock {
            Ok(())
        } else {
            Err(SyncError::Native(crate::provider::NativeError::NotOwner { holder: None }))
        }
    }

    #[track_caller]
    pub fn notify_one(&self) -> SyncResult<()> {
        self.cx.signal(self.id, Site::caller())
    }

    #[track_caller]
    pub fn notify_all(&self) -> SyncResult<()> {
        self.cx.broadcast(self.id, Site::caller())
    }
}

impl Drop for Condvar {
    fn drop(&mut self) {
        let _ = self.cx.destroy_condvar(self.id, Site::caller());
    }
}
