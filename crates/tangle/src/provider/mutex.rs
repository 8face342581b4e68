use parking_lot::{Condvar, Mutex};
use tangle_types::ThreadId;

use super::{Acquired, NativeError, current_id};

pub(super) struct MutexState {
    pub(super) holder: Option<ThreadId>,
    owner_died: bool,
}

impl MutexState {
    pub(super) fn take(&mut self, me: ThreadId) -> Acquired {
        self.holder = Some(me);
        if std::mem::take(&mut self.owner_died) {
            Acquired::Recovered
        } else {
            Acquired::Clean
        }
    }
}

/// Error-checking, robust, non-recursive mutex.
///
/// Re-locking from the holding thread blocks forever, the same as a default
/// pthread mutex; the deadlock detector reports it as a self-cycle.
pub struct NativeMutex {
    pub(super) state: Mutex<MutexState>,
    pub(super) released: Condvar,
}

impl Default for NativeMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeMutex {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MutexState {
                holder: None,
                owner_died: false,
            }),
            released: Condvar::new(),
        }
    }

    pub fn lock(&self) -> Acquired {
        let me = current_id();
        let mut state = self.state.lock();
        while state.holder.is_some() {
            self.released.wait(&mut state);
        }
        state.take(me)
    }

    pub fn try_lock(&self) -> Option<Acquired> {
        let me = current_id();
        let mut state = self.state.lock();
        if state.holder.is_some() {
            return None;
        }
        Some(state.take(me))
    }

    pub fn unlock(&self) -> Result<(), NativeError> {
        let me = current_id();
        let mut state = self.state.lock();
        match state.holder {
            None => Err(NativeError::NotLocked),
            Some(holder) if holder != me => Err(NativeError::NotOwner {
                holder: Some(holder),
            }),
            Some(_) => {
                state.holder = None;
                drop(state);
                self.released.notify_one();
                Ok(())
            }
        }
    }

    /// Release on behalf of `holder`, which has gone away. The next acquirer
    /// sees [`Acquired::Recovered`]. Returns false if `holder` no longer held it.
    pub fn abandon(&self, holder: ThreadId) -> bool {
        let mut state = self.state.lock();
        if state.holder != Some(holder) {
            return false;
        }
        state.holder = None;
        state.owner_died = true;
        drop(state);
        self.released.notify_one();
        true
    }

    pub fn holder(&self) -> Option<ThreadId> {
        self.state.lock().holder
    }
}
