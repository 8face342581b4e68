use std::time::Instant;

use parking_lot::Condvar;

use super::{Acquired, NativeError, NativeMutex, current_id};

/// How a condition wait ended. The mutex is held again in both cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waited {
    pub timed_out: bool,
    pub acquired: Acquired,
}

/// Condition variable paired with [`NativeMutex`].
///
/// A condvar must only ever be waited on with one mutex. `parking_lot`
/// condvars do not wake spuriously, so an untimed-out return means a signal.
pub struct NativeCondvar {
    cond: Condvar,
}

impl Default for NativeCondvar {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeCondvar {
    pub fn new() -> Self {
        Self {
            cond: Condvar::new(),
        }
    }

    /// Atomically release `mutex` and wait; re-acquire before returning.
    pub fn wait(
        &self,
        mutex: &NativeMutex,
        deadline: Option<Instant>,
    ) -> Result<Waited, NativeError> {
        let timed_out = self.wait_released(mutex, deadline)?;
        Ok(Waited {
            timed_out,
            acquired: mutex.lock(),
        })
    }

    /// Atomically release `mutex` and wait, returning whether the deadline
    /// passed. The mutex is *not* re-acquired; the caller does that.
    pub fn wait_released(
        &self,
        mutex: &NativeMutex,
        deadline: Option<Instant>,
    ) -> Result<bool, NativeError> {
        let me = current_id();
        let mut state = mutex.state.lock();
        if state.holder != Some(me) {
            return Err(NativeError::NotOwner {
                holder: state.holder,
            });
        }
        state.holder = None;
        mutex.released.notify_one();

        let timed_out = match deadline {
            Some(deadline) => self.cond.wait_until(&mut state, deadline).timed_out(),
            None => {
                self.cond.wait(&mut state);
                false
            }
        };
        Ok(timed_out)
    }

    pub fn signal(&self) {
        self.cond.notify_one();
    }

    pub fn broadcast(&self) {
        self.cond.notify_all();
    }
}
