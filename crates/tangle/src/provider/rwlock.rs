use parking_lot::{Condvar, Mutex};
use tangle_types::ThreadId;

use super::{Acquired, NativeError, current_id};

struct RwState {
    writer: Option<ThreadId>,
    /// One entry per shared hold; a thread may appear more than once.
    readers: Vec<ThreadId>,
    owner_died: bool,
}

impl RwState {
    fn recovered(&mut self) -> Acquired {
        if std::mem::take(&mut self.owner_died) {
            Acquired::Recovered
        } else {
            Acquired::Clean
        }
    }
}

/// Reader-preferring reader/writer lock with error-checking unlock.
pub struct NativeRwLock {
    state: Mutex<RwState>,
    changed: Condvar,
}

impl Default for NativeRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeRwLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RwState {
                writer: None,
                readers: Vec::new(),
                owner_died: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn read(&self) -> Acquired {
        let me = current_id();
        let mut state = self.state.lock();
        while state.writer.is_some() {
            self.changed.wait(&mut state);
        }
        state.readers.push(me);
        state.recovered()
    }

    pub fn try_read(&self) -> Option<Acquired> {
        let me = current_id();
        let mut state = self.state.lock();
        if state.writer.is_some() {
            return None;
        }
        state.readers.push(me);
        Some(state.recovered())
    }

    pub fn write(&self) -> Acquired {
        let me = current_id();
        let mut state = self.state.lock();
        while state.writer.is_some() || !state.readers.is_empty() {
            self.changed.wait(&mut state);
        }
        state.writer = Some(me);
        state.recovered()
    }

    pub fn try_write(&self) -> Option<Acquired> {
        let me = current_id();
        let mut state = self.state.lock();
        if state.writer.is_some() || !state.readers.is_empty() {
            return None;
        }
        state.writer = Some(me);
        Some(state.recovered())
    }

    /// Releases whichever mode the calling thread holds; exclusive first.
    pub fn unlock(&self) -> Result<(), NativeError> {
        let me = current_id();
        let mut state = self.state.lock();
        if state.writer == Some(me) {
            state.writer = None;
        } else if let Some(pos) = state.readers.iter().position(|r| *r == me) {
            state.readers.swap_remove(pos);
        } else if state.writer.is_some() || !state.readers.is_empty() {
            return Err(NativeError::NotOwner {
                holder: state.writer,
            });
        } else {
            return Err(NativeError::NotLocked);
        }
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    /// Release an exclusive hold on behalf of `holder`, which has gone away.
    pub fn abandon(&self, holder: ThreadId) -> bool {
        let mut state = self.state.lock();
        if state.writer != Some(holder) {
            return false;
        }
        state.writer = None;
        state.owner_died = true;
        drop(state);
        self.changed.notify_all();
        true
    }

    pub fn is_locked(&self) -> bool {
        let state = self.state.lock();
        state.writer.is_some() || !state.readers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn readers_share_and_exclude_writers() {
        let lock = NativeRwLock::new();
        assert_eq!(lock.read(), Acquired::Clean);
        assert_eq!(lock.try_read(), Some(Acquired::Clean));
        assert_eq!(lock.try_write(), None);
        lock.unlock().expect("first read unlock");
        lock.unlock().expect("second read unlock");
        assert_eq!(lock.try_write(), Some(Acquired::Clean));
        assert_eq!(lock.try_read(), None);
        lock.unlock().expect("write unlock");
        assert!(!lock.is_locked());
        assert_eq!(lock.unlock(), Err(NativeError::NotLocked));
    }

    #[test]
    fn writer_waits_for_reader_to_leave() {
        let lock = Arc::new(NativeRwLock::new());
        lock.read();
        let writer = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                lock.write();
                lock.unlock().expect("writer unlock");
            })
        };
        std::thread::sleep(Duration::from_millis(30));
        assert!(!writer.is_finished());
        lock.unlock().expect("reader unlock");
        writer.join().expect("writer panicked");
    }
}
