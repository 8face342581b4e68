//! Native thread and lock primitives.
//!
//! Everything above this module talks to the host through here. Locks and
//! condition variables are small state machines over `parking_lot`, which
//! gives us error-checking unlock (a thread cannot release a lock it does not
//! hold) and robust recovery (a lock abandoned by a dead owner is handed to the
//! next acquirer with [`Acquired::Recovered`]) without any unsafe code.

mod condvar;
mod mutex;
mod rwlock;

pub use condvar::{NativeCondvar, Waited};
pub use mutex::NativeMutex;
pub use rwlock::NativeRwLock;

use std::cell::Cell;
use std::error::Error;
use std::fmt;
use std::io;

use tangle_types::ThreadId;

thread_local! {
    static CURRENT: Cell<Option<ThreadId>> = const { Cell::new(None) };
    static RETIRED: Cell<bool> = const { Cell::new(false) };
}

/// Highest value on the abstract priority scale; `0` is the lowest.
pub const MAX_PRIORITY: u8 = 15;

/// How an acquisition succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Clean,
    /// The previous owner went away while holding the lock. Ownership now
    /// belongs to the caller, but the protected state may be inconsistent.
    Recovered,
}

impl Acquired {
    pub fn is_recovered(self) -> bool {
        matches!(self, Self::Recovered)
    }
}

/// Failure reported by a native primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeError {
    /// Unlock of a lock nobody holds.
    NotLocked,
    /// The calling thread is not the holder.
    NotOwner { holder: Option<ThreadId> },
    /// The host rejected the request with this errno.
    Os(i32),
    Unsupported(&'static str),
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotLocked => write!(f, "lock is not held"),
            Self::NotOwner { holder: Some(holder) } => {
                write!(f, "calling thread does not hold the lock (held by {holder})")
            }
            Self::NotOwner { holder: None } => {
                write!(f, "calling thread does not hold the lock")
            }
            Self::Os(code) => write!(f, "{}", io::Error::from_raw_os_error(*code)),
            Self::Unsupported(what) => write!(f, "{what} is not supported on this platform"),
        }
    }
}

impl Error for NativeError {}

/// Id of the calling thread, allocated on first use.
pub fn current_id() -> ThreadId {
    CURRENT.with(|cell| match cell.get() {
        Some(id) => id,
        None => {
            let id = ThreadId::next();
            cell.set(Some(id));
            id
        }
    })
}

/// Make the calling thread answer to `id`. Used by the spawn wrapper so a
/// thread runs under the id its record was created with.
pub(crate) fn adopt(id: ThreadId) {
    CURRENT.with(|cell| cell.set(Some(id)));
}

pub fn is_current(id: ThreadId) -> bool {
    current_id() == id
}

/// Mark the calling thread as deregistered. It may still release what it
/// holds but may not acquire anything new.
pub(crate) fn set_retired(retired: bool) {
    RETIRED.with(|cell| cell.set(retired));
}

pub(crate) fn is_retired() -> bool {
    RETIRED.with(Cell::get)
}

pub(crate) fn spawn<F, T>(name: &str, f: F) -> io::Result<std::thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new().name(name.to_owned()).spawn(f)
}

/// Set the calling thread's priority on the `0..=MAX_PRIORITY` scale.
#[cfg(unix)]
pub fn set_priority(priority: u8) -> Result<(), NativeError> {
    let priority = priority.min(MAX_PRIORITY);
    let (policy, mut param) = sched_param()?;
    let (min, max) = priority_range(policy)?;
    param.sched_priority = min + (i32::from(priority) * (max - min)) / i32::from(MAX_PRIORITY);
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), policy, &param) };
    if rc != 0 {
        return Err(NativeError::Os(rc));
    }
    Ok(())
}

/// The calling thread's priority on the `0..=MAX_PRIORITY` scale.
///
/// Policies with a single native level (Linux `SCHED_OTHER`) always read back as `0`.
#[cfg(unix)]
pub fn priority() -> Result<u8, NativeError> {
    let (policy, param) = sched_param()?;
    let (min, max) = priority_range(policy)?;
    if max <= min {
        return Ok(0);
    }
    let scaled = ((param.sched_priority - min) * i32::from(MAX_PRIORITY)) / (max - min);
    Ok(scaled.clamp(0, i32::from(MAX_PRIORITY)) as u8)
}

#[cfg(unix)]
fn sched_param() -> Result<(libc::c_int, libc::sched_param), NativeError> {
    let mut policy: libc::c_int = 0;
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::pthread_getschedparam(libc::pthread_self(), &mut policy, &mut param) };
    if rc != 0 {
        return Err(NativeError::Os(rc));
    }
    Ok((policy, param))
}

#[cfg(unix)]
fn priority_range(policy: libc::c_int) -> Result<(i32, i32), NativeError> {
    let min = unsafe { libc::sched_get_priority_min(policy) };
    let max = unsafe { libc::sched_get_priority_max(policy) };
    if min < 0 || max < 0 {
        return Err(NativeError::Os(io::Error::last_os_error().raw_os_error().unwrap_or(0)));
    }
    Ok((min, max))
}

#[cfg(not(unix))]
pub fn set_priority(_priority: u8) -> Result<(), NativeError> {
    Err(NativeError::Unsupported("thread priority"))
}

#[cfg(not(unix))]
pub fn priority() -> Result<u8, NativeError> {
    Err(NativeError::Unsupported("thread priority"))
}
