use std::error::Error;
use std::fmt;
use std::io;

use tangle_types::{CondvarId, LockId, LockKind, ThreadId};

use crate::provider::NativeError;

/// A tracked object named in an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Lock(LockId),
    Thread(ThreadId),
    Condvar(CondvarId),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lock(id) => fmt::Display::fmt(id, f),
            Self::Thread(id) => fmt::Display::fmt(id, f),
            Self::Condvar(id) => fmt::Display::fmt(id, f),
        }
    }
}

#[derive(Debug)]
pub enum SyncError {
    /// A non-blocking attempt found the lock held. Expected, not a fault.
    Busy,
    /// A bounded wait expired. Expected, not a fault.
    Timeout,
    AlreadyExists(Resource),
    NotInitialized(Resource),
    /// A mutex operation on a reader/writer lock, or the reverse.
    WrongKind { lock: LockId, kind: LockKind },
    Native(NativeError),
    Spawn(io::Error),
    /// A joined thread unwound instead of returning.
    Panicked { thread: ThreadId },
}

impl SyncError {
    /// Busy and Timeout are ordinary outcomes of bounded operations.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Busy | Self::Timeout)
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "lock is busy"),
            Self::Timeout => write!(f, "wait timed out"),
            Self::AlreadyExists(what) => write!(f, "{what} is already initialized"),
            Self::NotInitialized(what) => write!(f, "{what} is not initialized"),
            Self::WrongKind { lock, kind } => {
                write!(f, "{lock} is a {kind:?} and does not support this operation")
            }
            Self::Native(err) => write!(f, "native primitive failed: {err}"),
            Self::Spawn(err) => write!(f, "failed to spawn thread: {err}"),
            Self::Panicked { thread } => write!(f, "{thread} panicked"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Native(err) => Some(err),
            Self::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NativeError> for SyncError {
    fn from(err: NativeError) -> Self {
        Self::Native(err)
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
