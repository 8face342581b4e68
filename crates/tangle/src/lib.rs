//! Tracked locks, threads, and condition variables for emulator worker threads.
//!
//! Every lock, thread, and condition variable is created through a
//! [`SyncContext`], which records who holds what, who is waiting for what, and
//! where in the source each of those happened. That bookkeeping feeds:
//!
//! - **Deadlock detection**: a wait-for-graph walk over a consistent
//!   [`RegistrySnapshot`], on demand or from a background watchdog
//! - **Abandoned-lock reports**: a thread that exits holding a lock is logged,
//!   and the lock is handed to its next acquirer marked as recovered
//! - **Operator listings**: [`SyncContext::list_locks`] and
//!   [`SyncContext::list_threads`] with filtering and sorting
//!
//! ```no_run
//! use tangle::{Config, Site, SyncContext};
//!
//! let cx = SyncContext::new(Config::from_env().unwrap_or_default());
//! let tlb = cx.create_lock("tlb", Site::caller())?;
//! cx.obtain(tlb, Site::caller())?;
//! cx.release(tlb, Site::caller())?;
//! # Ok::<(), tangle::SyncError>(())
//! ```

pub mod provider;
pub mod sync;

mod condvar;
mod config;
mod context;
mod detect;
mod error;
mod locks;
mod report;
mod site;
mod threads;

pub use config::{
    ABANDONED_HISTORY_ENV, Config, ConfigError, DEADLOCK_THRESHOLD_ENV, SLOW_WAIT_ENV,
    WATCHDOG_ENV,
};
pub use context::SyncContext;
pub use detect::WaitGraph;
pub use error::{Resource, SyncError, SyncResult};
pub use locks::Access;
pub use provider::{Acquired, NativeError};
pub use report::{list_locks, list_threads};
pub use site::Site;
pub use threads::TrackedThread;

pub use tangle_types::*;
