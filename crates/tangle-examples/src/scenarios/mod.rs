pub mod abandoned_lock;
pub mod condvar_timeout;
pub mod contention;
pub mod lock_order_inversion;

use std::time::{Duration, Instant};

use tangle::{LockFilter, SyncContext, ThreadFilter};

use crate::{AnyResult, Output};

/// Print the current lock and thread tables, or the whole snapshot as JSON.
pub(crate) fn print_state(cx: &SyncContext, out: &Output) -> AnyResult<()> {
    if out.json {
        println!("{}", cx.snapshot().to_json()?);
        return Ok(());
    }
    println!("locks:");
    print!("{}", cx.list_locks(LockFilter::All, out.sort));
    println!("threads:");
    print!("{}", cx.list_threads(ThreadFilter::All, out.sort));
    Ok(())
}

/// Poll `check` every 20ms until it holds or `limit` passes.
pub(crate) fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}
