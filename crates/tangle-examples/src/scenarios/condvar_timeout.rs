use std::sync::Arc;
use std::time::{Duration, Instant};

use tangle::{Site, SyncContext, SyncError};

use super::print_state;
use crate::{AnyResult, Output};

pub fn run(cx: &Arc<SyncContext>, out: &Output) -> AnyResult<()> {
    let queue = cx
        .create_lock("demo.irq.queue", Site::caller())
        .map_err(|e| e.to_string())?;
    let pending = cx
        .create_condvar(queue, "demo.irq.pending", Site::caller())
        .map_err(|e| e.to_string())?;

    cx.obtain(queue, Site::caller()).map_err(|e| e.to_string())?;
    let start = Instant::now();
    match cx.timed_wait(pending, Duration::from_millis(200), Site::caller()) {
        Err(SyncError::Timeout) => println!(
            "no interrupt arrived; timed wait returned after {}ms holding {queue} again: {}",
            start.elapsed().as_millis(),
            cx.have(queue).map_err(|e| e.to_string())?
        ),
        Ok(_) => println!("woken by a signal nobody sent"),
        Err(err) => return Err(err.to_string()),
    }
    print_state(cx, out)?;
    cx.release(queue, Site::caller()).map_err(|e| e.to_string())
}
