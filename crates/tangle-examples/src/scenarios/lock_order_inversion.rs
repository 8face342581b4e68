use std::sync::{Arc, Barrier};

use tangle::{LockId, Site, SyncContext};

use super::{print_state, wait_until};
use crate::{AnyResult, Output};

fn spawn_lock_order_worker(
    cx: &Arc<SyncContext>,
    thread_name: &'static str,
    first: LockId,
    second: LockId,
    ready_barrier: Arc<Barrier>,
) -> AnyResult<()> {
    let worker_cx = Arc::clone(cx);
    let handle = cx
        .spawn(thread_name, Site::caller(), move || {
            if worker_cx.obtain(first, Site::caller()).is_err() {
                return;
            }
            println!("{thread_name} locked {first}; waiting for peer");

            ready_barrier.wait();

            println!("{thread_name} attempting {second}; lock-order inversion deadlocks here");
            if worker_cx.obtain(second, Site::caller()).is_ok() {
                println!("{thread_name} unexpectedly acquired {second}; deadlock did not occur");
                let _ = worker_cx.release(second, Site::caller());
            }
            let _ = worker_cx.release(first, Site::caller());
        })
        .map_err(|e| e.to_string())?;
    handle.detach();
    Ok(())
}

pub fn run(cx: &Arc<SyncContext>, out: &Output) -> AnyResult<()> {
    let left = cx
        .create_lock("demo.shared.left", Site::caller())
        .map_err(|e| e.to_string())?;
    let right = cx
        .create_lock("demo.shared.right", Site::caller())
        .map_err(|e| e.to_string())?;
    let ready_barrier = Arc::new(Barrier::new(2));

    spawn_lock_order_worker(cx, "deadlock.worker.alpha", left, right, Arc::clone(&ready_barrier))?;
    spawn_lock_order_worker(cx, "deadlock.worker.beta", right, left, ready_barrier)?;

    let threshold = cx.config().deadlock_threshold;
    println!(
        "two tracked threads should deadlock on demo.shared.left/right; \
         waiting past the {}ms threshold",
        threshold.as_millis()
    );

    let limit = threshold * 4 + std::time::Duration::from_secs(2);
    if !wait_until(limit, || !cx.detect_deadlocks().is_empty()) {
        return Err("deadlock was not detected".to_owned());
    }

    let count = cx.report_deadlocks();
    println!("{count} deadlocked threads");
    print_state(cx, out)
}
