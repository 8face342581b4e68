use std::sync::Arc;
use std::time::Duration;

use tangle::{Site, SyncContext, ThreadFilter};

use super::{print_state, wait_until};
use crate::{AnyResult, Output};

const WORKERS: usize = 4;
const ROUNDS: usize = 2;

/// Several threads queue on one slow lock. Waits pass the detection threshold,
/// but nothing here is a cycle.
pub fn run(cx: &Arc<SyncContext>, out: &Output) -> AnyResult<()> {
    let bus = cx
        .create_lock("demo.memory.bus", Site::caller())
        .map_err(|e| e.to_string())?;
    let hold = cx.config().deadlock_threshold / 2;

    let mut workers = Vec::with_capacity(WORKERS);
    for i in 0..WORKERS {
        let worker_cx = Arc::clone(cx);
        let handle = cx
            .spawn(&format!("cpu{i}"), Site::caller(), move || {
                for _ in 0..ROUNDS {
                    worker_cx.obtain(bus, Site::caller())?;
                    std::thread::sleep(hold);
                    worker_cx.release(bus, Site::caller())?;
                }
                Ok::<(), tangle::SyncError>(())
            })
            .map_err(|e| e.to_string())?;
        workers.push(handle);
    }

    wait_until(Duration::from_secs(2), || {
        cx.snapshot().threads.iter().any(|t| t.awaiting.is_some())
    });
    print!("{}", cx.list_threads(ThreadFilter::Waiting, out.sort));
    print_state(cx, out)?;

    let mut false_positives = 0;
    while workers.iter().any(|w| !w.is_finished()) {
        false_positives += cx.report_deadlocks();
        std::thread::sleep(Duration::from_millis(50));
    }
    for worker in workers {
        worker
            .join()
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;
    }

    println!("contention finished; {false_positives} deadlock reports (expected 0)");
    Ok(())
}
