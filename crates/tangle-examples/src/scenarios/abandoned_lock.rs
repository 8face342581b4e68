use std::sync::Arc;

use tangle::{Site, SyncContext};

use super::print_state;
use crate::{AnyResult, Output};

pub fn run(cx: &Arc<SyncContext>, out: &Output) -> AnyResult<()> {
    let device = cx
        .create_lock("demo.device.registers", Site::caller())
        .map_err(|e| e.to_string())?;

    let worker_cx = Arc::clone(cx);
    cx.spawn("device.worker", Site::caller(), move || {
        worker_cx.obtain(device, Site::caller())?;
        println!("device.worker holds {device} and exits without releasing it");
        Ok::<(), tangle::SyncError>(())
    })
    .map_err(|e| e.to_string())?
    .join()
    .map_err(|e| e.to_string())?
    .map_err(|e| e.to_string())?;

    for abandoned in cx.recent_abandonments() {
        println!(
            "{} ({}) exited holding {} ({}) for {}ms, acquired at {}",
            abandoned.thread_name,
            abandoned.thread,
            abandoned.lock_name,
            abandoned.lock,
            abandoned.held_ms,
            abandoned.acquired_site
        );
    }

    let acquired = cx.obtain(device, Site::caller()).map_err(|e| e.to_string())?;
    if acquired.is_recovered() {
        println!("main took over {device}; protected state needs re-validation");
    }
    print_state(cx, out)?;
    cx.release(device, Site::caller()).map_err(|e| e.to_string())
}
