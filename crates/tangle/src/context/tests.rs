use std::collections::HashSet;
use std::sync::Barrier;
use std::sync::atomic::{AtomicBool, AtomicUsize};

use super::*;

fn context() -> Arc<SyncContext> {
    SyncContext::new(
        Config::default()
            .with_deadlock_threshold(Duration::from_millis(50))
            .with_slow_wait_threshold(Duration::from_secs(60)),
    )
}

/// Poll `check` until it yields something or five seconds pass.
fn eventually<T>(mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(found) = check() {
            return Some(found);
        }
        if Instant::now() > deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn obtain_gives_mutual_exclusion() {
    let cx = context();
    let lock = cx.create_lock("counter", Site::caller()).expect("create");
    let inside = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let cx2 = Arc::clone(&cx);
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            cx.spawn(&format!("worker{i}"), Site::caller(), move || {
                for _ in 0..50 {
                    cx2.obtain(lock, Site::caller()).expect("obtain");
                    if inside.swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    std::thread::yield_now();
                    inside.store(false, Ordering::SeqCst);
                    cx2.release(lock, Site::caller()).expect("release");
                }
            })
            .expect("spawn")
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(!cx.test(lock).expect("test"));
    assert_eq!(cx.thread_count(), 0);
}

#[test]
fn second_initialization_leaves_the_holder_alone() {
    let cx = context();
    let lock = LockId::next();
    cx.initialize_lock(lock, "intlock", Site::caller()).expect("init");
    cx.obtain(lock, Site::caller()).expect("obtain");

    for _ in 0..2 {
        assert!(matches!(
            cx.initialize_lock(lock, "intlock-again", Site::caller()),
            Err(SyncError::AlreadyExists(Resource::Lock(id))) if id == lock
        ));
    }
    assert!(cx.have(lock).expect("have"));
    let snapshot = cx.snapshot();
    assert_eq!(snapshot.lock(lock).map(|l| l.name.as_str()), Some("intlock"));
    cx.release(lock, Site::caller()).expect("release");
}

#[test]
fn destroyed_lock_is_uninitialized() {
    let cx = context();
    let lock = cx.create_lock("scratch", Site::caller()).expect("create");
    cx.destroy_lock(lock, Site::caller()).expect("destroy");
    assert!(matches!(
        cx.obtain(lock, Site::caller()),
        Err(SyncError::NotInitialized(Resource::Lock(_)))
    ));
    assert!(matches!(
        cx.destroy_lock(lock, Site::caller()),
        Err(SyncError::NotInitialized(_))
    ));
    assert_eq!(cx.lock_count(), 0);
}

#[test]
fn try_obtain_is_busy_while_another_thread_holds() {
    let cx = context();
    let lock = cx.create_lock("busy", Site::caller()).expect("create");
    cx.obtain(lock, Site::caller()).expect("obtain");

    let cx2 = Arc::clone(&cx);
    let result = cx
        .spawn("contender", Site::caller(), move || {
            let busy = cx2.try_obtain(lock, Site::caller());
            (busy.is_err_and(|e| e.is_expected()), cx2.have(lock).expect("have"))
        })
        .expect("spawn")
        .join()
        .expect("join");
    assert_eq!(result, (true, false));
    cx.release(lock, Site::caller()).expect("release");
}

#[test]
fn lock_order_inversion_is_detected() {
    let cx = context();
    let a = cx.create_lock("a", Site::caller()).expect("create a");
    let b = cx.create_lock("b", Site::caller()).expect("create b");
    let barrier = Arc::new(Barrier::new(2));

    let mut ids = Vec::new();
    for (name, first, second) in [("left", a, b), ("right", b, a)] {
        let cx2 = Arc::clone(&cx);
        let barrier = Arc::clone(&barrier);
        let handle = cx
            .spawn(name, Site::caller(), move || {
                cx2.obtain(first, Site::caller()).expect("first");
                barrier.wait();
                let _ = cx2.obtain(second, Site::caller());
            })
            .expect("spawn");
        ids.push(handle.id());
        // Both threads stay blocked for the rest of the process.
        handle.detach();
    }

    let found = eventually(|| {
        let found = cx.detect_deadlocks();
        (found.len() == 2).then_some(found)
    })
    .expect("deadlock should be reported");
    assert_eq!(found[0].thread, ids[0]);
    assert_eq!(found[0].lock, b);
    assert_eq!(found[0].holder, ids[1]);
    assert_eq!(found[0].holder_name, "right");
    assert_eq!(found[1].thread, ids[1]);
    assert_eq!(found[1].lock, a);
    assert_eq!(found[1].holder, ids[0]);
    assert_eq!(cx.report_deadlocks(), 2);

    let waiting = cx.list_threads(ThreadFilter::Waiting, SortKey::Name);
    assert!(waiting.contains("left"));
    assert!(waiting.contains("right"));
    let held = cx.list_locks(LockFilter::HeldBy(ids[0]), SortKey::Name);
    assert!(held.contains(&a.to_string()));
    assert!(!held.contains(&b.to_string()));
}

#[test]
fn long_contention_without_a_cycle_is_not_a_deadlock() {
    let cx = context();
    let lock = cx.create_lock("slow", Site::caller()).expect("create");
    cx.obtain(lock, Site::caller()).expect("obtain");

    let cx2 = Arc::clone(&cx);
    let waiter = cx
        .spawn("waiter", Site::caller(), move || {
            cx2.obtain(lock, Site::caller()).expect("obtain");
            cx2.release(lock, Site::caller()).expect("release");
        })
        .expect("spawn");

    // Well past the threshold, but the holder is not waiting on anything.
    let stalled = eventually(|| {
        let snapshot = cx.snapshot();
        let waiting = snapshot.thread(waiter.id())?.awaiting.as_ref()?.waiting_ms;
        (waiting >= 100).then_some(())
    });
    assert!(stalled.is_some());
    assert!(cx.detect_deadlocks().is_empty());

    cx.release(lock, Site::caller()).expect("release");
    waiter.join().expect("waiter panicked");
}

#[test]
fn exiting_while_holding_reports_an_abandoned_lock() {
    let cx = context();
    let lock = cx.create_lock("devlock", Site::caller()).expect("create");

    let cx2 = Arc::clone(&cx);
    let leaker = cx
        .spawn("leaker", Site::caller(), move || {
            cx2.obtain(lock, Site::caller()).expect("obtain");
        })
        .expect("spawn");
    let leaker_id = leaker.id();
    leaker.join().expect("leaker panicked");

    let abandoned = cx.recent_abandonments();
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned[0].thread, leaker_id);
    assert_eq!(abandoned[0].thread_name, "leaker");
    assert_eq!(abandoned[0].lock, lock);
    assert_eq!(abandoned[0].lock_name, "devlock");
    assert!(abandoned[0].acquired_site.contains("tests.rs"));
    assert!(cx.thread_name(leaker_id).is_none());

    assert!(!cx.test(lock).expect("test"));
    assert_eq!(cx.obtain(lock, Site::caller()).expect("obtain"), Acquired::Recovered);
    cx.release(lock, Site::caller()).expect("release");
    assert_eq!(cx.obtain(lock, Site::caller()).expect("obtain"), Acquired::Clean);
}

#[test]
fn shutdown_skips_the_abandonment_scan() {
    let cx = context();
    let lock = cx.create_lock("late", Site::caller()).expect("create");
    cx.begin_shutdown();

    let cx2 = Arc::clone(&cx);
    let abandoned = cx
        .spawn("late-exit", Site::caller(), move || {
            cx2.obtain(lock, Site::caller()).expect("obtain");
            cx2.deregister_current(Site::caller()).expect("deregister")
        })
        .expect("spawn")
        .join()
        .expect("join");
    assert!(abandoned.is_empty());
    assert!(cx.recent_abandonments().is_empty());
    assert_eq!(cx.thread_count(), 0);
}

#[test]
fn timed_wait_times_out_with_the_lock_held_again() {
    let cx = context();
    let lock = cx.create_lock("cv-lock", Site::caller()).expect("create");
    let cond = cx.create_condvar(lock, "cv", Site::caller()).expect("condvar");

    cx.obtain(lock, Site::caller()).expect("obtain");
    let start = Instant::now();
    let result = cx.timed_wait(cond, Duration::from_millis(100), Site::caller());
    let waited = start.elapsed();

    assert!(matches!(result, Err(SyncError::Timeout)));
    assert!(waited >= Duration::from_millis(100));
    assert!(waited < Duration::from_secs(2));
    assert!(cx.have(lock).expect("have"));
    cx.release(lock, Site::caller()).expect("release");
}

#[test]
fn signal_wakes_a_waiter() {
    let cx = context();
    let lock = cx.create_lock("queue", Site::caller()).expect("create");
    let cond = cx.create_condvar(lock, "nonempty", Site::caller()).expect("condvar");
    let ready = Arc::new(AtomicBool::new(false));

    let cx2 = Arc::clone(&cx);
    let ready2 = Arc::clone(&ready);
    let consumer = cx
        .spawn("consumer", Site::caller(), move || {
            cx2.obtain(lock, Site::caller()).expect("obtain");
            while !ready2.load(Ordering::SeqCst) {
                match cx2.timed_wait(cond, Duration::from_secs(5), Site::caller()) {
                    Ok(_) => {}
                    Err(SyncError::Timeout) => break,
                    Err(err) => panic!("wait failed: {err}"),
                }
            }
            let seen = ready2.load(Ordering::SeqCst);
            cx2.release(lock, Site::caller()).expect("release");
            seen
        })
        .expect("spawn");

    cx.obtain(lock, Site::caller()).expect("obtain");
    ready.store(true, Ordering::SeqCst);
    cx.signal(cond, Site::caller()).expect("signal");
    cx.release(lock, Site::caller()).expect("release");

    assert!(consumer.join().expect("consumer panicked"));
}

#[test]
fn condvar_requires_a_plain_mutex() {
    let cx = context();
    let rw = cx.create_rwlock("rw", Site::caller()).expect("create");
    assert!(matches!(
        cx.create_condvar(rw, "cv", Site::caller()),
        Err(SyncError::WrongKind { .. })
    ));
    assert!(matches!(
        cx.signal(CondvarId::next(), Site::caller()),
        Err(SyncError::NotInitialized(Resource::Condvar(_)))
    ));
}

#[test]
fn concurrent_spawns_get_distinct_ids() {
    const THREADS: usize = 16;
    let cx = context();
    let started = Arc::new(Barrier::new(THREADS + 1));
    let finish = Arc::new(Barrier::new(THREADS + 1));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let cx2 = Arc::clone(&cx);
            let started = Arc::clone(&started);
            let finish = Arc::clone(&finish);
            cx.spawn(&format!("t{i}"), Site::caller(), move || {
                started.wait();
                finish.wait();
                cx2.current_thread()
            })
            .expect("spawn")
        })
        .collect();

    started.wait();
    let snapshot = cx.snapshot();
    let listing = cx.list_threads(ThreadFilter::All, SortKey::Name);
    finish.wait();

    assert_eq!(snapshot.threads.len(), THREADS);
    let listed: HashSet<ThreadId> = snapshot.threads.iter().map(|t| t.id).collect();
    assert_eq!(listed.len(), THREADS);
    assert_eq!(listing.lines().count(), THREADS + 1);

    let mut seen = HashSet::new();
    for handle in handles {
        let expected = handle.id();
        assert!(listed.contains(&expected));
        assert!(listing.contains(&expected.to_string()));
        let reported = handle.join().expect("join");
        assert_eq!(reported, expected);
        assert!(seen.insert(reported));
    }
    assert_eq!(seen, listed);
    assert_eq!(cx.thread_count(), 0);
}

#[test]
fn deregistering_a_live_holder_keeps_its_lock_held() {
    let cx = context();
    let lock = cx.create_lock("frame", Site::caller()).expect("create");
    let holding = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));

    let cx2 = Arc::clone(&cx);
    let (holding2, release2) = (Arc::clone(&holding), Arc::clone(&release));
    let holder = cx
        .spawn("holder", Site::caller(), move || {
            cx2.obtain(lock, Site::caller()).expect("obtain");
            holding2.wait();
            release2.wait();
            cx2.release(lock, Site::caller())
        })
        .expect("spawn");
    let holder_id = holder.id();

    holding.wait();
    let abandoned = cx.deregister(holder_id, Site::caller()).expect("deregister");
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned[0].thread, holder_id);
    assert_eq!(abandoned[0].lock, lock);
    assert!(cx.thread_name(holder_id).is_none());

    assert!(matches!(cx.try_obtain(lock, Site::caller()), Err(SyncError::Busy)));
    assert!(cx.test(lock).expect("test"));
    let owner = cx.snapshot().lock(lock).and_then(|l| l.owner.clone());
    assert_eq!(owner.map(|o| o.thread), Some(holder_id));

    release.wait();
    holder.join().expect("join").expect("holder release");
    assert_eq!(cx.obtain(lock, Site::caller()).expect("obtain"), Acquired::Clean);
    cx.release(lock, Site::caller()).expect("release");
    assert_eq!(cx.recent_abandonments().len(), 1);
}

#[test]
fn deregistered_thread_cannot_obtain_locks() {
    let cx = context();
    let lock = cx.create_lock("late-lock", Site::caller()).expect("create");

    let cx2 = Arc::clone(&cx);
    let (refused, id) = cx
        .spawn("retiring", Site::caller(), move || {
            let abandoned = cx2.deregister_current(Site::caller()).expect("deregister");
            assert!(abandoned.is_empty());
            (cx2.obtain(lock, Site::caller()), cx2.current_thread())
        })
        .expect("spawn")
        .join()
        .expect("join");

    assert!(matches!(
        refused,
        Err(SyncError::NotInitialized(Resource::Thread(thread))) if thread == id
    ));
    assert!(!cx.test(lock).expect("test"));
    assert_eq!(cx.obtain(lock, Site::caller()).expect("obtain"), Acquired::Clean);
    cx.release(lock, Site::caller()).expect("release");
}

#[test]
fn condvar_reacquire_shows_the_waiter_as_waiting() {
    let cx = context();
    let lock = cx.create_lock("irq", Site::caller()).expect("create");
    let cond = cx.create_condvar(lock, "irq-raised", Site::caller()).expect("condvar");
    let waiting = Arc::new(Barrier::new(2));

    let cx2 = Arc::clone(&cx);
    let waiting2 = Arc::clone(&waiting);
    let waiter = cx
        .spawn("irq-waiter", Site::caller(), move || {
            cx2.obtain(lock, Site::caller()).expect("obtain");
            waiting2.wait();
            let result = cx2.timed_wait(cond, Duration::from_millis(100), Site::caller());
            let held = cx2.have(lock).expect("have");
            cx2.release(lock, Site::caller()).expect("release");
            (matches!(result, Err(SyncError::Timeout)), held)
        })
        .expect("spawn");
    let waiter_id = waiter.id();

    waiting.wait();
    // Only succeeds once the waiter has released the lock inside its wait.
    cx.obtain(lock, Site::caller()).expect("obtain");
    let seen = eventually(|| {
        let snapshot = cx.snapshot();
        let attempt = snapshot.thread(waiter_id)?.awaiting.as_ref()?;
        (attempt.lock == lock).then_some(())
    });
    assert!(seen.is_some(), "re-acquire should be recorded as an attempt");
    let listing = cx.list_threads(ThreadFilter::Waiting, SortKey::Name);
    assert!(listing.contains("irq-waiter"));
    assert!(listing.contains(&lock.to_string()));
    cx.release(lock, Site::caller()).expect("release");

    assert_eq!(waiter.join().expect("join"), (true, true));
    assert!(cx.snapshot().threads.is_empty());
}

#[test]
fn registered_threads_can_be_renamed() {
    let cx = context();
    let cx2 = Arc::clone(&cx);
    let name = cx
        .spawn("outer", Site::caller(), move || {
            let id = cx2.register_current("dup", Site::caller());
            let me = cx2.current_thread();
            cx2.set_thread_name(me, "renamed").expect("rename");
            (id.is_err(), cx2.thread_name(me))
        })
        .expect("spawn")
        .join()
        .expect("join");
    assert_eq!(name, (true, Some("renamed".to_owned())));
}

#[test]
fn watchdog_runs_until_shutdown() {
    let cx = context();
    assert!(cx.start_watchdog().expect("start").is_none());

    let cx = SyncContext::new(Config::default().with_watchdog(Duration::from_millis(10)));
    let watchdog = cx.start_watchdog().expect("start").expect("enabled");
    std::thread::sleep(Duration::from_millis(50));
    assert!(!watchdog.is_finished());
    cx.begin_shutdown();
    watchdog.join().expect("watchdog panicked");
    assert_eq!(cx.thread_count(), 0);
}

#[test]
fn concurrent_creates_are_all_listed() {
    let cx = context();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cx2 = Arc::clone(&cx);
            cx.spawn(&format!("creator{i}"), Site::caller(), move || {
                cx2.create_lock(&format!("dev{i}"), Site::caller()).expect("create")
            })
            .expect("spawn")
        })
        .collect();
    let ids: HashSet<LockId> = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .collect();

    assert_eq!(ids.len(), 8);
    assert_eq!(cx.lock_count(), 8);
    let listing = cx.list_locks(LockFilter::All, SortKey::Name);
    assert_eq!(listing.lines().count(), 9);
    assert!(ids.iter().all(|id| listing.contains(&id.to_string())));
}
