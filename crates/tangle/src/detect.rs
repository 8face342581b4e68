//! Wait-for-graph deadlock detection over a [`RegistrySnapshot`].
//!
//! An edge runs from a thread to the owner of the lock it is attempting. A
//! thread is deadlocked when following edges from it revisits a thread, as long
//! as every wait along the way has lasted at least the threshold; shorter waits
//! are ordinary contention. The walk only reads the snapshot, so it can run
//! while the system it inspects is stuck.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tangle_types::{
    DeadlockedThread, LockId, LockSnapshot, RegistrySnapshot, ThreadId, ThreadSnapshot,
    duration_ms,
};

pub struct WaitGraph<'a> {
    locks: HashMap<LockId, &'a LockSnapshot>,
    threads: HashMap<ThreadId, &'a ThreadSnapshot>,
    order: Vec<ThreadId>,
    threshold_ms: u64,
}

impl<'a> WaitGraph<'a> {
    pub fn new(snapshot: &'a RegistrySnapshot, threshold: Duration) -> Self {
        let mut order: Vec<ThreadId> = snapshot.threads.iter().map(|t| t.id).collect();
        order.sort();
        Self {
            locks: snapshot.locks.iter().map(|l| (l.id, l)).collect(),
            threads: snapshot.threads.iter().map(|t| (t.id, t)).collect(),
            order,
            threshold_ms: duration_ms(threshold),
        }
    }

    /// The thread `thread` is stalled behind: the owner of the lock it has been
    /// attempting for at least the threshold. `None` ends the walk.
    fn next_hop(&self, thread: ThreadId) -> Option<ThreadId> {
        let attempt = self.threads.get(&thread)?.awaiting.as_ref()?;
        if attempt.waiting_ms < self.threshold_ms {
            return None;
        }
        let owner = self.locks.get(&attempt.lock)?.owner.as_ref()?.thread;
        self.threads.contains_key(&owner).then_some(owner)
    }

    /// Whether `thread` sits on, or leads into, a wait-for cycle.
    pub fn is_deadlocked(&self, thread: ThreadId) -> bool {
        let mut footprints = HashSet::new();
        let mut cur = thread;
        loop {
            if !footprints.insert(cur) {
                return true;
            }
            match self.next_hop(cur) {
                Some(owner) => cur = owner,
                None => return false,
            }
        }
    }

    /// Every deadlocked thread, with the lock it awaits and who holds it.
    pub fn deadlocked(&self) -> Vec<DeadlockedThread> {
        self.order
            .iter()
            .filter(|id| self.is_deadlocked(**id))
            .filter_map(|id| self.describe(*id))
            .collect()
    }

    fn describe(&self, thread: ThreadId) -> Option<DeadlockedThread> {
        let stuck = self.threads.get(&thread)?;
        let attempt = stuck.awaiting.as_ref()?;
        let lock = self.locks.get(&attempt.lock)?;
        let holder = lock.owner.as_ref()?.thread;
        Some(DeadlockedThread {
            thread,
            thread_name: stuck.name.clone(),
            lock: lock.id,
            lock_name: lock.name.clone(),
            holder,
            holder_name: self
                .threads
                .get(&holder)
                .map(|t| t.name.clone())
                .unwrap_or_default(),
            waiting_ms: attempt.waiting_ms,
            site: attempt.site.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tangle_types::{AttemptSnapshot, HoldSnapshot, LockKind};

    struct Fixture {
        snapshot: RegistrySnapshot,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                snapshot: RegistrySnapshot::default(),
            }
        }

        fn thread(mut self, id: u64) -> Self {
            self.snapshot.threads.push(ThreadSnapshot {
                id: ThreadId::new(id),
                name: format!("t{id}"),
                created_unix_ms: 0,
                created_site: "test.rs:1".to_owned(),
                awaiting: None,
            });
            self
        }

        fn lock(mut self, id: u64, owner: Option<u64>) -> Self {
            self.snapshot.locks.push(LockSnapshot {
                id: LockId::new(id),
                kind: LockKind::Mutex,
                name: format!("l{id}"),
                created_by: ThreadId::new(0),
                created_unix_ms: 0,
                created_site: "test.rs:2".to_owned(),
                owner: owner.map(|t| HoldSnapshot {
                    thread: ThreadId::new(t),
                    since_unix_ms: 0,
                    held_ms: 10_000,
                    site: "test.rs:3".to_owned(),
                }),
                waiters: Vec::new(),
            });
            self
        }

        fn waits(mut self, thread: u64, lock: u64, waiting_ms: u64) -> Self {
            let thread = self
                .snapshot
                .threads
                .iter_mut()
                .find(|t| t.id == ThreadId::new(thread))
                .expect("thread must be declared first");
            thread.awaiting = Some(AttemptSnapshot {
                thread: thread.id,
                lock: LockId::new(lock),
                since_unix_ms: 0,
                waiting_ms,
                site: "test.rs:4".to_owned(),
            });
            self
        }

        fn graph(&self) -> WaitGraph<'_> {
            WaitGraph::new(&self.snapshot, Duration::from_millis(1_000))
        }
    }

    #[test]
    fn two_thread_cycle_is_reported_for_both() {
        let fixture = Fixture::new()
            .thread(1)
            .thread(2)
            .lock(10, Some(1))
            .lock(20, Some(2))
            .waits(1, 20, 5_000)
            .waits(2, 10, 5_000);
        let found = fixture.graph().deadlocked();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].thread, ThreadId::new(1));
        assert_eq!(found[0].lock, LockId::new(20));
        assert_eq!(found[0].holder, ThreadId::new(2));
        assert_eq!(found[0].holder_name, "t2");
        assert_eq!(found[1].lock, LockId::new(10));
        assert_eq!(found[1].holder, ThreadId::new(1));
    }

    #[test]
    fn short_waits_are_contention() {
        let fixture = Fixture::new()
            .thread(1)
            .thread(2)
            .lock(10, Some(1))
            .lock(20, Some(2))
            .waits(1, 20, 5_000)
            .waits(2, 10, 999);
        assert!(fixture.graph().deadlocked().is_empty());
    }

    #[test]
    fn chain_without_cycle_is_not_a_deadlock() {
        let fixture = Fixture::new()
            .thread(1)
            .thread(2)
            .thread(3)
            .lock(10, Some(2))
            .lock(20, Some(3))
            .waits(1, 10, 5_000)
            .waits(2, 20, 5_000);
        let graph = fixture.graph();
        assert!(!graph.is_deadlocked(ThreadId::new(1)));
        assert!(!graph.is_deadlocked(ThreadId::new(3)));
    }

    #[test]
    fn thread_feeding_into_a_cycle_is_deadlocked_too() {
        let fixture = Fixture::new()
            .thread(1)
            .thread(2)
            .thread(3)
            .lock(10, Some(1))
            .lock(20, Some(2))
            .waits(1, 20, 5_000)
            .waits(2, 10, 5_000)
            .waits(3, 10, 5_000);
        assert!(fixture.graph().is_deadlocked(ThreadId::new(3)));
        assert_eq!(fixture.graph().deadlocked().len(), 3);
    }

    #[test]
    fn unresolvable_owner_ends_the_walk() {
        let fixture = Fixture::new()
            .thread(1)
            .thread(2)
            .lock(10, Some(99))
            .lock(20, None)
            .waits(1, 10, 5_000)
            .waits(2, 20, 5_000);
        let graph = fixture.graph();
        assert!(!graph.is_deadlocked(ThreadId::new(1)));
        assert!(!graph.is_deadlocked(ThreadId::new(2)));
    }

    #[test]
    fn waiting_on_own_lock_is_a_self_deadlock() {
        let fixture = Fixture::new()
            .thread(1)
            .lock(10, Some(1))
            .waits(1, 10, 5_000);
        let found = fixture.graph().deadlocked();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].holder, ThreadId::new(1));
    }
}
