use facet::Facet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! define_u64_id {
    (
        $(#[$meta:meta])*
        $name:ident,
        prefix = $prefix:literal
    ) => {
        #[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[facet(transparent)]
        $(#[$meta])*
        pub struct $name(u64);

        impl $name {
            /// Wraps a caller-chosen raw key.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Allocates a fresh id from a process-wide counter.
            ///
            /// Counter-allocated ids start high so they never collide with small
            /// caller-chosen keys.
            pub fn next() -> Self {
                static NEXT_COUNTER: AtomicU64 = AtomicU64::new(1 << 32);
                Self(NEXT_COUNTER.fetch_add(1, Ordering::Relaxed))
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_u64_id!(
    /// Identity of a tracked mutex or reader/writer lock.
    LockId,
    prefix = "lock#"
);

define_u64_id!(
    /// Identity of a tracked thread. Never reused within a process.
    ThreadId,
    prefix = "thread#"
);

define_u64_id!(
    /// Identity of a tracked condition variable.
    CondvarId,
    prefix = "cond#"
);
