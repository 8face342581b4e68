use facet::Facet;
use std::error::Error;
use std::fmt;
use std::str::FromStr;

use crate::ThreadId;

/// Which locks a "list locks" report includes.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LockFilter {
    All,
    /// Only locks that currently have an owner.
    Held,
    /// Only locks owned by one thread.
    HeldBy(ThreadId),
}

/// Which threads a "list threads" report includes.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadFilter {
    All,
    /// Only threads currently blocked on a lock.
    Waiting,
    Only(ThreadId),
}

/// Sort order for both reports.
///
/// For locks, `Owner`/`Time`/`Site` refer to the current hold. For threads they
/// refer to the lock being awaited: its holder, when the wait began, and where.
#[derive(Facet, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Name,
    Owner,
    Time,
    Site,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSortKey(pub String);

impl fmt::Display for UnknownSortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown sort key {:?}; expected one of name, owner, time, site",
            self.0
        )
    }
}

impl Error for UnknownSortKey {}

impl FromStr for SortKey {
    type Err = UnknownSortKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "owner" => Ok(Self::Owner),
            "time" => Ok(Self::Time),
            "site" | "loc" => Ok(Self::Site),
            _ => Err(UnknownSortKey(s.to_owned())),
        }
    }
}
