use std::error::Error;
use std::fmt;
use std::time::Duration;

pub const DEADLOCK_THRESHOLD_ENV: &str = "TANGLE_DEADLOCK_THRESHOLD_MS";
pub const SLOW_WAIT_ENV: &str = "TANGLE_SLOW_WAIT_MS";
pub const WATCHDOG_ENV: &str = "TANGLE_WATCHDOG_MS";
pub const ABANDONED_HISTORY_ENV: &str = "TANGLE_ABANDONED_HISTORY";

const DEFAULT_DEADLOCK_THRESHOLD_MS: u64 = 2_000;
const DEFAULT_SLOW_WAIT_MS: u64 = 100;
const DEFAULT_ABANDONED_HISTORY: usize = 64;

/// Tunables for a [`SyncContext`](crate::SyncContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// A wait shorter than this is contention, not a stall.
    pub deadlock_threshold: Duration,
    /// Blocking acquisitions longer than this are logged at debug level.
    pub slow_wait_threshold: Duration,
    /// Run the detector on a background thread at this interval.
    pub watchdog_interval: Option<Duration>,
    /// How many abandoned-lock records to keep.
    pub abandoned_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deadlock_threshold: Duration::from_millis(DEFAULT_DEADLOCK_THRESHOLD_MS),
            slow_wait_threshold: Duration::from_millis(DEFAULT_SLOW_WAIT_MS),
            watchdog_interval: None,
            abandoned_history: DEFAULT_ABANDONED_HISTORY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} must be a non-negative integer, got {:?}",
            self.var, self.value
        )
    }
}

impl Error for ConfigError {}

impl Config {
    /// Defaults overridden by any `TANGLE_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parse = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigError { var, value }),
            }
        };

        let mut config = Self::default();
        if let Some(ms) = parse(DEADLOCK_THRESHOLD_ENV)? {
            config.deadlock_threshold = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(SLOW_WAIT_ENV)? {
            config.slow_wait_threshold = Duration::from_millis(ms);
        }
        // 0 turns the watchdog off.
        if let Some(ms) = parse(WATCHDOG_ENV)? {
            config.watchdog_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(n) = parse(ABANDONED_HISTORY_ENV)? {
            config.abandoned_history = usize::try_from(n).unwrap_or(usize::MAX);
        }
        Ok(config)
    }

    pub fn with_deadlock_threshold(mut self, threshold: Duration) -> Self {
        self.deadlock_threshold = threshold;
        self
    }

    pub fn with_slow_wait_threshold(mut self, threshold: Duration) -> Self {
        self.slow_wait_threshold = threshold;
        self
    }

    pub fn with_watchdog(mut self, interval: Duration) -> Self {
        self.watchdog_interval = Some(interval);
        self
    }

    pub fn with_abandoned_history(mut self, capacity: usize) -> Self {
        self.abandoned_history = capacity;
        self
    }
}
