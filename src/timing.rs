//! Time-related collaborators
//!
//! Sleeping, reading the clock and cooperative cancellation are routed
//! through small traits so the retry, pacing and speed-gate logic can be
//! driven by fakes in tests.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Something that can block the current thread for a while
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `std::thread::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Monotonic time source
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Clock backed by `Instant::now`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Shared flag raised when the user asks the run to stop
///
/// Cloning yields a handle to the same flag, so the Ctrl-C handler and
/// the download loops observe one value.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Longest single sleep while waiting on a [`CancelFlag`]
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Sleeps for `duration` in short slices, stopping early once `cancel` is raised
///
/// Returns false when the wait was cut short.
pub fn sleep_cancellable(sleeper: &dyn Sleeper, duration: Duration, cancel: &CancelFlag) -> bool {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return false;
        }
        let slice = remaining.min(CANCEL_POLL_INTERVAL);
        sleeper.sleep(slice);
        remaining -= slice;
    }
    !cancel.is_cancelled()
}

/// Picks a whole number of seconds uniformly from `range`
///
/// Randomness comes from the 80 random bits of a fresh ULID, which is
/// plenty for spreading out request bursts.
pub fn random_pause(range: &RangeInclusive<u64>) -> Duration {
    let (low, high) = (*range.start(), *range.end());
    if high <= low {
        return Duration::from_secs(low);
    }
    let span = u128::from(high - low + 1);
    let offset = ulid::Ulid::new().random() % span;
    Duration::from_secs(low + offset as u64)
}
