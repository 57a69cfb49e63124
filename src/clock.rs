//! Time sources
//!
//! Two clocks are needed and they are deliberately not interchangeable:
//! the monotonic clock times patience and cooldown windows, the wall clock
//! stamps readings so they can be compared with run record timestamps
//! (which are wall-clock based on the record store host).

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Injected time source.
pub trait Clock: Send + Sync {
    /// Monotonic instant for cooldown and reupdate timing.
    fn now(&self) -> Instant;

    /// Wall-clock time for reading timestamps.
    fn today(&self) -> DateTime<Utc>;
}

/// The host's clocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn today(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Both the monotonic and the wall reading advance together, so replaying a
/// scenario keeps reading timestamps and cooldown windows consistent.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<ManualState>,
}

#[derive(Debug, Clone, Copy)]
struct ManualState {
    instant: Instant,
    wall: DateTime<Utc>,
}

impl ManualClock {
    pub fn new(wall: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(ManualState {
                instant: Instant::now(),
                wall,
            }),
        }
    }

    /// Move both clocks forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.instant += by;
        state.wall += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.lock().instant
    }

    fn today(&self) -> DateTime<Utc> {
        self.lock().wall
    }
}
