use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Clock abstraction for control timing and record timestamps.
///
/// - now(): monotonic Instant, used for every safety timeout
/// - wall(): calendar time, used only to stamp records and bucket them by day/season
/// - sleep(): sleeps for the provided duration (implementations may simulate)
pub trait Clock {
    fn now(&self) -> Instant;
    fn wall(&self) -> DateTime<Utc>;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Default clock backed by `Instant::now()` and `Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when told to.
///
/// now()  = origin + offset
/// wall() = wall_origin + offset
/// sleep(d) advances both by d without actually sleeping. Clones share time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Start the wall clock at a fixed calendar instant.
    pub fn starting_at(wall_origin: DateTime<Utc>) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin,
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }

    /// Set the absolute offset relative to origin.
    pub fn set_offset(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = d;
        }
    }

    fn offset(&self) -> Duration {
        self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset()
    }

    fn wall(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.offset())
            .ok()
            .and_then(|off| self.wall_origin.checked_add_signed(off))
            .unwrap_or(self.wall_origin)
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn wall(&self) -> DateTime<Utc> {
        (**self).wall()
    }

    fn sleep(&self, d: Duration) {
        (**self).sleep(d);
    }
}
