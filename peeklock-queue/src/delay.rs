//! Delay normalization.
//!
//! Every delay accepted by the channels and by [`LeasedMessage::release`]
//! goes through [`DelayResolver`], which turns it into one absolute UTC
//! timestamp. Absolute inputs are converted without consulting the clock, so
//! resending the same delay always yields the same schedule.
//!
//! [`LeasedMessage::release`]: crate::job::LeasedMessage::release

use crate::error::{QueueError, QueueResult};
use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Source of the current UTC time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a clock frozen at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Jump to an absolute time.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.now.lock() = time;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A delay before a message becomes deliverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    /// Whole seconds from now. Must not be negative.
    Seconds(i64),
    /// Absolute point in time.
    At(DateTime<FixedOffset>),
    /// Interval from now. Must not be negative.
    After(chrono::Duration),
}

impl Delay {
    /// No delay.
    pub const NONE: Delay = Delay::Seconds(0);
}

impl Default for Delay {
    fn default() -> Self {
        Delay::NONE
    }
}

impl From<i64> for Delay {
    fn from(seconds: i64) -> Self {
        Delay::Seconds(seconds)
    }
}

impl From<i32> for Delay {
    fn from(seconds: i32) -> Self {
        Delay::Seconds(i64::from(seconds))
    }
}

impl From<u32> for Delay {
    fn from(seconds: u32) -> Self {
        Delay::Seconds(i64::from(seconds))
    }
}

impl From<u64> for Delay {
    fn from(seconds: u64) -> Self {
        // Saturates; resolving i64::MAX seconds fails as out of range.
        Delay::Seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
    }
}

impl From<chrono::Duration> for Delay {
    fn from(interval: chrono::Duration) -> Self {
        Delay::After(interval)
    }
}

impl From<std::time::Duration> for Delay {
    fn from(interval: std::time::Duration) -> Self {
        chrono::Duration::from_std(interval)
            .map(Delay::After)
            .unwrap_or(Delay::Seconds(i64::MAX))
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Delay {
    fn from(time: DateTime<Tz>) -> Self {
        let offset = time.offset().fix();
        Delay::At(time.with_timezone(&offset))
    }
}

impl FromStr for Delay {
    type Err = QueueError;

    /// Parse integer seconds or an RFC 3339 timestamp.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(seconds) = s.parse::<i64>() {
            return Ok(Delay::Seconds(seconds));
        }
        DateTime::parse_from_rfc3339(s)
            .map(Delay::At)
            .map_err(|_| QueueError::InvalidDelay(format!("unrecognized delay '{}'", s)))
    }
}

/// Resolves delays to absolute UTC deliver-after timestamps.
#[derive(Debug, Clone)]
pub struct DelayResolver {
    clock: Arc<dyn Clock>,
}

impl Default for DelayResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayResolver {
    /// Create a resolver reading the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a resolver reading the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Current time according to the resolver's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Resolve a delay to the UTC time after which the message may be delivered.
    ///
    /// A zero delay resolves to exactly [`now`](Self::now); positive delays
    /// land strictly after it. Absolute times are returned unchanged in UTC.
    pub fn resolve(&self, delay: impl Into<Delay>) -> QueueResult<DateTime<Utc>> {
        match delay.into() {
            Delay::At(time) => Ok(time.with_timezone(&Utc)),
            Delay::Seconds(seconds) => {
                if seconds < 0 {
                    return Err(QueueError::InvalidDelay(format!(
                        "delay must not be negative, got {} seconds",
                        seconds
                    )));
                }
                let interval = chrono::Duration::try_seconds(seconds).ok_or_else(|| {
                    QueueError::InvalidDelay(format!("{} seconds is out of range", seconds))
                })?;
                self.add_to_now(interval)
            }
            Delay::After(interval) => {
                if interval < chrono::Duration::zero() {
                    return Err(QueueError::InvalidDelay(format!(
                        "interval must not be negative, got {}",
                        interval
                    )));
                }
                self.add_to_now(interval)
            }
        }
    }

    fn add_to_now(&self, interval: chrono::Duration) -> QueueResult<DateTime<Utc>> {
        self.now()
            .checked_add_signed(interval)
            .ok_or_else(|| QueueError::InvalidDelay(format!("{} is out of range", interval)))
    }
}
