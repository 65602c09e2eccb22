//! Monotonic time source and exponential backoff.
//!
//! Reconnect logic needs a controllable clock so timer-driven events are
//! reproducible in tests: a hard-coded `SystemTime::now()` would make
//! backoff and stabilization timing unobservable from a test harness, so
//! this crate exposes a `Clock` trait with a real and a test implementation
//! instead.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::{Rng, RngCore};

use crate::config::Config;

/// Milliseconds since an arbitrary, clock-specific epoch. Only meaningful
/// relative to other `Timestamp`s produced by the same [`Clock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, d: Duration) -> Option<Timestamp> {
        self.0.checked_add(d.as_millis() as u64).map(Timestamp)
    }

    pub fn saturating_add(self, d: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(d.as_millis() as u64))
    }

    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A monotonic clock. Implementations must never go backwards.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock-backed implementation for production use.
#[derive(Debug)]
pub struct SystemClock {
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock {
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.start.elapsed().as_millis() as u64)
    }
}

/// A settable, advanceable clock for deterministic tests.
#[derive(Debug, Default)]
pub struct TestClock(AtomicU64);

impl TestClock {
    pub fn new() -> Self {
        TestClock(AtomicU64::new(0))
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, d: Duration) {
        self.0.fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.0.load(Ordering::SeqCst))
    }
}

/// Computes the exponential backoff delay for the `n`th reconnect attempt:
/// `d_n = min(INITIAL_RETRY_DELAY * RETRY_BACKOFF_BASE^n, MAX_RETRY_DELAY)`,
/// with optional ±10% jitter when `config.jitter` is set.
pub fn backoff_delay(config: &Config, attempt: u32, rng: &mut dyn RngCore) -> Duration {
    let base_ms = config.initial_retry_delay.as_millis() as f64;
    let grown = base_ms * config.retry_backoff_base.powi(attempt as i32);
    let capped = grown.min(config.max_retry_delay.as_millis() as f64);
    let final_ms = if config.jitter {
        let jitter_frac: f64 = rng.gen_range(-0.1..=0.1);
        (capped * (1.0 + jitter_frac)).max(0.0)
    } else {
        capped
    };
    Duration::from_millis(final_ms.round() as u64)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_clock_advances_monotonically() {
        let clock = TestClock::new();
        assert_eq!(clock.now(), Timestamp::ZERO);
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), Timestamp::from_millis(500));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), Timestamp::from_millis(1000));
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let config = Config::default();
        let mut rng = StdRng::seed_from_u64(0);
        let d0 = backoff_delay(&config, 0, &mut rng);
        let d1 = backoff_delay(&config, 1, &mut rng);
        let d2 = backoff_delay(&config, 2, &mut rng);
        assert_eq!(d0, Duration::from_millis(1000));
        assert_eq!(d1, Duration::from_millis(2000));
        assert_eq!(d2, Duration::from_millis(4000));

        let d_large = backoff_delay(&config, 30, &mut rng);
        assert_eq!(d_large, config.max_retry_delay);
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let config = Config::builder().jitter(true).build().unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 0..5 {
            let d = backoff_delay(&config, attempt, &mut rng);
            let base = (config.initial_retry_delay.as_millis() as f64
                * config.retry_backoff_base.powi(attempt as i32))
            .min(config.max_retry_delay.as_millis() as f64);
            let lower = (base * 0.9).floor() as u64;
            let upper = (base * 1.1).ceil() as u64;
            assert!(d.as_millis() as u64 >= lower && d.as_millis() as u64 <= upper);
        }
    }
}
