//! Process-wide monotonic clock readings.
//!
//! Time is reported as a [`Duration`] since a fixed epoch captured once per
//! process. The epoch is backdated by [`BACKDATE`] so that the very first
//! reading is already large and nonzero; downstream code orders and aligns
//! readings with plain duration arithmetic, and a zero reading would alias
//! with "uninitialized".
//!
//! Readings are cheap (one `Instant::elapsed` plus an addition) and never
//! go backwards. No teardown is required.

use std::{
    sync::LazyLock,
    time::{Duration, Instant, SystemTime},
};

/// How far into the past the epoch is backdated (roughly 13 months).
const BACKDATE: Duration = Duration::from_secs(397 * 24 * 60 * 60);

/// Monotonic and wall-clock anchors, captured together on first use.
static EPOCH: LazyLock<(Instant, SystemTime)> =
    LazyLock::new(|| (Instant::now(), SystemTime::now()));

/// Returns the duration since the process epoch.
///
/// Guaranteed nonzero, including on the very first call: the result is at
/// least [`BACKDATE`].
#[must_use]
pub fn now() -> Duration {
    EPOCH.0.elapsed() + BACKDATE
}

/// Returns how much time has elapsed since the reading `earlier`.
///
/// Saturates to zero if `earlier` is a fabricated reading from the future;
/// readings produced by [`now`] always yield a nonnegative span.
#[must_use]
pub fn since(earlier: Duration) -> Duration {
    now().saturating_sub(earlier)
}

/// Reconstructs the wall-clock instant corresponding to a reading.
///
/// Intended for log annotation only: the reconstruction inherits whatever
/// drift the system clock accumulated since the epoch was captured.
#[must_use]
pub fn wall(reading: Duration) -> SystemTime {
    (EPOCH.1 - BACKDATE) + reading
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reading_is_large_and_nonzero() {
        let reading = now();
        assert!(reading >= BACKDATE);
        assert!(!reading.is_zero());
    }

    #[test]
    fn test_readings_never_go_backwards() {
        let mut prev = now();
        for _ in 0..1_000 {
            let next = now();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn test_since_measures_elapsed_time() {
        let start = now();
        std::thread::sleep(Duration::from_millis(10));
        let elapsed = since(start);
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_since_saturates_on_future_reading() {
        let future = now() + Duration::from_secs(60);
        assert_eq!(since(future), Duration::ZERO);
    }

    #[test]
    fn test_wall_reconstruction_tracks_system_time() {
        let reading = now();
        let reconstructed = wall(reading);
        let actual = SystemTime::now();
        let skew = match actual.duration_since(reconstructed) {
            Ok(d) => d,
            Err(e) => e.duration(),
        };
        assert!(skew < Duration::from_secs(1));
    }
}
