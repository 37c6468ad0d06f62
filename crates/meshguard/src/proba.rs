//! Thread-safe Bernoulli draws.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::SmallRng};

/// A thread-safe source of biased coin flips.
///
/// `SmallRng` is not reentrant, so draws are serialized through a mutex.
/// The lock is held only for the duration of one draw.
pub struct Proba {
    rng: Mutex<SmallRng>,
}

impl Proba {
    /// Creates a source seeded from the high-resolution system clock.
    #[must_use]
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
            .unwrap_or_default();
        Self::from_seed(nanos)
    }

    /// Creates a deterministically seeded source.
    ///
    /// Useful in tests where drop decisions must be reproducible.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self { rng: Mutex::new(SmallRng::seed_from_u64(seed)) }
    }

    /// Returns true with probability `p`.
    ///
    /// Draws a uniform `x ∈ [0, 1)` and returns `x < p`, so `p <= 0.0`
    /// never fires and `p >= 1.0` always does.
    pub fn true_with(&self, p: f64) -> bool {
        let x: f64 = self.rng.lock().random();
        x < p
    }
}

impl Default for Proba {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Proba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proba").finish_non_exhaustive()
    }
}
