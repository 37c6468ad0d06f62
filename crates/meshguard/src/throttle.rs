//! Adaptive client-side throttling.
//!
//! Implements the client throttling scheme from the Google SRE book's
//! "Handling Overload" chapter: the client tracks how many of its recent
//! requests the upstream accepted, and once the upstream stops accepting,
//! starts shedding load locally with probability
//!
//! ```text
//! drop = max(0, (total - protection - k * accepts) / (total + 1))
//! ```
//!
//! With `k > 1` the client keeps attempting slightly more than the
//! upstream recently accepted, which biases toward recovery as soon as the
//! upstream heals. The `protection` floor suppresses shedding under very
//! low traffic, where the ratio is statistically meaningless.
//!
//! There is no open/closed latch: recovery is continuous as observed
//! accepts climb through the rolling window. The throttle holds no locks
//! of its own; all synchronization lives in the window and the probability
//! source.

use std::{
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use crate::{
    error::{CallError, Error},
    proba::Proba,
    window::RollingWindow,
};

/// Configuration for the adaptive throttle.
///
/// # Defaults
///
/// - `buckets`: 40 buckets over the sliding window (250 ms each)
/// - `window`: 10 second sliding window
/// - `k`: 1.5 acceptance multiplier
/// - `protection`: 5 requests below which nothing is shed
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use meshguard::ThrottleConfig;
///
/// let config = ThrottleConfig::builder()
///     .window(Duration::from_secs(5))
///     .k(2.0)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Number of buckets in the rolling window.
    buckets: usize,

    /// Total duration covered by the rolling window.
    window: Duration,

    /// Acceptance multiplier; larger values tolerate more failures.
    k: f64,

    /// Request count below which admission is unconditional.
    protection: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { buckets: 40, window: Duration::from_secs(10), k: 1.5, protection: 5 }
    }
}

#[bon::bon]
impl ThrottleConfig {
    /// Creates a new throttle configuration.
    #[builder]
    #[must_use]
    pub fn new(
        #[builder(default = 40)] buckets: usize,
        #[builder(default = Duration::from_secs(10))] window: Duration,
        #[builder(default = 1.5)] k: f64,
        #[builder(default = 5)] protection: u64,
    ) -> Self {
        Self { buckets, window, k, protection }
    }

    /// Returns the number of buckets in the rolling window.
    #[must_use]
    pub fn buckets(&self) -> usize {
        self.buckets
    }

    /// Returns the total duration covered by the rolling window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns the acceptance multiplier.
    #[must_use]
    pub fn k(&self) -> f64 {
        self.k
    }

    /// Returns the request count below which admission is unconditional.
    #[must_use]
    pub fn protection(&self) -> u64 {
        self.protection
    }
}

/// Client-side adaptive throttle.
///
/// Thread-safe; share it behind an `Arc` and call it from any thread.
///
/// # Example
///
/// ```
/// use meshguard::{AdaptiveThrottle, ThrottleConfig};
///
/// let throttle = AdaptiveThrottle::new(ThrottleConfig::default());
/// if let Ok(permit) = throttle.allow() {
///     // issue the request...
///     permit.accept();
/// }
/// ```
#[derive(Debug)]
pub struct AdaptiveThrottle {
    k: f64,
    protection: u64,
    stat: RollingWindow,
    proba: Proba,
}

impl AdaptiveThrottle {
    /// Creates a throttle from the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration yields zero buckets or a zero bucket
    /// duration.
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        Self::with_proba(config, Proba::new())
    }

    /// Creates a throttle with an explicit probability source.
    #[must_use]
    pub fn with_proba(config: ThrottleConfig, proba: Proba) -> Self {
        let interval = config.window / u32::try_from(config.buckets.max(1)).unwrap_or(u32::MAX);
        let stat = RollingWindow::builder().size(config.buckets).interval(interval).build();
        Self { k: config.k, protection: config.protection, stat, proba }
    }

    /// Requests admission.
    ///
    /// On admit, returns a [`Permit`] that must be resolved exactly once:
    /// [`Permit::accept`] once the upstream handled the request,
    /// [`Permit::reject`] if it refused or failed. On deny, returns
    /// [`Error::ServiceUnavailable`].
    pub fn allow(&self) -> Result<Permit<'_>, Error> {
        self.admit()?;
        Ok(Permit { throttle: self })
    }

    /// Runs `req` under admission control.
    ///
    /// If admission is denied the request never runs and
    /// [`CallError::Rejected`] is returned. Otherwise the outcome is fed
    /// to `acceptable`: `true` records an accept, `false` a reject. A
    /// panicking request records a reject before the panic resumes.
    ///
    /// `acceptable` decides which outcomes count against the upstream;
    /// a typical predicate treats client-caused errors as accepts:
    ///
    /// ```ignore
    /// throttle.call(fetch, |res| !matches!(res, Err(e) if e.is_server_fault()))
    /// ```
    pub fn call<T, E, R, A>(&self, req: R, acceptable: A) -> Result<T, CallError<E>>
    where
        R: FnOnce() -> Result<T, E>,
        A: FnOnce(&Result<T, E>) -> bool,
        E: std::error::Error + 'static,
    {
        match self.admit() {
            Ok(()) => self.run_admitted(req, acceptable),
            Err(_) => Err(CallError::Rejected),
        }
    }

    /// Like [`call`](Self::call), but consults `fallback` when admission
    /// is denied instead of failing with [`CallError::Rejected`].
    pub fn call_or_else<T, E, R, F, A>(
        &self,
        req: R,
        fallback: F,
        acceptable: A,
    ) -> Result<T, CallError<E>>
    where
        R: FnOnce() -> Result<T, E>,
        F: FnOnce(Error) -> Result<T, E>,
        A: FnOnce(&Result<T, E>) -> bool,
        E: std::error::Error + 'static,
    {
        match self.admit() {
            Ok(()) => self.run_admitted(req, acceptable),
            Err(err) => fallback(err).map_err(|source| CallError::Request { source }),
        }
    }

    /// Admission decision without recording anything.
    fn admit(&self) -> Result<(), Error> {
        let (accepts, total) = self.history();
        let weighted_accepts = self.k * accepts;
        let drop_ratio =
            ((total as f64 - self.protection as f64 - weighted_accepts) / (total as f64 + 1.0))
                .max(0.0);
        if drop_ratio <= 0.0 {
            return Ok(());
        }

        if self.proba.true_with(drop_ratio) {
            tracing::debug!(drop_ratio, accepts, total, "request dropped by adaptive throttle");
            return Err(Error::ServiceUnavailable);
        }

        Ok(())
    }

    fn run_admitted<T, E, R, A>(&self, req: R, acceptable: A) -> Result<T, CallError<E>>
    where
        R: FnOnce() -> Result<T, E>,
        A: FnOnce(&Result<T, E>) -> bool,
        E: std::error::Error + 'static,
    {
        let result = match panic::catch_unwind(AssertUnwindSafe(req)) {
            Ok(result) => result,
            Err(payload) => {
                // A panicking request counts against the upstream, then
                // resumes unwinding.
                self.mark_failure();
                panic::resume_unwind(payload);
            }
        };

        if acceptable(&result) {
            self.mark_success();
        } else {
            self.mark_failure();
        }
        result.map_err(|source| CallError::Request { source })
    }

    /// Accumulates the accept sum and request count over the window.
    fn history(&self) -> (f64, u64) {
        let mut accepts = 0.0;
        let mut total = 0;
        self.stat.reduce(|bucket| {
            accepts += bucket.sum;
            total += bucket.count;
        });
        (accepts, total)
    }

    fn mark_success(&self) {
        self.stat.add(1.0);
    }

    fn mark_failure(&self) {
        self.stat.add(0.0);
    }
}

impl Default for AdaptiveThrottle {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

/// Single-use handle recording the outcome of an admitted call.
///
/// Resolution is enforced by move: exactly one of [`accept`](Self::accept)
/// or [`reject`](Self::reject) can ever run, and the compiler rejects a
/// second resolution.
#[must_use = "an admission permit must be resolved with accept() or reject()"]
#[derive(Debug)]
pub struct Permit<'a> {
    throttle: &'a AdaptiveThrottle,
}

impl Permit<'_> {
    /// Records that the upstream accepted the request.
    pub fn accept(self) {
        self.throttle.mark_success();
    }

    /// Records that the upstream rejected the request or failed it.
    pub fn reject(self) {
        self.throttle.mark_failure();
    }
}
