//! Time-bucketed rolling window.
//!
//! A [`RollingWindow`] aggregates numeric events over a sliding interval by
//! splitting it into `size` buckets of `interval` each. Buckets rotate
//! lazily: every mutation first computes how many whole intervals elapsed
//! since the current bucket started, resets exactly that many expired
//! slots, and realigns the bucket start to an interval boundary so the
//! window never drifts.
//!
//! [`RollingWindow::reduce`] walks the live buckets oldest first. Buckets
//! that aged out since the last mutation are skipped rather than reported,
//! so a long-idle window reads as empty. The current bucket holds partial
//! data; callers that prefer stable readings over fresh ones can exclude
//! it with the `ignore_current` option.

use std::time::Duration;

use parking_lot::RwLock;

use crate::clock;

/// One time slot holding the sum and count of accumulated values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bucket {
    /// Sum of the values added during this slot.
    pub sum: f64,

    /// Number of additions during this slot.
    pub count: u64,
}

impl Bucket {
    fn add(&mut self, v: f64) {
        self.sum += v;
        self.count += 1;
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

/// Fixed circular sequence of buckets, indexed modulo its length.
#[derive(Debug)]
struct Slots {
    buckets: Vec<Bucket>,
}

impl Slots {
    fn new(size: usize) -> Self {
        Self { buckets: vec![Bucket::default(); size] }
    }

    fn add(&mut self, offset: usize, v: f64) {
        let size = self.buckets.len();
        self.buckets[offset % size].add(v);
    }

    fn reduce<F: FnMut(&Bucket)>(&self, start: usize, count: usize, f: &mut F) {
        let size = self.buckets.len();
        for i in 0..count {
            f(&self.buckets[(start + i) % size]);
        }
    }

    fn reset(&mut self, offset: usize) {
        let size = self.buckets.len();
        self.buckets[offset % size].reset();
    }
}

/// Mutable window state guarded by the readers-writer lock.
#[derive(Debug)]
struct Inner {
    slots: Slots,

    /// Index of the current bucket.
    offset: usize,

    /// Clock reading at which the current bucket started, always aligned
    /// to an interval boundary relative to the construction instant.
    last_time: Duration,
}

/// A rolling window of `size` buckets spanning `size * interval` wall time.
///
/// `add` takes the writer lock and holds it across rotation and
/// accumulation; `reduce` takes the reader lock and invokes the callback
/// under it. The callback must not re-enter the window.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use meshguard::RollingWindow;
///
/// let win = RollingWindow::builder()
///     .size(40)
///     .interval(Duration::from_millis(250))
///     .build();
///
/// win.add(1.0);
/// let mut total = 0.0;
/// win.reduce(|bucket| total += bucket.sum);
/// assert_eq!(total, 1.0);
/// ```
#[derive(Debug)]
pub struct RollingWindow {
    inner: RwLock<Inner>,
    size: usize,
    interval: Duration,
    ignore_current: bool,
}

#[bon::bon]
impl RollingWindow {
    /// Creates a rolling window with `size` buckets of `interval` each.
    ///
    /// Set `ignore_current` to exclude the current (partially filled)
    /// bucket from [`reduce`](Self::reduce) when no rotation is pending.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or `interval` is zero; both are programmer
    /// errors with no meaningful recovery.
    #[builder]
    pub fn new(
        size: usize,
        interval: Duration,
        #[builder(default = false)] ignore_current: bool,
    ) -> Self {
        assert!(size >= 1, "rolling window needs at least one bucket");
        assert!(interval > Duration::ZERO, "bucket interval must be nonzero");

        Self {
            inner: RwLock::new(Inner {
                slots: Slots::new(size),
                offset: 0,
                last_time: clock::now(),
            }),
            size,
            interval,
            ignore_current,
        }
    }
}

impl RollingWindow {
    /// Returns the number of buckets.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the duration of one bucket.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Advances the window to the current time, then accumulates `v` into
    /// the current bucket.
    pub fn add(&self, v: f64) {
        let mut inner = self.inner.write();
        self.rotate(&mut inner);
        let offset = inner.offset;
        inner.slots.add(offset, v);
    }

    /// Invokes `f` on each live bucket in chronological order, oldest
    /// first.
    ///
    /// Buckets that expired since the last mutation are skipped: their
    /// contents predate the window span and would only add stale noise.
    /// The current bucket is included unless the window was built with
    /// `ignore_current`.
    pub fn reduce<F: FnMut(&Bucket)>(&self, mut f: F) {
        let inner = self.inner.read();
        let span = self.span(&inner);

        // The current bucket carries partial-interval data.
        let diff = if span == 0 && self.ignore_current {
            self.size - 1
        } else {
            self.size - span
        };
        if diff > 0 {
            let start = (inner.offset + span + 1) % self.size;
            inner.slots.reduce(start, diff, &mut f);
        }
    }

    /// Number of whole intervals elapsed since the current bucket started,
    /// capped at the window size.
    fn span(&self, inner: &Inner) -> usize {
        let elapsed = clock::since(inner.last_time);
        (elapsed.as_nanos() / self.interval.as_nanos()).min(self.size as u128) as usize
    }

    /// Resets expired buckets and realigns the window to the current time.
    fn rotate(&self, inner: &mut Inner) {
        let span = self.span(inner);
        if span == 0 {
            return;
        }

        // The `span` slots after the current offset aged out; reset exactly
        // those before they become the new live range.
        let offset = inner.offset;
        for i in 1..=span {
            inner.slots.reset((offset + i) % self.size);
        }
        inner.offset = (offset + span) % self.size;

        // Align to the interval boundary instead of stamping `now`, so
        // bucket edges never drift.
        let now = clock::now();
        let since_last = now - inner.last_time;
        let partial =
            Duration::from_nanos((since_last.as_nanos() % self.interval.as_nanos()) as u64);
        inner.last_time = now - partial;
    }
}
