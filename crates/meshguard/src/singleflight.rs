//! Coalescing of concurrent identical computations.
//!
//! A [`SingleFlight`] group keys in-flight computations by string. When
//! several threads ask for the same key at once, exactly one executes the
//! closure; the rest park on a per-call latch and share the executor's
//! result once it lands. Sequential calls after completion execute afresh.
//!
//! ```text
//! A ──── runs f under "k" ───────────────▶ returns val
//! B ─────── joins "k" ───────────────────▶ returns the same val
//! ```
//!
//! Callers that abandon a shared call do not cancel it: the computation
//! runs to completion because other waiters may depend on it. Layer a
//! cancellation scope above this primitive if one is needed.

use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::{Condvar, Mutex};

/// What the executing thread published on the call record.
#[derive(Clone)]
enum Outcome<T, E> {
    /// The closure ran to completion.
    Ready(Result<T, E>),

    /// The closure panicked; waiters re-raise with this message.
    Panicked(String),
}

/// A single in-flight call.
///
/// Exactly one producer publishes the outcome before opening the latch;
/// any number of waiters read it afterwards. The record leaves the group
/// index before the latch opens, so it is only ever observed read-only.
struct Call<T, E> {
    slot: Mutex<Option<Outcome<T, E>>>,
    done: Condvar,
}

impl<T: Clone, E: Clone> Call<T, E> {
    fn new() -> Self {
        Self { slot: Mutex::new(None), done: Condvar::new() }
    }

    /// Stores the outcome and opens the latch. Called exactly once.
    fn publish(&self, outcome: Outcome<T, E>) {
        let mut slot = self.slot.lock();
        *slot = Some(outcome);
        self.done.notify_all();
    }

    /// Parks until the outcome lands, then returns a copy of it.
    fn wait(&self) -> Outcome<T, E> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.done.wait(&mut slot);
        }
    }
}

/// How a caller joined the group for a key.
enum Entry<T, E> {
    /// No call was in flight; this caller executes the closure.
    Leader(Arc<Call<T, E>>),

    /// A call is in flight; this caller waits for its result.
    Follower(Arc<Call<T, E>>),
}

/// A group of calls coalesced by string key.
///
/// `T` and `E` must be `Clone` because every waiter receives the same
/// value or error verbatim.
///
/// # Example
///
/// ```
/// use meshguard::SingleFlight;
///
/// let group: SingleFlight<u64, std::num::ParseIntError> = SingleFlight::new();
/// let value = group.run("config", || "42".parse()).unwrap();
/// assert_eq!(value, 42);
/// ```
pub struct SingleFlight<T, E> {
    calls: Mutex<HashMap<String, Arc<Call<T, E>>>>,
}

impl<T: Clone, E: Clone> SingleFlight<T, E> {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self { calls: Mutex::new(HashMap::new()) }
    }

    /// Executes `f` under `key`, or joins an in-flight call for the same
    /// key and returns its result.
    pub fn run<F>(&self, key: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.run_detailed(key, f).0
    }

    /// Like [`run`](Self::run), additionally reporting whether this caller
    /// executed `f` itself (`true`) or received a shared result (`false`).
    pub fn run_detailed<F>(&self, key: &str, f: F) -> (Result<T, E>, bool)
    where
        F: FnOnce() -> Result<T, E>,
    {
        match self.join(key) {
            Entry::Leader(call) => (self.execute(key, &call, f), true),
            Entry::Follower(call) => (Self::await_shared(&call), false),
        }
    }

    /// Looks up or creates the call record for `key`.
    ///
    /// The group mutex protects only the index; followers park on the call
    /// latch after releasing it.
    fn join(&self, key: &str) -> Entry<T, E> {
        let mut calls = self.calls.lock();
        if let Some(call) = calls.get(key) {
            return Entry::Follower(Arc::clone(call));
        }

        let call = Arc::new(Call::new());
        calls.insert(key.to_owned(), Arc::clone(&call));
        Entry::Leader(call)
    }

    /// Runs the closure as the leader and publishes its outcome.
    fn execute<F>(&self, key: &str, call: &Call<T, E>, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(f));

        // The key must leave the index strictly before the latch opens: a
        // waiter that saw this record is already parked on the latch, and
        // an arrival after removal starts a fresh call. Reversing the
        // order lets an arrival attach to a record whose latch already
        // fired, and it would wait forever.
        self.calls.lock().remove(key);

        match outcome {
            Ok(result) => {
                call.publish(Outcome::Ready(result.clone()));
                result
            }
            Err(payload) => {
                call.publish(Outcome::Panicked(panic_message(payload.as_ref())));
                panic::resume_unwind(payload)
            }
        }
    }

    /// Waits on an in-flight call and adopts its outcome.
    fn await_shared(call: &Call<T, E>) -> Result<T, E> {
        match call.wait() {
            Outcome::Ready(result) => result,
            Outcome::Panicked(message) => panic!("shared call panicked: {message}"),
        }
    }

    /// Number of calls currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

impl<T: Clone, E: Clone> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for SingleFlight<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight").field("in_flight", &self.calls.lock().len()).finish()
    }
}

/// Renders a panic payload for propagation to waiters.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}
