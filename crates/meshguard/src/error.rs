//! Error types for meshguard using snafu.
//!
//! The crate surfaces exactly one runtime error of its own,
//! [`Error::ServiceUnavailable`], raised when the adaptive throttle refuses
//! admission. Errors produced by guarded requests are passed through
//! unchanged, wrapped in [`CallError::Request`] so callers can tell a shed
//! request apart from a failed one.

use snafu::Snafu;

/// Result type alias for throttle admission decisions.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the crate itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// The adaptive throttle refused admission based on recent
    /// accept/total statistics.
    #[snafu(display("service unavailable: request dropped by adaptive throttle"))]
    ServiceUnavailable,
}

/// Error returned by [`AdaptiveThrottle::call`](crate::AdaptiveThrottle::call)
/// and [`AdaptiveThrottle::call_or_else`](crate::AdaptiveThrottle::call_or_else).
///
/// Distinguishes requests that never ran (shed by the throttle) from
/// requests that ran and failed. The inner error is the caller's own error
/// type, propagated verbatim.
#[derive(Debug, Snafu)]
pub enum CallError<E>
where
    E: std::error::Error + 'static,
{
    /// Admission was denied and no fallback was configured.
    #[snafu(display("service unavailable: request dropped by adaptive throttle"))]
    Rejected,

    /// The guarded request ran and failed.
    #[snafu(display("guarded request failed: {source}"))]
    Request {
        /// The error produced by the request itself.
        source: E,
    },
}

impl<E> CallError<E>
where
    E: std::error::Error + 'static,
{
    /// Returns true if the request was shed without running.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected)
    }

    /// Extracts the request's own error, if it ran and failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Rejected => None,
            Self::Request { source } => Some(source),
        }
    }
}
