//! Concurrency and reliability primitives for service-mesh clients.
//!
//! This crate provides the building blocks a mesh client needs to protect
//! itself from overloaded upstreams and to spread load across replica sets:
//!
//! - **Adaptive throttling**: client-side load shedding driven by observed
//!   accept/total ratios, after the client throttling scheme described in
//!   the Google SRE book's "Handling Overload" chapter.
//! - **Request coalescing**: concurrent identical computations collapse
//!   into a single execution whose result every caller shares.
//! - **Consistent hashing**: weighted virtual-node ring mapping request
//!   keys onto a dynamically changing replica set.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  AdaptiveThrottle          SingleFlight       ConsistentHash│
//! │  .allow() │ .call()        .run()             .add()/.get() │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RollingWindow                                              │
//! │  Time-aligned bucket rotation │ add / reduce                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  clock (monotonic readings)   │   Proba (Bernoulli draws)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The throttle is the only composite: it owns a [`RollingWindow`] and a
//! [`Proba`]. Everything else stands alone. All components are thread-safe
//! and designed for shared ownership behind an `Arc`.
//!
//! # Quick Start
//!
//! ```
//! use meshguard::{AdaptiveThrottle, ThrottleConfig};
//!
//! let throttle = AdaptiveThrottle::new(ThrottleConfig::default());
//!
//! match throttle.allow() {
//!     Ok(permit) => {
//!         // issue the request, then resolve the permit exactly once
//!         permit.accept();
//!     }
//!     Err(_) => {
//!         // shed load: the upstream has been refusing too much recently
//!     }
//! }
//! ```

#![warn(missing_docs)]

pub mod clock;
mod error;
mod proba;
mod ring;
mod singleflight;
mod throttle;
mod window;

pub use error::{CallError, Error, Result};
pub use proba::Proba;
pub use ring::{ConsistentHash, HashFn, fnv1a};
pub use singleflight::SingleFlight;
pub use throttle::{AdaptiveThrottle, Permit, ThrottleConfig};
pub use window::{Bucket, RollingWindow};
