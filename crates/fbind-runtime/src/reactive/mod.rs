#![forbid(unsafe_code)]

//! Hot multicast streams for collection and lifecycle notifications.
//!
//! - [`Broadcast`]: subscriber list with an optional replay-latest slot.
//! - [`Subscription`]: RAII guard that automatically unsubscribes on drop.
//!
//! # Invariants
//!
//! 1. Subscribers are notified in registration order.
//! 2. A non-replaying broadcast never delivers a value emitted before the
//!    subscription was taken.
//! 3. A replaying broadcast delivers exactly one retained value (the latest)
//!    at subscribe time, then every later emission.
//! 4. Dropping a [`Subscription`] removes the callback before the next
//!    emission.

pub mod broadcast;

pub use broadcast::{Broadcast, Subscription};
