//! Upward publication of a completed [`SensorDescriptor`] (§6 "Registry").
//!
//! Kept as a trait rather than a concrete channel type so the same Runner
//! works whether the consumer is a pubsub bus (as in the cyw43-style
//! drivers this crate's Runner is modeled on), a plain `Sender`, or
//! something test-only.

use crate::descriptor::SensorDescriptor;

pub trait Registry {
    type Error: core::fmt::Debug;

    /// Hand a freshly discovered (or rediscovered, post-resync) sensor
    /// descriptor upward. Failure here is logged, not fatal to the Port
    /// (§9 Open question resolutions): a registry outage shouldn't tear
    /// down an otherwise healthy sensor link.
    async fn publish(&mut self, descriptor: &SensorDescriptor) -> Result<(), Self::Error>;
}
