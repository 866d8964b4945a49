//! The crate's top-level error type (§7), generic over the underlying
//! [`crate::link::Link`]'s error the same way the teacher's `Error` is
//! generic over its transport's tx/rx error types.

/// Everything that can end a Port's healthy operation.
///
/// Sync loss, bad DATA checksums, keep-alive starvation and publish
/// failures are all recovered from internally (`PortState::on_sync_lost`
/// and `PortState::last_error` record the reason, and the Port just drops
/// back into sync-hunt) — none of them end [`crate::Runner::run`], so none
/// of them need a variant here. The only thing that does end the loop is
/// the transport itself erroring out.
#[derive(Debug)]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
pub enum Error<L> {
    /// The underlying transport errored.
    #[cfg_attr(feature = "thiserror", error("link error"))]
    Link(L),
}

impl<L: defmt::Format> defmt::Format for Error<L> {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Link(e) => defmt::write!(f, "Link({})", e),
        }
    }
}
