#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
#[derive(defmt::Format)]
/// Errors raised by the pure header/checksum helpers in [`super`].
///
/// This never carries enough context to decide whether the Port should
/// resync or merely count a bad-data tick; that decision belongs to the
/// Framer (`crate::framer`), which inspects `PortState` alongside the
/// result to pick one.
pub enum FrameError {
    /// XOR of the frame's bytes did not match the trailing checksum byte.
    #[cfg_attr(feature = "thiserror", error("bad checksum"))]
    BadChecksum,
}
