//! The byte-pipe abstraction the Runner drives (§6 "Link").
//!
//! Built directly on `embedded-io-async`'s `Read`/`Write` so any UART
//! driver that already implements those (the same traits the teacher reads
//! its sensor through) gets `Link` for free once it also knows how to
//! renegotiate its baud rate — the one operation this protocol needs that a
//! generic byte stream doesn't give you.

use embedded_io_async::{ErrorType, Read, Write};

/// A UART-like transport capable of mid-stream baud renegotiation.
///
/// `Read`/`Write` already share one associated error type via their common
/// `ErrorType` supertrait; `Link` only has to add the one operation a plain
/// byte stream doesn't give you.
pub trait Link: Read + Write {
    /// Apply a new baud rate. Must take effect only after any
    /// previously-queued writes have drained onto the wire (§4.4 "Baud
    /// change job").
    async fn set_baud(&mut self, baud: u32) -> Result<(), <Self as ErrorType>::Error>;
}
