//! Core framing, discovery and keep-alive state machine for LEGO EV3-family
//! smart UART sensors.
//!
//! A Port starts in sync-hunt, locks onto a `CMD_TYPE` frame, walks the
//! sensor's modes backward collecting `INFO_NAME`/`RAW`/`PCT`/`SI`/`UNITS`/
//! `FORMAT`, acks the sensor once that's complete, renegotiates baud, and
//! then streams `DATA` while a keep-alive watch guards against a sensor
//! that's stopped talking. See [`runner::Runner`] for how the pieces are
//! driven.
//!
//! `no_std` by default; build with the `thiserror` feature (which also
//! pulls in `std`) for `std::error::Error` impls, or `serde` for
//! (de)serializable descriptor types.
#![cfg_attr(not(any(test, feature = "thiserror")), no_std)]

pub mod decoder;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod framer;
pub mod handshake;
pub mod link;
pub mod registry;
pub mod runner;
pub mod state;
pub mod watch;

pub use descriptor::{ModeDescriptor, SensorDescriptor};
pub use error::Error;
pub use link::Link;
pub use registry::Registry;
pub use runner::{split, CommandError, Control, Resources, Runner, MAX_WRITE_LEN};
pub use state::{InfoFlags, ModeInfo, PortState, SampleFormat, MAX_DATA_ERR, MODE_MAX, TYPE_MAX};
