//! The Port's data model: everything the spec calls "Port state" (§3).
//!
//! `PortState` is the single struct all three execution contexts (receive,
//! timer, deferred-work, see [`crate::runner`]) read and mutate. It carries
//! no behaviour of its own beyond small accessors; the framing, decoding and
//! handshake logic in the sibling modules borrows it mutably for the
//! duration of one synchronous step.

use heapless::{String, Vec};

/// Highest legal sensor type id.
pub const TYPE_MAX: u8 = 124;
/// Highest legal mode index (`num_modes` therefore tops out at 8).
pub const MODE_MAX: usize = 7;
/// Consecutive missed keep-alive ticks / bad data checksums tolerated before
/// a full resync.
pub const MAX_DATA_ERR: u8 = 6;
/// Capacity of the raw accumulation buffer.
pub const RX_BUFFER_CAP: usize = 256;
/// Bytes of the most recent DATA payload kept per mode.
pub const RAW_DATA_CAP: usize = 32;

pub const BAUD_MIN: u32 = 2400;
pub const BAUD_MAX: u32 = 460_800;

/// A sample-format tag as carried by an `INFO_FORMAT` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(defmt::Format)]
pub enum SampleFormat {
    S8,
    S16,
    S32,
    Float,
    /// Any value the sensor sent that isn't one of the four documented
    /// codes. Kept instead of rejected: the spec only requires `data_sets`
    /// to be validated, not the format byte.
    Unknown(u8),
}

impl SampleFormat {
    fn from_wire(byte: u8) -> Self {
        match byte {
            0 => Self::S8,
            1 => Self::S16,
            2 => Self::S32,
            3 => Self::Float,
            other => Self::Unknown(other),
        }
    }
}

/// Which descriptor pieces the Builder has accepted so far, per §3/§4.3.
///
/// A hand rolled bitset rather than the `bitflags` crate: nine bits with
/// exactly two derived operations (REQUIRED check, per-mode clear) do not
/// earn a macro dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[derive(defmt::Format)]
pub struct InfoFlags(u16);

impl InfoFlags {
    pub const CMD_TYPE: Self = Self(1 << 0);
    pub const CMD_MODES: Self = Self(1 << 1);
    pub const CMD_SPEED: Self = Self(1 << 2);
    pub const INFO_NAME: Self = Self(1 << 3);
    pub const INFO_RAW: Self = Self(1 << 4);
    pub const INFO_PCT: Self = Self(1 << 5);
    pub const INFO_SI: Self = Self(1 << 6);
    pub const INFO_UNITS: Self = Self(1 << 7);
    pub const INFO_FORMAT: Self = Self(1 << 8);

    /// Per-mode flags cleared by every `INFO_NAME` frame (§4.2).
    pub const ALL_INFO: Self = Self(
        Self::INFO_NAME.0
            | Self::INFO_RAW.0
            | Self::INFO_PCT.0
            | Self::INFO_SI.0
            | Self::INFO_UNITS.0
            | Self::INFO_FORMAT.0,
    );

    /// Must all be set before `SYS_ACK` is honored (§4.2, §8 P2).
    pub const REQUIRED: Self =
        Self(Self::CMD_TYPE.0 | Self::CMD_MODES.0 | Self::INFO_NAME.0 | Self::INFO_FORMAT.0);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn has_required(self) -> bool {
        self.contains(Self::REQUIRED)
    }
}

impl core::ops::BitOr for InfoFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Per-mode descriptor, §3 `ModeInfo`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(defmt::Format)]
pub struct ModeInfo {
    pub name: String<11>,
    /// Raw IEEE-754 little-endian bytes, decoded on demand (§9: "wire
    /// layout is endian-defined regardless of host").
    pub raw_min: [u8; 4],
    pub raw_max: [u8; 4],
    pub pct_min: [u8; 4],
    pub pct_max: [u8; 4],
    pub si_min: [u8; 4],
    pub si_max: [u8; 4],
    pub units: String<4>,
    pub data_sets: u8,
    pub format: SampleFormat,
    pub figures: u8,
    pub decimals: u8,
    pub raw_data: Vec<u8, RAW_DATA_CAP>,
}

impl ModeInfo {
    /// Defaults installed into every mode slot on sensor reset (§3).
    fn reset() -> Self {
        Self {
            name: String::new(),
            raw_min: [0; 4],
            raw_max: 1023.0f32.to_le_bytes(),
            pct_min: [0; 4],
            pct_max: 100.0f32.to_le_bytes(),
            si_min: [0; 4],
            si_max: 1.0f32.to_le_bytes(),
            units: String::new(),
            data_sets: 0,
            format: SampleFormat::S8,
            figures: 4,
            decimals: 0,
            raw_data: Vec::new(),
        }
    }

    pub fn raw_min(&self) -> f32 {
        f32::from_le_bytes(self.raw_min)
    }

    pub fn raw_max(&self) -> f32 {
        f32::from_le_bytes(self.raw_max)
    }

    pub fn pct_min(&self) -> f32 {
        f32::from_le_bytes(self.pct_min)
    }

    pub fn pct_max(&self) -> f32 {
        f32::from_le_bytes(self.pct_max)
    }

    pub fn si_min(&self) -> f32 {
        f32::from_le_bytes(self.si_min)
    }

    pub fn si_max(&self) -> f32 {
        f32::from_le_bytes(self.si_max)
    }
}

pub(crate) fn sample_format_from_wire(byte: u8) -> SampleFormat {
    SampleFormat::from_wire(byte)
}

/// Everything the spec's §3 "Port state" names, minus the presentation-layer
/// concerns (sysfs-style attributes) the original C driver bolts on.
#[derive(Debug)]
#[derive(defmt::Format)]
pub struct PortState {
    pub synced: bool,
    pub type_id: u8,
    pub num_modes: u8,
    pub num_view_modes: u8,
    pub current_mode: u8,
    pub info_flags: InfoFlags,
    pub info_done: bool,
    pub new_baud: u32,
    pub data_err_count: u8,
    pub data_received_since_last_tick: bool,
    pub write_ptr: usize,
    pub rx_buffer: Vec<u8, RX_BUFFER_CAP>,
    pub mode_info: [ModeInfo; MODE_MAX + 1],
    pub last_error: &'static str,
    /// Set once the descriptor has been handed to the registry at least
    /// once; distinguishes first discovery from a post-resync reconnect
    /// (§4.4).
    pub descriptor_published: bool,
}

impl Default for PortState {
    fn default() -> Self {
        Self::new()
    }
}

impl PortState {
    pub fn new() -> Self {
        Self {
            synced: false,
            type_id: 0,
            num_modes: 0,
            num_view_modes: 0,
            current_mode: 0,
            info_flags: InfoFlags::empty(),
            info_done: false,
            new_baud: BAUD_MIN,
            data_err_count: 0,
            data_received_since_last_tick: false,
            write_ptr: 0,
            rx_buffer: Vec::new(),
            mode_info: core::array::from_fn(|_| ModeInfo::reset()),
            last_error: "",
            descriptor_published: false,
        }
    }

    /// Reset everything a fresh TYPE frame re-establishes (§4.1 "On
    /// acceptance: clear all state, install defaults into every mode
    /// slot...").
    pub fn on_type_accepted(&mut self, type_id: u8) {
        self.num_modes = 0;
        self.num_view_modes = 0;
        self.current_mode = 0;
        self.mode_info = core::array::from_fn(|_| ModeInfo::reset());
        self.type_id = type_id;
        self.info_flags = InfoFlags::CMD_TYPE;
        self.synced = true;
        self.info_done = false;
        self.write_ptr = 0;
        self.rx_buffer.clear();
        self.data_received_since_last_tick = false;
        self.data_err_count = 0;
    }

    /// Fatal sync loss recovery (§4.1 "Failure policy", §7 `SyncLost`).
    pub fn on_sync_lost(&mut self, reason: &'static str) {
        self.synced = false;
        self.info_done = false;
        self.new_baud = BAUD_MIN;
        self.write_ptr = 0;
        self.rx_buffer.clear();
        self.last_error = reason;
    }

    pub fn mode_info(&self, mode: usize) -> &ModeInfo {
        &self.mode_info[mode]
    }

    pub fn mode_info_mut(&mut self, mode: usize) -> &mut ModeInfo {
        &mut self.mode_info[mode]
    }
}
