//! The upward-facing snapshot handed to a [`crate::registry::Registry`]
//! once discovery completes (§6 "Descriptor").
//!
//! `SensorDescriptor` borrows nothing from [`crate::state::PortState`]; it
//! is an owned copy so a `Registry::publish` call can hold it across an
//! await point without fighting the Port's mutex.

use heapless::{String, Vec};

use crate::state::{ModeInfo, PortState, SampleFormat, MODE_MAX, RAW_DATA_CAP};

/// One mode's complete, decoded description, as handed to a registry.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(defmt::Format)]
pub struct ModeDescriptor {
    pub name: String<11>,
    pub raw_min: f32,
    pub raw_max: f32,
    pub pct_min: f32,
    pub pct_max: f32,
    pub si_min: f32,
    pub si_max: f32,
    pub units: String<4>,
    pub data_sets: u8,
    pub format: SampleFormat,
    pub figures: u8,
    pub decimals: u8,
    pub raw_data: Vec<u8, RAW_DATA_CAP>,
}

impl From<&ModeInfo> for ModeDescriptor {
    fn from(mode: &ModeInfo) -> Self {
        Self {
            name: mode.name.clone(),
            raw_min: mode.raw_min(),
            raw_max: mode.raw_max(),
            pct_min: mode.pct_min(),
            pct_max: mode.pct_max(),
            si_min: mode.si_min(),
            si_max: mode.si_max(),
            units: mode.units.clone(),
            data_sets: mode.data_sets,
            format: mode.format,
            figures: mode.figures,
            decimals: mode.decimals,
            raw_data: mode.raw_data.clone(),
        }
    }
}

/// The complete discovered shape of a sensor, snapshotted out of
/// [`PortState`] once `SYS_ACK` lands (§6).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(defmt::Format)]
pub struct SensorDescriptor {
    pub type_id: u8,
    pub num_modes: u8,
    pub num_view_modes: u8,
    pub current_mode: u8,
    pub modes: [ModeDescriptor; MODE_MAX + 1],
}

impl From<&PortState> for SensorDescriptor {
    fn from(state: &PortState) -> Self {
        Self {
            type_id: state.type_id,
            num_modes: state.num_modes,
            num_view_modes: state.num_view_modes,
            current_mode: state.current_mode,
            modes: core::array::from_fn(|i| ModeDescriptor::from(state.mode_info(i))),
        }
    }
}
