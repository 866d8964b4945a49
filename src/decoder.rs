//! Per-frame dispatch (§4.2 "Decoder"): given one already checksum-verified
//! frame, mutate [`PortState`] and report anything the Runner needs to act
//! on via `on_event`.
//!
//! Checksum verification and byte accumulation both happen one layer up in
//! [`crate::framer`]; this module only ever sees a complete, already-valid
//! frame slice (header byte first, checksum byte last, except for the bare
//! one-byte SYS case).

use crate::frame::{self, cmd, info, sys, MsgType};
use crate::state::{sample_format_from_wire, InfoFlags, PortState, MODE_MAX};

/// Upward signal the Decoder can't fold into a `PortState` mutation alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(defmt::Format)]
pub enum DecodeEvent {
    /// `SYS_ACK` was accepted: the descriptor is complete and the Runner
    /// should schedule the ACK-send job (§4.4).
    AckAccepted,
}

/// A frame violated an invariant serious enough to force a resync; the
/// `&'static str` is the reason recorded into [`PortState::last_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fatal(pub &'static str);

/// Dispatch one complete frame. `frame` includes the header byte and (for
/// everything but a bare SYS byte) the trailing checksum byte; callers
/// should not strip either.
pub fn decode(
    state: &mut PortState,
    frame: &[u8],
    on_event: &mut impl FnMut(DecodeEvent),
) -> Result<(), Fatal> {
    let header = frame::parse(frame[0]);
    match header.msg_type {
        MsgType::Sys => decode_sys(state, header.cmd_or_mode, on_event),
        MsgType::Cmd => decode_cmd(state, header.cmd_or_mode, &frame[1..frame.len() - 1]),
        MsgType::Info => decode_info(
            state,
            header.cmd_or_mode,
            frame[1],
            &frame[2..frame.len() - 1],
        ),
        MsgType::Data => decode_data(state, header.cmd_or_mode, &frame[1..frame.len() - 1]),
    }
}

fn decode_sys(
    state: &mut PortState,
    cmd: u8,
    on_event: &mut impl FnMut(DecodeEvent),
) -> Result<(), Fatal> {
    match cmd {
        sys::ACK => {
            if state.num_modes == 0 || !state.info_flags.has_required() {
                return Err(Fatal("ACK received before INFO was complete"));
            }
            state.info_done = true;
            defmt::debug!("sensor type {} acked, descriptor complete", state.type_id);
            on_event(DecodeEvent::AckAccepted);
            Ok(())
        }
        // SYNC, NACK and ESC carry no state change the Port needs to react
        // to inbound; unrecognized SYS commands are likewise ignored rather
        // than fatal (the original firmware never errors on these either).
        _ => Ok(()),
    }
}

fn decode_cmd(state: &mut PortState, command: u8, payload: &[u8]) -> Result<(), Fatal> {
    match command {
        cmd::MODES => {
            if state.info_flags.contains(InfoFlags::CMD_MODES) {
                return Err(Fatal("duplicate MODES command"));
            }
            if payload.is_empty() || payload[0] as usize > MODE_MAX {
                return Err(Fatal("invalid mode count"));
            }
            state.num_modes = payload[0] + 1;
            state.num_view_modes = if payload.len() >= 2 {
                payload[1] + 1
            } else {
                state.num_modes
            };
            state.current_mode = payload[0];
            state.info_flags.insert(InfoFlags::CMD_MODES);
            Ok(())
        }
        cmd::SPEED => {
            if state.info_flags.contains(InfoFlags::CMD_SPEED) {
                return Err(Fatal("duplicate SPEED command"));
            }
            if payload.len() < 4 {
                return Err(Fatal("invalid SPEED payload"));
            }
            let baud = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            if !(crate::state::BAUD_MIN..=crate::state::BAUD_MAX).contains(&baud) {
                return Err(Fatal("baud rate out of range"));
            }
            state.new_baud = baud;
            state.info_flags.insert(InfoFlags::CMD_SPEED);
            Ok(())
        }
        // CMD_TYPE only makes sense during sync-hunt; CMD_SELECT/CMD_WRITE
        // are host-to-sensor only and never legally arrive inbound. Any of
        // these (or an unrecognized command) seen here is a protocol
        // violation serious enough to resync.
        _ => Err(Fatal("unexpected CMD while synced")),
    }
}

fn decode_info(
    state: &mut PortState,
    mode: u8,
    subcmd: u8,
    payload: &[u8],
) -> Result<(), Fatal> {
    let mode = mode as usize;
    if mode > MODE_MAX {
        return Err(Fatal("INFO mode index out of range"));
    }
    match subcmd {
        info::NAME => {
            let name = ascii_until_nul(payload);
            // Only the first byte is range-checked (§4.2: "First byte must be
            // in ['A','z']"), matching legoev3_uart.c's `buffer[2] < 'A' ||
            // buffer[2] > 'z'` — the rest of the name is unconstrained.
            let first_in_range = matches!(name.first(), Some(b) if (b'A'..=b'z').contains(b));
            if name.is_empty() || name.len() > 11 || !first_in_range {
                return Err(Fatal("invalid mode name"));
            }
            state.info_flags.remove(InfoFlags::ALL_INFO);
            let slot = state.mode_info_mut(mode);
            slot.name.clear();
            // ASCII-validated above; the write cannot exceed the 11-byte
            // capacity just checked, so this can't fail.
            let _ = slot
                .name
                .push_str(core::str::from_utf8(name).unwrap_or_default());
            state.current_mode = mode as u8;
            state.info_flags.insert(InfoFlags::INFO_NAME);
            Ok(())
        }
        info::RAW => {
            require_current_mode(state, mode, InfoFlags::INFO_RAW)?;
            if payload.len() < 8 {
                return Err(Fatal("invalid RAW payload"));
            }
            let slot = state.mode_info_mut(mode);
            slot.raw_min.copy_from_slice(&payload[0..4]);
            slot.raw_max.copy_from_slice(&payload[4..8]);
            state.info_flags.insert(InfoFlags::INFO_RAW);
            Ok(())
        }
        info::PCT => {
            require_current_mode(state, mode, InfoFlags::INFO_PCT)?;
            if payload.len() < 8 {
                return Err(Fatal("invalid PCT payload"));
            }
            let slot = state.mode_info_mut(mode);
            slot.pct_min.copy_from_slice(&payload[0..4]);
            slot.pct_max.copy_from_slice(&payload[4..8]);
            state.info_flags.insert(InfoFlags::INFO_PCT);
            Ok(())
        }
        info::SI => {
            require_current_mode(state, mode, InfoFlags::INFO_SI)?;
            if payload.len() < 8 {
                return Err(Fatal("invalid SI payload"));
            }
            let slot = state.mode_info_mut(mode);
            slot.si_min.copy_from_slice(&payload[0..4]);
            slot.si_max.copy_from_slice(&payload[4..8]);
            state.info_flags.insert(InfoFlags::INFO_SI);
            Ok(())
        }
        info::UNITS => {
            require_current_mode(state, mode, InfoFlags::INFO_UNITS)?;
            let units = ascii_until_nul(payload);
            if units.len() > 4 {
                return Err(Fatal("invalid units string"));
            }
            let slot = state.mode_info_mut(mode);
            slot.units.clear();
            let _ = slot
                .units
                .push_str(core::str::from_utf8(units).unwrap_or_default());
            state.info_flags.insert(InfoFlags::INFO_UNITS);
            Ok(())
        }
        info::FORMAT => {
            if state.current_mode as usize != mode {
                return Err(Fatal("FORMAT for a mode not currently being discovered"));
            }
            if state.info_flags.contains(InfoFlags::INFO_FORMAT) {
                return Err(Fatal("duplicate FORMAT INFO"));
            }
            if payload.len() < 4 {
                return Err(Fatal("invalid FORMAT payload"));
            }
            if payload[0] == 0 {
                return Err(Fatal("FORMAT data_sets must be nonzero"));
            }
            state.info_flags.insert(InfoFlags::INFO_FORMAT);
            if !state.info_flags.has_required() {
                return Err(Fatal("FORMAT received before required INFO"));
            }
            let slot = state.mode_info_mut(mode);
            slot.data_sets = payload[0];
            slot.format = sample_format_from_wire(payload[1]);
            // The walkback: figures/decimals are only taken, and the mode
            // cursor only decremented, for modes above the lowest. Mode 0's
            // FORMAT frame ends discovery in place (mirrors the original
            // driver's mode-0 special case).
            if state.current_mode != 0 {
                state.current_mode -= 1;
                let slot = state.mode_info_mut(mode);
                slot.figures = payload[2];
                slot.decimals = payload[3];
            }
            Ok(())
        }
        _ => Err(Fatal("unrecognized INFO sub-command")),
    }
}

fn require_current_mode(state: &PortState, mode: usize, flag: InfoFlags) -> Result<(), Fatal> {
    if state.current_mode as usize != mode {
        return Err(Fatal("INFO for a mode not currently being discovered"));
    }
    if state.info_flags.contains(flag) {
        return Err(Fatal("duplicate INFO sub-command"));
    }
    Ok(())
}

fn decode_data(state: &mut PortState, mode: u8, payload: &[u8]) -> Result<(), Fatal> {
    if !state.info_done {
        return Err(Fatal("DATA received before INFO was complete"));
    }
    let mode = mode as usize;
    if mode > MODE_MAX {
        return Err(Fatal("DATA mode index out of range"));
    }
    let slot = state.mode_info_mut(mode);
    slot.raw_data.clear();
    // Payload can't exceed RAW_DATA_CAP: the largest size code the header
    // format allows (32 bytes) matches the cap exactly.
    let _ = slot.raw_data.extend_from_slice(payload);
    state.current_mode = mode as u8;
    state.data_received_since_last_tick = true;
    if state.data_err_count > 0 {
        state.data_err_count -= 1;
    }
    Ok(())
}

fn ascii_until_nul(payload: &[u8]) -> &[u8] {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    &payload[..end]
}
