//! Stateful byte accumulation: sync-hunt and the synced dispatch loop
//! (§4.1 "Sync hunt", "Framing when synced"). The counterpart to the
//! teacher's `read_frame.rs`, built on the pure helpers in [`crate::frame`].

use crate::decoder::{self, DecodeEvent};
use crate::frame::{self, cmd, sys, MsgType};
use crate::state::{PortState, MAX_DATA_ERR, TYPE_MAX};

/// Largest payload any real message on this wire carries (§4.1: size codes
/// 0..5, i.e. `1 << 5 == 32`). A header claiming more than this is not a
/// frame the protocol can produce — size codes 6/7 exist only because the
/// header's size field is three bits wide — and is treated as a fatal sync
/// loss before anything reads past the header.
const MAX_FRAME_PAYLOAD: usize = 32;

/// Largest possible on-wire frame: header + INFO subcommand byte +
/// `MAX_FRAME_PAYLOAD` bytes + checksum.
const MAX_FRAME_LEN: usize = 1 + 1 + MAX_FRAME_PAYLOAD + 1;

/// A fatal protocol violation forced a resync; `PortState::on_sync_lost`
/// has already been called with this reason by the time callers see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncLost(pub &'static str);

/// Feed newly received bytes through the framer. Calls `on_event` zero or
/// more times for anything [`decoder::decode`] surfaces (presently just
/// `AckAccepted`). Returns `Err` if the chunk forced a resync; `state` has
/// already been reset to the unsynced condition in that case.
pub fn ingest(
    state: &mut PortState,
    chunk: &[u8],
    on_event: &mut impl FnMut(DecodeEvent),
) -> Result<(), SyncLost> {
    if !state.synced {
        match sync_hunt(state, chunk) {
            Some(consumed) => feed_synced(state, &chunk[consumed..], on_event),
            None => Ok(()),
        }
    } else {
        feed_synced(state, chunk, on_event)
    }
}

/// Look for a single `CMD_TYPE` frame within `chunk` (sync-hunt does not
/// carry partial frames across calls, matching the original driver: a
/// candidate TYPE frame must land wholly inside one receive event).
/// Returns the index just past the accepted frame's checksum byte, so the
/// caller can hand any trailing bytes in the same chunk to the synced path.
fn sync_hunt(state: &mut PortState, chunk: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 2 < chunk.len() {
        let header = chunk[i];
        let type_id = chunk[i + 1];
        let checksum_byte = chunk[i + 2];
        if header == frame::build_header(MsgType::Cmd, 1, cmd::TYPE)
            && type_id != 0
            && type_id <= TYPE_MAX
            && frame::checksum(&[header, type_id]) == checksum_byte
        {
            state.on_type_accepted(type_id);
            defmt::info!("sync acquired, sensor type {}", type_id);
            return Some(i + 3);
        }
        i += 1;
    }
    None
}

fn feed_synced(
    state: &mut PortState,
    chunk: &[u8],
    on_event: &mut impl FnMut(DecodeEvent),
) -> Result<(), SyncLost> {
    for &byte in chunk {
        if state.rx_buffer.push(byte).is_err() {
            return fail(state, "rx buffer overflow");
        }
    }
    state.write_ptr = state.rx_buffer.len();

    loop {
        let Some(&header) = state.rx_buffer.first() else {
            break;
        };

        // A lone stray checksum byte (e.g. the tail half of a SYNC +
        // checksum pair split across two receive events).
        if header == 0xFF {
            consume(state, 1);
            continue;
        }

        let parsed = frame::parse(header);
        if parsed.payload_len > MAX_FRAME_PAYLOAD {
            return fail(state, "header declares a payload no real frame carries");
        }
        let mut size = frame::msg_size(header);

        // SYS SYNC immediately followed by its optional checksum byte:
        // consume both without dispatch (§4.1).
        let is_sync_pair = matches!(parsed.msg_type, MsgType::Sys)
            && parsed.cmd_or_mode == sys::SYNC
            && state.rx_buffer.len() >= 2
            && state.rx_buffer[1] == 0xFF;
        if is_sync_pair {
            size = 2;
        }

        if state.rx_buffer.len() < size {
            break; // wait for more bytes
        }

        let mut frame_buf = [0u8; MAX_FRAME_LEN];
        frame_buf[..size].copy_from_slice(&state.rx_buffer[..size]);
        let frame_bytes = &frame_buf[..size];

        if size > 1 && !is_sync_pair {
            if let Err(_) = frame::verify_checksum(frame_bytes, state.type_id) {
                if state.info_done {
                    state.data_err_count = state.data_err_count.saturating_add(1);
                    state.last_error = "bad data checksum";
                    defmt::warn!(
                        "bad data checksum, data_err_count={}",
                        state.data_err_count
                    );
                    if state.data_err_count > MAX_DATA_ERR {
                        return fail(state, "too many consecutive data checksum errors");
                    }
                    consume(state, size);
                    continue;
                } else {
                    return fail(state, "bad checksum before discovery completed");
                }
            }
        }

        if let Err(reason) = decoder::decode(state, frame_bytes, on_event) {
            return fail(state, reason.0);
        }
        consume(state, size);
    }
    Ok(())
}

fn consume(state: &mut PortState, n: usize) {
    let remaining = state.rx_buffer.len() - n;
    state.rx_buffer.copy_within(n.., 0);
    state.rx_buffer.truncate(remaining);
    state.write_ptr = remaining;
}

fn fail(state: &mut PortState, reason: &'static str) -> Result<(), SyncLost> {
    defmt::warn!("sync lost: {}", reason);
    state.on_sync_lost(reason);
    Err(SyncLost(reason))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::build_header;
    use crate::state::RX_BUFFER_CAP;

    fn type_frame(type_id: u8) -> [u8; 3] {
        let header = build_header(MsgType::Cmd, 1, cmd::TYPE);
        let cs = frame::checksum(&[header, type_id]);
        [header, type_id, cs]
    }

    fn cmd_frame(command: u8, payload: &[u8]) -> heapless::Vec<u8, 8> {
        let size = payload.len().max(1).next_power_of_two();
        let mut padded = [0u8; 4];
        padded[..payload.len()].copy_from_slice(payload);
        let header = build_header(MsgType::Cmd, size, command);
        let mut out: heapless::Vec<u8, 8> = heapless::Vec::new();
        out.push(header).unwrap();
        out.extend_from_slice(&padded[..size]).unwrap();
        let cs = frame::checksum(&out);
        out.push(cs).unwrap();
        out
    }

    #[test]
    fn sync_hunt_finds_type_frame_and_leaves_synced() {
        let mut state = PortState::new();
        let chunk = type_frame(32);
        ingest(&mut state, &chunk, &mut |_| {}).unwrap();
        assert!(state.synced);
        assert_eq!(state.type_id, 32);
    }

    #[test]
    fn sync_hunt_ignores_noise_before_type_frame() {
        let mut state = PortState::new();
        let mut chunk: heapless::Vec<u8, 16> = heapless::Vec::new();
        chunk.extend_from_slice(&[0x11, 0x22, 0x33]).unwrap();
        chunk.extend_from_slice(&type_frame(5)).unwrap();
        ingest(&mut state, &chunk, &mut |_| {}).unwrap();
        assert!(state.synced);
        assert_eq!(state.type_id, 5);
    }

    #[test]
    fn bytes_after_type_frame_in_same_chunk_are_fed_synced() {
        let mut state = PortState::new();
        let mut chunk: heapless::Vec<u8, 16> = heapless::Vec::new();
        chunk.extend_from_slice(&type_frame(5)).unwrap();
        chunk.extend_from_slice(&cmd_frame(cmd::MODES, &[0])).unwrap();
        ingest(&mut state, &chunk, &mut |_| {}).unwrap();
        assert_eq!(state.num_modes, 1);
    }

    #[test]
    fn bad_checksum_before_info_done_forces_resync() {
        let mut state = PortState::new();
        state.on_type_accepted(5);
        let mut frame = cmd_frame(cmd::MODES, &[0]);
        *frame.last_mut().unwrap() ^= 0xFF;
        let result = ingest(&mut state, &frame, &mut |_| {});
        assert!(result.is_err());
        assert!(!state.synced);
    }

    #[test]
    fn bad_data_checksum_during_streaming_counts_instead_of_resyncing() {
        let mut state = PortState::new();
        state.on_type_accepted(5);
        state.info_done = true;
        let header = build_header(MsgType::Data, 1, 0);
        let frame = [header, 9, 0x00]; // deliberately wrong checksum
        let result = ingest(&mut state, &frame, &mut |_| {});
        assert!(result.is_ok());
        assert_eq!(state.data_err_count, 1);
        assert!(state.synced);
    }

    #[test]
    fn exceeding_max_data_err_forces_resync() {
        let mut state = PortState::new();
        state.on_type_accepted(5);
        state.info_done = true;
        state.data_err_count = MAX_DATA_ERR;
        let header = build_header(MsgType::Data, 1, 0);
        let frame = [header, 9, 0x00];
        let result = ingest(&mut state, &frame, &mut |_| {});
        assert!(result.is_err());
        assert!(!state.synced);
    }

    #[test]
    fn stray_checksum_byte_is_consumed_without_dispatch() {
        let mut state = PortState::new();
        state.on_type_accepted(5);
        let mut chunk: heapless::Vec<u8, 16> = heapless::Vec::new();
        chunk.push(0xFF).unwrap();
        chunk.extend_from_slice(&cmd_frame(cmd::MODES, &[0])).unwrap();
        ingest(&mut state, &chunk, &mut |_| {}).unwrap();
        assert_eq!(state.num_modes, 1);
    }

    #[test]
    fn sync_plus_checksum_pair_consumes_two_bytes() {
        let mut state = PortState::new();
        state.on_type_accepted(5);
        let chunk = [0x00u8, 0xFF];
        ingest(&mut state, &chunk, &mut |_| {}).unwrap();
        assert!(state.rx_buffer.is_empty());
        assert!(state.synced);
    }

    /// §8 boundary: a candidate TYPE frame carrying type `0` doesn't match;
    /// the hunt keeps scanning and locks onto the next real one instead.
    #[test]
    fn sync_hunt_rejects_type_zero_and_keeps_scanning() {
        let mut state = PortState::new();
        let mut chunk: heapless::Vec<u8, 16> = heapless::Vec::new();
        chunk.extend_from_slice(&type_frame(0)).unwrap();
        chunk.extend_from_slice(&type_frame(7)).unwrap();
        ingest(&mut state, &chunk, &mut |_| {}).unwrap();
        assert!(state.synced);
        assert_eq!(state.type_id, 7);
    }

    /// §8 boundary: a candidate TYPE frame carrying a type above `TYPE_MAX`
    /// (124) is likewise rejected, not locked onto.
    #[test]
    fn sync_hunt_rejects_type_above_max_and_keeps_scanning() {
        let mut state = PortState::new();
        let mut chunk: heapless::Vec<u8, 16> = heapless::Vec::new();
        chunk.extend_from_slice(&type_frame(TYPE_MAX + 1)).unwrap();
        chunk.extend_from_slice(&type_frame(TYPE_MAX)).unwrap();
        ingest(&mut state, &chunk, &mut |_| {}).unwrap();
        assert!(state.synced);
        assert_eq!(state.type_id, TYPE_MAX);
    }

    /// A header whose size code is 6 or 7 (e.g. `0xF8`, a DATA header
    /// claiming a 128-byte payload) declares more than any real frame
    /// carries; it must be rejected outright rather than waited on until
    /// enough bytes accumulate to index past the frame buffer.
    #[test]
    fn oversized_size_code_is_rejected_without_indexing_past_frame_buf() {
        let mut state = PortState::new();
        state.on_type_accepted(5);
        let result = ingest(&mut state, &[0xF8], &mut |_| {});
        assert!(result.is_err());
        assert!(!state.synced);
    }

    /// §8 boundary: the accumulation buffer holds exactly `RX_BUFFER_CAP`
    /// bytes without complaint; one byte past that forces a resync rather
    /// than silently truncating or panicking.
    #[test]
    fn rx_buffer_exactly_full_is_fine_one_more_overflows() {
        let mut state = PortState::new();
        state.on_type_accepted(5);
        // Pre-fill directly (not through `ingest`) so no parsing happens
        // during setup: the first byte declares an INFO frame needing far
        // fewer bytes than are here, but since the push loop always runs
        // to completion before the parse loop starts, a still-growing
        // buffer can legitimately sit at capacity between receive events.
        let header = frame::build_header(MsgType::Info, 32, 0);
        state.rx_buffer.push(header).unwrap();
        state
            .rx_buffer
            .extend_from_slice(&[0u8; RX_BUFFER_CAP - 1])
            .unwrap();
        assert_eq!(state.rx_buffer.len(), RX_BUFFER_CAP);

        let result = ingest(&mut state, &[0xAA], &mut |_| {});
        assert!(result.is_err());
        assert!(!state.synced);
    }
}
