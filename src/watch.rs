//! `LivenessWatch`: the keep-alive ticker and the data-loss escalation it
//! drives (§4.5).

use embassy_time::Duration;

use crate::state::{PortState, MAX_DATA_ERR};

/// First keep-alive deadline after the baud change completes.
pub const KEEP_ALIVE_FIRST: Duration = Duration::from_millis(50);
/// Every deadline after the first.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(100);

/// What the Runner should do after one keep-alive deadline fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Write a `SYS_NACK` byte, requesting fresh data. Sent on every tick
    /// that ran at all, including the final one that also stops the
    /// ticker (mirrors the original driver's ordering: the NACK goes out
    /// before the timer gets torn down).
    pub send_nack: bool,
    /// The ticker should not be re-armed: either the Port is no longer a
    /// candidate for liveness tracking (unsynced or mid-discovery), or
    /// `data_err_count` just crossed [`crate::state::MAX_DATA_ERR`] and the
    /// Port has been forced back into sync-hunt.
    pub stop: bool,
}

/// Advance the watch by one tick. Called every `KEEP_ALIVE_INTERVAL` (or
/// once at `KEEP_ALIVE_FIRST`) while armed.
pub fn on_tick(state: &mut PortState) -> TickOutcome {
    if !state.synced || !state.info_done {
        return TickOutcome {
            send_nack: false,
            stop: true,
        };
    }

    if !state.data_received_since_last_tick {
        state.data_err_count = state.data_err_count.saturating_add(1);
        state.last_error = "no data received before keep-alive deadline";
        defmt::warn!(
            "keep-alive tick saw no data, data_err_count={}",
            state.data_err_count
        );
    }
    state.data_received_since_last_tick = false;

    let stop = state.data_err_count > MAX_DATA_ERR;
    if stop {
        state.on_sync_lost("keep-alive starvation");
    }
    TickOutcome {
        send_nack: true,
        stop,
    }
}
