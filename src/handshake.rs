//! The two deferred jobs that close out discovery (§4.4 "HandshakeDriver").
//!
//! Both are plain async functions rather than a struct with its own state:
//! all the state they need already lives in [`PortState`], and the only
//! thing the Runner has to remember between calls is *when* to call them
//! next, which it tracks as `embassy_time::Instant` deadlines alongside its
//! other event-loop branches.

use embassy_time::Duration;

use crate::error::Error;
use crate::frame::{self, sys, MsgType};
use crate::link::Link;
use crate::registry::Registry;
use crate::descriptor::SensorDescriptor;
use crate::state::{PortState, TYPE_MAX};

/// Delay between accepting the sensor's `SYS_ACK` and sending ours (§4.4).
pub const ACK_SEND_DELAY: Duration = Duration::from_millis(10);
/// Delay between sending our `SYS_ACK` and actually switching baud rates,
/// giving the byte time to drain onto the wire first.
pub const BAUD_CHANGE_DELAY: Duration = Duration::from_millis(10);

/// ACK-send job (§4.4): publish the descriptor if this is the first time
/// this Port has completed discovery (or the first time since a resync),
/// then write our own `SYS_ACK` byte.
pub async fn send_ack<L, R>(
    state: &mut PortState,
    link: &mut L,
    registry: &mut R,
) -> Result<(), Error<L::Error>>
where
    L: Link,
    R: Registry,
{
    if state.type_id == 0 || state.type_id > TYPE_MAX {
        defmt::warn!(
            "not publishing descriptor, type id {} out of range",
            state.type_id
        );
        state.last_error = "type id out of range at ack time";
    } else if !state.descriptor_published {
        let descriptor = SensorDescriptor::from(&*state);
        match registry.publish(&descriptor).await {
            Ok(()) => {
                state.descriptor_published = true;
                defmt::debug!("published descriptor for sensor type {}", state.type_id);
            }
            Err(_) => {
                defmt::warn!("failed to publish sensor descriptor");
                state.last_error = "publish failed";
            }
        }
    }

    let ack = frame::build_header(MsgType::Sys, 1, sys::ACK);
    link.write(&[ack]).await.map_err(Error::Link)?;
    link.flush().await.map_err(Error::Link)?;
    Ok(())
}

/// Baud-change job (§4.4): drain the transmit buffer, apply the
/// renegotiated baud rate, and report whether the keep-alive ticker should
/// now be armed (only once discovery has actually completed; a resync
/// mid-handshake clears `info_done` and this job becomes a no-op for
/// liveness purposes).
pub async fn change_baud<L: Link>(
    state: &mut PortState,
    link: &mut L,
) -> Result<Option<Duration>, Error<L::Error>> {
    link.flush().await.map_err(Error::Link)?;
    link.set_baud(state.new_baud).await.map_err(Error::Link)?;
    defmt::info!("switched to {} baud", state.new_baud);
    if state.info_done {
        Ok(Some(crate::watch::KEEP_ALIVE_FIRST))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::link::mock::MockLink;
    use crate::registry::mock::MockRegistry;
    use futures::executor::block_on;

    #[test]
    fn ack_job_publishes_once_and_writes_sys_ack() {
        let mut state = PortState::new();
        state.on_type_accepted(5);
        state.num_modes = 1;
        state.info_flags = crate::state::InfoFlags::REQUIRED;
        state.info_done = true;
        let mut link = MockLink::new();
        let mut registry = MockRegistry::new();

        block_on(send_ack(&mut state, &mut link, &mut registry)).unwrap();
        assert!(state.descriptor_published);
        assert_eq!(registry.published.len(), 1);
        assert_eq!(link.tx.as_slice(), &[frame::build_header(MsgType::Sys, 1, sys::ACK)]);

        // A second call (e.g. a spurious repeat) must not republish.
        block_on(send_ack(&mut state, &mut link, &mut registry)).unwrap();
        assert_eq!(registry.published.len(), 1);
    }

    #[test]
    fn ack_job_skips_publish_for_out_of_range_type() {
        let mut state = PortState::new();
        state.type_id = 200;
        let mut link = MockLink::new();
        let mut registry = MockRegistry::new();
        block_on(send_ack(&mut state, &mut link, &mut registry)).unwrap();
        assert!(registry.published.is_empty());
        assert!(!state.descriptor_published);
    }

    #[test]
    fn baud_job_arms_keep_alive_only_when_info_done() {
        let mut state = PortState::new();
        state.new_baud = 57600;
        state.info_done = false;
        let mut link = MockLink::new();
        let next = block_on(change_baud(&mut state, &mut link)).unwrap();
        assert_eq!(next, None);
        assert_eq!(link.baud_history.as_slice(), &[57600]);

        state.info_done = true;
        let next = block_on(change_baud(&mut state, &mut link)).unwrap();
        assert_eq!(next, Some(crate::watch::KEEP_ALIVE_FIRST));
    }
}
