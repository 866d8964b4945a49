//! Wires the three execution contexts from §5 onto one task.
//!
//! `Runner::run` is a single `select4` loop: the receive, timer and
//! deferred-work contexts the spec describes as conceptually concurrent
//! become three branches of one future, so they serialize for free and
//! never need a lock between them. The fourth caller — `Control::snapshot`,
//! running on whatever task owns the `Control` handle — is the only reason
//! `PortState` sits behind a mutex at all.
//!
//! Modeled on the `Runner`/driving-task split other embassy-based link
//! drivers use (a `ch::Runner` owning the hardware, a `Control` handle
//! talking to it over a channel): here the "hardware" is a [`Link`] and the
//! channel carries outbound commands instead of network frames.

use embassy_futures::select::{select4, Either4};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_sync::mutex::Mutex;
use embassy_time::{Instant, Timer};
use heapless::Vec;

use crate::decoder::DecodeEvent;
use crate::descriptor::SensorDescriptor;
use crate::error::Error;
use crate::frame::{self, cmd, sys, MsgType};
use crate::framer;
use crate::handshake;
use crate::link::Link;
use crate::registry::Registry;
use crate::state::PortState;
use crate::watch;

const COMMAND_CAP: usize = 4;
/// Largest payload `Control::write` accepts; matches the largest CMD/DATA
/// size code the wire format supports.
pub const MAX_WRITE_LEN: usize = 32;

enum Command {
    SetMode(u8),
    Write(Vec<u8, MAX_WRITE_LEN>),
}

/// What a user-initiated `set_mode`/`write` reports back to its caller
/// (§6: "errors from the link bubble back to the caller through the
/// channel's reply slot"). Unlike [`Error`], this carries no link-specific
/// payload: the reply slot is shared by every outstanding request and isn't
/// generic over `L`, so the link's own error detail is logged and collapsed
/// to [`CommandError::Link`] here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(defmt::Format)]
pub enum CommandError {
    /// `set_mode(m)` was rejected because `m >= num_modes`.
    InvalidMode,
    /// `write`'s payload is longer than [`MAX_WRITE_LEN`] can carry.
    TooLarge,
    /// The link rejected the write; the Port has internally treated this
    /// the same as a sync loss (§7: "internally, treat like SyncLost").
    Link,
}

#[derive(Clone, Copy)]
enum HandshakeStage {
    Ack,
    Baud,
}

/// Shared plumbing a caller allocates once (typically `static`) and passes
/// to both halves of [`split`].
pub struct Resources<M: RawMutex> {
    pub state: Mutex<M, PortState>,
    pub commands: Channel<M, Command, COMMAND_CAP>,
    /// Single-slot reply for whichever `set_mode`/`write` is currently
    /// in flight; `request_lock` below ensures at most one is.
    reply: Channel<M, Result<(), CommandError>, 1>,
    /// Held by `Control::set_mode`/`write` for the full send-then-await-reply
    /// round trip so concurrent callers can't cross replies on the shared
    /// `reply` slot.
    request_lock: Mutex<M, ()>,
}

impl<M: RawMutex> Resources<M> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PortState::new()),
            commands: Channel::new(),
            reply: Channel::new(),
            request_lock: Mutex::new(()),
        }
    }
}

impl<M: RawMutex> Default for Resources<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a driving [`Runner`] and its upward [`Control`] handle over
/// caller-owned `resources`.
pub fn split<'a, M: RawMutex, L: Link, R: Registry>(
    resources: &'a Resources<M>,
    link: L,
    registry: R,
) -> (Runner<'a, M, L, R>, Control<'a, M>) {
    let runner = Runner {
        state: &resources.state,
        link,
        registry,
        commands: resources.commands.receiver(),
        reply: resources.reply.sender(),
        handshake_deadline: None,
        keep_alive_deadline: None,
    };
    let control = Control {
        state: &resources.state,
        commands: resources.commands.sender(),
        reply: resources.reply.receiver(),
        request_lock: &resources.request_lock,
    };
    (runner, control)
}

/// Drives one Port: reads the link, reacts to handshake/keep-alive
/// deadlines, and services commands from a [`Control`] handle.
pub struct Runner<'a, M: RawMutex, L: Link, R: Registry> {
    state: &'a Mutex<M, PortState>,
    link: L,
    registry: R,
    commands: Receiver<'a, M, Command, COMMAND_CAP>,
    reply: Sender<'a, M, Result<(), CommandError>, 1>,
    handshake_deadline: Option<(Instant, HandshakeStage)>,
    keep_alive_deadline: Option<Instant>,
}

impl<'a, M: RawMutex, L: Link, R: Registry> Runner<'a, M, L, R> {
    /// Runs until the link itself errors out; sync loss, bad checksums and
    /// keep-alive starvation are all recovered from internally (the Port
    /// just drops back into sync-hunt) and never end the loop.
    pub async fn run(mut self) -> Result<(), Error<L::Error>> {
        let mut rx_buf = [0u8; 64];
        loop {
            let recv_fut = self.link.read(&mut rx_buf);
            let cmd_fut = self.commands.receive();
            let handshake_fut = Self::wait_for(self.handshake_deadline.map(|(at, _)| at));
            let keep_alive_fut = Self::wait_for(self.keep_alive_deadline);

            match select4(recv_fut, cmd_fut, handshake_fut, keep_alive_fut).await {
                Either4::First(result) => self.on_recv(result, &rx_buf).await?,
                Either4::Second(command) => self.on_command(command).await?,
                Either4::Third(()) => self.on_handshake_deadline().await?,
                Either4::Fourth(()) => self.on_keep_alive_deadline().await?,
            }
        }
    }

    async fn wait_for(deadline: Option<Instant>) {
        match deadline {
            Some(at) => Timer::at(at).await,
            None => core::future::pending().await,
        }
    }

    async fn on_recv(
        &mut self,
        result: Result<usize, L::Error>,
        buf: &[u8],
    ) -> Result<(), Error<L::Error>> {
        let n = result.map_err(Error::Link)?;
        if n == 0 {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        let mut ack_fired = false;
        let outcome = framer::ingest(&mut state, &buf[..n], &mut |ev| {
            if ev == DecodeEvent::AckAccepted {
                ack_fired = true;
            }
        });
        drop(state);
        match outcome {
            Ok(()) => {
                if ack_fired {
                    self.handshake_deadline =
                        Some((Instant::now() + handshake::ACK_SEND_DELAY, HandshakeStage::Ack));
                }
            }
            Err(_) => {
                self.handshake_deadline = None;
                self.keep_alive_deadline = None;
            }
        }
        Ok(())
    }

    /// A write rejected by the link during a deferred handshake/keep-alive
    /// job is not a fatal `Runner::run` error: §7 only bubbles `LinkError`
    /// to the caller of a *user-initiated* `set_mode`/`write`. Anywhere
    /// else it's "internally, treat like SyncLost" — drop back to sync-hunt
    /// and clear any pending deadlines.
    fn force_resync_on_link_error(&mut self, state: &mut PortState, reason: &'static str) {
        state.on_sync_lost(reason);
        self.handshake_deadline = None;
        self.keep_alive_deadline = None;
    }

    async fn on_handshake_deadline(&mut self) -> Result<(), Error<L::Error>> {
        let Some((_, stage)) = self.handshake_deadline.take() else {
            return Ok(());
        };
        match stage {
            HandshakeStage::Ack => {
                let mut state = self.state.lock().await;
                match handshake::send_ack(&mut state, &mut self.link, &mut self.registry).await {
                    Ok(()) => {
                        self.handshake_deadline = Some((
                            Instant::now() + handshake::BAUD_CHANGE_DELAY,
                            HandshakeStage::Baud,
                        ));
                    }
                    Err(_) => self.force_resync_on_link_error(&mut state, "ACK write failed"),
                }
            }
            HandshakeStage::Baud => {
                let mut state = self.state.lock().await;
                match handshake::change_baud(&mut state, &mut self.link).await {
                    Ok(first_tick) => {
                        self.keep_alive_deadline = first_tick.map(|delay| Instant::now() + delay);
                    }
                    Err(_) => self.force_resync_on_link_error(&mut state, "baud change failed"),
                }
            }
        }
        Ok(())
    }

    async fn on_keep_alive_deadline(&mut self) -> Result<(), Error<L::Error>> {
        let mut state = self.state.lock().await;
        let outcome = watch::on_tick(&mut state);
        if outcome.send_nack {
            let nack = frame::build_header(MsgType::Sys, 1, sys::NACK);
            if self.link.write(&[nack]).await.is_err() {
                self.force_resync_on_link_error(&mut state, "keep-alive NACK write failed");
                return Ok(());
            }
        }
        self.keep_alive_deadline = if outcome.stop {
            None
        } else {
            Some(Instant::now() + watch::KEEP_ALIVE_INTERVAL)
        };
        Ok(())
    }

    async fn on_command(&mut self, command: Command) -> Result<(), Error<L::Error>> {
        let result = match command {
            Command::SetMode(mode) => self.do_set_mode(mode).await,
            Command::Write(payload) => self.do_write(&payload).await,
        };
        self.reply.send(result).await;
        Ok(())
    }

    async fn do_set_mode(&mut self, mode: u8) -> Result<(), CommandError> {
        let num_modes = self.state.lock().await.num_modes;
        if mode >= num_modes {
            return Err(CommandError::InvalidMode);
        }
        let header = frame::build_header(MsgType::Cmd, 1, cmd::SELECT);
        let cs = frame::checksum(&[header, mode]);
        self.send_user_frame(&[header, mode, cs]).await
    }

    async fn do_write(&mut self, payload: &[u8]) -> Result<(), CommandError> {
        let size = payload.len().max(1).next_power_of_two();
        let mut padded = [0u8; MAX_WRITE_LEN];
        padded[..payload.len()].copy_from_slice(payload);
        let header = frame::build_header(MsgType::Cmd, size, cmd::WRITE);
        let mut out: Vec<u8, { MAX_WRITE_LEN + 2 }> = Vec::new();
        let _ = out.push(header);
        let _ = out.extend_from_slice(&padded[..size]);
        let cs = frame::checksum(&out);
        let _ = out.push(cs);
        self.send_user_frame(&out).await
    }

    async fn send_user_frame(&mut self, bytes: &[u8]) -> Result<(), CommandError> {
        if self.link.write(bytes).await.is_err() {
            let mut state = self.state.lock().await;
            self.force_resync_on_link_error(&mut state, "user-initiated write failed");
            return Err(CommandError::Link);
        }
        Ok(())
    }
}

/// Upward handle for a Port being driven by a [`Runner`] on another task.
pub struct Control<'a, M: RawMutex> {
    state: &'a Mutex<M, PortState>,
    commands: Sender<'a, M, Command, COMMAND_CAP>,
    reply: Receiver<'a, M, Result<(), CommandError>, 1>,
    request_lock: &'a Mutex<M, ()>,
}

impl<'a, M: RawMutex> Control<'a, M> {
    /// A consistent snapshot of everything discovered about the sensor so
    /// far. Safe to call at any point in the Port's lifecycle; fields are
    /// simply zeroed/defaulted before discovery completes.
    pub async fn snapshot(&self) -> SensorDescriptor {
        let state = self.state.lock().await;
        SensorDescriptor::from(&*state)
    }

    /// Request `CMD_SELECT` into `mode`. Rejected with
    /// [`CommandError::InvalidMode`] if `mode >= num_modes`; a link failure
    /// comes back as [`CommandError::Link`] (§6).
    pub async fn set_mode(&self, mode: u8) -> Result<(), CommandError> {
        let _guard = self.request_lock.lock().await;
        self.commands.send(Command::SetMode(mode)).await;
        self.reply.receive().await
    }

    /// Request `CMD_WRITE` of `bytes`, zero-padded to the next power of two
    /// up to [`MAX_WRITE_LEN`] (§6). A link failure comes back as
    /// [`CommandError::Link`].
    pub async fn write(&self, bytes: &[u8]) -> Result<(), CommandError> {
        if bytes.len() > MAX_WRITE_LEN {
            return Err(CommandError::TooLarge);
        }
        let mut buf = Vec::new();
        buf.extend_from_slice(bytes)
            .map_err(|_| CommandError::TooLarge)?;
        let _guard = self.request_lock.lock().await;
        self.commands.send(Command::Write(buf)).await;
        self.reply.receive().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::link::mock::MockLink;
    use crate::registry::mock::MockRegistry;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use futures::executor::block_on;

    /// Builds a bare `Runner` without going through `split`, so these tests
    /// can drive `do_set_mode`/`do_write` directly instead of the full
    /// `select4` loop (which needs a real timer-driving executor the
    /// `Runner`/`Control` pair otherwise has no reason to depend on).
    fn bare_runner<'a>(
        state: &'a Mutex<NoopRawMutex, PortState>,
        commands: &'a Channel<NoopRawMutex, Command, COMMAND_CAP>,
        reply: &'a Channel<NoopRawMutex, Result<(), CommandError>, 1>,
    ) -> Runner<'a, NoopRawMutex, MockLink, MockRegistry> {
        Runner {
            state,
            link: MockLink::new(),
            registry: MockRegistry::new(),
            commands: commands.receiver(),
            reply: reply.sender(),
            handshake_deadline: None,
            keep_alive_deadline: None,
        }
    }

    /// §6/§8 P6: `set_mode(m)` rejected once `m >= num_modes`, never
    /// touching the link.
    #[test]
    fn set_mode_rejects_out_of_range_mode() {
        let state = Mutex::<NoopRawMutex, _>::new(PortState::new());
        let commands = Channel::new();
        let reply = Channel::new();
        let mut runner = bare_runner(&state, &commands, &reply);
        block_on(async {
            state.lock().await.num_modes = 2;
        });

        let result = block_on(runner.do_set_mode(2));
        assert_eq!(result, Err(CommandError::InvalidMode));
        assert!(runner.link.tx.is_empty());
    }

    /// §8 P6: a valid `set_mode(m)` emits exactly three bytes satisfying
    /// the header-checksum relation.
    #[test]
    fn set_mode_emits_three_byte_select_frame() {
        let state = Mutex::<NoopRawMutex, _>::new(PortState::new());
        let commands = Channel::new();
        let reply = Channel::new();
        let mut runner = bare_runner(&state, &commands, &reply);
        block_on(async {
            state.lock().await.num_modes = 3;
        });

        let result = block_on(runner.do_set_mode(1));
        assert_eq!(result, Ok(()));
        assert_eq!(runner.link.tx.len(), 3);
        let bytes = runner.link.tx.as_slice();
        assert_eq!(bytes[2], frame::checksum(&bytes[..2]));
    }

    /// §7: a link write failure during a user-initiated command bubbles
    /// back as `CommandError::Link` and forces the Port back to sync-hunt,
    /// rather than ending `Runner::run`.
    #[test]
    fn write_link_failure_forces_resync_and_replies_with_link_error() {
        let state = Mutex::<NoopRawMutex, _>::new(PortState::new());
        let commands = Channel::new();
        let reply = Channel::new();
        let mut runner = bare_runner(&state, &commands, &reply);
        block_on(async {
            let mut guard = state.lock().await;
            guard.on_type_accepted(5);
            guard.info_done = true;
        });
        runner.link.fail_next_write = true;

        let result = block_on(runner.do_write(&[1, 2, 3]));
        assert_eq!(result, Err(CommandError::Link));
        block_on(async {
            assert!(!state.lock().await.synced);
        });
    }
}
