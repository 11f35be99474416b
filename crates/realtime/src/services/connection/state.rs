//! Connection lifecycle state machine.
//!
//! All mutation goes through the transition methods below. An attempt holds an
//! [`AttemptTicket`]; `stop()` advances the epoch, so any continuation that still holds
//! an older ticket is rejected with [`Superseded`] instead of resurrecting a link the
//! caller already asked to tear down.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::models::connection_state::ConnectionState;

/// Proof that a connection attempt is still the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTicket {
    epoch: u64,
}

impl AttemptTicket {
    pub fn epoch(self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartRejected {
    #[error("already connected")]
    AlreadyConnected,
    #[error("previous attempt started too recently, retry in {retry_in:?}")]
    Throttled { retry_in: Duration },
}

/// The attempt was overtaken by `stop()` or a newer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection attempt superseded")]
pub struct Superseded;

#[derive(Debug, Clone)]
struct ActiveLink<L> {
    epoch: u64,
    handle: L,
    /// When the link was established or last re-established.
    ready_since: Instant,
}

/// `L` is the link handle type; the manager stores `Arc<dyn PushConnection>`.
#[derive(Debug)]
pub struct ConnectionMachine<L> {
    state: ConnectionState,
    should_connect: bool,
    epoch: u64,
    last_attempt_at: Option<Instant>,
    link: Option<ActiveLink<L>>,
}

impl<L> Default for ConnectionMachine<L> {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            should_connect: false,
            epoch: 0,
            last_attempt_at: None,
            link: None,
        }
    }
}

impl<L: Clone> ConnectionMachine<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn should_connect(&self) -> bool {
        self.should_connect
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Connected && self.should_connect
    }

    /// Disconnected → Connecting, subject to reuse and throttle.
    pub fn begin_attempt(
        &mut self,
        now: Instant,
        throttle: Duration,
    ) -> Result<AttemptTicket, StartRejected> {
        if self.should_connect && self.state.has_link() && self.link.is_some() {
            return Err(StartRejected::AlreadyConnected);
        }
        if let Some(last) = self.last_attempt_at {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < throttle {
                return Err(StartRejected::Throttled {
                    retry_in: throttle - elapsed,
                });
            }
        }

        self.epoch += 1;
        self.should_connect = true;
        self.last_attempt_at = Some(now);
        self.state = ConnectionState::Connecting;
        Ok(AttemptTicket { epoch: self.epoch })
    }

    pub fn check(&self, ticket: AttemptTicket) -> Result<(), Superseded> {
        if self.should_connect && self.epoch == ticket.epoch {
            Ok(())
        } else {
            Err(Superseded)
        }
    }

    /// Hands the previous link (if any) to the attempt so it can be closed first.
    pub fn take_previous_link(&mut self, ticket: AttemptTicket) -> Result<Option<L>, Superseded> {
        self.check(ticket)?;
        Ok(self.link.take().map(|link| link.handle))
    }

    /// Connecting → Connected.
    pub fn established(
        &mut self,
        ticket: AttemptTicket,
        handle: L,
        now: Instant,
    ) -> Result<(), Superseded> {
        self.check(ticket)?;
        self.link = Some(ActiveLink {
            epoch: ticket.epoch,
            handle,
            ready_since: now,
        });
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// Connecting → Disconnected after a failed handshake or missing credential.
    pub fn failed(&mut self, ticket: AttemptTicket) -> Result<(), Superseded> {
        self.check(ticket)?;
        self.link = None;
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    /// Any state → Disconnected. Returns the link that has to be closed.
    pub fn stop(&mut self) -> Option<L> {
        self.epoch += 1;
        self.should_connect = false;
        self.state = ConnectionState::Disconnected;
        self.link.take().map(|link| link.handle)
    }

    fn owns_link(&self, epoch: u64) -> bool {
        self.link.as_ref().is_some_and(|link| link.epoch == epoch)
    }

    /// Connected → Reconnecting. Events from links that are no longer current are ignored.
    pub fn transport_reconnecting(&mut self, epoch: u64) -> bool {
        if !self.owns_link(epoch) {
            return false;
        }
        self.state = ConnectionState::Reconnecting;
        true
    }

    /// Reconnecting → Connected.
    pub fn transport_reconnected(&mut self, epoch: u64, now: Instant) -> bool {
        if !self.owns_link(epoch) {
            return false;
        }
        if let Some(link) = self.link.as_mut() {
            link.ready_since = now;
        }
        self.state = ConnectionState::Connected;
        true
    }

    /// Transport gave up or was closed remotely → Disconnected.
    pub fn transport_closed(&mut self, epoch: u64) -> bool {
        if !self.owns_link(epoch) {
            return false;
        }
        self.link = None;
        self.state = ConnectionState::Disconnected;
        true
    }

    pub fn is_current_link(&self, epoch: u64) -> bool {
        self.owns_link(epoch)
    }

    /// Link usable for invocations right now, with the instant it became ready.
    pub fn ready_link(&self) -> Option<(L, Instant)> {
        if !self.is_ready() {
            return None;
        }
        self.link
            .as_ref()
            .map(|link| (link.handle.clone(), link.ready_since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THROTTLE: Duration = Duration::from_secs(5);

    fn connected_machine(now: Instant) -> (ConnectionMachine<&'static str>, AttemptTicket) {
        let mut machine = ConnectionMachine::new();
        let ticket = machine.begin_attempt(now, THROTTLE).unwrap();
        machine.established(ticket, "link-1", now).unwrap();
        (machine, ticket)
    }

    #[test]
    fn starts_disconnected_and_not_ready() {
        let machine: ConnectionMachine<&str> = ConnectionMachine::new();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(!machine.is_ready());
        assert!(!machine.should_connect());
    }

    #[test]
    fn happy_path_reaches_connected_and_ready() {
        let now = Instant::now();
        let (machine, _) = connected_machine(now);
        assert_eq!(machine.state(), ConnectionState::Connected);
        assert!(machine.is_ready());
        assert_eq!(machine.ready_link(), Some(("link-1", now)));
    }

    #[test]
    fn second_attempt_inside_throttle_window_is_rejected() {
        let now = Instant::now();
        let mut machine: ConnectionMachine<&str> = ConnectionMachine::new();
        let ticket = machine.begin_attempt(now, THROTTLE).unwrap();
        machine.failed(ticket).unwrap();

        let rejected = machine.begin_attempt(now + Duration::from_secs(2), THROTTLE);
        assert_eq!(
            rejected,
            Err(StartRejected::Throttled {
                retry_in: Duration::from_secs(3)
            })
        );
        assert!(machine.begin_attempt(now + THROTTLE, THROTTLE).is_ok());
    }

    #[test]
    fn start_while_connected_reuses_link() {
        let now = Instant::now();
        let (mut machine, _) = connected_machine(now);
        assert_eq!(
            machine.begin_attempt(now + Duration::from_secs(60), THROTTLE),
            Err(StartRejected::AlreadyConnected)
        );
    }

    #[test]
    fn stop_supersedes_in_flight_attempt() {
        let now = Instant::now();
        let mut machine: ConnectionMachine<&str> = ConnectionMachine::new();
        let ticket = machine.begin_attempt(now, THROTTLE).unwrap();

        assert_eq!(machine.stop(), None);
        assert_eq!(machine.established(ticket, "late", now), Err(Superseded));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(!machine.is_ready());
        assert_eq!(machine.ready_link(), None);
    }

    #[test]
    fn stop_returns_active_link_for_teardown() {
        let now = Instant::now();
        let (mut machine, _) = connected_machine(now);
        assert_eq!(machine.stop(), Some("link-1"));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn transport_events_from_stale_links_are_ignored() {
        let now = Instant::now();
        let (mut machine, ticket) = connected_machine(now);
        let stale_epoch = ticket.epoch() + 100;

        assert!(!machine.transport_reconnecting(stale_epoch));
        assert!(!machine.transport_closed(stale_epoch));
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn reconnect_cycle_updates_ready_since() {
        let now = Instant::now();
        let (mut machine, ticket) = connected_machine(now);

        assert!(machine.transport_reconnecting(ticket.epoch()));
        assert_eq!(machine.state(), ConnectionState::Reconnecting);
        assert!(!machine.is_ready());

        let later = now + Duration::from_secs(12);
        assert!(machine.transport_reconnected(ticket.epoch(), later));
        assert_eq!(machine.ready_link(), Some(("link-1", later)));
    }

    #[test]
    fn transport_close_drops_link() {
        let now = Instant::now();
        let (mut machine, ticket) = connected_machine(now);
        assert!(machine.transport_closed(ticket.epoch()));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(machine.should_connect());
        assert!(!machine.is_current_link(ticket.epoch()));
    }

    #[test]
    fn reconnecting_link_blocks_new_attempt() {
        let now = Instant::now();
        let (mut machine, ticket) = connected_machine(now);
        machine.transport_reconnecting(ticket.epoch());
        assert_eq!(
            machine.begin_attempt(now + THROTTLE, THROTTLE),
            Err(StartRejected::AlreadyConnected)
        );
    }

    #[test]
    fn previous_link_is_handed_over_once() {
        let now = Instant::now();
        let mut machine: ConnectionMachine<&str> = ConnectionMachine::new();
        let first = machine.begin_attempt(now, THROTTLE).unwrap();
        machine.established(first, "old", now).unwrap();
        // Server-side close leaves should_connect set, so a retry may begin.
        machine.transport_reconnecting(first.epoch());
        machine.stop();

        let second = machine.begin_attempt(now + THROTTLE, THROTTLE).unwrap();
        assert_eq!(machine.take_previous_link(second), Ok(None));
        assert_eq!(machine.take_previous_link(first), Err(Superseded));
    }
}
