//! Owns the single push-channel link of a session.
//!
//! [`ConnectionManager`] drives [`state::ConnectionMachine`] and publishes everything it
//! learns from the transport as [`ConnectionEvent`]s on a broadcast bus. Public lifecycle
//! operations never fail; outcomes are observable through [`ConnectionManager::status`].

pub mod state;

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, watch},
    time::Instant,
};
use tracing::{debug, info, warn};
use url::Url;

use self::state::{AttemptTicket, ConnectionMachine, Superseded};
use super::{
    config::{ConfigError, RealtimeConfig},
    transport::{
        ConnectRequest, CredentialLookup, GroupCommand, PushConnection, PushTransport,
        RawMessage, ReconnectPolicy, TransportError, TransportEvent,
    },
};
use crate::models::connection_state::ConnectionState;

const EVENT_BUS_CAPACITY: usize = 256;

type LinkHandle = Arc<dyn PushConnection>;
type SharedAttempt = Shared<BoxFuture<'static, ()>>;

/// Everything the connection layer reports to the rest of the subsystem.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    Message(RawMessage),
    /// The transport re-established a dropped link. Server-side group membership is gone.
    Reconnected,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub endpoint: Url,
    pub throttle: Duration,
    pub group_join_delay: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ConnectionSettings {
    pub fn from_config(config: &RealtimeConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: config.endpoint()?,
            throttle: config.throttle(),
            group_join_delay: config.group_join_delay(),
            reconnect: config.reconnect_policy(),
        })
    }
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Superseded(#[from] Superseded),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct InFlight {
    ticket: AttemptTicket,
    attempt: SharedAttempt,
}

struct ManagerState {
    machine: ConnectionMachine<LinkHandle>,
    in_flight: Option<InFlight>,
}

struct Inner {
    transport: Arc<dyn PushTransport>,
    credentials: CredentialLookup,
    settings: ConnectionSettings,
    state: Mutex<ManagerState>,
    status_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

/// Wraps a lookup so that a JWT whose `exp` has passed reads as "no credential".
fn usable_credentials(lookup: CredentialLookup) -> CredentialLookup {
    Arc::new(move || {
        let token = lookup();
        async move {
            token.await.filter(|token| {
                let expired = utils::jwt::is_expired(token);
                if expired {
                    debug!("Ignoring expired access token");
                }
                !expired
            })
        }
        .boxed()
    })
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        credentials: CredentialLookup,
        settings: ConnectionSettings,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                credentials: usable_credentials(credentials),
                settings,
                state: Mutex::new(ManagerState {
                    machine: ConnectionMachine::new(),
                    in_flight: None,
                }),
                status_tx,
                events_tx,
            }),
        }
    }

    pub fn status(&self) -> ConnectionState {
        self.inner.state.lock().machine.state()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().machine.is_ready()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Establishes the link, or joins the attempt already in flight. Returns once that
    /// attempt has finished, including the user-group join on success.
    pub async fn start(&self) {
        if let Some(attempt) = self.claim_attempt() {
            attempt.await;
        }
    }

    fn claim_attempt(&self) -> Option<SharedAttempt> {
        self.inner.transition(|state| {
            if let Some(in_flight) = &state.in_flight
                && state.machine.check(in_flight.ticket).is_ok()
            {
                debug!("Joining connection attempt already in flight");
                return Some(in_flight.attempt.clone());
            }
            state.in_flight = None;

            let ticket = match state
                .machine
                .begin_attempt(Instant::now(), self.inner.settings.throttle)
            {
                Ok(ticket) => ticket,
                Err(reason) => {
                    debug!(%reason, "Not starting a connection attempt");
                    return None;
                }
            };

            let inner = self.inner.clone();
            let handle = tokio::spawn(async move { inner.run_attempt(ticket).await });
            let attempt: BoxFuture<'static, ()> = Box::pin(async move {
                if let Err(error) = handle.await {
                    warn!(error = %error, "Connection attempt task failed");
                }
            });
            let attempt = attempt.shared();
            state.in_flight = Some(InFlight {
                ticket,
                attempt: attempt.clone(),
            });
            Some(attempt)
        })
    }

    /// Tears the link down and suppresses attempts until the next `start()`. An attempt
    /// still in flight is invalidated; whatever it produces is closed on arrival.
    pub async fn stop(&self) {
        let link = self.inner.transition(|state| {
            state.in_flight = None;
            state.machine.stop()
        });
        if let Some(link) = link {
            link.close().await;
            info!("Push connection closed");
        }
    }

    /// Sends a group command over the current link. Joins wait out the settle delay after
    /// the link was (re-)established.
    pub async fn invoke(&self, command: GroupCommand) -> Result<(), TransportError> {
        self.inner.invoke(command).await
    }
}

impl Inner {
    /// Applies `f` under the lock and publishes the resulting state if it changed.
    fn transition<R>(&self, f: impl FnOnce(&mut ManagerState) -> R) -> R {
        let mut state = self.state.lock();
        let before = state.machine.state();
        let result = f(&mut state);
        let after = state.machine.state();
        if before != after {
            debug!(from = %before, to = %after, "Connection state changed");
            self.status_tx.send_replace(after);
            let _ = self.events_tx.send(ConnectionEvent::StateChanged(after));
        }
        result
    }

    fn check(&self, ticket: AttemptTicket) -> Result<(), Superseded> {
        self.state.lock().machine.check(ticket)
    }

    fn ready_link(&self) -> Option<(LinkHandle, Instant)> {
        self.state.lock().machine.ready_link()
    }

    async fn run_attempt(self: Arc<Self>, ticket: AttemptTicket) {
        match self.attempt(ticket).await {
            Ok(()) => {}
            Err(AttemptError::Superseded(_)) => {
                debug!("Connection attempt abandoned after stop");
            }
            Err(AttemptError::Transport(TransportError::CredentialUnavailable)) => {
                info!("No access token available, staying disconnected");
                let _ = self.transition(|state| state.machine.failed(ticket));
            }
            Err(AttemptError::Transport(error)) => {
                warn!(error = %error, "Push connection failed");
                let _ = self.transition(|state| state.machine.failed(ticket));
            }
        }

        let mut state = self.state.lock();
        if state
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.ticket == ticket)
        {
            state.in_flight = None;
        }
    }

    async fn attempt(self: &Arc<Self>, ticket: AttemptTicket) -> Result<(), AttemptError> {
        let Some(token) = (self.credentials)().await else {
            self.check(ticket)?;
            return Err(TransportError::CredentialUnavailable.into());
        };
        self.check(ticket)?;

        let previous = self.state.lock().machine.take_previous_link(ticket)?;
        if let Some(previous) = previous {
            debug!("Closing previous link before reconnecting");
            previous.close().await;
        }
        self.check(ticket)?;

        let request = ConnectRequest {
            endpoint: self.settings.endpoint.clone(),
            token,
            credentials: self.credentials.clone(),
            reconnect: self.settings.reconnect.clone(),
        };
        info!(endpoint = %request.endpoint, "Connecting to push endpoint");
        self.check(ticket)?;
        let result = self.transport.connect(request).await;

        let link = match result {
            Ok(link) => link,
            Err(error) => {
                self.check(ticket)?;
                return Err(error.into());
            }
        };
        let connection = link.connection.clone();
        let established = self.transition(|state| {
            state
                .machine
                .established(ticket, connection.clone(), Instant::now())
        });
        if let Err(stale) = established {
            debug!("Link resolved after stop, closing it");
            connection.close().await;
            return Err(stale.into());
        }
        info!(
            version = connection.protocol_version().as_wire(),
            "Push connection established"
        );

        tokio::spawn(pump_events(
            Arc::downgrade(self),
            ticket.epoch(),
            link.events,
        ));

        self.join_user_group().await;
        Ok(())
    }

    async fn join_user_group(&self) {
        match self.invoke(GroupCommand::JoinUserGroup).await {
            Ok(()) => debug!("Joined user group"),
            Err(error) => warn!(error = %error, "Failed to join user group"),
        }
    }

    async fn invoke(&self, command: GroupCommand) -> Result<(), TransportError> {
        let (mut link, ready_since) = self.ready_link().ok_or(TransportError::NotConnected)?;
        if command.is_join() {
            let settle_at = ready_since + self.settings.group_join_delay;
            if settle_at > Instant::now() {
                tokio::time::sleep_until(settle_at).await;
                // The link may have dropped or been replaced while we waited.
                (link, _) = self.ready_link().ok_or(TransportError::NotConnected)?;
            }
        }
        link.invoke(command).await
    }
}

/// Forwards one link's transport events until the link closes. Events from a link that
/// is no longer current are dropped.
async fn pump_events(
    inner: Weak<Inner>,
    epoch: u64,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Message(raw) => {
                if inner.state.lock().machine.is_current_link(epoch) {
                    let _ = inner.events_tx.send(ConnectionEvent::Message(raw));
                }
            }
            TransportEvent::Reconnecting { error } => {
                if inner.transition(|state| state.machine.transport_reconnecting(epoch)) {
                    warn!(error = ?error, "Push connection lost, reconnecting");
                }
            }
            TransportEvent::Reconnected => {
                let now = Instant::now();
                if inner.transition(|state| state.machine.transport_reconnected(epoch, now)) {
                    info!("Push connection re-established");
                    let _ = inner.events_tx.send(ConnectionEvent::Reconnected);
                    tokio::spawn(async move { inner.join_user_group().await });
                }
            }
            TransportEvent::Closed { error } => {
                if inner.transition(|state| state.machine.transport_closed(epoch)) {
                    warn!(error = ?error, "Push connection closed by transport");
                }
                return;
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.transition(|state| state.machine.transport_closed(epoch));
    }
}
