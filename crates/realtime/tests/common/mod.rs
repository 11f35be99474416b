//! Scripted push transport and recording collaborators shared by the integration tests.

#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use realtime::services::{
    cache_bridge::{CacheInvalidator, CacheTag},
    connection::{ConnectionManager, ConnectionSettings},
    desktop_alert::{AlertPresenter, DesktopAlert},
    transport::{
        ConnectRequest, CredentialLookup, GroupCommand, ProtocolVersion, PushConnection, PushLink,
        PushTransport, RawMessage, ReconnectPolicy, TransportError, TransportEvent,
        static_credentials,
    },
};
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use url::Url;

pub const TOKEN: &str = "opaque-test-token";

// {"sub": "user-42", "exp": 1000000000}
pub const EXPIRED_JWT: &str = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.eyJzdWIiOiJ1c2VyLTQyIiwiZXhwIjoxMDAwMDAwMDAwfQ.signature";

pub const THROTTLE: Duration = Duration::from_secs(5);
pub const SETTLE: Duration = Duration::from_millis(500);

#[derive(Default)]
pub struct FakeConnection {
    pub invoked: Mutex<Vec<GroupCommand>>,
    pub closed: AtomicBool,
    pub fail_invocations: AtomicBool,
}

impl FakeConnection {
    pub fn invoked(&self) -> Vec<GroupCommand> {
        self.invoked.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushConnection for FakeConnection {
    fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::V2
    }

    async fn invoke(&self, command: GroupCommand) -> Result<(), TransportError> {
        self.invoked.lock().push(command);
        if self.fail_invocations.load(Ordering::SeqCst) {
            return Err(TransportError::Invocation {
                target: format!("{command:?}"),
                message: "rejected".to_string(),
            });
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Server side of one established fake link.
#[derive(Clone)]
pub struct FakeLink {
    pub connection: Arc<FakeConnection>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl FakeLink {
    pub async fn emit(&self, event: TransportEvent) {
        self.events
            .send(event)
            .await
            .expect("connection manager dropped the link");
    }

    pub async fn push(&self, payload: Value) {
        self.emit(TransportEvent::Message(RawMessage::new(payload)))
            .await;
    }
}

#[derive(Default)]
pub struct FakeTransport {
    connects: AtomicUsize,
    tokens: Mutex<Vec<String>>,
    refuse: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    links: Mutex<Vec<FakeLink>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Tokens presented by each handshake, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }

    /// Subsequent handshakes fail until set back to false.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Subsequent handshakes block until the returned gate is notified.
    pub fn hold_handshakes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn links(&self) -> Vec<FakeLink> {
        self.links.lock().clone()
    }

    pub fn last_link(&self) -> FakeLink {
        self.links
            .lock()
            .last()
            .cloned()
            .expect("no link established")
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<PushLink, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().push(request.token);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Handshake("401 Unauthorized".to_string()));
        }

        let (events, rx) = mpsc::channel(64);
        let connection = Arc::new(FakeConnection::default());
        self.links.lock().push(FakeLink {
            connection: connection.clone(),
            events,
        });
        Ok(PushLink {
            connection,
            events: rx,
        })
    }
}

#[derive(Default)]
pub struct RecordingInvalidator {
    pub calls: Mutex<Vec<Vec<CacheTag>>>,
}

#[async_trait]
impl CacheInvalidator for RecordingInvalidator {
    async fn invalidate(&self, tags: &[CacheTag]) -> anyhow::Result<()> {
        self.calls.lock().push(tags.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPresenter {
    pub shown: Mutex<Vec<DesktopAlert>>,
}

impl AlertPresenter for RecordingPresenter {
    fn present(&self, alert: DesktopAlert) {
        self.shown.lock().push(alert);
    }
}

pub fn settings() -> ConnectionSettings {
    ConnectionSettings {
        endpoint: Url::parse("ws://push.test/hubs/notifications").unwrap(),
        throttle: THROTTLE,
        group_join_delay: SETTLE,
        reconnect: ReconnectPolicy::disabled(),
    }
}

pub fn credentials(token: Option<&str>) -> CredentialLookup {
    static_credentials(token.map(str::to_string))
}

/// Hands out `token-1`, `token-2`, ... and counts the lookups.
pub fn rotating_credentials() -> (CredentialLookup, Arc<AtomicUsize>) {
    let lookups = Arc::new(AtomicUsize::new(0));
    let lookup: CredentialLookup = Arc::new({
        let lookups = lookups.clone();
        move || {
            let n = lookups.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Some(format!("token-{n}")) }.boxed()
        }
    });
    (lookup, lookups)
}

pub fn manager(transport: &Arc<FakeTransport>, token: Option<&str>) -> ConnectionManager {
    ConnectionManager::new(transport.clone(), credentials(token), settings())
}

/// Lets spawned tasks (event pump, pipeline, toast worker) catch up.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
