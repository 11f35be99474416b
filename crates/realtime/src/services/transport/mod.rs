//! Push-channel transport seam.
//!
//! The connection manager only talks to [`PushTransport`] / [`PushConnection`]; the
//! WebSocket implementation lives in [`websocket`]. A transport owns the reconnect
//! schedule for a link it has established and reports lifecycle changes on the link's
//! event channel.

pub mod protocol;
pub mod websocket;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub use protocol::{GroupCommand, ProtocolError, ProtocolVersion};
pub use websocket::WebSocketTransport;

/// Injected bearer-token lookup. Called on every connect and every reconnect so that
/// rotated credentials are picked up without restarting anything. `None` means no
/// credential is currently available.
pub type CredentialLookup = Arc<dyn Fn() -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// Convenience lookup that always yields the same token.
pub fn static_credentials(token: Option<String>) -> CredentialLookup {
    Arc::new(move || {
        let token = token.clone();
        async move { token }.boxed()
    })
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no credential available")]
    CredentialUnavailable,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("invocation `{target}` failed: {message}")]
    Invocation { target: String, message: String },
    #[error("invocation timed out after {0:?}")]
    InvocationTimeout(Duration),
    #[error("link is re-establishing")]
    NotConnected,
    #[error("link closed")]
    Closed,
}

/// Server payload exactly as received, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Server-side method or channel name that delivered the payload, if any.
    pub target: Option<String>,
    pub payload: Value,
}

impl RawMessage {
    pub fn new(payload: Value) -> Self {
        Self {
            target: None,
            payload,
        }
    }

    pub fn with_target(target: impl Into<String>, payload: Value) -> Self {
        Self {
            target: Some(target.into()),
            payload,
        }
    }
}

/// Events a link reports after it has been established.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(RawMessage),
    /// The link dropped; the transport is working through its reconnect schedule.
    Reconnecting { error: Option<String> },
    Reconnected,
    /// The link is gone for good (closed by us, by the server, or the schedule ran out).
    Closed { error: Option<String> },
}

/// Fixed reconnect schedule. Attempt `n` waits `schedule[n]`; attempts past the end reuse
/// the last delay. An empty schedule disables reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    schedule: Vec<Duration>,
}

impl ReconnectPolicy {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    pub fn delay_for(&self, attempt: usize) -> Option<Duration> {
        self.schedule
            .get(attempt)
            .or_else(|| self.schedule.last())
            .copied()
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::ZERO,
            Duration::from_secs(2),
            Duration::from_secs(10),
            Duration::from_secs(30),
        ])
    }
}

#[derive(Clone)]
pub struct ConnectRequest {
    pub endpoint: Url,
    /// Token for the initial handshake, already looked up by the caller.
    pub token: String,
    /// Consulted again only by transports that re-handshake on their own.
    pub credentials: CredentialLookup,
    pub reconnect: ReconnectPolicy,
}

/// An established link plus the receiving half of its event channel.
pub struct PushLink {
    pub connection: Arc<dyn PushConnection>,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait PushConnection: Send + Sync {
    /// Version negotiated during the most recent handshake.
    fn protocol_version(&self) -> ProtocolVersion;

    /// Issue a group command and wait for the server's completion.
    async fn invoke(&self, command: GroupCommand) -> Result<(), TransportError>;

    /// Close the link. The event channel reports `Closed` afterwards.
    async fn close(&self);
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Perform the handshake. Resolves once the link is usable or has failed.
    async fn connect(&self, request: ConnectRequest) -> Result<PushLink, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_repeats_last_delay() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<_> = (0..6).map(|n| policy.delay_for(n).unwrap()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(30),
                Duration::from_secs(30),
            ]
        );
    }

    #[test]
    fn empty_schedule_never_reconnects() {
        assert_eq!(ReconnectPolicy::disabled().delay_for(0), None);
    }

    #[tokio::test]
    async fn static_credentials_yield_same_token_each_call() {
        let lookup = static_credentials(Some("abc".to_string()));
        assert_eq!(lookup().await.as_deref(), Some("abc"));
        assert_eq!(lookup().await.as_deref(), Some("abc"));
    }
}
