//! WebSocket push transport.
//!
//! One background task per link owns the socket. It multiplexes group invocations from
//! [`WebSocketConnection`] with inbound frames, and when the socket drops it walks the
//! [`ReconnectPolicy`](super::ReconnectPolicy) schedule, fetching a fresh credential for
//! every attempt.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};
use tokio_tungstenite::{
    MaybeTlsStream,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
        protocol::Message,
    },
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::{
    ConnectRequest, PushConnection, PushLink, PushTransport, RawMessage, TransportError,
    TransportEvent,
    protocol::{self, ClientFrame, GroupCommand, ProtocolVersion, ServerFrame},
};
use crate::services::config::RealtimeConfig;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of a link's event channel; the consumer is the connection manager's pump.
const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    handshake_timeout: Duration,
    invoke_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(handshake_timeout: Duration, invoke_timeout: Duration) -> Self {
        Self {
            handshake_timeout,
            invoke_timeout,
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(config.handshake_timeout(), config.invoke_timeout())
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<PushLink, TransportError> {
        let (ws, version) =
            handshake(&request.endpoint, &request.token, self.handshake_timeout).await?;
        info!(
            endpoint = %request.endpoint,
            protocol = version.as_wire(),
            "Push link established"
        );

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let negotiated = Arc::new(Mutex::new(version));

        tokio::spawn(link_task(
            LinkState {
                ws,
                version,
                negotiated: negotiated.clone(),
                pending: PendingInvocations::default(),
            },
            request,
            self.handshake_timeout,
            cmd_rx,
            event_tx,
        ));

        Ok(PushLink {
            connection: Arc::new(WebSocketConnection {
                cmd_tx,
                negotiated,
                invoke_timeout: self.invoke_timeout,
            }),
            events: event_rx,
        })
    }
}

enum LinkCmd {
    Invoke {
        command: GroupCommand,
        result_tx: oneshot::Sender<Result<(), TransportError>>,
    },
    Close,
}

/// Handle to a link's background task.
pub struct WebSocketConnection {
    cmd_tx: mpsc::Sender<LinkCmd>,
    negotiated: Arc<Mutex<ProtocolVersion>>,
    invoke_timeout: Duration,
}

#[async_trait]
impl PushConnection for WebSocketConnection {
    fn protocol_version(&self) -> ProtocolVersion {
        *self.negotiated.lock()
    }

    async fn invoke(&self, command: GroupCommand) -> Result<(), TransportError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(LinkCmd::Invoke { command, result_tx })
            .await
            .map_err(|_| TransportError::Closed)?;

        match tokio::time::timeout(self.invoke_timeout, result_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::InvocationTimeout(self.invoke_timeout)),
        }
    }

    async fn close(&self) {
        let _ = self.cmd_tx.send(LinkCmd::Close).await;
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        let _ = self.cmd_tx.try_send(LinkCmd::Close);
    }
}

// ── Handshake ───────────────────────────────────────────────────────────────

async fn handshake(
    endpoint: &Url,
    token: &str,
    timeout: Duration,
) -> Result<(WsStream, ProtocolVersion), TransportError> {
    let mut url = endpoint.clone();
    url.query_pairs_mut().append_pair("access_token", token);

    let mut http_request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::WebSocket(format!("Failed to build request: {e}")))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| TransportError::Handshake(format!("Invalid credential: {e}")))?;
    http_request.headers_mut().insert(AUTHORIZATION, bearer);

    let negotiate = async {
        let (mut ws, _response) = tokio_tungstenite::connect_async(http_request)
            .await
            .map_err(map_connect_error)?;
        send_frame(&mut ws, &ClientFrame::hello()).await?;
        let version = await_welcome(&mut ws).await?;
        Ok::<_, TransportError>((ws, version))
    };

    tokio::time::timeout(timeout, negotiate)
        .await
        .map_err(|_| TransportError::HandshakeTimeout(timeout))?
}

fn map_connect_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::Http(response) => match response.status().as_u16() {
            401 => TransportError::Handshake("Unauthorized: credential rejected".to_string()),
            403 => TransportError::Handshake("Forbidden: push endpoint denied".to_string()),
            code => TransportError::Handshake(format!("HTTP error {code}")),
        },
        other => TransportError::WebSocket(other.to_string()),
    }
}

async fn await_welcome(ws: &mut WsStream) -> Result<ProtocolVersion, TransportError> {
    while let Some(incoming) = ws.next().await {
        match incoming.map_err(|e| TransportError::WebSocket(e.to_string()))? {
            Message::Text(text) => match protocol::decode(text.as_str()) {
                Ok(ServerFrame::Welcome { version }) => {
                    return Ok(ProtocolVersion::negotiate(version)?);
                }
                Ok(ServerFrame::Close { error, .. }) => {
                    return Err(TransportError::Handshake(
                        error.unwrap_or_else(|| "server closed during handshake".to_string()),
                    ));
                }
                Ok(other) => debug!(frame = ?other, "Ignoring frame received before welcome"),
                Err(e) => debug!(error = %e, "Ignoring undecodable frame before welcome"),
            },
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "socket closed during handshake".to_string());
                return Err(TransportError::Handshake(reason));
            }
            _ => {}
        }
    }
    Err(TransportError::Handshake(
        "socket ended during handshake".to_string(),
    ))
}

async fn send_frame(ws: &mut WsStream, frame: &ClientFrame) -> Result<(), TransportError> {
    let payload = protocol::encode(frame)?;
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))
}

// ── Link task ───────────────────────────────────────────────────────────────

struct LinkState {
    ws: WsStream,
    version: ProtocolVersion,
    negotiated: Arc<Mutex<ProtocolVersion>>,
    pending: PendingInvocations,
}

type CompletionSender = oneshot::Sender<Result<(), TransportError>>;

/// Invocations sent on the current link that await a completion frame.
#[derive(Default)]
struct PendingInvocations {
    /// invocation id → (server method, completion sender)
    entries: HashMap<String, (&'static str, CompletionSender)>,
}

impl PendingInvocations {
    /// Also drops entries whose caller stopped waiting, e.g. after an invoke timeout.
    fn insert(
        &mut self,
        invocation_id: String,
        target: &'static str,
        result_tx: CompletionSender,
    ) {
        self.entries.retain(|_, (_, tx)| !tx.is_closed());
        self.entries.insert(invocation_id, (target, result_tx));
    }

    fn complete(&mut self, invocation_id: &str, error: Option<String>) {
        let Some((target, result_tx)) = self.entries.remove(invocation_id) else {
            debug!(invocation_id, "Completion for unknown invocation");
            return;
        };
        let result = match error {
            None => Ok(()),
            Some(message) => Err(TransportError::Invocation {
                target: target.to_string(),
                message,
            }),
        };
        let _ = result_tx.send(result);
    }

    fn fail_all(&mut self) {
        for (_, (_, result_tx)) in self.entries.drain() {
            let _ = result_tx.send(Err(TransportError::Closed));
        }
    }
}

enum LinkOutcome {
    CloseRequested,
    ServerClosed {
        error: Option<String>,
        allow_reconnect: bool,
    },
    Dropped {
        error: Option<String>,
    },
}

enum ReconnectOutcome {
    Established(WsStream, ProtocolVersion),
    CloseRequested,
    GaveUp(Option<String>),
}

async fn link_task(
    mut link: LinkState,
    request: ConnectRequest,
    handshake_timeout: Duration,
    mut cmd_rx: mpsc::Receiver<LinkCmd>,
    event_tx: mpsc::Sender<TransportEvent>,
) {
    loop {
        let outcome = serve_link(&mut link, &mut cmd_rx, &event_tx).await;
        link.pending.fail_all();

        let drop_reason = match outcome {
            LinkOutcome::CloseRequested => {
                let _ = link.ws.close(None).await;
                let _ = event_tx.send(TransportEvent::Closed { error: None }).await;
                return;
            }
            LinkOutcome::ServerClosed {
                error,
                allow_reconnect: false,
            } => {
                info!(error = ?error, "Server closed push link");
                let _ = event_tx.send(TransportEvent::Closed { error }).await;
                return;
            }
            LinkOutcome::ServerClosed { error, .. } | LinkOutcome::Dropped { error } => error,
        };

        warn!(error = ?drop_reason, "Push link dropped, reconnecting");
        if event_tx
            .send(TransportEvent::Reconnecting { error: drop_reason })
            .await
            .is_err()
        {
            return;
        }

        match reconnect(&request, handshake_timeout, &mut cmd_rx).await {
            ReconnectOutcome::Established(ws, version) => {
                link.ws = ws;
                link.version = version;
                *link.negotiated.lock() = version;
                info!(protocol = version.as_wire(), "Push link re-established");
                if event_tx.send(TransportEvent::Reconnected).await.is_err() {
                    let _ = link.ws.close(None).await;
                    return;
                }
            }
            ReconnectOutcome::CloseRequested => {
                let _ = event_tx.send(TransportEvent::Closed { error: None }).await;
                return;
            }
            ReconnectOutcome::GaveUp(error) => {
                warn!(error = ?error, "Giving up on push link");
                let _ = event_tx.send(TransportEvent::Closed { error }).await;
                return;
            }
        }
    }
}

async fn serve_link(
    link: &mut LinkState,
    cmd_rx: &mut mpsc::Receiver<LinkCmd>,
    event_tx: &mpsc::Sender<TransportEvent>,
) -> LinkOutcome {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(LinkCmd::Invoke { command, result_tx }) => {
                    let invocation_id = Uuid::new_v4().to_string();
                    let frame = ClientFrame::invoke(invocation_id.clone(), link.version, command);
                    match send_frame(&mut link.ws, &frame).await {
                        Ok(()) => {
                            let target = link.version.method_name(command);
                            link.pending.insert(invocation_id, target, result_tx);
                        }
                        Err(e) => {
                            let error = e.to_string();
                            let _ = result_tx.send(Err(e));
                            return LinkOutcome::Dropped { error: Some(error) };
                        }
                    }
                }
                // Every handle is gone, nobody can observe this link any more.
                Some(LinkCmd::Close) | None => return LinkOutcome::CloseRequested,
            },
            incoming = link.ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(outcome) = handle_text(link, text.as_str(), event_tx).await {
                        return outcome;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    if let Some(outcome) = handle_text(link, &text, event_tx).await {
                        return outcome;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let error = frame.map(|f| f.reason.as_str().to_string());
                    return LinkOutcome::Dropped { error };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return LinkOutcome::Dropped { error: Some(e.to_string()) },
                None => return LinkOutcome::Dropped { error: None },
            },
        }
    }
}

/// Returns `Some` when the frame ends the link.
async fn handle_text(
    link: &mut LinkState,
    text: &str,
    event_tx: &mpsc::Sender<TransportEvent>,
) -> Option<LinkOutcome> {
    let message = match protocol::decode(text) {
        Ok(ServerFrame::Notification { target, payload }) => RawMessage { target, payload },
        Ok(ServerFrame::Completion {
            invocation_id,
            error,
        }) => {
            link.pending.complete(&invocation_id, error);
            return None;
        }
        Ok(ServerFrame::Ping) => {
            return match send_frame(&mut link.ws, &ClientFrame::Ping).await {
                Ok(()) => None,
                Err(e) => Some(LinkOutcome::Dropped {
                    error: Some(e.to_string()),
                }),
            };
        }
        Ok(ServerFrame::Close {
            error,
            allow_reconnect,
        }) => {
            return Some(LinkOutcome::ServerClosed {
                error,
                allow_reconnect,
            });
        }
        Ok(ServerFrame::Welcome { .. }) => {
            debug!("Ignoring unexpected welcome frame");
            return None;
        }
        // Anything outside the envelope is still handed on; the normalizer copes with it.
        Err(e) => {
            debug!(error = %e, "Forwarding non-envelope frame as raw payload");
            let payload = serde_json::from_str::<Value>(text)
                .unwrap_or_else(|_| Value::String(text.to_string()));
            RawMessage::new(payload)
        }
    };

    if event_tx.send(TransportEvent::Message(message)).await.is_err() {
        return Some(LinkOutcome::CloseRequested);
    }
    None
}

async fn reconnect(
    request: &ConnectRequest,
    handshake_timeout: Duration,
    cmd_rx: &mut mpsc::Receiver<LinkCmd>,
) -> ReconnectOutcome {
    let mut attempt = 0usize;
    let mut last_error = None;

    while let Some(delay) = request.reconnect.delay_for(attempt) {
        attempt += 1;
        let retry = async {
            tokio::time::sleep(delay).await;
            let token = (request.credentials)()
                .await
                .ok_or(TransportError::CredentialUnavailable)?;
            handshake(&request.endpoint, &token, handshake_timeout).await
        };
        tokio::pin!(retry);

        loop {
            tokio::select! {
                result = &mut retry => {
                    match result {
                        Ok((ws, version)) => return ReconnectOutcome::Established(ws, version),
                        Err(e) => {
                            warn!(attempt, delay = ?delay, error = %e, "Reconnect attempt failed");
                            last_error = Some(e.to_string());
                        }
                    }
                    break;
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(LinkCmd::Invoke { result_tx, .. }) => {
                        let _ = result_tx.send(Err(TransportError::NotConnected));
                    }
                    Some(LinkCmd::Close) | None => return ReconnectOutcome::CloseRequested,
                },
            }
        }
    }

    ReconnectOutcome::GaveUp(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_resolves_the_waiting_caller() {
        let mut pending = PendingInvocations::default();
        let (ok_tx, ok_rx) = oneshot::channel();
        let (err_tx, err_rx) = oneshot::channel();
        pending.insert("1".to_string(), "JoinUserGroup", ok_tx);
        pending.insert("2".to_string(), "JoinEntityGroup", err_tx);

        pending.complete("1", None);
        pending.complete("2", Some("no such entity".to_string()));
        pending.complete("3", None);

        assert!(matches!(ok_rx.await, Ok(Ok(()))));
        match err_rx.await {
            Ok(Err(TransportError::Invocation { target, message })) => {
                assert_eq!(target, "JoinEntityGroup");
                assert_eq!(message, "no such entity");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(pending.entries.len(), 0);
    }

    #[test]
    fn abandoned_invocations_are_swept_on_insert() {
        let mut pending = PendingInvocations::default();
        let mut waiting = Vec::new();
        for id in 0..3 {
            let (tx, rx) = oneshot::channel();
            pending.insert(id.to_string(), "JoinEntityGroup", tx);
            waiting.push(rx);
        }
        assert_eq!(pending.entries.len(), 3);

        // The first two callers timed out and dropped their receivers.
        waiting.drain(..2);
        let (tx, _rx) = oneshot::channel();
        pending.insert("3".to_string(), "JoinEntityGroup", tx);

        assert_eq!(pending.entries.len(), 2);
        assert!(pending.entries.contains_key("2"));
        assert!(pending.entries.contains_key("3"));
    }

    #[tokio::test]
    async fn fail_all_closes_every_invocation() {
        let mut pending = PendingInvocations::default();
        let (tx, rx) = oneshot::channel();
        pending.insert("1".to_string(), "LeaveEntityGroup", tx);

        pending.fail_all();

        assert!(matches!(rx.await, Ok(Err(TransportError::Closed))));
        assert_eq!(pending.entries.len(), 0);
    }
}
