//! WebSocket connection to the browser.
//!
//! A [`Connection`] is owned exclusively by the manager. It exposes two
//! sending modes:
//!
//! - [`Connection::send_async`] writes a command and returns its request
//!   identifier without reading — the steady-state mode, so the manager's
//!   loop never blocks on browser I/O;
//! - [`Connection::send`] writes and then drains incoming frames until the
//!   matching response arrives — reserved for bootstrap and control-plane
//!   sequences (tab creation/teardown, health probes).
//!
//! Frames read while draining are never dropped: responses to other
//! identifiers land in the buffered-response table (collected later with
//! [`Connection::drain_responses`]), and events are routed to their
//! session's bounded bus. A bus that is full drops the newest event rather
//! than blocking the connection.
//!
//! Any read or write failure latches the connection closed; there is no
//! reconnection at this layer.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, SessionId};
use crate::protocol::{Codec, EventFrame, IncomingFrame};

// ============================================================================
// Constants
// ============================================================================

/// Default capacity of a per-session event bus.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Maximum retained browser-level (session-less) events.
const MAX_BROWSER_EVENTS: usize = 256;

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Connection
// ============================================================================

/// One long-lived WebSocket connection to the browser.
#[derive(Debug)]
pub struct Connection {
    codec: Codec,
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    /// Per-session event buses; single-writer (this connection).
    subscriptions: FxHashMap<SessionId, mpsc::Sender<EventFrame>>,
    /// Responses that arrived for other identifiers during a blocking send.
    buffered: FxHashMap<RequestId, Result<Value>>,
    /// Session-less events awaiting a manager drain; bounded.
    browser_events: VecDeque<EventFrame>,
    closed: bool,
}

// ============================================================================
// Connection - Bootstrap
// ============================================================================

impl Connection {
    /// Discovers the browser's WebSocket endpoint and connects to it.
    ///
    /// Issues `GET http://<address>/json/version` and opens the stream named
    /// by the `webSocketDebuggerUrl` field of the response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] carrying the underlying reason:
    /// transport error, non-success HTTP status, or a missing/unparseable
    /// discovery payload.
    pub async fn bootstrap(address: &str, connect_timeout: Duration) -> Result<Self> {
        let url = format!("http://{address}/json/version");
        debug!(url = %url, "Discovering browser endpoint");

        let client = reqwest::Client::builder()
            .timeout(connect_timeout)
            .build()
            .map_err(|e| Error::connection_failed(format!("HTTP client setup failed: {e}")))?;

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::connection_failed(format!("discovery request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::connection_failed(format!(
                "discovery endpoint returned {status}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::connection_failed(format!("unparseable discovery payload: {e}")))?;

        let ws_url = payload
            .get("webSocketDebuggerUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::connection_failed("discovery payload has no webSocketDebuggerUrl")
            })?;

        let (ws, _) = timeout_at(Instant::now() + connect_timeout, connect_async(ws_url))
            .await
            .map_err(|_| {
                Error::connection_failed(format!(
                    "WebSocket connect timed out after {}ms",
                    connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| Error::connection_failed(format!("WebSocket connect failed: {e}")))?;

        debug!(ws_url = %ws_url, "Browser connection established");

        let (sink, stream) = ws.split();
        Ok(Self {
            codec: Codec::new(),
            sink,
            stream,
            subscriptions: FxHashMap::default(),
            buffered: FxHashMap::default(),
            browser_events: VecDeque::new(),
            closed: false,
        })
    }
}

// ============================================================================
// Connection - Sending
// ============================================================================

impl Connection {
    /// Encodes and writes one command without waiting for its response.
    ///
    /// The caller must record the returned identifier to match the response
    /// frame later.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if the connection is closed or the
    /// write fails.
    pub async fn send_async(
        &mut self,
        method: &str,
        params: &Value,
        session: Option<&SessionId>,
    ) -> Result<RequestId> {
        if self.closed {
            return Err(Error::disconnected("connection closed"));
        }

        let (id, text) = self.codec.encode(method, params, session)?;

        if let Err(e) = self.sink.send(Message::Text(text.into())).await {
            self.mark_closed();
            return Err(Error::disconnected(format!("write failed: {e}")));
        }

        trace!(id = %id, method = %method, "Command written");
        Ok(id)
    }

    /// Writes one command and drains incoming frames until its response.
    ///
    /// Frames for other identifiers are buffered (see
    /// [`Connection::drain_responses`]); events are routed to their session
    /// bus. Reserved for control-plane sequences — steady-state commands use
    /// [`Connection::send_async`].
    ///
    /// # Errors
    ///
    /// - [`Error::Cdp`] when the browser answers with an error frame;
    /// - [`Error::Disconnected`] when the stream closes while waiting;
    /// - [`Error::Timeout`] when the deadline passes first.
    pub async fn send(
        &mut self,
        method: &str,
        params: &Value,
        session: Option<&SessionId>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.send_async(method, params, session).await?;
        let deadline = Instant::now() + timeout;

        loop {
            let message = match timeout_at(deadline, self.stream.next()).await {
                Ok(message) => message,
                Err(_) => return Err(Error::timeout(method, timeout)),
            };

            match message {
                Some(Ok(Message::Text(text))) => match IncomingFrame::decode(text.as_str()) {
                    IncomingFrame::Response(r) if r.id == id => return Ok(r.result),
                    IncomingFrame::Error(e) if e.id == id => {
                        return Err(Error::cdp(e.code, e.message));
                    }
                    IncomingFrame::Response(r) => {
                        self.buffered.insert(r.id, Ok(r.result));
                    }
                    IncomingFrame::Error(e) => {
                        self.buffered.insert(e.id, Err(Error::cdp(e.code, e.message)));
                    }
                    IncomingFrame::Event(event) => self.route_event(event),
                    IncomingFrame::Unknown { raw } => {
                        warn!(raw = %truncate(&raw), "Undecodable frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    self.mark_closed();
                    return Err(Error::disconnected("connection closed"));
                }
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(Error::disconnected(format!("read failed: {e}")));
                }
                // Binary, Ping, Pong, raw frames: not part of the protocol.
                Some(Ok(_)) => {}
            }
        }
    }
}

// ============================================================================
// Connection - Receiving
// ============================================================================

impl Connection {
    /// Awaits one incoming frame, routing events internally.
    ///
    /// Responses (and error responses) are handed to the caller for
    /// correlation against its pending table. Returns `None` once the
    /// stream has closed; the closed state is latched.
    pub async fn recv_frame(&mut self) -> Option<(RequestId, Result<Value>)> {
        loop {
            if self.closed {
                return None;
            }

            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match IncomingFrame::decode(text.as_str()) {
                    IncomingFrame::Response(r) => return Some((r.id, Ok(r.result))),
                    IncomingFrame::Error(e) => {
                        return Some((e.id, Err(Error::cdp(e.code, e.message))));
                    }
                    IncomingFrame::Event(event) => self.route_event(event),
                    IncomingFrame::Unknown { raw } => {
                        warn!(raw = %truncate(&raw), "Undecodable frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    self.mark_closed();
                    return None;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Browser stream read failed");
                    self.mark_closed();
                    return None;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    /// Routes one event to its session bus.
    ///
    /// Enqueueing is best-effort: a full bus drops the newest event so a
    /// slow subscriber never blocks the connection. Events for unknown
    /// sessions are dropped; session-less events are retained for the
    /// manager to drain.
    fn route_event(&mut self, event: EventFrame) {
        let Some(session) = event.session_id.clone() else {
            if self.browser_events.len() == MAX_BROWSER_EVENTS {
                self.browser_events.pop_front();
            }
            self.browser_events.push_back(event);
            return;
        };

        match self.subscriptions.get(&session) {
            Some(bus) => {
                if bus.try_send(event).is_err() {
                    trace!(session = %session, "Session bus full or closed, event dropped");
                }
            }
            None => trace!(session = %session, "Event for unknown session dropped"),
        }
    }
}

// ============================================================================
// Connection - Subscriptions and Buffers
// ============================================================================

impl Connection {
    /// Creates a bounded event bus for one session.
    ///
    /// The previous bus for the same session, if any, is replaced.
    pub fn subscribe(&mut self, session: SessionId, capacity: usize) -> mpsc::Receiver<EventFrame> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscriptions.insert(session, tx);
        rx
    }

    /// Destroys the event bus for one session.
    pub fn unsubscribe(&mut self, session: &SessionId) {
        self.subscriptions.remove(session);
    }

    /// Returns and clears the responses buffered during blocking sends.
    #[must_use]
    pub fn drain_responses(&mut self) -> Vec<(RequestId, Result<Value>)> {
        self.buffered.drain().collect()
    }

    /// Returns and clears the retained browser-level events.
    #[must_use]
    pub fn drain_browser_events(&mut self) -> Vec<EventFrame> {
        self.browser_events.drain(..).collect()
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl Connection {
    /// Returns `true` once any read or write has failed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes the stream and latches the closed state.
    pub async fn close(&mut self) {
        if !self.closed {
            let _ = self.sink.close().await;
            self.mark_closed();
        }
    }

    /// Latches the closed state and closes every subscription.
    fn mark_closed(&mut self) {
        self.closed = true;
        self.subscriptions.clear();
        debug!("Connection latched closed");
    }
}

fn truncate(raw: &str) -> &str {
    if raw.len() <= 200 {
        return raw;
    }
    let mut end = 200;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}

// ============================================================================
// Tests
// ============================================================================
