//! In-process mock browser for scenario tests.
//!
//! Serves the discovery endpoint (`GET /json/version`) on one listener and
//! a CDP WebSocket on another. Each received command frame is handed to a
//! script returning the frames to write back; a `Value::Null` entry makes
//! the mock drop the stream, simulating a browser crash. The accept loop
//! keeps running, so a recovering manager can re-bootstrap against the same
//! address.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Types
// ============================================================================

/// One decoded command received by the mock.
pub(crate) struct CdpCall {
    pub id: u64,
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

type Script = Box<dyn FnMut(CdpCall) -> Vec<Value> + Send>;

// ============================================================================
// Frame Helpers
// ============================================================================

/// Builds a success response frame.
pub(crate) fn ok(id: u64, result: Value) -> Value {
    json!({"id": id, "result": result})
}

/// Builds an error response frame.
pub(crate) fn err(id: u64, code: i64, message: &str) -> Value {
    json!({"id": id, "error": {"code": code, "message": message}})
}

/// Builds an event frame, session-scoped when `session` is given.
pub(crate) fn event(method: &str, params: Value, session: Option<&str>) -> Value {
    match session {
        Some(session) => json!({"method": method, "params": params, "sessionId": session}),
        None => json!({"method": method, "params": params}),
    }
}

/// Default responder covering the control plane: context/target/session
/// creation with deterministic identifiers, domain enables, teardown,
/// health probes, and a navigation that immediately fires its load event.
pub(crate) fn default_respond(call: &CdpCall) -> Vec<Value> {
    let id = call.id;
    match call.method.as_str() {
        "Target.createBrowserContext" => vec![ok(id, json!({"browserContextId": format!("ctx-{id}")}))],
        "Target.createTarget" => vec![ok(id, json!({"targetId": format!("tgt-{id}")}))],
        "Target.attachToTarget" => {
            let target = call.params["targetId"].as_str().unwrap_or("tgt");
            vec![ok(id, json!({"sessionId": format!("sess-{target}")}))]
        }
        "Browser.getVersion" => vec![ok(
            id,
            json!({"product": "MockBrowser/1.0", "protocolVersion": "1.3"}),
        )],
        "Page.navigate" => vec![
            ok(id, json!({"frameId": "f1", "loaderId": "l1"})),
            event(
                "Page.loadEventFired",
                json!({"timestamp": 1.0}),
                call.session_id.as_deref(),
            ),
        ],
        "Target.detachFromTarget"
        | "Target.closeTarget"
        | "Target.disposeBrowserContext"
        | "Browser.setDownloadBehavior"
        | "Fetch.enable"
        | "Fetch.disable"
        | "Fetch.fulfillRequest" => vec![ok(id, json!({}))],
        method if method.ends_with(".enable") => vec![ok(id, json!({}))],
        method => vec![err(id, -32601, &format!("'{method}' wasn't found"))],
    }
}

// ============================================================================
// MockBrowser
// ============================================================================

/// A scripted stand-in for a Chromium debugging endpoint.
pub(crate) struct MockBrowser {
    http_addr: SocketAddr,
}

impl MockBrowser {
    /// Starts a mock answering every command with [`default_respond`].
    pub(crate) async fn start() -> Self {
        Self::with_script(|call| default_respond(&call)).await
    }

    /// Starts a mock driven by the given script.
    pub(crate) async fn with_script(
        script: impl FnMut(CdpCall) -> Vec<Value> + Send + 'static,
    ) -> Self {
        let ws_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ws");
        let ws_port = ws_listener.local_addr().expect("ws addr").port();

        let http_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind http");
        let http_addr = http_listener.local_addr().expect("http addr");

        tokio::spawn(Self::serve_discovery(http_listener, ws_port));

        let script: Arc<Mutex<Script>> = Arc::new(Mutex::new(Box::new(script)));
        tokio::spawn(Self::serve_cdp(ws_listener, script));

        Self { http_addr }
    }

    /// The `host:port` to hand to [`Config`](crate::Config).
    pub(crate) fn address(&self) -> String {
        format!("127.0.0.1:{}", self.http_addr.port())
    }

    async fn serve_discovery(listener: TcpListener, ws_port: u16) {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };

            let body = format!(
                "{{\"webSocketDebuggerUrl\":\"ws://127.0.0.1:{ws_port}/devtools/browser/mock\"}}"
            );
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );

            // The GET fits in one read.
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(response.as_bytes()).await;
        }
    }

    async fn serve_cdp(listener: TcpListener, script: Arc<Mutex<Script>>) {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };

            'conn: while let Some(Ok(message)) = ws.next().await {
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };

                let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                let call = CdpCall {
                    id: frame["id"].as_u64().unwrap_or(0),
                    method: frame["method"].as_str().unwrap_or("").to_string(),
                    params: frame.get("params").cloned().unwrap_or_else(|| json!({})),
                    session_id: frame
                        .get("sessionId")
                        .and_then(Value::as_str)
                        .map(String::from),
                };

                let replies = {
                    let mut script = script.lock();
                    (*script)(call)
                };
                for reply in replies {
                    if reply.is_null() {
                        let _ = ws.close(None).await;
                        break 'conn;
                    }
                    if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                        break 'conn;
                    }
                }
            }
        }
    }
}
