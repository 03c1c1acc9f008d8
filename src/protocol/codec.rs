//! Command encoding.
//!
//! A [`Codec`] assigns monotone request identifiers (starting at 1, never
//! reused within one connection) and serializes commands to the CDP wire
//! form: `{"id": N, "method": "…", "params": {…}?, "sessionId": "…"?}`.
//! `params` is omitted when empty; `sessionId` is omitted for browser-level
//! commands.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, SessionId};

// ============================================================================
// Wire Shape
// ============================================================================

/// Outgoing command frame.
#[derive(Serialize)]
struct CommandFrame<'a> {
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

// ============================================================================
// Codec
// ============================================================================

/// Stateless command encoder, except for the monotone id counter.
#[derive(Debug)]
pub struct Codec {
    next_id: AtomicU64,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    /// Creates a codec whose first assigned identifier is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Encodes one command, assigning it the next request identifier.
    ///
    /// An empty or `null` `params` is omitted from the frame; a `session`
    /// of `None` produces a browser-level command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] if the params fail to serialize.
    pub fn encode(
        &self,
        method: &str,
        params: &Value,
        session: Option<&SessionId>,
    ) -> Result<(RequestId, String)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let params = match params {
            Value::Null => None,
            Value::Object(map) if map.is_empty() => None,
            other => Some(other),
        };

        let frame = CommandFrame {
            id,
            method,
            params,
            session_id: session.map(SessionId::as_str),
        };

        let text = serde_json::to_string(&frame)
            .map_err(|e| Error::invalid(format!("unencodable command {method}: {e}")))?;

        Ok((RequestId::new(id), text))
    }
}

// ============================================================================
// Tests
// ============================================================================
