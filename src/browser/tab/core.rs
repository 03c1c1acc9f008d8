//! Core Tab struct, command round-trips, and the event-wait loop.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{ContextId, OwnerId, SessionId, TargetId};
use crate::manager::messages::{ManagerRequest, TabCreated, TabEvent, TabOptions};

use super::fetch::FetchInterceptor;

// ============================================================================
// TabChannel
// ============================================================================

/// The tab's sending side of the manager protocol.
///
/// Split out of [`Tab`] so the fetch interceptor can issue command
/// round-trips while the event feed is being consumed.
pub(crate) struct TabChannel {
    requests: mpsc::Sender<ManagerRequest>,
    session: SessionId,
    owner: OwnerId,
    operation_timeout: Duration,
}

impl TabChannel {
    /// One command round-trip with the tab's default operation deadline.
    pub(crate) async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.send_with_timeout(method, params, self.operation_timeout)
            .await
    }

    /// One command round-trip with an explicit deadline.
    ///
    /// On timeout the in-flight command is not cancelled; its eventual
    /// response is discarded by the manager.
    pub(crate) async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let (reply, response) = oneshot::channel();

        self.requests
            .send(ManagerRequest::Command {
                owner: self.owner,
                session: self.session.clone(),
                method: method.to_string(),
                params,
                reply,
            })
            .await
            .map_err(|_| Error::disconnected("manager terminated"))?;

        match timeout_at(Instant::now() + timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::disconnected("manager dropped reply")),
            Err(_) => Err(Error::timeout(method, timeout)),
        }
    }
}

// ============================================================================
// Tab
// ============================================================================

/// A handle to one browser tab.
///
/// Held by exactly one owner. Dropping the handle signals owner exit to the
/// manager, which tears the tab down and frees its slot.
pub struct Tab {
    session: SessionId,
    target: TargetId,
    context: ContextId,
    options: TabOptions,
    pub(crate) channel: TabChannel,
    pub(crate) events: mpsc::Receiver<TabEvent>,
    pub(crate) fetch: FetchInterceptor,
}

impl fmt::Debug for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tab")
            .field("session", &self.session)
            .field("target", &self.target)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Tab {
    /// Wraps a created tab into an owner handle.
    pub(crate) fn new(
        created: TabCreated,
        owner: OwnerId,
        requests: mpsc::Sender<ManagerRequest>,
    ) -> Self {
        let channel = TabChannel {
            requests,
            session: created.session.clone(),
            owner,
            operation_timeout: created.options.operation_timeout,
        };

        Self {
            session: created.session,
            target: created.target,
            context: created.context,
            options: created.options,
            channel,
            events: created.events,
            fetch: FetchInterceptor::new(),
        }
    }
}

// ============================================================================
// Tab - Accessors
// ============================================================================

impl Tab {
    /// Returns the session identifier.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Returns the target identifier.
    #[inline]
    #[must_use]
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    /// Returns the browser-context identifier.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &ContextId {
        &self.context
    }

    /// Returns the tab defaults handed out at creation.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &TabOptions {
        &self.options
    }
}

// ============================================================================
// Tab - Commands and Event Waits
// ============================================================================

impl Tab {
    /// Issues one raw CDP command on this tab's session.
    ///
    /// # Errors
    ///
    /// Command failures surface through the error classifier; the wait is
    /// bounded by the tab's operation deadline.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.channel.send(method, params).await
    }

    /// Waits for the next event with the given method.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] when the deadline passes first;
    /// - [`Error::TabClosed`] when the event feed has closed.
    pub async fn wait_event(&mut self, method: &str, timeout: Duration) -> Result<Value> {
        self.wait_event_matching(method, |_| true, timeout).await
    }

    /// Waits for the next event with the given method whose params satisfy
    /// the predicate.
    ///
    /// Events are consumed in arrival order. Each one is first offered to
    /// the fetch interceptor; handled events continue the wait, and
    /// non-matching events are discarded.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] when the deadline passes first;
    /// - [`Error::TabClosed`] when the event feed has closed.
    pub async fn wait_event_matching(
        &mut self,
        method: &str,
        predicate: impl Fn(&Value) -> bool,
        timeout: Duration,
    ) -> Result<Value> {
        let deadline = Instant::now() + timeout;

        loop {
            let event = match timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(Error::tab_closed("event feed closed")),
                Err(_) => return Err(Error::timeout(method, timeout)),
            };

            if self.fetch.handle_event(&self.channel, &event).await? {
                continue;
            }

            if event.method == method && predicate(&event.params) {
                return Ok(event.params);
            }
        }
    }

    /// Closes the tab explicitly, releasing its slot for the next waiter.
    ///
    /// Dropping the handle has the same effect via the manager's liveness
    /// monitoring; closing is just deterministic about when.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if the manager has terminated.
    pub async fn close(&mut self) -> Result<()> {
        debug!(session = %self.session, "Closing tab");

        let (done, closed) = oneshot::channel();
        self.channel
            .requests
            .send(ManagerRequest::Close {
                session: self.session.clone(),
                done,
            })
            .await
            .map_err(|_| Error::disconnected("manager terminated"))?;

        let _ = closed.await;
        Ok(())
    }
}
