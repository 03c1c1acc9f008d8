//! The connection manager.
//!
//! One [`Manager`] task owns the browser [`Connection`] and serializes all
//! access to it. Its selection loop waits on every source at once — owner
//! requests, owner-liveness events, the health timer, the raw incoming
//! frame feed, and every session event bus — and advances on exactly one
//! ready source per iteration, so a slow tab never starves the others.
//!
//! # Data Flow
//!
//! ```text
//! Owner  --request(method,params,sid)-->  Manager
//!                                          |-- send_async ------------> Browser
//!                                          |<-- response frame (id) --<----|
//!                                          |-- reply(result|error) --> Owner
//! Browser -- event frame (sid) --> Connection -- session bus --> Manager -- forward --> Owner
//! ```
//!
//! Steady-state commands go out with `send_async` so the loop never blocks
//! on browser I/O; only control-plane sequences (tab creation/teardown,
//! health probes) use the blocking `send`, and every such sequence is
//! followed by a drain of the responses buffered meanwhile.

// ============================================================================
// Submodules
// ============================================================================

pub(crate) mod messages;
pub(crate) mod registry;

#[cfg(test)]
pub(crate) mod testsupport;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{StreamExt as _, StreamMap};
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identifiers::{ContextId, OwnerId, RequestId, SessionId, TargetId};
use crate::protocol::EventFrame;
use crate::transport::Connection;
use crate::transport::connection::DEFAULT_BUS_CAPACITY;

use messages::{ManagerRequest, TabCreated, TabEvent, TabOptions};
use registry::{PendingReply, Registry, TabRecord, Waiter};

// ============================================================================
// Constants
// ============================================================================

/// Deadline for the periodic health probe.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the owner request channel.
pub(crate) const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Domains enabled on every fresh session.
const SESSION_DOMAINS: [&str; 4] = ["Page", "Runtime", "Network", "DOM"];

// ============================================================================
// Manager
// ============================================================================

/// Coordinator task owning the browser connection and the tab registry.
pub struct Manager {
    conn: Connection,
    config: Config,
    registry: Registry,
    requests: mpsc::Receiver<ManagerRequest>,
    liveness_tx: mpsc::UnboundedSender<OwnerId>,
    liveness_rx: mpsc::UnboundedReceiver<OwnerId>,
    /// Merged view over every session event bus.
    session_events: StreamMap<SessionId, ReceiverStream<EventFrame>>,
}

impl Manager {
    /// Builds a manager over an established connection.
    pub(crate) fn new(
        conn: Connection,
        config: Config,
        requests: mpsc::Receiver<ManagerRequest>,
    ) -> Self {
        let (liveness_tx, liveness_rx) = mpsc::unbounded_channel();
        Self {
            conn,
            config,
            registry: Registry::new(),
            requests,
            liveness_tx,
            liveness_rx,
            session_events: StreamMap::new(),
        }
    }

    /// Runs the selection loop until every client handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error only when re-bootstrapping after a disconnect fails;
    /// the supervisor is expected to restart the manager in that case.
    pub async fn run(mut self) -> Result<()> {
        let mut health = interval_at(
            Instant::now() + self.config.health_interval,
            self.config.health_interval,
        );
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(address = %self.config.address, "Manager running");

        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        self.shutdown().await;
                        return Ok(());
                    }
                },

                Some(owner) = self.liveness_rx.recv() => {
                    self.handle_owner_exit(owner).await;
                }

                _ = health.tick() => {
                    self.run_health_check().await?;
                }

                frame = self.conn.recv_frame(), if !self.conn.is_closed() => match frame {
                    Some((id, result)) => self.route_response(id, result),
                    None => {
                        warn!("Browser stream closed, recovering");
                        self.recover().await?;
                    }
                },

                Some((session, event)) = self.session_events.next(),
                    if !self.session_events.is_empty() =>
                {
                    self.forward_event(&session, event);
                }
            }
        }
    }
}

// ============================================================================
// Manager - Request Handling
// ============================================================================

impl Manager {
    async fn handle_request(&mut self, request: ManagerRequest) {
        match request {
            ManagerRequest::Create {
                owner,
                options,
                wait,
                reply,
            } => {
                if self.config.cap_reached(self.registry.tab_count()) {
                    if !wait {
                        let _ = reply.send(Err(Error::max_tabs(format!(
                            "tab cap of {} reached",
                            self.config.max_tabs
                        ))));
                        return;
                    }

                    debug!(owner = %owner, waiters = self.registry.waiter_count() + 1,
                        "Tab cap reached, queueing waiter");
                    self.registry.push_waiter(Waiter {
                        owner,
                        options,
                        reply,
                    });
                    return;
                }

                let outcome = self.create_tab(owner, options).await;
                if reply.send(outcome).is_err() {
                    // Owner gone already; the liveness watcher spawned during
                    // creation observes the dropped feed and cleans up.
                    debug!(owner = %owner, "Create reply dropped");
                }
                self.route_buffered();
            }

            ManagerRequest::Command {
                owner,
                session,
                method,
                params,
                reply,
            } => {
                if !self.registry.contains_session(&session) {
                    let _ = reply.send(Err(Error::tab_closed(format!(
                        "no tab for session {session}"
                    ))));
                    return;
                }
                if self.conn.is_closed() {
                    let _ = reply.send(Err(Error::disconnected("browser connection lost")));
                    return;
                }

                match self.conn.send_async(&method, &params, Some(&session)).await {
                    Ok(id) => {
                        trace!(id = %id, owner = %owner, method = %method, "Command in flight");
                        self.registry.add_pending(
                            id,
                            PendingReply {
                                owner,
                                method,
                                reply,
                            },
                        );
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }

            ManagerRequest::Close { session, done } => {
                self.close_tab(&session).await;
                self.serve_waiters().await;
                let _ = done.send(());
            }
        }
    }

    async fn handle_owner_exit(&mut self, owner: OwnerId) {
        let sessions = self.registry.drop_owner(owner);
        if sessions.is_empty() {
            return;
        }

        debug!(owner = %owner, tabs = sessions.len(), "Owner exited");
        for session in sessions {
            self.close_tab(&session).await;
        }
        self.serve_waiters().await;
    }
}

// ============================================================================
// Manager - Tab Lifecycle
// ============================================================================

impl Manager {
    /// Creates one tab: fresh context, fresh target, flattened session.
    ///
    /// Rolls the sequence back in reverse on any failure.
    async fn create_tab(&mut self, owner: OwnerId, options: TabOptions) -> Result<TabCreated> {
        let timeout = self.config.command_timeout;

        let created = self
            .conn
            .send(
                "Target.createBrowserContext",
                &json!({"disposeOnDetach": true}),
                None,
                timeout,
            )
            .await?;
        let context = created
            .get("browserContextId")
            .and_then(Value::as_str)
            .map(ContextId::new)
            .ok_or_else(|| Error::invalid("createBrowserContext returned no browserContextId"))?;

        let target = match self
            .conn
            .send(
                "Target.createTarget",
                &json!({"url": "about:blank", "browserContextId": context.as_str()}),
                None,
                timeout,
            )
            .await
            .and_then(|v| {
                v.get("targetId")
                    .and_then(Value::as_str)
                    .map(TargetId::new)
                    .ok_or_else(|| Error::invalid("createTarget returned no targetId"))
            }) {
            Ok(target) => target,
            Err(e) => {
                self.dispose_context(&context).await;
                return Err(e);
            }
        };

        let session = match self
            .conn
            .send(
                "Target.attachToTarget",
                &json!({"targetId": target.as_str(), "flatten": true}),
                None,
                timeout,
            )
            .await
            .and_then(|v| {
                v.get("sessionId")
                    .and_then(Value::as_str)
                    .map(SessionId::new)
                    .ok_or_else(|| Error::invalid("attachToTarget returned no sessionId"))
            }) {
            Ok(session) => session,
            Err(e) => {
                self.close_target(&target).await;
                self.dispose_context(&context).await;
                return Err(e);
            }
        };

        for domain in SESSION_DOMAINS {
            let method = format!("{domain}.enable");
            if let Err(e) = self.conn.send(&method, &json!({}), Some(&session), timeout).await {
                warn!(session = %session, domain = %domain, error = %e, "Domain enable failed");
            }
        }

        let bus = self.conn.subscribe(session.clone(), DEFAULT_BUS_CAPACITY);
        self.session_events
            .insert(session.clone(), ReceiverStream::new(bus));

        let (events_tx, events_rx) = mpsc::channel(DEFAULT_BUS_CAPACITY);
        self.monitor_owner(owner, &events_tx);

        self.registry.insert_tab(TabRecord {
            session: session.clone(),
            target: target.clone(),
            context: context.clone(),
            owner,
            events: events_tx,
            options: options.clone(),
        });

        info!(session = %session, target = %target, owner = %owner, "Tab created");

        Ok(TabCreated {
            session,
            target,
            context,
            options,
            events: events_rx,
        })
    }

    /// Spawns a liveness watcher resolving the owner's feed closure into an
    /// exit message.
    fn monitor_owner(&mut self, owner: OwnerId, events: &mpsc::Sender<TabEvent>) {
        if !self.registry.monitor(owner) {
            return;
        }

        let events = events.clone();
        let liveness = self.liveness_tx.clone();
        tokio::spawn(async move {
            events.closed().await;
            let _ = liveness.send(owner);
        });
    }

    /// Tears one tab down; browser-side failures are tolerated.
    async fn close_tab(&mut self, session: &SessionId) {
        let Some(record) = self.registry.remove_tab(session) else {
            return;
        };

        if !self.conn.is_closed() {
            let timeout = self.config.command_timeout;
            let teardown: [(&str, Value); 3] = [
                (
                    "Target.detachFromTarget",
                    json!({"sessionId": session.as_str()}),
                ),
                ("Target.closeTarget", json!({"targetId": record.target.as_str()})),
                (
                    "Target.disposeBrowserContext",
                    json!({"browserContextId": record.context.as_str()}),
                ),
            ];
            for (method, params) in teardown {
                if let Err(e) = self.conn.send(method, &params, None, timeout).await {
                    warn!(session = %session, method = %method, error = %e, "Teardown step failed");
                }
            }
            self.route_buffered();
        }

        self.conn.unsubscribe(session);
        self.session_events.remove(session);
        // Dropping the record closes the owner feed, cancelling its waits.
        debug!(session = %session, owner = %record.owner, "Tab closed");
    }

    async fn dispose_context(&mut self, context: &ContextId) {
        let params = json!({"browserContextId": context.as_str()});
        if let Err(e) = self
            .conn
            .send(
                "Target.disposeBrowserContext",
                &params,
                None,
                self.config.command_timeout,
            )
            .await
        {
            warn!(context = %context, error = %e, "Context rollback failed");
        }
    }

    async fn close_target(&mut self, target: &TargetId) {
        let params = json!({"targetId": target.as_str()});
        if let Err(e) = self
            .conn
            .send("Target.closeTarget", &params, None, self.config.command_timeout)
            .await
        {
            warn!(target = %target, error = %e, "Target rollback failed");
        }
    }

    /// Serves queued waiters while slots are free, oldest first.
    async fn serve_waiters(&mut self) {
        while !self.config.cap_reached(self.registry.tab_count()) {
            let Some(waiter) = self.registry.pop_live_waiter() else {
                return;
            };

            let outcome = self.create_tab(waiter.owner, waiter.options).await;
            if waiter.reply.send(outcome).is_err() {
                debug!(owner = %waiter.owner, "Waiter gone after creation");
            }
            self.route_buffered();
        }
    }
}

// ============================================================================
// Manager - Frame Routing
// ============================================================================

impl Manager {
    /// Delivers one routed response to the owner recorded for its id.
    fn route_response(&mut self, id: RequestId, result: Result<Value>) {
        match self.registry.take_pending(id) {
            Some(pending) => {
                let outcome = result.map_err(|e| match e {
                    Error::Cdp { code, message } => {
                        Error::classify(code, &message, Some(&pending.method))
                    }
                    other => other,
                });
                if pending.reply.send(outcome).is_err() {
                    trace!(id = %id, owner = %pending.owner, "Reply receiver gone");
                }
            }
            None => debug!(id = %id, "Response with no pending entry dropped"),
        }
    }

    /// Routes the responses (and logs the browser-level events) buffered
    /// during a blocking control-plane sequence.
    fn route_buffered(&mut self) {
        for (id, result) in self.conn.drain_responses() {
            self.route_response(id, result);
        }
        for event in self.conn.drain_browser_events() {
            trace!(method = %event.method, "Browser-level event");
        }
    }

    /// Forwards one session event to the tab's owner feed, best-effort.
    fn forward_event(&mut self, session: &SessionId, event: EventFrame) {
        let Some(record) = self.registry.tab(session) else {
            return;
        };

        let forwarded = TabEvent {
            method: event.method,
            params: event.params,
            session: session.clone(),
        };
        if record.events.try_send(forwarded).is_err() {
            trace!(session = %session, "Owner feed full or closed, event dropped");
        }
    }
}

// ============================================================================
// Manager - Health and Recovery
// ============================================================================

impl Manager {
    async fn run_health_check(&mut self) -> Result<()> {
        match self
            .conn
            .send("Browser.getVersion", &json!({}), None, HEALTH_PROBE_TIMEOUT)
            .await
        {
            Ok(_) => {
                self.route_buffered();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Health check failed, recovering");
                self.recover().await
            }
        }
    }

    /// Disconnect recovery: fail pendings, clear the registry, reject
    /// waiters, then bootstrap a fresh connection to the same address.
    ///
    /// Pending replies are failed before the tab table is cleared so owners
    /// observe `CDP_DISCONNECTED` on in-flight commands rather than
    /// `TAB_CLOSED`.
    async fn recover(&mut self) -> Result<()> {
        for pending in self.registry.drain_pending() {
            let _ = pending
                .reply
                .send(Err(Error::disconnected("browser connection lost")));
        }

        self.session_events = StreamMap::new();
        let records = self.registry.clear_tabs();
        drop(records);

        for waiter in self.registry.drain_waiters() {
            let _ = waiter
                .reply
                .send(Err(Error::disconnected("browser connection lost")));
        }

        self.conn.close().await;
        match Connection::bootstrap(&self.config.address, self.config.connect_timeout).await {
            Ok(conn) => {
                self.conn = conn;
                info!(address = %self.config.address, "Reconnected to browser");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Re-bootstrap failed, manager exiting");
                Err(e)
            }
        }
    }

    /// Graceful shutdown once every client handle is gone.
    async fn shutdown(&mut self) {
        let sessions: Vec<SessionId> = self
            .registry
            .clear_tabs()
            .into_iter()
            .map(|record| record.session)
            .collect();

        for session in &sessions {
            if self.conn.is_closed() {
                break;
            }
            let _ = self
                .conn
                .send(
                    "Target.detachFromTarget",
                    &json!({"sessionId": session.as_str()}),
                    None,
                    HEALTH_PROBE_TIMEOUT,
                )
                .await;
        }

        self.conn.close().await;
        info!("Manager shut down");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::testsupport::{MockBrowser, default_respond, err, event, ok};
    use crate::browser::Browser;
    use crate::config::Config;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn config_for(mock: &MockBrowser) -> Config {
        Config::new(mock.address())
            .with_command_timeout("5s")
            .unwrap()
            .with_operation_timeout("5s")
            .unwrap()
            .with_navigation_timeout("5s")
            .unwrap()
    }

    #[tokio::test]
    async fn simple_navigate() {
        let mock = MockBrowser::start().await;
        let browser = Browser::connect(config_for(&mock)).await.expect("connect");
        let mut tab = browser.new_tab().await.expect("tab");

        let nav = tab.goto("https://example.com").await.expect("goto");
        assert_eq!(nav.url, "https://example.com");
        assert_eq!(nav.frame_id, "f1");
        assert_eq!(nav.loader_id, "l1");
    }

    #[tokio::test]
    async fn commands_multiplex_out_of_order() {
        // The browser answers tab B's command before tab A's; each owner
        // must still receive its own reply, matched by identifier.
        let held = Arc::new(AtomicU64::new(0));
        let held_script = Arc::clone(&held);

        let mock = MockBrowser::with_script(move |call| {
            if call.method == "Runtime.evaluate" {
                match held_script.swap(call.id, Ordering::SeqCst) {
                    0 => vec![], // hold the first evaluation
                    first => vec![
                        ok(call.id, json!({"result": {"value": "second"}})),
                        ok(first, json!({"result": {"value": "first"}})),
                    ],
                }
            } else {
                default_respond(&call)
            }
        })
        .await;

        let browser = Browser::connect(config_for(&mock)).await.expect("connect");
        let tab_a = browser.new_tab().await.expect("tab a");
        let tab_b = browser.new_tab().await.expect("tab b");

        let fut_a = tab_a.send_command("Runtime.evaluate", json!({"expression": "'a'"}));
        let fut_b = async {
            // Make sure A's command reaches the mock first.
            tokio::time::sleep(Duration::from_millis(100)).await;
            tab_b
                .send_command("Runtime.evaluate", json!({"expression": "'b'"}))
                .await
        };

        let (reply_a, reply_b) = tokio::join!(fut_a, fut_b);
        assert_eq!(reply_a.expect("a")["result"]["value"], json!("first"));
        assert_eq!(reply_b.expect("b")["result"]["value"], json!("second"));
    }

    #[tokio::test]
    async fn cap_queues_waiter_until_owner_exit() {
        let mock = MockBrowser::start().await;
        let config = config_for(&mock).with_max_tabs(1);
        let browser = Browser::connect(config).await.expect("connect");

        let tab1 = browser.new_tab().await.expect("first tab");
        let first_session = tab1.session().clone();

        let browser2 = browser.clone();
        let waiter = tokio::spawn(async move { browser2.new_tab().await });

        // Give the create time to reach the waiter queue, then release the
        // slot by dropping the first owner.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());
        drop(tab1);

        let tab2 = waiter.await.expect("join").expect("second tab");
        assert_ne!(tab2.session(), &first_session);
    }

    #[tokio::test]
    async fn disconnect_fails_in_flight_commands_then_recovers() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen_script = Arc::clone(&seen);

        let mock = MockBrowser::with_script(move |call| {
            if call.method == "Runtime.evaluate" {
                // Swallow both commands, then drop the stream.
                if seen_script.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                    vec![Value::Null]
                } else {
                    vec![]
                }
            } else {
                default_respond(&call)
            }
        })
        .await;

        let browser = Browser::connect(config_for(&mock)).await.expect("connect");
        let tab_a = browser.new_tab().await.expect("tab a");
        let tab_b = browser.new_tab().await.expect("tab b");

        let (reply_a, reply_b) = tokio::join!(
            tab_a.send_command("Runtime.evaluate", json!({"expression": "1"})),
            tab_b.send_command("Runtime.evaluate", json!({"expression": "2"})),
        );

        assert_eq!(reply_a.expect_err("a fails").kind(), "CDP_DISCONNECTED");
        assert_eq!(reply_b.expect_err("b fails").kind(), "CDP_DISCONNECTED");

        // The manager re-bootstrapped against the same address; fresh
        // creates succeed.
        let tab = browser.new_tab().await.expect("tab after recovery");
        assert!(!tab.session().as_str().is_empty());
    }

    #[tokio::test]
    async fn command_errors_are_classified() {
        let mock = MockBrowser::with_script(|call| match call.method.as_str() {
            "Runtime.evaluate" => vec![err(
                call.id,
                -32001,
                "Session with given id not found",
            )],
            "Page.navigate" => vec![err(call.id, -32000, "net::ERR_NAME_NOT_RESOLVED")],
            _ => default_respond(&call),
        })
        .await;

        let browser = Browser::connect(config_for(&mock)).await.expect("connect");
        let mut tab = browser.new_tab().await.expect("tab");

        let eval_err = tab
            .send_command("Runtime.evaluate", json!({"expression": "1"}))
            .await
            .expect_err("must fail");
        assert!(eval_err.to_string().starts_with("TAB_CLOSED:"));

        let nav_err = tab
            .goto("https://no-such-host.invalid")
            .await
            .expect_err("must fail");
        assert!(nav_err.to_string().starts_with("NAVIGATION_FAILED:"));
    }

    #[tokio::test]
    async fn try_new_tab_fails_fast_at_cap() {
        let mock = MockBrowser::start().await;
        let config = config_for(&mock).with_max_tabs(1);
        let browser = Browser::connect(config).await.expect("connect");

        let _tab1 = browser.new_tab().await.expect("first tab");
        let err = browser.try_new_tab().await.expect_err("cap reached");
        assert_eq!(err.kind(), "MAX_TABS_REACHED");
    }

    #[tokio::test]
    async fn close_releases_slot_for_waiter() {
        let mock = MockBrowser::start().await;
        let config = config_for(&mock).with_max_tabs(1);
        let browser = Browser::connect(config).await.expect("connect");

        let mut tab1 = browser.new_tab().await.expect("first tab");

        let browser2 = browser.clone();
        let waiter = tokio::spawn(async move { browser2.new_tab().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        tab1.close().await.expect("close");
        let tab2 = waiter.await.expect("join").expect("second tab");
        assert!(!tab2.session().as_str().is_empty());
    }

    #[tokio::test]
    async fn events_forward_to_their_tab() {
        let mock = MockBrowser::with_script(|call| {
            if call.method == "Custom.emit" {
                let session = call.session_id.clone().unwrap_or_default();
                vec![
                    ok(call.id, json!({})),
                    event("Custom.signal", json!({"marker": 42}), Some(&session)),
                ]
            } else {
                default_respond(&call)
            }
        })
        .await;

        let browser = Browser::connect(config_for(&mock)).await.expect("connect");
        let mut tab = browser.new_tab().await.expect("tab");

        tab.send_command("Custom.emit", json!({})).await.expect("emit");
        let params = tab
            .wait_event("Custom.signal", Duration::from_secs(5))
            .await
            .expect("event");
        assert_eq!(params["marker"], json!(42));
    }
}
