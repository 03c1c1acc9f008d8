//! Manager bookkeeping: tab table, owner index, pending replies, waiters.
//!
//! Invariants maintained here:
//!
//! - at most one tab record per session identifier;
//! - the owner index holds exactly the owners appearing in the tab table;
//! - waiters are FIFO and only ever non-empty while the cap is reached;
//! - a pending-reply entry exists from `send_async` success until its
//!   response is routed (or drained on disconnect).

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::identifiers::{ContextId, OwnerId, RequestId, SessionId, TargetId};

use super::messages::{TabCreated, TabEvent, TabOptions};

// ============================================================================
// Records
// ============================================================================

/// One live tab, keyed by session identifier.
pub(crate) struct TabRecord {
    /// Session identifier.
    pub session: SessionId,
    /// Target (page) identifier.
    pub target: TargetId,
    /// Browser context identifier.
    pub context: ContextId,
    /// Owning client.
    pub owner: OwnerId,
    /// Owner event feed; dropping it closes the owner's waits.
    pub events: mpsc::Sender<TabEvent>,
    /// Tab defaults handed out at creation.
    pub options: TabOptions,
}

/// One command written to the wire whose response has not been routed yet.
pub(crate) struct PendingReply {
    /// Submitting owner (for diagnostics).
    pub owner: OwnerId,
    /// Method name, used as classification context.
    pub method: String,
    /// Reply path.
    pub reply: oneshot::Sender<Result<Value>>,
}

/// One tab-creation request queued behind the cap.
pub(crate) struct Waiter {
    /// Requesting owner.
    pub owner: OwnerId,
    /// Requested tab defaults.
    pub options: TabOptions,
    /// Reply path; a closed receiver means the owner has exited.
    pub reply: oneshot::Sender<Result<TabCreated>>,
}

// ============================================================================
// Registry
// ============================================================================

/// All mutable manager state apart from the connection itself.
#[derive(Default)]
pub(crate) struct Registry {
    tabs: FxHashMap<SessionId, TabRecord>,
    owners: FxHashMap<OwnerId, FxHashSet<SessionId>>,
    monitored: FxHashSet<OwnerId>,
    pending: FxHashMap<RequestId, PendingReply>,
    waiters: VecDeque<Waiter>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Registry - Tabs and Owners
// ============================================================================

impl Registry {
    /// Number of live tabs.
    #[inline]
    #[must_use]
    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    /// Returns `true` if the session has a live tab record.
    #[inline]
    #[must_use]
    pub fn contains_session(&self, session: &SessionId) -> bool {
        self.tabs.contains_key(session)
    }

    /// Looks up one tab record.
    #[inline]
    #[must_use]
    pub fn tab(&self, session: &SessionId) -> Option<&TabRecord> {
        self.tabs.get(session)
    }

    /// Stores a tab record and indexes it under its owner.
    pub fn insert_tab(&mut self, record: TabRecord) {
        self.owners
            .entry(record.owner)
            .or_default()
            .insert(record.session.clone());
        self.tabs.insert(record.session.clone(), record);
    }

    /// Removes a tab record, keeping the owner index consistent.
    pub fn remove_tab(&mut self, session: &SessionId) -> Option<TabRecord> {
        let record = self.tabs.remove(session)?;

        if let Some(sessions) = self.owners.get_mut(&record.owner) {
            sessions.remove(session);
            if sessions.is_empty() {
                self.owners.remove(&record.owner);
            }
        }

        Some(record)
    }

    /// Removes an owner from the index and monitor set, returning its
    /// sessions.
    pub fn drop_owner(&mut self, owner: OwnerId) -> Vec<SessionId> {
        self.monitored.remove(&owner);
        self.owners
            .remove(&owner)
            .map(|sessions| sessions.into_iter().collect())
            .unwrap_or_default()
    }

    /// Marks an owner as monitored; returns `true` if it was not already.
    pub fn monitor(&mut self, owner: OwnerId) -> bool {
        self.monitored.insert(owner)
    }

    /// Drops every tab record and monitor, returning the records so the
    /// caller controls when their event feeds close.
    pub fn clear_tabs(&mut self) -> Vec<TabRecord> {
        self.owners.clear();
        self.monitored.clear();
        self.tabs.drain().map(|(_, record)| record).collect()
    }
}

// ============================================================================
// Registry - Pending Replies
// ============================================================================

impl Registry {
    /// Records one in-flight command.
    pub fn add_pending(&mut self, id: RequestId, pending: PendingReply) {
        self.pending.insert(id, pending);
    }

    /// Removes and returns the in-flight command matching a response.
    pub fn take_pending(&mut self, id: RequestId) -> Option<PendingReply> {
        self.pending.remove(&id)
    }

    /// Removes and returns every in-flight command (disconnect drain).
    pub fn drain_pending(&mut self) -> Vec<PendingReply> {
        self.pending.drain().map(|(_, pending)| pending).collect()
    }
}

// ============================================================================
// Registry - Waiters
// ============================================================================

impl Registry {
    /// Appends a waiter; admitted only while the cap is reached.
    pub fn push_waiter(&mut self, waiter: Waiter) {
        self.waiters.push_back(waiter);
    }

    /// Pops the oldest waiter whose owner is still listening.
    ///
    /// Waiters whose reply channel has closed are silently discarded.
    pub fn pop_live_waiter(&mut self) -> Option<Waiter> {
        while let Some(waiter) = self.waiters.pop_front() {
            if !waiter.reply.is_closed() {
                return Some(waiter);
            }
        }
        None
    }

    /// Removes and returns every waiter (disconnect drain).
    pub fn drain_waiters(&mut self) -> Vec<Waiter> {
        self.waiters.drain(..).collect()
    }

    /// Number of queued waiters.
    #[inline]
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
