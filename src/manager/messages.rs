//! Message contract between tab owners and the manager.
//!
//! Owners submit three request topics (`create`, `command`, `close`) over
//! one mpsc channel; the manager answers on per-request oneshot channels
//! and forwards session events on a per-tab bounded feed.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::error::Result;
use crate::identifiers::{ContextId, OwnerId, SessionId, TargetId};

// ============================================================================
// TabOptions
// ============================================================================

/// Per-tab defaults handed back with every created tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabOptions {
    /// Deadline for one command round-trip or event wait.
    pub operation_timeout: Duration,

    /// Deadline for a navigation (command plus load event).
    pub navigation_timeout: Duration,
}

impl TabOptions {
    /// Derives tab defaults from the manager configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            operation_timeout: config.operation_timeout,
            navigation_timeout: config.navigation_timeout,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// One request from a tab owner to the manager.
pub(crate) enum ManagerRequest {
    /// Create a new tab (fresh browser context + target + session).
    Create {
        /// The requesting owner.
        owner: OwnerId,
        /// Defaults to apply to the new tab.
        options: TabOptions,
        /// Queue behind the tab cap instead of failing with
        /// `MAX_TABS_REACHED`.
        wait: bool,
        /// Reply path; a closed receiver marks the owner as gone.
        reply: oneshot::Sender<Result<TabCreated>>,
    },

    /// Submit one command on an existing session.
    Command {
        /// The submitting owner.
        owner: OwnerId,
        /// Session the command is scoped to.
        session: SessionId,
        /// CDP method name.
        method: String,
        /// CDP params object.
        params: Value,
        /// Reply path for the routed response.
        reply: oneshot::Sender<Result<Value>>,
    },

    /// Tear down one tab.
    Close {
        /// Session to remove.
        session: SessionId,
        /// Completion signal.
        done: oneshot::Sender<()>,
    },
}

// ============================================================================
// Replies
// ============================================================================

/// Successful tab creation.
pub(crate) struct TabCreated {
    /// Session identifier scoping commands and events to the tab.
    pub session: SessionId,
    /// Target (page) identifier.
    pub target: TargetId,
    /// Browser context (storage partition) identifier.
    pub context: ContextId,
    /// Tab defaults.
    pub options: TabOptions,
    /// The owner's event feed for this tab.
    pub events: mpsc::Receiver<TabEvent>,
}

/// One event forwarded from a session bus to its owner.
#[derive(Debug, Clone)]
pub(crate) struct TabEvent {
    /// Event name in `Domain.event` form.
    pub method: String,
    /// Event payload.
    pub params: Value,
    /// Session the event arrived on.
    pub session: SessionId,
}
