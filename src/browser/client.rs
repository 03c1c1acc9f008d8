//! Browser client handle.
//!
//! [`Browser::connect`] bootstraps the connection, spawns the manager task,
//! and hands back a cheap-to-clone handle. Each [`Tab`] created through the
//! handle is an independent owner: it exchanges messages with the manager
//! and never touches the connection itself.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identifiers::OwnerId;
use crate::manager::messages::{ManagerRequest, TabOptions};
use crate::manager::{Manager, REQUEST_CHANNEL_CAPACITY};
use crate::transport::Connection;

use super::tab::Tab;

// ============================================================================
// Browser
// ============================================================================

/// Handle to a running manager.
///
/// Cloning is cheap; all clones feed the same manager. Dropping every clone
/// (and every tab) shuts the manager down.
#[derive(Clone)]
pub struct Browser {
    requests: mpsc::Sender<ManagerRequest>,
    defaults: TabOptions,
    next_owner: Arc<AtomicU64>,
}

impl fmt::Debug for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Browser")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Browser {
    /// Connects to the browser at `config.address` and spawns the manager.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] when discovery or the WebSocket
    /// connect fails.
    pub async fn connect(config: Config) -> Result<Self> {
        let conn = Connection::bootstrap(&config.address, config.connect_timeout).await?;
        let defaults = TabOptions::from_config(&config);

        let (requests, inbox) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let manager = Manager::new(conn, config, inbox);
        tokio::spawn(async move {
            if let Err(e) = manager.run().await {
                error!(error = %e, "Manager terminated");
            }
        });

        Ok(Self {
            requests,
            defaults,
            next_owner: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Creates a tab with the configured defaults.
    ///
    /// When the tab cap is reached this waits, FIFO, for a slot to free.
    ///
    /// # Errors
    ///
    /// Propagates creation failures from the manager; returns
    /// [`Error::Disconnected`] if the manager has terminated.
    pub async fn new_tab(&self) -> Result<Tab> {
        self.new_tab_with_options(self.defaults.clone()).await
    }

    /// Creates a tab, failing immediately when the cap is reached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MaxTabsReached`] instead of queueing behind the
    /// cap; otherwise as [`Browser::new_tab`].
    pub async fn try_new_tab(&self) -> Result<Tab> {
        self.create(self.defaults.clone(), false).await
    }

    /// Creates a tab with explicit per-tab defaults.
    ///
    /// # Errors
    ///
    /// Propagates creation failures from the manager; returns
    /// [`Error::Disconnected`] if the manager has terminated.
    pub async fn new_tab_with_options(&self, options: TabOptions) -> Result<Tab> {
        self.create(options, true).await
    }

    async fn create(&self, options: TabOptions, wait: bool) -> Result<Tab> {
        let owner = OwnerId::new(self.next_owner.fetch_add(1, Ordering::Relaxed));
        let (reply, created) = oneshot::channel();

        self.requests
            .send(ManagerRequest::Create {
                owner,
                options,
                wait,
                reply,
            })
            .await
            .map_err(|_| Error::disconnected("manager terminated"))?;

        let created = created
            .await
            .map_err(|_| Error::disconnected("manager terminated"))??;

        Ok(Tab::new(created, owner, self.requests.clone()))
    }
}
