//! Tab navigation methods.

use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};

use super::Tab;

// ============================================================================
// Types
// ============================================================================

/// Outcome of a completed navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationResult {
    /// The URL that was requested.
    pub url: String,
    /// Frame the navigation happened in.
    pub frame_id: String,
    /// Loader associated with the navigation.
    pub loader_id: String,
}

// ============================================================================
// Tab - Navigation
// ============================================================================

impl Tab {
    /// Navigates to a URL and waits for the page load event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NavigationFailed`] when the browser reports a
    /// network-level failure, and [`Error::Timeout`] when the load event
    /// does not arrive within the tab's navigation deadline.
    pub async fn goto(&mut self, url: &str) -> Result<NavigationResult> {
        debug!(session = %self.session(), url = %url, "Navigating");

        let timeout = self.options().navigation_timeout;
        let result = self
            .channel
            .send_with_timeout("Page.navigate", json!({"url": url}), timeout)
            .await?;

        if let Some(error_text) = result.get("errorText").and_then(Value::as_str)
            && !error_text.is_empty()
        {
            return Err(Error::navigation_failed(format!("{error_text} ({url})")));
        }

        let frame_id = result
            .get("frameId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let loader_id = result
            .get("loaderId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.wait_event("Page.loadEventFired", timeout).await?;

        Ok(NavigationResult {
            url: url.to_string(),
            frame_id,
            loader_id,
        })
    }

    /// Reloads the current page and waits for the load event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when the load event does not arrive
    /// within the tab's navigation deadline.
    pub async fn reload(&mut self) -> Result<()> {
        debug!(session = %self.session(), "Reloading");

        let timeout = self.options().navigation_timeout;
        self.channel
            .send_with_timeout("Page.reload", json!({}), timeout)
            .await?;
        self.wait_event("Page.loadEventFired", timeout).await?;
        Ok(())
    }
}
