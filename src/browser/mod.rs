//! Client-facing browser entities.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Browser`] | Client handle; spawns the manager and creates tabs |
//! | [`Tab`] | One logical tab: commands, event waits, interception |
//!
//! # Example
//!
//! ```no_run
//! use chromux::{Browser, Config, Result};
//!
//! # async fn example() -> Result<()> {
//! let browser = Browser::connect(Config::default()).await?;
//! let mut tab = browser.new_tab().await?;
//!
//! let nav = tab.goto("https://example.com").await?;
//! println!("loaded frame {}", nav.frame_id);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Client handle over the manager.
pub mod client;

/// Tab handle and its operation surface.
pub mod tab;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::Browser;
pub use tab::{DownloadedFile, InterceptionMode, NavigationResult, ResourceType, Tab};
