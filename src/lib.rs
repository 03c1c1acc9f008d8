//! chromux - headless Chromium control over the Chrome DevTools Protocol.
//!
//! One WebSocket connection to the browser, shared by many independent tab
//! owners running in parallel. A single manager task owns the connection,
//! correlates responses by request identifier, demultiplexes events per
//! session, enforces the concurrent-tab cap with FIFO queuing, and recovers
//! from browser disconnects.
//!
//! # Architecture
//!
//! - **Local end (this crate)**: encodes commands, correlates responses,
//!   waits on session events
//! - **Remote end (Chromium)**: executes commands, emits events
//!
//! Key design principles:
//!
//! - Each [`Tab`] is an independent owner exchanging messages with the
//!   manager; no tab ever touches the connection
//! - Steady-state commands never block the manager loop (`send_async` +
//!   pending-reply table)
//! - Per-session event buses are bounded and overflow-dropping, so a slow
//!   tab never starves the others
//!
//! # Quick Start
//!
//! ```no_run
//! use chromux::{Browser, Config, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Chromium must be running with --remote-debugging-port=9222
//!     let browser = Browser::connect(Config::default()).await?;
//!     let mut tab = browser.new_tab().await?;
//!
//!     let nav = tab.goto("https://example.com").await?;
//!     println!("loaded {} in frame {}", nav.url, nav.frame_id);
//!
//!     let title = tab.evaluate("document.title").await?;
//!     println!("title: {title}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`browser`] | Client entities: [`Browser`], [`Tab`] |
//! | [`config`] | Connection and timeout configuration |
//! | [`error`] | Error taxonomy and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`manager`] | Connection manager (internal) |
//! | [`protocol`] | CDP wire-frame types (internal) |
//! | [`transport`] | WebSocket transport layer (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Client entities: [`Browser`], [`Tab`].
pub mod browser;

/// Connection and timeout configuration.
pub mod config;

/// Error taxonomy and result alias.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for protocol and registry entities.
pub mod identifiers;

/// Connection manager.
///
/// Internal module hosting the coordinator task.
pub mod manager;

/// CDP wire-frame types.
///
/// Internal module defining command/response/event structures.
pub mod protocol;

/// WebSocket transport layer.
///
/// Internal module handling discovery and the browser connection.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Browser types
pub use browser::{Browser, DownloadedFile, InterceptionMode, NavigationResult, ResourceType, Tab};

// Configuration
pub use config::{Config, parse_duration};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ContextId, OwnerId, RequestId, SessionId, TargetId};

// Tab defaults
pub use manager::messages::TabOptions;
