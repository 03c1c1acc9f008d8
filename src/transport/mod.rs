//! Browser transport layer (internal).
//!
//! One [`Connection`] owns the WebSocket stream to the browser, discovered
//! via the HTTP `/json/version` endpoint.

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and frame pump.
pub mod connection;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;
