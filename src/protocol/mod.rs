//! CDP wire-frame types (internal).
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`codec`] | Command encoding with monotone request-id assignment |
//! | [`frame`] | Incoming frame classification (response / error / event) |

// ============================================================================
// Submodules
// ============================================================================

/// Command encoding.
pub mod codec;

/// Incoming frame classification.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::Codec;
pub use frame::{ErrorFrame, EventFrame, IncomingFrame, ResponseFrame};
