//! Error taxonomy and CDP error classification.
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`].
//! The taxonomy is a closed set; every user-visible error renders as
//! `ERROR_KIND: human description`.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Connection | [`Error::ConnectionFailed`], [`Error::Disconnected`] |
//! | Protocol | [`Error::Cdp`], [`Error::Invalid`] |
//! | Navigation | [`Error::NavigationFailed`], [`Error::TabClosed`] |
//! | Element | [`Error::ElementNotFound`], [`Error::ElementNotVisible`], [`Error::ElementNotInteractable`] |
//! | Execution | [`Error::Eval`], [`Error::Timeout`] |
//! | Download | [`Error::DownloadTimeout`], [`Error::DownloadFailed`] |
//! | Capacity | [`Error::MaxTabsReached`] |
//!
//! Raw browser error strings are mapped into the taxonomy by
//! [`Error::classify`], which matches by substring with a fixed precedence:
//! tab/session lifecycle markers first, then network, DOM, and JS runtime
//! markers, falling back to [`Error::Cdp`].

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Display strings follow the wire contract `ERROR_KIND: description`.
#[derive(Error, Debug)]
pub enum Error {
    /// Bootstrap against the browser's discovery endpoint failed.
    #[error("CDP_CONNECTION_FAILED: {message}")]
    ConnectionFailed {
        /// Underlying reason (transport error, HTTP status, bad payload).
        message: String,
    },

    /// The browser connection was lost while an operation was in flight.
    #[error("CDP_DISCONNECTED: {message}")]
    Disconnected {
        /// Description of the disconnect.
        message: String,
    },

    /// The browser answered a command with an error frame that matched no
    /// more specific category.
    #[error("CDP_ERROR: CDP error({code}): {message}")]
    Cdp {
        /// Raw protocol error code.
        code: i64,
        /// Raw protocol error message, with method context when available.
        message: String,
    },

    /// Navigation was rejected or failed at the network layer.
    #[error("NAVIGATION_FAILED: {message}")]
    NavigationFailed {
        /// Raw failure message (e.g. `net::ERR_NAME_NOT_RESOLVED`).
        message: String,
    },

    /// A DOM query matched no node.
    #[error("ELEMENT_NOT_FOUND: {message}")]
    ElementNotFound {
        /// Raw failure message.
        message: String,
    },

    /// The target node exists but is not visible.
    #[error("ELEMENT_NOT_VISIBLE: {message}")]
    ElementNotVisible {
        /// Raw failure message.
        message: String,
    },

    /// The target node cannot receive interaction.
    #[error("ELEMENT_NOT_INTERACTABLE: {message}")]
    ElementNotInteractable {
        /// Raw failure message.
        message: String,
    },

    /// JavaScript evaluation raised an exception.
    #[error("EVAL_ERROR: {message}")]
    Eval {
        /// Exception text.
        message: String,
    },

    /// No download was captured before the deadline.
    #[error("DOWNLOAD_TIMEOUT: no download captured within {timeout_ms}ms")]
    DownloadTimeout {
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    /// A download was detected but its body could not be captured.
    #[error("DOWNLOAD_FAILED: {message}")]
    DownloadFailed {
        /// Description of the capture failure.
        message: String,
    },

    /// The concurrent-tab cap was reached and waiting was not an option.
    #[error("MAX_TABS_REACHED: {message}")]
    MaxTabsReached {
        /// Description including the configured cap.
        message: String,
    },

    /// The tab (or its session) no longer exists.
    #[error("TAB_CLOSED: {message}")]
    TabClosed {
        /// Description of the closure.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("TIMEOUT: {operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation (usually a CDP method name) that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Invalid input or an unencodable/undecodable payload.
    #[error("INVALID: {message}")]
    Invalid {
        /// Description of the invalid input.
        message: String,
    },
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a connection-failed error.
    #[inline]
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    /// Creates a disconnected error.
    #[inline]
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::Disconnected {
            message: message.into(),
        }
    }

    /// Creates a raw CDP error.
    #[inline]
    pub fn cdp(code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            code,
            message: message.into(),
        }
    }

    /// Creates a navigation-failed error.
    #[inline]
    pub fn navigation_failed(message: impl Into<String>) -> Self {
        Self::NavigationFailed {
            message: message.into(),
        }
    }

    /// Creates an eval error.
    #[inline]
    pub fn eval(message: impl Into<String>) -> Self {
        Self::Eval {
            message: message.into(),
        }
    }

    /// Creates a download-failed error.
    #[inline]
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    /// Creates a download-timeout error.
    #[inline]
    pub fn download_timeout(timeout: Duration) -> Self {
        Self::DownloadTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Creates a max-tabs error.
    #[inline]
    pub fn max_tabs(message: impl Into<String>) -> Self {
        Self::MaxTabsReached {
            message: message.into(),
        }
    }

    /// Creates a tab-closed error.
    #[inline]
    pub fn tab_closed(message: impl Into<String>) -> Self {
        Self::TabClosed {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Creates an invalid-input error.
    #[inline]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns the error kind tag (the `ERROR_KIND` prefix of the display
    /// string).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "CDP_CONNECTION_FAILED",
            Self::Disconnected { .. } => "CDP_DISCONNECTED",
            Self::Cdp { .. } => "CDP_ERROR",
            Self::NavigationFailed { .. } => "NAVIGATION_FAILED",
            Self::ElementNotFound { .. } => "ELEMENT_NOT_FOUND",
            Self::ElementNotVisible { .. } => "ELEMENT_NOT_VISIBLE",
            Self::ElementNotInteractable { .. } => "ELEMENT_NOT_INTERACTABLE",
            Self::Eval { .. } => "EVAL_ERROR",
            Self::DownloadTimeout { .. } => "DOWNLOAD_TIMEOUT",
            Self::DownloadFailed { .. } => "DOWNLOAD_FAILED",
            Self::MaxTabsReached { .. } => "MAX_TABS_REACHED",
            Self::TabClosed { .. } => "TAB_CLOSED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Invalid { .. } => "INVALID",
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::DownloadTimeout { .. })
    }

    /// Returns `true` if this error means the browser connection is gone.
    #[inline]
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Disconnected { .. }
        )
    }

    /// Returns `true` if this error means the tab no longer exists.
    #[inline]
    #[must_use]
    pub fn is_tab_closed(&self) -> bool {
        matches!(self, Self::TabClosed { .. })
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Tab/session lifecycle markers: the target, context, or session the
/// command referred to is gone.
const TAB_CLOSED_MARKERS: &[&str] = &[
    "No target with given id",
    "Target closed",
    "Cannot find context",
    "Execution context was destroyed",
];

/// Network-level navigation failure markers.
const NAVIGATION_MARKERS: &[&str] = &["net::ERR_", "Cannot navigate"];

/// DOM resolution failure markers.
const NOT_FOUND_MARKERS: &[&str] = &["Could not find node", "No node with given id"];

/// JS runtime exception markers.
const EVAL_MARKERS: &[&str] = &["TypeError", "ReferenceError", "SyntaxError"];

impl Error {
    /// Maps a raw browser error to the closed taxonomy.
    ///
    /// Matching is by substring on the raw message, first match wins:
    ///
    /// 1. tab/session lifecycle markers (including any
    ///    `Session … not found` variant) map to [`Error::TabClosed`];
    /// 2. network markers map to [`Error::NavigationFailed`];
    /// 3. DOM markers map to the element errors;
    /// 4. JS runtime markers map to [`Error::Eval`];
    /// 5. anything else falls back to [`Error::Cdp`], with the failing
    ///    method name appended as context when available.
    #[must_use]
    pub fn classify(code: i64, message: &str, method: Option<&str>) -> Self {
        let session_gone = message.contains("Session") && message.contains("not found");
        if session_gone || TAB_CLOSED_MARKERS.iter().any(|m| message.contains(m)) {
            return Self::tab_closed(message);
        }

        if NAVIGATION_MARKERS.iter().any(|m| message.contains(m)) {
            return Self::navigation_failed(message);
        }

        if NOT_FOUND_MARKERS.iter().any(|m| message.contains(m)) {
            return Self::ElementNotFound {
                message: message.to_string(),
            };
        }
        if message.contains("Node is not visible") {
            return Self::ElementNotVisible {
                message: message.to_string(),
            };
        }
        if message.contains("Node is not an element") || message.contains("not interactable") {
            return Self::ElementNotInteractable {
                message: message.to_string(),
            };
        }

        if EVAL_MARKERS.iter().any(|m| message.contains(m)) {
            return Self::eval(message);
        }

        match method {
            Some(method) => Self::cdp(code, format!("{message} (while calling {method})")),
            None => Self::cdp(code, message),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
