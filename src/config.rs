//! Manager and tab configuration.
//!
//! [`Config`] controls where the browser is reached, how many tabs may run
//! concurrently, and the default deadlines applied to connection setup,
//! commands, health checks, and per-tab operations.
//!
//! Duration-valued settings accept duration strings:
//!
//! ```
//! use chromux::Config;
//!
//! let config = Config::new("localhost:9222")
//!     .with_max_tabs(8)
//!     .with_command_timeout("30s")
//!     .expect("valid duration")
//!     .with_navigation_timeout("90s")
//!     .expect("valid duration");
//! assert_eq!(config.max_tabs, 8);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default browser debugging address.
pub const DEFAULT_ADDRESS: &str = "localhost:9222";

/// Default deadline for bootstrap (discovery + WebSocket connect).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for one command round-trip.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between browser health probes.
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Default deadline for one tab operation (command or event wait).
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for a navigation (command plus load event).
const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Config
// ============================================================================

/// Configuration for a [`Browser`](crate::Browser) and its manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Browser debugging address, `host:port`.
    pub address: String,

    /// Maximum concurrent tabs. `0` disables the cap.
    pub max_tabs: usize,

    /// Deadline for bootstrap (discovery + WebSocket connect).
    pub connect_timeout: Duration,

    /// Deadline for control-plane command round-trips.
    pub command_timeout: Duration,

    /// Interval between browser health probes.
    pub health_interval: Duration,

    /// Default per-tab operation deadline.
    pub operation_timeout: Duration,

    /// Default per-tab navigation deadline.
    pub navigation_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

// ============================================================================
// Config - Builder
// ============================================================================

impl Config {
    /// Creates a configuration for the given browser address with default
    /// timeouts and no tab cap.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            max_tabs: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            health_interval: DEFAULT_HEALTH_INTERVAL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
        }
    }

    /// Sets the maximum number of concurrent tabs (`0` = unlimited).
    #[inline]
    #[must_use]
    pub fn with_max_tabs(mut self, max_tabs: usize) -> Self {
        self.max_tabs = max_tabs;
        self
    }

    /// Sets the bootstrap deadline from a duration string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] if the string is not a valid duration.
    pub fn with_connect_timeout(mut self, timeout: &str) -> Result<Self> {
        self.connect_timeout = parse_duration(timeout)?;
        Ok(self)
    }

    /// Sets the control-plane command deadline from a duration string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] if the string is not a valid duration.
    pub fn with_command_timeout(mut self, timeout: &str) -> Result<Self> {
        self.command_timeout = parse_duration(timeout)?;
        Ok(self)
    }

    /// Sets the health-probe interval from a duration string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] if the string is not a valid duration.
    pub fn with_health_interval(mut self, interval: &str) -> Result<Self> {
        self.health_interval = parse_duration(interval)?;
        Ok(self)
    }

    /// Sets the default per-tab operation deadline from a duration string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] if the string is not a valid duration.
    pub fn with_operation_timeout(mut self, timeout: &str) -> Result<Self> {
        self.operation_timeout = parse_duration(timeout)?;
        Ok(self)
    }

    /// Sets the default per-tab navigation deadline from a duration string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] if the string is not a valid duration.
    pub fn with_navigation_timeout(mut self, timeout: &str) -> Result<Self> {
        self.navigation_timeout = parse_duration(timeout)?;
        Ok(self)
    }

    /// Returns `true` when the configured cap admits no further tab beyond
    /// `active`.
    #[inline]
    #[must_use]
    pub fn cap_reached(&self, active: usize) -> bool {
        self.max_tabs != 0 && active >= self.max_tabs
    }
}

// ============================================================================
// Duration Parsing
// ============================================================================

/// Parses a duration string of the form `500ms`, `30s`, `5m`, or `2h`.
///
/// A bare number is rejected; the unit suffix is required.
///
/// # Errors
///
/// Returns [`Error::Invalid`] for empty input, unknown units, or
/// non-numeric magnitudes.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::invalid("empty duration string"));
    }

    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) if idx > 0 => s.split_at(idx),
        _ => return Err(Error::invalid(format!("invalid duration: {s:?}"))),
    };

    let magnitude: u64 = value
        .parse()
        .map_err(|_| Error::invalid(format!("invalid duration magnitude: {s:?}")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(magnitude)),
        "s" => Ok(Duration::from_secs(magnitude)),
        "m" => Ok(Duration::from_secs(magnitude * 60)),
        "h" => Ok(Duration::from_secs(magnitude * 3600)),
        other => Err(Error::invalid(format!(
            "unknown duration unit {other:?} in {s:?}"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.address, "localhost:9222");
        assert_eq!(config.max_tabs, 0);
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.health_interval, Duration::from_secs(30));
    }

    #[test]
    fn builder_chain() {
        let config = Config::new("127.0.0.1:9333")
            .with_max_tabs(2)
            .with_command_timeout("5s")
            .unwrap()
            .with_health_interval("500ms")
            .unwrap();

        assert_eq!(config.address, "127.0.0.1:9333");
        assert_eq!(config.max_tabs, 2);
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.health_interval, Duration::from_millis(500));
    }

    #[test]
    fn cap_reached() {
        let capped = Config::default().with_max_tabs(2);
        assert!(!capped.cap_reached(1));
        assert!(capped.cap_reached(2));

        let uncapped = Config::default();
        assert!(!uncapped.cap_reached(10_000));
    }

    #[test]
    fn parse_duration_valid() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration(" 10s ").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("10d").is_err());
    }
}
