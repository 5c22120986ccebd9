//! Per-peer connection settings.
//!
//! A [`ConnectionConfig`] is immutable once built: the engine copies it into
//! each connection at construction time and never writes it back.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults::{DEFAULT_RETRY_DELAY_MS, default_connect_timeout_ms, default_port};

/// How many connect attempts a connection may make before giving up.
///
/// On the wire of the configuration file this is an integer where `-1`
/// means "keep trying forever".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum AttemptLimit {
    /// Attempt forever.
    #[default]
    Unbounded,
    /// Give up once this many attempts have failed.
    Bounded(u32),
}

impl AttemptLimit {
    /// Returns `true` once `attempts_made` has used up the limit.
    #[must_use]
    pub const fn is_exhausted(self, attempts_made: u32) -> bool {
        match self {
            Self::Unbounded => false,
            Self::Bounded(limit) => attempts_made >= limit,
        }
    }
}

impl TryFrom<i64> for AttemptLimit {
    type Error = AttemptLimitError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value == -1 {
            return Ok(Self::Unbounded);
        }
        u32::try_from(value)
            .map(Self::Bounded)
            .map_err(|_| AttemptLimitError { value })
    }
}

impl From<AttemptLimit> for i64 {
    fn from(limit: AttemptLimit) -> Self {
        match limit {
            AttemptLimit::Unbounded => -1,
            AttemptLimit::Bounded(limit) => Self::from(limit),
        }
    }
}

impl fmt::Display for AttemptLimit {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => formatter.write_str("unbounded"),
            Self::Bounded(limit) => write!(formatter, "{limit}"),
        }
    }
}

/// Raised when `connection_attempts` is neither `-1` nor a non-negative count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection_attempts must be -1 or a non-negative count, got {value}")]
pub struct AttemptLimitError {
    /// The rejected value.
    pub value: i64,
}

/// Settings for one remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    connection_attempts: AttemptLimit,
    #[serde(default)]
    require_connection: bool,
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
    #[serde(default)]
    retry_delay_ms: u64,
}

impl ConnectionConfig {
    /// Builds a configuration for `host` with every other setting defaulted.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            connection_attempts: AttemptLimit::Unbounded,
            require_connection: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }

    /// Sets the peer port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the attempt limit.
    #[must_use]
    pub const fn with_connection_attempts(mut self, limit: AttemptLimit) -> Self {
        self.connection_attempts = limit;
        self
    }

    /// Marks the peer as required: failing to reach it or losing it is fatal.
    #[must_use]
    pub const fn with_require_connection(mut self, required: bool) -> Self {
        self.require_connection = required;
        self
    }

    /// Bounds each blocking connect. A zero duration disables the bound.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the minimum delay between two connect attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Peer host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Peer port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Attempt limit before the connection gives up.
    #[must_use]
    pub const fn connection_attempts(&self) -> AttemptLimit {
        self.connection_attempts
    }

    /// Whether losing this peer is fatal for the host.
    #[must_use]
    pub const fn require_connection(&self) -> bool {
        self.require_connection
    }

    /// Bound on a single connect, or `None` for an unbounded connect.
    #[must_use]
    pub const fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.connect_timeout_ms))
        }
    }

    /// Minimum delay between two connect attempts.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// `host:port` form used in logs.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn new_applies_defaults() {
        let config = ConnectionConfig::new("localhost");

        assert_eq!(config.host(), "localhost");
        assert_eq!(config.port(), 5050);
        assert_eq!(config.connection_attempts(), AttemptLimit::Unbounded);
        assert!(!config.require_connection());
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.retry_delay(), Duration::ZERO);
    }

    #[rstest]
    #[case(-1, Some(AttemptLimit::Unbounded))]
    #[case(0, Some(AttemptLimit::Bounded(0)))]
    #[case(3, Some(AttemptLimit::Bounded(3)))]
    #[case(-2, None)]
    fn attempt_limit_from_integer(#[case] raw: i64, #[case] expected: Option<AttemptLimit>) {
        assert_eq!(AttemptLimit::try_from(raw).ok(), expected);
    }

    #[rstest]
    #[case(AttemptLimit::Unbounded, 1_000, false)]
    #[case(AttemptLimit::Bounded(3), 2, false)]
    #[case(AttemptLimit::Bounded(3), 3, true)]
    #[case(AttemptLimit::Bounded(0), 0, true)]
    fn attempt_limit_exhaustion(
        #[case] limit: AttemptLimit,
        #[case] attempts: u32,
        #[case] exhausted: bool,
    ) {
        assert_eq!(limit.is_exhausted(attempts), exhausted);
    }

    #[rstest]
    fn zero_timeout_disables_bound() {
        let config = ConnectionConfig::new("localhost").with_connect_timeout(Duration::ZERO);

        assert_eq!(config.connect_timeout(), None);
    }

    #[rstest]
    fn endpoint_joins_host_and_port() {
        let config = ConnectionConfig::new("10.0.0.2").with_port(6000);

        assert_eq!(config.endpoint(), "10.0.0.2:6000");
    }
}
