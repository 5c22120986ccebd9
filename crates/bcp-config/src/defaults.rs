//! Default values shared by the configuration types and the binaries.

use std::time::Duration;

use crate::logging::LogFormat;

/// Port a peer is expected to listen on when none is configured.
pub const DEFAULT_PORT: u16 = 5050;

/// Upper bound on a single blocking connect, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Minimum delay between two connect attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 0;

/// Entry in `player_variables` that forwards every player variable.
pub const ALL_PLAYER_VARIABLES: &str = "__all__";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Environment variable overriding the log filter.
pub const LOG_FILTER_ENV: &str = "BCP_LOG_FILTER";

/// Environment variable overriding the log format.
pub const LOG_FORMAT_ENV: &str = "BCP_LOG_FORMAT";

/// Default peer port.
#[must_use]
pub const fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Default connect timeout in milliseconds.
#[must_use]
pub const fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Default connect timeout as a [`Duration`].
#[must_use]
pub const fn default_connect_timeout() -> Duration {
    Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS)
}

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}
