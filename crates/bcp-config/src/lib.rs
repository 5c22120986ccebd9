//! Shared configuration for the BCP engine and its binaries.
//!
//! Configuration is read from YAML. A file names the peers to connect to,
//! the logging setup, how inbound parameter values are cased, and an
//! optional event map that turns host events into outbound commands:
//!
//! ```yaml
//! log_filter: info
//! log_format: compact
//! connections:
//!   media_controller:
//!     host: localhost
//!     port: 5050
//!     connection_attempts: -1
//!     require_connection: true
//! event_map:
//!   ball_started:
//!     command: ball_start
//!     params:
//!       player: "%player"
//! player_variables:
//!   - ramps
//! ```
//!
//! Environment variables (`BCP_LOG_FILTER`, `BCP_LOG_FORMAT`) take
//! precedence over the file for the logging settings.

mod connection;
mod defaults;
mod logging;

use std::collections::BTreeMap;
use std::fs;
use std::str::FromStr;
use std::sync::Arc;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::connection::{AttemptLimit, AttemptLimitError, ConnectionConfig};
pub use self::defaults::{
    ALL_PLAYER_VARIABLES, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_PORT,
    DEFAULT_RETRY_DELAY_MS, LOG_FILTER_ENV, LOG_FORMAT_ENV, default_connect_timeout,
    default_log_filter, default_log_filter_string, default_log_format, default_port,
};
pub use self::logging::{LogFormat, LogFormatParseError};

/// A host event mapped onto an outbound command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EventMapping {
    command: String,
    #[serde(default)]
    params: BTreeMap<String, String>,
}

impl EventMapping {
    /// Maps an event onto `command` with no parameters.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a parameter template. Values may reference `%field` event fields
    /// and `%name%` player variables.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.params.insert(key.into(), template.into());
        self
    }

    /// Command sent when the event fires.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Parameter templates.
    #[must_use]
    pub const fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BcpConfig {
    #[serde(default = "default_log_filter_string")]
    log_filter: String,
    #[serde(default = "default_log_format")]
    log_format: LogFormat,
    #[serde(default)]
    lowercase_values: bool,
    #[serde(default)]
    connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    event_map: BTreeMap<String, EventMapping>,
    #[serde(default)]
    player_variables: Vec<String>,
}

impl Default for BcpConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            lowercase_values: false,
            connections: BTreeMap::new(),
            event_map: BTreeMap::new(),
            player_variables: Vec::new(),
        }
    }
}

impl BcpConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read, and any
    /// error [`BcpConfig::from_yaml_str`] reports for its contents.
    pub fn load_from_path(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source: Arc::new(source),
        })?;
        Self::parse(&contents, path.as_str())
    }

    /// Parses and validates a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed YAML or unknown keys, and
    /// a validation variant when a connection or mapping is unusable.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(contents, "<inline>")
    }

    fn parse(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_saphyr::from_str(contents).map_err(|error| ConfigError::Parse {
            origin: origin.to_owned(),
            message: error.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyHost`] when a connection has no host and
    /// [`ConfigError::EmptyEventCommand`] when a mapping names no command.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some((name, _)) = self
            .connections
            .iter()
            .find(|(_, connection)| connection.host().trim().is_empty())
        {
            return Err(ConfigError::EmptyHost { name: name.clone() });
        }
        if let Some((event, _)) = self
            .event_map
            .iter()
            .find(|(_, mapping)| mapping.command().trim().is_empty())
        {
            return Err(ConfigError::EmptyEventCommand {
                event: event.clone(),
            });
        }
        Ok(())
    }

    /// Applies logging overrides looked up through `lookup`.
    ///
    /// The binaries pass `std::env::var`; tests pass a closure over a map.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::LogFormat`] when the format override is not a
    /// known [`LogFormat`].
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(filter) = lookup(LOG_FILTER_ENV) {
            self.log_filter = filter;
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            self.log_format =
                LogFormat::from_str(&format).map_err(|source| ConfigError::LogFormat {
                    value: format.clone(),
                    source,
                })?;
        }
        Ok(self)
    }

    /// Adds or replaces a named connection.
    #[must_use]
    pub fn with_connection(mut self, name: impl Into<String>, config: ConnectionConfig) -> Self {
        self.connections.insert(name.into(), config);
        self
    }

    /// Adds or replaces an event mapping.
    #[must_use]
    pub fn with_event_mapping(mut self, event: impl Into<String>, mapping: EventMapping) -> Self {
        self.event_map.insert(event.into(), mapping);
        self
    }

    /// Sets the player variables forwarded to peers. `__all__` forwards
    /// every variable.
    #[must_use]
    pub fn with_player_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.player_variables = names.into_iter().map(Into::into).collect();
        self
    }

    /// Selects legacy lower-casing of inbound parameter values.
    #[must_use]
    pub const fn with_lowercase_values(mut self, lowercase: bool) -> Self {
        self.lowercase_values = lowercase;
        self
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Whether inbound parameter values are lower-cased during decode.
    #[must_use]
    pub const fn lowercase_values(&self) -> bool {
        self.lowercase_values
    }

    /// Configured peers keyed by connection name.
    #[must_use]
    pub const fn connections(&self) -> &BTreeMap<String, ConnectionConfig> {
        &self.connections
    }

    /// Configured event mappings keyed by host event name.
    #[must_use]
    pub const fn event_map(&self) -> &BTreeMap<String, EventMapping> {
        &self.event_map
    }

    /// Player variables forwarded to peers besides the score.
    #[must_use]
    pub fn player_variables(&self) -> &[String] {
        &self.player_variables
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration '{path}': {source}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
    /// The document is not valid configuration YAML.
    #[error("failed to parse configuration from {origin}: {message}")]
    Parse {
        /// File path, or `<inline>` for string input.
        origin: String,
        /// Parser diagnostic.
        message: String,
    },
    /// A connection has an empty host.
    #[error("connection '{name}' has an empty host")]
    EmptyHost {
        /// Connection name.
        name: String,
    },
    /// An event mapping has an empty command.
    #[error("event mapping '{event}' has an empty command")]
    EmptyEventCommand {
        /// Host event name.
        event: String,
    },
    /// The log format override is unknown.
    #[error("invalid log format '{value}': {source}")]
    LogFormat {
        /// Rejected value.
        value: String,
        /// Parser error.
        #[source]
        source: LogFormatParseError,
    },
}
