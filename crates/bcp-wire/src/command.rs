//! Structured commands and the protocol command catalog.

use std::collections::BTreeMap;
use std::fmt;

use crate::codec;

/// Protocol version announced in `hello`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Command parameters. Ordered by key so encoded messages are deterministic.
pub type Params = BTreeMap<String, String>;

/// Command names defined by the protocol.
pub mod names {
    /// Session greeting carrying the protocol version.
    pub const HELLO: &str = "hello";
    /// Orderly session end.
    pub const GOODBYE: &str = "goodbye";
    /// Report of a command the peer did not accept.
    pub const ERROR: &str = "error";
    /// Logical switch state change.
    pub const SWITCH: &str = "switch";
    /// Named event, optionally with a callback trigger.
    pub const TRIGGER: &str = "trigger";
    /// Mode started on the host.
    pub const MODE_START: &str = "mode_start";
    /// Mode stopped on the host.
    pub const MODE_STOP: &str = "mode_stop";
    /// Game started on the host.
    pub const GAME_START: &str = "game_start";
    /// Player joined the game.
    pub const PLAYER_ADDED: &str = "player_added";
    /// Player score changed.
    pub const PLAYER_SCORE: &str = "player_score";
    /// Player variable changed.
    pub const PLAYER_VARIABLE: &str = "player_variable";
    /// Host reset.
    pub const RESET: &str = "reset";
    /// Raw display-frame payload. Never decoded as a command.
    pub const DMD_FRAME: &str = "dmd_frame";
}

/// A protocol command: a lower-case name and string parameters.
///
/// Commands built through the constructors below always carry a non-empty
/// name. [`codec::decode`] can produce an empty name from malformed input;
/// inbound dispatch rejects those.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    name: String,
    params: Params,
}

impl Command {
    /// Builds a command with no parameters. The name is lower-cased.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: name.as_ref().trim().to_lowercase(),
            params: Params::new(),
        }
    }

    /// Builds a command from an already-assembled parameter map. Keys are
    /// lower-cased; on collision the last key wins.
    #[must_use]
    pub fn with_params<I, K, V>(name: impl AsRef<str>, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut command = Self::new(name);
        for (key, value) in params {
            command
                .params
                .insert(key.as_ref().to_lowercase(), value.into());
        }
        command
    }

    /// Adds a parameter. The key is lower-cased; the value is kept verbatim.
    #[must_use]
    pub fn with_param(mut self, key: impl AsRef<str>, value: impl fmt::Display) -> Self {
        self.params
            .insert(key.as_ref().to_lowercase(), value.to_string());
        self
    }

    /// Command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All parameters.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Looks up one parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Removes and returns one parameter.
    pub fn take_param(&mut self, key: &str) -> Option<String> {
        self.params.remove(key)
    }

    /// Splits the command into its name and parameters.
    #[must_use]
    pub fn into_parts(self) -> (String, Params) {
        (self.name, self.params)
    }

    /// Wire form without the trailing line-feed.
    #[must_use]
    pub fn to_wire(&self) -> String {
        codec::encode(&self.name, &self.params)
    }

    /// `hello?version=<version>`.
    #[must_use]
    pub fn hello(version: &str) -> Self {
        Self::new(names::HELLO).with_param("version", version)
    }

    /// `goodbye`.
    #[must_use]
    pub fn goodbye() -> Self {
        Self::new(names::GOODBYE)
    }

    /// `error?message=<message>&command=<command>`.
    #[must_use]
    pub fn error(message: &str, command: &str) -> Self {
        Self::new(names::ERROR)
            .with_param("message", message)
            .with_param("command", command)
    }

    /// `switch?name=<name>&state=<0|1>`.
    #[must_use]
    pub fn switch(name: &str, active: bool) -> Self {
        Self::new(names::SWITCH)
            .with_param("name", name)
            .with_param("state", u8::from(active))
    }

    /// `trigger?name=<name>`.
    #[must_use]
    pub fn trigger(name: &str) -> Self {
        Self::new(names::TRIGGER).with_param("name", name)
    }

    /// `mode_start?name=<name>&priority=<priority>`.
    #[must_use]
    pub fn mode_start(name: &str, priority: i32) -> Self {
        Self::new(names::MODE_START)
            .with_param("name", name)
            .with_param("priority", priority)
    }

    /// `mode_stop?name=<name>`.
    #[must_use]
    pub fn mode_stop(name: &str) -> Self {
        Self::new(names::MODE_STOP).with_param("name", name)
    }

    /// `game_start`.
    #[must_use]
    pub fn game_start() -> Self {
        Self::new(names::GAME_START)
    }

    /// `player_added?number=<number>`.
    #[must_use]
    pub fn player_added(number: u32) -> Self {
        Self::new(names::PLAYER_ADDED).with_param("number", number)
    }

    /// `player_score?value=..&prev_value=..&change=..`.
    #[must_use]
    pub fn player_score(value: i64, prev_value: i64, change: i64) -> Self {
        Self::new(names::PLAYER_SCORE)
            .with_param("value", value)
            .with_param("prev_value", prev_value)
            .with_param("change", change)
    }

    /// `player_variable?name=..&value=..&prev_value=..&change=..`.
    #[must_use]
    pub fn player_variable(
        name: &str,
        value: impl fmt::Display,
        prev_value: impl fmt::Display,
        change: impl fmt::Display,
    ) -> Self {
        Self::new(names::PLAYER_VARIABLE)
            .with_param("name", name)
            .with_param("value", value)
            .with_param("prev_value", prev_value)
            .with_param("change", change)
    }

    /// `reset`.
    #[must_use]
    pub fn reset() -> Self {
        Self::new(names::RESET)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.to_wire())
    }
}
