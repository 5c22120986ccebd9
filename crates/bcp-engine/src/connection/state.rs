//! Connection lifecycle states and status snapshots.

use std::fmt;

use bcp_config::AttemptLimit;

/// Where a connection is in its lifecycle.
///
/// `Disconnected → Connecting → Connected | GivingUp`. `Connected` falls back
/// to `Disconnected` when the session ends. `GivingUp` and `Closed` are
/// terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session and no attempt made since the last one ended.
    #[default]
    Disconnected,
    /// The last connect attempt failed; more are allowed.
    Connecting,
    /// A session is live.
    Connected,
    /// The attempt budget is used up.
    GivingUp,
    /// The engine shut the connection down.
    Closed,
}

impl ConnectionState {
    /// Whether the state accepts no further connect attempts.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::GivingUp | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::GivingUp => "giving_up",
            Self::Closed => "closed",
        };
        formatter.write_str(label)
    }
}

/// Point-in-time view of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Connection name.
    pub name: String,
    /// `host:port` of the peer.
    pub endpoint: String,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Connect attempts since the last successful connect.
    pub attempts_made: u32,
    /// Configured attempt limit.
    pub attempt_limit: AttemptLimit,
    /// Whether a socket is currently held.
    pub socket_present: bool,
    /// Whether stopping will send `goodbye` first.
    pub owes_goodbye: bool,
    /// Messages waiting in the outbound queue.
    pub queued_messages: usize,
}
