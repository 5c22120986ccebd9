//! Protocol engine for the backbox control protocol (BCP).
//!
//! An [`Engine`] owns one connection per configured peer. Each
//! connection keeps a persistent TCP session alive within its attempt
//! budget and runs two threads per session: a send pipeline draining the
//! outbound queue and a receive pipeline framing and decoding inbound
//! lines. Connection-control commands (`hello`, `goodbye`) and display
//! frames are handled on the receive thread; everything else is queued and
//! dispatched when the host calls [`Engine::poll`] from its own loop.
//!
//! The engine talks back to its host only through the [`Host`] trait.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bcp_config::ConnectionConfig;
//! use bcp_engine::{Engine, Host, HostEvent};
//!
//! struct Machine;
//!
//! impl Host for Machine {
//!     fn post(&self, event: HostEvent) {
//!         event.complete();
//!     }
//!     fn set_switch(&self, _name: &str, _active: bool, _logical: bool) {}
//!     fn apply_frame(&self, _payload: &[u8]) {}
//!     fn request_shutdown(&self) {}
//! }
//!
//! # fn main() -> Result<(), bcp_engine::EngineError> {
//! let mut engine = Engine::new(Arc::new(Machine));
//! engine.configure([(String::from("media"), ConnectionConfig::new("localhost"))])?;
//! engine.start()?;
//! engine.send_command(&bcp_wire::Command::trigger("ball_start"));
//! engine.poll();
//! engine.shutdown();
//! # Ok(())
//! # }
//! ```

mod connection;
mod dispatch;
mod engine;
mod event_map;
mod host;

#[cfg(test)]
mod tests;

pub use self::connection::{
    ConnectError, ConnectionState, ConnectionStatus, Connector, TcpConnector,
};
pub use self::dispatch::{CommandHandler, DispatchError, InboundCommand, Outbox};
pub use self::engine::{Engine, EngineError};
pub use self::event_map::{EventMap, PlayerVariableFilter};
pub use self::host::{Completion, Host, HostEvent};
pub use bcp_wire::{Command, Params};
