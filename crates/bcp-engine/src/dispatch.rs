//! Host-tick dispatch of queued inbound commands.
//!
//! Commands arrive here after the receive thread has decoded them and after
//! `hello` and `goodbye` have been handled inline. Built-in commands map onto
//! [`InboundCommand`] variants; anything else goes to a handler registered
//! by name, or is answered with an `error` command.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bcp_wire::{Command, Params, names};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::host::{Completion, Host, HostEvent, HostLink};

const DISPATCH_TARGET: &str = "bcp_engine::dispatch";

/// Prefix of the host event posted for an inbound `trigger`.
pub const TRIGGER_EVENT_PREFIX: &str = "trigger_";

/// Fan-out handle over every active connection.
///
/// Cheap to clone; clones share the same connection set, so a completion
/// held by the host keeps reaching whichever peers are active when it runs.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    connections: Arc<RwLock<Vec<Arc<Connection>>>>,
}

impl Outbox {
    /// Encodes `command` once and queues it on every active connection.
    ///
    /// Returns how many connections accepted it. The connection set is
    /// copied first, so a send that blocks on a connect attempt or escalates
    /// to the host never holds the set's lock.
    pub fn send(&self, command: &Command) -> usize {
        let wire = command.to_wire();
        self.snapshot()
            .iter()
            .filter(|connection| connection.send(&wire))
            .count()
    }

    /// Number of active connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no connection is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn insert(&self, connection: Arc<Connection>) {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(connection);
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<Connection>> {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let index = connections
            .iter()
            .position(|connection| connection.name() == name)?;
        Some(connections.remove(index))
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Inbound commands with built-in meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    /// Session greeting.
    Hello {
        /// Protocol version the peer announced.
        version: Option<String>,
    },
    /// Orderly session end.
    Goodbye,
    /// The peer rejected something we sent.
    Error {
        /// Whatever the peer reported.
        params: Params,
    },
    /// Switch state change requested by the peer.
    Switch {
        /// Switch name.
        name: String,
        /// Requested state.
        active: bool,
    },
    /// Named event, optionally asking for a callback trigger.
    Trigger {
        /// Event name without the `trigger_` prefix.
        name: String,
        /// Trigger to send back once the host has handled the event.
        callback: Option<String>,
        /// Remaining parameters, forwarded as event fields.
        params: Params,
    },
    /// A command without built-in meaning.
    Other(Command),
}

/// Reasons an inbound command cannot be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The message had no command name.
    #[error("inbound command has no name")]
    MissingName,
    /// A built-in command carried unusable parameters.
    #[error("invalid parameters for '{command}'")]
    InvalidParameters {
        /// Command name.
        command: String,
    },
    /// A trigger arrived without a name.
    #[error("trigger has no name")]
    UnnamedTrigger,
}

impl TryFrom<Command> for InboundCommand {
    type Error = DispatchError;

    fn try_from(command: Command) -> Result<Self, <Self as TryFrom<Command>>::Error> {
        let (command_name, mut params) = command.into_parts();
        match command_name.as_str() {
            "" => Err(DispatchError::MissingName),
            names::HELLO => Ok(Self::Hello {
                version: params.remove("version"),
            }),
            names::GOODBYE => Ok(Self::Goodbye),
            names::ERROR => Ok(Self::Error { params }),
            names::SWITCH => {
                let switch = params.remove("name").filter(|switch| !switch.is_empty());
                let state = params.get("state").and_then(|raw| parse_switch_state(raw));
                match (switch, state) {
                    (Some(name), Some(active)) => Ok(Self::Switch { name, active }),
                    _ => Err(DispatchError::InvalidParameters {
                        command: command_name,
                    }),
                }
            }
            names::TRIGGER => {
                let trigger = params
                    .remove("name")
                    .ok_or(DispatchError::UnnamedTrigger)?;
                let callback = params.remove("callback");
                Ok(Self::Trigger {
                    name: trigger,
                    callback,
                    params,
                })
            }
            _ => Ok(Self::Other(Command::with_params(command_name, params))),
        }
    }
}

/// Accepts integers (non-zero is active) and `true`/`false`.
fn parse_switch_state(raw: &str) -> Option<bool> {
    let trimmed = raw.trim();
    if let Ok(number) = trimmed.parse::<i64>() {
        return Some(number != 0);
    }
    if trimmed.eq_ignore_ascii_case("true") {
        Some(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Handles an extension command registered with
/// [`crate::Engine::register_handler`].
///
/// Runs on the thread calling [`crate::Engine::poll`].
pub trait CommandHandler: Send {
    /// Handles one inbound command. `outbox` reaches every active peer.
    fn handle(&mut self, command: Command, outbox: &Outbox, host: &dyn Host);
}

impl<F> CommandHandler for F
where
    F: FnMut(Command, &Outbox, &dyn Host) + Send,
{
    fn handle(&mut self, command: Command, outbox: &Outbox, host: &dyn Host) {
        self(command, outbox, host);
    }
}

/// Routes queued inbound commands on the host thread.
pub(crate) struct Dispatcher {
    host: Arc<HostLink>,
    outbox: Outbox,
    handlers: HashMap<String, Box<dyn CommandHandler>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        handlers.sort_unstable();
        formatter
            .debug_struct("Dispatcher")
            .field("handlers", &handlers)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub(crate) fn new(host: Arc<HostLink>, outbox: Outbox) -> Self {
        Self {
            host,
            outbox,
            handlers: HashMap::new(),
        }
    }

    pub(crate) fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub(crate) fn register(&mut self, name: String, handler: Box<dyn CommandHandler>) {
        self.handlers.insert(name, handler);
    }

    /// Dispatches one inbound command from `connection`.
    pub(crate) fn dispatch(&mut self, connection: &str, command: Command) {
        let command_name = command.name().to_owned();
        match InboundCommand::try_from(command) {
            Ok(InboundCommand::Hello { version }) => info!(
                target: DISPATCH_TARGET,
                connection,
                version = ?version,
                "peer said hello"
            ),
            Ok(InboundCommand::Goodbye) => debug!(
                target: DISPATCH_TARGET,
                connection,
                "goodbye reached the host tick; already handled by the connection"
            ),
            Ok(InboundCommand::Error { params }) => warn!(
                target: DISPATCH_TARGET,
                connection,
                params = ?params,
                "peer reported an error"
            ),
            Ok(InboundCommand::Switch { name, active }) => {
                debug!(
                    target: DISPATCH_TARGET,
                    connection,
                    switch = %name,
                    active,
                    "switch change"
                );
                self.host.host().set_switch(&name, active, true);
            }
            Ok(InboundCommand::Trigger {
                name,
                callback,
                params,
            }) => self.post_trigger(&name, callback, params),
            Ok(InboundCommand::Other(command)) => self.dispatch_extension(connection, command),
            Err(DispatchError::UnnamedTrigger) => debug!(
                target: DISPATCH_TARGET,
                connection,
                "ignoring trigger without a name"
            ),
            Err(error @ DispatchError::InvalidParameters { .. }) => {
                warn!(
                    target: DISPATCH_TARGET,
                    connection,
                    error = %error,
                    "rejecting inbound command"
                );
                self.outbox
                    .send(&Command::error("invalid parameters", &command_name));
            }
            Err(error @ DispatchError::MissingName) => {
                warn!(
                    target: DISPATCH_TARGET,
                    connection,
                    error = %error,
                    "rejecting inbound command"
                );
                self.outbox
                    .send(&Command::error("invalid command", &command_name));
            }
        }
    }

    fn dispatch_extension(&mut self, connection: &str, command: Command) {
        if let Some(handler) = self.handlers.get_mut(command.name()) {
            handler.handle(command, &self.outbox, self.host.host());
            return;
        }
        warn!(
            target: DISPATCH_TARGET,
            connection,
            command = %command.name(),
            "received invalid command"
        );
        self.outbox
            .send(&Command::error("invalid command", command.name()));
    }

    fn post_trigger(&self, name: &str, callback: Option<String>, params: Params) {
        let mut event = HostEvent::new(format!("{TRIGGER_EVENT_PREFIX}{name}"), params.clone());
        if let Some(reply_name) = callback {
            let outbox = self.outbox.clone();
            event = event.with_completion(Completion::new(move || {
                let reply =
                    Command::with_params(names::TRIGGER, params).with_param("name", reply_name);
                outbox.send(&reply);
            }));
        }
        debug!(
            target: DISPATCH_TARGET,
            event = %event.name(),
            callback = event.has_completion(),
            "posting trigger event"
        );
        self.host.host().post(event);
    }
}
