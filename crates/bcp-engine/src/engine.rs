//! Registry of configured connections and the host-facing API.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use bcp_config::{BcpConfig, ConfigError, ConnectionConfig};
use bcp_wire::{Command, Params, ValueCase, names};
use thiserror::Error;
use tracing::{debug, info};

use crate::connection::{
    Connection, ConnectionContext, ConnectionStatus, Connector, ControlEvent, TcpConnector,
};
use crate::dispatch::{CommandHandler, Dispatcher, Outbox};
use crate::event_map::{EventMap, PlayerVariableFilter};
use crate::host::{Host, HostLink};

const ENGINE_TARGET: &str = "bcp_engine::engine";

/// Commands handled by the engine itself; handlers cannot claim them.
const RESERVED_COMMANDS: [&str; 6] = [
    names::HELLO,
    names::GOODBYE,
    names::ERROR,
    names::SWITCH,
    names::TRIGGER,
    names::DMD_FRAME,
];

/// Errors raised by the host-facing API.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// `start` was called twice.
    #[error("engine already started")]
    AlreadyStarted,
    /// The engine was shut down.
    #[error("engine has been shut down")]
    ShutDown,
    /// Two connections share a name.
    #[error("connection '{name}' is configured twice")]
    DuplicateConnection {
        /// Connection name.
        name: String,
    },
    /// A connection names no host.
    #[error("connection '{name}' has an empty host")]
    EmptyHost {
        /// Connection name.
        name: String,
    },
    /// A handler tried to claim a built-in command.
    #[error("command '{name}' is handled by the engine")]
    ReservedCommand {
        /// Command name.
        name: String,
    },
    /// A handler is already registered for the command.
    #[error("a handler is already registered for '{name}'")]
    DuplicateHandler {
        /// Command name.
        name: String,
    },
    /// The configuration did not validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

struct InboundSlot {
    name: String,
    commands: Receiver<Command>,
}

/// The protocol engine.
///
/// Owned by the host thread. Outbound sends are also available from other
/// threads through [`Engine::outbox`].
pub struct Engine {
    host: Arc<HostLink>,
    connector: Arc<dyn Connector>,
    value_case: ValueCase,
    outbox: Outbox,
    dispatcher: Dispatcher,
    inbound: Vec<InboundSlot>,
    control: Sender<ControlEvent>,
    control_events: Receiver<ControlEvent>,
    event_map: EventMap,
    player_variables: PlayerVariableFilter,
    started: bool,
    shut_down: bool,
}

impl Engine {
    /// Builds an engine with no connections.
    #[must_use]
    pub fn new(host: Arc<dyn Host>) -> Self {
        let link = Arc::new(HostLink::new(host));
        let outbox = Outbox::default();
        let (control, control_events) = mpsc::channel();
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&link), outbox.clone()),
            host: link,
            connector: Arc::new(TcpConnector),
            value_case: ValueCase::default(),
            outbox,
            inbound: Vec::new(),
            control,
            control_events,
            event_map: EventMap::default(),
            player_variables: PlayerVariableFilter::default(),
            started: false,
            shut_down: false,
        }
    }

    /// Builds and configures an engine from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when the configuration does not
    /// validate.
    pub fn from_config(config: &BcpConfig, host: Arc<dyn Host>) -> Result<Self, EngineError> {
        config.validate()?;
        let value_case = if config.lowercase_values() {
            ValueCase::Lowercase
        } else {
            ValueCase::Preserve
        };
        let mut engine = Self::new(host)
            .with_value_case(value_case)
            .with_event_map(EventMap::new(config.event_map().clone()))
            .with_player_variables(PlayerVariableFilter::from_names(config.player_variables()));
        engine.configure(
            config
                .connections()
                .iter()
                .map(|(name, connection)| (name.clone(), connection.clone())),
        )?;
        Ok(engine)
    }

    /// Replaces the connector used for new connections.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Chooses how inbound parameter values are cased.
    #[must_use]
    pub const fn with_value_case(mut self, value_case: ValueCase) -> Self {
        self.value_case = value_case;
        self
    }

    /// Installs the event map used by [`Engine::send_mapped`].
    #[must_use]
    pub fn with_event_map(mut self, event_map: EventMap) -> Self {
        self.event_map = event_map;
        self
    }

    /// Chooses which player variable changes are forwarded.
    #[must_use]
    pub fn with_player_variables(mut self, filter: PlayerVariableFilter) -> Self {
        self.player_variables = filter;
        self
    }

    /// Adds connections. No connect attempt is made until [`Engine::start`]
    /// or the first send.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateConnection`] when a name is already in
    /// use, [`EngineError::EmptyHost`] for a blank host, and
    /// [`EngineError::ShutDown`] after shutdown. Nothing is added on error.
    pub fn configure<I>(&mut self, connections: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = (String, ConnectionConfig)>,
    {
        if self.shut_down {
            return Err(EngineError::ShutDown);
        }
        let mut taken: HashSet<String> = self
            .inbound
            .iter()
            .map(|slot| slot.name.clone())
            .collect();
        let mut pending = Vec::new();
        for (name, config) in connections {
            if config.host().trim().is_empty() {
                return Err(EngineError::EmptyHost { name });
            }
            if !taken.insert(name.clone()) {
                return Err(EngineError::DuplicateConnection { name });
            }
            pending.push((name, config));
        }

        let context = ConnectionContext {
            connector: Arc::clone(&self.connector),
            host: Arc::clone(&self.host),
            value_case: self.value_case,
            control: self.control.clone(),
        };
        for (name, config) in pending {
            let (sender, commands) = mpsc::channel();
            debug!(
                target: ENGINE_TARGET,
                connection = %name,
                endpoint = %config.endpoint(),
                "configured connection"
            );
            self.outbox
                .insert(Connection::new(name.clone(), config, context.clone(), sender));
            self.inbound.push(InboundSlot { name, commands });
        }
        Ok(())
    }

    /// Makes the first connect attempt on every configured connection.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyStarted`] on a second call and
    /// [`EngineError::ShutDown`] after shutdown.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.shut_down {
            return Err(EngineError::ShutDown);
        }
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        self.started = true;
        for connection in self.outbox.snapshot() {
            let state = connection.connect();
            info!(
                target: ENGINE_TARGET,
                connection = %connection.name(),
                state = %state,
                "connection started"
            );
        }
        Ok(())
    }

    /// Sends `name` with `params` to every active peer.
    ///
    /// Returns how many connections accepted the message.
    pub fn send(&self, name: &str, params: Params) -> usize {
        self.send_command(&Command::with_params(name, params))
    }

    /// Sends a prepared command to every active peer.
    pub fn send_command(&self, command: &Command) -> usize {
        self.outbox.send(command)
    }

    /// Sends the command mapped to a host event, if any.
    ///
    /// Returns `false` when `event` is not in the event map.
    pub fn send_mapped(&self, event: &str, fields: &Params, player: &Params) -> bool {
        let Some(command) = self.event_map.render(event, fields, player) else {
            return false;
        };
        self.outbox.send(&command);
        true
    }

    /// Forwards a player variable change when the filter allows it.
    ///
    /// Returns `false` when the change was filtered out.
    pub fn player_variable_changed(
        &self,
        name: &str,
        value: &str,
        prev_value: &str,
        change: &str,
    ) -> bool {
        let Some(command) = self
            .player_variables
            .render(name, value, prev_value, change)
        else {
            return false;
        };
        self.outbox.send(&command);
        true
    }

    /// Dispatches every queued inbound command, then applies departures.
    ///
    /// Call once per host tick. Returns the number of commands dispatched.
    pub fn poll(&mut self) -> usize {
        let mut dispatched = 0;
        for slot in &self.inbound {
            while let Ok(command) = slot.commands.try_recv() {
                self.dispatcher.dispatch(&slot.name, command);
                dispatched += 1;
            }
        }
        while let Ok(event) = self.control_events.try_recv() {
            match event {
                ControlEvent::Departed { name } => dispatched += self.remove_connection(&name),
            }
        }
        dispatched
    }

    /// Stops every connection, saying goodbye to each live peer. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!(
            target: ENGINE_TARGET,
            connections = self.outbox.len(),
            "shutting down"
        );
        for connection in self.outbox.snapshot() {
            connection.close();
        }
    }

    /// Registers a handler for an extension command.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ReservedCommand`] for built-in commands and
    /// [`EngineError::DuplicateHandler`] when the name is taken.
    pub fn register_handler(
        &mut self,
        name: &str,
        handler: impl CommandHandler + 'static,
    ) -> Result<(), EngineError> {
        let command = name.trim().to_lowercase();
        if RESERVED_COMMANDS.contains(&command.as_str()) {
            return Err(EngineError::ReservedCommand { name: command });
        }
        if self.dispatcher.is_registered(&command) {
            return Err(EngineError::DuplicateHandler { name: command });
        }
        debug!(
            target: ENGINE_TARGET,
            command = %command,
            "registered command handler"
        );
        self.dispatcher.register(command, Box::new(handler));
        Ok(())
    }

    /// Status of every active connection, in configuration order.
    #[must_use]
    pub fn connection_status(&self) -> Vec<ConnectionStatus> {
        self.outbox
            .snapshot()
            .iter()
            .map(|connection| connection.status())
            .collect()
    }

    /// Fan-out handle usable from other threads.
    #[must_use]
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Whether a required connection has asked the host to shut down.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.host.shutdown_requested()
    }

    /// Drops a departed connection after dispatching what it left queued.
    fn remove_connection(&mut self, name: &str) -> usize {
        let mut dispatched = 0;
        if let Some(index) = self.inbound.iter().position(|slot| slot.name == name) {
            let slot = self.inbound.remove(index);
            while let Ok(command) = slot.commands.try_recv() {
                self.dispatcher.dispatch(&slot.name, command);
                dispatched += 1;
            }
        }
        if self.outbox.remove(name).is_some() {
            info!(
                target: ENGINE_TARGET,
                connection = name,
                "connection removed after goodbye"
            );
        }
        dispatched
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
