//! One peer connection: lifecycle, session threads, and the commands handled
//! on the receive thread.
//!
//! All lifecycle state sits behind a single mutex. Connect attempts happen
//! while holding it, so concurrent senders never race two sessions into
//! existence. Pipeline threads never hold it while blocking: the send thread
//! only touches the outbound queue, and the receive thread takes the lock
//! briefly when its session ends or a `goodbye` arrives.

mod connector;
mod pipeline;
mod queue;
mod state;

use std::fmt;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bcp_config::ConnectionConfig;
use bcp_wire::{Command, InboundLine, PROTOCOL_VERSION, ValueCase, codec, names};
use tracing::{debug, error, info, trace, warn};

use self::queue::{OutboundQueue, SessionPhase, SessionSignal};
use crate::host::HostLink;

pub use self::connector::{ConnectError, Connector, TcpConnector};
pub(crate) use self::queue::PENDING_LIMIT;
pub use self::state::{ConnectionState, ConnectionStatus};

pub(crate) const CONNECTION_TARGET: &str = "bcp_engine::connection";

/// Longest a stopping session spends delivering queued messages and its
/// goodbye before the socket is shut down regardless.
pub(crate) const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Notifications a connection sends to the engine's host thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ControlEvent {
    /// The peer said goodbye; the connection should leave the active set.
    Departed { name: String },
}

/// Engine-side wiring shared by every connection.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) host: Arc<HostLink>,
    pub(crate) value_case: ValueCase,
    pub(crate) control: Sender<ControlEvent>,
}

#[derive(Debug, Default)]
struct Lifecycle {
    state: ConnectionState,
    attempts_made: u32,
    owes_goodbye: bool,
    departed: bool,
    last_failure: Option<Instant>,
    session: Option<Session>,
}

#[derive(Debug)]
struct Session {
    id: u64,
    stream: TcpStream,
    signal: Arc<SessionSignal>,
    sender: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
}

/// A persistent link to one peer.
pub(crate) struct Connection {
    name: String,
    config: ConnectionConfig,
    context: ConnectionContext,
    inbound: Sender<Command>,
    queue: Arc<OutboundQueue>,
    lifecycle: Mutex<Lifecycle>,
    next_session_id: AtomicU64,
}

impl fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Connection")
            .field("name", &self.name)
            .field("endpoint", &self.config.endpoint())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        name: impl Into<String>,
        config: ConnectionConfig,
        context: ConnectionContext,
        inbound: Sender<Command>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            context,
            inbound,
            queue: Arc::new(OutboundQueue::new()),
            lifecycle: Mutex::new(Lifecycle::default()),
            next_session_id: AtomicU64::new(0),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        let lifecycle = self.lock();
        ConnectionStatus {
            name: self.name.clone(),
            endpoint: self.config.endpoint(),
            state: lifecycle.state,
            attempts_made: lifecycle.attempts_made,
            attempt_limit: self.config.connection_attempts(),
            socket_present: lifecycle.session.is_some(),
            owes_goodbye: lifecycle.owes_goodbye,
            queued_messages: self.queue.len(),
        }
    }

    /// Makes a connect attempt if one is due and returns the resulting state.
    pub(crate) fn connect(self: &Arc<Self>) -> ConnectionState {
        let (state, fatal) = {
            let mut lifecycle = self.lock();
            let fatal = self.attempt(&mut lifecycle);
            (lifecycle.state, fatal)
        };
        if fatal {
            self.escalate("required connection could not be established");
        }
        state
    }

    /// Queues an encoded message, connecting first when no session exists.
    ///
    /// Returns `false` when the message was dropped because the connection
    /// gave up, was closed, its peer departed, or [`PENDING_LIMIT`] messages
    /// are already waiting.
    pub(crate) fn send(self: &Arc<Self>, message: &str) -> bool {
        let (available, fatal) = {
            let mut lifecycle = self.lock();
            let fatal = self.attempt(&mut lifecycle);
            (!lifecycle.departed && !lifecycle.state.is_terminal(), fatal)
        };
        if fatal {
            self.escalate("required connection could not be established");
        }
        if !available {
            debug!(
                target: CONNECTION_TARGET,
                connection = %self.name,
                wire = message,
                "connection unavailable; message dropped"
            );
            return false;
        }
        let queued = self.queue.offer(message.to_owned());
        if !queued {
            warn!(
                target: CONNECTION_TARGET,
                connection = %self.name,
                limit = PENDING_LIMIT,
                wire = message,
                "outbound queue full; message dropped"
            );
        }
        queued
    }

    /// Ends the current session, saying goodbye first when one is owed.
    ///
    /// Queued messages ahead of the goodbye are delivered before the socket
    /// is shut down, for at most [`DRAIN_TIMEOUT`]. The lifecycle lock is
    /// released before either pipeline is joined. Callers mark the
    /// connection closed or departed first, so no new session can start
    /// while the old one drains.
    fn stop(&self) {
        let (session, say_goodbye) = {
            let mut lifecycle = self.lock();
            let Some(session) = lifecycle.session.take() else {
                return;
            };
            let say_goodbye = std::mem::take(&mut lifecycle.owes_goodbye);
            if lifecycle.state == ConnectionState::Connected {
                lifecycle.state = ConnectionState::Disconnected;
            }
            info!(
                target: CONNECTION_TARGET,
                connection = %self.name,
                goodbye = say_goodbye,
                "stopping session"
            );
            (session, say_goodbye)
        };
        if let Some(receiver) = self.end_session(session, say_goodbye) {
            if receiver.thread().id() != thread::current().id() {
                self.join_pipeline(receiver, "receive");
            }
        }
    }

    /// Stops the connection for good. No further attempts are made and
    /// queued messages are dropped.
    pub(crate) fn close(&self) {
        self.lock().state = ConnectionState::Closed;
        self.stop();
        let dropped = self.queue.clear();
        info!(
            target: CONNECTION_TARGET,
            connection = %self.name,
            dropped,
            "connection closed"
        );
    }

    /// Runs one connect attempt when the lifecycle allows it.
    ///
    /// Returns `true` when a required connection failed.
    fn attempt(self: &Arc<Self>, lifecycle: &mut Lifecycle) -> bool {
        if lifecycle.session.is_some() || lifecycle.departed || lifecycle.state.is_terminal() {
            return false;
        }
        let limit = self.config.connection_attempts();
        if limit.is_exhausted(lifecycle.attempts_made) {
            self.give_up(lifecycle);
            return false;
        }
        let retry_delay = self.config.retry_delay();
        if lifecycle
            .last_failure
            .is_some_and(|failed_at| failed_at.elapsed() < retry_delay)
        {
            trace!(
                target: CONNECTION_TARGET,
                connection = %self.name,
                "inside retry delay; skipping connect attempt"
            );
            return false;
        }

        lifecycle.attempts_made = lifecycle.attempts_made.saturating_add(1);
        lifecycle.state = ConnectionState::Connecting;
        debug!(
            target: CONNECTION_TARGET,
            connection = %self.name,
            endpoint = %self.config.endpoint(),
            attempt = lifecycle.attempts_made,
            limit = %limit,
            "attempting connection"
        );

        let opened = self
            .context
            .connector
            .connect(&self.config)
            .and_then(|stream| self.open_session(stream));
        match opened {
            Ok(session) => {
                info!(
                    target: CONNECTION_TARGET,
                    connection = %self.name,
                    endpoint = %self.config.endpoint(),
                    "connected"
                );
                lifecycle.attempts_made = 0;
                lifecycle.state = ConnectionState::Connected;
                lifecycle.owes_goodbye = true;
                lifecycle.last_failure = None;
                lifecycle.session = Some(session);
                false
            }
            Err(failure) => {
                info!(
                    target: CONNECTION_TARGET,
                    connection = %self.name,
                    attempt = lifecycle.attempts_made,
                    error = %failure,
                    "connection attempt failed"
                );
                lifecycle.last_failure = Some(Instant::now());
                if limit.is_exhausted(lifecycle.attempts_made) {
                    self.give_up(lifecycle);
                }
                self.config.require_connection()
            }
        }
    }

    fn give_up(&self, lifecycle: &mut Lifecycle) {
        lifecycle.state = ConnectionState::GivingUp;
        let dropped = self.queue.clear();
        info!(
            target: CONNECTION_TARGET,
            connection = %self.name,
            attempts = lifecycle.attempts_made,
            dropped,
            "attempt limit reached; giving up"
        );
    }

    fn escalate(&self, reason: &str) {
        error!(
            target: CONNECTION_TARGET,
            connection = %self.name,
            reason,
            "required connection failed; requesting shutdown"
        );
        self.context.host.request_shutdown();
    }

    /// Starts both pipelines on a freshly connected stream.
    ///
    /// `hello` is queued ahead of anything already waiting so it is the first
    /// line the peer sees.
    fn open_session(self: &Arc<Self>, stream: TcpStream) -> Result<Session, ConnectError> {
        let endpoint = self.config.endpoint();
        let stream_error = |source| ConnectError::Stream {
            endpoint: endpoint.clone(),
            source: Arc::new(source),
        };
        let reader = stream.try_clone().map_err(stream_error)?;
        let writer = stream.try_clone().map_err(stream_error)?;
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let signal = Arc::new(SessionSignal::new());

        let receiver = {
            let connection = Arc::clone(self);
            let receive_signal = Arc::clone(&signal);
            thread::Builder::new()
                .name(format!("bcp-recv-{}", self.name))
                .spawn(move || pipeline::receive_loop(&connection, id, &receive_signal, reader))
                .map_err(|source| ConnectError::Spawn {
                    endpoint: endpoint.clone(),
                    pipeline: "receive",
                    source: Arc::new(source),
                })?
        };

        self.queue
            .push_front(Command::hello(PROTOCOL_VERSION).to_wire());
        let spawned = {
            let name = self.name.clone();
            let queue = Arc::clone(&self.queue);
            let send_signal = Arc::clone(&signal);
            thread::Builder::new()
                .name(format!("bcp-send-{}", self.name))
                .spawn(move || pipeline::send_loop(&name, &queue, &send_signal, writer))
        };
        let sender = match spawned {
            Ok(sender) => sender,
            Err(source) => {
                self.queue.pop_front();
                self.queue.signal(&signal, SessionPhase::Closed);
                if let Err(shutdown_error) = stream.shutdown(Shutdown::Both) {
                    debug!(
                        target: CONNECTION_TARGET,
                        connection = %self.name,
                        error = %shutdown_error,
                        "socket shutdown failed"
                    );
                }
                return Err(ConnectError::Spawn {
                    endpoint,
                    pipeline: "send",
                    source: Arc::new(source),
                });
            }
        };

        Ok(Session {
            id,
            stream,
            signal,
            sender: Some(sender),
            receiver: Some(receiver),
        })
    }

    /// Shuts a detached session down and hands back its receive thread.
    fn end_session(&self, mut session: Session, say_goodbye: bool) -> Option<JoinHandle<()>> {
        if say_goodbye {
            self.queue.push_back(Command::goodbye().to_wire());
            self.queue.signal(&session.signal, SessionPhase::Draining);
            if session
                .sender
                .as_ref()
                .is_some_and(|sender| !wait_for_exit(sender, DRAIN_TIMEOUT))
            {
                warn!(
                    target: CONNECTION_TARGET,
                    connection = %self.name,
                    pending = self.queue.len(),
                    "peer is not reading; abandoning drain"
                );
            }
        }
        self.queue.signal(&session.signal, SessionPhase::Closed);
        if let Err(shutdown_error) = session.stream.shutdown(Shutdown::Both) {
            debug!(
                target: CONNECTION_TARGET,
                connection = %self.name,
                error = %shutdown_error,
                "socket shutdown failed"
            );
        }
        if let Some(sender) = session.sender.take() {
            self.join_pipeline(sender, "send");
        }
        session.receiver.take()
    }

    fn join_pipeline(&self, handle: JoinHandle<()>, pipeline: &'static str) {
        if handle.join().is_err() {
            warn!(
                target: CONNECTION_TARGET,
                connection = %self.name,
                pipeline,
                "pipeline thread panicked"
            );
        }
    }

    /// Called by the receive thread when its session ends on its own.
    fn session_ended(&self, session_id: u64) {
        let mut lifecycle = self.lock();
        let Some(session) = lifecycle
            .session
            .take_if(|live| live.id == session_id)
        else {
            return;
        };
        lifecycle.owes_goodbye = false;
        if lifecycle.state == ConnectionState::Connected {
            lifecycle.state = ConnectionState::Disconnected;
        }
        info!(
            target: CONNECTION_TARGET,
            connection = %self.name,
            "session ended"
        );
        drop(self.end_session(session, false));
    }

    /// Routes one complete inbound line.
    fn handle_line(&self, line: Vec<u8>) {
        match InboundLine::classify(line) {
            InboundLine::DisplayFrame(payload) => {
                trace!(
                    target: CONNECTION_TARGET,
                    connection = %self.name,
                    bytes = payload.len(),
                    "display frame"
                );
                self.context.host.host().apply_frame(&payload);
            }
            InboundLine::Message(message) => {
                debug!(
                    target: CONNECTION_TARGET,
                    connection = %self.name,
                    wire = %message,
                    "received"
                );
                let command = codec::decode(&message, self.context.value_case);
                if command.name() == names::HELLO {
                    info!(
                        target: CONNECTION_TARGET,
                        connection = %self.name,
                        params = ?command.params(),
                        "peer said hello"
                    );
                } else if command.name() == names::GOODBYE {
                    self.receive_goodbye();
                } else if self.inbound.send(command).is_err() {
                    debug!(
                        target: CONNECTION_TARGET,
                        connection = %self.name,
                        "inbound queue closed; command discarded"
                    );
                }
            }
        }
    }

    fn receive_goodbye(&self) {
        info!(
            target: CONNECTION_TARGET,
            connection = %self.name,
            "peer said goodbye"
        );
        {
            let mut lifecycle = self.lock();
            lifecycle.owes_goodbye = false;
            lifecycle.departed = true;
        }
        self.stop();
        self.queue.clear();
        let departed = ControlEvent::Departed {
            name: self.name.clone(),
        };
        if self.context.control.send(departed).is_err() {
            debug!(
                target: CONNECTION_TARGET,
                connection = %self.name,
                "engine gone; departure not reported"
            );
        }
        if self.config.require_connection() {
            self.escalate("required peer said goodbye");
        }
    }
}

/// Waits up to `timeout` for a pipeline thread to finish.
fn wait_for_exit(handle: &JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if handle.is_finished() {
            return true;
        }
        thread::sleep(DRAIN_POLL_INTERVAL);
    }
    handle.is_finished()
}
