//! Test doubles shared by the engine behaviour suites.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use bcp_config::ConnectionConfig;
use mockall::mock;

use crate::{
    ConnectError, ConnectionStatus, Connector, Engine, Host, HostEvent, Outbox, TcpConnector,
};

const PEER_TIMEOUT: Duration = Duration::from_secs(3);

mock! {
    pub EngineHost {}
    impl Host for EngineHost {
        fn post(&self, event: HostEvent);
        fn set_switch(&self, name: &str, active: bool, logical: bool);
        fn apply_frame(&self, payload: &[u8]);
        fn request_shutdown(&self);
    }
}

/// Records everything the engine reports.
#[derive(Debug, Default)]
pub(super) struct RecordingHost {
    events: Mutex<Vec<HostEvent>>,
    switches: Mutex<Vec<(String, bool, bool)>>,
    frames: Mutex<Vec<Vec<u8>>>,
    shutdown_requests: AtomicUsize,
}

impl RecordingHost {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(super) fn event_count(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or_default()
    }

    pub(super) fn take_events(&self) -> Vec<HostEvent> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }

    pub(super) fn switches(&self) -> Vec<(String, bool, bool)> {
        self.switches
            .lock()
            .map(|switches| switches.clone())
            .unwrap_or_default()
    }

    pub(super) fn frames(&self) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .map(|frames| frames.clone())
            .unwrap_or_default()
    }

    pub(super) fn shutdown_requests(&self) -> usize {
        self.shutdown_requests.load(Ordering::SeqCst)
    }
}

impl Host for RecordingHost {
    fn post(&self, event: HostEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn set_switch(&self, name: &str, active: bool, logical: bool) {
        if let Ok(mut switches) = self.switches.lock() {
            switches.push((name.to_owned(), active, logical));
        }
    }

    fn apply_frame(&self, payload: &[u8]) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(payload.to_vec());
        }
    }

    fn request_shutdown(&self) {
        self.shutdown_requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector that fails a set number of attempts before delegating to TCP.
#[derive(Debug)]
pub(super) struct CountingConnector {
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl CountingConnector {
    pub(super) fn failing() -> Arc<Self> {
        Self::failing_first(u32::MAX)
    }

    pub(super) fn failing_first(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        })
    }

    pub(super) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for CountingConnector {
    fn connect(&self, config: &ConnectionConfig) -> Result<TcpStream, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConnectError::Connect {
                endpoint: config.endpoint(),
                source: Arc::new(io::Error::from(io::ErrorKind::ConnectionRefused)),
            });
        }
        TcpConnector.connect(config)
    }
}

/// Refused connector that, during each attempt, tries to change the
/// engine's connection set from another thread and records whether it could.
#[derive(Debug, Default)]
pub(super) struct ConcurrentWriterConnector {
    outbox: OnceLock<Outbox>,
    writes: Mutex<Vec<bool>>,
}

impl ConcurrentWriterConnector {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(super) fn watch(&self, outbox: Outbox) {
        drop(self.outbox.set(outbox));
    }

    /// One entry per attempt: whether the concurrent write completed.
    pub(super) fn writes(&self) -> Vec<bool> {
        self.writes
            .lock()
            .map(|writes| writes.clone())
            .unwrap_or_default()
    }
}

impl Connector for ConcurrentWriterConnector {
    fn connect(&self, config: &ConnectionConfig) -> Result<TcpStream, ConnectError> {
        if let Some(outbox) = self.outbox.get() {
            let writer = outbox.clone();
            let (done, finished) = mpsc::channel();
            thread::spawn(move || {
                drop(writer.remove("absent"));
                drop(done.send(()));
            });
            let completed = finished.recv_timeout(Duration::from_secs(1)).is_ok();
            if let Ok(mut writes) = self.writes.lock() {
                writes.push(completed);
            }
        }
        Err(ConnectError::Connect {
            endpoint: config.endpoint(),
            source: Arc::new(io::Error::from(io::ErrorKind::ConnectionRefused)),
        })
    }
}

/// Loopback peer that accepts engine connections.
pub(super) struct FakePeer {
    listener: TcpListener,
    port: u16,
}

impl FakePeer {
    pub(super) fn bind() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind fake peer")?;
        listener
            .set_nonblocking(true)
            .context("fake peer nonblocking")?;
        let port = listener.local_addr().context("local addr")?.port();
        Ok(Self { listener, port })
    }

    pub(super) fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1")
            .with_port(self.port)
            .with_connect_timeout(Duration::from_secs(1))
    }

    /// Waits for the engine to connect.
    pub(super) fn accept(&self) -> Result<PeerSession> {
        let deadline = Instant::now() + PEER_TIMEOUT;
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => return PeerSession::new(stream),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        bail!("no connection arrived");
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(error) => return Err(error).context("accept connection"),
            }
        }
    }
}

/// The peer side of one accepted session.
pub(super) struct PeerSession {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl PeerSession {
    fn new(stream: TcpStream) -> Result<Self> {
        stream
            .set_nonblocking(false)
            .context("peer stream blocking")?;
        stream
            .set_read_timeout(Some(PEER_TIMEOUT))
            .context("peer read timeout")?;
        let reader = BufReader::new(stream.try_clone().context("clone peer stream")?);
        Ok(Self {
            reader,
            writer: stream,
        })
    }

    /// Reads one line sent by the engine, without its line-feed.
    pub(super) fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).context("read line")?;
        if read == 0 {
            bail!("engine closed the stream");
        }
        Ok(line.trim_end_matches('\n').to_owned())
    }

    /// Reads the greeting every session starts with.
    pub(super) fn expect_hello(&mut self) -> Result<()> {
        let line = self.read_line()?;
        if line != "hello?version=1.0" {
            return Err(anyhow!("expected hello, got {line:?}"));
        }
        Ok(())
    }

    /// Succeeds once the engine has closed the stream.
    pub(super) fn expect_closed(&mut self) -> Result<()> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Ok(()),
            Ok(_) => Err(anyhow!("expected end of stream, got {line:?}")),
            Err(error) if error.kind() == io::ErrorKind::ConnectionReset => Ok(()),
            Err(error) => Err(error).context("read until close"),
        }
    }

    pub(super) fn send_line(&mut self, line: &str) -> Result<()> {
        self.send_raw(format!("{line}\n").as_bytes())
    }

    pub(super) fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).context("write to engine")?;
        self.writer.flush().context("flush to engine")
    }
}

/// Polls `condition` until it holds or a few seconds pass.
pub(super) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + PEER_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Status of the engine's only connection.
pub(super) fn sole_status(engine: &Engine) -> Result<ConnectionStatus> {
    let mut statuses = engine.connection_status();
    if statuses.len() != 1 {
        bail!("expected one connection, found {}", statuses.len());
    }
    statuses.pop().context("connection status")
}

/// Adds `peer` as the engine's `media` connection, starts the engine, and
/// reads the greeting.
pub(super) fn start_with_peer(
    engine: &mut Engine,
    peer: &FakePeer,
    config: ConnectionConfig,
) -> Result<PeerSession> {
    engine
        .configure([(String::from("media"), config)])
        .context("configure peer connection")?;
    engine.start().context("start engine")?;
    let mut session = peer.accept()?;
    session.expect_hello()?;
    Ok(session)
}
