//! Runtime for the `bcp-probe` binary.
//!
//! The probe loads configuration, starts a [`bcp_engine::Engine`] with a host
//! that echoes everything peers send, ticks the engine until a deadline or a
//! termination signal, and shuts down cleanly. It exists to exercise live
//! peers by hand and to smoke-test the engine end to end.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

use bcp_config::{AttemptLimit, BcpConfig, ConnectionConfig};
use bcp_engine::{Command, Engine};
use bcp_wire::{ValueCase, decode};
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::info;

mod cli;
mod errors;
mod host;
pub mod telemetry;


use cli::Cli;
use errors::AppError;
use host::EchoHost;

const PROBE_TARGET: &str = "bcp_probe";

/// Runs the probe with the given arguments and output streams.
///
/// Echo lines and each connection's status at the end of the run go to
/// `stdout`; errors go to `stderr`. Logs are written to the process stderr by
/// the subscriber.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let result = Cli::try_parse_from(args)
        .map_err(AppError::CliUsage)
        .and_then(|cli| probe(&cli, stdout));
    match result {
        Ok(exit_code) => exit_code,
        Err(AppError::CliUsage(error)) if !error.use_stderr() => {
            let _ = write!(stdout, "{error}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            let _ = writeln!(stderr, "{error}");
            ExitCode::FAILURE
        }
    }
}

fn probe<W: Write>(cli: &Cli, stdout: &mut W) -> Result<ExitCode, AppError> {
    let config = load_config(cli)?;
    let messages = parse_messages(&cli.messages)?;
    telemetry::initialise(&config)?;

    let (echo_host, echoed) = EchoHost::new();
    let mut engine = Engine::from_config(&config, Arc::new(echo_host))?;
    let interrupted = Arc::new(AtomicBool::new(false));
    let signal_ids = [SIGINT, SIGTERM]
        .into_iter()
        .map(|signal| signal_hook::flag::register(signal, Arc::clone(&interrupted)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::Signal)?;

    engine.start()?;
    for message in &messages {
        let accepted = engine.send_command(message);
        info!(
            target: PROBE_TARGET,
            command = message.name(),
            accepted,
            "sent command"
        );
    }

    let deadline = cli
        .duration_ms
        .and_then(|ms| Instant::now().checked_add(Duration::from_millis(ms)));
    let tick = Duration::from_millis(cli.tick_ms);
    let outcome = tick_until(&mut engine, &echoed, stdout, deadline, tick, &interrupted);
    let statuses = engine.connection_status();
    engine.shutdown();
    for signal_id in signal_ids {
        signal_hook::low_level::unregister(signal_id);
    }
    outcome?;
    forward_echoes(&echoed, stdout)?;
    for status in statuses {
        writeln!(
            stdout,
            "status {} {} {} attempts={}",
            status.name, status.endpoint, status.state, status.attempts_made
        )
        .map_err(AppError::Output)?;
    }

    if engine.shutdown_requested() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn tick_until<W: Write>(
    engine: &mut Engine,
    echoed: &Receiver<String>,
    stdout: &mut W,
    deadline: Option<Instant>,
    tick: Duration,
    interrupted: &AtomicBool,
) -> Result<(), AppError> {
    loop {
        engine.poll();
        forward_echoes(echoed, stdout)?;
        if interrupted.load(Ordering::SeqCst) {
            info!(target: PROBE_TARGET, "interrupted; shutting down");
            return Ok(());
        }
        if engine.shutdown_requested() {
            info!(target: PROBE_TARGET, "engine requested shutdown");
            return Ok(());
        }
        if deadline.is_some_and(|end| Instant::now() >= end) {
            return Ok(());
        }
        thread::sleep(tick);
    }
}

fn forward_echoes<W: Write>(echoed: &Receiver<String>, stdout: &mut W) -> Result<(), AppError> {
    for line in echoed.try_iter() {
        writeln!(stdout, "{line}").map_err(AppError::Output)?;
    }
    stdout.flush().map_err(AppError::Output)
}

fn load_config(cli: &Cli) -> Result<BcpConfig, AppError> {
    let mut config = cli
        .config
        .as_deref()
        .map_or_else(|| Ok(BcpConfig::default()), BcpConfig::load_from_path)?;
    if let Some(host) = &cli.host {
        let mut connection = ConnectionConfig::new(host.as_str())
            .with_port(cli.port)
            .with_require_connection(cli.require);
        if let Some(attempts) = cli.attempts {
            connection = connection.with_connection_attempts(AttemptLimit::try_from(attempts)?);
        }
        config = config.with_connection(cli.name.as_str(), connection);
    }
    let resolved = config.with_overrides(|key| std::env::var(key).ok())?;
    resolved.validate()?;
    if resolved.connections().is_empty() {
        return Err(AppError::MissingPeer);
    }
    Ok(resolved)
}

fn parse_messages(messages: &[String]) -> Result<Vec<Command>, AppError> {
    messages
        .iter()
        .map(|message| {
            let command = decode(message.trim(), ValueCase::Preserve);
            if command.name().is_empty() {
                Err(AppError::InvalidMessage {
                    message: message.clone(),
                })
            } else {
                Ok(command)
            }
        })
        .collect()
}
