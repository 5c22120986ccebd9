//! Error type for the probe runtime.

use std::io;

use bcp_config::{AttemptLimitError, ConfigError};
use bcp_engine::EngineError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(#[from] ConfigError),
    #[error("invalid --attempts value: {0}")]
    AttemptLimit(#[from] AttemptLimitError),
    #[error("no peers configured; pass --host or a --config file with connections")]
    MissingPeer,
    #[error("'{message}' is not a command")]
    InvalidMessage { message: String },
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("failed to install signal handlers: {0}")]
    Signal(io::Error),
    #[error("failed to write output: {0}")]
    Output(io::Error),
}
