//! Command-line arguments for the probe.

use camino::Utf8PathBuf;
use clap::Parser;

/// Name given to the connection built from `--host`.
pub(crate) const DEFAULT_CONNECTION_NAME: &str = "peer";

/// Drives the BCP engine against live peers and echoes what they send.
#[derive(Parser, Debug)]
#[command(name = "bcp-probe", version)]
pub(crate) struct Cli {
    /// YAML configuration file with connections and the event map.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<Utf8PathBuf>,
    /// Connects to this host in addition to any configured connections.
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Port for `--host`.
    #[arg(long, default_value_t = bcp_config::DEFAULT_PORT)]
    pub(crate) port: u16,
    /// Connection name for `--host`.
    #[arg(long, default_value = DEFAULT_CONNECTION_NAME)]
    pub(crate) name: String,
    /// Attempt limit for `--host`; `-1` keeps trying.
    #[arg(long, allow_negative_numbers = true)]
    pub(crate) attempts: Option<i64>,
    /// Treats losing the `--host` peer as fatal.
    #[arg(long)]
    pub(crate) require: bool,
    /// Wire-form command to send after start, e.g. `trigger?name=ball_start`.
    #[arg(long = "send", value_name = "MESSAGE")]
    pub(crate) messages: Vec<String>,
    /// Stops after this many milliseconds. Runs until interrupted otherwise.
    #[arg(long, value_name = "MS")]
    pub(crate) duration_ms: Option<u64>,
    /// Delay between two polls of the engine.
    #[arg(long, value_name = "MS", default_value_t = 50)]
    pub(crate) tick_ms: u64,
}
