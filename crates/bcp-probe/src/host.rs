//! A [`Host`] that logs what the engine reports and echoes it as text.

use std::sync::mpsc::{Receiver, Sender, channel};

use bcp_engine::{Host, HostEvent};
use bcp_wire::encode;
use tracing::{debug, info, warn};

const HOST_TARGET: &str = "bcp_probe::host";

/// Completes every event immediately, so trigger callbacks are answered
/// on the next send.
#[derive(Debug)]
pub(crate) struct EchoHost {
    lines: Sender<String>,
}

impl EchoHost {
    /// Builds the host and the receiver its echo lines arrive on.
    pub(crate) fn new() -> (Self, Receiver<String>) {
        let (lines, echoed) = channel();
        (Self { lines }, echoed)
    }

    fn echo(&self, line: String) {
        if self.lines.send(line).is_err() {
            debug!(target: HOST_TARGET, "echo receiver dropped");
        }
    }
}

impl Host for EchoHost {
    fn post(&self, event: HostEvent) {
        info!(
            target: HOST_TARGET,
            event = event.name(),
            fields = ?event.fields(),
            callback = event.has_completion(),
            "host event"
        );
        self.echo(format!("event {}", encode(event.name(), event.fields())));
        event.complete();
    }

    fn set_switch(&self, name: &str, active: bool, logical: bool) {
        info!(
            target: HOST_TARGET,
            switch = name,
            active,
            logical,
            "switch change"
        );
        self.echo(format!("switch {name} {}", u8::from(active)));
    }

    fn apply_frame(&self, payload: &[u8]) {
        debug!(target: HOST_TARGET, bytes = payload.len(), "display frame");
        self.echo(format!("frame {} bytes", payload.len()));
    }

    fn request_shutdown(&self) {
        warn!(target: HOST_TARGET, "engine requested shutdown");
        self.echo(String::from("shutdown requested"));
    }
}
