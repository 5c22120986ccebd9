//! Send and receive pipelines run on the session threads.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use bcp_wire::Framer;
use tracing::{debug, warn};

use super::queue::{OutboundQueue, SessionSignal};
use super::{CONNECTION_TARGET, Connection};

const READ_CHUNK_BYTES: usize = 4096;

/// Writes queued messages, one line each, until the session closes.
pub(super) fn send_loop(
    name: &str,
    queue: &OutboundQueue,
    signal: &SessionSignal,
    mut stream: TcpStream,
) {
    while let Some(message) = queue.next(signal) {
        debug!(
            target: CONNECTION_TARGET,
            connection = name,
            wire = %message,
            "sending"
        );
        let mut line = message.into_bytes();
        line.push(b'\n');
        if let Err(error) = stream.write_all(&line) {
            debug!(
                target: CONNECTION_TARGET,
                connection = name,
                error = %error,
                "write failed; message discarded"
            );
        }
    }
    debug!(
        target: CONNECTION_TARGET,
        connection = name,
        "send pipeline finished"
    );
}

/// Reads, frames, and routes inbound lines until the session ends.
pub(super) fn receive_loop(
    connection: &Arc<Connection>,
    session_id: u64,
    signal: &SessionSignal,
    mut stream: TcpStream,
) {
    let mut framer = Framer::new();
    let mut buffer = [0_u8; READ_CHUNK_BYTES];
    'session: while !signal.is_closed() {
        let read = match stream.read(&mut buffer) {
            Ok(0) => {
                debug!(
                    target: CONNECTION_TARGET,
                    connection = connection.name(),
                    "peer closed the stream"
                );
                break;
            }
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                debug!(
                    target: CONNECTION_TARGET,
                    connection = connection.name(),
                    error = %error,
                    "read failed"
                );
                break;
            }
        };

        let chunk = buffer.get(..read).unwrap_or_default();
        let lines = match framer.push(chunk) {
            Ok(lines) => lines,
            Err(error) => {
                warn!(
                    target: CONNECTION_TARGET,
                    connection = connection.name(),
                    error = %error,
                    "dropping session after framing error"
                );
                break;
            }
        };
        for line in lines {
            if signal.is_closed() {
                break 'session;
            }
            connection.handle_line(line);
        }
    }
    connection.session_ended(session_id);
}
