//! Opening TCP streams to peers.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use bcp_config::ConnectionConfig;
use thiserror::Error;

/// Errors raised while establishing a session.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    /// The host name did not resolve.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        /// `host:port` being resolved.
        endpoint: String,
        /// Resolver error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The host name resolved to nothing.
    #[error("no addresses resolved for {endpoint}")]
    NoAddress {
        /// `host:port` being resolved.
        endpoint: String,
    },
    /// Every resolved address refused or timed out.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// `host:port` of the peer.
        endpoint: String,
        /// Error from the last address tried.
        #[source]
        source: Arc<io::Error>,
    },
    /// The connected socket could not be prepared for the pipelines.
    #[error("failed to prepare stream for {endpoint}: {source}")]
    Stream {
        /// `host:port` of the peer.
        endpoint: String,
        /// Socket error.
        #[source]
        source: Arc<io::Error>,
    },
    /// A pipeline thread could not be spawned.
    #[error("failed to spawn {pipeline} pipeline for {endpoint}: {source}")]
    Spawn {
        /// `host:port` of the peer.
        endpoint: String,
        /// `send` or `receive`.
        pipeline: &'static str,
        /// Spawn error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Opens the stream for a new session.
///
/// [`TcpConnector`] is the production implementation; tests substitute
/// connectors that fail on demand.
pub trait Connector: Send + Sync {
    /// Makes one connect attempt.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectError`] when no stream could be opened.
    fn connect(&self, config: &ConnectionConfig) -> Result<TcpStream, ConnectError>;
}

/// Connects over TCP, bounded by the configured connect timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, config: &ConnectionConfig) -> Result<TcpStream, ConnectError> {
        let endpoint = config.endpoint();
        let addrs = (config.host(), config.port())
            .to_socket_addrs()
            .map_err(|source| ConnectError::Resolve {
                endpoint: endpoint.clone(),
                source: Arc::new(source),
            })?;

        let mut last_error = None;
        for addr in addrs {
            let attempt = match config.connect_timeout() {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(error) => last_error = Some(error),
            }
        }

        Err(match last_error {
            Some(source) => ConnectError::Connect {
                endpoint,
                source: Arc::new(source),
            },
            None => ConnectError::NoAddress { endpoint },
        })
    }
}
