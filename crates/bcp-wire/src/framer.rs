//! Line framing for inbound byte streams.
//!
//! TCP delivers bytes in whatever chunks the network produces, so one read
//! may hold half a message or a dozen. The [`Framer`] keeps the unterminated
//! tail of the stream (the fragment) between reads and hands out every
//! complete `\n`-terminated line in arrival order.
//!
//! Display frames travel on the same line protocol: a line starting with
//! `dmd_frame` carries raw bytes after a fixed ten byte header. Because
//! framing is newline-delimited, a display-frame payload must not contain a
//! line-feed byte.

use thiserror::Error;

use crate::command::names;

/// Largest fragment kept while waiting for a line-feed.
pub const DEFAULT_MAX_FRAGMENT_BYTES: usize = 1024 * 1024;

/// Prefix identifying a display-frame line.
pub const DISPLAY_FRAME_PREFIX: &[u8] = names::DMD_FRAME.as_bytes();

/// Length of the display-frame header (`dmd_frame` plus one separator byte).
pub const DISPLAY_FRAME_HEADER_LEN: usize = DISPLAY_FRAME_PREFIX.len() + 1;

/// Errors raised while framing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramerError {
    /// The peer sent more than the limit without a line-feed.
    #[error("unterminated message of {size} bytes exceeds the {limit} byte limit")]
    FragmentTooLarge {
        /// Bytes buffered when the limit tripped.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
}

/// Reassembles newline-terminated messages from arbitrary chunks.
#[derive(Debug, Clone)]
pub struct Framer {
    fragment: Vec<u8>,
    max_fragment: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    /// Creates a framer with [`DEFAULT_MAX_FRAGMENT_BYTES`].
    #[must_use]
    pub const fn new() -> Self {
        Self::with_max_fragment(DEFAULT_MAX_FRAGMENT_BYTES)
    }

    /// Creates a framer with a custom fragment limit.
    #[must_use]
    pub const fn with_max_fragment(max_fragment: usize) -> Self {
        Self {
            fragment: Vec::new(),
            max_fragment,
        }
    }

    /// Feeds one chunk and returns every line it completes.
    ///
    /// Lines are returned without their line-feed; empty lines are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FramerError::FragmentTooLarge`] when the unterminated tail
    /// outgrows the limit. The buffered fragment is discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, FramerError> {
        self.fragment.extend_from_slice(chunk);

        let lines = match self.fragment.iter().rposition(|byte| *byte == b'\n') {
            Some(last_newline) => {
                let tail = self.fragment.split_off(last_newline + 1);
                let complete = std::mem::replace(&mut self.fragment, tail);
                complete
                    .split(|byte| *byte == b'\n')
                    .filter(|line| !line.is_empty())
                    .map(<[u8]>::to_vec)
                    .collect()
            }
            None => Vec::new(),
        };

        if self.fragment.len() > self.max_fragment {
            let size = self.fragment.len();
            self.fragment.clear();
            return Err(FramerError::FragmentTooLarge {
                size,
                limit: self.max_fragment,
            });
        }
        Ok(lines)
    }

    /// Bytes received since the last line-feed.
    #[must_use]
    pub fn fragment(&self) -> &[u8] {
        &self.fragment
    }
}

/// A complete inbound line, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine {
    /// Raw display-frame payload, header stripped.
    DisplayFrame(Vec<u8>),
    /// A command message awaiting decode.
    Message(String),
}

impl InboundLine {
    /// Classifies a line produced by [`Framer::push`].
    #[must_use]
    pub fn classify(line: Vec<u8>) -> Self {
        if line.starts_with(DISPLAY_FRAME_PREFIX) {
            let payload = line
                .get(DISPLAY_FRAME_HEADER_LEN..)
                .map(<[u8]>::to_vec)
                .unwrap_or_default();
            return Self::DisplayFrame(payload);
        }
        match String::from_utf8(line) {
            Ok(text) => Self::Message(text),
            Err(error) => Self::Message(String::from_utf8_lossy(error.as_bytes()).into_owned()),
        }
    }
}
