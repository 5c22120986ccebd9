//! Wire format for the backbox control protocol.
//!
//! Messages are single lines of the form `name?key=value&key=value`,
//! terminated by a line-feed. This crate owns the three pure pieces of that
//! format:
//!
//! - [`command`]: the structured [`Command`] value and the command catalog.
//! - [`codec`]: converting commands to and from wire strings.
//! - [`framer`]: reassembling complete lines from arbitrary TCP chunks.
//!
//! Nothing here performs I/O; the engine crate drives these types from its
//! socket threads.

pub mod codec;
pub mod command;
pub mod framer;

pub use self::codec::{ValueCase, decode, encode};
pub use self::command::{Command, PROTOCOL_VERSION, Params, names};
pub use self::framer::{
    DEFAULT_MAX_FRAGMENT_BYTES, DISPLAY_FRAME_HEADER_LEN, DISPLAY_FRAME_PREFIX, Framer,
    FramerError, InboundLine,
};
