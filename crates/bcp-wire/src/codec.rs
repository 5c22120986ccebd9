//! Encoding between [`Command`] values and wire strings.
//!
//! The wire form is `name[?key=value&key=value...]` with keys and values
//! form-urlencoded. Neither direction can fail: encoding only assembles
//! strings, and decoding skips any query part it cannot make sense of.

use url::form_urlencoded;

use crate::command::{Command, Params};

/// Whether inbound parameter values keep their case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueCase {
    /// Values are delivered exactly as sent.
    #[default]
    Preserve,
    /// Values are lower-cased along with names and keys, matching older
    /// peers that lower-case whole messages.
    Lowercase,
}

/// Encodes a command name and parameters into a wire string.
///
/// The name is lower-cased. With no parameters the bare name is returned.
#[must_use]
pub fn encode(name: &str, params: &Params) -> String {
    let lowered = name.trim().to_lowercase();
    if params.is_empty() {
        return lowered;
    }
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish();
    format!("{lowered}?{query}")
}

/// Decodes a wire string into a command.
///
/// Splits on the first `?`; the name is lower-cased and so are parameter
/// keys. Pairs with an empty key or an empty value are skipped, and when a
/// key repeats the first occurrence wins.
#[must_use]
pub fn decode(message: &str, case: ValueCase) -> Command {
    let (name, query) = message.split_once('?').unwrap_or((message, ""));
    let mut params = Params::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key.is_empty() || value.is_empty() {
            continue;
        }
        let cased = match case {
            ValueCase::Preserve => value.into_owned(),
            ValueCase::Lowercase => value.to_lowercase(),
        };
        params.entry(key.to_lowercase()).or_insert(cased);
    }
    Command::with_params(name, params)
}
