//! Error types for CAEN HV module communications.

use strum_macros::{AsRefStr, EnumString};
use thiserror::Error;

use crate::command::Parameter;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Error codes a board can report in a reply, e.g. `#BD:00,PAR:ERR`.
///
/// The code is the field name the board flagged. Codes outside the
/// documented set are carried verbatim in [`ErrorCode::Other`] instead of
/// being dropped.
#[derive(Debug, Clone, PartialEq, Eq, EnumString, AsRefStr)]
pub enum ErrorCode {
    /// `CMD:ERR` - the command verb was not recognised.
    #[strum(serialize = "CMD")]
    Cmd,
    /// `CH:ERR` - the channel index is not valid for this board.
    #[strum(serialize = "CH")]
    Ch,
    /// `PAR:ERR` - the parameter was not accepted.
    #[strum(serialize = "PAR")]
    Par,
    /// `VAL:ERR` - the value was rejected by the board.
    #[strum(serialize = "VAL")]
    Val,
    /// `LOC:ERR` - the board is switched to LOCAL control and refuses
    /// remote commands.
    #[strum(serialize = "LOC")]
    Loc,
    /// Any error code not in the documented set.
    #[strum(default)]
    Other(String),
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ErrorCode::Other(code) => write!(f, "{code}:ERR"),
            known => write!(f, "{}:ERR", known.as_ref()),
        }
    }
}

/// Custom error type for CAEN HV module communications.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    /// I/O failure on the byte stream. Fatal to the session; the caller
    /// must reconnect with a fresh transport.
    #[error("serial transport error")]
    Transport(I),
    /// The command could not be rendered into a protocol line. Nothing
    /// was written to the transport.
    #[error("command could not be encoded: {0}")]
    Encoding(&'static str),
    /// A set value failed validation against the cached board limits.
    /// Nothing was written to the transport.
    #[error("value {value} for {param} is outside the accepted range (limit {limit})")]
    Validation {
        param: Parameter,
        value: f64,
        limit: f64,
    },
    /// An inbound frame did not follow the reply grammar and was dropped.
    #[error("malformed reply frame: {0}")]
    Parse(String),
    /// The board answered with an error code.
    #[error("board reported {0}")]
    Protocol(ErrorCode),
    /// No matching reply arrived within the timeout window, after all
    /// configured retries.
    #[error("no reply from board {board} for {param} within the timeout window")]
    Timeout {
        board: u8,
        channel: Option<u8>,
        param: Parameter,
    },
    /// The board did not answer the discovery queries at session start.
    #[error("board {0} did not answer discovery queries")]
    DeviceUnresponsive(u8),
    /// The board id is not part of the session configuration.
    #[error("board {0} is not configured in this session")]
    UnknownBoard(u8),
    /// The channel index exceeds the board's channel count.
    #[error("board {board} has no channel {channel}")]
    UnknownChannel { board: u8, channel: u8 },
}

#[cfg(test)]
mod tests {
    use core::str::FromStr;

    use super::*;

    #[test]
    fn known_error_codes_parse_from_field_name() {
        assert_eq!(ErrorCode::from_str("CMD").unwrap(), ErrorCode::Cmd);
        assert_eq!(ErrorCode::from_str("CH").unwrap(), ErrorCode::Ch);
        assert_eq!(ErrorCode::from_str("PAR").unwrap(), ErrorCode::Par);
        assert_eq!(ErrorCode::from_str("VAL").unwrap(), ErrorCode::Val);
        assert_eq!(ErrorCode::from_str("LOC").unwrap(), ErrorCode::Loc);
    }

    #[test]
    fn unknown_error_codes_are_preserved() {
        let code = ErrorCode::from_str("BDILK").unwrap();
        assert_eq!(code, ErrorCode::Other("BDILK".to_string()));
        assert_eq!(code.to_string(), "BDILK:ERR");
    }
}
