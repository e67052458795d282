//! Translation between [`Command`]s/[`Response`]s and the device's
//! line-oriented ASCII protocol.
//!
//! Outbound: `$BD:<board>,CMD:<SET|MON>[,CH:<channel>],PAR:<name>[,VAL:<value>]\r\n`
//!
//! Inbound: `#BD:<board>,CMD:OK[,VAL:<v>[;<v>...]]\r\n` on success, or
//! `#BD:<board>,<FIELD>:ERR\r\n` when the board rejects a command.
//!
//! The codec is stateless apart from [`FrameBuffer`], which reassembles
//! inbound bytes into complete frames. A reply may arrive split across
//! several reads, and a single read may carry several replies; both are
//! handled by buffering and draining line by line.

use core::fmt::Write as _;
use core::str::FromStr;

use crate::command::Command;
use crate::error::{Error, ErrorCode, Result};

/// Longest protocol line accepted in either direction, terminator
/// included. Anything longer is discarded and flagged.
pub const MAX_FRAME_LEN: usize = 256;

/// Reassembly buffer capacity. Holds at least one maximum-length frame
/// plus a following partial one.
const RECV_CAPACITY: usize = 512;

/// One complete inbound line, terminator stripped.
pub type RawFrame = heapless::Vec<u8, MAX_FRAME_LEN>;

/// Marker for an inbound line that exceeded [`MAX_FRAME_LEN`] and was
/// dropped through its terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTooLong;

/// Render a command as a terminated protocol line.
///
/// Performs the structural checks (verb/parameter compatibility, channel
/// presence, board id range); value range validation against the board
/// limits happens in the device model before a command is ever built.
pub fn encode<I: embedded_io::Error>(command: &Command) -> Result<heapless::String<MAX_FRAME_LEN>, I> {
    if command.board > 31 {
        return Err(Error::Encoding("board id outside 0-31"));
    }
    if command.param.is_board_level() {
        if command.channel.is_some() {
            return Err(Error::Encoding("board-level parameter takes no channel"));
        }
    } else if command.channel.is_none() {
        return Err(Error::Encoding("channel parameter requires a channel"));
    }
    match command.verb {
        crate::command::Verb::Mon => {
            if !command.param.is_monitorable() {
                return Err(Error::Encoding("parameter does not answer MON"));
            }
            if command.value.is_some() {
                return Err(Error::Encoding("MON commands carry no value"));
            }
        }
        crate::command::Verb::Set => {
            if !command.param.is_settable() {
                return Err(Error::Encoding("parameter is read-only"));
            }
            if command.param.is_action() {
                if command.value.is_some() {
                    return Err(Error::Encoding("action parameter takes no value"));
                }
            } else if command.value.is_none() {
                return Err(Error::Encoding("SET requires a value"));
            }
        }
    }

    let mut line = heapless::String::new();
    let mut render = || -> core::fmt::Result {
        write!(line, "$BD:{:02},CMD:{}", command.board, command.verb)?;
        if let Some(channel) = command.channel {
            write!(line, ",CH:{channel:02}")?;
        }
        write!(line, ",PAR:{}", command.param)?;
        if let Some(value) = &command.value {
            write!(line, ",VAL:{value}")?;
        }
        line.push_str("\r\n").map_err(|_| core::fmt::Error)
    };
    render().map_err(|_| Error::Encoding("command exceeds the maximum frame length"))?;
    Ok(line)
}

/// Outcome field of a reply: acknowledgement with values, or a board
/// error code.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    Ok(Vec<String>),
    Error(ErrorCode),
}

/// A parsed reply frame. Consumed immediately to resolve the pending
/// transaction and update the device model.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Board id echoed by the device, used to match the pending command.
    pub board: u8,
    pub kind: ResponseKind,
}

impl Response {
    /// Reply values (semicolon-separated on the wire). Empty for error
    /// replies and plain acknowledgements.
    pub fn values(&self) -> &[String] {
        match &self.kind {
            ResponseKind::Ok(values) => values,
            ResponseKind::Error(_) => &[],
        }
    }

    pub fn first_value(&self) -> Option<&str> {
        self.values().first().map(String::as_str)
    }
}

/// Parse one complete frame into a [`Response`].
pub fn decode<I: embedded_io::Error>(frame: &[u8]) -> Result<Response, I> {
    let text = core::str::from_utf8(frame)
        .map_err(|_| Error::Parse("frame is not valid ASCII".to_string()))?;
    let rest = text
        .strip_prefix("#BD:")
        .ok_or_else(|| Error::Parse(format!("missing #BD prefix in {text:?}")))?;
    let (digits, rest) = rest
        .split_once(',')
        .ok_or_else(|| Error::Parse(format!("missing fields in {text:?}")))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Parse(format!("bad board id {digits:?}")));
    }
    let board: u8 = digits
        .parse()
        .map_err(|_| Error::Parse(format!("bad board id {digits:?}")))?;

    if rest == "CMD:OK" {
        return Ok(Response {
            board,
            kind: ResponseKind::Ok(Vec::new()),
        });
    }
    if let Some(payload) = rest.strip_prefix("CMD:OK,VAL:") {
        let values = if payload.is_empty() {
            Vec::new()
        } else {
            payload.split(';').map(str::to_string).collect()
        };
        return Ok(Response {
            board,
            kind: ResponseKind::Ok(values),
        });
    }
    if let Some(code) = rest.strip_suffix(":ERR") {
        if code.is_empty() || code.contains(',') {
            return Err(Error::Parse(format!("bad error field in {text:?}")));
        }
        let code =
            ErrorCode::from_str(code).unwrap_or_else(|_| ErrorCode::Other(code.to_string()));
        return Ok(Response {
            board,
            kind: ResponseKind::Error(code),
        });
    }
    Err(Error::Parse(format!("unrecognised reply {text:?}")))
}

/// Reassembles the inbound byte stream into complete frames.
///
/// Owns the partial-frame state across reads. Unterminated bytes stay
/// buffered until a terminator arrives or [`FrameBuffer::reset`] is
/// called on reconnect.
pub struct FrameBuffer {
    buf: heapless::Vec<u8, RECV_CAPACITY>,
    /// Skipping an overlong line until its terminator.
    discarding: bool,
    /// An overrun happened while appending and has not been reported yet.
    overrun: bool,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            discarding: false,
            overrun: false,
        }
    }

    /// Drop all buffered state. Required after a transport reconnect,
    /// since a partial frame from the old connection would corrupt the
    /// first frame of the new one.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
        self.overrun = false;
    }

    /// Append incoming bytes and iterate the complete frames they close.
    ///
    /// The iterator is lazy and restartable: frames not consumed on this
    /// call remain buffered and are yielded by the next one.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        for &byte in bytes {
            if self.discarding {
                if byte == b'\n' {
                    self.discarding = false;
                }
                continue;
            }
            if self.buf.push(byte).is_err() {
                self.buf.clear();
                self.overrun = true;
                self.discarding = byte != b'\n';
            }
        }
        Frames { inner: self }
    }

    /// Bytes currently buffered without a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the complete frames currently buffered.
pub struct Frames<'a> {
    inner: &'a mut FrameBuffer,
}

impl Iterator for Frames<'_> {
    type Item = core::result::Result<RawFrame, FrameTooLong>;

    fn next(&mut self) -> Option<Self::Item> {
        let fb = &mut *self.inner;
        if fb.overrun {
            fb.overrun = false;
            return Some(Err(FrameTooLong));
        }
        match fb.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let too_long = pos + 1 > MAX_FRAME_LEN;
                let mut end = pos;
                if end > 0 && fb.buf[end - 1] == b'\r' {
                    end -= 1;
                }
                let frame = if too_long {
                    None
                } else {
                    RawFrame::from_slice(&fb.buf[..end]).ok()
                };
                let keep = fb.buf.len() - (pos + 1);
                fb.buf.copy_within(pos + 1.., 0);
                fb.buf.truncate(keep);
                match frame {
                    Some(frame) => Some(Ok(frame)),
                    None => Some(Err(FrameTooLong)),
                }
            }
            None => {
                if fb.buf.len() > MAX_FRAME_LEN {
                    fb.buf.clear();
                    fb.discarding = true;
                    return Some(Err(FrameTooLong));
                }
                None
            }
        }
    }
}
