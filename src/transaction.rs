//! One-command-at-a-time exchange with the bus.
//!
//! The protocol is half duplex: the host transmits one line and the
//! addressed board answers with one line before anything else moves.
//! [`Transactor::submit`] owns that exchange, including the per-attempt
//! timeout and the retransmission policy. Replies are matched to the
//! pending command by the echoed board id; frames from other boards are
//! logged and dropped, malformed frames likewise.

use std::time::{Duration, Instant};

use embedded_io::{Read, Write};
use log::{debug, warn};

use crate::codec::{self, FrameBuffer, ResponseKind};
use crate::command::{Command, Verb};
use crate::error::{Error, Result};

pub use crate::codec::Response;

/// Timing and retry policy for [`Transactor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactorConfig {
    /// How long to wait for a matching reply per attempt.
    pub timeout: Duration,
    /// Total transmissions of a `MON` command before giving up. Queries
    /// are idempotent, so lost ones are simply sent again.
    pub mon_attempts: u8,
    /// Total transmissions of a `SET` command before giving up. A SET
    /// whose reply was lost may already have been applied; the retry
    /// transmits the same assignment again, which the board treats as a
    /// plain overwrite. Set to 1 to disable retransmission of writes.
    pub set_attempts: u8,
}

impl Default for TransactorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            mon_attempts: 3,
            set_attempts: 2,
        }
    }
}

/// Drives single transactions over an owned byte stream.
pub struct Transactor<S> {
    serial: S,
    frames: FrameBuffer,
    config: TransactorConfig,
}

impl<S: Read + Write> Transactor<S> {
    pub fn new(serial: S, config: TransactorConfig) -> Self {
        Self {
            serial,
            frames: FrameBuffer::new(),
            config,
        }
    }

    /// Swap in a fresh transport after the old one failed. Buffered
    /// partial frames belong to the dead connection and are dropped.
    pub fn replace_transport(&mut self, serial: S) {
        self.serial = serial;
        self.frames.reset();
    }

    pub fn transport_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    /// Give the transport back, ending the exchange loop.
    pub fn into_inner(self) -> S {
        self.serial
    }

    /// Transmit a command and wait for the board's reply.
    ///
    /// Retransmits per [`TransactorConfig`] when no matching reply
    /// arrives in time. A reply carrying an error code resolves the
    /// transaction immediately and is never retried.
    pub fn submit(&mut self, command: &Command) -> Result<Response, S::Error> {
        let line = codec::encode(command)?;
        let attempts = match command.verb {
            Verb::Mon => self.config.mon_attempts,
            Verb::Set => self.config.set_attempts,
        }
        .max(1);

        for attempt in 1..=attempts {
            debug!(
                "-> {} (attempt {attempt}/{attempts})",
                line.trim_end_matches("\r\n")
            );
            self.serial
                .write_all(line.as_bytes())
                .map_err(Error::Transport)?;
            self.serial.flush().map_err(Error::Transport)?;

            match self.await_reply(command)? {
                Some(response) => {
                    return match response.kind {
                        ResponseKind::Ok(_) => Ok(response),
                        ResponseKind::Error(code) => Err(Error::Protocol(code)),
                    };
                }
                None => warn!(
                    "board {:02} did not answer {} within {:?} (attempt {attempt}/{attempts})",
                    command.board, command.param, self.config.timeout
                ),
            }
        }

        Err(Error::Timeout {
            board: command.board,
            channel: command.channel,
            param: command.param,
        })
    }

    /// Wait until a frame addressed from the command's board arrives or
    /// the attempt deadline passes. `Ok(None)` means this attempt timed
    /// out; transport failures are fatal.
    fn await_reply(&mut self, command: &Command) -> Result<Option<Response>, S::Error> {
        let deadline = Instant::now() + self.config.timeout;
        let mut buf = [0u8; 64];

        // Frames already buffered from an earlier read may hold the reply.
        if let Some(response) = self.pump(&[], command) {
            return Ok(Some(response));
        }

        loop {
            if Instant::now() >= deadline {
                return Ok(None);
            }
            match self.serial.read(&mut buf) {
                // A zero-byte read carries no pacing of its own; back off
                // briefly instead of spinning until the deadline.
                Ok(0) => std::thread::sleep(Duration::from_millis(1)),
                Ok(n) => {
                    if let Some(response) = self.pump(&buf[..n], command) {
                        return Ok(Some(response));
                    }
                }
                // The port's own read timeout paces the loop; keep
                // waiting until our deadline.
                Err(e)
                    if matches!(
                        embedded_io::Error::kind(&e),
                        embedded_io::ErrorKind::TimedOut | embedded_io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(Error::Transport(e)),
            }
        }
    }

    /// Feed bytes through the frame buffer and scan for the first frame
    /// matching the pending command. Unconsumed frames stay buffered.
    fn pump(&mut self, bytes: &[u8], command: &Command) -> Option<Response> {
        for frame in self.frames.feed(bytes) {
            let raw = match frame {
                Ok(raw) => raw,
                Err(_) => {
                    warn!("discarded an overlong inbound frame");
                    continue;
                }
            };
            match codec::decode::<S::Error>(&raw) {
                Ok(response) if response.board == command.board => {
                    debug!("<- {}", String::from_utf8_lossy(&raw));
                    return Some(response);
                }
                Ok(response) => warn!(
                    "discarding reply from board {:02} while waiting on board {:02}",
                    response.board, command.board
                ),
                Err(err) => warn!("{err}"),
            }
        }
        None
    }
}
