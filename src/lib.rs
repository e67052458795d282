//! This crate provides an interface for communicating with and controlling
//! CAEN N1471 family high-voltage power supplies over their USB serial port.
//!
//! Supported models:
//! * N1471 (4 channel NIM module)
//! * N1471H
//! * DT1471ET (desktop, 4 channel)
//!
//! Single-channel variants of the same family speak the identical command
//! set and work with a one-channel [`session::BoardConfig`].
//!
//! The device exposes a line-oriented ASCII protocol. The host sends
//! `$BD:00,CMD:MON,CH:00,PAR:VMON` style commands terminated by CR LF and
//! the board answers `#BD:00,CMD:OK,VAL:1499.8` or an error reply such as
//! `#BD:00,PAR:ERR`. Several modules can share one line in a daisy chain,
//! addressed by the board id set on the module's rotary switches.
//!
//! The serial port used for comms should be configured like so:
//! * Baud rate: 9600 (115200 on newer firmware)
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! Start with [`session::Session::connect`], which takes anything
//! implementing the blocking [`embedded_io::Read`] and
//! [`embedded_io::Write`] traits.

pub mod codec;
pub mod command;
pub mod error;
pub mod model;
pub mod session;
pub mod status;
pub mod transaction;

#[cfg(test)]
mod mock_serial;
