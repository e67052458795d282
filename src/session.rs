//! High-level interface to one or more boards on a serial line.
//!
//! A [`Session`] owns the transport and a cached [`DeviceModel`]. On
//! connect it discovers each configured board (identity plus per-channel
//! limits) and afterwards exposes typed operations for everything the
//! command set offers. All methods take `&self`; an internal mutex
//! serialises transactions, matching the half-duplex protocol.

use std::sync::{Mutex, MutexGuard, PoisonError};

use embedded_io::{Read, Write};
use log::{info, warn};

use crate::command::{
    Command, ControlMode, InterlockMode, MonitorRange, ParamValue, Parameter, Polarity,
    PowerDownMode, State, Value,
};
use crate::error::{Error, Result};
use crate::model::{Board, Channel, ChannelDelta, DeviceModel};
use crate::status::{BoardAlarm, ChannelStatus};
use crate::transaction::{Transactor, TransactorConfig};

/// One board expected on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardConfig {
    /// Board id, 0-31, as set on the module's rotary switches.
    pub id: u8,
    /// Output channel count. 4 on the N1471, 1 on the single-channel
    /// variants.
    pub channels: u8,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self { id: 0, channels: 4 }
    }
}

/// Session-wide configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Boards to discover at connect, usually just one. Daisy-chained
    /// modules share the line and are told apart by board id.
    pub boards: Vec<BoardConfig>,
    pub transactor: TransactorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            boards: vec![BoardConfig::default()],
            transactor: TransactorConfig::default(),
        }
    }
}

/// Parameters refreshed by [`Session::poll_once`], in query order.
const POLL_PARAMS: [Parameter; 5] = [
    Parameter::VSet,
    Parameter::VMon,
    Parameter::ISet,
    Parameter::IMon,
    Parameter::Stat,
];

struct Inner<S> {
    tx: Transactor<S>,
    model: DeviceModel,
}

/// A live connection to the boards described by a [`SessionConfig`].
pub struct Session<S> {
    inner: Mutex<Inner<S>>,
    config: SessionConfig,
}

impl<S: Read + Write> Session<S> {
    /// Open a session and discover every configured board.
    ///
    /// Discovery reads each board's identity (`BDNAME`, `BDFREL`,
    /// `BDSNUM`) and each channel's limits (`MAXV`, `MAXI`). A board
    /// that never answers fails the whole connect with
    /// [`Error::DeviceUnresponsive`].
    pub fn connect(serial: S, config: SessionConfig) -> Result<Self, S::Error> {
        let boards = config
            .boards
            .iter()
            .map(|b| Board::new(b.id, b.channels))
            .collect();
        let mut inner = Inner {
            tx: Transactor::new(serial, config.transactor),
            model: DeviceModel::new(boards),
        };
        inner.discover()?;
        Ok(Self {
            inner: Mutex::new(inner),
            config,
        })
    }

    /// Resume on a fresh transport after a fault, re-running discovery.
    pub fn reconnect(&self, serial: S) -> Result<(), S::Error> {
        let mut inner = self.lock();
        inner.tx.replace_transport(serial);
        inner.discover()
    }

    /// Cached state of a board, identity included.
    pub fn board(&self, board: u8) -> Result<Board, S::Error> {
        self.lock().board(board).map(Board::clone)
    }

    /// Cached state of one channel.
    pub fn channel(&self, board: u8, channel: u8) -> Result<Channel, S::Error> {
        self.lock().channel(board, channel).map(Channel::clone)
    }

    /// Set a channel's target voltage in volts. Checked against the
    /// channel's `MAXV` limit before transmission. Returns the channel's
    /// state as cached after the acknowledgement.
    pub fn set_voltage(&self, board: u8, channel: u8, volts: f64) -> Result<Channel, S::Error> {
        self.set_float(board, channel, Parameter::VSet, volts)
    }

    /// Set a channel's current limit in micro-amps.
    pub fn set_current_limit(
        &self,
        board: u8,
        channel: u8,
        microamps: f64,
    ) -> Result<Channel, S::Error> {
        self.set_float(board, channel, Parameter::ISet, microamps)
    }

    /// Set a channel's software voltage limit in volts.
    pub fn set_max_voltage(&self, board: u8, channel: u8, volts: f64) -> Result<Channel, S::Error> {
        self.set_float(board, channel, Parameter::MaxV, volts)
    }

    /// Set a channel's ramp-up rate in V/s.
    pub fn set_ramp_up(&self, board: u8, channel: u8, rate: f64) -> Result<Channel, S::Error> {
        self.set_float(board, channel, Parameter::Rup, rate)
    }

    /// Set a channel's ramp-down rate in V/s.
    pub fn set_ramp_down(&self, board: u8, channel: u8, rate: f64) -> Result<Channel, S::Error> {
        self.set_float(board, channel, Parameter::Rdw, rate)
    }

    /// Set the seconds a channel may sit in over-current before it trips.
    /// `1000.0` disables the trip.
    pub fn set_trip_time(&self, board: u8, channel: u8, seconds: f64) -> Result<Channel, S::Error> {
        self.set_float(board, channel, Parameter::Trip, seconds)
    }

    /// Choose how the channel powers down when switched off or tripped.
    pub fn set_power_down_mode(
        &self,
        board: u8,
        channel: u8,
        mode: PowerDownMode,
    ) -> Result<Channel, S::Error> {
        let mut inner = self.lock();
        inner.check_channel(board, channel)?;
        inner
            .tx
            .submit(&Command::set(board, channel, Parameter::Pdwn, Value::PowerDown(mode)))?;
        if let Ok(chan) = inner.channel_mut(board, channel) {
            chan.power_down = Some(mode);
        }
        inner.channel(board, channel).map(Channel::clone)
    }

    /// Choose the channel's current monitor range.
    pub fn set_monitor_range(
        &self,
        board: u8,
        channel: u8,
        range: MonitorRange,
    ) -> Result<Channel, S::Error> {
        let mut inner = self.lock();
        inner.check_channel(board, channel)?;
        inner
            .tx
            .submit(&Command::set(board, channel, Parameter::ImRange, Value::Range(range)))?;
        if let Ok(chan) = inner.channel_mut(board, channel) {
            chan.monitor_range = Some(range);
        }
        inner.channel(board, channel).map(Channel::clone)
    }

    /// Switch a channel's output on. The output then ramps towards
    /// `VSET` at the configured `RUP` rate.
    pub fn turn_on(&self, board: u8, channel: u8) -> Result<Channel, S::Error> {
        self.channel_action(board, channel, Parameter::On)
    }

    /// Switch a channel's output off.
    pub fn turn_off(&self, board: u8, channel: u8) -> Result<Channel, S::Error> {
        self.channel_action(board, channel, Parameter::Off)
    }

    /// Read a channel's output voltage in volts.
    pub fn measured_voltage(&self, board: u8, channel: u8) -> Result<f64, S::Error> {
        self.mon_float(board, channel, Parameter::VMon)
    }

    /// Read a channel's output current in micro-amps.
    pub fn measured_current(&self, board: u8, channel: u8) -> Result<f64, S::Error> {
        self.mon_float(board, channel, Parameter::IMon)
    }

    /// Read and decode a channel's status word.
    pub fn channel_status(&self, board: u8, channel: u8) -> Result<ChannelStatus, S::Error> {
        let mut inner = self.lock();
        inner.check_channel(board, channel)?;
        let value = inner.mon_channel(board, channel, Parameter::Stat)?;
        match value {
            ParamValue::Status(status) => {
                if let Ok(chan) = inner.channel_mut(board, channel) {
                    chan.status = Some(status);
                }
                Ok(status)
            }
            other => Err(Error::Parse(format!("expected a status word, got {other:?}"))),
        }
    }

    /// Read a channel's output polarity, fixed by a jumper on the board.
    pub fn polarity(&self, board: u8, channel: u8) -> Result<Polarity, S::Error> {
        let mut inner = self.lock();
        match inner.mon_channel(board, channel, Parameter::Pol)? {
            ParamValue::Polarity(polarity) => {
                if let Ok(chan) = inner.channel_mut(board, channel) {
                    chan.polarity = Some(polarity);
                }
                Ok(polarity)
            }
            other => Err(Error::Parse(format!("expected + or -, got {other:?}"))),
        }
    }

    /// Read the channel's current monitor range.
    pub fn monitor_range(&self, board: u8, channel: u8) -> Result<MonitorRange, S::Error> {
        let mut inner = self.lock();
        match inner.mon_channel(board, channel, Parameter::ImRange)? {
            ParamValue::Range(range) => {
                if let Ok(chan) = inner.channel_mut(board, channel) {
                    chan.monitor_range = Some(range);
                }
                Ok(range)
            }
            other => Err(Error::Parse(format!("expected HIGH/LOW, got {other:?}"))),
        }
    }

    /// Read how the channel powers down when switched off or tripped.
    pub fn power_down_mode(&self, board: u8, channel: u8) -> Result<PowerDownMode, S::Error> {
        let mut inner = self.lock();
        match inner.mon_channel(board, channel, Parameter::Pdwn)? {
            ParamValue::PowerDown(mode) => {
                if let Ok(chan) = inner.channel_mut(board, channel) {
                    chan.power_down = Some(mode);
                }
                Ok(mode)
            }
            other => Err(Error::Parse(format!("expected RAMP/KILL, got {other:?}"))),
        }
    }

    /// Read a channel's trip time in seconds.
    pub fn trip_time(&self, board: u8, channel: u8) -> Result<f64, S::Error> {
        self.mon_float(board, channel, Parameter::Trip)
    }

    /// Read a channel's ramp-up rate in V/s.
    pub fn ramp_up_rate(&self, board: u8, channel: u8) -> Result<f64, S::Error> {
        self.mon_float(board, channel, Parameter::Rup)
    }

    /// Read a channel's ramp-down rate in V/s.
    pub fn ramp_down_rate(&self, board: u8, channel: u8) -> Result<f64, S::Error> {
        self.mon_float(board, channel, Parameter::Rdw)
    }

    /// Read the board's interlock line state.
    pub fn interlock_status(&self, board: u8) -> Result<State, S::Error> {
        let mut inner = self.lock();
        match inner.mon_board(board, Parameter::BdIlk)? {
            ParamValue::Switch(state) => {
                if let Ok(b) = inner.board_mut(board) {
                    b.interlock = Some(state);
                }
                Ok(state)
            }
            other => Err(Error::Parse(format!("expected ON/OFF, got {other:?}"))),
        }
    }

    /// Read the board's interlock mode.
    pub fn interlock_mode(&self, board: u8) -> Result<InterlockMode, S::Error> {
        let mut inner = self.lock();
        match inner.mon_board(board, Parameter::BdIlkM)? {
            ParamValue::Interlock(mode) => {
                if let Ok(b) = inner.board_mut(board) {
                    b.interlock_mode = Some(mode);
                }
                Ok(mode)
            }
            other => Err(Error::Parse(format!("expected OPEN/CLOSED, got {other:?}"))),
        }
    }

    /// Change the board's interlock mode.
    pub fn set_interlock_mode(&self, board: u8, mode: InterlockMode) -> Result<(), S::Error> {
        let mut inner = self.lock();
        inner.board(board)?;
        inner
            .tx
            .submit(&Command::board_set(board, Parameter::BdIlkM, Value::Interlock(mode)))?;
        if let Ok(b) = inner.board_mut(board) {
            b.interlock_mode = Some(mode);
        }
        Ok(())
    }

    /// Read whether the board obeys the front panel or this interface.
    pub fn control_mode(&self, board: u8) -> Result<ControlMode, S::Error> {
        let mut inner = self.lock();
        match inner.mon_board(board, Parameter::BdCtr)? {
            ParamValue::Control(mode) => {
                if let Ok(b) = inner.board_mut(board) {
                    b.control = Some(mode);
                }
                Ok(mode)
            }
            other => Err(Error::Parse(format!("expected LOCAL/REMOTE, got {other:?}"))),
        }
    }

    /// Read the local bus termination state.
    pub fn bus_termination(&self, board: u8) -> Result<State, S::Error> {
        let mut inner = self.lock();
        match inner.mon_board(board, Parameter::BdTerm)? {
            ParamValue::Switch(state) => {
                if let Ok(b) = inner.board_mut(board) {
                    b.termination = Some(state);
                }
                Ok(state)
            }
            other => Err(Error::Parse(format!("expected ON/OFF, got {other:?}"))),
        }
    }

    /// Read and decode the board alarm word.
    pub fn alarm_status(&self, board: u8) -> Result<BoardAlarm, S::Error> {
        let mut inner = self.lock();
        match inner.mon_board(board, Parameter::BdAlarm)? {
            ParamValue::Alarm(alarm) => {
                if let Ok(b) = inner.board_mut(board) {
                    b.alarm = Some(alarm);
                }
                Ok(alarm)
            }
            other => Err(Error::Parse(format!("expected an alarm word, got {other:?}"))),
        }
    }

    /// Clear the board's latched alarm bits.
    pub fn clear_alarm(&self, board: u8) -> Result<(), S::Error> {
        let mut inner = self.lock();
        inner.board(board)?;
        inner.tx.submit(&Command::board_action(board, Parameter::BdClr))?;
        if let Ok(b) = inner.board_mut(board) {
            b.alarm = Some(BoardAlarm::from_word(0));
        }
        Ok(())
    }

    /// Refresh every channel's live parameters and report what changed
    /// since the previous poll.
    ///
    /// Boards and channels are visited in ascending order, parameters in
    /// `VSET`, `VMON`, `ISET`, `IMON`, `STAT` order. Channels whose
    /// values are all unchanged are omitted, so a quiescent bus yields an
    /// empty list.
    pub fn poll_once(&self) -> Result<Vec<ChannelDelta>, S::Error> {
        let mut inner = self.lock();
        let mut deltas = Vec::new();
        let addresses: Vec<(u8, u8)> = inner
            .model
            .boards()
            .iter()
            .flat_map(|b| (0..b.channel_count()).map(move |ch| (b.id, ch)))
            .collect();

        for (board, channel) in addresses {
            let mut changed = Vec::new();
            for param in POLL_PARAMS {
                let value = inner.mon_channel(board, channel, param)?;
                if let Ok(chan) = inner.channel_mut(board, channel)
                    && let Some(field) = chan.apply(param, &value)
                {
                    changed.push(field);
                }
            }
            if !changed.is_empty() {
                deltas.push(ChannelDelta {
                    board,
                    channel,
                    changed,
                });
            }
        }
        Ok(deltas)
    }

    fn set_float(
        &self,
        board: u8,
        channel: u8,
        param: Parameter,
        value: f64,
    ) -> Result<Channel, S::Error> {
        let mut inner = self.lock();
        inner.check_channel(board, channel)?;
        inner.board(board)?.validate_set(channel, param, value)?;
        inner
            .tx
            .submit(&Command::set(board, channel, param, Value::Float(value)))?;
        if let Ok(chan) = inner.channel_mut(board, channel) {
            chan.apply(param, &ParamValue::Float(value));
        }
        inner.channel(board, channel).map(Channel::clone)
    }

    fn mon_float(&self, board: u8, channel: u8, param: Parameter) -> Result<f64, S::Error> {
        let mut inner = self.lock();
        inner.check_channel(board, channel)?;
        let value = inner.mon_channel(board, channel, param)?;
        let float = value
            .as_f64()
            .ok_or_else(|| Error::Parse(format!("expected a number for {param}")))?;
        if let Ok(chan) = inner.channel_mut(board, channel) {
            chan.apply(param, &value);
        }
        Ok(float)
    }

    fn channel_action(&self, board: u8, channel: u8, param: Parameter) -> Result<Channel, S::Error> {
        let mut inner = self.lock();
        inner.check_channel(board, channel)?;
        inner.tx.submit(&Command::action(board, channel, param))?;
        inner.channel(board, channel).map(Channel::clone)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The boards this session was configured with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// End the session and hand the transport back to the caller, who
    /// owns closing the port.
    pub fn into_transport(self) -> S {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .tx
            .into_inner()
    }

    #[cfg(test)]
    fn with_transport<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(self.lock().tx.transport_mut())
    }
}

impl<S: Read + Write> Inner<S> {
    fn discover(&mut self) -> Result<(), S::Error> {
        let addresses: Vec<(u8, u8)> = self
            .model
            .boards()
            .iter()
            .map(|b| (b.id, b.channel_count()))
            .collect();

        for (board, channels) in addresses {
            for param in [Parameter::BdName, Parameter::BdFRel, Parameter::BdSNum] {
                let value = self
                    .mon_board(board, param)
                    .map_err(|e| unresponsive(board, e))?;
                if let Ok(b) = self.board_mut(board) {
                    b.apply(param, &value);
                }
            }
            for channel in 0..channels {
                for param in [Parameter::MaxV, Parameter::MaxI] {
                    let value = self
                        .mon_channel(board, channel, param)
                        .map_err(|e| unresponsive(board, e))?;
                    if let Ok(chan) = self.channel_mut(board, channel) {
                        chan.apply(param, &value);
                    }
                }
            }
            if let Ok(b) = self.board(board) {
                info!(
                    "board {:02}: {} fw {} sn {}",
                    board, b.name, b.firmware, b.serial
                );
            }
        }
        Ok(())
    }

    /// Query a channel parameter and parse its reply value. Unknown
    /// addresses are rejected before anything is transmitted.
    fn mon_channel(&mut self, board: u8, channel: u8, param: Parameter) -> Result<ParamValue, S::Error> {
        self.check_channel(board, channel)?;
        let response = self.tx.submit(&Command::mon(board, channel, param))?;
        parse_reply(param, &response)
    }

    /// Query a board-level parameter and parse its reply value.
    fn mon_board(&mut self, board: u8, param: Parameter) -> Result<ParamValue, S::Error> {
        self.board(board)?;
        let response = self.tx.submit(&Command::board_mon(board, param))?;
        parse_reply(param, &response)
    }

    fn board(&self, board: u8) -> Result<&Board, S::Error> {
        self.model.board(board).ok_or(Error::UnknownBoard(board))
    }

    fn board_mut(&mut self, board: u8) -> Result<&mut Board, S::Error> {
        self.model.board_mut(board).ok_or(Error::UnknownBoard(board))
    }

    fn channel(&self, board: u8, channel: u8) -> Result<&Channel, S::Error> {
        self.board(board)?
            .channel(channel)
            .ok_or(Error::UnknownChannel { board, channel })
    }

    fn channel_mut(&mut self, board: u8, channel: u8) -> Result<&mut Channel, S::Error> {
        self.board_mut(board)?
            .channel_mut(channel)
            .ok_or(Error::UnknownChannel { board, channel })
    }

    fn check_channel(&self, board: u8, channel: u8) -> Result<(), S::Error> {
        self.channel(board, channel).map(|_| ())
    }
}

fn parse_reply<I: embedded_io::Error>(
    param: Parameter,
    response: &crate::transaction::Response,
) -> Result<ParamValue, I> {
    let raw = response
        .first_value()
        .ok_or_else(|| Error::Parse(format!("empty reply for {param}")))?;
    param
        .parse_value(raw)
        .ok_or_else(|| Error::Parse(format!("unparseable {param} value {raw:?}")))
}

fn unresponsive<I: embedded_io::Error>(board: u8, err: Error<I>) -> Error<I> {
    match err {
        Error::Timeout { .. } => {
            warn!("board {board:02} silent during discovery");
            Error::DeviceUnresponsive(board)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock_serial::MockSerial;

    fn test_config() -> SessionConfig {
        SessionConfig {
            boards: vec![BoardConfig { id: 0, channels: 4 }],
            transactor: TransactorConfig {
                timeout: Duration::from_millis(10),
                ..TransactorConfig::default()
            },
        }
    }

    /// Replies for the default discovery sequence: identity, then MAXV
    /// and MAXI for each of the four channels.
    fn queue_discovery(mock: &mut MockSerial) {
        mock.queue_read_data(b"#BD:00,CMD:OK,VAL:N1471\r\n");
        mock.queue_read_data(b"#BD:00,CMD:OK,VAL:1.02\r\n");
        mock.queue_read_data(b"#BD:00,CMD:OK,VAL:00123\r\n");
        for _ in 0..4 {
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:3000.0\r\n");
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:3150.0\r\n");
        }
    }

    fn connected_session() -> Session<MockSerial> {
        let mut mock = MockSerial::new();
        queue_discovery(&mut mock);
        let session = Session::connect(mock, test_config()).unwrap();
        session.with_transport(|mock| mock.clear_written_data());
        session
    }

    #[test]
    fn connect_discovers_identity_and_limits() {
        let mut mock = MockSerial::new();
        queue_discovery(&mut mock);
        let session = Session::connect(mock, test_config()).unwrap();

        let board = session.board(0).unwrap();
        assert_eq!(board.name, "N1471");
        assert_eq!(board.firmware, "1.02");
        assert_eq!(board.serial, "00123");
        let channel = session.channel(0, 3).unwrap();
        assert_eq!(channel.max_voltage, Some(3000.0));
        assert_eq!(channel.max_current, Some(3150.0));

        let lines = session.with_transport(|mock| mock.written_lines());
        assert_eq!(lines[0], "$BD:00,CMD:MON,PAR:BDNAME\r\n");
        assert_eq!(lines[3], "$BD:00,CMD:MON,CH:00,PAR:MAXV\r\n");
        assert_eq!(lines.len(), 11);
    }

    #[test]
    fn connect_fails_on_a_silent_device() {
        let err = match Session::connect(MockSerial::new(), test_config()) {
            Ok(_) => panic!("connect succeeded against a silent device"),
            Err(err) => err,
        };
        assert!(matches!(err, Error::DeviceUnresponsive(0)));
    }

    #[test]
    fn set_voltage_within_the_limit() {
        let session = connected_session();
        session.with_transport(|mock| mock.queue_read_data(b"#BD:00,CMD:OK\r\n"));

        let snapshot = session.set_voltage(0, 0, 1500.0).unwrap();
        assert_eq!(snapshot.vset, Some(1500.0));
        let lines = session.with_transport(|mock| mock.written_lines());
        assert_eq!(lines, vec!["$BD:00,CMD:SET,CH:00,PAR:VSET,VAL:1500.0\r\n"]);
        assert_eq!(session.channel(0, 0).unwrap().vset, Some(1500.0));
    }

    #[test]
    fn set_voltage_above_maxv_never_reaches_the_wire() {
        let session = connected_session();

        let err = session.set_voltage(0, 0, 3500.0).unwrap_err();
        match err {
            Error::Validation { param, value, limit } => {
                assert_eq!(param, Parameter::VSet);
                assert_eq!(value, 3500.0);
                assert_eq!(limit, 3000.0);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(session.with_transport(|mock| mock.written_data().is_empty()));
    }

    #[test]
    fn turn_on_sends_the_action_line() {
        let session = connected_session();
        session.with_transport(|mock| mock.queue_read_data(b"#BD:00,CMD:OK\r\n"));

        session.turn_on(0, 2).unwrap();
        let lines = session.with_transport(|mock| mock.written_lines());
        assert_eq!(lines, vec!["$BD:00,CMD:SET,CH:02,PAR:ON\r\n"]);
    }

    #[test]
    fn unknown_channel_is_rejected_locally() {
        let session = connected_session();
        let err = session.turn_on(0, 4).unwrap_err();
        assert!(matches!(err, Error::UnknownChannel { board: 0, channel: 4 }));
        assert!(session.with_transport(|mock| mock.written_data().is_empty()));
    }

    #[test]
    fn unknown_board_is_rejected_locally() {
        let session = connected_session();
        let err = session.alarm_status(9).unwrap_err();
        assert!(matches!(err, Error::UnknownBoard(9)));
        assert!(session.with_transport(|mock| mock.written_data().is_empty()));
    }

    #[test]
    fn measured_voltage_refreshes_the_cache() {
        let session = connected_session();
        session.with_transport(|mock| mock.queue_read_data(b"#BD:00,CMD:OK,VAL:1499.8\r\n"));

        assert_eq!(session.measured_voltage(0, 1).unwrap(), 1499.8);
        assert_eq!(session.channel(0, 1).unwrap().vmon, Some(1499.8));
    }

    #[test]
    fn channel_status_decodes_the_word() {
        let session = connected_session();
        session.with_transport(|mock| mock.queue_read_data(b"#BD:00,CMD:OK,VAL:3\r\n"));

        let status = session.channel_status(0, 0).unwrap();
        assert!(status.on());
        assert!(status.ramping_up());
        assert!(status.is_enabled());
    }

    #[test]
    fn alarm_round_trip() {
        let session = connected_session();
        session.with_transport(|mock| {
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:18\r\n");
            mock.queue_read_data(b"#BD:00,CMD:OK\r\n");
        });

        let alarm = session.alarm_status(0).unwrap();
        assert!(alarm.channel(1));
        assert!(alarm.power_fail());

        session.clear_alarm(0).unwrap();
        let lines = session.with_transport(|mock| mock.written_lines());
        assert_eq!(lines[1], "$BD:00,CMD:SET,PAR:BDCLR\r\n");
        assert!(!session.board(0).unwrap().alarm.unwrap().any());
    }

    #[test]
    fn channel_setting_getters_refresh_the_cache() {
        let session = connected_session();
        session.with_transport(|mock| {
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:-\r\n");
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:LOW\r\n");
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:KILL\r\n");
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:10.0\r\n");
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:50.0\r\n");
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:25.0\r\n");
        });

        assert_eq!(session.polarity(0, 0).unwrap(), Polarity::Negative);
        assert_eq!(session.monitor_range(0, 0).unwrap(), MonitorRange::Low);
        assert_eq!(session.power_down_mode(0, 0).unwrap(), PowerDownMode::Kill);
        assert_eq!(session.trip_time(0, 0).unwrap(), 10.0);
        assert_eq!(session.ramp_up_rate(0, 0).unwrap(), 50.0);
        assert_eq!(session.ramp_down_rate(0, 0).unwrap(), 25.0);

        let channel = session.channel(0, 0).unwrap();
        assert_eq!(channel.polarity, Some(Polarity::Negative));
        assert_eq!(channel.monitor_range, Some(MonitorRange::Low));
        assert_eq!(channel.power_down, Some(PowerDownMode::Kill));
        assert_eq!(channel.trip_time, Some(10.0));
        assert_eq!(channel.ramp_up, Some(50.0));
        assert_eq!(channel.ramp_down, Some(25.0));

        let lines = session.with_transport(|mock| mock.written_lines());
        assert_eq!(lines[0], "$BD:00,CMD:MON,CH:00,PAR:POL\r\n");
        assert_eq!(lines[1], "$BD:00,CMD:MON,CH:00,PAR:IMRANGE\r\n");
        assert_eq!(lines[2], "$BD:00,CMD:MON,CH:00,PAR:PDWN\r\n");
    }

    #[test]
    fn board_queries_parse_their_words() {
        let session = connected_session();
        session.with_transport(|mock| {
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:ON\r\n");
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:CLOSED\r\n");
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:REMOTE\r\n");
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:OFF\r\n");
        });

        assert_eq!(session.interlock_status(0).unwrap(), State::On);
        assert_eq!(session.interlock_mode(0).unwrap(), InterlockMode::Closed);
        assert_eq!(session.control_mode(0).unwrap(), ControlMode::Remote);
        assert_eq!(session.bus_termination(0).unwrap(), State::Off);
    }

    fn queue_poll(mock: &mut MockSerial, vset: &str, vmon: &str) {
        for _ in 0..4 {
            mock.queue_read_data(format!("#BD:00,CMD:OK,VAL:{vset}\r\n").as_bytes());
            mock.queue_read_data(format!("#BD:00,CMD:OK,VAL:{vmon}\r\n").as_bytes());
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:100.0\r\n");
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:0.5\r\n");
            mock.queue_read_data(b"#BD:00,CMD:OK,VAL:1\r\n");
        }
    }

    #[test]
    fn poll_reports_changes_then_goes_quiet() {
        let session = connected_session();
        session.with_transport(|mock| queue_poll(mock, "1500.0", "1499.8"));

        let deltas = session.poll_once().unwrap();
        assert_eq!(deltas.len(), 4);
        assert_eq!(deltas[0].board, 0);
        assert_eq!(deltas[0].channel, 0);
        assert_eq!(deltas[3].channel, 3);
        assert_eq!(deltas[0].changed.len(), POLL_PARAMS.len());

        // Identical values on the next poll produce no deltas.
        session.with_transport(|mock| queue_poll(mock, "1500.0", "1499.8"));
        assert!(session.poll_once().unwrap().is_empty());

        // A drifting reading reports just the field that moved.
        session.with_transport(|mock| queue_poll(mock, "1500.0", "1500.1"));
        let deltas = session.poll_once().unwrap();
        assert_eq!(deltas.len(), 4);
        assert_eq!(deltas[0].changed, vec![crate::model::ChannelField::VMon]);
    }

    #[test]
    fn poll_queries_in_a_fixed_order() {
        let session = connected_session();
        session.with_transport(|mock| queue_poll(mock, "0.0", "0.0"));
        session.poll_once().unwrap();

        let lines = session.with_transport(|mock| mock.written_lines());
        assert_eq!(lines.len(), 20);
        assert_eq!(lines[0], "$BD:00,CMD:MON,CH:00,PAR:VSET\r\n");
        assert_eq!(lines[1], "$BD:00,CMD:MON,CH:00,PAR:VMON\r\n");
        assert_eq!(lines[4], "$BD:00,CMD:MON,CH:00,PAR:STAT\r\n");
        assert_eq!(lines[5], "$BD:00,CMD:MON,CH:01,PAR:VSET\r\n");
    }

    #[test]
    fn into_transport_returns_the_port() {
        let session = connected_session();
        let mock = session.into_transport();
        assert!(mock.written_data().is_empty());
    }

    #[test]
    fn reconnect_rediscovers_on_the_new_transport() {
        let session = connected_session();

        let mut fresh = MockSerial::new();
        queue_discovery(&mut fresh);
        session.reconnect(fresh).unwrap();

        let lines = session.with_transport(|mock| mock.written_lines());
        assert_eq!(lines[0], "$BD:00,CMD:MON,PAR:BDNAME\r\n");
        assert_eq!(session.board(0).unwrap().name, "N1471");
    }

    #[test]
    fn boards_listed_out_of_order_are_walked_ascending() {
        let mut mock = MockSerial::new();
        // Replies arrive for board 0 first: the session must visit
        // ascending ids even though the config lists board 1 first.
        for board in [b"#BD:00", b"#BD:01"] {
            let mut reply = |tail: &[u8]| {
                let mut line = board.to_vec();
                line.extend_from_slice(tail);
                mock.queue_read_data(&line);
            };
            reply(b",CMD:OK,VAL:N1471\r\n");
            reply(b",CMD:OK,VAL:1.02\r\n");
            reply(b",CMD:OK,VAL:00125\r\n");
            reply(b",CMD:OK,VAL:3000.0\r\n");
            reply(b",CMD:OK,VAL:3150.0\r\n");
        }
        let config = SessionConfig {
            boards: vec![
                BoardConfig { id: 1, channels: 1 },
                BoardConfig { id: 0, channels: 1 },
            ],
            ..test_config()
        };
        let session = Session::connect(mock, config).unwrap();

        let discovery = session.with_transport(|mock| mock.written_lines());
        assert_eq!(discovery[0], "$BD:00,CMD:MON,PAR:BDNAME\r\n");
        assert_eq!(discovery[5], "$BD:01,CMD:MON,PAR:BDNAME\r\n");

        session.with_transport(|mock| {
            mock.clear_written_data();
            for board in ["00", "01"] {
                for _ in 0..POLL_PARAMS.len() {
                    mock.queue_read_data(format!("#BD:{board},CMD:OK,VAL:1\r\n").as_bytes());
                }
            }
        });
        session.poll_once().unwrap();
        let lines = session.with_transport(|mock| mock.written_lines());
        assert_eq!(lines[0], "$BD:00,CMD:MON,CH:00,PAR:VSET\r\n");
        assert_eq!(lines[5], "$BD:01,CMD:MON,CH:00,PAR:VSET\r\n");
    }

    #[test]
    fn multi_board_discovery_addresses_each_board() {
        let mut mock = MockSerial::new();
        // Board 0 with one channel, board 1 with one channel.
        for board in [b"#BD:00", b"#BD:01"] {
            let mut reply = |tail: &[u8]| {
                let mut line = board.to_vec();
                line.extend_from_slice(tail);
                mock.queue_read_data(&line);
            };
            reply(b",CMD:OK,VAL:N1471\r\n");
            reply(b",CMD:OK,VAL:1.02\r\n");
            reply(b",CMD:OK,VAL:00124\r\n");
            reply(b",CMD:OK,VAL:3000.0\r\n");
            reply(b",CMD:OK,VAL:3150.0\r\n");
        }
        let config = SessionConfig {
            boards: vec![
                BoardConfig { id: 0, channels: 1 },
                BoardConfig { id: 1, channels: 1 },
            ],
            ..test_config()
        };
        let session = Session::connect(mock, config).unwrap();

        assert_eq!(session.board(1).unwrap().serial, "00124");
        let lines = session.with_transport(|mock| mock.written_lines());
        assert_eq!(lines[5], "$BD:01,CMD:MON,PAR:BDNAME\r\n");
    }
}
