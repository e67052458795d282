//! The closed set of protocol parameters and the commands built from them.
//!
//! Every field the device understands is a variant here, so nothing past
//! the codec ever touches a raw parameter string. The wire names come from
//! the CAEN N1471/DT1471ET command set (`VSET`, `BDNAME`, ...).

use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::status::{BoardAlarm, ChannelStatus};

/// Protocol verb: query (`MON`) or assign (`SET`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum Verb {
    /// Query a parameter. Idempotent, safe to retry.
    #[strum(serialize = "MON")]
    Mon,
    /// Assign a parameter or fire a board action.
    #[strum(serialize = "SET")]
    Set,
}

/// All parameters understood by the N1471/DT1471ET, board- and
/// channel-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Parameter {
    /// __R/W__ - Target voltage in volts.
    VSet,
    /// __R__ - Measured output voltage in volts.
    VMon,
    /// __R/W__ - Current limit in micro-amps.
    ISet,
    /// __R__ - Measured output current in micro-amps.
    IMon,
    /// __R/W__ - Software voltage limit in volts.
    MaxV,
    /// __R__ - Hardware current bound in micro-amps.
    MaxI,
    /// __R__ - Channel status word. See [`ChannelStatus`].
    Stat,
    /// __R/W__ - Ramp-up rate in V/s.
    Rup,
    /// __R/W__ - Ramp-down rate in V/s.
    Rdw,
    /// __R/W__ - Time in seconds before an over-current trips the channel.
    Trip,
    /// __R/W__ - Behaviour on power-down: `RAMP` or `KILL`.
    Pdwn,
    /// __R__ - Output polarity, `+` or `-`. Set with a jumper on the board.
    Pol,
    /// __R/W__ - Current monitor range, `HIGH` or `LOW`.
    ImRange,
    /// __W__ - Switch the channel on. No value.
    On,
    /// __W__ - Switch the channel off. No value.
    Off,
    /// __R__ - Board model name, e.g. `N1471`.
    BdName,
    /// __R__ - Firmware release string.
    BdFRel,
    /// __R__ - Board serial number.
    BdSNum,
    /// __R__ - Interlock status, `ON` or `OFF`.
    BdIlk,
    /// __R/W__ - Interlock mode, `OPEN` or `CLOSED`.
    BdIlkM,
    /// __R__ - Control mode, `LOCAL` or `REMOTE`. Set on the front panel.
    BdCtr,
    /// __R__ - Local bus termination, `ON` or `OFF`.
    BdTerm,
    /// __R__ - Board alarm word. See [`BoardAlarm`].
    BdAlarm,
    /// __W__ - Clear the board alarm. No value.
    BdClr,
}

/// How a parameter's reply value is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Float,
    Status,
    Alarm,
    Polarity,
    Range,
    Switch,
    PowerDown,
    Interlock,
    Control,
    Text,
    /// Write-only actions (`ON`, `OFF`, `BDCLR`) never carry a value.
    None,
}

impl Parameter {
    /// Board-level parameters are addressed without a `CH:` field.
    pub fn is_board_level(&self) -> bool {
        use Parameter::*;
        matches!(
            self,
            BdName | BdFRel | BdSNum | BdIlk | BdIlkM | BdCtr | BdTerm | BdAlarm | BdClr
        )
    }

    /// Whether the parameter accepts a `SET` command at all.
    pub fn is_settable(&self) -> bool {
        use Parameter::*;
        matches!(
            self,
            VSet | ISet | MaxV | Rup | Rdw | Trip | Pdwn | ImRange | On | Off | BdIlkM | BdClr
        )
    }

    /// Whether the parameter answers a `MON` command.
    pub fn is_monitorable(&self) -> bool {
        use Parameter::*;
        !matches!(self, On | Off | BdClr)
    }

    /// Write-only actions carry no `VAL:` field.
    pub fn is_action(&self) -> bool {
        use Parameter::*;
        matches!(self, On | Off | BdClr)
    }

    /// The value type this parameter reports in a `MON` reply.
    pub fn value_kind(&self) -> ValueKind {
        use Parameter::*;
        match self {
            VSet | VMon | ISet | IMon | MaxV | MaxI | Rup | Rdw | Trip => ValueKind::Float,
            Stat => ValueKind::Status,
            BdAlarm => ValueKind::Alarm,
            Pol => ValueKind::Polarity,
            ImRange => ValueKind::Range,
            BdIlk | BdTerm => ValueKind::Switch,
            Pdwn => ValueKind::PowerDown,
            BdIlkM => ValueKind::Interlock,
            BdCtr => ValueKind::Control,
            BdName | BdFRel | BdSNum => ValueKind::Text,
            On | Off | BdClr => ValueKind::None,
        }
    }

    /// Parse a raw reply value into its typed form, or `None` if the text
    /// does not fit the parameter's convention.
    pub fn parse_value(&self, raw: &str) -> Option<ParamValue> {
        let raw = raw.trim();
        match self.value_kind() {
            ValueKind::Float => raw.parse::<f64>().ok().map(ParamValue::Float),
            ValueKind::Status => raw
                .parse::<u16>()
                .ok()
                .map(|word| ParamValue::Status(ChannelStatus::from_word(word))),
            ValueKind::Alarm => raw
                .parse::<u16>()
                .ok()
                .map(|word| ParamValue::Alarm(BoardAlarm::from_word(word))),
            ValueKind::Polarity => raw.parse().ok().map(ParamValue::Polarity),
            ValueKind::Range => raw.parse().ok().map(ParamValue::Range),
            ValueKind::Switch => raw.parse().ok().map(ParamValue::Switch),
            ValueKind::PowerDown => raw.parse().ok().map(ParamValue::PowerDown),
            ValueKind::Interlock => raw.parse().ok().map(ParamValue::Interlock),
            ValueKind::Control => raw.parse().ok().map(ParamValue::Control),
            ValueKind::Text => Some(ParamValue::Text(raw.to_string())),
            ValueKind::None => None,
        }
    }
}

/// Used to be less ambiguous about whether something is on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, AsRefStr, Display)]
pub enum State {
    /// Disabled.
    #[default]
    #[strum(serialize = "OFF")]
    Off,
    /// Enabled.
    #[strum(serialize = "ON")]
    On,
}

impl From<State> for bool {
    fn from(value: State) -> Self {
        match value {
            State::Off => false,
            State::On => true,
        }
    }
}

impl From<bool> for State {
    fn from(value: bool) -> Self {
        match value {
            true => State::On,
            false => State::Off,
        }
    }
}

/// Output polarity of a channel, fixed per board by a hardware jumper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
pub enum Polarity {
    #[strum(serialize = "+")]
    Positive,
    #[strum(serialize = "-")]
    Negative,
}

/// Current monitor range (`IMRANGE`). `LOW` trades range for resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
pub enum MonitorRange {
    #[strum(serialize = "HIGH")]
    High,
    #[strum(serialize = "LOW")]
    Low,
}

/// How a channel powers down when switched off or tripped (`PDWN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
pub enum PowerDownMode {
    /// Ramp down at the configured `RDW` rate.
    #[strum(serialize = "RAMP")]
    Ramp,
    /// Drop the output immediately.
    #[strum(serialize = "KILL")]
    Kill,
}

/// Interlock mode of the board (`BDILKM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
pub enum InterlockMode {
    #[strum(serialize = "OPEN")]
    Open,
    #[strum(serialize = "CLOSED")]
    Closed,
}

/// Whether the board obeys the front panel or the serial interface
/// (`BDCTR`). Only switchable on the device itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
pub enum ControlMode {
    #[strum(serialize = "LOCAL")]
    Local,
    #[strum(serialize = "REMOTE")]
    Remote,
}

/// A typed reply value, resolved once when a reply is matched to its
/// request.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Status(ChannelStatus),
    Alarm(BoardAlarm),
    Polarity(Polarity),
    Range(MonitorRange),
    Switch(State),
    PowerDown(PowerDownMode),
    Interlock(InterlockMode),
    Control(ControlMode),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_status(&self) -> Option<ChannelStatus> {
        match self {
            ParamValue::Status(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A value to transmit with a `SET` command, formatted per the
/// parameter's numeric convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Voltages, currents, ramp rates and trip times. Rendered as
    /// fixed-point with one decimal, matching the device's parser.
    Float(f64),
    /// Plain integers.
    Int(u32),
    Range(MonitorRange),
    PowerDown(PowerDownMode),
    Interlock(InterlockMode),
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{v:.1}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Range(r) => f.write_str(r.as_ref()),
            Value::PowerDown(m) => f.write_str(m.as_ref()),
            Value::Interlock(m) => f.write_str(m.as_ref()),
        }
    }
}

/// One request to a board: verb, parameter, optional channel and value.
///
/// Owned by the transactor while in flight and discarded after the
/// transaction reaches a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub board: u8,
    pub verb: Verb,
    pub channel: Option<u8>,
    pub param: Parameter,
    pub value: Option<Value>,
}

impl Command {
    /// Query a channel parameter.
    pub fn mon(board: u8, channel: u8, param: Parameter) -> Self {
        Self {
            board,
            verb: Verb::Mon,
            channel: Some(channel),
            param,
            value: None,
        }
    }

    /// Query a board-level parameter.
    pub fn board_mon(board: u8, param: Parameter) -> Self {
        Self {
            board,
            verb: Verb::Mon,
            channel: None,
            param,
            value: None,
        }
    }

    /// Assign a channel parameter.
    pub fn set(board: u8, channel: u8, param: Parameter, value: Value) -> Self {
        Self {
            board,
            verb: Verb::Set,
            channel: Some(channel),
            param,
            value: Some(value),
        }
    }

    /// Fire a valueless channel action (`ON`, `OFF`).
    pub fn action(board: u8, channel: u8, param: Parameter) -> Self {
        Self {
            board,
            verb: Verb::Set,
            channel: Some(channel),
            param,
            value: None,
        }
    }

    /// Assign a board-level parameter.
    pub fn board_set(board: u8, param: Parameter, value: Value) -> Self {
        Self {
            board,
            verb: Verb::Set,
            channel: None,
            param,
            value: Some(value),
        }
    }

    /// Fire a valueless board action (`BDCLR`).
    pub fn board_action(board: u8, param: Parameter) -> Self {
        Self {
            board,
            verb: Verb::Set,
            channel: None,
            param,
            value: None,
        }
    }
}
