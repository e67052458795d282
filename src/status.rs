//! Status words reported by the board, decoded into bitfields.
//!
//! Decoding is total: every bit of the raw word maps to a named flag or
//! the reserved bucket, so an unexpected word can never fail to decode.

use modular_bitfield::prelude::*;

/// Channel status word (`STAT`).
///
/// Bit layout per the N1471 command set; `reserved` covers the two
/// undocumented top bits.
#[bitfield]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Output is on.
    pub on: bool,
    /// Output is ramping up towards `VSET`.
    pub ramping_up: bool,
    /// Output is ramping down.
    pub ramping_down: bool,
    /// Channel is in over-current.
    pub over_current: bool,
    /// Channel is in over-voltage.
    pub over_voltage: bool,
    /// Channel is in under-voltage.
    pub under_voltage: bool,
    /// Output reached the `MAXV` software limit.
    pub max_voltage: bool,
    /// Channel tripped.
    pub tripped: bool,
    /// Output exceeds the power limit.
    pub over_power: bool,
    /// Board over-temperature.
    pub over_temperature: bool,
    /// Channel is disabled.
    pub disabled: bool,
    /// Channel was killed.
    pub killed: bool,
    /// Channel is held off by the interlock.
    pub interlocked: bool,
    /// Calibration data is missing or corrupt.
    pub calibration_error: bool,
    pub reserved: B2,
}

impl ChannelStatus {
    /// Decode a raw `STAT` word.
    pub fn from_word(word: u16) -> Self {
        Self::from_bytes(word.to_le_bytes())
    }

    /// The raw word, for callers that want to persist or compare it.
    pub fn to_word(self) -> u16 {
        u16::from_le_bytes(self.into_bytes())
    }

    /// Whether the channel is effectively powered: already on, or still
    /// ramping towards the target.
    pub fn is_enabled(&self) -> bool {
        self.on() || self.ramping_up()
    }
}

impl core::fmt::Debug for ChannelStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ChannelStatus({:#06x})", self.to_word())
    }
}

/// Board alarm word (`BDALARM`).
#[bitfield]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BoardAlarm {
    /// Channel 0 raised an alarm.
    pub ch0: bool,
    /// Channel 1 raised an alarm.
    pub ch1: bool,
    /// Channel 2 raised an alarm.
    pub ch2: bool,
    /// Channel 3 raised an alarm.
    pub ch3: bool,
    /// Board power supply failure.
    pub power_fail: bool,
    /// Board over-power condition.
    pub over_power: bool,
    /// Internal HV clock failure.
    pub hv_clock_fail: bool,
    pub reserved: B9,
}

impl BoardAlarm {
    /// Decode a raw `BDALARM` word.
    pub fn from_word(word: u16) -> Self {
        Self::from_bytes(word.to_le_bytes())
    }

    pub fn to_word(self) -> u16 {
        u16::from_le_bytes(self.into_bytes())
    }

    /// Alarm flag for a channel by index.
    pub fn channel(&self, index: u8) -> bool {
        match index {
            0 => self.ch0(),
            1 => self.ch1(),
            2 => self.ch2(),
            3 => self.ch3(),
            _ => false,
        }
    }

    /// Whether any alarm bit is raised.
    pub fn any(&self) -> bool {
        self.to_word() & 0x007f != 0
    }
}

impl core::fmt::Debug for BoardAlarm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "BoardAlarm({:#06x})", self.to_word())
    }
}
