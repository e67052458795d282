//! Cached view of the boards on the serial bus.
//!
//! The model is filled in by discovery and refreshed by polling. Every
//! field starts out unknown and becomes `Some` once the device has
//! answered the corresponding query. Set commands are validated against
//! the cached limits before anything touches the wire.

use crate::command::{
    ControlMode, InterlockMode, MonitorRange, ParamValue, Parameter, Polarity, PowerDownMode,
    State,
};
use crate::error::{Error, Result};
use crate::status::{BoardAlarm, ChannelStatus};

/// Ramp rate bounds in V/s accepted by the hardware.
const RAMP_RATE_MIN: f64 = 1.0;
const RAMP_RATE_MAX: f64 = 500.0;

/// Trip time bound in seconds. `1000.0` means infinite on the device.
const TRIP_TIME_MAX: f64 = 1000.0;

/// One output channel's cached state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Channel {
    pub vset: Option<f64>,
    pub vmon: Option<f64>,
    pub iset: Option<f64>,
    pub imon: Option<f64>,
    /// Software voltage limit learnt at discovery. `VSET` values are
    /// checked against it before transmission.
    pub max_voltage: Option<f64>,
    /// Hardware current bound learnt at discovery.
    pub max_current: Option<f64>,
    pub status: Option<ChannelStatus>,
    pub polarity: Option<Polarity>,
    pub ramp_up: Option<f64>,
    pub ramp_down: Option<f64>,
    pub trip_time: Option<f64>,
    pub power_down: Option<PowerDownMode>,
    pub monitor_range: Option<MonitorRange>,
}

/// Channel fields a poll can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelField {
    VSet,
    VMon,
    ISet,
    IMon,
    MaxVoltage,
    MaxCurrent,
    Status,
    Polarity,
    RampUp,
    RampDown,
    TripTime,
    PowerDown,
    MonitorRange,
}

impl Channel {
    /// Fold a reply value into the cache. Returns the field that changed,
    /// or `None` when the cached value was already current or the
    /// parameter does not belong to a channel.
    pub fn apply(&mut self, param: Parameter, value: &ParamValue) -> Option<ChannelField> {
        fn update<T: PartialEq + Clone>(slot: &mut Option<T>, new: &T) -> bool {
            if slot.as_ref() == Some(new) {
                false
            } else {
                *slot = Some(new.clone());
                true
            }
        }

        let changed = match (param, value) {
            (Parameter::VSet, ParamValue::Float(v)) => {
                update(&mut self.vset, v).then_some(ChannelField::VSet)
            }
            (Parameter::VMon, ParamValue::Float(v)) => {
                update(&mut self.vmon, v).then_some(ChannelField::VMon)
            }
            (Parameter::ISet, ParamValue::Float(v)) => {
                update(&mut self.iset, v).then_some(ChannelField::ISet)
            }
            (Parameter::IMon, ParamValue::Float(v)) => {
                update(&mut self.imon, v).then_some(ChannelField::IMon)
            }
            (Parameter::MaxV, ParamValue::Float(v)) => {
                update(&mut self.max_voltage, v).then_some(ChannelField::MaxVoltage)
            }
            (Parameter::MaxI, ParamValue::Float(v)) => {
                update(&mut self.max_current, v).then_some(ChannelField::MaxCurrent)
            }
            (Parameter::Stat, ParamValue::Status(s)) => {
                update(&mut self.status, s).then_some(ChannelField::Status)
            }
            (Parameter::Pol, ParamValue::Polarity(p)) => {
                update(&mut self.polarity, p).then_some(ChannelField::Polarity)
            }
            (Parameter::Rup, ParamValue::Float(v)) => {
                update(&mut self.ramp_up, v).then_some(ChannelField::RampUp)
            }
            (Parameter::Rdw, ParamValue::Float(v)) => {
                update(&mut self.ramp_down, v).then_some(ChannelField::RampDown)
            }
            (Parameter::Trip, ParamValue::Float(v)) => {
                update(&mut self.trip_time, v).then_some(ChannelField::TripTime)
            }
            (Parameter::Pdwn, ParamValue::PowerDown(m)) => {
                update(&mut self.power_down, m).then_some(ChannelField::PowerDown)
            }
            (Parameter::ImRange, ParamValue::Range(r)) => {
                update(&mut self.monitor_range, r).then_some(ChannelField::MonitorRange)
            }
            _ => None,
        };
        changed
    }
}

/// Fields a channel poll found changed since the previous poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDelta {
    pub board: u8,
    pub channel: u8,
    pub changed: Vec<ChannelField>,
}

impl ChannelDelta {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

/// One board's cached state, identity included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Board {
    pub id: u8,
    /// Model name reported by `BDNAME`, e.g. `N1471`.
    pub name: String,
    /// Firmware release reported by `BDFREL`.
    pub firmware: String,
    /// Serial number reported by `BDSNUM`.
    pub serial: String,
    pub interlock: Option<State>,
    pub interlock_mode: Option<InterlockMode>,
    pub control: Option<ControlMode>,
    pub termination: Option<State>,
    pub alarm: Option<BoardAlarm>,
    channels: Vec<Channel>,
}

impl Board {
    pub fn new(id: u8, channel_count: u8) -> Self {
        Self {
            id,
            channels: vec![Channel::default(); channel_count as usize],
            ..Self::default()
        }
    }

    pub fn channel_count(&self) -> u8 {
        self.channels.len() as u8
    }

    pub fn channel(&self, index: u8) -> Option<&Channel> {
        self.channels.get(index as usize)
    }

    pub fn channel_mut(&mut self, index: u8) -> Option<&mut Channel> {
        self.channels.get_mut(index as usize)
    }

    /// Fold a board-level reply value into the cache.
    pub fn apply(&mut self, param: Parameter, value: &ParamValue) {
        match (param, value) {
            (Parameter::BdName, ParamValue::Text(s)) => self.name = s.clone(),
            (Parameter::BdFRel, ParamValue::Text(s)) => self.firmware = s.clone(),
            (Parameter::BdSNum, ParamValue::Text(s)) => self.serial = s.clone(),
            (Parameter::BdIlk, ParamValue::Switch(s)) => self.interlock = Some(*s),
            (Parameter::BdIlkM, ParamValue::Interlock(m)) => self.interlock_mode = Some(*m),
            (Parameter::BdCtr, ParamValue::Control(m)) => self.control = Some(*m),
            (Parameter::BdTerm, ParamValue::Switch(s)) => self.termination = Some(*s),
            (Parameter::BdAlarm, ParamValue::Alarm(a)) => self.alarm = Some(*a),
            _ => {}
        }
    }

    /// Check a numeric set value against the cached limits before it is
    /// transmitted. `VSET` is bounded by the channel's `MAXV`, `ISET` by
    /// its `MAXI`; ramp rates and trip time use the hardware ranges.
    pub fn validate_set<I: embedded_io::Error>(
        &self,
        channel: u8,
        param: Parameter,
        value: f64,
    ) -> Result<(), I> {
        let reject = |limit: f64| {
            Err(Error::Validation {
                param,
                value,
                limit,
            })
        };
        if value < 0.0 {
            return reject(0.0);
        }
        let chan = self.channel(channel);
        match param {
            Parameter::VSet => {
                if let Some(limit) = chan.and_then(|c| c.max_voltage)
                    && value > limit
                {
                    return reject(limit);
                }
            }
            Parameter::ISet => {
                if let Some(limit) = chan.and_then(|c| c.max_current)
                    && value > limit
                {
                    return reject(limit);
                }
            }
            Parameter::Rup | Parameter::Rdw => {
                if !(RAMP_RATE_MIN..=RAMP_RATE_MAX).contains(&value) {
                    return reject(RAMP_RATE_MAX);
                }
            }
            Parameter::Trip => {
                if value > TRIP_TIME_MAX {
                    return reject(TRIP_TIME_MAX);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// The cached state of every board the session talks to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceModel {
    boards: Vec<Board>,
}

impl DeviceModel {
    /// Boards are held in ascending id order regardless of the order
    /// they were configured in, so discovery and polling always walk the
    /// bus deterministically.
    pub fn new(mut boards: Vec<Board>) -> Self {
        boards.sort_by_key(|b| b.id);
        Self { boards }
    }

    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    pub fn board(&self, id: u8) -> Option<&Board> {
        self.boards.iter().find(|b| b.id == id)
    }

    pub fn board_mut(&mut self, id: u8) -> Option<&mut Board> {
        self.boards.iter_mut().find(|b| b.id == id)
    }
}
