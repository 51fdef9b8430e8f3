//! Channel Matrix Projector
//!
//! Turns catalog board records into fixed-order channel-capacity vectors for
//! reporting. Channel types a board was never matched against are zeroed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::coverage::BoardCoverage;
use crate::price::de_price;
use crate::schema::{de_opt_string, de_string_or_null, lenient_f64};

/// Channel-type fields in canonical matrix order. The order is part of the
/// output contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelField {
    AnalogInput,
    AnalogOutput,
    DigitalInput,
    DigitalOutput,
    DigitalIo,
    SerialPort,
    CanBus,
    PwmOutput,
    Encoder,
    SsiBus,
    SpiBus,
    I2cBus,
    PcmLvd,
    BissC,
    Afdx,
    PpsPulse,
    RtdResistance,
    DifferentialInput,
    MilStd1553B,
    TimerCounter,
    RelayOutput,
}

impl ChannelField {
    pub const COUNT: usize = 21;

    pub const ALL: [ChannelField; ChannelField::COUNT] = [
        ChannelField::AnalogInput,
        ChannelField::AnalogOutput,
        ChannelField::DigitalInput,
        ChannelField::DigitalOutput,
        ChannelField::DigitalIo,
        ChannelField::SerialPort,
        ChannelField::CanBus,
        ChannelField::PwmOutput,
        ChannelField::Encoder,
        ChannelField::SsiBus,
        ChannelField::SpiBus,
        ChannelField::I2cBus,
        ChannelField::PcmLvd,
        ChannelField::BissC,
        ChannelField::Afdx,
        ChannelField::PpsPulse,
        ChannelField::RtdResistance,
        ChannelField::DifferentialInput,
        ChannelField::MilStd1553B,
        ChannelField::TimerCounter,
        ChannelField::RelayOutput,
    ];

    /// Board record key holding this channel count.
    pub fn key(&self) -> &'static str {
        match self {
            ChannelField::AnalogInput => "analogInputChannels",
            ChannelField::AnalogOutput => "analogOutputChannels",
            ChannelField::DigitalInput => "digitalInputChannels",
            ChannelField::DigitalOutput => "digitalOutputChannels",
            ChannelField::DigitalIo => "digitalIOChannels",
            ChannelField::SerialPort => "serialPortChannels",
            ChannelField::CanBus => "canBusChannels",
            ChannelField::PwmOutput => "pwmOutputChannels",
            ChannelField::Encoder => "encoderChannels",
            ChannelField::SsiBus => "ssiBusChannels",
            ChannelField::SpiBus => "spiBusChannels",
            ChannelField::I2cBus => "i2cBusChannels",
            ChannelField::PcmLvd => "pcmLvdChannels",
            ChannelField::BissC => "bissCChannels",
            ChannelField::Afdx => "afdxChannels",
            ChannelField::PpsPulse => "ppsPulseChannels",
            ChannelField::RtdResistance => "rtdResistanceChannels",
            ChannelField::DifferentialInput => "differentialInputChannels",
            ChannelField::MilStd1553B => "milStd1553BChannels",
            ChannelField::TimerCounter => "timerCounterChannels",
            ChannelField::RelayOutput => "relayOutputChannels",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            ChannelField::AnalogInput => "analog-input",
            ChannelField::AnalogOutput => "analog-output",
            ChannelField::DigitalInput => "digital-input",
            ChannelField::DigitalOutput => "digital-output",
            ChannelField::DigitalIo => "digital-IO",
            ChannelField::SerialPort => "serial-port",
            ChannelField::CanBus => "CAN-bus",
            ChannelField::PwmOutput => "PWM-output",
            ChannelField::Encoder => "encoder",
            ChannelField::SsiBus => "SSI-bus",
            ChannelField::SpiBus => "SPI-bus",
            ChannelField::I2cBus => "I2C-bus",
            ChannelField::PcmLvd => "PCM-LVD",
            ChannelField::BissC => "BISS-C",
            ChannelField::Afdx => "AFDX",
            ChannelField::PpsPulse => "PPS-pulse",
            ChannelField::RtdResistance => "RTD-resistance",
            ChannelField::DifferentialInput => "differential-input",
            ChannelField::MilStd1553B => "MIL-STD-1553B",
            ChannelField::TimerCounter => "timer-counter",
            ChannelField::RelayOutput => "relay-output",
        }
    }

    /// Position in the canonical order.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Resolves a field key (`canBusChannels`), its stem (`canBus`) or its
    /// label (`CAN-bus`), ignoring case and separators.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = fold(name);
        if wanted.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|field| {
            let key = fold(field.key());
            let stem = key.strip_suffix("channels").unwrap_or(&key).to_string();
            wanted == key || wanted == stem || wanted == fold(field.label())
        })
    }
}

impl fmt::Display for ChannelField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn fold(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A catalog board with its per-channel-type capacity fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardRecord {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_string_or_null")]
    pub model: String,
    #[serde(default, deserialize_with = "de_price")]
    pub price_cny: f64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl BoardRecord {
    /// Capacity recorded for `field`; missing, null or non-numeric is 0.
    pub fn capacity(&self, field: ChannelField) -> u32 {
        match self.fields.get(field.key()) {
            None | Some(Value::Null) => 0,
            Some(value) => match lenient_f64(value) {
                Some(count) if count > 0.0 => count.min(f64::from(u32::MAX)) as u32,
                Some(_) => 0,
                None => {
                    tracing::debug!(
                        "Non-numeric {} on board {:?}: {}",
                        field.key(),
                        self.id,
                        value
                    );
                    0
                }
            },
        }
    }
}

/// One board's row in the reporting matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMatrixRow {
    pub matrix: Vec<u32>,
    pub model: String,
    pub price_cny: f64,
    pub id: Option<String>,
}

impl ChannelMatrixRow {
    pub fn get(&self, field: ChannelField) -> u32 {
        self.matrix.get(field.index()).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelMatrixProjector;

impl ChannelMatrixProjector {
    pub fn new() -> Self {
        Self
    }

    /// Projects `boards` onto the canonical channel order, zeroing every field
    /// named in the board's `not_satisfied` list.
    pub fn project(&self, boards: &[BoardRecord], coverage: &[BoardCoverage]) -> Vec<ChannelMatrixRow> {
        let mut nulled: HashMap<&str, HashSet<ChannelField>> = HashMap::new();
        for entry in coverage {
            let fields = nulled.entry(entry.id.as_str()).or_default();
            for name in &entry.not_satisfied {
                match ChannelField::from_name(name) {
                    Some(field) => {
                        fields.insert(field);
                    }
                    None => tracing::debug!(
                        "Unsatisfied type '{}' on board {} is not a matrix channel",
                        name,
                        entry.id
                    ),
                }
            }
        }

        boards
            .iter()
            .map(|board| {
                let zeroed = board.id.as_deref().and_then(|id| nulled.get(id));
                let matrix = ChannelField::ALL
                    .iter()
                    .map(|field| match zeroed {
                        Some(set) if set.contains(field) => 0,
                        _ => board.capacity(*field),
                    })
                    .collect();
                ChannelMatrixRow {
                    matrix,
                    model: board.model.clone(),
                    price_cny: board.price_cny,
                    id: board.id.clone(),
                }
            })
            .collect()
    }
}
