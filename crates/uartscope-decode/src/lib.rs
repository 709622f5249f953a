//! UART line model: frame configuration, transmitter and receiver state machines.

pub mod frame;
pub mod tx;
pub mod uart;

pub use frame::{
    bytes_of, nearest_standard_baud, validate_baud, ConfigError, FrameConfig, FrameConfigPatch,
    Parity, BAUD_RATES, DEFAULT_BAUD_RATE, MAX_BAUD,
};
pub use tx::{Transmitter, TxState};
pub use uart::{Receiver, RxErrorKind, RxEvent, RxState, UartChar};

use serde::{Deserialize, Serialize};

/// Logic level on the line. Idle is high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    Low,
    #[default]
    High,
}

impl Level {
    pub fn from_bit(bit: u8) -> Self {
        if bit & 1 == 1 {
            Level::High
        } else {
            Level::Low
        }
    }

    pub fn bit(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

/// Receiver decision marker attached to a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dot {
    #[default]
    None,
    Start,
    Error,
    Data,
    Stop,
    Parity,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRate(pub f64); // Hz

impl SampleRate {
    /// Lowest rate the driver will ever step at.
    pub const FLOOR_HZ: f64 = 60.0;
    /// Samples taken per bit period at the faster of the two link rates.
    pub const SAMPLES_PER_BIT: f64 = 10.0;

    /// Rate that oversamples the faster side of the link enough for the vote window.
    pub fn for_link(tx_baud: f64, rx_baud: f64) -> Self {
        let fastest = tx_baud.max(rx_baud);
        SampleRate((fastest * Self::SAMPLES_PER_BIT).max(Self::FLOOR_HZ))
    }

    pub fn dt(&self) -> f64 {
        1.0 / self.0
    }

    /// Number of steps needed to cover one host tick at `host_hz`.
    pub fn steps_per_tick(&self, host_hz: f64) -> usize {
        (self.0 / host_hz).ceil() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSpan {
    pub start_s: f64,
    pub end_s: f64,
}

impl TimeSpan {
    /// Span ending at `end_s` wide enough to show `frames` ten-bit frames at `baud`.
    pub fn frames_ending_at(end_s: f64, baud: f64, frames: u32) -> Self {
        let width = (10.0 * frames as f64) / baud;
        Self {
            start_s: (end_s - width).max(0.0),
            end_s,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_s - self.start_s
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start_s && t <= self.end_s
    }
}
