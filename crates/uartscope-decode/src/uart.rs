use std::collections::VecDeque;

use log::{trace, warn};
use serde::{Deserialize, Serialize};

use crate::frame::{validate_baud, ConfigError, FrameConfig};
use crate::{Dot, Level};

/// Votes are only taken between these bit phases, away from the edges.
const VOTE_WINDOW_START: f64 = 0.2;
const VOTE_WINDOW_END: f64 = 0.8;

/// One recovered character. `error` is set when the frame it came from was
/// damaged; the byte is still whatever was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartChar {
    pub byte: u8,
    pub error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RxErrorKind {
    #[serde(rename = "PARITY_ERROR")]
    Parity,
    #[serde(rename = "FRAMING_ERROR")]
    Framing,
    #[serde(rename = "BREAK")]
    Break,
}

impl std::fmt::Display for RxErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RxErrorKind::Parity => "parity error",
            RxErrorKind::Framing => "framing error",
            RxErrorKind::Break => "break",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxEvent {
    Data(UartChar),
    Error(RxErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Hunting,
    Sampling,
}

/// Asynchronous receiver: finds the start edge, then decides each bit by
/// majority vote over the middle of its period.
///
/// The bit duration and frame layout are latched on the start edge, so host
/// changes only affect the next frame.
pub struct Receiver {
    state: RxState,
    time_since_start: f64,
    last_level: Level,
    baud: f64,
    config: FrameConfig,
    bit_duration: f64,
    frame: FrameConfig,
    rx_buffer: u8,
    vote_sum: u32,
    vote_count: u32,
    data_emitted: bool,
    events: VecDeque<RxEvent>,
}

impl Receiver {
    pub fn new(baud: f64, config: FrameConfig) -> Result<Self, ConfigError> {
        let baud = validate_baud(baud)?;
        config.validate()?;
        Ok(Self {
            state: RxState::Hunting,
            time_since_start: 0.0,
            last_level: Level::High,
            baud,
            config,
            bit_duration: 1.0 / baud,
            frame: config,
            rx_buffer: 0,
            vote_sum: 0,
            vote_count: 0,
            data_emitted: false,
            events: VecDeque::new(),
        })
    }

    pub fn set_baud(&mut self, baud: f64) -> Result<(), ConfigError> {
        self.baud = validate_baud(baud)?;
        Ok(())
    }

    pub fn set_config(&mut self, config: FrameConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn baud(&self) -> f64 {
        self.baud
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// Returns to hunting and drops any undelivered events.
    pub fn reset(&mut self) {
        self.state = RxState::Hunting;
        self.time_since_start = 0.0;
        self.last_level = Level::High;
        self.rx_buffer = 0;
        self.vote_sum = 0;
        self.vote_count = 0;
        self.data_emitted = false;
        self.events.clear();
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn drain_events(&mut self) -> std::collections::vec_deque::Drain<'_, RxEvent> {
        self.events.drain(..)
    }

    /// Feeds one sample taken `dt` seconds after the previous one.
    pub fn tick(&mut self, dt: f64, level: Level) -> Dot {
        match self.state {
            RxState::Hunting => {
                if self.last_level == Level::High && level == Level::Low {
                    self.begin_frame();
                }
                self.last_level = level;
                Dot::None
            }
            RxState::Sampling => self.sample(dt, level),
        }
    }

    fn begin_frame(&mut self) {
        self.state = RxState::Sampling;
        self.bit_duration = 1.0 / self.baud;
        self.frame = self.config;
        self.time_since_start = 0.0;
        self.rx_buffer = 0;
        self.data_emitted = false;
        self.vote_sum = 0;
        self.vote_count = 0;
    }

    fn sample(&mut self, dt: f64, level: Level) -> Dot {
        let bit = self.bit_duration;
        let prev = self.time_since_start.max(0.0);
        self.time_since_start += dt;
        self.last_level = level;

        let phase = (self.time_since_start % bit) / bit;
        let prev_phase = (prev % bit) / bit;

        if prev_phase < VOTE_WINDOW_START && phase >= VOTE_WINDOW_START {
            self.vote_sum = 0;
            self.vote_count = 0;
        }
        if phase > VOTE_WINDOW_START && phase < VOTE_WINDOW_END {
            self.vote_sum += u32::from(level.bit());
            self.vote_count += 1;
        }

        let timeout = (self.frame.total_bits() as f64 + 0.5) * bit;
        if self.time_since_start > timeout {
            if level == Level::Low {
                warn!("rx break: line low past frame timeout");
                self.events.push_back(RxEvent::Error(RxErrorKind::Break));
            }
            self.state = RxState::Hunting;
            return Dot::None;
        }

        // decision points sit at the centre of each bit
        let prev_index = (prev / bit - 0.5).floor();
        let index = (self.time_since_start / bit - 0.5).floor();
        if index <= prev_index || index < 0.0 {
            return Dot::None;
        }

        let sampled = if self.vote_count > 0 {
            if self.vote_sum as f64 / self.vote_count as f64 >= 0.5 {
                Level::High
            } else {
                Level::Low
            }
        } else {
            level
        };

        self.decide(index as u32, sampled)
    }

    fn decide(&mut self, index: u32, sampled: Level) -> Dot {
        let data_bits = self.frame.data_bits as u32;

        if index == 0 {
            return Dot::Start;
        }

        if index <= data_bits {
            if sampled == Level::High {
                self.rx_buffer |= 1 << (index - 1);
            }
            return Dot::Data;
        }

        let mut first_stop = data_bits + 1;
        if let Some(expected) = self.frame.parity_bit(self.rx_buffer) {
            if index == data_bits + 1 {
                if sampled != expected {
                    warn!("rx parity error on {:#04x}", self.rx_buffer);
                    self.emit_data_once(true);
                    self.events.push_back(RxEvent::Error(RxErrorKind::Parity));
                    return Dot::Error;
                }
                return Dot::Parity;
            }
            first_stop += 1;
        }

        if sampled == Level::Low {
            warn!("rx framing error on {:#04x}", self.rx_buffer);
            self.emit_data_once(true);
            self.events.push_back(RxEvent::Error(RxErrorKind::Framing));
            self.state = RxState::Hunting;
            return Dot::Error;
        }

        let last_stop = first_stop + self.frame.stop_bits as u32 - 1;
        if index == last_stop {
            if self.emit_data_once(false) {
                trace!("rx frame complete: {:#04x}", self.rx_buffer);
            }
            self.state = RxState::Hunting;
        }
        Dot::Stop
    }

    /// Queues the byte decoded so far unless this frame already produced one.
    /// Returns whether it queued anything.
    fn emit_data_once(&mut self, error: bool) -> bool {
        if self.data_emitted {
            return false;
        }
        self.data_emitted = true;
        self.events.push_back(RxEvent::Data(UartChar {
            byte: self.rx_buffer,
            error,
        }));
        true
    }
}
