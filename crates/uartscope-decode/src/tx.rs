use std::collections::VecDeque;

use log::trace;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::frame::{validate_baud, ConfigError, FrameConfig};
use crate::Level;

/// Printable ASCII range used for generated traffic.
const AUTO_BYTES: std::ops::RangeInclusive<u8> = 33..=126;

/// Idle time, in bit periods, after which a finished burst is reported.
const COMPLETE_AFTER_BITS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Start,
    Data,
    Parity,
    Stop,
}

/// Serializes queued bytes onto the line, one level per tick.
///
/// Baud rate and framing set by the host apply to the next frame; the frame
/// on the wire keeps the values latched when it started.
pub struct Transmitter {
    state: TxState,
    bit_index: u8,
    stop_count: u8,
    current_byte: u8,
    time_in_state: f64,
    baud: f64,
    bit_duration: f64,
    config: FrameConfig,
    frame: FrameConfig,
    queue: VecDeque<u8>,
    auto: bool,
    rng: ChaCha8Rng,
    complete_sent: bool,
    frames_started: u64,
}

impl Transmitter {
    pub fn new(baud: f64, config: FrameConfig) -> Result<Self, ConfigError> {
        Self::build(baud, config, ChaCha8Rng::from_entropy())
    }

    /// Same as [`Transmitter::new`] with reproducible auto traffic.
    pub fn with_seed(baud: f64, config: FrameConfig, seed: u64) -> Result<Self, ConfigError> {
        Self::build(baud, config, ChaCha8Rng::seed_from_u64(seed))
    }

    fn build(baud: f64, config: FrameConfig, rng: ChaCha8Rng) -> Result<Self, ConfigError> {
        let baud = validate_baud(baud)?;
        config.validate()?;
        Ok(Self {
            state: TxState::Idle,
            bit_index: 0,
            stop_count: 0,
            current_byte: 0,
            time_in_state: 0.0,
            baud,
            bit_duration: 1.0 / baud,
            config,
            frame: config,
            queue: VecDeque::new(),
            auto: false,
            rng,
            complete_sent: true,
            frames_started: 0,
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

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn set_auto(&mut self, enabled: bool) {
        self.auto = enabled;
    }

    pub fn is_auto(&self) -> bool {
        self.auto
    }

    pub fn enqueue(&mut self, byte: u8) {
        self.queue.push_back(byte);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn frames_started(&self) -> u64 {
        self.frames_started
    }

    /// Drops pending bytes and returns the line to idle.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.state = TxState::Idle;
        self.bit_index = 0;
        self.stop_count = 0;
        self.time_in_state = 0.0;
        self.complete_sent = true;
        self.frames_started = 0;
    }

    /// Advances by `dt` seconds and returns the level driven onto the line.
    pub fn tick(&mut self, dt: f64) -> Level {
        if self.state == TxState::Idle {
            self.time_in_state += dt;

            let guard = self.config.idle_bits / self.baud;
            if self.time_in_state < guard {
                return Level::High;
            }

            if let Some(byte) = self.queue.pop_front() {
                self.start_transmission(byte);
            } else if self.auto {
                let byte = self.rng.gen_range(AUTO_BYTES);
                self.start_transmission(byte);
            }
            return Level::High;
        }

        self.time_in_state += dt;
        if self.time_in_state >= self.bit_duration {
            self.time_in_state -= self.bit_duration;
            self.advance();
        }

        self.level()
    }

    fn start_transmission(&mut self, byte: u8) {
        trace!("tx frame start: {byte:#04x}");
        self.current_byte = byte;
        self.frame = self.config;
        self.bit_duration = 1.0 / self.baud;
        self.state = TxState::Start;
        self.time_in_state = 0.0;
        self.bit_index = 0;
        self.stop_count = 0;
        self.complete_sent = false;
        self.frames_started += 1;
    }

    fn advance(&mut self) {
        match self.state {
            TxState::Idle => {}
            TxState::Start => {
                self.state = TxState::Data;
                self.bit_index = 0;
            }
            TxState::Data => {
                self.bit_index += 1;
                if self.bit_index >= self.frame.data_bits {
                    self.state = if self.frame.has_parity() {
                        TxState::Parity
                    } else {
                        TxState::Stop
                    };
                    self.stop_count = 0;
                }
            }
            TxState::Parity => {
                self.state = TxState::Stop;
                self.stop_count = 0;
            }
            TxState::Stop => {
                self.stop_count += 1;
                if self.stop_count >= self.frame.stop_bits {
                    self.state = TxState::Idle;
                }
            }
        }
    }

    fn level(&self) -> Level {
        match self.state {
            TxState::Idle | TxState::Stop => Level::High,
            TxState::Start => Level::Low,
            TxState::Data => Level::from_bit(self.current_byte >> self.bit_index),
            TxState::Parity => self.frame.parity_bit(self.current_byte).unwrap_or(Level::High),
        }
    }

    /// True once per burst, after the line has idled for five bit periods
    /// with nothing left to send. Never true in auto mode.
    pub fn should_signal_complete(&self) -> bool {
        !self.auto
            && self.state == TxState::Idle
            && self.queue.is_empty()
            && self.time_in_state > COMPLETE_AFTER_BITS / self.baud
            && !self.complete_sent
    }

    pub fn mark_complete_sent(&mut self) {
        self.complete_sent = true;
    }
}
