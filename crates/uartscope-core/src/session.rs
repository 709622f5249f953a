use log::debug;
use serde::{Deserialize, Serialize};
use uartscope_decode::{
    bytes_of, validate_baud, ConfigError, Dot, FrameConfig, FrameConfigPatch, Level, Receiver,
    RxErrorKind, RxEvent, SampleRate, Transmitter, UartChar, DEFAULT_BAUD_RATE,
};

use crate::error::Result;

/// Rate at which the host asks for a new batch of samples.
pub const HOST_TICK_HZ: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tx_baud: f64,
    pub rx_baud: f64,
    pub tx_frame: FrameConfig,
    pub rx_frame: FrameConfig,
    pub auto: bool,
    /// Seed for generated traffic; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tx_baud: DEFAULT_BAUD_RATE,
            rx_baud: DEFAULT_BAUD_RATE,
            tx_frame: FrameConfig::default(),
            rx_frame: FrameConfig::default(),
            auto: false,
            seed: None,
        }
    }
}

/// Host-side partial update. Fields left out keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub tx_baud: Option<f64>,
    pub rx_baud: Option<f64>,
    pub tx_config: Option<FrameConfigPatch>,
    pub rx_config: Option<FrameConfigPatch>,
}

/// Samples produced during one host tick, one entry per simulated step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    pub times: Vec<f64>,
    pub levels: Vec<u8>,
    pub dots: Vec<Dot>,
}

impl SampleBatch {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            times: Vec::with_capacity(n),
            levels: Vec::with_capacity(n),
            dots: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, time: f64, level: Level, dot: Dot) {
        self.times.push(time);
        self.levels.push(level.bit());
        self.dots.push(dot);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Samples that carry a receiver decision.
    pub fn marked(&self) -> impl Iterator<Item = (f64, Dot)> + '_ {
        self.times
            .iter()
            .zip(&self.dots)
            .filter(|(_, dot)| **dot != Dot::None)
            .map(|(t, dot)| (*t, *dot))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimEvent {
    Data(SampleBatch),
    RxData(UartChar),
    RxError(RxErrorKind),
    TxComplete,
    Started,
    Stopped,
    Error(String),
}

impl From<RxEvent> for SimEvent {
    fn from(event: RxEvent) -> Self {
        match event {
            RxEvent::Data(c) => SimEvent::RxData(c),
            RxEvent::Error(kind) => SimEvent::RxError(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub bytes_sent: u64,
    pub frames_ok: u64,
    pub frames_corrupted: u64,
    pub parity_errors: u64,
    pub framing_errors: u64,
    pub breaks: u64,
    pub bursts_completed: u64,
}

impl LinkStats {
    fn record(&mut self, event: &RxEvent) {
        match event {
            RxEvent::Data(c) if c.error => self.frames_corrupted += 1,
            RxEvent::Data(_) => self.frames_ok += 1,
            RxEvent::Error(RxErrorKind::Parity) => self.parity_errors += 1,
            RxEvent::Error(RxErrorKind::Framing) => self.framing_errors += 1,
            RxEvent::Error(RxErrorKind::Break) => self.breaks += 1,
        }
    }
}

/// One simulated link: a transmitter wired to a receiver plus the clock that
/// steps them. All state lives here; the host only talks to it between ticks.
pub struct Session {
    tx: Transmitter,
    rx: Receiver,
    axis_time: f64,
    stats: LinkStats,
}

impl Session {
    pub fn new(cfg: SessionConfig) -> Result<Self> {
        let mut tx = match cfg.seed {
            Some(seed) => Transmitter::with_seed(cfg.tx_baud, cfg.tx_frame, seed)?,
            None => Transmitter::new(cfg.tx_baud, cfg.tx_frame)?,
        };
        tx.set_auto(cfg.auto);
        let rx = Receiver::new(cfg.rx_baud, cfg.rx_frame)?;
        Ok(Self {
            tx,
            rx,
            axis_time: 0.0,
            stats: LinkStats::default(),
        })
    }

    /// Applies `patch` as a whole: if any field is invalid nothing changes.
    pub fn configure(&mut self, patch: &ConfigPatch) -> Result<()> {
        let tx_baud = patch.tx_baud.map(validate_baud).transpose()?;
        let rx_baud = patch.rx_baud.map(validate_baud).transpose()?;
        let tx_frame = patch
            .tx_config
            .as_ref()
            .map(|p| self.tx.config().patched(p))
            .transpose()?;
        let rx_frame = patch
            .rx_config
            .as_ref()
            .map(|p| self.rx.config().patched(p))
            .transpose()?;

        if let Some(baud) = tx_baud {
            self.tx.set_baud(baud)?;
        }
        if let Some(baud) = rx_baud {
            self.rx.set_baud(baud)?;
        }
        if let Some(frame) = tx_frame {
            self.tx.set_config(frame)?;
        }
        if let Some(frame) = rx_frame {
            self.rx.set_config(frame)?;
        }
        debug!("configured: {:?}", self.config());
        Ok(())
    }

    pub fn transmit(&mut self, byte: u8) {
        self.tx.enqueue(byte);
    }

    pub fn transmit_char(&mut self, c: char) -> Result<()> {
        let byte = u8::try_from(c).map_err(|_| ConfigError::CharOutOfRange(c))?;
        self.tx.enqueue(byte);
        Ok(())
    }

    /// Queues every character of `text`, or none of them if one does not fit a byte.
    pub fn transmit_str(&mut self, text: &str) -> Result<()> {
        for byte in bytes_of(text)? {
            self.tx.enqueue(byte);
        }
        Ok(())
    }

    pub fn set_auto(&mut self, enabled: bool) {
        self.tx.set_auto(enabled);
    }

    /// Clears both queues, any frame in flight, the time axis and statistics.
    /// Configuration and auto mode are kept.
    pub fn reset(&mut self) {
        self.tx.reset();
        self.rx.reset();
        self.axis_time = 0.0;
        self.stats = LinkStats::default();
    }

    pub fn sample_rate(&self) -> SampleRate {
        SampleRate::for_link(self.tx.baud(), self.rx.baud())
    }

    /// Simulates one host tick: the sample batch first, then receiver events
    /// in the order they happened, then completion if the burst just ended.
    pub fn run_frame(&mut self) -> Vec<SimEvent> {
        let rate = self.sample_rate();
        let dt = rate.dt();
        let steps = rate.steps_per_tick(HOST_TICK_HZ);

        let mut batch = SampleBatch::with_capacity(steps);
        for _ in 0..steps {
            self.axis_time += dt;
            let level = self.tx.tick(dt);
            let dot = self.rx.tick(dt, level);
            batch.push(self.axis_time, level, dot);
        }

        let mut events = Vec::with_capacity(1 + self.rx.pending_events());
        events.push(SimEvent::Data(batch));
        for event in self.rx.drain_events() {
            self.stats.record(&event);
            events.push(event.into());
        }

        if self.tx.should_signal_complete() {
            self.tx.mark_complete_sent();
            self.stats.bursts_completed += 1;
            events.push(SimEvent::TxComplete);
        }
        self.stats.bytes_sent = self.tx.frames_started();

        events
    }

    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            tx_baud: self.tx.baud(),
            rx_baud: self.rx.baud(),
            tx_frame: *self.tx.config(),
            rx_frame: *self.rx.config(),
            auto: self.tx.is_auto(),
            seed: None,
        }
    }

    pub fn axis_time(&self) -> f64 {
        self.axis_time
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn transmitter(&self) -> &Transmitter {
        &self.tx
    }

    pub fn receiver(&self) -> &Receiver {
        &self.rx
    }
}
