//! Command-line front end: drives a simulated UART link in real time and
//! prints what the receiver decoded.

mod settings;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use uartscope_core::{
    Error as CoreError, LinkStats, RxLog, ScopeHistory, SessionConfig, SimEvent,
    SimulationService, TextEncoding,
};
use uartscope_decode::{nearest_standard_baud, validate_baud, FrameConfigPatch, Parity};

use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Text to transmit; each character becomes one frame
    text: Option<String>,

    /// Baud rate for both ends
    #[arg(short, long)]
    baud: Option<f64>,

    /// Transmitter baud rate, overrides --baud
    #[arg(long)]
    tx_baud: Option<f64>,

    /// Receiver baud rate, overrides --baud
    #[arg(long)]
    rx_baud: Option<f64>,

    /// Data bits per frame (7 or 8)
    #[arg(long)]
    data_bits: Option<u8>,

    /// Parity: none, even or odd
    #[arg(long)]
    parity: Option<Parity>,

    /// Stop bits (1 or 2)
    #[arg(long)]
    stop_bits: Option<u8>,

    /// Idle guard between frames, in bit periods
    #[arg(long)]
    idle_bits: Option<f64>,

    /// Receiver data bits, overrides --data-bits
    #[arg(long)]
    rx_data_bits: Option<u8>,

    /// Receiver parity, overrides --parity
    #[arg(long)]
    rx_parity: Option<Parity>,

    /// Receiver stop bits, overrides --stop-bits
    #[arg(long)]
    rx_stop_bits: Option<u8>,

    /// Receiver idle guard, overrides --idle-bits
    #[arg(long)]
    rx_idle_bits: Option<f64>,

    /// Stream random printable characters until the run time elapses
    #[arg(short, long)]
    auto: bool,

    /// Seed for --auto traffic
    #[arg(long)]
    seed: Option<u64>,

    /// Longest wall-clock run time in seconds
    #[arg(short, long, default_value_t = 10.0, value_parser = parse_seconds)]
    duration: f64,

    /// Print every event except sample batches as a JSON line
    #[arg(long)]
    json: bool,

    /// Show received bytes as hex
    #[arg(long)]
    hex: bool,

    /// Text encoding for received bytes (auto, utf-8, ascii, latin1)
    #[arg(short, long)]
    encoding: Option<String>,

    /// Draw the last few frames of the line after the run
    #[arg(long)]
    scope: bool,

    /// Settings file, defaults to the platform config directory
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    save_settings: bool,

    /// Increase log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_seconds(s: &str) -> std::result::Result<f64, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if secs.is_finite() && secs > 0.0 {
        Ok(secs)
    } else {
        Err(format!("run time must be positive, got {s}"))
    }
}

impl Args {
    fn tx_patch(&self) -> FrameConfigPatch {
        FrameConfigPatch {
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
            idle_bits: self.idle_bits,
        }
    }

    fn rx_patch(&self) -> FrameConfigPatch {
        FrameConfigPatch {
            data_bits: self.rx_data_bits.or(self.data_bits),
            parity: self.rx_parity.or(self.parity),
            stop_bits: self.rx_stop_bits.or(self.stop_bits),
            idle_bits: self.rx_idle_bits.or(self.idle_bits),
        }
    }

    /// Overlays the flags on top of the stored settings.
    fn apply(&self, settings: &mut Settings) -> Result<()> {
        let cfg = &mut settings.session;
        if let Some(baud) = self.tx_baud.or(self.baud) {
            cfg.tx_baud = validate_baud(baud)?;
        }
        if let Some(baud) = self.rx_baud.or(self.baud) {
            cfg.rx_baud = validate_baud(baud)?;
        }
        cfg.tx_frame = cfg.tx_frame.patched(&self.tx_patch())?;
        cfg.rx_frame = cfg.rx_frame.patched(&self.rx_patch())?;
        if self.auto {
            cfg.auto = true;
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }

        if let Some(name) = &self.encoding {
            settings.encoding = name.clone();
        }
        settings.show_hex |= self.hex;
        settings.show_scope |= self.scope;
        Ok(())
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn describe(cfg: &SessionConfig) {
    for (end, baud) in [("tx", cfg.tx_baud), ("rx", cfg.rx_baud)] {
        let standard = nearest_standard_baud(baud);
        if f64::from(standard) != baud {
            info!("{end} baud {baud} is non-standard, nearest is {standard}");
        }
    }
    info!(
        "tx {} baud {:?}, rx {} baud {:?}",
        cfg.tx_baud, cfg.tx_frame, cfg.rx_baud, cfg.rx_frame
    );
}

/// Host-side view of a run.
struct Monitor {
    scope: ScopeHistory,
    log: RxLog,
    json: bool,
    auto: bool,
}

impl Monitor {
    /// Returns `false` once the run is over.
    fn handle(&mut self, svc: &SimulationService, event: SimEvent) -> Result<bool> {
        if self.json && !matches!(event, SimEvent::Data(_)) {
            println!("{}", serde_json::to_string(&event)?);
        }
        match event {
            SimEvent::Data(batch) => self.scope.push_batch(&batch),
            SimEvent::RxData(c) => {
                debug!("received {:#04x}{}", c.byte, if c.error { " (corrupted)" } else { "" });
                self.log.push(c);
            }
            SimEvent::RxError(kind) => warn!("receiver reported {kind}"),
            SimEvent::TxComplete => {
                info!("transmission complete");
                if !self.auto {
                    svc.stop()?;
                }
            }
            SimEvent::Started => debug!("simulation running"),
            SimEvent::Stopped => return Ok(false),
            SimEvent::Error(msg) => bail!("simulation rejected a command: {msg}"),
        }
        Ok(true)
    }
}

/// Feeds events to `handle` until it returns `false` or `deadline` passes.
/// A worker that went away before either is an error.
fn pump<F>(events: &Receiver<SimEvent>, deadline: Instant, mut handle: F) -> Result<()>
where
    F: FnMut(SimEvent) -> Result<bool>,
{
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) => {
                if !handle(event)? {
                    return Ok(());
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                info!("run time elapsed");
                return Ok(());
            }
            Err(RecvTimeoutError::Disconnected) => return Err(CoreError::Disconnected.into()),
        }
    }
}

fn print_stats(stats: &LinkStats) {
    println!("bytes sent:        {}", stats.bytes_sent);
    println!("frames ok:         {}", stats.frames_ok);
    println!("frames corrupted:  {}", stats.frames_corrupted);
    println!("parity errors:     {}", stats.parity_errors);
    println!("framing errors:    {}", stats.framing_errors);
    println!("breaks:            {}", stats.breaks);
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let settings_path = args.settings.clone().or_else(Settings::default_path);
    let mut settings = match &settings_path {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    args.apply(&mut settings)?;
    let encoding: TextEncoding = settings.encoding.parse()?;

    if args.save_settings {
        match &settings_path {
            Some(path) => settings.save(path)?,
            None => warn!("no config directory on this platform, settings not saved"),
        }
    }

    let cfg = settings.session;
    describe(&cfg);

    let svc = SimulationService::spawn(cfg)?;
    if let Some(text) = &args.text {
        svc.transmit_str(text)?;
    } else if !cfg.auto {
        warn!("nothing to send, the line will stay idle");
    }
    svc.start()?;

    let mut monitor = Monitor {
        scope: ScopeHistory::default(),
        log: RxLog::new(settings.rx_log_entries),
        json: args.json,
        auto: cfg.auto,
    };

    let deadline = Instant::now() + Duration::from_secs_f64(args.duration);
    pump(svc.events(), deadline, |event| monitor.handle(&svc, event))?;

    let stats = svc.stats();
    svc.shutdown();

    let Monitor { scope, log, .. } = monitor;
    if args.json {
        let summary = serde_json::json!({
            "stats": stats,
            "received": hex::encode_upper(log.bytes()),
            "corrupted": log.error_count(),
        });
        println!("{summary}");
        return Ok(());
    }

    if settings.show_hex {
        println!("{}", log.to_hex());
    } else {
        println!("{}", log.to_text(encoding));
    }
    print_stats(&stats);

    if settings.show_scope {
        if let Some(span) = scope.visible_span(cfg.rx_baud) {
            println!("{}", scope.render(span));
        }
    }
    Ok(())
}
