use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::{ConfigPatch, LinkStats, Session, SessionConfig, SimEvent, HOST_TICK_HZ};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Start,
    Stop,
    Configure(ConfigPatch),
    Transmit(u8),
    SetAuto(bool),
    Reset,
    Shutdown,
}

/// Runs a [`Session`] on its own thread, stepping it at [`HOST_TICK_HZ`]
/// while started. Commands are applied between ticks.
pub struct SimulationService {
    tx_cmd: Sender<Command>,
    rx_evt: Receiver<SimEvent>,
    stats: Arc<Mutex<LinkStats>>,
    worker: Option<JoinHandle<()>>,
}

impl SimulationService {
    pub fn spawn(cfg: SessionConfig) -> Result<Self> {
        let session = Session::new(cfg)?;
        let (tx_cmd, rx_cmd) = unbounded::<Command>();
        let (tx_evt, rx_evt) = unbounded::<SimEvent>();
        let stats = Arc::new(Mutex::new(LinkStats::default()));
        let shared = stats.clone();

        let worker = std::thread::Builder::new()
            .name("uartscope-sim".into())
            .spawn(move || run_worker(session, rx_cmd, tx_evt, shared))?;

        Ok(Self {
            tx_cmd,
            rx_evt,
            stats,
            worker: Some(worker),
        })
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.tx_cmd.send(cmd).map_err(|_| Error::Disconnected)
    }

    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    pub fn configure(&self, patch: ConfigPatch) -> Result<()> {
        self.send(Command::Configure(patch))
    }

    pub fn transmit(&self, byte: u8) -> Result<()> {
        self.send(Command::Transmit(byte))
    }

    /// Queues every character of `text`; nothing is sent if any character
    /// does not fit in a byte.
    pub fn transmit_str(&self, text: &str) -> Result<()> {
        for byte in uartscope_decode::bytes_of(text)? {
            self.transmit(byte)?;
        }
        Ok(())
    }

    pub fn set_auto(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetAuto(enabled))
    }

    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    pub fn events(&self) -> &Receiver<SimEvent> {
        &self.rx_evt
    }

    /// Statistics as of the last completed tick.
    pub fn stats(&self) -> LinkStats {
        *self.stats.lock()
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        let _ = self.tx_cmd.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("simulation worker panicked");
            }
        }
    }
}

impl Drop for SimulationService {
    fn drop(&mut self) {
        self.join();
    }
}

fn run_worker(
    mut session: Session,
    rx_cmd: Receiver<Command>,
    tx_evt: Sender<SimEvent>,
    stats: Arc<Mutex<LinkStats>>,
) {
    info!("simulation worker started");
    let ticker = tick(Duration::from_secs_f64(1.0 / HOST_TICK_HZ));
    let mut running = false;

    loop {
        let keep_going = select! {
            recv(rx_cmd) -> msg => match msg {
                Ok(Command::Shutdown) | Err(_) => false,
                Ok(cmd) => {
                    let reply = apply(&mut session, &mut running, cmd);
                    *stats.lock() = *session.stats();
                    reply.map_or(true, |event| tx_evt.send(event).is_ok())
                }
            },
            recv(ticker) -> _ => {
                if running {
                    let events = session.run_frame();
                    *stats.lock() = *session.stats();
                    events.into_iter().all(|event| tx_evt.send(event).is_ok())
                } else {
                    true
                }
            }
        };
        if !keep_going {
            break;
        }
    }
    info!("simulation worker stopped");
}

fn apply(session: &mut Session, running: &mut bool, cmd: Command) -> Option<SimEvent> {
    match cmd {
        Command::Start => {
            if *running {
                return None;
            }
            debug!("simulation started");
            *running = true;
            Some(SimEvent::Started)
        }
        Command::Stop => {
            if !*running {
                return None;
            }
            debug!("simulation stopped");
            *running = false;
            Some(SimEvent::Stopped)
        }
        Command::Configure(patch) => match session.configure(&patch) {
            Ok(()) => None,
            Err(e) => {
                warn!("configure rejected: {e}");
                Some(SimEvent::Error(e.to_string()))
            }
        },
        Command::Transmit(byte) => {
            session.transmit(byte);
            None
        }
        Command::SetAuto(enabled) => {
            debug!("auto traffic {}", if enabled { "on" } else { "off" });
            session.set_auto(enabled);
            None
        }
        Command::Reset => {
            debug!("session reset");
            session.reset();
            None
        }
        Command::Shutdown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uartscope_decode::{Parity, UartChar};

    const WAIT: Duration = Duration::from_secs(5);

    fn wait_for<F>(svc: &SimulationService, mut pred: F) -> Vec<SimEvent>
    where
        F: FnMut(&SimEvent) -> bool,
    {
        let mut seen = Vec::new();
        loop {
            let event = svc.events().recv_timeout(WAIT).expect("no event before timeout");
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    #[test]
    fn start_transmit_receive_complete() {
        let svc = SimulationService::spawn(SessionConfig::default()).unwrap();
        svc.transmit_str("Hi").unwrap();
        svc.start().unwrap();

        let events = wait_for(&svc, |e| *e == SimEvent::TxComplete);
        assert_eq!(events[0], SimEvent::Started);
        let chars: Vec<UartChar> = events
            .iter()
            .filter_map(|e| match e {
                SimEvent::RxData(c) => Some(*c),
                _ => None,
            })
            .collect();
        assert_eq!(
            chars,
            vec![
                UartChar { byte: b'H', error: false },
                UartChar { byte: b'i', error: false },
            ]
        );
        assert!(events.iter().any(|e| matches!(e, SimEvent::Data(_))));
        assert_eq!(svc.stats().frames_ok, 2);

        svc.stop().unwrap();
        wait_for(&svc, |e| *e == SimEvent::Stopped);
        svc.shutdown();
    }

    #[test]
    fn nothing_is_stepped_until_started() {
        let svc = SimulationService::spawn(SessionConfig::default()).unwrap();
        svc.transmit(b'x').unwrap();
        assert!(svc.events().recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(svc.stats().bytes_sent, 0);
    }

    #[test]
    fn bad_configure_reports_error_and_keeps_running() {
        let svc = SimulationService::spawn(SessionConfig::default()).unwrap();
        svc.configure(ConfigPatch { tx_baud: Some(-1.0), ..Default::default() }).unwrap();
        let events = wait_for(&svc, |e| matches!(e, SimEvent::Error(_)));
        assert_eq!(events.len(), 1);

        svc.configure(ConfigPatch {
            tx_config: Some(uartscope_decode::FrameConfigPatch {
                parity: Some(Parity::Even),
                ..Default::default()
            }),
            rx_config: Some(uartscope_decode::FrameConfigPatch {
                parity: Some(Parity::Even),
                ..Default::default()
            }),
            ..Default::default()
        })
        .unwrap();
        svc.transmit(b'Z').unwrap();
        svc.start().unwrap();
        let events = wait_for(&svc, |e| matches!(e, SimEvent::RxData(_)));
        assert_eq!(
            events.last(),
            Some(&SimEvent::RxData(UartChar { byte: b'Z', error: false }))
        );
    }

    #[test]
    fn oversized_baud_leaves_worker_alive() {
        let svc = SimulationService::spawn(SessionConfig::default()).unwrap();
        svc.configure(ConfigPatch { rx_baud: Some(1e300), ..Default::default() }).unwrap();
        svc.start().unwrap();
        let events = wait_for(&svc, |e| *e == SimEvent::Started);
        assert!(matches!(events[0], SimEvent::Error(_)));

        svc.transmit(b'k').unwrap();
        let events = wait_for(&svc, |e| matches!(e, SimEvent::RxData(_)));
        assert_eq!(
            events.last(),
            Some(&SimEvent::RxData(UartChar { byte: b'k', error: false }))
        );
    }

    #[test]
    fn commands_round_trip_through_json() {
        let json = r#"{"type":"CONFIGURE","payload":{"rx_baud":4800.0}}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert_eq!(
            cmd,
            Command::Configure(ConfigPatch { rx_baud: Some(4800.0), ..Default::default() })
        );
        let start: Command = serde_json::from_str(r#"{"type":"START"}"#).unwrap();
        assert_eq!(start, Command::Start);
    }

    #[test]
    fn rejected_string_sends_nothing() {
        let svc = SimulationService::spawn(SessionConfig::default()).unwrap();
        assert!(matches!(svc.transmit_str("a€"), Err(Error::Config(_))));
        svc.start().unwrap();
        wait_for(&svc, |e| *e == SimEvent::Started);
        // give the worker a few ticks
        let deadline = std::time::Instant::now() + Duration::from_millis(200);
        while std::time::Instant::now() < deadline {
            if let Ok(SimEvent::RxData(c)) = svc.events().recv_timeout(Duration::from_millis(20)) {
                panic!("unexpected byte {c:?}");
            }
        }
        assert_eq!(svc.stats().bytes_sent, 0);
    }
}
