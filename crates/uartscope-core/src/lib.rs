//! Simulation driver, host service and history buffers for the UART link model.

pub mod encoding;
pub mod error;
pub mod logbuf;
pub mod scope;
pub mod session;
pub mod sim_service;

pub use encoding::TextEncoding;
pub use error::{Error, Result};
pub use logbuf::{RxEntry, RxLog};
pub use scope::ScopeHistory;
pub use session::{ConfigPatch, LinkStats, SampleBatch, Session, SessionConfig, SimEvent, HOST_TICK_HZ};
pub use sim_service::{Command, SimulationService};
