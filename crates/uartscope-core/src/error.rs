use thiserror::Error;
use uartscope_decode::ConfigError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("simulation worker has stopped")]
    Disconnected,

    #[error("failed to spawn simulation worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("unknown text encoding: {0}")]
    UnknownEncoding(String),
}

pub type Result<T> = std::result::Result<T, Error>;
