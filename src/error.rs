use thiserror::Error;

use crate::port::PortError;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("failed to read midi file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse midi file: {0}")]
    Parse(String),

    #[error("no usable midi output port")]
    PortUnavailable,

    #[error("no midi file loaded")]
    NothingLoaded,

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("midi device error: {0}")]
    Device(String),

    #[error("failed to read settings: {0}")]
    Settings(String),
}
