use std::io;

use thiserror::Error;

/// Errors on an open serial link.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    IO(#[from] io::Error),

    /// Serial port disconnected.
    #[error("Serial port disconnected")]
    Disconnected,
}
