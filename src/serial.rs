/// Serial port related errors.
pub(crate) mod error;

/// The serial link task.
pub(crate) mod serial_port;

/// Codecs for encoding/decoding messages to/from wire.
pub(crate) mod codecs;

/// The message data type used for serial bytes.
pub type SerialMessageBytes = Vec<u8>;

/// The baud rate the firmware talks at.
pub const DEFAULT_BAUD: u32 = 9600;
