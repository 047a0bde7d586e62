use std::fmt::Display;

use futures::{future::BoxFuture, FutureExt};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    error::Error,
    serial::{serial_port::SerialPortBuilder, SerialMessageBytes},
};

/// What an open link reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignal {
    /// A complete line arrived. The delimiter is stripped.
    Line(String),

    /// The link failed. It is unusable afterwards.
    Error(String),

    /// The other side went away.
    Closed,
}

impl Display for LinkSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkSignal::Line(line) => {
                write!(f, "line: {}", line.chars().take(48).collect::<String>())
            }
            LinkSignal::Error(e) => write!(f, "error: {e}"),
            LinkSignal::Closed => write!(f, "closed"),
        }
    }
}

/// The two halves of an open link.
///
/// Dropping the writer and aborting the task closes the link.
#[derive(Debug)]
pub struct LinkIo {
    /// Bytes put here are written to the device as-is.
    pub writer: mpsc::UnboundedSender<SerialMessageBytes>,

    /// Lines and failures from the device.
    pub signals: mpsc::UnboundedReceiver<LinkSignal>,

    /// The task driving the link, if it has one.
    pub task: Option<JoinHandle<()>>,
}

/// Something able to open links to devices.
pub trait Transport: Send + Sync + 'static {
    /// Open a link to the device at the given path.
    fn open(&self, path: String, baud_rate: u32) -> BoxFuture<'static, Result<LinkIo, Error>>;
}

/// Opens real serial ports.
#[derive(Debug, Default, Clone)]
pub struct SerialTransport;

impl Transport for SerialTransport {
    fn open(&self, path: String, baud_rate: u32) -> BoxFuture<'static, Result<LinkIo, Error>> {
        SerialPortBuilder::new(&path)
            .set_baud(baud_rate)
            .build()
            .boxed()
    }
}
