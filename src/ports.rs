use std::fmt::Display;

use futures::{future::BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serialport::SerialPortType;
use tracing::debug;

use crate::error::Error;

/// A serial port found on the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// Likely "/dev/ttyACMx" or "COMx".
    pub path: String,

    /// The USB manufacturer string, if known.
    pub manufacturer: Option<String>,
}

impl PortDescriptor {
    /// A port without a known manufacturer.
    pub fn new(path: &str) -> Self {
        Self {
            path: path.into(),
            manufacturer: None,
        }
    }

    /// A port with a manufacturer string.
    pub fn with_manufacturer(path: &str, manufacturer: &str) -> Self {
        Self {
            path: path.into(),
            manufacturer: Some(manufacturer.into()),
        }
    }
}

impl Display for PortDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {}",
            self.path,
            self.manufacturer.as_deref().unwrap_or("Unknown")
        )
    }
}

/// Something able to list candidate ports.
pub trait PortEnumerator: Send + Sync + 'static {
    /// List the ports currently present.
    fn list_ports(&self) -> BoxFuture<'static, Result<Vec<PortDescriptor>, Error>>;
}

/// Lists the serial ports of this machine.
#[derive(Debug, Default, Clone)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn list_ports(&self) -> BoxFuture<'static, Result<Vec<PortDescriptor>, Error>> {
        async {
            let ports = tokio::task::spawn_blocking(serialport::available_ports)
                .await
                .map_err(|e| Error::Enumeration(e.to_string()))?
                .map_err(|e| Error::Enumeration(e.to_string()))?;

            Ok(ports
                .into_iter()
                .map(|info| PortDescriptor {
                    manufacturer: match info.port_type {
                        SerialPortType::UsbPort(usb) => usb.manufacturer,
                        _ => None,
                    },
                    path: info.port_name,
                })
                .collect())
        }
        .boxed()
    }
}

/// Pick the port to connect to.
///
/// The preferred path wins if it is present.
/// Otherwise the first port whose path or manufacturer contains any of the
/// recognition patterns is chosen.
pub fn select_candidate<'a>(
    candidates: &'a [PortDescriptor],
    preferred: Option<&str>,
    recognition: &[String],
) -> Option<&'a PortDescriptor> {
    if let Some(preferred) = preferred {
        if let Some(port) = candidates.iter().find(|port| port.path == preferred) {
            return Some(port);
        }
        debug!(%preferred, "Preferred port not present");
    }

    candidates.iter().find(|port| {
        recognition.iter().any(|pattern| {
            port.path.contains(pattern.as_str())
                || port
                    .manufacturer
                    .as_deref()
                    .map_or(false, |manufacturer| manufacturer.contains(pattern.as_str()))
        })
    })
}
