use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::{
    error::Error,
    serial::{codecs::lines::LinesCodec, error::SerialPortError, SerialMessageBytes, DEFAULT_BAUD},
    transport::{LinkIo, LinkSignal},
};

/// Builder for a serial [`LinkIo`].
#[derive(Debug, Default)]
pub struct SerialPortBuilder {
    baud: Option<u32>,
    path: String,
}

fn try_create_serial_port(baud: u32, path: &str) -> Result<SerialStream, Error> {
    tokio_serial::new(path, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open_native_async()
        .map_err(|e| Error::Open {
            path: path.to_string(),
            problem: e.to_string(),
        })
}

impl SerialPortBuilder {
    /// Start a new builder.
    /// The tty should likely be along the lines of `/tty/ACMx` on unix, and `COMx` on Windows.
    pub(crate) fn new(tty: &str) -> Self {
        Self {
            path: tty.to_string(),
            ..Default::default()
        }
    }

    /// Set the serial port builder's baud.
    /// Will use [`DEFAULT_BAUD`] if not set.
    pub(crate) fn set_baud(mut self, baud: u32) -> Self {
        self.baud = Some(baud);
        self
    }

    /// Open the port and spawn the task shuttling lines to and from it.
    ///
    /// Opening may block, so it happens on the blocking pool.
    pub(crate) async fn build(self) -> Result<LinkIo, Error> {
        let baud = self.baud.unwrap_or(DEFAULT_BAUD);
        let path = self.path.clone();

        info!(%self.path, %baud, "Opening serial port");

        let serial_stream =
            tokio::task::spawn_blocking(move || try_create_serial_port(baud, &path))
                .await
                .map_err(|e| Error::Open {
                    path: self.path.clone(),
                    problem: e.to_string(),
                })??;

        Ok(spawn_link(&self.path, LinesCodec::default(), serial_stream))
    }
}

fn spawn_link(path: &str, codec: LinesCodec, serial_stream: SerialStream) -> LinkIo {
    enum Event {
        PleasePutThisOnWire(SerialMessageBytes),
        ThisCameFromWire(Option<Result<SerialMessageBytes, SerialPortError>>),
    }

    let (should_put_on_wire_sender, mut should_put_on_wire_receiver) =
        mpsc::unbounded_channel::<SerialMessageBytes>();
    let (signal_sender, signal_receiver) = mpsc::unbounded_channel();

    let tty_span = info_span!("tty", %path);

    let task = tokio::spawn(
        async move {
            // Sink: Send things (to serial port), stream: receive things (from serial port)
            let (mut sink, mut stream) = codec.framed(serial_stream).split();

            loop {
                let event = tokio::select! {
                    message = should_put_on_wire_receiver.recv() => match message {
                        Some(message) => Event::PleasePutThisOnWire(message),
                        None => {
                            debug!("Link handle dropped, closing port");
                            break;
                        }
                    },
                    from_wire = stream.next() => Event::ThisCameFromWire(from_wire),
                };

                let signal = match event {
                    Event::PleasePutThisOnWire(message) => match sink.send(message).await {
                        Ok(()) => continue,
                        Err(e) => {
                            error!(?e, "Serial port error in send, exiting");
                            LinkSignal::Error(e.to_string())
                        }
                    },
                    Event::ThisCameFromWire(Some(Ok(line))) => {
                        trace!("Line from port: `{:?}`", &line[..line.len().min(32)]);

                        if signal_sender
                            .send(LinkSignal::Line(String::from_utf8_lossy(&line).into_owned()))
                            .is_err()
                        {
                            warn!("Nobody listens to the link anymore");
                            break;
                        }
                        continue;
                    }
                    Event::ThisCameFromWire(Some(Err(e))) => {
                        error!(?e, "Serial port error, exiting");
                        LinkSignal::Error(e.to_string())
                    }
                    Event::ThisCameFromWire(None) => {
                        info!("{}", SerialPortError::Disconnected);
                        LinkSignal::Closed
                    }
                };

                let _ = signal_sender.send(signal);
                break;
            }
        }
        .instrument(tty_span),
    );

    LinkIo {
        writer: should_put_on_wire_sender,
        signals: signal_receiver,
        task: Some(task),
    }
}
