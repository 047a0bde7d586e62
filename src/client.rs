use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info_span, Instrument};

use crate::{
    actions::{Action, Async, Response, ResponseResult, Sync},
    error::Error,
    events::TimestampedEvent,
    link::{RelayOutcome, Status},
    ports::PortDescriptor,
};

struct Client {
    /// Replies to requests.
    responses: mpsc::UnboundedSender<Result<Sync, Error>>,

    /// Everything pushed by the server.
    events: mpsc::UnboundedSender<TimestampedEvent>,
}

impl Client {
    fn handle_websocket_message(
        &self,
        message: Result<tungstenite::protocol::Message, tungstenite::Error>,
    ) -> Result<(), Error> {
        let text = match message? {
            tungstenite::protocol::Message::Text(text) => text,
            others => {
                debug!(?others, "Unhandled");
                return Ok(());
            }
        };

        let response: ResponseResult = match serde_json::from_str(&text) {
            Ok(response) => response,
            Err(e) => {
                error!(?e, ?text, "Could not deserialize message");
                return Ok(());
            }
        };

        let sent = match response {
            Ok(Response::Async(Async::Event(event))) => self.events.send(event).is_ok(),
            Ok(Response::Sync(sync)) => self.responses.send(Ok(sync)).is_ok(),
            Err(e) => self.responses.send(Err(e)).is_ok(),
        };

        if !sent {
            debug!("Client handle dropped");
        }

        Ok(())
    }

    async fn run(
        self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        mut actions: mpsc::UnboundedReceiver<Action>,
    ) {
        let (mut ws_tx, mut ws_rx) = stream.split();

        let actions_handle = tokio::spawn(async move {
            while let Some(action) = actions.recv().await {
                if let Err(e) = ws_tx
                    .send(tungstenite::Message::Text(action.serialize()))
                    .await
                {
                    error!(?e, "Could not send message to server");
                    break;
                }
            }
        });

        while let Some(message) = ws_rx.next().await {
            if let Err(e) = self.handle_websocket_message(message) {
                error!(%e, "Websocket failed");
                break;
            }
        }

        debug!("Websocket closed");
        actions_handle.abort();
    }
}

/// A connection to the server, from the point of view of a subscriber.
#[derive(Debug)]
pub struct ClientHandle {
    actions: mpsc::UnboundedSender<Action>,
    responses: mpsc::UnboundedReceiver<Result<Sync, Error>>,
    events: mpsc::UnboundedReceiver<TimestampedEvent>,
}

impl ClientHandle {
    /// Connect to the server at the given address and port.
    pub async fn new(address: &str, port: u16) -> Result<Self, Error> {
        let (stream, _) =
            tokio_tungstenite::connect_async(format!("ws://{address}:{port}/client")).await?;

        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let client = Client {
            responses: responses_tx,
            events: events_tx,
        };

        tokio::spawn(
            client
                .run(stream, actions_rx)
                .instrument(info_span!("Client", %port)),
        );

        Ok(Self {
            actions: actions_tx,
            responses: responses_rx,
            events: events_rx,
        })
    }

    async fn request(&mut self, action: Action) -> Result<Sync, Error> {
        self.actions
            .send(action)
            .map_err(|e| Error::WebsocketIssue(e.to_string()))?;

        self.responses
            .recv()
            .await
            .ok_or_else(|| Error::WebsocketIssue("Connection closed".into()))?
    }

    /// The next event pushed by the server.
    pub async fn next_event(&mut self) -> Result<TimestampedEvent, Error> {
        self.events
            .recv()
            .await
            .ok_or_else(|| Error::WebsocketIssue("Connection closed".into()))
    }

    /// An event if one is already waiting.
    pub fn try_next_event(&mut self) -> Option<TimestampedEvent> {
        self.events.try_recv().ok()
    }

    /// Switch the relay of the device.
    pub async fn relay(&mut self, turn_on: bool) -> Result<RelayOutcome, Error> {
        match self.request(Action::relay(turn_on)).await? {
            Sync::Relay(outcome) => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    /// Connect the server to the device at the given path.
    pub async fn connect(&mut self, path: &str) -> Result<Status, Error> {
        match self.request(Action::connect(path)).await? {
            Sync::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// The link status.
    pub async fn status(&mut self) -> Result<Status, Error> {
        match self.request(Action::Status).await? {
            Sync::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// The serial ports the server sees.
    pub async fn list_ports(&mut self) -> Result<Vec<PortDescriptor>, Error> {
        match self.request(Action::ListPorts).await? {
            Sync::Ports(ports) => Ok(ports),
            other => Err(unexpected(other)),
        }
    }

    /// Share settings with every subscriber, this one included.
    pub async fn update_settings(&mut self, settings: serde_json::Value) -> Result<(), Error> {
        match self.request(Action::UpdateSettings(settings)).await? {
            Sync::SettingsShared => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Sync) -> Error {
    Error::WebsocketIssue(format!("Unexpected response: {response:?}"))
}
