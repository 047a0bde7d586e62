use std::net::SocketAddr;

use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::{
    actions::{self, ResponseResult},
    events::{self, Event, TimestampedEvent},
    link::LinkHandle,
};

pub(crate) struct Peer {
    // Which subscriber does this peer represent
    addr: SocketAddr,

    // Where to put responses to this peer's requests
    sender: mpsc::UnboundedSender<ResponseResult>,

    // For reading requests to us
    peer_requests_receiver: mpsc::UnboundedReceiver<PeerRequest>,

    // The handle to the link, which holds global state.
    link: LinkHandle,

    // Forwards events to the subscriber.
    event_forwarder: Option<JoinHandle<()>>,
}

async fn event_handler(
    events: broadcast::Receiver<events::TimestampedEvent>,
    user_sender: mpsc::UnboundedSender<ResponseResult>,
) {
    info!("Starting event handler");

    let mut events = BroadcastStream::new(events);

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                warn!(%missed, "Subscriber too slow, events dropped");
                continue;
            }
        };

        if user_sender.send(Ok(actions::Response::event(event))).is_err() {
            debug!("Send error");
            break;
        }
    }

    debug!("Event handler closed")
}

#[derive(Debug)]
pub(crate) enum PeerRequest {
    UserAction(actions::Action),

    /// Shut down the peer, cleaning up as necessary.
    Shutdown,
}

pub(crate) struct PeerHandle {
    pub(crate) requests: mpsc::UnboundedSender<PeerRequest>,
    pub(crate) join_handle: JoinHandle<()>,
}

impl PeerHandle {
    pub(crate) fn new(
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<ResponseResult>,
        link: LinkHandle,
        span: Span,
    ) -> Self {
        let (peer_requests_sender, peer_requests_receiver) = mpsc::unbounded_channel();

        let peer = Peer {
            addr,
            sender,
            peer_requests_receiver,
            link,
            event_forwarder: None,
        };

        let join_handle = tokio::spawn(peer.run().instrument(span));

        Self {
            requests: peer_requests_sender,
            join_handle,
        }
    }

    pub(crate) fn send(&self, request: actions::Action) {
        if self.requests.send(PeerRequest::UserAction(request)).is_err() {
            warn!("Peer is gone, request dropped");
        }
    }

    pub(crate) async fn shutdown(self) {
        debug!("Shutting down");
        let _ = self.requests.send(PeerRequest::Shutdown);

        if let Err(e) = self.join_handle.await {
            warn!(?e, "Peer task failed");
        }
        debug!("Shutdown complete");
    }
}

impl Peer {
    async fn run(mut self) {
        info!(addr = %self.addr, "Subscriber arrived");

        // Subscribe before asking for the status, so nothing falls in between.
        let events = self.link.subscribe();

        match self.link.status().await {
            Ok(status) => {
                let _ = self.sender.send(Ok(actions::Response::event(
                    TimestampedEvent::new(Event::Status(status)),
                )));
            }
            Err(e) => warn!(%e, "No status for new subscriber"),
        }

        self.event_forwarder = Some(tokio::spawn(
            event_handler(events, self.sender.clone()).instrument(info_span!("Event Handler")),
        ));

        while let Some(peer_request) = self.peer_requests_receiver.recv().await {
            match peer_request {
                PeerRequest::UserAction(action) => {
                    let span = info_span!("Action", %action);
                    let response = self.do_user_action(action).instrument(span).await;

                    if self.sender.send(response).is_err() {
                        debug!("Websocket gone, stopping peer");
                        break;
                    }
                }
                PeerRequest::Shutdown => {
                    debug!("Shutting down peer");
                    break;
                }
            }
        }

        if let Some(forwarder) = self.event_forwarder.take() {
            forwarder.abort();
        }
        info!(addr = %self.addr, "Subscriber left");
    }

    async fn do_user_action(&mut self, action: actions::Action) -> ResponseResult {
        info!("client requested action: {action}");

        match action {
            actions::Action::Relay(command) => {
                let outcome = self.link.send_relay(command).await?;
                Ok(actions::Response::relay(outcome))
            }
            actions::Action::Connect(path) => {
                let status = self.link.connect_to(&path).await?;
                Ok(actions::Response::status(status))
            }
            actions::Action::ListPorts => {
                let ports = self.link.list_candidates().await?;
                Ok(actions::Response::ports(ports))
            }
            actions::Action::Status => {
                let status = self.link.status().await?;
                Ok(actions::Response::status(status))
            }
            actions::Action::UpdateSettings(settings) => {
                self.link.announce(Event::SettingsUpdated(settings));
                Ok(actions::Response::settings_shared())
            }
        }
    }
}
