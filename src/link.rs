//! The link actor owns the connection to the device.
//!
//! Everything which changes the link state is a message into one task:
//! requests from handles, timer ticks, results of port enumeration and opening,
//! and lines or failures from the open link.
//! Enumeration and opening may block, so they run in their own tasks and report back.

use std::fmt::Display;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    config::Config,
    decoder,
    demo::DemoGenerator,
    error::Error,
    events::{Event, Events, TimestampedEvent},
    hazard,
    ports::{self, PortDescriptor, PortEnumerator, SystemPorts},
    reading::{ControlEvent, RelayCommand},
    scheduler::{Scheduler, Tick, TimerName},
    serial::SerialMessageBytes,
    supervisor::ReconnectSupervisor,
    transport::{LinkIo, LinkSignal, SerialTransport, Transport},
};

/// Where the link to the device is at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkState {
    /// Nothing attempted yet.
    Idle,

    /// A port was chosen and is being opened.
    Connecting,

    /// Lines are flowing.
    Open,

    /// No link. Either nothing was found, or the link failed.
    Closed,

    /// No link, and retries are scheduled.
    Reconnecting,

    /// No link, and demo data is being produced.
    Demo,
}

impl Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Idle => "idle",
            LinkState::Connecting => "connecting",
            LinkState::Open => "open",
            LinkState::Closed => "closed",
            LinkState::Reconnecting => "reconnecting",
            LinkState::Demo => "demo",
        };
        write!(f, "{s}")
    }
}

/// A snapshot of the link, as told to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// The link state.
    pub state: LinkState,

    /// Whether readings are flowing, be it from the device or the demo source.
    pub connected: bool,

    /// Whether the readings are synthetic.
    pub demo: bool,

    /// The last problem, if the link is not open.
    pub error: Option<String>,

    /// The path of the open link.
    pub port: Option<String>,
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.state)?;

        if let Some(port) = &self.port {
            write!(f, " ({port})")?;
        }
        if self.demo {
            write!(f, ", demo")?;
        }
        if let Some(error) = &self.error {
            write!(f, ", error: {error}")?;
        }

        Ok(())
    }
}

/// What became of a relay command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayOutcome {
    /// It was put on the wire.
    Written,

    /// The link is not open, so nothing was written.
    Refused,
}

#[derive(Debug)]
enum Action {
    ListCandidates,
    Connect(Option<String>),
    ConnectTo(String),
    Relay(RelayCommand),
    Status,
    CheckHealth,
    ActiveTimers,
    Shutdown,
}

#[derive(Debug)]
enum LinkResponse {
    Candidates(Vec<PortDescriptor>),
    Status(Status),
    Relay(RelayOutcome),
    Timers(Vec<TimerName>),
    Done,
}

type Reply = oneshot::Sender<Result<LinkResponse, Error>>;

#[derive(Debug)]
struct Request {
    action: Action,
    response: Reply,
}

/// Inform the actor of things happening elsewhere.
#[derive(Debug)]
enum Inform {
    Tick(Tick),
    Listed {
        result: Result<Vec<PortDescriptor>, Error>,
        response: Reply,
    },
    Discovered {
        attempt: u64,
        result: Result<Vec<PortDescriptor>, Error>,
    },
    Opened {
        attempt: u64,
        path: String,
        result: Result<LinkIo, Error>,
    },
    Link {
        id: u64,
        signal: LinkSignal,
    },
}

#[derive(Debug)]
enum Message {
    Request(Request),
    Inform(Inform),
}

/// The one connection attempt allowed at a time.
#[derive(Debug)]
struct Attempt {
    id: u64,
    preferred: Option<String>,
    response: Option<Reply>,
}

impl Attempt {
    fn respond(&mut self, result: Result<LinkResponse, Error>) {
        if let Some(response) = self.response.take() {
            let _ = response.send(result);
        }
    }
}

/// An open link. Dropping it closes the link.
#[derive(Debug)]
struct ActiveLink {
    id: u64,
    path: String,
    writer: mpsc::UnboundedSender<SerialMessageBytes>,
    task: Option<JoinHandle<()>>,
    forwarder: JoinHandle<()>,
}

impl Drop for ActiveLink {
    fn drop(&mut self) {
        debug!(path = %self.path, "Closing link");
        if let Some(task) = &self.task {
            task.abort();
        }
        self.forwarder.abort();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct LinkActor {
    config: Config,
    enumerator: Box<dyn PortEnumerator>,
    transport: Box<dyn Transport>,
    events: Events,
    inbox: mpsc::UnboundedSender<Message>,

    state: LinkState,
    error: Option<String>,
    link: Option<ActiveLink>,
    attempt: Option<Attempt>,
    next_id: u64,

    scheduler: Scheduler<Message>,
    supervisor: ReconnectSupervisor,
    demo: DemoGenerator,
}

impl LinkActor {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn status(&self) -> Status {
        let open = self.state == LinkState::Open;

        Status {
            state: self.state,
            connected: open || self.demo.is_running(),
            demo: self.demo.is_running(),
            error: self.error.clone(),
            port: self.link.as_ref().filter(|_| open).map(|link| link.path.clone()),
        }
    }

    fn publish_status(&self) {
        self.events.send_event(Event::Status(self.status()));
    }

    fn transition(&mut self, state: LinkState, error: Option<String>) {
        if state != self.state {
            info!(from = %self.state, to = %state, "Link state");
        }
        self.state = state;
        self.error = error;
        self.publish_status();
    }

    /// Not open and nothing in flight: say whether anything is being done about it.
    fn settle(&mut self) {
        let resting = if self.supervisor.is_reconnecting() {
            LinkState::Reconnecting
        } else if self.demo.is_running() {
            LinkState::Demo
        } else {
            return;
        };

        if resting != self.state {
            self.transition(resting, self.error.clone());
        }
    }

    fn closed(&mut self, error: String, rearm: bool) {
        self.link = None;
        self.transition(LinkState::Closed, Some(error));

        if rearm && self.attempt.is_none() {
            self.supervisor.start(&mut self.scheduler);
        }

        self.settle();
    }

    fn start_supervisor_if_idle(&mut self) {
        if matches!(
            self.state,
            LinkState::Idle | LinkState::Closed | LinkState::Demo
        ) && self.attempt.is_none()
            && self.supervisor.start(&mut self.scheduler)
        {
            self.transition(LinkState::Reconnecting, self.error.clone());
        }
    }

    fn take_attempt(&mut self, id: u64) -> Option<Attempt> {
        match &self.attempt {
            Some(attempt) if attempt.id == id => self.attempt.take(),
            _ => {
                trace!(%id, "Outcome of an abandoned attempt");
                None
            }
        }
    }

    fn drop_link_for_new_attempt(&mut self) {
        if self.link.take().is_some() {
            self.transition(LinkState::Closed, None);
        }
    }

    fn begin_discovery(&mut self, preferred: Option<String>, response: Option<Reply>) {
        let id = self.next_id();
        self.attempt = Some(Attempt {
            id,
            preferred: preferred.or_else(|| self.config.preferred_port.clone()),
            response,
        });

        let listing = self.enumerator.list_ports();
        let inbox = self.inbox.clone();

        tokio::spawn(async move {
            let result = listing.await;
            let _ = inbox.send(Message::Inform(Inform::Discovered {
                attempt: id,
                result,
            }));
        });
    }

    fn begin_open(&mut self, mut attempt: Attempt, path: String) {
        self.transition(LinkState::Connecting, None);

        let id = self.next_id();
        attempt.id = id;
        self.attempt = Some(attempt);

        let opening = self.transport.open(path.clone(), self.config.baud_rate);
        let inbox = self.inbox.clone();

        tokio::spawn(async move {
            let result = opening.await;
            let _ = inbox.send(Message::Inform(Inform::Opened {
                attempt: id,
                path,
                result,
            }));
        });
    }

    fn on_discovered(&mut self, id: u64, result: Result<Vec<PortDescriptor>, Error>) {
        let Some(mut attempt) = self.take_attempt(id) else {
            return;
        };

        let candidates = match result {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(%e, "Listing ports failed");
                self.error = Some(e.to_string());
                self.publish_status();
                attempt.respond(Err(e));
                return;
            }
        };

        let chosen = ports::select_candidate(
            &candidates,
            attempt.preferred.as_deref(),
            &self.config.recognition,
        );

        match chosen {
            Some(port) => {
                info!(%port, "Found device");
                let path = port.path.clone();
                self.begin_open(attempt, path);
            }
            None => {
                debug!(
                    ports = %candidates.iter().map(|port| &port.path).join(", "),
                    "No device among the ports"
                );
                self.closed("no device found".into(), false);
                attempt.respond(Ok(LinkResponse::Status(self.status())));
            }
        }
    }

    fn on_opened(&mut self, id: u64, path: String, result: Result<LinkIo, Error>) {
        let Some(mut attempt) = self.take_attempt(id) else {
            // Dropping the link closes it.
            return;
        };

        match result {
            Ok(io) => {
                self.install(path, io);

                self.supervisor.stop(&mut self.scheduler);
                self.demo.stop(&mut self.scheduler);
                self.transition(LinkState::Open, None);
            }
            Err(e) => {
                warn!(%e, "Could not open device");
                self.closed(e.to_string(), true);
            }
        }

        attempt.respond(Ok(LinkResponse::Status(self.status())));
    }

    fn install(&mut self, path: String, io: LinkIo) {
        let id = self.next_id();
        let LinkIo {
            writer,
            mut signals,
            task,
        } = io;
        let inbox = self.inbox.clone();

        let forwarder = tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let last = !matches!(signal, LinkSignal::Line(_));

                if inbox
                    .send(Message::Inform(Inform::Link { id, signal }))
                    .is_err()
                    || last
                {
                    return;
                }
            }

            // The link task went away without saying so.
            let _ = inbox.send(Message::Inform(Inform::Link {
                id,
                signal: LinkSignal::Closed,
            }));
        });

        info!(%path, "Link open");

        self.link = Some(ActiveLink {
            id,
            path,
            writer,
            task,
            forwarder,
        });
    }

    fn on_link_signal(&mut self, id: u64, signal: LinkSignal) {
        if self.link.as_ref().map(|link| link.id) != Some(id) {
            trace!(%signal, "Signal from a previous link");
            return;
        }

        match signal {
            LinkSignal::Line(line) => self.on_line(&line),
            LinkSignal::Error(problem) => {
                warn!(%problem, "Link failed");
                self.closed(Error::Io(problem).to_string(), true);
            }
            LinkSignal::Closed => {
                warn!("Device went away");
                self.closed(Error::Io("port closed".into()).to_string(), true);
            }
        }
    }

    fn on_line(&mut self, line: &str) {
        let decoded = decoder::decode(line);
        let announced = decoded.has_hazard();

        if let Some(reading) = decoded.reading {
            let alert = if announced {
                None
            } else {
                hazard::alert_for(&reading, None)
            };

            self.events.send_event(Event::Reading(reading));

            if let Some(alert) = alert {
                self.events.send_event(Event::Control(alert));
            }
        }

        for event in decoded.events {
            self.events.send_event(Event::Control(event));
        }
    }

    fn on_tick(&mut self, tick: Tick) {
        if !self.scheduler.accept(tick) {
            return;
        }

        match tick.timer {
            TimerName::InitialConnect => {
                if self.attempt.is_none() && self.link.is_none() {
                    self.begin_discovery(None, None);
                }
            }
            TimerName::Reconnect => self.on_reconnect_tick(),
            TimerName::DemoArm => {
                if self.state == LinkState::Open {
                    debug!("Device present, no demo data");
                } else if self.demo.start(&mut self.scheduler) {
                    if matches!(self.state, LinkState::Idle | LinkState::Closed) {
                        self.transition(LinkState::Demo, self.error.clone());
                    } else {
                        self.publish_status();
                    }
                }
            }
            TimerName::DemoTick => {
                if self.state == LinkState::Open {
                    self.demo.stop(&mut self.scheduler);
                    return;
                }

                let sample = self.demo.synthesize();
                self.events.send_event(Event::Reading(sample.reading));
                for event in sample.events {
                    self.events.send_event(Event::Control(event));
                }
            }
            TimerName::HealthCheck => self.start_supervisor_if_idle(),
        }
    }

    fn on_reconnect_tick(&mut self) {
        if self.state == LinkState::Open {
            self.supervisor.stop(&mut self.scheduler);
            return;
        }

        if self.attempt.is_some() {
            trace!("Attempt in flight, skipping this retry");
            return;
        }

        if self.link.take().is_some() {
            debug!("Dropped a stale link");
        }

        self.begin_discovery(None, None);
    }

    fn relay(&mut self, command: RelayCommand) -> Result<LinkResponse, Error> {
        let link = match (&self.state, &self.link) {
            (LinkState::Open, Some(link)) => link,
            _ => {
                warn!(%command, state = %self.state, "Link not open, relay command dropped");
                return Ok(LinkResponse::Relay(RelayOutcome::Refused));
            }
        };

        link.writer
            .send(command.to_wire())
            .map_err(|_| Error::Io("link is closing".into()))?;

        info!(%command, "Relay command written");
        self.events
            .send_event(Event::Control(ControlEvent::relay_status(command.turn_on)));

        Ok(LinkResponse::Relay(RelayOutcome::Written))
    }

    fn handle_request(&mut self, Request { action, response }: Request) -> Flow {
        debug!(?action, "Request");

        let result = match action {
            Action::ListCandidates => {
                let listing = self.enumerator.list_ports();
                let inbox = self.inbox.clone();

                tokio::spawn(async move {
                    let result = listing.await;
                    let _ = inbox.send(Message::Inform(Inform::Listed { result, response }));
                });
                return Flow::Continue;
            }
            Action::Connect(preferred) => {
                if self.attempt.is_some() {
                    Err(Error::AttemptInFlight)
                } else {
                    self.drop_link_for_new_attempt();
                    self.begin_discovery(preferred, Some(response));
                    return Flow::Continue;
                }
            }
            Action::ConnectTo(path) => {
                if self.attempt.is_some() {
                    Err(Error::AttemptInFlight)
                } else {
                    self.drop_link_for_new_attempt();
                    let attempt = Attempt {
                        id: 0,
                        preferred: Some(path.clone()),
                        response: Some(response),
                    };
                    self.begin_open(attempt, path);
                    return Flow::Continue;
                }
            }
            Action::Relay(command) => self.relay(command),
            Action::Status => Ok(LinkResponse::Status(self.status())),
            Action::CheckHealth => {
                self.start_supervisor_if_idle();
                Ok(LinkResponse::Done)
            }
            Action::ActiveTimers => Ok(LinkResponse::Timers(self.scheduler.active())),
            Action::Shutdown => {
                info!("Shutting down");
                self.scheduler.cancel_all();
                self.supervisor.stop(&mut self.scheduler);
                self.demo.stop(&mut self.scheduler);
                self.attempt = None;
                self.link = None;
                self.transition(LinkState::Closed, None);

                let _ = response.send(Ok(LinkResponse::Done));
                return Flow::Stop;
            }
        };

        let _ = response.send(result);
        Flow::Continue
    }

    fn handle_inform(&mut self, inform: Inform) {
        match inform {
            Inform::Tick(tick) => self.on_tick(tick),
            Inform::Listed { result, response } => {
                if let Err(e) = &result {
                    warn!(%e, "Listing ports failed");
                    self.error = Some(e.to_string());
                    self.publish_status();
                }
                let _ = response.send(result.map(LinkResponse::Candidates));
            }
            Inform::Discovered { attempt, result } => self.on_discovered(attempt, result),
            Inform::Opened {
                attempt,
                path,
                result,
            } => self.on_opened(attempt, path, result),
            Inform::Link { id, signal } => self.on_link_signal(id, signal),
        }
    }

    fn boot(&mut self) {
        let timings = &self.config.timings;

        self.scheduler
            .once(TimerName::InitialConnect, timings.initial_connect_delay());
        self.scheduler
            .every(TimerName::HealthCheck, timings.health_check_interval());
        self.demo.arm(&mut self.scheduler);
    }

    async fn run(mut self, mut messages: mpsc::UnboundedReceiver<Message>) {
        self.boot();

        while let Some(message) = messages.recv().await {
            let flow = match message {
                Message::Request(request) => self.handle_request(request),
                Message::Inform(inform) => {
                    self.handle_inform(inform);
                    Flow::Continue
                }
            };

            if flow == Flow::Stop {
                break;
            }
        }

        debug!("Link actor done");
    }
}

/// A handle to the link actor.
///
/// Clones talk to the same actor.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    messages: mpsc::UnboundedSender<Message>,
    events: Events,
}

impl LinkHandle {
    /// Spawn the actor using the serial ports of this machine.
    pub fn system(config: &Config) -> Self {
        Self::spawn(config, SystemPorts, SerialTransport)
    }

    /// Spawn the actor. It starts its timers right away.
    pub fn spawn<E: PortEnumerator, T: Transport>(
        config: &Config,
        enumerator: E,
        transport: T,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = Events::default();

        let actor = LinkActor {
            config: config.clone(),
            enumerator: Box::new(enumerator),
            transport: Box::new(transport),
            events: events.clone(),
            inbox: tx.clone(),
            state: LinkState::Idle,
            error: None,
            link: None,
            attempt: None,
            next_id: 0,
            scheduler: Scheduler::new(tx.clone(), |tick| Message::Inform(Inform::Tick(tick))),
            supervisor: ReconnectSupervisor::new(config.timings.reconnect_interval()),
            demo: DemoGenerator::new(
                config.demo.clone(),
                config.timings.demo_grace(),
                config.timings.demo_interval(),
            ),
        };

        tokio::spawn(actor.run(rx).instrument(info_span!("link")));

        Self {
            messages: tx,
            events,
        }
    }

    async fn perform(&self, action: Action) -> Result<LinkResponse, Error> {
        let (tx, rx) = oneshot::channel();

        self.messages
            .send(Message::Request(Request {
                action,
                response: tx,
            }))
            .map_err(|_| Error::ActorGone)?;

        rx.await.map_err(|_| Error::ActorGone)?
    }

    /// Receive everything the link produces from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.events.subscribe()
    }

    /// Tell every subscriber something which did not come from the link.
    pub fn announce(&self, event: Event) {
        self.events.send_event(event);
    }

    /// The ports currently present.
    pub async fn list_candidates(&self) -> Result<Vec<PortDescriptor>, Error> {
        match self.perform(Action::ListCandidates).await? {
            LinkResponse::Candidates(candidates) => Ok(candidates),
            other => unreachable!("Unexpected response: {other:?}"),
        }
    }

    /// Discover and connect, trying `preferred` first if given.
    /// Resolves once the attempt succeeded or failed.
    pub async fn connect(&self, preferred: Option<String>) -> Result<Status, Error> {
        self.expect_status(Action::Connect(preferred)).await
    }

    /// Connect to this path, without looking at which ports are present.
    pub async fn connect_to(&self, path: &str) -> Result<Status, Error> {
        self.expect_status(Action::ConnectTo(path.into())).await
    }

    /// Switch the relay. Only written if the link is open.
    pub async fn send_relay(&self, command: RelayCommand) -> Result<RelayOutcome, Error> {
        match self.perform(Action::Relay(command)).await? {
            LinkResponse::Relay(outcome) => Ok(outcome),
            other => unreachable!("Unexpected response: {other:?}"),
        }
    }

    /// The current status.
    pub async fn status(&self) -> Result<Status, Error> {
        self.expect_status(Action::Status).await
    }

    /// Start reconnecting if the link is down and nobody is on it.
    pub async fn check_health(&self) -> Result<(), Error> {
        self.perform(Action::CheckHealth).await.map(|_| ())
    }

    /// Which timers are running.
    pub async fn active_timers(&self) -> Result<Vec<TimerName>, Error> {
        match self.perform(Action::ActiveTimers).await? {
            LinkResponse::Timers(timers) => Ok(timers),
            other => unreachable!("Unexpected response: {other:?}"),
        }
    }

    /// Stop all timers, close the link and stop the actor.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.perform(Action::Shutdown).await.map(|_| ())
    }

    async fn expect_status(&self, action: Action) -> Result<Status, Error> {
        match self.perform(action).await? {
            LinkResponse::Status(status) => Ok(status),
            other => unreachable!("Unexpected response: {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::DemoConfig,
        hazard::HAZARD_MESSAGE,
        mock::MockBench,
        reading::{ControlKind, Mode, Provenance, SensorReading},
    };

    const ACM: &str = "/dev/ttyACM0";
    const USB: &str = "/dev/ttyUSB1";

    fn config(demo: bool) -> Config {
        Config {
            demo: DemoConfig {
                enabled: demo,
                seed: Some(3),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn spawn(
        config: Config,
        bench: &MockBench,
    ) -> (LinkHandle, broadcast::Receiver<TimestampedEvent>) {
        let handle = LinkHandle::spawn(&config, bench.clone(), bench.clone());
        let events = handle.subscribe();
        (handle, events)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn next_event(events: &mut broadcast::Receiver<TimestampedEvent>) -> Event {
        tokio::time::timeout(Duration::from_secs(120), events.recv())
            .await
            .expect("Timed out waiting for an event")
            .expect("Event channel failed")
            .inner
    }

    async fn wait_for_state(
        events: &mut broadcast::Receiver<TimestampedEvent>,
        state: LinkState,
    ) -> Status {
        loop {
            if let Event::Status(status) = next_event(events).await {
                if status.state == state {
                    return status;
                }
            }
        }
    }

    async fn next_reading(events: &mut broadcast::Receiver<TimestampedEvent>) -> SensorReading {
        loop {
            if let Event::Reading(reading) = next_event(events).await {
                return reading;
            }
        }
    }

    async fn next_control(events: &mut broadcast::Receiver<TimestampedEvent>) -> ControlEvent {
        loop {
            if let Event::Control(control) = next_event(events).await {
                return control;
            }
        }
    }

    fn drain(events: &mut broadcast::Receiver<TimestampedEvent>) -> Vec<Event> {
        let mut drained = vec![];
        while let Ok(event) = events.try_recv() {
            drained.push(event.inner);
        }
        drained
    }

    #[tokio::test(start_paused = true)]
    async fn connects_at_boot_and_forwards_lines() {
        let bench = MockBench::new();
        bench.plug(PortDescriptor::new(ACM));
        let (_handle, mut events) = spawn(config(false), &bench);

        let status = wait_for_state(&mut events, LinkState::Open).await;
        assert!(status.connected);
        assert!(!status.demo);
        assert_eq!(status.port.as_deref(), Some(ACM));

        bench.emit(ACM, "Mode: MANUAL | Relay: ON | Flame: No | Gas: 123 | Motion: No");
        let reading = next_reading(&mut events).await;
        assert_eq!(reading.provenance, Provenance::Device);
        assert_eq!(reading.mode, Some(Mode::Manual));
        assert_eq!(reading.relay_on, Some(true));
        assert_eq!(reading.gas_level, 123);

        bench.emit(ACM, "Flame: DETECTED Gas: 500 Motion: None");
        let Event::Reading(reading) = next_event(&mut events).await else {
            panic!("Expected the reading first");
        };
        assert_eq!(reading.provenance, Provenance::DeviceLegacy);
        assert!(reading.flame_detected);

        // The hazard follows the reading which caused it.
        let Event::Control(alert) = next_event(&mut events).await else {
            panic!("Expected a hazard");
        };
        assert_eq!(alert.kind, ControlKind::Hazard);
        assert_eq!(alert.payload, HAZARD_MESSAGE);

        bench.emit(ACM, "temperature 21, gas 250");
        let reading = next_reading(&mut events).await;
        assert_eq!(reading.provenance, Provenance::DeviceFallback);
        assert_eq!(reading.gas_level, 250);

        bench.emit(ACM, "Switched to MANUAL mode");
        let control = next_control(&mut events).await;
        assert_eq!(control.kind, ControlKind::ModeChange);
        assert_eq!(control.payload, "MANUAL");

        // Nothing to see here, and no harm done.
        bench.emit(ACM, "%%garbage%%");
        settle().await;
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn relay_is_only_written_when_open() {
        let bench = MockBench::new();
        let (handle, mut events) = spawn(config(false), &bench);

        assert_eq!(
            handle.send_relay(RelayCommand::on()).await.unwrap(),
            RelayOutcome::Refused
        );
        assert_eq!(bench.opens(), 0);
        assert!(drain(&mut events).is_empty());

        bench.plug(PortDescriptor::new(ACM));
        let status = handle.connect(None).await.unwrap();
        assert_eq!(status.state, LinkState::Open);
        drain(&mut events);

        assert_eq!(
            handle.send_relay(RelayCommand::on()).await.unwrap(),
            RelayOutcome::Written
        );
        assert_eq!(
            handle.send_relay(RelayCommand::off()).await.unwrap(),
            RelayOutcome::Written
        );
        assert_eq!(bench.written(ACM), vec![b"1\n".to_vec(), b"0\n".to_vec()]);

        let payloads = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                Event::Control(control) if control.kind == ControlKind::RelayStatus => {
                    Some(control.payload)
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(payloads, vec!["ON", "OFF"]);
    }

    #[tokio::test(start_paused = true)]
    async fn opening_stops_demo_and_reconnection() {
        let bench = MockBench::new();
        let (handle, mut events) = spawn(config(true), &bench);

        let status = wait_for_state(&mut events, LinkState::Closed).await;
        assert_eq!(status.error.as_deref(), Some("no device found"));

        // No device within the grace period.
        loop {
            let reading = next_reading(&mut events).await;
            if reading.provenance == Provenance::Demo {
                break;
            }
        }

        let timers = handle.active_timers().await.unwrap();
        assert!(timers.contains(&TimerName::DemoTick));
        assert!(timers.contains(&TimerName::Reconnect));
        assert!(handle.status().await.unwrap().demo);

        bench.plug(PortDescriptor::new(ACM));
        let status = wait_for_state(&mut events, LinkState::Open).await;
        assert!(!status.demo);

        assert_eq!(
            handle.active_timers().await.unwrap(),
            vec![TimerName::HealthCheck]
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        let demo_readings = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, Event::Reading(r) if r.provenance == Provenance::Demo))
            .count();
        assert_eq!(demo_readings, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_unplug() {
        let bench = MockBench::new();
        bench.plug(PortDescriptor::new(ACM));
        let (_handle, mut events) = spawn(config(false), &bench);

        wait_for_state(&mut events, LinkState::Open).await;

        bench.unplug(ACM);
        let status = wait_for_state(&mut events, LinkState::Closed).await;
        assert!(!status.connected);
        assert!(status.error.unwrap().contains("port closed"));

        wait_for_state(&mut events, LinkState::Reconnecting).await;

        bench.plug(PortDescriptor::new(ACM));
        wait_for_state(&mut events, LinkState::Open).await;
        assert_eq!(bench.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn link_error_is_reported() {
        let bench = MockBench::new();
        bench.plug(PortDescriptor::new(ACM));
        let (_handle, mut events) = spawn(config(false), &bench);

        wait_for_state(&mut events, LinkState::Open).await;

        bench.break_link(ACM, "Broken pipe");
        let status = wait_for_state(&mut events, LinkState::Closed).await;
        assert!(status.error.unwrap().contains("Broken pipe"));

        let status = wait_for_state(&mut events, LinkState::Reconnecting).await;
        assert!(status.error.unwrap().contains("Broken pipe"));
    }

    #[tokio::test(start_paused = true)]
    async fn health_checks_start_reconnecting_once() {
        let bench = MockBench::new();
        let (handle, mut events) = spawn(config(false), &bench);

        wait_for_state(&mut events, LinkState::Closed).await;
        assert!(!handle
            .active_timers()
            .await
            .unwrap()
            .contains(&TimerName::Reconnect));

        let (a, b, c) = tokio::join!(
            handle.check_health(),
            handle.check_health(),
            handle.check_health()
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        handle.check_health().await.unwrap();

        let reconnecting = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, Event::Status(s) if s.state == LinkState::Reconnecting))
            .count();
        assert_eq!(reconnecting, 1);
        assert!(handle
            .active_timers()
            .await
            .unwrap()
            .contains(&TimerName::Reconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn enumeration_error_does_not_transition() {
        let bench = MockBench::new();
        bench.fail_enumeration(Some("permission denied"));
        let (handle, _events) = spawn(config(false), &bench);

        let err = handle.list_candidates().await.unwrap_err();
        assert_eq!(err, Error::Enumeration("permission denied".into()));

        // The initial attempt fails the same way.
        tokio::time::sleep(Duration::from_secs(5)).await;

        let status = handle.status().await.unwrap();
        assert_eq!(status.state, LinkState::Idle);
        assert!(status.error.unwrap().contains("permission denied"));

        bench.fail_enumeration(None);
        bench.plug(PortDescriptor::with_manufacturer("/dev/cu.usbmodem1", "Arduino (www.arduino.cc)"));
        let candidates = handle.list_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_recovers_from_failed_boot_enumeration() {
        let bench = MockBench::new();
        bench.fail_enumeration(Some("permission denied"));
        let (handle, mut events) = spawn(config(false), &bench);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.status().await.unwrap().state, LinkState::Idle);

        bench.fail_enumeration(None);
        bench.plug(PortDescriptor::new(ACM));

        let status = wait_for_state(&mut events, LinkState::Open).await;
        assert_eq!(status.port.as_deref(), Some(ACM));
        assert_eq!(bench.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delays_are_honoured() {
        let bench = MockBench::new();
        bench.plug(PortDescriptor::new(ACM));

        let mut config = config(true);
        config.timings.initial_connect_delay_ms = 0;
        config.timings.demo_grace_ms = 0;
        config.validate().unwrap();

        let (_handle, mut events) = spawn(config, &bench);

        let status = wait_for_state(&mut events, LinkState::Open).await;
        assert_eq!(status.port.as_deref(), Some(ACM));
    }

    #[tokio::test(start_paused = true)]
    async fn announced_hazard_is_not_repeated() {
        let bench = MockBench::new();
        bench.plug(PortDescriptor::new(ACM));
        let (_handle, mut events) = spawn(config(false), &bench);

        wait_for_state(&mut events, LinkState::Open).await;

        bench.emit(
            ACM,
            "Flame: DETECTED Gas: 500 Motion: None Hazard detected! Relay activated.",
        );
        let reading = next_reading(&mut events).await;
        assert!(reading.is_hazard());

        settle().await;
        let hazards = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, Event::Control(c) if c.kind == ControlKind::Hazard))
            .count();
        assert_eq!(hazards, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_arms_reconnection() {
        let bench = MockBench::new();
        bench.plug(PortDescriptor::new(ACM));
        bench.refuse_open(ACM, "Access denied");
        let (_handle, mut events) = spawn(config(false), &bench);

        wait_for_state(&mut events, LinkState::Connecting).await;
        let status = wait_for_state(&mut events, LinkState::Closed).await;
        assert!(status.error.unwrap().contains("Access denied"));

        wait_for_state(&mut events, LinkState::Reconnecting).await;
        assert_eq!(bench.opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn preferred_port_wins() {
        let bench = MockBench::new();
        bench.plug(PortDescriptor::new(ACM));
        bench.plug(PortDescriptor::new("/dev/ttyS5"));
        let config = Config {
            preferred_port: Some("/dev/ttyS5".into()),
            ..config(false)
        };
        let (_handle, mut events) = spawn(config, &bench);

        let status = wait_for_state(&mut events, LinkState::Open).await;
        assert_eq!(status.port.as_deref(), Some("/dev/ttyS5"));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_replaces_link() {
        let bench = MockBench::new();
        bench.plug(PortDescriptor::new(ACM));
        bench.plug(PortDescriptor::new(USB));
        let (handle, mut events) = spawn(config(false), &bench);

        let status = wait_for_state(&mut events, LinkState::Open).await;
        assert_eq!(status.port.as_deref(), Some(ACM));

        let status = handle.connect_to(USB).await.unwrap();
        assert_eq!(status.state, LinkState::Open);
        assert_eq!(status.port.as_deref(), Some(USB));

        settle().await;
        assert!(!bench.is_open(ACM));
        assert!(bench.is_open(USB));
        assert!(!bench.emit(ACM, "Flame: YES | Gas: 1 | Motion: No"));
    }

    #[tokio::test(start_paused = true)]
    async fn one_attempt_at_a_time() {
        let bench = MockBench::new();
        bench.plug(PortDescriptor::new(ACM));
        bench.delay_open(Duration::from_millis(500));
        let (handle, _events) = spawn(config(false), &bench);

        let (first, second) = tokio::join!(handle.connect_to(ACM), handle.connect_to(ACM));

        assert_eq!(first.unwrap().state, LinkState::Open);
        assert_eq!(second.unwrap_err(), Error::AttemptInFlight);
        assert_eq!(bench.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_actor() {
        let bench = MockBench::new();
        bench.plug(PortDescriptor::new(ACM));
        let (handle, mut events) = spawn(config(true), &bench);

        wait_for_state(&mut events, LinkState::Open).await;
        handle.shutdown().await.unwrap();

        settle().await;
        assert!(!bench.is_open(ACM));
        assert_eq!(handle.status().await.unwrap_err(), Error::ActorGone);
    }
}
