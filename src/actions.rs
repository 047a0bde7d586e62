use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    error,
    events::{self, Event, TimestampedEvent},
    link::{LinkState, RelayOutcome, Status},
    ports::PortDescriptor,
    reading::{ControlEvent, ControlKind, Provenance, RelayCommand, SensorReading},
};

/// Actions a subscriber can ask of the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Action {
    /// Switch the relay of the connected device.
    ///
    /// Nothing is written if no device is connected,
    /// which is not an error.
    Relay(RelayCommand),

    /// Connect to the device at this path.
    /// An existing link is closed first.
    Connect(String),

    /// List the serial ports present.
    ListPorts,

    /// Get the current link status.
    Status,

    /// Share dashboard settings with every subscriber.
    UpdateSettings(serde_json::Value),
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Relay(command) => write!(f, "{command}"),
            Action::Connect(path) => write!(f, "connect: {path}"),
            Action::ListPorts => write!(f, "list ports"),
            Action::Status => write!(f, "status"),
            Action::UpdateSettings(_) => write!(f, "update settings"),
        }
    }
}

impl Action {
    /// Create a relay action.
    pub fn relay(turn_on: bool) -> Self {
        Self::Relay(RelayCommand { turn_on })
    }

    /// An example of switching the relay on.
    pub fn example_relay() -> Self {
        Self::relay(true)
    }

    /// Create a connect action.
    pub fn connect(path: &str) -> Self {
        Self::Connect(path.into())
    }

    /// An example of connecting to a port.
    pub fn example_connect() -> Self {
        Self::connect("/dev/ttyACM0")
    }

    /// An example of sharing settings.
    pub fn example_update_settings() -> Self {
        Self::UpdateSettings(serde_json::json!({ "gasThreshold": 400, "sound": false }))
    }

    /// Turn an action into serialized json.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!("Action could not be serialized: {e}"))
    }
}

/// A response type of "sync nature"- a direct response to a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Sync {
    /// What became of a relay action.
    Relay(RelayOutcome),

    /// The link status. The answer to a status request,
    /// and to a connect request once the attempt is over.
    Status(Status),

    /// The ports present.
    Ports(Vec<PortDescriptor>),

    /// The settings were shared.
    SettingsShared,
}

/// An async response type- might originate on the server side at any time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Async {
    /// An event.
    Event(events::TimestampedEvent),
}

/// Responses the server will send to connected subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Response {
    /// A synchronous response in the sense that it's sent directly after a request.
    Sync(Sync),

    /// An async message- the server might send this at any time and not in response to any
    /// particular request.
    Async(Async),
}

impl Response {
    pub(crate) fn relay(outcome: RelayOutcome) -> Self {
        Self::Sync(Sync::Relay(outcome))
    }

    /// An example of a relay response.
    pub fn example_relay() -> Self {
        Self::relay(RelayOutcome::Written)
    }

    pub(crate) fn status(status: Status) -> Self {
        Self::Sync(Sync::Status(status))
    }

    /// An example of a status response.
    pub fn example_status() -> Self {
        Self::status(example_status())
    }

    pub(crate) fn ports(ports: Vec<PortDescriptor>) -> Self {
        Self::Sync(Sync::Ports(ports))
    }

    /// An example of a port listing.
    pub fn example_ports() -> Self {
        Self::ports(vec![
            PortDescriptor::with_manufacturer("/dev/ttyACM0", "Arduino (www.arduino.cc)"),
            PortDescriptor::new("/dev/ttyS0"),
        ])
    }

    pub(crate) fn settings_shared() -> Self {
        Self::Sync(Sync::SettingsShared)
    }

    pub(crate) fn event(event: TimestampedEvent) -> Self {
        Self::Async(Async::Event(event))
    }

    /// An example of a new reading. These are async and might appear at any time.
    pub fn example_reading() -> Self {
        Self::event(TimestampedEvent::new(Event::Reading(SensorReading::new(
            false,
            123,
            true,
            Provenance::Device,
        ))))
    }

    /// An example of a hazard event.
    pub fn example_hazard() -> Self {
        Self::event(TimestampedEvent::new(Event::Control(ControlEvent::new(
            ControlKind::Hazard,
            crate::hazard::HAZARD_MESSAGE,
        ))))
    }
}

fn example_status() -> Status {
    Status {
        state: LinkState::Open,
        connected: true,
        demo: false,
        error: None,
        port: Some("/dev/ttyACM0".into()),
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Response::Sync(Sync::Relay(outcome)) => write!(f, "Relay: {outcome:?}"),
            Response::Sync(Sync::Status(status)) => write!(f, "Status: {status}"),
            Response::Sync(Sync::Ports(ports)) => write!(f, "{} port(s)", ports.len()),
            Response::Sync(Sync::SettingsShared) => write!(f, "Settings shared"),
            Response::Async(Async::Event(event)) => write!(f, "Event: `[{event}..]`"),
        }
    }
}

/// A fallible response.
pub type ResponseResult = Result<Response, error::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_request_json() {
        let action: Action = serde_json::from_str(r#"{"Relay":{"turnOn":true}}"#).unwrap();
        assert_eq!(action, Action::relay(true));

        assert_eq!(Action::ListPorts.serialize(), r#""ListPorts""#);
    }

    #[test]
    fn error_response_json() {
        let response: ResponseResult = Err(error::Error::AttemptInFlight);
        let json = serde_json::to_string(&response).unwrap();

        assert_eq!(json, r#"{"Err":"AttemptInFlight"}"#);
    }

    #[test]
    fn event_response_json() {
        let json = serde_json::to_value(Response::example_reading()).unwrap();
        let reading = &json["Async"]["Event"]["inner"]["Reading"];

        assert_eq!(reading["gasLevel"], 123);
        assert_eq!(reading["provenance"], "device");
    }
}
