use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    link::Status,
    reading::{ControlEvent, SensorReading},
};

/// Anything subscribers are told about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    /// The link changed state, or someone asked.
    Status(Status),

    /// A new set of sensor values.
    Reading(SensorReading),

    /// Something the device (or demo source) reported.
    Control(ControlEvent),

    /// A subscriber changed the dashboard settings.
    SettingsUpdated(serde_json::Value),
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Status(status) => write!(f, "status: {status}"),
            Event::Reading(reading) => write!(f, "reading: {reading}"),
            Event::Control(control) => write!(f, "control: {control}"),
            Event::SettingsUpdated(_) => write!(f, "settings updated"),
        }
    }
}

/// An event and when it happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimestampedEvent {
    /// The event.
    pub inner: Event,

    /// When the event happened.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TimestampedEvent {
    /// Timestamp an event now.
    pub fn new(inner: Event) -> Self {
        Self {
            inner,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Display for TimestampedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// An event broadcaster.
///
/// Slow subscribers miss old events instead of holding up the sender.
#[derive(Debug, Clone)]
pub struct Events {
    tx: broadcast::Sender<TimestampedEvent>,
}

impl Events {
    /// Create a new events handler.
    /// Each subscriber may lag behind by at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event to current subscribers.
    pub fn send_event(&self, event: Event) {
        let event = TimestampedEvent::new(event);

        match &event.inner {
            Event::Reading(_) => debug!(%event, "Sending event"),
            _ => info!(%event, "Sending event"),
        }

        // Fails only when nobody is subscribed, which is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{ControlKind, Provenance};

    #[tokio::test]
    async fn delivered_in_order() {
        let events = Events::new(16);
        let mut rx = events.subscribe();

        let reading = SensorReading::new(true, 10, false, Provenance::Device);
        events.send_event(Event::Reading(reading.clone()));
        events.send_event(Event::Control(ControlEvent::new(
            ControlKind::Hazard,
            "fire",
        )));

        assert_eq!(rx.recv().await.unwrap().inner, Event::Reading(reading));
        assert!(matches!(
            rx.recv().await.unwrap().inner,
            Event::Control(ControlEvent {
                kind: ControlKind::Hazard,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn lagging_subscriber_loses_old_events() {
        let events = Events::new(2);
        let mut rx = events.subscribe();

        for gas in 0..5 {
            events.send_event(Event::Reading(SensorReading::new(
                false,
                gas,
                false,
                Provenance::Demo,
            )));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        let Event::Reading(reading) = rx.recv().await.unwrap().inner else {
            panic!("Expected a reading");
        };
        assert_eq!(reading.gas_level, 3);
    }

    #[test]
    fn sending_without_subscribers_is_fine() {
        Events::default().send_event(Event::SettingsUpdated(serde_json::json!({"theme": "dark"})));
    }
}
