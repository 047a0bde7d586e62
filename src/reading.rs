use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which code path produced a [`SensorReading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Provenance {
    /// The device, current firmware output.
    Device,

    /// The device, older firmware output.
    DeviceLegacy,

    /// The device, but the line matched no known format
    /// and values were extracted on a best-effort basis.
    DeviceFallback,

    /// Synthesized while no device is connected.
    Demo,
}

impl Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Provenance::Device => "device",
            Provenance::DeviceLegacy => "deviceLegacy",
            Provenance::DeviceFallback => "deviceFallback",
            Provenance::Demo => "demo",
        };
        write!(f, "{s}")
    }
}

/// The operating mode the device reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// The device drives the relay itself.
    #[default]
    Auto,

    /// The relay is driven by commands.
    Manual,
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Auto => write!(f, "AUTO"),
            Mode::Manual => write!(f, "MANUAL"),
        }
    }
}

/// One set of sensor values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    /// Whether the flame sensor triggered.
    pub flame_detected: bool,

    /// Raw gas sensor level.
    pub gas_level: u32,

    /// Whether the motion sensor triggered.
    pub motion_detected: bool,

    /// The relay state, if the source reports it.
    pub relay_on: Option<bool>,

    /// The device mode, if the source reports it.
    pub mode: Option<Mode>,

    /// When the reading was produced.
    pub timestamp: DateTime<Utc>,

    /// Which path produced it.
    pub provenance: Provenance,
}

impl SensorReading {
    /// A reading of the three mandatory values, timestamped now.
    pub fn new(flame_detected: bool, gas_level: u32, motion_detected: bool, provenance: Provenance) -> Self {
        Self {
            flame_detected,
            gas_level,
            motion_detected,
            relay_on: None,
            mode: None,
            timestamp: Utc::now(),
            provenance,
        }
    }

    /// Set relay and mode.
    pub fn with_relay_and_mode(mut self, relay_on: bool, mode: Mode) -> Self {
        self.relay_on = Some(relay_on);
        self.mode = Some(mode);
        self
    }

    /// See [`crate::hazard::is_hazard`].
    pub fn is_hazard(&self) -> bool {
        crate::hazard::is_hazard(self)
    }
}

impl Display for SensorReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "flame: {}, gas: {}, motion: {} ({})",
            self.flame_detected, self.gas_level, self.motion_detected, self.provenance
        )
    }
}

/// What a [`ControlEvent`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlKind {
    /// Something is on fire, leaking or moving.
    Hazard,

    /// The device received an infrared remote command.
    IrCommand,

    /// The device switched mode.
    ModeChange,

    /// The relay changed state.
    RelayStatus,
}

impl Display for ControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ControlKind::Hazard => "hazard",
            ControlKind::IrCommand => "irCommand",
            ControlKind::ModeChange => "modeChange",
            ControlKind::RelayStatus => "relayStatus",
        };
        write!(f, "{s}")
    }
}

/// A discrete occurrence reported by the device (or the demo source).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEvent {
    /// The kind.
    pub kind: ControlKind,

    /// A message describing the event.
    /// For mode changes this is the new mode, for relay status `ON` or `OFF`.
    pub payload: String,

    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
}

impl ControlEvent {
    /// A new event, timestamped now.
    pub fn new<S: Into<String>>(kind: ControlKind, payload: S) -> Self {
        Self {
            kind,
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }

    /// A relay status event.
    pub fn relay_status(on: bool) -> Self {
        Self::new(ControlKind::RelayStatus, if on { "ON" } else { "OFF" })
    }

    /// A mode change event.
    pub fn mode_change(mode: Mode) -> Self {
        Self::new(ControlKind::ModeChange, mode.to_string())
    }
}

impl Display for ControlEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.payload)
    }
}

/// Ask the device to switch its relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayCommand {
    /// On or off.
    pub turn_on: bool,
}

impl RelayCommand {
    /// Turn the relay on.
    pub fn on() -> Self {
        Self { turn_on: true }
    }

    /// Turn the relay off.
    pub fn off() -> Self {
        Self { turn_on: false }
    }

    /// The bytes the firmware expects, newline included.
    pub fn to_wire(self) -> Vec<u8> {
        if self.turn_on {
            b"1\n".to_vec()
        } else {
            b"0\n".to_vec()
        }
    }
}

impl Display for RelayCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "relay {}", if self.turn_on { "ON" } else { "OFF" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_wire_tokens() {
        assert_eq!(RelayCommand::on().to_wire(), b"1\n");
        assert_eq!(RelayCommand::off().to_wire(), b"0\n");
    }

    #[test]
    fn provenance_tags_are_distinct() {
        let tags = [
            Provenance::Device,
            Provenance::DeviceLegacy,
            Provenance::DeviceFallback,
            Provenance::Demo,
        ]
        .map(|p| serde_json::to_string(&p).unwrap());

        assert_eq!(
            tags,
            [
                "\"device\"",
                "\"deviceLegacy\"",
                "\"deviceFallback\"",
                "\"demo\""
            ]
        );
    }

    #[test]
    fn reading_serializes_camel_case() {
        let reading = SensorReading::new(true, 12, false, Provenance::Demo);
        let json = serde_json::to_value(&reading).unwrap();

        assert_eq!(json["flameDetected"], true);
        assert_eq!(json["gasLevel"], 12);
        assert_eq!(json["provenance"], "demo");
        assert!(json["relayOn"].is_null());
    }
}
