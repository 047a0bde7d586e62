use crate::reading::{ControlEvent, ControlKind, SensorReading};

/// Gas levels strictly above this are hazardous.
pub const GAS_THRESHOLD: u32 = 400;

/// The message the firmware prints when it trips the relay.
pub const HAZARD_MESSAGE: &str = "Hazard detected! Relay activated.";

/// Whether a reading signals an alarm state.
pub fn is_hazard(reading: &SensorReading) -> bool {
    reading.flame_detected || reading.gas_level > GAS_THRESHOLD || reading.motion_detected
}

/// The hazard event to raise for this reading, if any.
///
/// The message is prefixed, which allows subscribers to tell synthetic alarms apart.
pub fn alert_for(reading: &SensorReading, prefix: Option<&str>) -> Option<ControlEvent> {
    if !is_hazard(reading) {
        return None;
    }

    let message = match prefix {
        Some(prefix) => format!("{prefix}{HAZARD_MESSAGE}"),
        None => HAZARD_MESSAGE.to_string(),
    };

    Some(ControlEvent::new(ControlKind::Hazard, message))
}
