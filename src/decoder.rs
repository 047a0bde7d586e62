//! Turns one line of device output into typed readings and events.
//!
//! The firmware has printed its status in a few different ways over the years.
//! Each way is a [`LineFormat`], and [`FORMATS`] lists them from newest to oldest,
//! ending with a best-effort scan which accepts anything that looks like a sensor value.
//! The first format producing a reading wins.
//!
//! Control events (hazards, IR commands, banners) are looked for on every line,
//! independently of whether a reading was found.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::{
    hazard::HAZARD_MESSAGE,
    reading::{ControlEvent, ControlKind, Mode, Provenance, SensorReading},
};

/// Printed by the firmware once after reset.
pub const BOOT_BANNER: &str = "Fire Prevention System Started";

/// Lines containing this were caused by the infrared remote.
pub const IR_MARKER: &str = "via IR";

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("Patterns are fixed and valid")
}

static CURRENT_FLAME: LazyLock<Regex> = LazyLock::new(|| regex(r"Flame:\s*(YES|No)\b"));
static CURRENT_MOTION: LazyLock<Regex> = LazyLock::new(|| regex(r"Motion:\s*(YES|No)\b"));
static CURRENT_RELAY: LazyLock<Regex> = LazyLock::new(|| regex(r"Relay:\s*(ON|OFF)\b"));
static CURRENT_MODE: LazyLock<Regex> = LazyLock::new(|| regex(r"Mode:\s*(AUTO|MANUAL)\b"));

static LEGACY_FLAME: LazyLock<Regex> = LazyLock::new(|| regex(r"Flame:\s*(DETECTED|Safe)\b"));
static LEGACY_MOTION: LazyLock<Regex> = LazyLock::new(|| regex(r"Motion:\s*(DETECTED|None)\b"));

static GAS: LazyLock<Regex> = LazyLock::new(|| regex(r"Gas:\s*([0-9]+)"));

static ANY_FLAME: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)\bflame\b(?:[^0-9a-z]*([a-z]+))?"));
static ANY_MOTION: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)\bmotion\b(?:[^0-9a-z]*([a-z]+))?"));
static ANY_GAS: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)\bgas\b(?:[^0-9a-z]*([0-9]+))?"));

static MODE_BANNER: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)\bswitched to (auto|manual) mode\b"));
static RELAY_BANNER: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)\brelay turned (on|off)\b"));

/// The outcome of decoding a single line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Decoded {
    /// The reading, if any format matched.
    pub reading: Option<SensorReading>,

    /// Control events found on the line.
    pub events: Vec<ControlEvent>,
}

impl Decoded {
    /// Neither a reading nor any event.
    pub fn is_miss(&self) -> bool {
        self.reading.is_none() && self.events.is_empty()
    }

    /// Whether the line itself announced a hazard.
    pub fn has_hazard(&self) -> bool {
        self.events
            .iter()
            .any(|event| event.kind == ControlKind::Hazard)
    }
}

/// A way the firmware formats its status lines.
#[derive(Debug, Clone, Copy)]
pub struct LineFormat {
    /// For logging.
    pub name: &'static str,

    /// Produce a reading if the line is in this format.
    pub decode: fn(&str) -> Option<SensorReading>,
}

/// Every known format in the order they are tried.
pub const FORMATS: [LineFormat; 3] = [
    LineFormat {
        name: "current",
        decode: decode_current,
    },
    LineFormat {
        name: "legacy",
        decode: decode_legacy,
    },
    LineFormat {
        name: "fallback",
        decode: decode_fallback,
    },
];

fn capture<'a>(re: &Regex, line: &'a str) -> Option<&'a str> {
    re.captures(line)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str())
}

/// Digits only, so the only way parsing fails is a value beyond the sensor's range.
fn saturating_level(digits: &str) -> u32 {
    digits.parse().unwrap_or(u32::MAX)
}

fn gas(line: &str) -> Option<u32> {
    capture(&GAS, line).map(saturating_level)
}

/// `Mode: AUTO | Relay: OFF | Flame: No | Gas: 123 | Motion: No`
///
/// Flame, gas and motion must all be there.
/// Relay and mode are defaulted to off and automatic when missing.
pub fn decode_current(line: &str) -> Option<SensorReading> {
    let flame = capture(&CURRENT_FLAME, line)?;
    let gas = gas(line)?;
    let motion = capture(&CURRENT_MOTION, line)?;

    let relay = capture(&CURRENT_RELAY, line).map_or(false, |relay| relay == "ON");
    let mode = match capture(&CURRENT_MODE, line) {
        Some("MANUAL") => Mode::Manual,
        _ => Mode::Auto,
    };

    Some(
        SensorReading::new(flame == "YES", gas, motion == "YES", Provenance::Device)
            .with_relay_and_mode(relay, mode),
    )
}

/// `Flame: DETECTED Gas: 500 Motion: None`
pub fn decode_legacy(line: &str) -> Option<SensorReading> {
    let flame = capture(&LEGACY_FLAME, line)?;
    let gas = gas(line)?;
    let motion = capture(&LEGACY_MOTION, line)?;

    Some(SensorReading::new(
        flame == "DETECTED",
        gas,
        motion == "DETECTED",
        Provenance::DeviceLegacy,
    ))
}

fn truthy(value: Option<&str>) -> bool {
    value.map_or(false, |value| {
        ["yes", "detected", "true"]
            .iter()
            .any(|truthy| value.eq_ignore_ascii_case(truthy))
    })
}

/// Anything mentioning flame, gas or motion.
///
/// Missing values are taken as "nothing detected" and a gas level of zero.
pub fn decode_fallback(line: &str) -> Option<SensorReading> {
    let flame = ANY_FLAME.captures(line);
    let gas = ANY_GAS.captures(line);
    let motion = ANY_MOTION.captures(line);

    if flame.is_none() && gas.is_none() && motion.is_none() {
        return None;
    }

    let flame = truthy(flame.and_then(|c| c.get(1)).map(|m| m.as_str()));
    let motion = truthy(motion.and_then(|c| c.get(1)).map(|m| m.as_str()));
    let gas = gas
        .and_then(|c| c.get(1))
        .map_or(0, |m| saturating_level(m.as_str()));

    Some(SensorReading::new(
        flame,
        gas,
        motion,
        Provenance::DeviceFallback,
    ))
}

/// Look for control events on a line.
pub fn control_events(line: &str) -> Vec<ControlEvent> {
    let mut events = vec![];

    if line.contains(HAZARD_MESSAGE) {
        events.push(ControlEvent::new(ControlKind::Hazard, HAZARD_MESSAGE));
    }

    if line.contains(IR_MARKER) {
        events.push(ControlEvent::new(ControlKind::IrCommand, line));
    }

    if let Some(mode) = capture(&MODE_BANNER, line) {
        let mode = if mode.eq_ignore_ascii_case("manual") {
            Mode::Manual
        } else {
            Mode::Auto
        };
        events.push(ControlEvent::mode_change(mode));
    }

    if let Some(state) = capture(&RELAY_BANNER, line) {
        events.push(ControlEvent::relay_status(state.eq_ignore_ascii_case("on")));
    }

    events
}

/// Decode a line. Never fails; a line nobody understands gives an empty [`Decoded`].
pub fn decode(line: &str) -> Decoded {
    let line = line.trim();

    if line.contains(BOOT_BANNER) {
        info!("Device reports it has started");
    }

    let reading = FORMATS.iter().find_map(|format| {
        let reading = (format.decode)(line)?;
        debug!(format = format.name, %reading, "Decoded");
        Some(reading)
    });

    let decoded = Decoded {
        reading,
        events: control_events(line),
    };

    if decoded.is_miss() && !line.is_empty() {
        debug!(%line, "Line matched no format");
    }

    decoded
}
