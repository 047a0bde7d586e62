use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::Error, serial::DEFAULT_BAUD};

/// How often things happen, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Delay between start-up and the first connection attempt.
    pub initial_connect_delay_ms: u64,

    /// Time between reconnection attempts while the device is away.
    pub reconnect_interval_ms: u64,

    /// How long to wait for a device before producing demo data.
    pub demo_grace_ms: u64,

    /// Time between demo readings.
    pub demo_interval_ms: u64,

    /// Time between checks that a lost link is being recovered.
    pub health_check_interval_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            initial_connect_delay_ms: 1_000,
            reconnect_interval_ms: 2_000,
            demo_grace_ms: 10_000,
            demo_interval_ms: 2_000,
            health_check_interval_ms: 10_000,
        }
    }
}

impl Timings {
    /// See [`Timings::initial_connect_delay_ms`].
    pub fn initial_connect_delay(&self) -> Duration {
        Duration::from_millis(self.initial_connect_delay_ms)
    }

    /// See [`Timings::reconnect_interval_ms`].
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// See [`Timings::demo_grace_ms`].
    pub fn demo_grace(&self) -> Duration {
        Duration::from_millis(self.demo_grace_ms)
    }

    /// See [`Timings::demo_interval_ms`].
    pub fn demo_interval(&self) -> Duration {
        Duration::from_millis(self.demo_interval_ms)
    }

    /// See [`Timings::health_check_interval_ms`].
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

/// Synthetic data produced while no device is connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Whether demo data is produced at all.
    pub enabled: bool,

    /// Chance of a demo reading detecting flame.
    pub flame_probability: f64,

    /// Lowest demo gas level.
    pub gas_min: u32,

    /// Highest demo gas level.
    pub gas_max: u32,

    /// Chance of a demo reading detecting motion.
    pub motion_probability: f64,

    /// Chance of a demo tick also producing an IR command.
    pub ir_probability: f64,

    /// Fixed seed, for reproducible demo data.
    pub seed: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flame_probability: 0.05,
            gas_min: 100,
            gas_max: 700,
            motion_probability: 0.2,
            ir_probability: 0.02,
            seed: None,
        }
    }
}

/// The configuration used for running the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The baud rate of the device.
    pub baud_rate: u32,

    /// Tried first when present, before the recognition patterns.
    pub preferred_port: Option<String>,

    /// A port is a candidate if its path or manufacturer contains any of these.
    pub recognition: Vec<String>,

    /// See [`Timings`].
    pub timings: Timings,

    /// See [`DemoConfig`].
    pub demo: DemoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD,
            preferred_port: None,
            recognition: ["Arduino", "COM", "ttyUSB", "ttyACM"]
                .into_iter()
                .map(String::from)
                .collect(),
            timings: Timings::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            preferred_port: Some("COM7".into()),
            demo: DemoConfig {
                seed: Some(1234),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap_or_else(|e| format!("Could not serialize configuration: {e}"))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(p.as_ref()).map_err(|e| {
            Error::BadConfig(format!("Could not read {:?}: {e}", p.as_ref()))
        })?;

        Self::deserialize(&s)
    }

    fn check_timings(&self) -> Result<(), Error> {
        let t = &self.timings;

        for (name, value) in [
            ("reconnect_interval_ms", t.reconnect_interval_ms),
            ("demo_interval_ms", t.demo_interval_ms),
            ("health_check_interval_ms", t.health_check_interval_ms),
        ] {
            if value == 0 {
                return Err(Error::BadConfig(format!(
                    "The timing `{name}` repeats, so it can't be zero."
                )));
            }
        }

        Ok(())
    }

    fn check_demo(&self) -> Result<(), Error> {
        let demo = &self.demo;

        if demo.gas_min > demo.gas_max {
            return Err(Error::BadConfig(format!(
                "The demo gas range is empty: gas_min ({}) is above gas_max ({}).",
                demo.gas_min, demo.gas_max
            )));
        }

        for (name, value) in [
            ("flame_probability", demo.flame_probability),
            ("motion_probability", demo.motion_probability),
            ("ir_probability", demo.ir_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::BadConfig(format!(
                    "The demo `{name}` must be within 0 and 1, got {value}."
                )));
            }
        }

        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.baud_rate == 0 {
            return Err(Error::BadConfig("The baud rate can't be zero.".into()));
        }

        self.check_timings()?;
        self.check_demo()?;

        Ok(())
    }
}
