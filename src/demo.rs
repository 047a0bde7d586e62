//! Synthetic readings for when no device is connected.
//!
//! The generator arms once after a grace period. From then on, every tick produces a reading
//! until a real device connects.

use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};

use crate::{
    config::DemoConfig,
    hazard,
    reading::{ControlEvent, ControlKind, Provenance, SensorReading},
    scheduler::{Scheduler, TimerName},
};

/// Prefix of demo hazard messages.
pub const DEMO_PREFIX: &str = "Demo: ";

/// What one demo tick produced, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoSample {
    /// Always present.
    pub reading: SensorReading,

    /// Hazard first, if the reading is hazardous, then possibly an IR command.
    pub events: Vec<ControlEvent>,
}

/// Owns the demo timers and the randomness.
#[derive(Debug)]
pub struct DemoGenerator {
    config: DemoConfig,
    grace: Duration,
    period: Duration,
    running: bool,
    rng: StdRng,
}

impl DemoGenerator {
    /// A stopped generator.
    /// Uses the configured seed if there is one.
    pub fn new(config: DemoConfig, grace: Duration, period: Duration) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            grace,
            period,
            running: false,
            rng,
        }
    }

    /// Arm the grace period. Does nothing if demo data is disabled.
    pub fn arm<M: Send + 'static>(&mut self, scheduler: &mut Scheduler<M>) {
        if !self.config.enabled {
            debug!("Demo data disabled");
            return;
        }

        scheduler.once(TimerName::DemoArm, self.grace);
    }

    /// Start producing readings.
    /// Returns false if already running or disabled.
    pub fn start<M: Send + 'static>(&mut self, scheduler: &mut Scheduler<M>) -> bool {
        if self.running || !self.config.enabled {
            return false;
        }

        scheduler.every(TimerName::DemoTick, self.period);
        self.running = true;
        info!(period = ?self.period, "No device, producing demo data");

        true
    }

    /// Stop producing readings.
    /// Returns false if it was not running.
    ///
    /// A pending arm stays pending, its owner decides on expiry whether to start.
    pub fn stop<M: Send + 'static>(&mut self, scheduler: &mut Scheduler<M>) -> bool {
        if !self.running {
            return false;
        }

        scheduler.cancel(TimerName::DemoTick);
        self.running = false;
        info!("Demo data stopped");

        true
    }

    /// Whether readings are being produced.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Produce one sample.
    pub fn synthesize(&mut self) -> DemoSample {
        let c = &self.config;

        let flame = self.rng.gen_bool(c.flame_probability);
        let gas = self.rng.gen_range(c.gas_min..=c.gas_max);
        let motion = self.rng.gen_bool(c.motion_probability);

        let reading = SensorReading::new(flame, gas, motion, Provenance::Demo);

        let mut events = Vec::new();

        if let Some(alert) = hazard::alert_for(&reading, Some(DEMO_PREFIX)) {
            events.push(alert);
        }

        if self.rng.gen_bool(c.ir_probability) {
            let state = if self.rng.gen_bool(0.5) { "ON" } else { "OFF" };
            events.push(ControlEvent::new(
                ControlKind::IrCommand,
                format!("Manual {state} via IR."),
            ));
        }

        DemoSample { reading, events }
    }
}
