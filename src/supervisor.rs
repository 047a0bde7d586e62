//! Retries connecting at a fixed interval while the device is away.

use std::time::Duration;

use tracing::info;

use crate::scheduler::{Scheduler, TimerName};

/// Drives the [`TimerName::Reconnect`] timer.
///
/// The owner acts on the ticks; this only decides whether a cycle is running.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    period: Duration,
    reconnecting: bool,
}

impl ReconnectSupervisor {
    /// A stopped supervisor which will retry every `period` once started.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            reconnecting: false,
        }
    }

    /// Start a reconnection cycle.
    /// Returns false if one is already running.
    pub fn start<M: Send + 'static>(&mut self, scheduler: &mut Scheduler<M>) -> bool {
        if self.reconnecting {
            return false;
        }

        scheduler.every(TimerName::Reconnect, self.period);
        self.reconnecting = true;
        info!(period = ?self.period, "Reconnecting");

        true
    }

    /// Stop the cycle.
    /// Returns false if none was running.
    pub fn stop<M: Send + 'static>(&mut self, scheduler: &mut Scheduler<M>) -> bool {
        if !self.reconnecting {
            return false;
        }

        scheduler.cancel(TimerName::Reconnect);
        self.reconnecting = false;
        info!("Reconnection stopped");

        true
    }

    /// Whether a cycle is running.
    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }
}
