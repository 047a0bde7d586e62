//! Named, individually cancellable timers.
//!
//! Each timer is a task which posts a [`Tick`] into the owner's inbox.
//! Ticks carry the generation of the timer which produced them, so a tick which was
//! already queued when its timer got cancelled is recognised and dropped by [`Scheduler::accept`].

use std::{collections::HashMap, fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, sleep_until, Instant, MissedTickBehavior},
};
use tracing::{debug, trace};

/// The timers the link actor uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimerName {
    /// The first connection attempt after start-up.
    InitialConnect,

    /// Periodic reconnection attempts.
    Reconnect,

    /// Grace period before demo data starts.
    DemoArm,

    /// Demo data generation.
    DemoTick,

    /// Periodic check that a lost link is being recovered.
    HealthCheck,
}

impl Display for TimerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimerName::InitialConnect => "initial-connect",
            TimerName::Reconnect => "reconnect",
            TimerName::DemoArm => "demo-arm",
            TimerName::DemoTick => "demo-tick",
            TimerName::HealthCheck => "health-check",
        };
        write!(f, "{s}")
    }
}

/// A timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Which timer.
    pub timer: TimerName,

    /// Which incarnation of the timer.
    pub generation: u64,
}

#[derive(Debug)]
struct Timer {
    generation: u64,
    repeating: bool,
    handle: JoinHandle<()>,
}

/// Owns the timers of one actor.
pub struct Scheduler<M> {
    sender: mpsc::UnboundedSender<M>,
    wrap: fn(Tick) -> M,
    timers: HashMap<TimerName, Timer>,
    next_generation: u64,
}

impl<M: Send + 'static> Scheduler<M> {
    /// Ticks will be wrapped and put on the given sender.
    pub fn new(sender: mpsc::UnboundedSender<M>, wrap: fn(Tick) -> M) -> Self {
        Self {
            sender,
            wrap,
            timers: HashMap::new(),
            next_generation: 0,
        }
    }

    fn start(&mut self, timer: TimerName, period: Duration, repeating: bool) -> bool {
        if self.is_active(timer) {
            trace!(%timer, "Already running");
            return false;
        }

        self.next_generation += 1;
        let tick = Tick {
            timer,
            generation: self.next_generation,
        };
        let sender = self.sender.clone();
        let wrap = self.wrap;
        let first = Instant::now() + period;

        let handle = tokio::spawn(async move {
            if !repeating {
                sleep_until(first).await;
                let _ = sender.send(wrap(tick));
                return;
            }

            let mut interval = interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                if sender.send(wrap(tick)).is_err() {
                    break;
                }
            }
        });

        debug!(%timer, ?period, repeating, "Timer started");

        self.timers.insert(
            timer,
            Timer {
                generation: tick.generation,
                repeating,
                handle,
            },
        );

        true
    }

    /// Fire once after the delay.
    /// Returns false (and does nothing) if the timer is already active.
    pub fn once(&mut self, timer: TimerName, delay: Duration) -> bool {
        self.start(timer, delay, false)
    }

    /// Fire every period, the first time one period from now.
    /// Returns false (and does nothing) if the timer is already active.
    pub fn every(&mut self, timer: TimerName, period: Duration) -> bool {
        self.start(timer, period, true)
    }

    /// Stop the timer. Returns whether it was active.
    pub fn cancel(&mut self, timer: TimerName) -> bool {
        match self.timers.remove(&timer) {
            Some(active) => {
                active.handle.abort();
                debug!(%timer, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Stop every timer.
    pub fn cancel_all(&mut self) {
        for (_, active) in self.timers.drain() {
            active.handle.abort();
        }
    }

    /// Whether the timer is active.
    pub fn is_active(&self, timer: TimerName) -> bool {
        self.timers.contains_key(&timer)
    }

    /// All active timers, sorted.
    pub fn active(&self) -> Vec<TimerName> {
        let mut active = self.timers.keys().copied().collect::<Vec<_>>();
        active.sort();
        active
    }

    /// Whether a received tick should be acted upon.
    ///
    /// Ticks from cancelled or replaced timers are rejected.
    /// A one-shot timer is no longer active after its tick is accepted.
    pub fn accept(&mut self, tick: Tick) -> bool {
        let Some(active) = self.timers.get(&tick.timer) else {
            trace!(timer = %tick.timer, "Tick from a stopped timer");
            return false;
        };

        if active.generation != tick.generation {
            trace!(timer = %tick.timer, "Tick from a previous timer");
            return false;
        }

        if !active.repeating {
            self.timers.remove(&tick.timer);
        }

        true
    }
}

impl<M> Drop for Scheduler<M> {
    fn drop(&mut self) {
        for (_, active) in self.timers.drain() {
            active.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> (Scheduler<Tick>, mpsc::UnboundedReceiver<Tick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Scheduler::new(tx, |tick| tick), rx)
    }

    async fn advance(duration: Duration) {
        tokio::time::advance(duration).await;
        // Let the timer tasks run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_timer_ticks_until_cancelled() {
        let (mut scheduler, mut rx) = scheduler();

        assert!(scheduler.every(TimerName::Reconnect, Duration::from_secs(2)));

        advance(Duration::from_millis(1999)).await;
        assert!(rx.try_recv().is_err());

        advance(Duration::from_millis(1)).await;
        let tick = rx.try_recv().unwrap();
        assert!(scheduler.accept(tick));

        advance(Duration::from_secs(2)).await;
        assert!(scheduler.accept(rx.try_recv().unwrap()));
        assert!(scheduler.is_active(TimerName::Reconnect));

        assert!(scheduler.cancel(TimerName::Reconnect));
        assert!(scheduler.active().is_empty());

        advance(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err(), "Cancelled timer must not tick");
    }

    #[tokio::test(start_paused = true)]
    async fn starting_twice_is_a_no_op() {
        let (mut scheduler, mut rx) = scheduler();

        assert!(scheduler.every(TimerName::Reconnect, Duration::from_secs(2)));
        assert!(!scheduler.every(TimerName::Reconnect, Duration::from_secs(2)));

        advance(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "Only one timer should be running");
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_retires_after_accept() {
        let (mut scheduler, mut rx) = scheduler();

        scheduler.once(TimerName::DemoArm, Duration::from_secs(10));
        advance(Duration::from_secs(10)).await;

        let tick = rx.try_recv().unwrap();
        assert!(scheduler.accept(tick));
        assert!(!scheduler.is_active(TimerName::DemoArm));
        assert!(!scheduler.accept(tick));

        advance(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_without_delay_fires_at_once() {
        let (mut scheduler, mut rx) = scheduler();

        assert!(scheduler.once(TimerName::InitialConnect, Duration::ZERO));
        advance(Duration::ZERO).await;

        let tick = rx.try_recv().unwrap();
        assert_eq!(tick.timer, TimerName::InitialConnect);
        assert!(scheduler.accept(tick));
        assert!(scheduler.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_tick_of_cancelled_timer_is_rejected() {
        let (mut scheduler, mut rx) = scheduler();

        scheduler.every(TimerName::DemoTick, Duration::from_secs(2));
        advance(Duration::from_secs(2)).await;

        // The tick is queued, then the timer is cancelled and restarted.
        scheduler.cancel(TimerName::DemoTick);
        scheduler.every(TimerName::DemoTick, Duration::from_secs(2));

        let stale = rx.try_recv().unwrap();
        assert!(!scheduler.accept(stale));
    }

    #[test]
    fn names_display() {
        assert_eq!(TimerName::HealthCheck.to_string(), "health-check");
    }
}
