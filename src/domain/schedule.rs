//! Candle-close scheduling.
//!
//! The driver wakes every poll interval but only evaluates inside a short grace window
//! right after each timeframe boundary, once per boundary.

use chrono::{DateTime, Duration, DurationRound, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(d) = duration.to_std() {
            std::thread::sleep(d);
        }
    }
}

/// A clock whose `sleep` advances time instantly.
pub struct SimulatedClock {
    now: Mutex<DateTime<Utc>>,
}

impl SimulatedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        SimulatedClock {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandleCloseSchedule {
    pub timeframe: Duration,
    pub grace: Duration,
}

impl CandleCloseSchedule {
    /// The most recent boundary at or before `now`.
    pub fn boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.duration_trunc(self.timeframe).unwrap_or(now)
    }

    /// The boundary `now` falls just after, if within the grace window.
    pub fn due(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let boundary = self.boundary(now);
        (now - boundary <= self.grace).then_some(boundary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub boundary: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

pub struct Scheduler {
    schedule: CandleCloseSchedule,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    last_boundary: Option<DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(schedule: CandleCloseSchedule, clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        Scheduler {
            schedule,
            clock,
            poll_interval,
            last_boundary: None,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// A tick if the clock sits inside a not-yet-served grace window.
    pub fn poll(&mut self) -> Option<Tick> {
        let now = self.clock.now();
        let boundary = self.schedule.due(now)?;
        if self.last_boundary == Some(boundary) {
            return None;
        }
        self.last_boundary = Some(boundary);
        Some(Tick { boundary, at: now })
    }

    /// Block (via the clock) until the next tick, or `None` once `stop` is raised.
    pub fn next_tick(&mut self, stop: &AtomicBool) -> Option<Tick> {
        loop {
            if stop.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(tick) = self.poll() {
                return Some(tick);
            }
            self.clock.sleep(self.poll_interval);
        }
    }
}
