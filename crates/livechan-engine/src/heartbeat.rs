use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::HeartbeatConfig;

/// The two periodic timers of a locked channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// Liveness beat.
    Beat,
    /// Session health check.
    HealthCheck,
}

/// Shortest period a timer runs at; zero-length configured periods are raised to it.
pub const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RepeatingTimer {
    period: Duration,
    next_due: Instant,
}

impl RepeatingTimer {
    fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next_due: now + period,
        }
    }

    /// Fire at most once; missed periods are skipped.
    fn poll(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        while self.next_due <= now {
            self.next_due += self.period;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChannelTimers {
    beat: RepeatingTimer,
    health_check: RepeatingTimer,
}

/// Cancellable repeating timers keyed by channel.
///
/// Driven by the caller's clock: nothing fires until [`due`](Self::due) is
/// called with an instant at or past a deadline.
#[derive(Debug, Clone)]
pub struct HeartbeatScheduler {
    beat_interval: Duration,
    health_check_interval: Duration,
    timers: BTreeMap<String, ChannelTimers>,
}

impl HeartbeatScheduler {
    pub fn new(config: &HeartbeatConfig) -> Self {
        Self {
            beat_interval: config.beat_interval().max(MIN_TIMER_PERIOD),
            health_check_interval: config.health_check_interval().max(MIN_TIMER_PERIOD),
            timers: BTreeMap::new(),
        }
    }

    /// Start both timers for `channel`, cancelling any running ones first.
    pub fn start(&mut self, channel: &str, now: Instant) {
        self.cancel(channel);
        self.timers.insert(
            channel.to_string(),
            ChannelTimers {
                beat: RepeatingTimer::new(self.beat_interval, now),
                health_check: RepeatingTimer::new(self.health_check_interval, now),
            },
        );
        debug!(channel, "heartbeat timers started");
    }

    /// Cancel both timers. Returns false if none were running.
    pub fn cancel(&mut self, channel: &str) -> bool {
        let cancelled = self.timers.remove(channel).is_some();
        if cancelled {
            debug!(channel, "heartbeat timers cancelled");
        }
        cancelled
    }

    pub fn is_running(&self, channel: &str) -> bool {
        self.timers.contains_key(channel)
    }

    /// Channels with running timers, sorted.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.timers.keys().map(String::as_str)
    }

    /// Timers due at `now`, in channel order, beat before health check.
    pub fn due(&mut self, now: Instant) -> Vec<(String, TimerKind)> {
        let mut fired = Vec::new();
        for (channel, timers) in &mut self.timers {
            if timers.beat.poll(now) {
                fired.push((channel.clone(), TimerKind::Beat));
            }
            if timers.health_check.poll(now) {
                fired.push((channel.clone(), TimerKind::HealthCheck));
            }
        }
        fired
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers
            .values()
            .flat_map(|timers| [timers.beat.next_due, timers.health_check.next_due])
            .min()
    }

    /// Cancel every timer.
    pub fn clear(&mut self) {
        if !self.timers.is_empty() {
            debug!(count = self.timers.len(), "all heartbeat timers cancelled");
        }
        self.timers.clear();
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
