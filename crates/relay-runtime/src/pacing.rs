//! Tick pacing: catch-up computation, alarm detection and path selection.
//!
//! The cycle counter is the authoritative measure of elapsed time. Wall time
//! is only used to decide when low-frequency secondary work is due.

use std::time::Duration;

/// Number of packet ticks to process to catch up with `cycle_counter_new`.
///
/// Always at least one, so the scheduler makes progress even when timer
/// jitter yields a zero or negative delta.
#[inline]
#[must_use]
pub fn catch_up_ticks(cycle_counter_new: i64, cycle_counter_prev: i64, cycles_per_tick: i64) -> i64 {
    let delta = cycle_counter_new.wrapping_sub(cycle_counter_prev);
    (delta / cycles_per_tick.max(1)).max(1)
}

/// Whether an iteration must also service secondary streams.
#[inline]
#[must_use]
pub fn is_full_path(alarm_tick: bool, cycle_counter: i64, modulus: i64) -> bool {
    alarm_tick || cycle_counter.rem_euclid(modulus.max(1)) == 0
}

/// Detects when a fixed wall-clock interval has elapsed.
#[derive(Debug, Clone, Copy)]
pub struct AlarmTimer {
    interval: f64,
    /// Wall time of the last alarm (0 = no sample yet).
    last_alarm: f64,
}

impl AlarmTimer {
    /// Create a timer firing at most once per `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.as_secs_f64(),
            last_alarm: 0.0,
        }
    }

    /// Baseline wall time, or 0 if unset.
    #[must_use]
    pub fn last_alarm(&self) -> f64 {
        self.last_alarm
    }

    /// Feed a wall-time sample and report whether the alarm fires.
    ///
    /// The first sample and any sample behind the baseline (clock stepped
    /// backwards) only reset the baseline.
    pub fn check(&mut self, now: f64) -> bool {
        if self.last_alarm == 0.0 || self.last_alarm > now {
            self.last_alarm = now;
            false
        } else if now - self.last_alarm >= self.interval {
            self.last_alarm = now;
            true
        } else {
            false
        }
    }
}
