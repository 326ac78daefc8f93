//! Wall-clock sampling for drift detection.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall time in fractional seconds.
///
/// Wall time may step backwards (NTP adjustments, manual changes); callers
/// must tolerate that.
pub trait Clock: Send + Sync {
    /// Current wall time in seconds.
    fn now(&self) -> f64;
}

/// Clock backed by the system real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs_f64(),
            // Clock set before 1970: report it as negative time
            Err(e) => -e.duration().as_secs_f64(),
        }
    }
}
