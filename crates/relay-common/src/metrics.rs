//! Phase timing observability for the scheduler loop.
//!
//! Each iteration is split into three phases: waiting for the control queue,
//! polling descriptors, and processing (engine passes, output flush, stats
//! flush). When enabled, the scheduler smooths each phase duration with an
//! exponential moving average and hands every sample to a [`PhaseSink`].

use tracing::debug;

/// Exponential moving average filter.
#[derive(Debug, Clone, Copy)]
pub struct RecFilter {
    alpha: f64,
    lastval: f64,
    samples: u64,
}

impl RecFilter {
    /// Create a filter with smoothing factor `alpha` and initial value.
    #[must_use]
    pub fn new(alpha: f64, initial: f64) -> Self {
        Self {
            alpha,
            lastval: initial,
            samples: 0,
        }
    }

    /// Feed one sample and return the new filtered value.
    pub fn apply(&mut self, sample: f64) -> f64 {
        self.lastval = self.alpha * self.lastval + (1.0 - self.alpha) * sample;
        self.samples += 1;
        self.lastval
    }

    /// Current filtered value.
    #[must_use]
    pub fn lastval(&self) -> f64 {
        self.lastval
    }

    /// Number of samples applied.
    #[must_use]
    pub fn samples(&self) -> u64 {
        self.samples
    }
}

/// Raw phase durations of one iteration, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct PhaseTimings {
    /// Time blocked on the control queue.
    pub wait: f64,
    /// Time spent polling session descriptors.
    pub poll: f64,
    /// Time from the end of the poll to the end of the stats flush: engine
    /// passes, output pump, command wakeup and the stats flush itself.
    pub process: f64,
}

impl PhaseTimings {
    /// Derive phase durations from the four iteration timestamps.
    ///
    /// `tp[0]` is the end of the previous iteration, `tp[1]` the end of the
    /// queue drain, `tp[2]` the end of the poll and `tp[3]` the end of the
    /// stats flush.
    #[must_use]
    pub fn from_timestamps(tp: [f64; 4]) -> Self {
        Self {
            wait: tp[1] - tp[0],
            poll: tp[2] - tp[1],
            process: tp[3] - tp[2],
        }
    }
}

/// Smoothed phase durations.
#[derive(Debug, Clone, Copy)]
pub struct PhaseFilters {
    wait: RecFilter,
    poll: RecFilter,
    process: RecFilter,
}

impl PhaseFilters {
    /// Create filters with the given smoothing factor, starting at zero.
    #[must_use]
    pub fn new(alpha: f64) -> Self {
        Self {
            wait: RecFilter::new(alpha, 0.0),
            poll: RecFilter::new(alpha, 0.0),
            process: RecFilter::new(alpha, 0.0),
        }
    }

    /// Feed one iteration's timings.
    pub fn apply(&mut self, timings: &PhaseTimings) {
        self.wait.apply(timings.wait);
        self.poll.apply(timings.poll);
        self.process.apply(timings.process);
    }

    /// Get a snapshot of the filtered values.
    #[must_use]
    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot {
            wait: self.wait.lastval(),
            poll: self.poll.lastval(),
            process: self.process.lastval(),
            samples: self.process.samples(),
        }
    }
}

/// Immutable snapshot of the phase filters for reporting.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PhaseSnapshot {
    /// Smoothed queue wait, seconds.
    pub wait: f64,
    /// Smoothed poll time, seconds.
    pub poll: f64,
    /// Smoothed processing time, seconds.
    pub process: f64,
    /// Iterations folded into the filters.
    pub samples: u64,
}

/// One iteration as seen by the observability hook.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PhaseSample {
    /// Clock tick carried by the authoritative message.
    pub clock_tick: i32,
    /// Cycle counter carried by the authoritative message.
    pub cycle_counter: i64,
    /// Catch-up ticks processed.
    pub ndrain: i64,
    /// Whether secondary streams were processed.
    pub full_path: bool,
    /// Raw durations of this iteration.
    pub timings: PhaseTimings,
    /// Filtered durations including this iteration.
    pub smoothed: PhaseSnapshot,
}

/// Receiver of per-iteration phase samples.
pub trait PhaseSink: Send + Sync {
    /// Called on the scheduler thread after every completed iteration.
    fn record(&self, sample: &PhaseSample);
}

/// Sink that writes periodic debug reports through `tracing`.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    report_every: u32,
}

impl TracingSink {
    /// Report every `report_every` clock ticks.
    #[must_use]
    pub fn new(report_every: u32) -> Self {
        Self {
            report_every: report_every.max(1),
        }
    }

    /// Whether `clock_tick` falls on a reporting boundary.
    ///
    /// The first thousand ticks are always reported to cover startup.
    #[must_use]
    pub fn should_report(&self, clock_tick: i32) -> bool {
        clock_tick < 1000 || clock_tick.unsigned_abs() % self.report_every == 0
    }
}

impl PhaseSink for TracingSink {
    fn record(&self, sample: &PhaseSample) {
        if !self.should_report(sample.clock_tick) {
            return;
        }
        debug!(
            clock_tick = sample.clock_tick,
            cycle_counter = sample.cycle_counter,
            ndrain = sample.ndrain,
            full_path = sample.full_path,
            wait_s = sample.smoothed.wait,
            poll_s = sample.smoothed.poll,
            process_s = sample.smoothed.process,
            "Phase timings"
        );
    }
}
