//! Packet-processing scheduler loop.
//!
//! One scheduler thread turns timer wakeups into relay work:
//! 1. Drain a batch of control messages (blocking for the first one)
//! 2. Honor a terminate request, or coalesce the batch to its newest tick
//! 3. Compute catch-up ticks from the cycle counter
//! 4. Detect alarm ticks from wall time and pick the fast or full path
//! 5. Poll session descriptors under the session lock
//! 6. Run the engine passes under the global lock
//! 7. Pump output, wake the command layer, flush stats
//!
//! The session lock and the global lock are never held together.

use crate::engine::{CommandLayer, PacketEngine, TickInfo};
use crate::locks::GlobalLock;
use crate::message::{coalesce, BatchAction, TickMessage};
use crate::netio::NetworkIo;
use crate::pacing::{catch_up_ticks, is_full_path, AlarmTimer};
use crate::poll::{PollError, SessionRegistry};
use crate::queue::ControlQueue;
use relay_common::config::SchedulerConfig;
use relay_common::metrics::{PhaseFilters, PhaseSample, PhaseSink, PhaseTimings, TracingSink};
use relay_common::stats::{StatsAccumulator, StatsStore};
use relay_common::time::{Clock, SystemClock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Shared collaborators the scheduler works with but does not own.
pub struct Collaborators<S> {
    /// Lock over relay state shared with the engine.
    pub global: Arc<GlobalLock<S>>,
    /// Session table and its lock.
    pub sessions: Arc<SessionRegistry>,
    /// Command layer woken after every iteration.
    pub command: Arc<dyn CommandLayer>,
    /// Shared counter store.
    pub store: Arc<dyn StatsStore>,
    /// Wall clock for drift detection.
    pub clock: Arc<dyn Clock>,
    /// Receiver of phase samples when observability is enabled.
    pub phase_sink: Option<Arc<dyn PhaseSink>>,
}

impl<S> Collaborators<S> {
    /// Bundle collaborators, using the system clock and the tracing sink.
    pub fn new(
        global: Arc<GlobalLock<S>>,
        sessions: Arc<SessionRegistry>,
        command: Arc<dyn CommandLayer>,
        store: Arc<dyn StatsStore>,
    ) -> Self {
        Self {
            global,
            sessions,
            command,
            store,
            clock: Arc::new(SystemClock),
            phase_sink: None,
        }
    }

    /// Use `clock` for wall time.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Send phase samples to `sink` instead of the tracing sink.
    #[must_use]
    pub fn with_phase_sink(mut self, sink: Arc<dyn PhaseSink>) -> Self {
        self.phase_sink = Some(sink);
        self
    }
}

impl<S> Clone for Collaborators<S> {
    fn clone(&self) -> Self {
        Self {
            global: Arc::clone(&self.global),
            sessions: Arc::clone(&self.sessions),
            command: Arc::clone(&self.command),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            phase_sink: self.phase_sink.clone(),
        }
    }
}

/// Mutable pacing state, touched only by the scheduler thread.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerState {
    /// Alarm detection baseline.
    pub alarm: AlarmTimer,
    /// Cycle counter of the last completed iteration.
    pub cycle_counter_prev: i64,
    /// Whether the loop is running.
    pub running: bool,
}

impl SchedulerState {
    /// Create state for `config`.
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            alarm: AlarmTimer::new(config.alarm_interval),
            cycle_counter_prev: 0,
            running: false,
        }
    }
}

/// How an iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Iteration {
    /// All passes ran; the tick was consumed.
    Completed,
    /// Polling was interrupted; the tick was not consumed.
    Interrupted,
}

/// Phase timing hook, present when observability is enabled.
struct PhaseObserver {
    filters: PhaseFilters,
    sink: Arc<dyn PhaseSink>,
}

/// The packet-processing scheduler.
///
/// Built by [`RelayProcessor`](crate::lifecycle::RelayProcessor) and moved
/// onto its worker thread; [`run`](Self::run) returns once a terminate
/// request is drained.
pub struct Scheduler<E: PacketEngine, N: NetworkIo> {
    queue: Arc<ControlQueue>,
    engine: E,
    netio: Arc<N>,
    ctx: Collaborators<E::State>,
    stats: StatsAccumulator,
    state: SchedulerState,
    cycles_per_tick: i64,
    full_path_modulus: i64,
    batch_size: usize,
    observer: Option<PhaseObserver>,
    iterations: Arc<AtomicU64>,
}

impl<E: PacketEngine, N: NetworkIo> Scheduler<E, N> {
    /// Assemble a scheduler from its already-initialized parts.
    pub fn new(
        config: &SchedulerConfig,
        state: SchedulerState,
        stats: StatsAccumulator,
        queue: Arc<ControlQueue>,
        netio: Arc<N>,
        engine: E,
        ctx: Collaborators<E::State>,
    ) -> Self {
        let observer = config.observability.enabled.then(|| PhaseObserver {
            filters: PhaseFilters::new(config.observability.filter_alpha),
            sink: ctx.phase_sink.clone().unwrap_or_else(|| {
                Arc::new(TracingSink::new(config.observability.report_every))
            }),
        });

        Self {
            queue,
            engine,
            netio,
            ctx,
            stats,
            state,
            cycles_per_tick: config.cycles_per_tick(),
            full_path_modulus: config.full_path_modulus,
            batch_size: config.batch_size.max(1),
            observer,
            iterations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of completed iterations, readable from other threads.
    #[must_use]
    pub fn iteration_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.iterations)
    }

    /// Current pacing state.
    #[must_use]
    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Run until a terminate request is drained.
    ///
    /// This blocks the current thread.
    pub fn run(mut self) {
        info!(queue = self.queue.name(), "Scheduler started");

        if !self.handshake() {
            info!("Terminated before the first tick");
            return;
        }

        self.state.running = true;
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut tp0 = self.observed_now();

        while self.state.running {
            batch.clear();
            match self.queue.pop_batch(&mut batch, self.batch_size, true) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(e) => {
                    warn!("Control queue failed: {e}");
                    break;
                }
            }

            match coalesce(&batch) {
                BatchAction::Idle => continue,
                BatchAction::Terminate => {
                    debug!(discarded = batch.len() - 1, "Terminate drained");
                    self.state.running = false;
                }
                BatchAction::Advance {
                    clock_tick,
                    cycle_counter,
                    coalesced,
                } => {
                    if coalesced > 0 {
                        trace!(coalesced, cycle_counter, "Coalesced stale ticks");
                    }
                    let (outcome, tp3) = self.run_iteration(clock_tick, cycle_counter, tp0);
                    if outcome == Iteration::Interrupted {
                        debug!(clock_tick, cycle_counter, "Tick deferred to next wakeup");
                    }
                    tp0 = tp3;
                }
            }
        }

        self.state.running = false;
        info!(
            iterations = self.iterations.load(Ordering::Relaxed),
            "Scheduler stopped"
        );
    }

    /// Wait for the first message and take its cycle counter as baseline.
    ///
    /// Returns `false` if the scheduler must exit without running.
    fn handshake(&mut self) -> bool {
        loop {
            match self.queue.pop_one(true) {
                Ok(Some(TickMessage::Terminate)) | Err(_) => return false,
                Ok(Some(TickMessage::Advance {
                    clock_tick,
                    cycle_counter,
                })) => {
                    debug!(clock_tick, cycle_counter, "First tick received");
                    self.state.cycle_counter_prev = cycle_counter;
                    return true;
                }
                Ok(None) => {}
            }
        }
    }

    /// Process one authoritative tick.
    ///
    /// Returns the outcome and the timestamp that starts the next wait phase.
    fn run_iteration(&mut self, clock_tick: i32, cycle_counter: i64, tp0: f64) -> (Iteration, f64) {
        let tp1 = self.ctx.clock.now();

        let ndrain = catch_up_ticks(cycle_counter, self.state.cycle_counter_prev, self.cycles_per_tick);
        if ndrain > 1 {
            debug!(
                clock_tick,
                cycle_counter,
                cycle_counter_prev = self.state.cycle_counter_prev,
                ndrain,
                "Catching up"
            );
        }

        let alarm_tick = self.state.alarm.check(tp1);
        let full_path = is_full_path(alarm_tick, cycle_counter, self.full_path_modulus);

        match self.ctx.sessions.poll_ready(full_path) {
            Ok(_) => {}
            Err(PollError::Interrupted) => {
                trace!(cycle_counter, "Poll interrupted, restarting iteration");
                self.ctx.command.wakeup();
                return (Iteration::Interrupted, self.observed_now());
            }
            Err(e) => warn!("Descriptor poll failed: {e}"),
        }

        let tp2 = self.ctx.clock.now();
        let tick = TickInfo {
            now: tp2,
            alarm_tick,
            full_path,
            ndrain,
        };

        let mut out = self.netio.pick_sender();
        if !full_path {
            self.engine
                .process_secondary_only(&self.ctx.global, &tick, &mut out, &mut self.stats);
        }
        {
            let mut relay = self.ctx.global.lock();
            self.engine
                .process_primary(&mut relay, &tick, &mut out, &mut self.stats);
            if self.engine.outbound_session_count(&relay) > 0 {
                self.engine
                    .process_outbound_sessions(&mut relay, tick.now, &mut out, &mut self.stats);
            }
        }
        self.netio.pump(out);
        self.ctx.command.wakeup();
        self.stats.flush(self.ctx.store.as_ref());

        self.state.cycle_counter_prev = cycle_counter;
        self.iterations.fetch_add(1, Ordering::Relaxed);

        let tp3 = self.observed_now();
        if let Some(observer) = &mut self.observer {
            let timings = PhaseTimings::from_timestamps([tp0, tp1, tp2, tp3]);
            observer.filters.apply(&timings);
            observer.sink.record(&PhaseSample {
                clock_tick,
                cycle_counter,
                ndrain,
                full_path,
                timings,
                smoothed: observer.filters.snapshot(),
            });
        }

        trace!(clock_tick, cycle_counter, ndrain, full_path, "Iteration complete");
        (Iteration::Completed, tp3)
    }

    /// Wall time when observability needs it, otherwise zero.
    fn observed_now(&self) -> f64 {
        if self.observer.is_some() {
            self.ctx.clock.now()
        } else {
            0.0
        }
    }
}
