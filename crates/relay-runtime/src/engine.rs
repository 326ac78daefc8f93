//! Collaborator interfaces driven by the scheduler.

use crate::locks::GlobalLock;
use crate::netio::OutputBatch;
use relay_common::stats::StatsAccumulator;

/// Timing of one scheduler iteration, as handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInfo {
    /// Wall time sampled after descriptor polling, seconds.
    pub now: f64,
    /// A full alarm interval elapsed; low-frequency housekeeping is due.
    pub alarm_tick: bool,
    /// Secondary streams are serviced in this iteration.
    pub full_path: bool,
    /// Packet ticks to process to catch up, at least one.
    pub ndrain: i64,
}

/// Per-packet relay logic.
///
/// The scheduler calls the passes of one iteration in this order:
///
/// - fast path: [`process_secondary_only`](Self::process_secondary_only)
///   without any lock, then [`process_primary`](Self::process_primary) under
///   the global lock;
/// - full path: [`process_primary`](Self::process_primary) under the global
///   lock with `tick.full_path` set, servicing primary and secondary streams
///   together;
///
/// then [`process_outbound_sessions`](Self::process_outbound_sessions) under
/// the same global lock when outbound-only sessions exist. The session lock
/// is never held during any pass.
pub trait PacketEngine: Send + 'static {
    /// Relay state guarded by the global lock.
    type State: Send + 'static;

    /// Primary pass, called with the global lock held.
    fn process_primary(
        &mut self,
        state: &mut Self::State,
        tick: &TickInfo,
        out: &mut OutputBatch,
        stats: &mut StatsAccumulator,
    );

    /// Fast-path pass, called with no lock held.
    ///
    /// Takes the global lock itself for any relay state it touches.
    fn process_secondary_only(
        &mut self,
        global: &GlobalLock<Self::State>,
        tick: &TickInfo,
        out: &mut OutputBatch,
        stats: &mut StatsAccumulator,
    );

    /// Outbound-only sessions pass, called with the global lock held.
    fn process_outbound_sessions(
        &mut self,
        state: &mut Self::State,
        now: f64,
        out: &mut OutputBatch,
        stats: &mut StatsAccumulator,
    );

    /// Number of outbound-only sessions in `state`.
    fn outbound_session_count(&self, state: &Self::State) -> usize;
}

/// Command-channel layer notified after relay state changes.
pub trait CommandLayer: Send + Sync {
    /// Ask the command layer to process pending work. Must not block.
    fn wakeup(&self);
}

impl<F> CommandLayer for F
where
    F: Fn() + Send + Sync,
{
    fn wakeup(&self) {
        self();
    }
}
