//! Control messages carried from timer producers to the scheduler.

/// Message delivered through the control queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMessage {
    /// The external timer advanced.
    Advance {
        /// Timer tick index, used for diagnostics only.
        clock_tick: i32,
        /// Absolute, monotonically non-decreasing cycle counter.
        cycle_counter: i64,
    },
    /// Stop the scheduler.
    Terminate,
}

impl TickMessage {
    /// Whether this is a terminate request.
    #[inline]
    #[must_use]
    pub fn is_terminate(&self) -> bool {
        matches!(self, TickMessage::Terminate)
    }
}

/// What a drained batch asks the scheduler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    /// Nothing was drained.
    Idle,
    /// A terminate request was drained; everything else in the batch is void.
    Terminate,
    /// Advance to the newest tick in the batch.
    Advance {
        /// Clock tick of the newest message.
        clock_tick: i32,
        /// Cycle counter of the newest message.
        cycle_counter: i64,
        /// Older advance messages superseded by the newest one.
        coalesced: usize,
    },
}

/// Reduce a drained batch to a single action.
///
/// Terminate anywhere in the batch wins over every advance. Otherwise the last
/// advance is authoritative and earlier ones are only counted.
#[must_use]
pub fn coalesce(batch: &[TickMessage]) -> BatchAction {
    if batch.iter().any(TickMessage::is_terminate) {
        return BatchAction::Terminate;
    }

    match batch.last() {
        Some(&TickMessage::Advance {
            clock_tick,
            cycle_counter,
        }) => BatchAction::Advance {
            clock_tick,
            cycle_counter,
            coalesced: batch.len() - 1,
        },
        _ => BatchAction::Idle,
    }
}
