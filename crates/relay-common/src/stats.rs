//! Packet counters for the relay processor.
//!
//! The scheduler thread counts into a [`StatsAccumulator`] without any
//! synchronization and folds the totals into a shared [`StatsStore`] once per
//! iteration, so contended atomic writes happen at most once per counter per
//! iteration rather than once per packet.

use crate::error::{RelayError, RelayResult};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicI64, Ordering};

/// Shared, thread-safe counter store.
pub trait StatsStore: Send + Sync {
    /// Resolve a counter name to its slot index.
    fn index_of(&self, name: &str) -> Option<usize>;

    /// Atomically add `delta` to the counter at `index`.
    fn update_by_index(&self, index: usize, delta: i64);
}

/// Counters maintained by the packet-processing passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayCounter {
    /// Packets received from any endpoint.
    Received,
    /// Packets generated by playback.
    Played,
    /// Packets forwarded to the peer.
    Relayed,
    /// Packets accepted by the resizer.
    ResizerIn,
    /// Packets emitted by the resizer.
    ResizerOut,
    /// Packets dropped by the resizer.
    ResizerDiscard,
    /// Packets dropped for any other reason.
    Discard,
}

impl RelayCounter {
    /// Number of relay counters.
    pub const COUNT: usize = 7;

    /// All counters, in slot order.
    pub const ALL: [RelayCounter; Self::COUNT] = [
        RelayCounter::Received,
        RelayCounter::Played,
        RelayCounter::Relayed,
        RelayCounter::ResizerIn,
        RelayCounter::ResizerOut,
        RelayCounter::ResizerDiscard,
        RelayCounter::Discard,
    ];

    /// Name of the counter in the shared store.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            RelayCounter::Received => "npkts_rcvd",
            RelayCounter::Played => "npkts_played",
            RelayCounter::Relayed => "npkts_relayed",
            RelayCounter::ResizerIn => "npkts_resizer_in",
            RelayCounter::ResizerOut => "npkts_resizer_out",
            RelayCounter::ResizerDiscard => "npkts_resizer_discard",
            RelayCounter::Discard => "npkts_discard",
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for RelayCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One locally accumulated counter bound to a store slot.
#[derive(Debug, Clone, Copy)]
struct StatCounter {
    index: usize,
    accumulated: i64,
}

/// Per-iteration counters owned by the scheduler thread.
#[derive(Debug, Clone)]
pub struct StatsAccumulator {
    counters: [StatCounter; RelayCounter::COUNT],
}

impl StatsAccumulator {
    /// Resolve every counter against `store`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownCounter`] if the store does not know one
    /// of the counter names.
    pub fn init(store: &dyn StatsStore) -> RelayResult<Self> {
        let mut counters = [StatCounter {
            index: 0,
            accumulated: 0,
        }; RelayCounter::COUNT];

        for counter in RelayCounter::ALL {
            let index = store
                .index_of(counter.name())
                .ok_or_else(|| RelayError::UnknownCounter(counter.name().to_string()))?;
            counters[counter.slot()].index = index;
        }

        Ok(Self { counters })
    }

    /// Add `delta` to the local value of `counter`.
    #[inline]
    pub fn record(&mut self, counter: RelayCounter, delta: i64) {
        self.counters[counter.slot()].accumulated += delta;
    }

    /// Locally accumulated value of `counter` since the last flush.
    #[must_use]
    pub fn pending(&self, counter: RelayCounter) -> i64 {
        self.counters[counter.slot()].accumulated
    }

    /// Fold every non-zero local value into `store` and reset it.
    pub fn flush(&mut self, store: &dyn StatsStore) {
        for counter in &mut self.counters {
            if counter.accumulated != 0 {
                store.update_by_index(counter.index, counter.accumulated);
                counter.accumulated = 0;
            }
        }
    }
}

/// In-process counter store with one cache-padded atomic per counter.
#[derive(Debug)]
pub struct CounterStore {
    names: Vec<&'static str>,
    slots: Box<[CachePadded<AtomicI64>]>,
}

impl Default for CounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore {
    /// Create a store holding the relay counters.
    #[must_use]
    pub fn new() -> Self {
        Self::with_names(RelayCounter::ALL.iter().map(|c| c.name()).collect())
    }

    /// Create a store holding exactly the given counter names.
    #[must_use]
    pub fn with_names(names: Vec<&'static str>) -> Self {
        let slots = names
            .iter()
            .map(|_| CachePadded::new(AtomicI64::new(0)))
            .collect();
        Self { names, slots }
    }

    /// Current value of a counter, by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<i64> {
        self.index_of(name)
            .map(|idx| self.slots[idx].load(Ordering::Relaxed))
    }

    /// Current values of all counters.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(&'static str, i64)> {
        self.names
            .iter()
            .zip(self.slots.iter())
            .map(|(name, slot)| (*name, slot.load(Ordering::Relaxed)))
            .collect()
    }
}

impl StatsStore for CounterStore {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| *n == name)
    }

    fn update_by_index(&self, index: usize, delta: i64) {
        if let Some(slot) = self.slots.get(index) {
            slot.fetch_add(delta, Ordering::Relaxed);
        }
    }
}
