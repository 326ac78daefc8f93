//! Relay processor lifecycle: construction, wakeup delivery and teardown.
//!
//! Construction acquires resources in order (pacing state, stats, control
//! queue, network I/O, terminate message, worker thread) and releases the
//! acquired ones in reverse if a later step fails. Teardown delivers the
//! pre-allocated terminate request, joins the worker and then releases the
//! network I/O context and the queue.

use crate::engine::PacketEngine;
use crate::message::TickMessage;
use crate::netio::NetworkIo;
use crate::queue::{ControlQueue, QueueError};
use crate::realtime::apply_thread_realtime;
use crate::scheduler::{Collaborators, Scheduler, SchedulerState};
use relay_common::config::SchedulerConfig;
use relay_common::error::{RelayError, RelayResult};
use relay_common::stats::StatsAccumulator;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// How long to wait for queue room before re-checking the worker.
const TERMINATE_RETRY: Duration = Duration::from_millis(50);

/// Owner of the scheduler thread and its resources.
///
/// Dropping the processor shuts it down; [`shutdown`](Self::shutdown) does the
/// same explicitly. Either way teardown happens exactly once.
pub struct RelayProcessor<N: NetworkIo> {
    queue: Option<Arc<ControlQueue>>,
    netio: Option<Arc<N>>,
    terminate: Option<TickMessage>,
    worker: Option<JoinHandle<()>>,
    iterations: Arc<AtomicU64>,
    thread_name: String,
}

impl<N: NetworkIo> std::fmt::Debug for RelayProcessor<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayProcessor")
            .field("thread_name", &self.thread_name)
            .field("running", &self.is_running())
            .field("iterations", &self.iterations())
            .finish_non_exhaustive()
    }
}

impl<N: NetworkIo> RelayProcessor<N> {
    /// Build the processor and start its scheduler thread.
    ///
    /// `netio_factory` creates the network I/O context; it is only called
    /// once the stats accumulator and control queue exist.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Config`] if `config` is invalid
    /// - [`RelayError::UnknownCounter`] if the stats store lacks a relay counter
    /// - whatever `netio_factory` returns
    /// - [`RelayError::ThreadSpawn`] if the worker thread cannot be started
    pub fn new<E, F>(
        config: &SchedulerConfig,
        engine: E,
        ctx: Collaborators<E::State>,
        netio_factory: F,
    ) -> RelayResult<Self>
    where
        E: PacketEngine,
        F: FnOnce() -> RelayResult<N>,
    {
        config.validate().inspect_err(|e| {
            error!("Invalid scheduler configuration: {e}");
        })?;

        let state = SchedulerState::new(config);

        let stats = StatsAccumulator::init(ctx.store.as_ref()).inspect_err(|e| {
            error!("Failed to initialize relay counters: {e}");
        })?;

        let queue = Arc::new(if config.queue_capacity == 0 {
            ControlQueue::unbounded(config.thread_name.clone())
        } else {
            ControlQueue::bounded(config.thread_name.clone(), config.queue_capacity)
        });

        let netio = Arc::new(netio_factory().inspect_err(|e| {
            error!("Failed to create network I/O context: {e}");
        })?);

        let terminate = Some(TickMessage::Terminate);

        let scheduler = Scheduler::new(
            config,
            state,
            stats,
            Arc::clone(&queue),
            Arc::clone(&netio),
            engine,
            ctx,
        );
        let iterations = scheduler.iteration_counter();
        let realtime = config.realtime.clone();

        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                if let Err(e) = apply_thread_realtime(&realtime) {
                    warn!("Real-time setup failed, continuing without it: {e}");
                }
                scheduler.run();
            })
            .map_err(|e| {
                error!("Failed to spawn scheduler thread: {e}");
                RelayError::ThreadSpawn(e.to_string())
            })?;

        info!(
            thread = %config.thread_name,
            cycles_per_tick = config.cycles_per_tick(),
            queue_capacity = config.queue_capacity,
            "Relay processor started"
        );

        Ok(Self {
            queue: Some(queue),
            netio: Some(netio),
            terminate,
            worker: Some(worker),
            iterations,
            thread_name: config.thread_name.clone(),
        })
    }

    /// Notify the scheduler that the timer advanced.
    ///
    /// Never blocks. If the message cannot be queued the wakeup is dropped;
    /// a later wakeup catches up through the cycle counter.
    pub fn wakeup(&self, clock_tick: i32, cycle_counter: i64) {
        let Some(queue) = &self.queue else {
            return;
        };
        match queue.put(TickMessage::Advance {
            clock_tick,
            cycle_counter,
        }) {
            Ok(()) => {}
            Err(QueueError::Full) => trace!(clock_tick, cycle_counter, "Control queue full, wakeup dropped"),
            Err(QueueError::Closed) => trace!(clock_tick, "Control queue closed, wakeup dropped"),
        }
    }

    /// Iterations the scheduler has completed.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Whether the scheduler thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Network I/O context, until shutdown.
    #[must_use]
    pub fn netio(&self) -> Option<&N> {
        self.netio.as_deref()
    }

    /// Stop the scheduler and release all resources.
    ///
    /// Blocks until the scheduler thread has exited.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        if let (Some(queue), Some(terminate)) = (&self.queue, self.terminate.take()) {
            deliver_terminate(queue, terminate, &worker);
        }

        debug!(thread = %self.thread_name, "Waiting for scheduler thread");
        if let Err(e) = worker.join() {
            warn!("Scheduler thread panicked: {:?}", e);
        }

        self.netio.take();
        self.queue.take();

        info!(
            thread = %self.thread_name,
            iterations = self.iterations(),
            "Relay processor stopped"
        );
    }
}

/// Hand `terminate` to the scheduler, unless its thread has already exited.
///
/// A dead worker no longer drains the queue, so a full bounded queue would
/// never free a slot for it.
fn deliver_terminate(queue: &ControlQueue, terminate: TickMessage, worker: &JoinHandle<()>) {
    loop {
        if worker.is_finished() {
            warn!("Scheduler thread already exited, terminate request not sent");
            return;
        }
        match queue.put_timeout(terminate, TERMINATE_RETRY) {
            Ok(()) => return,
            Err(QueueError::Full) => {
                trace!("Control queue full, retrying terminate request");
            }
            Err(QueueError::Closed) => {
                warn!("Control queue closed, terminate request not sent");
                return;
            }
        }
    }
}

impl<N: NetworkIo> Drop for RelayProcessor<N> {
    fn drop(&mut self) {
        self.stop();
    }
}
