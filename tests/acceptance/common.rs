//! Common utilities for acceptance tests.
//!
//! Provides:
//! - Engines that record passes or forward UDP traffic
//! - A timer driver producing wakeups like the external cycle timer
//! - Polling helpers with deadlines

#![allow(dead_code)] // Not every helper is used by every test module

use relay_common::stats::{CounterStore, RelayCounter, StatsAccumulator, StatsStore};
use relay_runtime::{
    Collaborators, GlobalLock, NetworkIo, OutputBatch, PacketEngine, RelayProcessor,
    SessionRegistry, TickInfo,
};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Which engine pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Primary,
    SecondaryOnly,
    Outbound,
}

/// Engine that records the passes it runs, with their tick info.
pub struct RecordingEngine {
    pub calls: Arc<Mutex<Vec<(Pass, Option<TickInfo>)>>>,
}

impl RecordingEngine {
    pub fn new() -> (Self, Arc<Mutex<Vec<(Pass, Option<TickInfo>)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl PacketEngine for RecordingEngine {
    type State = usize;

    fn process_primary(
        &mut self,
        _state: &mut usize,
        tick: &TickInfo,
        _out: &mut OutputBatch,
        _stats: &mut StatsAccumulator,
    ) {
        self.calls.lock().unwrap().push((Pass::Primary, Some(*tick)));
    }

    fn process_secondary_only(
        &mut self,
        _global: &GlobalLock<usize>,
        tick: &TickInfo,
        _out: &mut OutputBatch,
        _stats: &mut StatsAccumulator,
    ) {
        self.calls
            .lock()
            .unwrap()
            .push((Pass::SecondaryOnly, Some(*tick)));
    }

    fn process_outbound_sessions(
        &mut self,
        _state: &mut usize,
        _now: f64,
        _out: &mut OutputBatch,
        _stats: &mut StatsAccumulator,
    ) {
        self.calls.lock().unwrap().push((Pass::Outbound, None));
    }

    fn outbound_session_count(&self, state: &usize) -> usize {
        *state
    }
}

/// One relayed stream: packets arriving on `socket` go to `forward_to`.
pub struct Leg {
    pub socket: UdpSocket,
    pub forward_to: SocketAddr,
}

impl Leg {
    pub fn bind(forward_to: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_nonblocking(true).unwrap();
        Self { socket, forward_to }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    fn drain(&self, out: &mut OutputBatch, stats: &mut StatsAccumulator) {
        let mut buf = [0u8; 2048];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, _)) => {
                    stats.record(RelayCounter::Received, 1);
                    if n == 0 {
                        stats.record(RelayCounter::Discard, 1);
                        continue;
                    }
                    out.push(self.forward_to, buf[..n].to_vec());
                    stats.record(RelayCounter::Relayed, 1);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }
}

/// Relay state: primary (media) and secondary (control) legs.
#[derive(Default)]
pub struct RelayTable {
    pub primary: Vec<Leg>,
    pub secondary: Vec<Leg>,
}

/// Engine forwarding everything it reads to each leg's peer.
#[derive(Default)]
pub struct ForwardingEngine {
    pub secondary_passes: Arc<AtomicUsize>,
}

impl PacketEngine for ForwardingEngine {
    type State = RelayTable;

    fn process_primary(
        &mut self,
        state: &mut RelayTable,
        tick: &TickInfo,
        out: &mut OutputBatch,
        stats: &mut StatsAccumulator,
    ) {
        for leg in &state.primary {
            leg.drain(out, stats);
        }
        if tick.full_path {
            self.secondary_passes.fetch_add(1, Ordering::Relaxed);
            for leg in &state.secondary {
                leg.drain(out, stats);
            }
        }
    }

    fn process_secondary_only(
        &mut self,
        _global: &GlobalLock<RelayTable>,
        _tick: &TickInfo,
        _out: &mut OutputBatch,
        _stats: &mut StatsAccumulator,
    ) {
    }

    fn process_outbound_sessions(
        &mut self,
        _state: &mut RelayTable,
        _now: f64,
        _out: &mut OutputBatch,
        _stats: &mut StatsAccumulator,
    ) {
    }

    fn outbound_session_count(&self, _state: &RelayTable) -> usize {
        0
    }
}

/// Build a relay table forwarding to `peer`, registering its descriptors.
pub fn relay_table(
    peer: SocketAddr,
    sessions: usize,
    registry: &SessionRegistry,
) -> RelayTable {
    let mut table = RelayTable::default();
    for _ in 0..sessions {
        let primary = Leg::bind(peer);
        let secondary = Leg::bind(peer);
        registry
            .lock()
            .add_session(primary.socket.as_raw_fd(), secondary.socket.as_raw_fd());
        table.primary.push(primary);
        table.secondary.push(secondary);
    }
    table
}

/// Network context that discards output.
#[derive(Default)]
pub struct NullNetIo;

impl NetworkIo for NullNetIo {
    fn pick_sender(&self) -> OutputBatch {
        OutputBatch::new()
    }

    fn pump(&self, _batch: OutputBatch) {}
}

/// Collaborators over `state` with a fresh registry, store and wakeup counter.
pub fn collaborators<S>(
    state: S,
    registry: Arc<SessionRegistry>,
) -> (Collaborators<S>, Arc<CounterStore>, Arc<AtomicUsize>) {
    let store = Arc::new(CounterStore::new());
    let wakeups = Arc::new(AtomicUsize::new(0));
    let w = Arc::clone(&wakeups);
    let ctx = Collaborators::new(
        Arc::new(GlobalLock::new(state)),
        registry,
        Arc::new(move || {
            w.fetch_add(1, Ordering::Relaxed);
        }),
        Arc::clone(&store) as Arc<dyn StatsStore>,
    );
    (ctx, store, wakeups)
}

/// Thread calling `wakeup` at a fixed period, advancing the cycle counter.
pub struct TimerDriver {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<i32>>,
}

impl TimerDriver {
    pub fn start<N: NetworkIo>(
        processor: Arc<RelayProcessor<N>>,
        period: Duration,
        cycles_per_period: i64,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut clock_tick = 0i32;
            let mut cycle_counter = 0i64;
            while !stop_thread.load(Ordering::Relaxed) {
                clock_tick += 1;
                cycle_counter += cycles_per_period;
                processor.wakeup(clock_tick, cycle_counter);
                thread::sleep(period);
            }
            clock_tick
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the timer, returning the number of wakeups sent.
    pub fn stop(mut self) -> i32 {
        self.stop.store(true, Ordering::Relaxed);
        self.handle
            .take()
            .map(|h| h.join().unwrap())
            .unwrap_or_default()
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Receive up to `count` datagrams on `peer` within `timeout`.
pub fn recv_datagrams(peer: &UdpSocket, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
    peer.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    let deadline = Instant::now() + timeout;
    let mut received = Vec::new();
    let mut buf = [0u8; 2048];
    while received.len() < count && Instant::now() < deadline {
        if let Ok((n, _)) = peer.recv_from(&mut buf) {
            received.push(buf[..n].to_vec());
        }
    }
    received
}
