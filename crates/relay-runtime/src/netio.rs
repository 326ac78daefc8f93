//! Output batching toward the network layer.
//!
//! Engine passes append outgoing packets to an [`OutputBatch`] picked at the
//! start of each iteration; the scheduler pumps the batch once all passes are
//! done and the global lock is released, so transmission never happens under
//! the lock.

use crossbeam_channel::{Receiver, Sender};
use relay_common::error::{RelayError, RelayResult};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Packets queued for transmission in one iteration.
#[derive(Debug, Default)]
pub struct OutputBatch {
    packets: Vec<(SocketAddr, Vec<u8>)>,
}

impl OutputBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty batch with room for `capacity` packets.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            packets: Vec::with_capacity(capacity),
        }
    }

    /// Queue `payload` for `dest`.
    pub fn push(&mut self, dest: SocketAddr, payload: Vec<u8>) {
        self.packets.push((dest, payload));
    }

    /// Number of queued packets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Queued packets in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(SocketAddr, Vec<u8>)> {
        self.packets.iter()
    }
}

/// Network I/O context owned by the relay processor.
pub trait NetworkIo: Send + Sync + 'static {
    /// Start a new output batch for one iteration.
    fn pick_sender(&self) -> OutputBatch;

    /// Hand a finished batch to the transport.
    fn pump(&self, batch: OutputBatch);
}

/// UDP transmitter with a dedicated sender thread.
///
/// Pumping only moves the batch onto a channel; the sender thread performs the
/// actual `send_to` calls. Dropping the context closes the channel, lets the
/// thread drain what is already queued, and joins it.
#[derive(Debug)]
pub struct UdpNetIo {
    tx: Option<Sender<OutputBatch>>,
    worker: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    sent: Arc<AtomicU64>,
}

impl UdpNetIo {
    /// Bind a socket on `addr` and start the sender thread.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NetIo`] if the socket cannot be bound or the
    /// thread cannot be spawned.
    pub fn bind(addr: impl ToSocketAddrs) -> RelayResult<Self> {
        let socket = UdpSocket::bind(addr)
            .map_err(|e| RelayError::NetIo(format!("failed to bind UDP socket: {e}")))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| RelayError::NetIo(format!("failed to read local address: {e}")))?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let sent = Arc::new(AtomicU64::new(0));
        let sent_worker = Arc::clone(&sent);

        let worker = thread::Builder::new()
            .name("relay-netio".into())
            .spawn(move || sender_loop(&socket, &rx, &sent_worker))
            .map_err(|e| RelayError::NetIo(format!("failed to spawn sender thread: {e}")))?;

        info!(%local_addr, "UDP network I/O started");
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            local_addr,
            sent,
        })
    }

    /// Address the sending socket is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Packets transmitted so far.
    #[must_use]
    pub fn packets_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

fn sender_loop(socket: &UdpSocket, rx: &Receiver<OutputBatch>, sent: &AtomicU64) {
    debug!("Sender thread started");
    for batch in rx {
        for (dest, payload) in batch.packets {
            match socket.send_to(&payload, dest) {
                Ok(_) => {
                    sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!(%dest, "send_to failed: {e}"),
            }
        }
    }
    debug!("Sender thread stopped");
}

impl NetworkIo for UdpNetIo {
    fn pick_sender(&self) -> OutputBatch {
        OutputBatch::new()
    }

    fn pump(&self, batch: OutputBatch) {
        if batch.is_empty() {
            return;
        }
        if let Some(tx) = &self.tx {
            if tx.send(batch).is_err() {
                trace!("Sender thread gone, dropping batch");
            }
        }
    }
}

impl Drop for UdpNetIo {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.worker.take() {
            if let Err(e) = handle.join() {
                warn!("Sender thread panicked: {:?}", e);
            }
        }
        info!(sent = self.packets_sent(), "UDP network I/O stopped");
    }
}
