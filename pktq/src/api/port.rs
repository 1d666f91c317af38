//! Packet ports and the global port table.
//!
//! A port models one network device with per-queue rx and tx rings. Ports
//! attach into a process-wide table indexed by port id; data-plane lookups
//! read the table through an RCU snapshot ([`arc_swap`]) so they never
//! contend with attach and detach.
//!
//! The wire side of a port is explicit: a collaborator (test harness,
//! software switch, device emulation) calls [`Port::inject`] to make
//! frames arrive and [`Port::completions`] to reclaim transmitted
//! buffers. A port configured as loopback instead short-circuits each tx
//! queue into the rx queue with the same index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use arc_swap::ArcSwap;
use crossbeam_queue::ArrayQueue;
use tracing::{debug, trace};

use crate::api::error::{Error, ErrorCode, Result};
use crate::api::mempool::Mempool;
use crate::api::pktbuf::PacketBuf;
use crate::api::worker;

/// Identifier of one attached port.
pub type PortId = u16;

/// Identifier of one queue within a port.
pub type QueueId = u16;

/// Size of the port table.
pub const MAX_PORTS: usize = 32;

pub(crate) struct RxRing {
    pub(crate) ring: ArrayQueue<PacketBuf>,
    /// Pool backing injected frames.
    pool: Mempool,
}

pub(crate) struct TxRing {
    pub(crate) ring: ArrayQueue<PacketBuf>,
}

#[derive(Default)]
struct StatsInner {
    ipackets: AtomicU64,
    opackets: AtomicU64,
    rx_drops: AtomicU64,
}

pub(crate) struct PortInner {
    pub(crate) rx: Box<[RxRing]>,
    pub(crate) tx: Box<[TxRing]>,
    loopback: bool,
    stats: StatsInner,
}

impl PortInner {
    pub(crate) fn is_loopback(&self) -> bool {
        self.loopback
    }

    pub(crate) fn note_tx(&self, count: usize) {
        self.stats.opackets.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Moves transmitted buffers from a tx ring into the rx ring with the
    /// same index. Buffers move whole; no copy is made. Anything the rx
    /// ring cannot take is dropped and counted.
    pub(crate) fn loop_back(&self, queue: QueueId) {
        let tx = &self.tx[queue as usize];
        let rx = &self.rx[queue as usize];
        while let Some(buf) = tx.ring.pop() {
            match rx.ring.push(buf) {
                Ok(()) => {
                    self.stats.ipackets.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    self.stats.rx_drops.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

fn table() -> &'static ArcSwap<Vec<Option<Arc<PortInner>>>> {
    static TABLE: OnceLock<ArcSwap<Vec<Option<Arc<PortInner>>>>> = OnceLock::new();
    TABLE.get_or_init(|| ArcSwap::from_pointee(vec![None; MAX_PORTS]))
}

/// Serializes attach and detach; data-plane lookups stay lock-free.
fn setup_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

pub(crate) fn lookup(id: PortId) -> Result<Arc<PortInner>> {
    table()
        .load()
        .get(id as usize)
        .and_then(|slot| slot.clone())
        .ok_or_else(|| {
            worker::record_error(ErrorCode::InvalidPort);
            Error::InvalidPort(id)
        })
}

/// Configuration for attaching a [`Port`].
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Number of rx queues.
    pub nb_rx_queues: QueueId,
    /// Number of tx queues.
    pub nb_tx_queues: QueueId,
    /// Capacity of each rx and tx ring.
    pub ring_size: usize,
    /// Short-circuit tx queues into the matching rx queues.
    pub loopback: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            nb_rx_queues: 1,
            nb_tx_queues: 1,
            ring_size: 512,
            loopback: false,
        }
    }
}

impl PortConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of rx queues.
    pub fn nb_rx_queues(mut self, n: QueueId) -> Self {
        self.nb_rx_queues = n;
        self
    }

    /// Sets the number of tx queues.
    pub fn nb_tx_queues(mut self, n: QueueId) -> Self {
        self.nb_tx_queues = n;
        self
    }

    /// Sets the per-ring capacity.
    pub fn ring_size(mut self, size: usize) -> Self {
        self.ring_size = size;
        self
    }

    /// Makes the port a loopback: each tx queue drains into the rx queue
    /// with the same index.
    pub fn loopback(mut self) -> Self {
        self.loopback = true;
        self
    }
}

/// Snapshot of a port's packet counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    /// Frames that arrived on an rx ring.
    pub ipackets: u64,
    /// Frames accepted by a tx ring.
    pub opackets: u64,
    /// Arriving frames dropped before reaching an rx ring.
    pub rx_drops: u64,
}

/// Handle to one attached port.
///
/// `Copy` by design: data-plane code passes ports by value and resolves
/// them against the table on each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Port {
    id: PortId,
}

impl Port {
    /// Attaches a port into the first free table slot.
    ///
    /// `rx_pool` backs the buffers created for injected frames.
    pub fn attach(config: &PortConfig, rx_pool: &Mempool) -> Result<Self> {
        if config.nb_rx_queues == 0 || config.nb_tx_queues == 0 {
            return Err(Error::InvalidConfig("port needs at least one queue each way"));
        }
        if config.ring_size == 0 {
            return Err(Error::InvalidConfig("ring size must be nonzero"));
        }
        if config.loopback && config.nb_tx_queues > config.nb_rx_queues {
            return Err(Error::InvalidConfig(
                "loopback needs an rx queue per tx queue",
            ));
        }
        let _guard = setup_lock().lock().unwrap_or_else(|e| e.into_inner());
        let current = table().load();
        let id = current
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(Error::PortTableFull(MAX_PORTS))? as PortId;

        let inner = Arc::new(PortInner {
            rx: (0..config.nb_rx_queues)
                .map(|_| RxRing {
                    ring: ArrayQueue::new(config.ring_size),
                    pool: rx_pool.clone(),
                })
                .collect(),
            tx: (0..config.nb_tx_queues)
                .map(|_| TxRing {
                    ring: ArrayQueue::new(config.ring_size),
                })
                .collect(),
            loopback: config.loopback,
            stats: StatsInner::default(),
        });

        let mut next = (**current).clone();
        next[id as usize] = Some(inner);
        table().store(Arc::new(next));
        debug!(
            port = id,
            rx_queues = config.nb_rx_queues,
            tx_queues = config.nb_tx_queues,
            loopback = config.loopback,
            "port attached"
        );
        Ok(Self { id })
    }

    /// Detaches the port, freeing its table slot and dropping any buffers
    /// still sitting in its rings.
    pub fn detach(self) -> Result<()> {
        let _guard = setup_lock().lock().unwrap_or_else(|e| e.into_inner());
        let current = table().load();
        if current
            .get(self.id as usize)
            .is_none_or(|slot| slot.is_none())
        {
            return Err(Error::InvalidPort(self.id));
        }
        let mut next = (**current).clone();
        next[self.id as usize] = None;
        table().store(Arc::new(next));
        debug!(port = self.id, "port detached");
        Ok(())
    }

    /// This port's id.
    #[inline]
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Number of rx queues.
    pub fn nb_rx_queues(&self) -> Result<QueueId> {
        Ok(lookup(self.id)?.rx.len() as QueueId)
    }

    /// Number of tx queues.
    pub fn nb_tx_queues(&self) -> Result<QueueId> {
        Ok(lookup(self.id)?.tx.len() as QueueId)
    }

    /// Snapshot of the port's counters.
    pub fn stats(&self) -> Result<PortStats> {
        let inner = lookup(self.id)?;
        Ok(PortStats {
            ipackets: inner.stats.ipackets.load(Ordering::Relaxed),
            opackets: inner.stats.opackets.load(Ordering::Relaxed),
            rx_drops: inner.stats.rx_drops.load(Ordering::Relaxed),
        })
    }

    /// Makes `frame` arrive on `queue`, as if from the wire.
    ///
    /// Returns `Ok(true)` when the frame landed on the rx ring, and
    /// `Ok(false)` when it was dropped and counted: oversize for the rx
    /// pool's buffers, pool exhausted, or ring full. Errors only signal an
    /// unknown port or queue.
    pub fn inject(&self, queue: QueueId, frame: &[u8]) -> Result<bool> {
        let inner = lookup(self.id)?;
        let rx = inner.rx.get(queue as usize).ok_or(Error::InvalidQueue {
            port: self.id,
            queue,
        })?;

        let Some(mut buf) = rx.pool.try_alloc() else {
            inner.stats.rx_drops.fetch_add(1, Ordering::Relaxed);
            trace!(port = self.id, queue, "rx drop: pool exhausted");
            return Ok(false);
        };
        if !buf.copy_from_slice(frame) {
            inner.stats.rx_drops.fetch_add(1, Ordering::Relaxed);
            trace!(port = self.id, queue, len = frame.len(), "rx drop: oversize");
            return Ok(false);
        }
        if rx.ring.push(buf).is_err() {
            inner.stats.rx_drops.fetch_add(1, Ordering::Relaxed);
            trace!(port = self.id, queue, "rx drop: ring full");
            return Ok(false);
        }
        inner.stats.ipackets.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Reclaims up to `max` transmitted buffers from `queue`, as the
    /// device completing their DMA. Returned buffers carry the payload
    /// that was transmitted.
    pub fn completions(&self, queue: QueueId, max: usize) -> Result<Vec<PacketBuf>> {
        let inner = lookup(self.id)?;
        let tx = inner.tx.get(queue as usize).ok_or(Error::InvalidQueue {
            port: self.id,
            queue,
        })?;
        let mut done = Vec::new();
        while done.len() < max {
            match tx.ring.pop() {
                Some(buf) => done.push(buf),
                None => break,
            }
        }
        Ok(done)
    }

    /// Drops every pending buffer on `queue`'s tx ring, returning each to
    /// its pool. Returns how many were reclaimed.
    pub fn drain(&self, queue: QueueId) -> Result<usize> {
        let inner = lookup(self.id)?;
        let tx = inner.tx.get(queue as usize).ok_or(Error::InvalidQueue {
            port: self.id,
            queue,
        })?;
        let mut count = 0;
        while tx.ring.pop().is_some() {
            count += 1;
        }
        Ok(count)
    }
}
