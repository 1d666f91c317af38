//! Fixed-capacity packet buffer pools.
//!
//! A pool pre-allocates every buffer up front; steady-state allocation and
//! release touch only a lock-free free list and an availability counter,
//! so the hot path never hits the heap. Pools are the one shared-everywhere
//! resource: any number of workers may allocate and release concurrently.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use arrayvec::ArrayVec;
use crossbeam_queue::ArrayQueue;
use tracing::trace;

use crate::api::error::{Error, ErrorCode, Result};
use crate::api::pktbuf::PacketBuf;
use crate::api::worker::{self, SocketId};

/// Socket id for pools not bound to a NUMA domain.
pub const SOCKET_ID_ANY: SocketId = u32::MAX;

pub(crate) struct SlotData {
    pub(crate) bytes: Box<[u8]>,
    /// Valid payload length, 0..=bytes.len().
    pub(crate) len: usize,
}

pub(crate) struct Slot {
    pub(crate) data: UnsafeCell<SlotData>,
    /// Zero while the slot sits on the free list.
    pub(crate) refcnt: AtomicU32,
}

pub(crate) struct PoolInner {
    name: String,
    slots: Box<[Slot]>,
    /// Free slot indices. Holds at least `avail` entries at all times.
    free: ArrayQueue<u32>,
    /// Buffers that can still be reserved. Decremented before popping the
    /// free list, incremented after pushing, so a successful reservation
    /// always finds its index.
    avail: AtomicUsize,
    data_room: usize,
    socket_id: SocketId,
}

// Slot payloads are only reachable through the owning `PacketBuf` while
// allocated; the free list and refcounts serialize every handoff.
unsafe impl Send for PoolInner {}
unsafe impl Sync for PoolInner {}

impl PoolInner {
    /// All-or-nothing reservation of `count` buffers.
    fn reserve(&self, count: usize) -> bool {
        let mut avail = self.avail.load(Ordering::Acquire);
        loop {
            if avail < count {
                return false;
            }
            match self.avail.compare_exchange_weak(
                avail,
                avail - count,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => avail = observed,
            }
        }
    }

    /// Takes one reserved slot and resets its metadata: refcount 1, zero
    /// valid length. Nothing from a previous use survives into the handle.
    fn checkout(&self) -> u32 {
        let index = self
            .free
            .pop()
            .expect("free list underflow after reservation");
        let slot = &self.slots[index as usize];
        slot.refcnt.store(1, Ordering::Relaxed);
        unsafe {
            (*slot.data.get()).len = 0;
        }
        index
    }

    pub(crate) fn recycle(&self, index: u32) {
        let pushed = self.free.push(index).is_ok();
        debug_assert!(pushed, "slot {index} freed twice");
        self.avail.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub(crate) fn slot(&self, index: u32) -> &Slot {
        &self.slots[index as usize]
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

/// Configuration for creating a [`Mempool`].
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Number of pre-allocated buffers.
    pub num_bufs: usize,
    /// Fixed byte capacity of each buffer.
    pub data_room_size: usize,
    /// NUMA socket the pool belongs to ([`SOCKET_ID_ANY`] for none).
    pub socket_id: SocketId,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            num_bufs: 1024,
            data_room_size: 2048,
            socket_id: SOCKET_ID_ANY,
        }
    }
}

impl MempoolConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of buffers in the pool.
    pub fn num_bufs(mut self, n: usize) -> Self {
        self.num_bufs = n;
        self
    }

    /// Sets the per-buffer byte capacity.
    pub fn data_room_size(mut self, size: usize) -> Self {
        self.data_room_size = size;
        self
    }

    /// Sets the NUMA socket id.
    pub fn socket_id(mut self, id: SocketId) -> Self {
        self.socket_id = id;
        self
    }
}

/// A fixed-capacity, thread-safe packet buffer pool.
///
/// Cloning the handle shares the same pool. At most `capacity()` buffers
/// are ever live at once; bulk allocation is all-or-nothing, so a failed
/// bulk call leaves the free set untouched.
#[derive(Clone)]
pub struct Mempool {
    inner: Arc<PoolInner>,
}

impl Mempool {
    /// Creates a pool with `config.num_bufs` pre-allocated buffers.
    pub fn create<S>(name: S, config: &MempoolConfig) -> Result<Self>
    where
        S: Into<String>,
    {
        if config.num_bufs == 0 {
            return Err(Error::InvalidConfig("mempool needs at least one buffer"));
        }
        if config.data_room_size == 0 {
            return Err(Error::InvalidConfig("mempool buffers need a nonzero size"));
        }
        let slots: Box<[Slot]> = (0..config.num_bufs)
            .map(|_| Slot {
                data: UnsafeCell::new(SlotData {
                    bytes: vec![0u8; config.data_room_size].into_boxed_slice(),
                    len: 0,
                }),
                refcnt: AtomicU32::new(0),
            })
            .collect();
        let free = ArrayQueue::new(config.num_bufs);
        for index in 0..config.num_bufs as u32 {
            let _ = free.push(index);
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                slots,
                free,
                avail: AtomicUsize::new(config.num_bufs),
                data_room: config.data_room_size,
                socket_id: config.socket_id,
            }),
        })
    }

    /// Creates a pool with default buffer size.
    pub fn create_default<S>(name: S, num_bufs: usize) -> Result<Self>
    where
        S: Into<String>,
    {
        let config = MempoolConfig {
            num_bufs,
            ..Default::default()
        };
        Self::create(name, &config)
    }

    /// The pool's name, for diagnostics.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Total number of buffers the pool was created with.
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Number of free buffers right now.
    pub fn avail_count(&self) -> usize {
        self.inner.avail.load(Ordering::Acquire)
    }

    /// Fixed byte capacity of each buffer.
    pub fn data_room_size(&self) -> usize {
        self.inner.data_room
    }

    /// The NUMA socket this pool belongs to.
    pub fn socket_id(&self) -> SocketId {
        self.inner.socket_id
    }

    /// Allocates one buffer, or `None` when the pool is exhausted.
    pub fn try_alloc(&self) -> Option<PacketBuf> {
        if !self.inner.reserve(1) {
            trace!(pool = self.inner.name(), "pool exhausted");
            return None;
        }
        let index = self.inner.checkout();
        Some(PacketBuf::new(self.inner.clone(), index))
    }

    /// Allocates one buffer, recording `OutOfBuffers` on failure.
    pub fn alloc(&self) -> Result<PacketBuf> {
        self.try_alloc().ok_or_else(|| {
            worker::record_error(ErrorCode::OutOfBuffers);
            Error::OutOfBuffers
        })
    }

    /// Allocates exactly `count` buffers, or none at all.
    ///
    /// On success every returned buffer has reference count 1 and zero
    /// valid length. On failure the free set is unchanged - there is no
    /// partial reservation to unwind.
    pub fn alloc_bulk(&self, count: usize) -> Result<Vec<PacketBuf>> {
        if !self.inner.reserve(count) {
            trace!(pool = self.inner.name(), count, "bulk allocation failed");
            worker::record_error(ErrorCode::OutOfBuffers);
            return Err(Error::OutOfBuffers);
        }
        Ok((0..count)
            .map(|_| PacketBuf::new(self.inner.clone(), self.inner.checkout()))
            .collect())
    }

    /// Fills `batch` up to its remaining capacity, stopping early if the
    /// pool runs dry. Returns how many buffers were added.
    pub fn fill_batch<const N: usize>(&self, batch: &mut ArrayVec<PacketBuf, N>) -> usize {
        let mut count = 0;
        while batch.len() < batch.capacity() {
            match self.try_alloc() {
                Some(buf) => {
                    batch.push(buf);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Releases every buffer in the sequence.
    ///
    /// Buffers from different pools may be mixed; each one returns to its
    /// own pool. Each release decrements the buffer's reference count and
    /// the slot rejoins the free set when the count reaches zero.
    pub fn free_bulk(bufs: Vec<PacketBuf>) {
        drop(bufs);
    }

    /// Releases a single buffer. Equivalent to dropping the handle.
    pub fn free_one(buf: PacketBuf) {
        drop(buf);
    }

    /// Whether two handles refer to the same pool.
    pub fn same_pool(&self, other: &Mempool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Mempool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mempool")
            .field("name", &self.name())
            .field("capacity", &self.capacity())
            .field("avail", &self.avail_count())
            .finish()
    }
}
