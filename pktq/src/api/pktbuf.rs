//! Owned handles to pooled packet buffers.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{self, Ordering};

use crate::api::mempool::{PoolInner, SlotData};

/// An owned, reference-counted handle to one buffer in a [`Mempool`].
///
/// The handle behaves like a byte vector with fixed capacity: `data()` is
/// the valid payload, `append`/`trim` grow and shrink it at either end.
/// Dropping the handle decrements the buffer's reference count; the slot
/// returns to its pool when the count reaches zero.
///
/// While read handles from [`PacketBuf::clone_ref`] exist the payload is
/// frozen: every mutator refuses until the last read handle drops.
///
/// [`Mempool`]: crate::Mempool
pub struct PacketBuf {
    pool: Arc<PoolInner>,
    index: u32,
}

// Payload writes require the refcount to be 1, checked under `&mut self`,
// so a `&mut` into the slot never coexists with a reader on any thread.
unsafe impl Send for PacketBuf {}
unsafe impl Sync for PacketBuf {}

impl PacketBuf {
    pub(crate) fn new(pool: Arc<PoolInner>, index: u32) -> Self {
        Self { pool, index }
    }

    #[inline]
    fn slot_data(&self) -> &SlotData {
        unsafe { &*self.pool.slot(self.index).data.get() }
    }

    /// Exclusive payload access, or `None` while read handles exist.
    ///
    /// Creating another handle needs `&self`, which `&mut self` excludes,
    /// so a count of 1 observed here cannot grow before the borrow ends.
    #[inline]
    fn slot_data_mut(&mut self) -> Option<&mut SlotData> {
        let slot = self.pool.slot(self.index);
        // Acquire pairs with the Release decrement of a dropped read
        // handle, ordering its last reads before our writes.
        if slot.refcnt.load(Ordering::Acquire) != 1 {
            return None;
        }
        Some(unsafe { &mut *slot.data.get() })
    }

    /// The valid payload.
    #[inline]
    pub fn data(&self) -> &[u8] {
        let data = self.slot_data();
        &data.bytes[..data.len]
    }

    /// Mutable view of the valid payload.
    ///
    /// Empty while read handles exist, like every other mutator.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        match self.slot_data_mut() {
            Some(data) => {
                let len = data.len;
                &mut data.bytes[..len]
            }
            None => &mut [],
        }
    }

    /// Valid payload length in bytes.
    #[inline]
    pub fn data_len(&self) -> usize {
        self.slot_data().len
    }

    /// Fixed byte capacity of the underlying buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slot_data().bytes.len()
    }

    /// Bytes still available past the payload.
    #[inline]
    pub fn tailroom(&self) -> usize {
        let data = self.slot_data();
        data.bytes.len() - data.len
    }

    /// Extends the payload by `count` bytes at the tail and returns the new
    /// region for writing. `None` if the tailroom is too small or read
    /// handles exist.
    pub fn append(&mut self, count: usize) -> Option<&mut [u8]> {
        let data = self.slot_data_mut()?;
        if count > data.bytes.len() - data.len {
            return None;
        }
        let start = data.len;
        data.len += count;
        Some(&mut data.bytes[start..start + count])
    }

    /// Shrinks the payload by `count` bytes at the tail. Returns `false`
    /// (payload untouched) if it is shorter than `count` or read handles
    /// exist.
    pub fn trim(&mut self, count: usize) -> bool {
        let Some(data) = self.slot_data_mut() else {
            return false;
        };
        if count > data.len {
            return false;
        }
        data.len -= count;
        true
    }

    /// Caps the payload at `len` bytes. No-op if it is already shorter or
    /// read handles exist.
    pub fn truncate(&mut self, len: usize) {
        if let Some(data) = self.slot_data_mut() {
            data.len = data.len.min(len);
        }
    }

    /// Resets the payload to empty. No-op while read handles exist.
    pub fn reset(&mut self) {
        if let Some(data) = self.slot_data_mut() {
            data.len = 0;
        }
    }

    /// Replaces the payload with `src`. Returns `false` (payload
    /// untouched) if `src` exceeds the buffer's capacity or read handles
    /// exist.
    pub fn copy_from_slice(&mut self, src: &[u8]) -> bool {
        let Some(data) = self.slot_data_mut() else {
            return false;
        };
        if src.len() > data.bytes.len() {
            return false;
        }
        data.bytes[..src.len()].copy_from_slice(src);
        data.len = src.len();
        true
    }

    /// Current reference count.
    pub fn refcnt(&self) -> u32 {
        self.pool.slot(self.index).refcnt.load(Ordering::Relaxed)
    }

    /// Creates a second, read-only handle to the same buffer.
    ///
    /// The slot stays out of the pool until every handle is dropped, and
    /// the payload is frozen: mutators on the owning handle refuse until
    /// the last read handle drops.
    pub fn clone_ref(&self) -> PacketBufRef {
        self.pool
            .slot(self.index)
            .refcnt
            .fetch_add(1, Ordering::Relaxed);
        PacketBufRef {
            buf: PacketBuf {
                pool: self.pool.clone(),
                index: self.index,
            },
        }
    }
}

impl Drop for PacketBuf {
    fn drop(&mut self) {
        let slot = self.pool.slot(self.index);
        if slot.refcnt.fetch_sub(1, Ordering::Release) == 1 {
            // Pair with every earlier Release decrement before the payload
            // can be handed to the next allocator.
            atomic::fence(Ordering::Acquire);
            self.pool.recycle(self.index);
        }
    }
}

impl AsRef<[u8]> for PacketBuf {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl AsMut<[u8]> for PacketBuf {
    fn as_mut(&mut self) -> &mut [u8] {
        self.data_mut()
    }
}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuf")
            .field("pool", &self.pool.name())
            .field("index", &self.index)
            .field("data_len", &self.data_len())
            .field("refcnt", &self.refcnt())
            .finish()
    }
}

/// A read-only co-owner of a [`PacketBuf`], produced by
/// [`PacketBuf::clone_ref`].
pub struct PacketBufRef {
    buf: PacketBuf,
}

impl PacketBufRef {
    /// The valid payload.
    pub fn data(&self) -> &[u8] {
        self.buf.data()
    }

    /// Valid payload length in bytes.
    pub fn data_len(&self) -> usize {
        self.buf.data_len()
    }

    /// Current reference count.
    pub fn refcnt(&self) -> u32 {
        self.buf.refcnt()
    }
}

impl AsRef<[u8]> for PacketBufRef {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl fmt::Debug for PacketBufRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBufRef")
            .field("data_len", &self.data_len())
            .field("refcnt", &self.refcnt())
            .finish()
    }
}
