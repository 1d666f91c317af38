//! Burst receive and transmit on port queues.
//!
//! Handles are `(port, queue)` pairs resolved against the port table on
//! every burst, so a detached port surfaces as [`Error::InvalidPort`]
//! rather than a stale reference. Bursts never block: an empty rx ring
//! yields zero buffers and a full tx ring accepts a prefix, and both are
//! successful outcomes. Every call moves at most [`MAX_BURST_SIZE`]
//! buffers.
//!
//! Each queue is owned by one worker at a time. Nothing here enforces
//! that; the ring operations stay safe under misuse, but two workers
//! polling one queue split its traffic unpredictably.

use arrayvec::ArrayVec;
use tracing::trace;

use crate::api::error::{Error, ErrorCode, Result};
use crate::api::pktbuf::PacketBuf;
use crate::api::port::{self, Port, PortId, QueueId};
use crate::api::worker;

/// Maximum number of buffers a single burst moves.
pub const MAX_BURST_SIZE: usize = 64;

fn invalid_queue(port: PortId, queue: QueueId) -> Error {
    worker::record_error(ErrorCode::InvalidQueue);
    Error::InvalidQueue { port, queue }
}

/// RX queue handle for receiving packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RxQueue {
    port_id: PortId,
    queue_id: QueueId,
}

impl RxQueue {
    /// Creates an RX queue handle, validating that the queue exists right
    /// now.
    pub fn new(port: Port, queue_id: QueueId) -> Result<Self> {
        let inner = port::lookup(port.id())?;
        if (queue_id as usize) >= inner.rx.len() {
            return Err(invalid_queue(port.id(), queue_id));
        }
        Ok(Self {
            port_id: port.id(),
            queue_id,
        })
    }

    /// Get the port ID.
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the queue ID.
    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Receive a burst of packets into the provided buffer.
    ///
    /// Packets are appended to `bufs` up to its remaining capacity, in
    /// arrival order, each one exclusively owned by the caller. Returns
    /// how many arrived; zero means the ring was empty, not failure.
    pub fn rx<const N: usize>(&self, bufs: &mut ArrayVec<PacketBuf, N>) -> Result<usize> {
        let inner = port::lookup(self.port_id)?;
        let ring = inner
            .rx
            .get(self.queue_id as usize)
            .ok_or_else(|| invalid_queue(self.port_id, self.queue_id))?;

        let max_pkts = (bufs.capacity() - bufs.len()).min(MAX_BURST_SIZE);
        let mut received = 0;
        while received < max_pkts {
            match ring.ring.pop() {
                Some(buf) => {
                    bufs.push(buf);
                    received += 1;
                }
                None => break,
            }
        }
        if received > 0 {
            trace!(
                port = self.port_id,
                queue = self.queue_id,
                received,
                "rx burst"
            );
        }
        Ok(received)
    }

    /// Receive a burst of packets, returning them as a new `ArrayVec`.
    pub fn rx_burst<const N: usize>(&self) -> Result<ArrayVec<PacketBuf, N>> {
        let mut bufs = ArrayVec::new();
        self.rx(&mut bufs)?;
        Ok(bufs)
    }
}

/// TX queue handle for transmitting packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxQueue {
    port_id: PortId,
    queue_id: QueueId,
}

impl TxQueue {
    /// Creates a TX queue handle, validating that the queue exists right
    /// now.
    pub fn new(port: Port, queue_id: QueueId) -> Result<Self> {
        let inner = port::lookup(port.id())?;
        if (queue_id as usize) >= inner.tx.len() {
            return Err(invalid_queue(port.id(), queue_id));
        }
        Ok(Self {
            port_id: port.id(),
            queue_id,
        })
    }

    /// Get the port ID.
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the queue ID.
    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Transmit a burst of packets from the provided buffer.
    ///
    /// Accepted packets are removed from the front of `bufs`; ownership
    /// moves to the queue until completion. Returns how many were
    /// accepted. When the ring fills mid-burst the rest stay in `bufs`,
    /// untouched and in their original order - a partial or zero count is
    /// success, not an error.
    pub fn tx<const N: usize>(&self, bufs: &mut ArrayVec<PacketBuf, N>) -> Result<usize> {
        let inner = port::lookup(self.port_id)?;
        let ring = inner
            .tx
            .get(self.queue_id as usize)
            .ok_or_else(|| invalid_queue(self.port_id, self.queue_id))?;

        let nb_pkts = bufs.len().min(MAX_BURST_SIZE);
        let mut sent = 0;
        let mut unsent = ArrayVec::<PacketBuf, N>::new();
        for buf in bufs.drain(..nb_pkts) {
            if !unsent.is_empty() {
                unsent.push(buf);
                continue;
            }
            match ring.ring.push(buf) {
                Ok(()) => sent += 1,
                Err(buf) => unsent.push(buf),
            }
        }
        if !unsent.is_empty() {
            // Ring filled mid-burst: put the unsent frames back in front
            // of anything past the burst cap, in their original order.
            unsent.extend(bufs.drain(..));
            std::mem::swap(bufs, &mut unsent);
        }
        inner.note_tx(sent);
        if inner.is_loopback() {
            inner.loop_back(self.queue_id);
        }
        if sent > 0 {
            trace!(port = self.port_id, queue = self.queue_id, sent, "tx burst");
        }
        Ok(sent)
    }

    /// Transmit a single packet.
    ///
    /// On success the buffer is consumed by the queue and `None` is
    /// returned. On a full ring the buffer comes back via the `Option`.
    pub fn tx_one(&self, buf: PacketBuf) -> Result<Option<PacketBuf>> {
        let inner = port::lookup(self.port_id)?;
        let ring = inner
            .tx
            .get(self.queue_id as usize)
            .ok_or_else(|| invalid_queue(self.port_id, self.queue_id))?;
        match ring.ring.push(buf) {
            Ok(()) => {
                inner.note_tx(1);
                if inner.is_loopback() {
                    inner.loop_back(self.queue_id);
                }
                Ok(None)
            }
            Err(buf) => Ok(Some(buf)),
        }
    }
}
