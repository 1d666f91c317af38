use thiserror::Error;

use crate::api::port::{PortId, QueueId};
use crate::api::worker::WorkerId;

/// Result type for all fallible pktq operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pktq operations.
///
/// Partial bursts are not errors: burst receive and transmit report them
/// as counts. Only resource exhaustion, unknown handles and setup
/// mistakes surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// A single or bulk allocation found the pool exhausted.
    #[error("buffer pool exhausted")]
    OutOfBuffers,
    /// No port is attached under this id.
    #[error("port {0} is not attached")]
    InvalidPort(PortId),
    /// The port exists but has no queue with this id in the requested
    /// direction.
    #[error("port {port} has no queue {queue}")]
    InvalidQueue {
        /// Port the lookup went through.
        port: PortId,
        /// Queue id that was out of range.
        queue: QueueId,
    },
    /// Worker id outside the installed topology.
    #[error("worker {0} is not in the topology")]
    InvalidWorker(WorkerId),
    /// The worker is still running a previously launched task.
    #[error("worker {0} is busy")]
    WorkerBusy(WorkerId),
    /// The worker topology can only be installed once per process.
    #[error("worker topology is already installed")]
    TopologyInstalled,
    /// Every slot in the port table is attached.
    #[error("all {0} port slots are attached")]
    PortTableFull(usize),
    /// A configuration value was rejected at setup time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Spawning a worker thread failed.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The compact code recorded in the worker's error slot.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::OutOfBuffers => ErrorCode::OutOfBuffers,
            Error::InvalidPort(_) => ErrorCode::InvalidPort,
            Error::InvalidQueue { .. } => ErrorCode::InvalidQueue,
            Error::InvalidWorker(_) => ErrorCode::InvalidWorker,
            Error::WorkerBusy(_) => ErrorCode::WorkerBusy,
            Error::TopologyInstalled => ErrorCode::TopologyInstalled,
            Error::PortTableFull(_) => ErrorCode::PortTableFull,
            Error::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Error::Io(_) => ErrorCode::Io,
        }
    }
}

/// Compact, `Copy` mirror of the error taxonomy.
///
/// This is what failed operations store in the calling worker's last-error
/// slot. It is diagnostic only; return values remain the primary error
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// No failure recorded yet.
    None = 0,
    OutOfBuffers = 1,
    InvalidPort = 2,
    InvalidQueue = 3,
    InvalidWorker = 4,
    WorkerBusy = 5,
    TopologyInstalled = 6,
    PortTableFull = 7,
    InvalidConfig = 8,
    Io = 9,
}

impl ErrorCode {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ErrorCode::OutOfBuffers,
            2 => ErrorCode::InvalidPort,
            3 => ErrorCode::InvalidQueue,
            4 => ErrorCode::InvalidWorker,
            5 => ErrorCode::WorkerBusy,
            6 => ErrorCode::TopologyInstalled,
            7 => ErrorCode::PortTableFull,
            8 => ErrorCode::InvalidConfig,
            9 => ErrorCode::Io,
            _ => ErrorCode::None,
        }
    }
}
