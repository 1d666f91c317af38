//! Worker (execution unit) identity, NUMA topology and per-worker error
//! slots.
//!
//! Workers are run-to-completion threads pinned to CPU cores. Platform
//! discovery code installs the worker-to-socket topology once at startup;
//! afterwards any thread can be registered as (or launched as) one of the
//! workers and queried for its identity, socket affinity and the last
//! error code recorded on it.
//!
//! # Example
//!
//! ```no_run
//! use pktq::Worker;
//!
//! // Two workers on socket 0, two on socket 1.
//! pktq::api::worker::install_topology(&[0, 0, 1, 1]).unwrap();
//!
//! let handles = Worker::launch_on_workers(|worker| {
//!     println!("worker {} on socket {}", worker.id(), worker.socket_id());
//!     0
//! })
//! .unwrap();
//! for handle in handles {
//!     handle.wait();
//! }
//! ```

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use nix::sched::{CpuSet, sched_setaffinity};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::api::error::{Error, ErrorCode, Result};

/// Identifier of one worker execution unit.
pub type WorkerId = u32;

/// NUMA socket (memory and CPU affinity domain) identifier.
pub type SocketId = u32;

/// Special value indicating "calling thread is not a registered worker".
pub const WORKER_ID_ANY: WorkerId = u32::MAX;

/// Upper bound on topology size.
pub const MAX_WORKERS: usize = 128;

struct Registry {
    /// Index is the worker id.
    sockets: Box<[SocketId]>,
    /// Last error code per worker, stored as raw `ErrorCode` bytes.
    last_error: Box<[AtomicU8]>,
    /// Set while a launched task runs on the worker.
    busy: Box<[AtomicBool]>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

thread_local! {
    static CURRENT: Cell<WorkerId> = const { Cell::new(WORKER_ID_ANY) };
}

fn registry() -> Option<&'static Registry> {
    REGISTRY.get()
}

/// Installs the worker-to-socket topology table.
///
/// Called once at startup by platform discovery code, before any worker is
/// registered or launched. The index into `sockets` is the worker id.
pub fn install_topology(sockets: &[SocketId]) -> Result<()> {
    if sockets.is_empty() || sockets.len() > MAX_WORKERS {
        return Err(Error::InvalidConfig("topology size out of range"));
    }
    let registry = Registry {
        sockets: sockets.into(),
        last_error: sockets
            .iter()
            .map(|_| AtomicU8::new(ErrorCode::None as u8))
            .collect(),
        busy: sockets.iter().map(|_| AtomicBool::new(false)).collect(),
    };
    REGISTRY
        .set(registry)
        .map_err(|_| Error::TopologyInstalled)?;
    debug!(workers = sockets.len(), "worker topology installed");
    Ok(())
}

/// Records `code` in the calling worker's error slot.
///
/// No-op when the calling thread is not a registered worker. Slots are
/// strictly per-worker; concurrent failures on other workers are never
/// observed here.
pub(crate) fn record_error(code: ErrorCode) {
    let id = CURRENT.get();
    if id == WORKER_ID_ANY {
        return;
    }
    if let Some(registry) = registry()
        && let Some(slot) = registry.last_error.get(id as usize)
    {
        slot.store(code as u8, Ordering::Relaxed);
    }
}

/// A handle to one worker execution unit.
///
/// This type is `Copy` - it is a lightweight handle carrying the worker
/// id, not the worker thread itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Worker {
    id: WorkerId,
}

impl Worker {
    /// Creates a handle from an id.
    ///
    /// Returns `None` if the id is outside the installed topology.
    pub fn from_id(id: WorkerId) -> Option<Self> {
        registry()
            .filter(|r| (id as usize) < r.sockets.len())
            .map(|_| Self { id })
    }

    /// The worker driving the calling thread.
    ///
    /// Returns `None` on threads that were never registered or launched as
    /// a worker (for example the test harness main thread).
    pub fn current() -> Option<Self> {
        let id = CURRENT.get();
        if id == WORKER_ID_ANY {
            None
        } else {
            Some(Self { id })
        }
    }

    /// Registers the calling thread as `id`.
    ///
    /// For threads created outside [`Worker::launch`]; launched workers
    /// are registered automatically.
    pub fn register_current(id: WorkerId) -> Result<Worker> {
        let registry = registry().ok_or(Error::InvalidWorker(id))?;
        if id as usize >= registry.sockets.len() {
            return Err(Error::InvalidWorker(id));
        }
        CURRENT.set(id);
        Ok(Worker { id })
    }

    /// Number of workers in the topology (0 before installation).
    pub fn count() -> usize {
        registry().map_or(0, |r| r.sockets.len())
    }

    /// Iterates over all workers in the topology.
    pub fn all() -> impl Iterator<Item = Worker> {
        (0..Self::count() as WorkerId).map(|id| Worker { id })
    }

    /// This worker's id. Stable for the lifetime of the execution unit.
    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// The NUMA socket this worker is pinned next to.
    ///
    /// Pure topology lookup; constant for a fixed topology. Callers use it
    /// to pick a socket-local mempool - this layer only exposes the
    /// mapping, it does not enforce locality.
    #[inline]
    pub fn socket_id(&self) -> SocketId {
        registry().map_or(0, |r| r.sockets[self.id as usize])
    }

    /// The most recent error code recorded on this worker.
    ///
    /// Diagnostic only: reading does not clear the slot and a later
    /// successful operation does not reset it. Check each operation's
    /// return value for the primary result.
    pub fn last_error(&self) -> ErrorCode {
        registry().map_or(ErrorCode::None, |r| {
            ErrorCode::from_u8(r.last_error[self.id as usize].load(Ordering::Relaxed))
        })
    }

    /// Launches a closure on a new thread registered and pinned as this
    /// worker.
    ///
    /// Fails with [`Error::WorkerBusy`] while a previous launch on the
    /// same worker is still running.
    pub fn launch<F>(&self, f: F) -> Result<WorkerHandle>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let registry = registry().ok_or(Error::InvalidWorker(self.id))?;
        let busy = registry
            .busy
            .get(self.id as usize)
            .ok_or(Error::InvalidWorker(self.id))?;
        if busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::WorkerBusy(self.id));
        }

        let worker = *self;
        let spawned = thread::Builder::new()
            .name(format!("worker-{}", self.id))
            .spawn(move || {
                let _busy = BusyGuard(worker.id);
                CURRENT.set(worker.id);
                pin_to_core(worker.id);
                debug!(worker = worker.id, "worker task started");
                f()
            });
        match spawned {
            Ok(join) => Ok(WorkerHandle { worker, join }),
            Err(err) => {
                busy.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Launches `f` on every worker in the topology.
    pub fn launch_on_workers<F>(f: F) -> Result<Vec<WorkerHandle>>
    where
        F: Fn(Worker) -> i32 + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut handles = Vec::with_capacity(Self::count());
        for worker in Self::all() {
            let f = f.clone();
            handles.push(worker.launch(move || f(worker))?);
        }
        Ok(handles)
    }
}

/// Clears the busy flag when the worker task ends, normally or by panic.
struct BusyGuard(WorkerId);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if let Some(registry) = registry() {
            registry.busy[self.0 as usize].store(false, Ordering::Release);
        }
    }
}

fn pin_to_core(id: WorkerId) {
    let mut set = CpuSet::new();
    let pinned =
        set.set(id as usize).is_ok() && sched_setaffinity(Pid::from_raw(0), &set).is_ok();
    if !pinned {
        // Tolerated: CI machines may have fewer cores than the topology.
        warn!(worker = id, "could not pin worker to its core");
    }
}

/// Join handle for a task launched on a worker.
pub struct WorkerHandle {
    worker: Worker,
    join: thread::JoinHandle<i32>,
}

impl WorkerHandle {
    /// The worker the task runs on.
    pub fn worker(&self) -> Worker {
        self.worker
    }

    /// Whether the task has finished.
    pub fn is_done(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the task and returns its exit code (-1 if it panicked).
    pub fn wait(self) -> i32 {
        self.join.join().unwrap_or(-1)
    }
}
