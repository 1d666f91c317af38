//! Worker identity, topology lookup and per-worker error slots.

use std::sync::OnceLock;

use serial_test::serial;

use pktq::api::worker::install_topology;
use pktq::{Error, ErrorCode, Mempool, MempoolConfig, Worker};
use pktq_test::util::init_tracing;

/// Two sockets, two workers each. Installed once for this test process.
fn topology() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        init_tracing();
        install_topology(&[0, 0, 1, 1]).expect("topology");
    });
}

#[test]
#[serial]
fn test_worker_ids_are_stable() {
    topology();
    let handles = Worker::launch_on_workers(|worker| {
        let me = Worker::current().expect("launched thread is a worker");
        assert_eq!(me, worker);
        // Identity must not change while the task runs.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(Worker::current().expect("still a worker").id(), me.id());
        me.id() as i32
    })
    .expect("launch all");

    let mut ids: Vec<_> = handles.into_iter().map(|h| h.wait()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3]);
}

#[test]
fn test_socket_lookup_is_pure() {
    topology();
    let sockets: Vec<_> = Worker::all().map(|w| w.socket_id()).collect();
    assert_eq!(sockets, vec![0, 0, 1, 1]);
    // Repeated lookups answer the same for a fixed topology.
    assert_eq!(
        sockets,
        Worker::all().map(|w| w.socket_id()).collect::<Vec<_>>()
    );
}

#[test]
#[serial]
fn test_error_slots_are_isolated() {
    topology();
    let pool = Mempool::create(
        "worker-errs",
        &MempoolConfig::new().num_bufs(1).data_room_size(32),
    )
    .expect("tiny pool");
    let _held = pool.alloc().expect("drain the pool");

    // Worker 2 fails an allocation; worker 3 performs none.
    let failing = Worker::from_id(2).expect("worker 2");
    let idle = Worker::from_id(3).expect("worker 3");
    let handle = failing
        .launch(move || match pool.alloc() {
            Err(Error::OutOfBuffers) => 0,
            other => panic!("expected exhaustion, got {other:?}"),
        })
        .expect("launch");
    assert_eq!(handle.wait(), 0);

    assert_eq!(failing.last_error(), ErrorCode::OutOfBuffers);
    assert_eq!(idle.last_error(), ErrorCode::None);
    // Reading is not clearing.
    assert_eq!(failing.last_error(), ErrorCode::OutOfBuffers);
}

#[test]
fn test_unregistered_thread_has_no_identity() {
    topology();
    // The test harness thread never registered as a worker.
    assert!(Worker::current().is_none());

    // Failures on it are returned but recorded nowhere.
    let pool = Mempool::create(
        "anon-errs",
        &MempoolConfig::new().num_bufs(1).data_room_size(32),
    )
    .expect("tiny pool");
    let _held = pool.alloc().expect("drain the pool");
    assert!(matches!(pool.alloc(), Err(Error::OutOfBuffers)));
}

#[test]
#[serial]
fn test_busy_worker_rejects_second_launch() {
    topology();
    let worker = Worker::from_id(1).expect("worker 1");
    let (send, recv) = std::sync::mpsc::channel::<()>();
    let handle = worker
        .launch(move || {
            let _ = recv.recv();
            0
        })
        .expect("first launch");

    assert!(matches!(
        worker.launch(|| 0),
        Err(Error::WorkerBusy(1))
    ));
    send.send(()).expect("release the worker");
    assert_eq!(handle.wait(), 0);

    // Free again once the task finished.
    let second = worker.launch(|| 7).expect("relaunch");
    assert_eq!(second.wait(), 7);
}
