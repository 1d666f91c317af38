//! Burst receive and transmit through loopback and injected ports.

use arrayvec::ArrayVec;
use serial_test::serial;

use pktq::{
    Error, MAX_BURST_SIZE, Mempool, PacketBuf, Port, PortConfig, RxQueue, TxQueue,
};
use pktq_test::util::{TEST_RING_SIZE, init_tracing, loopback_port, test_pool};

fn frames<const N: usize>(pool: &Mempool, count: usize) -> ArrayVec<PacketBuf, N> {
    let mut bufs = ArrayVec::new();
    for i in 0..count {
        let mut buf = pool.alloc().expect("frame buffer");
        buf.copy_from_slice(&[i as u8; 8]);
        bufs.push(buf);
    }
    bufs
}

#[test]
#[serial]
fn test_loopback_round_trip() {
    init_tracing();
    let pool = test_pool("loop-rt");
    let port = loopback_port(&pool).expect("loopback port");
    let rx = RxQueue::new(port, 0).expect("rx");
    let tx = TxQueue::new(port, 0).expect("tx");

    let mut out = frames::<8>(&pool, 5);
    assert_eq!(tx.tx(&mut out).expect("tx burst"), 5);
    assert!(out.is_empty());

    let bufs = rx.rx_burst::<MAX_BURST_SIZE>().expect("rx burst");
    assert_eq!(bufs.len(), 5);
    for (i, buf) in bufs.iter().enumerate() {
        assert_eq!(buf.data(), &[i as u8; 8]);
    }

    let stats = port.stats().expect("stats");
    assert_eq!(stats.opackets, 5);
    assert_eq!(stats.ipackets, 5);
    assert_eq!(stats.rx_drops, 0);
    drop(bufs);
    port.detach().expect("detach");
    assert_eq!(pool.avail_count(), pool.capacity());
}

#[test]
#[serial]
fn test_empty_rx_returns_zero() {
    init_tracing();
    let pool = test_pool("loop-empty");
    let port = loopback_port(&pool).expect("loopback port");
    let rx = RxQueue::new(port, 0).expect("rx");

    let mut bufs = ArrayVec::<PacketBuf, 16>::new();
    // An idle queue stays at zero, call after call.
    for _ in 0..3 {
        assert_eq!(rx.rx(&mut bufs).expect("empty poll"), 0);
    }
    assert!(bufs.is_empty());
    port.detach().expect("detach");
}

#[test]
#[serial]
fn test_loopback_overflow_counts_drops_not_arrivals() {
    init_tracing();
    let pool = test_pool("loop-overflow");
    let port = Port::attach(&PortConfig::new().ring_size(2).loopback(), &pool).expect("port");
    let tx = TxQueue::new(port, 0).expect("tx");

    // First pair fills the rx ring; second pair has nowhere to land.
    let mut out = frames::<2>(&pool, 2);
    assert_eq!(tx.tx(&mut out).expect("first pair"), 2);
    let mut out = frames::<2>(&pool, 2);
    assert_eq!(tx.tx(&mut out).expect("second pair"), 2);

    let stats = port.stats().expect("stats");
    assert_eq!(stats.opackets, 4);
    // Only the frames that reached the rx ring count as arrivals.
    assert_eq!(stats.ipackets, 2);
    assert_eq!(stats.rx_drops, 2);
    port.detach().expect("detach");
}

#[test]
#[serial]
fn test_partial_tx_keeps_unsent_frames() {
    init_tracing();
    let pool = test_pool("tx-partial");
    // Non-loopback so the tx ring fills up and stays full.
    let port = Port::attach(&PortConfig::new().ring_size(4), &pool).expect("port");
    let tx = TxQueue::new(port, 0).expect("tx");

    let mut out = frames::<8>(&pool, 7);
    assert_eq!(tx.tx(&mut out).expect("first burst"), 4);
    assert_eq!(out.len(), 3);
    // Unsent frames are untouched and stay in order.
    assert_eq!(out[0].data(), &[4u8; 8]);
    assert_eq!(out[2].data(), &[6u8; 8]);

    // A full ring accepts nothing; that is still success.
    assert_eq!(tx.tx(&mut out).expect("full ring"), 0);
    assert_eq!(out.len(), 3);

    assert_eq!(port.drain(0).expect("drain"), 4);
    assert_eq!(tx.tx(&mut out).expect("after drain"), 3);
    assert_eq!(port.stats().expect("stats").opackets, 7);
    port.detach().expect("detach");
}

#[test]
#[serial]
fn test_burst_cap_on_receive() {
    init_tracing();
    let pool = test_pool("rx-cap");
    let port = loopback_port(&pool).expect("loopback port");
    let rx = RxQueue::new(port, 0).expect("rx");
    let tx = TxQueue::new(port, 0).expect("tx");

    let mut out = frames::<10>(&pool, 10);
    assert_eq!(tx.tx(&mut out).expect("tx burst"), 10);

    // A smaller batch drains the ring in slices, in order.
    let mut bufs = ArrayVec::<PacketBuf, 4>::new();
    assert_eq!(rx.rx(&mut bufs).expect("first slice"), 4);
    assert_eq!(bufs[0].data(), &[0u8; 8]);
    bufs.clear();
    assert_eq!(rx.rx(&mut bufs).expect("second slice"), 4);
    assert_eq!(bufs[0].data(), &[4u8; 8]);
    bufs.clear();
    assert_eq!(rx.rx(&mut bufs).expect("tail"), 2);
    port.detach().expect("detach");
}

#[test]
#[serial]
fn test_injected_frames_and_drop_accounting() {
    init_tracing();
    let pool = test_pool("inject");
    let port = Port::attach(&PortConfig::new().ring_size(TEST_RING_SIZE), &pool).expect("port");
    let rx = RxQueue::new(port, 0).expect("rx");

    for i in 0..3u8 {
        assert!(port.inject(0, &[i; 4]).expect("inject"));
    }
    // Larger than the pool's data room.
    assert!(!port.inject(0, &[0u8; 1024]).expect("oversize inject"));

    let bufs = rx.rx_burst::<MAX_BURST_SIZE>().expect("rx burst");
    assert_eq!(bufs.len(), 3);
    assert_eq!(bufs[2].data(), &[2u8; 4]);

    let stats = port.stats().expect("stats");
    assert_eq!(stats.ipackets, 3);
    assert_eq!(stats.rx_drops, 1);
    port.detach().expect("detach");
}

#[test]
#[serial]
fn test_handles_fail_after_detach() {
    init_tracing();
    let pool = test_pool("detach");
    let port = loopback_port(&pool).expect("loopback port");
    let rx = RxQueue::new(port, 0).expect("rx");
    let tx = TxQueue::new(port, 0).expect("tx");
    port.detach().expect("detach");

    let mut bufs = ArrayVec::<PacketBuf, MAX_BURST_SIZE>::new();
    assert!(matches!(rx.rx(&mut bufs), Err(Error::InvalidPort(_))));
    let mut out = ArrayVec::<PacketBuf, 4>::new();
    assert!(matches!(tx.tx(&mut out), Err(Error::InvalidPort(_))));
    assert!(matches!(port.inject(0, b"late"), Err(Error::InvalidPort(_))));
}

#[test]
#[serial]
fn test_completions_return_transmitted_payload() {
    init_tracing();
    let pool = test_pool("completions");
    let port = Port::attach(&PortConfig::new().ring_size(TEST_RING_SIZE), &pool).expect("port");
    let tx = TxQueue::new(port, 0).expect("tx");

    let mut out = frames::<4>(&pool, 3);
    assert_eq!(tx.tx(&mut out).expect("tx burst"), 3);

    let done = port.completions(0, 2).expect("completions");
    assert_eq!(done.len(), 2);
    assert_eq!(done[0].data(), &[0u8; 8]);
    assert_eq!(done[1].data(), &[1u8; 8]);
    drop(done);

    assert_eq!(port.drain(0).expect("drain rest"), 1);
    assert_eq!(pool.avail_count(), pool.capacity());
    port.detach().expect("detach");
}
