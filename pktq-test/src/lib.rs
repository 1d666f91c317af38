//! Shared helpers for the pktq integration tests.

pub mod util {
    use std::sync::OnceLock;

    use pktq::{Mempool, MempoolConfig, Port, PortConfig, Result};

    pub const TEST_POOL_SIZE: usize = 64;
    pub const TEST_DATA_ROOM: usize = 256;
    pub const TEST_RING_SIZE: usize = 32;

    /// Route `RUST_LOG`-filtered traces to the test output, once per
    /// process.
    pub fn init_tracing() {
        static INIT: OnceLock<()> = OnceLock::new();
        INIT.get_or_init(|| {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .init();
        });
    }

    /// A pool sized for one test's traffic.
    pub fn test_pool(name: &str) -> Mempool {
        Mempool::create(
            name,
            &MempoolConfig::new()
                .num_bufs(TEST_POOL_SIZE)
                .data_room_size(TEST_DATA_ROOM),
        )
        .expect("test pool")
    }

    /// Attaches a single-queue loopback port over `pool`.
    pub fn loopback_port(pool: &Mempool) -> Result<Port> {
        Port::attach(
            &PortConfig::new().ring_size(TEST_RING_SIZE).loopback(),
            pool,
        )
    }
}
