pub mod api;

pub use api::error::{Error, ErrorCode, Result};
pub use api::mempool::{Mempool, MempoolConfig, SOCKET_ID_ANY};
pub use api::pktbuf::{PacketBuf, PacketBufRef};
pub use api::port::{Port, PortConfig, PortId, PortStats, QueueId};
pub use api::queue::{MAX_BURST_SIZE, RxQueue, TxQueue};
pub use api::worker::{SocketId, Worker, WorkerHandle, WorkerId};
