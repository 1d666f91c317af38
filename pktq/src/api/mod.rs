//! The outward API surface: worker context, buffer pools, burst queues.

pub mod error;
pub mod mempool;
pub mod pktbuf;
pub mod port;
pub mod queue;
pub mod worker;

pub use error::{Error, ErrorCode, Result};
