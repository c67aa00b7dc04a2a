#![doc = include_str!("../readme.md")]

use std::fmt;

pub mod buffer;
pub mod channel;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod loopback;
pub mod pool;
pub mod reader;
pub mod transport;

pub use buffer::{SlotState, TransferBuffer, TransferId};
pub use channel::{INFINITE, StreamChannel};
pub use config::{DATA_BUF_SZ, NUM_CONCURRENT, NUM_DATA_URB, StreamConfig};
pub use controller::StreamController;
pub use engine::{CompletionSink, Lifecycle, StreamStats};
pub use error::{ControlError, Error, Fault, Result};
pub use loopback::LoopbackTransport;
pub use pool::{BufferPool, PoolStatus};
pub use reader::{AsyncRxReader, RxBlocks};
pub use transport::{RadioControl, SubmitRejected, TransferStatus, Transport};

/**
 * Stream direction
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Samples flowing from the device to the host
    Rx,
    /// Samples flowing from the host to the device
    Tx,
}

impl Direction {
    /// Both directions, RX first
    pub const ALL: [Direction; 2] = [Direction::Rx, Direction::Tx];
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => write!(f, "RX"),
            Direction::Tx => write!(f, "TX"),
        }
    }
}
