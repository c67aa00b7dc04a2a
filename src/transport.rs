//! Collaborator contracts consumed by the streaming core.
//!
//! The core never talks to USB directly. It needs a [`Transport`] that moves
//! one buffer at a time asynchronously, and a [`RadioControl`] that arms and
//! disarms the RF path for a direction.

use std::fmt;

use crate::buffer::TransferBuffer;
use crate::engine::CompletionSink;
use crate::error::Result;
use crate::Direction;

/// Outcome of one transfer, delivered through [`CompletionSink::complete`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// The transfer finished; carries the number of bytes moved
    Completed(usize),
    /// The transfer was cancelled by [`Transport::cancel_all`]
    Cancelled,
    /// The device went away
    NoDevice,
    /// Any other unrecoverable transfer error
    Failed(String),
}

impl TransferStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferStatus::Completed(_))
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Completed(bytes) => write!(f, "completed ({} bytes)", bytes),
            TransferStatus::Cancelled => write!(f, "cancelled"),
            TransferStatus::NoDevice => write!(f, "no device"),
            TransferStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// A submission refused by the transport.
///
/// The buffer is handed back so that its slot can be rolled back to the
/// state it had before it was claimed.
#[derive(Debug)]
pub struct SubmitRejected {
    pub buffer: TransferBuffer,
    pub reason: String,
}

impl SubmitRejected {
    pub fn new<S: Into<String>>(buffer: TransferBuffer, reason: S) -> Self {
        Self {
            buffer,
            reason: reason.into(),
        }
    }
}

/// Asynchronous bulk transfer primitive.
///
/// Implementations must call [`CompletionSink::complete`] exactly once for
/// every accepted buffer, including buffers cancelled by [`cancel_all`](Self::cancel_all).
/// The completion may run on any thread, including the thread calling
/// `submit`. Transfers for one direction must be carried out in submission
/// order.
pub trait Transport: Send + Sync {
    /// Queue `buffer` for transfer in `buffer.direction()`.
    fn submit(
        &self,
        buffer: TransferBuffer,
        sink: CompletionSink,
    ) -> std::result::Result<(), SubmitRejected>;

    /// Request cancellation of every outstanding transfer for `direction`.
    ///
    /// Returns without waiting; cancelled transfers still complete through
    /// their sink with [`TransferStatus::Cancelled`].
    fn cancel_all(&self, direction: Direction);
}

/// RF front-end control for one device
pub trait RadioControl: Send + Sync {
    /// Arm the RF path for `direction`. Called once per enable.
    fn start_direction(&self, direction: Direction) -> Result<()>;

    /// Disarm the RF path for `direction`. Must be safe to call after a
    /// failed or partial start.
    fn stop_direction(&self, direction: Direction) -> Result<()>;
}
