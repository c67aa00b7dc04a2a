//! Transfer buffers and their ownership state.
//!
//! # State Machine
//! ```text
//!  RX:  FREE ──submit──> SUBMITTED ──complete──> FILLED ──read──> FREE
//!  TX:  FREE ──write───> FILLED ──submit──> SUBMITTED ──complete──> FREE
//! ```
//!
//! While a slot is `Submitted` its bytes live inside a [`TransferBuffer`]
//! owned by the transport. The slot itself holds nothing, so application code
//! has no way to reach memory the hardware may still be using.

use std::fmt;

use crate::Direction;

/// Ownership state of one pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Owned by the application and holding no pending data
    Free,
    /// Owned by the transport
    Submitted,
    /// Owned by the application and holding data: received samples waiting
    /// for a reader (RX) or caller samples waiting for submission (TX)
    Filled,
}

impl SlotState {
    pub fn is_free(self) -> bool {
        self == SlotState::Free
    }

    pub fn is_submitted(self) -> bool {
        self == SlotState::Submitted
    }

    pub fn is_filled(self) -> bool {
        self == SlotState::Filled
    }
}

/// Opaque handle identifying the slot a transfer belongs to.
///
/// The epoch changes every time the direction is enabled, so a handle can
/// never be confused with a slot from an earlier streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId {
    pub(crate) direction: Direction,
    pub(crate) slot: usize,
    pub(crate) epoch: u64,
}

impl TransferId {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.direction, self.slot, self.epoch)
    }
}

/// The bytes of one slot while they are owned by the transport.
///
/// A `TransferBuffer` is moved into [`Transport::submit`](crate::Transport::submit)
/// and moved back through [`CompletionSink::complete`](crate::CompletionSink::complete).
/// For RX the transport writes received bytes into [`as_mut_slice`](Self::as_mut_slice);
/// for TX it sends [`as_slice`](Self::as_slice).
pub struct TransferBuffer {
    id: TransferId,
    data: Box<[u8]>,
}

impl TransferBuffer {
    pub(crate) fn new(id: TransferId, data: Box<[u8]>) -> Self {
        Self { id, data }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.id.direction
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn into_parts(self) -> (TransferId, Box<[u8]>) {
        (self.id, self.data)
    }
}

impl fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(slot: usize) -> TransferId {
        TransferId {
            direction: Direction::Rx,
            slot,
            epoch: 3,
        }
    }

    #[test]
    fn test_slot_state_predicates() {
        assert!(SlotState::Free.is_free());
        assert!(SlotState::Submitted.is_submitted());
        assert!(SlotState::Filled.is_filled());
        assert!(!SlotState::Filled.is_free());
    }

    #[test]
    fn test_transfer_buffer_access() {
        let mut buffer = TransferBuffer::new(id(7), vec![0u8; 16].into_boxed_slice());
        buffer.as_mut_slice()[0] = 0xAB;
        assert_eq!(buffer.len(), 16);
        assert_eq!(buffer.as_slice()[0], 0xAB);
        assert_eq!(buffer.id().slot(), 7);
        assert_eq!(buffer.direction(), Direction::Rx);

        let (id, data) = buffer.into_parts();
        assert_eq!(id.epoch(), 3);
        assert_eq!(data.len(), 16);
    }

    #[test]
    fn test_transfer_id_display() {
        assert_eq!(id(12).to_string(), "RX#12@3");
    }
}
