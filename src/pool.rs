//! Fixed-capacity ring of transfer buffers for one direction.
//!
//! The pool is an arena of `N` slots addressed by two indices that advance
//! modulo `N`. The producer index points at the next slot to fill (RX: the
//! next slot handed to the transport, TX: the next slot armed with caller
//! data) and the consumer index at the next slot to drain (RX: the next slot
//! handed to the reader, TX: the next slot handed to the transport).
//!
//! Counters:
//! - `inflight`: slots in [`SlotState::Submitted`], never above the ceiling `K`
//! - `used`: slots not in [`SlotState::Free`]
//! - `filled`: slots in [`SlotState::Filled`], always `used - inflight`
//!
//! The pool does no locking of its own; every method is called with the
//! direction lock held.

use crate::buffer::{SlotState, TransferBuffer, TransferId};
use crate::config::StreamConfig;
use crate::Direction;

/// Snapshot of the pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub capacity: usize,
    pub free: usize,
    pub used: usize,
    pub inflight: usize,
    pub filled: usize,
    pub producer_idx: usize,
    pub consumer_idx: usize,
}

impl PoolStatus {
    /// True when every slot is free and nothing is outstanding
    pub fn is_idle(&self) -> bool {
        self.used == 0 && self.inflight == 0 && self.filled == 0
    }
}

struct Slot {
    state: SlotState,
    /// `None` exactly while the slot is submitted
    data: Option<Box<[u8]>>,
}

/// Ring of transfer buffers for one direction
pub struct BufferPool {
    direction: Direction,
    ceiling: usize,
    slots: Vec<Slot>,
    producer_idx: usize,
    consumer_idx: usize,
    used: usize,
    inflight: usize,
    filled: usize,
    epoch: u64,
}

impl BufferPool {
    /// Allocate `config.num_buffers` zeroed buffers of `config.buffer_size` bytes
    pub fn new(direction: Direction, config: &StreamConfig) -> Self {
        let slots = (0..config.num_buffers)
            .map(|_| Slot {
                state: SlotState::Free,
                data: Some(vec![0u8; config.buffer_size].into_boxed_slice()),
            })
            .collect();

        Self {
            direction,
            ceiling: config.num_concurrent,
            slots,
            producer_idx: 0,
            consumer_idx: 0,
            used: 0,
            inflight: 0,
            filled: 0,
            epoch: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn inflight(&self) -> usize {
        self.inflight
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            capacity: self.capacity(),
            free: self.capacity() - self.used,
            used: self.used,
            inflight: self.inflight,
            filled: self.filled,
            producer_idx: self.producer_idx,
            consumer_idx: self.consumer_idx,
        }
    }

    /// Return every slot to `Free`, zero the counters and start a new epoch.
    ///
    /// # Panics
    ///
    /// Panics if any slot is still owned by the transport.
    pub fn reset(&mut self) {
        assert_eq!(
            self.inflight, 0,
            "BUG: {} pool reset with {} transfers in flight",
            self.direction, self.inflight
        );
        for (index, slot) in self.slots.iter_mut().enumerate() {
            assert!(
                slot.data.is_some(),
                "BUG: {} slot {} reset while its buffer is outside the pool",
                self.direction,
                index
            );
            slot.state = SlotState::Free;
        }
        self.producer_idx = 0;
        self.consumer_idx = 0;
        self.used = 0;
        self.inflight = 0;
        self.filled = 0;
        self.epoch = self.epoch.wrapping_add(1);
    }

    pub fn slot_state(&self, index: usize) -> SlotState {
        self.slots[index].state
    }

    /// Bytes of a slot owned by the application.
    ///
    /// # Panics
    ///
    /// Panics if the slot is owned by the transport.
    pub fn slot_data(&self, index: usize) -> &[u8] {
        let slot = &self.slots[index];
        match (&slot.data, slot.state) {
            (Some(data), state) if !state.is_submitted() => &data[..],
            (_, state) => panic!(
                "BUG: cannot access {} slot {} not owned by the application (state: {:?})",
                self.direction, index, state
            ),
        }
    }

    /// Mutable bytes of a slot owned by the application.
    ///
    /// # Panics
    ///
    /// Panics if the slot is owned by the transport.
    pub fn slot_data_mut(&mut self, index: usize) -> &mut [u8] {
        let direction = self.direction;
        let slot = &mut self.slots[index];
        match (&mut slot.data, slot.state) {
            (Some(data), state) if !state.is_submitted() => &mut data[..],
            (_, state) => panic!(
                "BUG: cannot access {} slot {} not owned by the application (state: {:?})",
                direction, index, state
            ),
        }
    }

    /// Index of the slot the submitter would claim next
    fn submit_idx(&self) -> usize {
        match self.direction {
            Direction::Rx => self.producer_idx,
            Direction::Tx => self.consumer_idx,
        }
    }

    /// True if another transfer may be handed to the transport
    pub fn can_submit(&self) -> bool {
        if self.inflight >= self.ceiling {
            return false;
        }
        let state = self.slots[self.submit_idx()].state;
        match self.direction {
            Direction::Rx => state.is_free(),
            Direction::Tx => state.is_filled(),
        }
    }

    /// True if the RX slot at the consumer index holds received data
    pub fn has_readable(&self) -> bool {
        self.direction == Direction::Rx && self.slots[self.consumer_idx].state.is_filled()
    }

    /// True if the TX slot at the producer index can take caller data
    pub fn has_writable(&self) -> bool {
        self.direction == Direction::Tx && self.slots[self.producer_idx].state.is_free()
    }

    /// Claim the next submittable slot and move its bytes out for the transport.
    ///
    /// Returns `None` at the concurrency ceiling or when no slot is ready
    /// (RX: no free slot, TX: nothing armed). Neither is an error.
    pub fn claim(&mut self) -> Option<TransferBuffer> {
        if !self.can_submit() {
            return None;
        }
        let index = self.submit_idx();
        let slot = &mut self.slots[index];
        let data = slot.data.take()?;
        slot.state = SlotState::Submitted;

        match self.direction {
            Direction::Rx => {
                self.producer_idx = self.next(self.producer_idx);
                self.used += 1;
            }
            Direction::Tx => {
                self.consumer_idx = self.next(self.consumer_idx);
                self.filled -= 1;
            }
        }
        self.inflight += 1;
        self.debug_check();

        Some(TransferBuffer::new(self.id(index), data))
    }

    /// Undo the most recent [`claim`](Self::claim) after the transport refused
    /// the buffer. Claims must be rolled back newest first.
    pub fn rollback(&mut self, buffer: TransferBuffer) {
        let (id, data) = buffer.into_parts();
        self.check_id(id);
        let expected = match self.direction {
            Direction::Rx => self.prev(self.producer_idx),
            Direction::Tx => self.prev(self.consumer_idx),
        };
        assert_eq!(
            id.slot, expected,
            "BUG: {} rollback of slot {} out of claim order",
            self.direction, id.slot
        );

        let slot = &mut self.slots[id.slot];
        assert!(slot.state.is_submitted(), "BUG: rollback of an unclaimed slot");
        slot.data = Some(data);
        match self.direction {
            Direction::Rx => {
                slot.state = SlotState::Free;
                self.producer_idx = expected;
                self.used -= 1;
            }
            Direction::Tx => {
                slot.state = SlotState::Filled;
                self.consumer_idx = expected;
                self.filled += 1;
            }
        }
        self.inflight -= 1;
        self.debug_check();
    }

    /// Take back a buffer from the transport.
    ///
    /// With `transferred` set, an RX slot becomes `Filled` and a TX slot
    /// `Free`. Otherwise (cancelled or failed) the slot becomes `Free` and its
    /// contents are discarded.
    pub fn complete(&mut self, buffer: TransferBuffer, transferred: bool) {
        let (id, data) = buffer.into_parts();
        self.check_id(id);

        let slot = &mut self.slots[id.slot];
        assert!(
            slot.state.is_submitted(),
            "BUG: completion for {} which is not submitted (state: {:?})",
            id,
            slot.state
        );
        slot.data = Some(data);
        self.inflight -= 1;

        if transferred && self.direction == Direction::Rx {
            slot.state = SlotState::Filled;
            self.filled += 1;
        } else {
            slot.state = SlotState::Free;
            self.used -= 1;
        }
        self.debug_check();
    }

    /// Copy the oldest received buffer into `out` and free its slot.
    ///
    /// Returns `false` if the slot at the consumer index has not been filled.
    pub fn consume(&mut self, out: &mut [u8]) -> bool {
        if !self.has_readable() {
            return false;
        }
        let index = self.consumer_idx;
        out.copy_from_slice(self.slot_data(index));

        self.slots[index].state = SlotState::Free;
        self.consumer_idx = self.next(index);
        self.filled -= 1;
        self.used -= 1;
        self.debug_check();
        true
    }

    /// Copy caller data into the next free TX slot and queue it for submission.
    ///
    /// Returns `false` if the slot at the producer index is not free.
    pub fn arm(&mut self, src: &[u8]) -> bool {
        if !self.has_writable() {
            return false;
        }
        let index = self.producer_idx;
        self.slot_data_mut(index).copy_from_slice(src);

        self.slots[index].state = SlotState::Filled;
        self.producer_idx = self.next(index);
        self.used += 1;
        self.filled += 1;
        self.debug_check();
        true
    }

    fn id(&self, slot: usize) -> TransferId {
        TransferId {
            direction: self.direction,
            slot,
            epoch: self.epoch,
        }
    }

    fn check_id(&self, id: TransferId) {
        assert!(
            id.direction == self.direction && id.epoch == self.epoch && id.slot < self.capacity(),
            "BUG: {} returned to the {} pool at epoch {}",
            id,
            self.direction,
            self.epoch
        );
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }

    fn prev(&self, index: usize) -> usize {
        (index + self.capacity() - 1) % self.capacity()
    }

    fn debug_check(&self) {
        debug_assert!(self.inflight <= self.ceiling);
        debug_assert!(self.used <= self.capacity());
        debug_assert_eq!(self.used - self.inflight, self.filled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    fn pool(direction: Direction) -> BufferPool {
        BufferPool::new(direction, &StreamConfig::new(8, 4, 2))
    }

    fn assert_conserved(pool: &BufferPool) {
        let status = pool.status();
        assert_eq!(status.free + status.inflight + status.filled, status.capacity);
        assert!(status.inflight <= pool.ceiling());
        let submitted = (0..pool.capacity())
            .filter(|&i| pool.slot_state(i).is_submitted())
            .count();
        let filled = (0..pool.capacity())
            .filter(|&i| pool.slot_state(i).is_filled())
            .count();
        assert_eq!(submitted, status.inflight);
        assert_eq!(filled, status.filled);
    }

    #[test]
    fn test_rx_claim_stops_at_ceiling() {
        let mut pool = pool(Direction::Rx);
        let a = pool.claim().unwrap();
        let b = pool.claim().unwrap();
        assert!(pool.claim().is_none());
        assert_eq!(a.id().slot(), 0);
        assert_eq!(b.id().slot(), 1);

        let status = pool.status();
        assert_eq!((status.inflight, status.used, status.filled), (2, 2, 0));
        assert_conserved(&pool);
    }

    #[test]
    fn test_rx_cycle() {
        let mut pool = pool(Direction::Rx);
        let mut a = pool.claim().unwrap();
        a.as_mut_slice().copy_from_slice(&[1u8; 8]);
        pool.complete(a, true);
        assert_eq!(pool.filled(), 1);
        assert_eq!(pool.inflight(), 0);

        let mut out = [0u8; 8];
        assert!(pool.consume(&mut out));
        assert_eq!(out, [1u8; 8]);
        assert!(pool.status().is_idle());
        assert!(!pool.consume(&mut out));
    }

    #[test]
    fn test_rx_out_of_order_completion_is_not_readable() {
        let mut pool = pool(Direction::Rx);
        let first = pool.claim().unwrap();
        let second = pool.claim().unwrap();
        pool.complete(second, true);

        let mut out = [0u8; 8];
        assert_eq!(pool.filled(), 1);
        assert!(!pool.has_readable());
        assert!(!pool.consume(&mut out));

        pool.complete(first, true);
        assert!(pool.consume(&mut out));
        assert!(pool.consume(&mut out));
    }

    #[test]
    fn test_tx_cycle() {
        let mut pool = pool(Direction::Tx);
        assert!(pool.claim().is_none());
        assert!(pool.arm(&[7u8; 8]));
        assert_eq!(pool.filled(), 1);

        let buffer = pool.claim().unwrap();
        assert_eq!(buffer.as_slice(), &[7u8; 8]);
        assert_eq!(pool.filled(), 0);
        assert_eq!(pool.inflight(), 1);
        pool.complete(buffer, true);
        assert!(pool.status().is_idle());
    }

    #[test]
    fn test_tx_full_pool_rejects_arm() {
        let mut pool = pool(Direction::Tx);
        for _ in 0..4 {
            assert!(pool.arm(&[0u8; 8]));
        }
        assert!(!pool.has_writable());
        assert!(!pool.arm(&[0u8; 8]));
        assert_eq!(pool.used(), 4);
    }

    #[test]
    fn test_rollback_restores_counters() {
        let mut rx = pool(Direction::Rx);
        let a = rx.claim().unwrap();
        let b = rx.claim().unwrap();
        rx.rollback(b);
        rx.rollback(a);
        assert!(rx.status().is_idle());
        assert_eq!(rx.status().producer_idx, 0);

        let mut tx = pool(Direction::Tx);
        tx.arm(&[1u8; 8]);
        let c = tx.claim().unwrap();
        tx.rollback(c);
        assert_eq!(tx.filled(), 1);
        assert_eq!(tx.inflight(), 0);
        assert_eq!(tx.slot_state(0), SlotState::Filled);
    }

    #[test]
    fn test_failed_completion_frees_slot() {
        let mut pool = pool(Direction::Rx);
        let a = pool.claim().unwrap();
        pool.complete(a, false);
        assert!(pool.status().is_idle());
    }

    #[test]
    fn test_reset_starts_new_epoch() {
        let mut pool = pool(Direction::Rx);
        let a = pool.claim().unwrap();
        pool.complete(a, true);
        pool.reset();
        assert!(pool.status().is_idle());
        assert_eq!(pool.epoch(), 1);
        assert_eq!(pool.claim().unwrap().id().epoch(), 1);
    }

    #[test]
    #[should_panic(expected = "in flight")]
    fn test_reset_with_inflight_panics() {
        let mut pool = pool(Direction::Rx);
        let _a = pool.claim().unwrap();
        pool.reset();
    }

    #[test]
    #[should_panic(expected = "not owned by the application")]
    fn test_submitted_slot_data_is_inaccessible() {
        let mut pool = pool(Direction::Rx);
        let _a = pool.claim().unwrap();
        pool.slot_data_mut(0)[0] = 1;
    }

    #[test]
    #[should_panic(expected = "epoch")]
    fn test_stale_completion_panics() {
        let mut pool = pool(Direction::Rx);
        let stale = TransferBuffer::new(pool.id(0), vec![0u8; 8].into_boxed_slice());
        let _a = pool.claim().unwrap();
        pool.epoch += 1;
        pool.complete(stale, true);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Submit,
        Complete { ok: bool },
        Drain,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Submit),
            any::<bool>().prop_map(|ok| Op::Complete { ok }),
            Just(Op::Drain),
        ]
    }

    fn run(direction: Direction, ops: &[Op]) {
        let mut pool = BufferPool::new(direction, &StreamConfig::new(4, 6, 3));
        let mut outstanding = VecDeque::new();
        let mut scratch = [0u8; 4];

        for op in ops {
            match op {
                Op::Submit => {
                    if let Some(buffer) = pool.claim() {
                        outstanding.push_back(buffer);
                    }
                }
                Op::Complete { ok } => {
                    if let Some(buffer) = outstanding.pop_front() {
                        pool.complete(buffer, *ok);
                    }
                }
                Op::Drain => match direction {
                    Direction::Rx => {
                        pool.consume(&mut scratch);
                    }
                    Direction::Tx => {
                        pool.arm(&scratch);
                    }
                },
            }
            assert_conserved(&pool);
            assert_eq!(outstanding.len(), pool.inflight());
        }
    }

    proptest! {
        #[test]
        fn prop_rx_counters_conserved(ops in proptest::collection::vec(op(), 0..200)) {
            run(Direction::Rx, &ops);
        }

        #[test]
        fn prop_tx_counters_conserved(ops in proptest::collection::vec(op(), 0..200)) {
            run(Direction::Tx, &ops);
        }
    }
}
