//! Test doubles for the streaming core

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bladerf_stream::{
    CompletionSink, Direction, Error, RadioControl, Result, SubmitRejected, TransferBuffer,
    TransferId, TransferStatus, Transport,
};
use parking_lot::Mutex;

/// Route library logs to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<(TransferBuffer, CompletionSink)>,
    /// Every accepted submission with the first byte of its payload
    log: Vec<(TransferId, u8)>,
}

/// Transport that holds every submitted buffer until the test completes it
pub struct ManualTransport {
    rx: Mutex<Queue>,
    tx: Mutex<Queue>,
    /// Number of further submissions to accept; `None` accepts everything
    accept_limit: Mutex<Option<usize>>,
    auto_cancel: AtomicBool,
}

impl ManualTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rx: Mutex::new(Queue::default()),
            tx: Mutex::new(Queue::default()),
            accept_limit: Mutex::new(None),
            auto_cancel: AtomicBool::new(true),
        })
    }

    fn queue(&self, direction: Direction) -> &Mutex<Queue> {
        match direction {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }

    /// Accept `n` more submissions, then reject
    pub fn reject_after(&self, n: usize) {
        *self.accept_limit.lock() = Some(n);
    }

    pub fn accept_all(&self) {
        *self.accept_limit.lock() = None;
    }

    /// With auto-cancel off, `cancel_all` leaves transfers pending and the
    /// test has to complete them
    pub fn set_auto_cancel(&self, enabled: bool) {
        self.auto_cancel.store(enabled, Ordering::SeqCst);
    }

    pub fn inflight(&self, direction: Direction) -> usize {
        self.queue(direction).lock().pending.len()
    }

    /// Slot indices of every accepted submission, in submission order
    pub fn submitted_slots(&self, direction: Direction) -> Vec<usize> {
        self.queue(direction)
            .lock()
            .log
            .iter()
            .map(|(id, _)| id.slot())
            .collect()
    }

    /// First payload byte of every accepted submission, in submission order
    pub fn submitted_payloads(&self, direction: Direction) -> Vec<u8> {
        self.queue(direction)
            .lock()
            .log
            .iter()
            .map(|(_, byte)| *byte)
            .collect()
    }

    pub fn submitted_ids(&self, direction: Direction) -> Vec<TransferId> {
        self.queue(direction)
            .lock()
            .log
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    /// Complete the oldest pending transfer of `direction` at position `index`
    pub fn complete_at(
        &self,
        direction: Direction,
        index: usize,
        status: TransferStatus,
    ) -> Option<TransferId> {
        let (buffer, sink) = self.queue(direction).lock().pending.remove(index)?;
        let id = buffer.id();
        sink.complete(buffer, status);
        Some(id)
    }

    pub fn complete_next(&self, direction: Direction, status: TransferStatus) -> Option<TransferId> {
        self.complete_at(direction, 0, status)
    }

    /// Fill the oldest pending RX buffer with `fill` and complete it in full
    pub fn receive(&self, fill: u8) -> Option<TransferId> {
        let (mut buffer, sink) = self.rx.lock().pending.pop_front()?;
        buffer.as_mut_slice().fill(fill);
        let id = buffer.id();
        let len = buffer.len();
        sink.complete(buffer, TransferStatus::Completed(len));
        Some(id)
    }

    /// Fill the oldest pending RX buffer with `fill` but report only `len`
    /// bytes received
    pub fn receive_short(&self, fill: u8, len: usize) -> Option<TransferId> {
        let (mut buffer, sink) = self.rx.lock().pending.pop_front()?;
        buffer.as_mut_slice().fill(fill);
        let id = buffer.id();
        sink.complete(buffer, TransferStatus::Completed(len));
        Some(id)
    }

    /// Complete the oldest pending TX buffer as sent
    pub fn send(&self) -> Option<TransferId> {
        let (buffer, sink) = self.tx.lock().pending.pop_front()?;
        let id = buffer.id();
        let len = buffer.len();
        sink.complete(buffer, TransferStatus::Completed(len));
        Some(id)
    }

    /// Complete every pending transfer of `direction` with `status`
    pub fn complete_all(&self, direction: Direction, status: TransferStatus) -> usize {
        let drained: Vec<_> = self.queue(direction).lock().pending.drain(..).collect();
        let count = drained.len();
        for (buffer, sink) in drained {
            sink.complete(buffer, status.clone());
        }
        count
    }
}

impl Transport for ManualTransport {
    fn submit(
        &self,
        buffer: TransferBuffer,
        sink: CompletionSink,
    ) -> std::result::Result<(), SubmitRejected> {
        {
            let mut limit = self.accept_limit.lock();
            match limit.as_mut() {
                Some(0) => return Err(SubmitRejected::new(buffer, "endpoint busy")),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        let mut queue = self.queue(buffer.direction()).lock();
        let first = buffer.as_slice().first().copied().unwrap_or(0);
        queue.log.push((buffer.id(), first));
        queue.pending.push_back((buffer, sink));
        Ok(())
    }

    fn cancel_all(&self, direction: Direction) {
        if self.auto_cancel.load(Ordering::SeqCst) {
            self.complete_all(direction, TransferStatus::Cancelled);
        }
    }
}

/// Radio that records every start/stop call and can be told to fail
#[derive(Default)]
pub struct RecordingRadio {
    calls: Mutex<Vec<(Direction, bool)>>,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
}

impl RecordingRadio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// `(direction, started)` for every call, in call order
    pub fn calls(&self) -> Vec<(Direction, bool)> {
        self.calls.lock().clone()
    }
}

impl RadioControl for RecordingRadio {
    fn start_direction(&self, direction: Direction) -> Result<()> {
        self.calls.lock().push((direction, true));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::control(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "RF enable command stalled",
            )));
        }
        Ok(())
    }

    fn stop_direction(&self, direction: Direction) -> Result<()> {
        self.calls.lock().push((direction, false));
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::control(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "RF disable command stalled",
            )));
        }
        Ok(())
    }
}
