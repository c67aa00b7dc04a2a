//! Per-direction streaming engine: shared state, submitter and completion path.
//!
//! Every direction owns one [`DirectionEngine`]. Its [`StreamState`] sits
//! behind a single mutex, so pool counters, indices, the enabled flag and the
//! sticky fault always change together. Two condition variables hang off that
//! mutex: `ready` wakes a blocked reader or writer, `drained` wakes a disable
//! or flush waiting for outstanding transfers.
//!
//! Only one thread at a time claims and submits buffers (`submit_lock`). A
//! thread that finds the lock taken leaves a request in `resubmit_requested`
//! that the holder picks up before letting go. This keeps the submission
//! order equal to the claim order and lets the completion path run without
//! ever blocking on another submitter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::buffer::TransferBuffer;
use crate::config::StreamConfig;
use crate::error::{Error, Fault, Result};
use crate::pool::BufferPool;
use crate::transport::{RadioControl, Transport, TransferStatus};
use crate::Direction;

/// Lifecycle of one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Disabled,
    Enabling,
    Enabled,
    Disabling,
}

/// Transfer counters for the current streaming session of one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Transfers that completed successfully
    pub transfers_completed: u64,
    /// Bytes moved by successful transfers
    pub bytes_transferred: u64,
    /// Transfers that completed with an error
    pub transfers_failed: u64,
    /// Transfers completed as cancelled
    pub transfers_cancelled: u64,
    /// RX completions that left the hardware with nothing queued because
    /// every slot held unread data
    pub overruns: u64,
    /// TX completions that left the hardware with nothing queued because the
    /// writer had not armed any data
    pub underruns: u64,
}

/// Mutable state of one direction, guarded by the direction lock
pub(crate) struct StreamState {
    pub(crate) pool: BufferPool,
    pub(crate) lifecycle: Lifecycle,
    /// Completions resubmit only while this is set
    pub(crate) enabled: bool,
    pub(crate) fault: Option<Fault>,
    /// A [`StreamChannel`](crate::StreamChannel) is bound to this direction
    pub(crate) bound: bool,
    pub(crate) stats: StreamStats,
    /// Buffers still holding data when the last disable reset the pool
    pub(crate) discarded: usize,
}

impl StreamState {
    fn raise(&mut self, fault: Fault) -> bool {
        if self.fault.is_some() {
            return false;
        }
        self.fault = Some(fault);
        true
    }
}

/// Device-wide state shared by both directions
pub(crate) struct DeviceLink {
    removed: AtomicBool,
    engines: OnceLock<[Weak<DirectionEngine>; 2]>,
}

impl DeviceLink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            removed: AtomicBool::new(false),
            engines: OnceLock::new(),
        })
    }

    pub(crate) fn attach(&self, rx: &Arc<DirectionEngine>, tx: &Arc<DirectionEngine>) {
        let _ = self.engines.set([Arc::downgrade(rx), Arc::downgrade(tx)]);
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Fault both directions and cancel their transfers. Only the first call
    /// has any effect.
    pub(crate) fn mark_removed(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!("bladeRF device removed, faulting both streams");
        for engine in self.engines.get().into_iter().flatten() {
            if let Some(engine) = engine.upgrade() {
                engine.raise(Fault::Disconnected);
                engine.transport.cancel_all(engine.direction);
            }
        }
    }
}

/// Shared core of one direction
pub(crate) struct DirectionEngine {
    pub(crate) direction: Direction,
    pub(crate) config: StreamConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) radio: Arc<dyn RadioControl>,
    pub(crate) link: Arc<DeviceLink>,
    pub(crate) state: Mutex<StreamState>,
    pub(crate) ready: Condvar,
    pub(crate) drained: Condvar,
    /// Serializes enable and disable
    pub(crate) control: Mutex<()>,
    pub(crate) submit_lock: Mutex<()>,
    resubmit_requested: AtomicBool,
}

impl DirectionEngine {
    pub(crate) fn new(
        direction: Direction,
        config: &StreamConfig,
        transport: Arc<dyn Transport>,
        radio: Arc<dyn RadioControl>,
        link: Arc<DeviceLink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            direction,
            config: config.clone(),
            transport,
            radio,
            link,
            state: Mutex::new(StreamState {
                pool: BufferPool::new(direction, config),
                lifecycle: Lifecycle::Disabled,
                enabled: false,
                fault: None,
                bound: false,
                stats: StreamStats::default(),
                discarded: 0,
            }),
            ready: Condvar::new(),
            drained: Condvar::new(),
            control: Mutex::new(()),
            submit_lock: Mutex::new(()),
            resubmit_requested: AtomicBool::new(false),
        })
    }

    /// Fail fast with the sticky fault, or with `NotEnabled` outside `Enabled`.
    pub(crate) fn check_streaming(&self, state: &StreamState) -> Result<()> {
        if let Some(fault) = &state.fault {
            return Err(fault.to_error());
        }
        if self.link.is_removed() {
            return Err(Error::Disconnected);
        }
        if state.lifecycle != Lifecycle::Enabled {
            return Err(Error::NotEnabled(self.direction));
        }
        Ok(())
    }

    /// Record a fault and wake everybody waiting on this direction
    pub(crate) fn raise(&self, fault: Fault) {
        let mut state = self.state.lock();
        if state.raise(fault) {
            self.ready.notify_all();
            self.drained.notify_all();
        }
    }

    /// Keep up to `num_concurrent` transfers outstanding.
    ///
    /// Returns immediately if another thread is already submitting; that
    /// thread picks up the request before it leaves.
    pub(crate) fn try_submit_more(self: &Arc<Self>) {
        loop {
            self.resubmit_requested.store(true, Ordering::SeqCst);
            let Some(guard) = self.submit_lock.try_lock() else {
                return;
            };
            self.resubmit_requested.store(false, Ordering::SeqCst);
            self.submit_pending();
            drop(guard);

            if !self.resubmit_requested.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// Take `submit_lock`, waiting for the current holder if there is one.
    pub(crate) fn lock_submit(&self) -> MutexGuard<'_, ()> {
        let guard = self.submit_lock.lock();
        self.resubmit_requested.store(false, Ordering::SeqCst);
        guard
    }

    /// Release a lock taken with [`lock_submit`](Self::lock_submit) and serve
    /// any submission request left while it was held.
    pub(crate) fn unlock_submit(self: &Arc<Self>, guard: MutexGuard<'_, ()>) {
        drop(guard);
        if self.resubmit_requested.load(Ordering::SeqCst) {
            self.try_submit_more();
        }
    }

    /// Claim and submit slots until the pool or the ceiling says stop.
    /// Must be called with `submit_lock` held.
    pub(crate) fn submit_pending(self: &Arc<Self>) {
        loop {
            let buffer = {
                let mut state = self.state.lock();
                if !state.enabled || state.fault.is_some() {
                    return;
                }
                match state.pool.claim() {
                    Some(buffer) => buffer,
                    None => return,
                }
            };

            let id = buffer.id();
            let sink = CompletionSink {
                engine: Arc::clone(self),
            };
            trace!("submitting {}", id);

            if let Err(rejected) = self.transport.submit(buffer, sink) {
                warn!("transport rejected {}: {}", id, rejected.reason);
                let mut state = self.state.lock();
                state.pool.rollback(rejected.buffer);
                state.raise(Fault::Submission(rejected.reason));
                self.ready.notify_all();
                self.drained.notify_all();
                return;
            }
        }
    }

    fn on_complete(self: &Arc<Self>, mut buffer: TransferBuffer, status: TransferStatus) {
        let id = buffer.id();
        trace!("{} {}", id, status);

        let mut device_removed = false;
        let resubmit = {
            let mut state = self.state.lock();
            let mut faulted = false;

            match &status {
                TransferStatus::Completed(bytes) => {
                    let bytes = (*bytes).min(buffer.len());
                    if self.direction == Direction::Rx && bytes < buffer.len() {
                        buffer.as_mut_slice()[bytes..].fill(0);
                    }
                    state.stats.transfers_completed += 1;
                    state.stats.bytes_transferred += bytes as u64;
                }
                TransferStatus::Cancelled => {
                    state.stats.transfers_cancelled += 1;
                    if state.enabled {
                        faulted = state
                            .raise(Fault::Device(format!("{} cancelled while streaming", id)));
                    }
                }
                TransferStatus::NoDevice => {
                    state.stats.transfers_failed += 1;
                    faulted = state.raise(Fault::Disconnected);
                    device_removed = true;
                }
                TransferStatus::Failed(reason) => {
                    state.stats.transfers_failed += 1;
                    if state.enabled {
                        faulted = state.raise(Fault::Device(reason.clone()));
                    }
                }
            }

            let transferred = status.is_completed();
            state.pool.complete(buffer, transferred);

            let streaming = state.enabled && state.fault.is_none();
            if transferred && streaming && state.pool.inflight() == 0 && !state.pool.can_submit() {
                match self.direction {
                    Direction::Rx => state.stats.overruns += 1,
                    Direction::Tx => state.stats.underruns += 1,
                }
                debug!("{} stream starved: nothing left to submit", self.direction);
            }

            if faulted {
                warn!("{} stream faulted: {:?}", self.direction, state.fault);
                self.ready.notify_all();
            } else if transferred {
                self.ready.notify_one();
            }
            if state.pool.inflight() == 0 || state.pool.used() == 0 {
                self.drained.notify_all();
            }

            streaming
        };

        if device_removed {
            self.link.mark_removed();
        }
        if resubmit {
            self.try_submit_more();
        }
    }
}

/// Completion callback handed to the transport with every submitted buffer.
///
/// [`complete`](Self::complete) consumes the sink, so each transfer is
/// reported exactly once. It only takes the direction lock for bookkeeping
/// and never waits for another submitter.
pub struct CompletionSink {
    engine: Arc<DirectionEngine>,
}

impl CompletionSink {
    pub fn direction(&self) -> Direction {
        self.engine.direction
    }

    /// Hand `buffer` back to its pool with the outcome of the transfer
    pub fn complete(self, buffer: TransferBuffer, status: TransferStatus) {
        self.engine.on_complete(buffer, status);
    }
}

impl std::fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSink")
            .field("direction", &self.engine.direction)
            .finish()
    }
}
