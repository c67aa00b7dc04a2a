//! In-process transport that feeds transmitted buffers back as received ones.
//!
//! Every TX transfer appends its bytes to a FIFO "wire"; every RX transfer
//! takes the oldest block off the wire. Each direction is served by its own
//! worker thread, so transfers complete in submission order and completions
//! arrive on a thread other than the caller's, as they would from USB.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::buffer::TransferBuffer;
use crate::engine::CompletionSink;
use crate::error::Result;
use crate::transport::{RadioControl, SubmitRejected, Transport, TransferStatus};
use crate::Direction;

/// How long an idle RX worker sleeps before looking at the cancel
/// generation again
const WIRE_POLL: Duration = Duration::from_millis(10);

struct Job {
    buffer: TransferBuffer,
    sink: CompletionSink,
    generation: u64,
}

#[derive(Default)]
struct Wire {
    blocks: Mutex<VecDeque<Box<[u8]>>>,
    available: Condvar,
}

struct Lane {
    sender: Mutex<Option<Sender<Job>>>,
    generation: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Lane {
    fn spawn(direction: Direction, wire: Arc<Wire>) -> Self {
        let (sender, receiver) = channel::unbounded::<Job>();
        let generation = Arc::new(AtomicU64::new(0));
        let current = Arc::clone(&generation);

        let worker = std::thread::spawn(move || match direction {
            Direction::Rx => rx_worker(receiver, &wire, &current),
            Direction::Tx => tx_worker(receiver, &wire, &current),
        });

        Self {
            sender: Mutex::new(Some(sender)),
            generation,
            worker: Mutex::new(Some(worker)),
        }
    }
}

fn rx_worker(jobs: Receiver<Job>, wire: &Wire, generation: &AtomicU64) {
    for Job {
        mut buffer,
        sink,
        generation: submitted,
    } in jobs
    {
        let status = loop {
            if generation.load(Ordering::Acquire) != submitted {
                break TransferStatus::Cancelled;
            }
            let mut blocks = wire.blocks.lock();
            if let Some(block) = blocks.pop_front() {
                let n = block.len().min(buffer.len());
                buffer.as_mut_slice()[..n].copy_from_slice(&block[..n]);
                break TransferStatus::Completed(n);
            }
            wire.available.wait_for(&mut blocks, WIRE_POLL);
        };
        trace!("loopback {} {}", buffer.id(), status);
        sink.complete(buffer, status);
    }
    debug!("loopback RX worker stopped");
}

fn tx_worker(jobs: Receiver<Job>, wire: &Wire, generation: &AtomicU64) {
    for Job {
        buffer,
        sink,
        generation: submitted,
    } in jobs
    {
        let status = if generation.load(Ordering::Acquire) != submitted {
            TransferStatus::Cancelled
        } else {
            wire.blocks.lock().push_back(buffer.as_slice().into());
            wire.available.notify_all();
            TransferStatus::Completed(buffer.len())
        };
        trace!("loopback {} {}", buffer.id(), status);
        sink.complete(buffer, status);
    }
    debug!("loopback TX worker stopped");
}

/// Loopback transport and radio.
///
/// Implements both [`Transport`] and [`RadioControl`], so a single instance
/// can drive a [`StreamController`](crate::StreamController) without any
/// hardware.
pub struct LoopbackTransport {
    wire: Arc<Wire>,
    rx: Lane,
    tx: Lane,
    armed: [AtomicBool; 2],
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let wire = Arc::new(Wire::default());
        Self {
            rx: Lane::spawn(Direction::Rx, Arc::clone(&wire)),
            tx: Lane::spawn(Direction::Tx, Arc::clone(&wire)),
            wire,
            armed: [AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    fn lane(&self, direction: Direction) -> &Lane {
        match direction {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }

    fn armed(&self, direction: Direction) -> &AtomicBool {
        match direction {
            Direction::Rx => &self.armed[0],
            Direction::Tx => &self.armed[1],
        }
    }

    /// Queue raw bytes on the wire as if they had been transmitted
    pub fn inject(&self, block: &[u8]) {
        self.wire.blocks.lock().push_back(block.into());
        self.wire.available.notify_all();
    }

    /// Number of transmitted blocks not yet picked up by an RX transfer
    pub fn pending(&self) -> usize {
        self.wire.blocks.lock().len()
    }

    /// Drop every block waiting on the wire
    pub fn clear(&self) {
        self.wire.blocks.lock().clear();
    }

    /// True between `start_direction` and `stop_direction`
    pub fn is_armed(&self, direction: Direction) -> bool {
        self.armed(direction).load(Ordering::Acquire)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn submit(
        &self,
        buffer: TransferBuffer,
        sink: CompletionSink,
    ) -> std::result::Result<(), SubmitRejected> {
        let lane = self.lane(buffer.direction());
        let job = Job {
            buffer,
            sink,
            generation: lane.generation.load(Ordering::Acquire),
        };
        let sender = lane.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender
                .send(job)
                .map_err(|e| SubmitRejected::new(e.into_inner().buffer, "loopback worker stopped")),
            None => Err(SubmitRejected::new(job.buffer, "loopback transport shut down")),
        }
    }

    fn cancel_all(&self, direction: Direction) {
        self.lane(direction).generation.fetch_add(1, Ordering::AcqRel);
        self.wire.available.notify_all();
    }
}

impl RadioControl for LoopbackTransport {
    fn start_direction(&self, direction: Direction) -> Result<()> {
        debug!("loopback {} armed", direction);
        self.armed(direction).store(true, Ordering::Release);
        Ok(())
    }

    fn stop_direction(&self, direction: Direction) -> Result<()> {
        debug!("loopback {} disarmed", direction);
        self.armed(direction).store(false, Ordering::Release);
        Ok(())
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        for lane in [&self.rx, &self.tx] {
            lane.generation.fetch_add(1, Ordering::AcqRel);
            lane.sender.lock().take();
        }
        self.wire.available.notify_all();
        for lane in [&self.rx, &self.tx] {
            if let Some(worker) = lane.worker.lock().take() {
                // The last reference can go away inside a completion
                if worker.thread().id() != std::thread::current().id() {
                    let _ = worker.join();
                }
            }
        }
    }
}
