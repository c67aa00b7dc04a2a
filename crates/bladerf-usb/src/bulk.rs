//! Bulk sample transport over the RF link endpoints.
//!
//! rusb only exposes synchronous bulk transfers, so each direction gets a
//! worker thread that performs queued transfers one after the other. The
//! queue keeps transfers in submission order; the stream core bounds how many
//! are queued at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use bladerf_stream::{
    CompletionSink, Direction, SubmitRejected, TransferBuffer, TransferStatus, Transport,
};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::device::UsbLink;
use crate::error::Result;
use crate::{ENDPOINT_RX, ENDPOINT_TX};

/// Bulk transport settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkConfig {
    /// Timeout of a single bulk call. A transfer that times out is retried
    /// until it completes or is cancelled, so this bounds how long a cancel
    /// takes to be noticed.
    pub transfer_timeout: Duration,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            transfer_timeout: Duration::from_millis(100),
        }
    }
}

struct Job {
    buffer: TransferBuffer,
    sink: CompletionSink,
    generation: u64,
}

struct Worker {
    sender: Mutex<Option<Sender<Job>>>,
    /// Bumped by `cancel_all`; jobs queued under an older value complete as
    /// cancelled
    generation: Arc<AtomicU64>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn spawn(direction: Direction, link: Arc<UsbLink>, timeout: Duration) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<Job>();
        let generation = Arc::new(AtomicU64::new(0));
        let current = Arc::clone(&generation);

        let thread = std::thread::Builder::new()
            .name(format!("bladerf-{}", direction).to_lowercase())
            .spawn(move || run_transfers(direction, &link, receiver, &current, timeout))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            generation,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn stop(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.sender.lock().take();
        if let Some(thread) = self.thread.lock().take() {
            // The last reference can go away inside a completion
            if thread.thread().id() != std::thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

fn run_transfers(
    direction: Direction,
    link: &UsbLink,
    jobs: Receiver<Job>,
    generation: &AtomicU64,
    timeout: Duration,
) {
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
            let result = match direction {
                Direction::Rx => link
                    .handle
                    .read_bulk(ENDPOINT_RX, buffer.as_mut_slice(), timeout),
                Direction::Tx => link
                    .handle
                    .write_bulk(ENDPOINT_TX, buffer.as_slice(), timeout),
            };
            match result {
                Ok(n) => break TransferStatus::Completed(n),
                Err(rusb::Error::Timeout) => continue,
                Err(rusb::Error::NoDevice) => break TransferStatus::NoDevice,
                Err(e) => break TransferStatus::Failed(e.to_string()),
            }
        };
        if !status.is_completed() {
            tracing::debug!("{} {}", buffer.id(), status);
        }
        sink.complete(buffer, status);
    }
    tracing::debug!("{} transfer thread stopped", direction);
}

/// Bulk transport for one bladeRF
pub struct BulkTransport {
    rx: Worker,
    tx: Worker,
}

impl BulkTransport {
    pub(crate) fn new(link: Arc<UsbLink>, config: BulkConfig) -> Result<Self> {
        let rx = Worker::spawn(Direction::Rx, Arc::clone(&link), config.transfer_timeout)?;
        let tx = Worker::spawn(Direction::Tx, link, config.transfer_timeout)?;
        Ok(Self { rx, tx })
    }

    fn worker(&self, direction: Direction) -> &Worker {
        match direction {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }
}

impl Transport for BulkTransport {
    fn submit(
        &self,
        buffer: TransferBuffer,
        sink: CompletionSink,
    ) -> std::result::Result<(), SubmitRejected> {
        let worker = self.worker(buffer.direction());
        let job = Job {
            buffer,
            sink,
            generation: worker.generation.load(Ordering::Acquire),
        };
        let sender = worker.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender
                .send(job)
                .map_err(|e| SubmitRejected::new(e.into_inner().buffer, "transfer thread stopped")),
            None => Err(SubmitRejected::new(job.buffer, "transport shut down")),
        }
    }

    fn cancel_all(&self, direction: Direction) {
        tracing::debug!("cancelling {} transfers", direction);
        self.worker(direction)
            .generation
            .fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for BulkTransport {
    fn drop(&mut self) {
        self.rx.stop();
        self.tx.stop();
    }
}
