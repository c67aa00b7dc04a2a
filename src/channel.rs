//! Blocking read/write handle bound to one stream direction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, MutexGuard};
use tracing::{debug, warn};

use crate::engine::{DirectionEngine, Lifecycle, StreamState};
use crate::error::{Error, Result};
use crate::Direction;

/// Timeout value that never expires
pub const INFINITE: Duration = Duration::MAX;

/// Handle giving blocking access to one direction of the stream.
///
/// Only one channel can be bound to a direction at a time; see
/// [`StreamController::open`](crate::StreamController::open). Dropping the
/// channel releases the binding and disables the direction if it is still
/// streaming.
pub struct StreamChannel {
    engine: Arc<DirectionEngine>,
}

/// Deadline for a wait of `timeout`; `None` waits forever
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Wait on `cond` until notified or the deadline passes.
/// Returns `true` if the deadline passed.
pub(crate) fn wait_until(
    cond: &Condvar,
    state: &mut MutexGuard<'_, StreamState>,
    deadline: Option<Instant>,
) -> bool {
    match deadline {
        Some(deadline) => cond.wait_until(state, deadline).timed_out(),
        None => {
            cond.wait(state);
            false
        }
    }
}

impl StreamChannel {
    pub(crate) fn bind(engine: Arc<DirectionEngine>) -> Result<Self> {
        {
            let mut state = engine.state.lock();
            if state.bound {
                return Err(Error::PermissionDenied(engine.direction));
            }
            state.bound = true;
        }
        debug!("{} channel opened", engine.direction);
        Ok(Self { engine })
    }

    pub fn direction(&self) -> Direction {
        self.engine.direction
    }

    /// Size in bytes of one transfer buffer
    pub fn buffer_size(&self) -> usize {
        self.engine.config.buffer_size
    }

    /// Read whole buffers of received samples into `buf`.
    ///
    /// Blocks until at least one buffer is available or `timeout` passes,
    /// then copies as many consecutive buffers as are ready without waiting
    /// again. A zero `timeout` polls; [`INFINITE`] never expires.
    ///
    /// # Returns
    ///
    /// - `Ok(n)`: `n` bytes copied, a multiple of the buffer size. `Ok(0)`
    ///   only for an empty `buf`.
    /// - `Err(Error::Timeout)`: no buffer arrived in time; nothing was consumed
    /// - `Err(Error::InvalidArgument)`: TX channel, or `buf.len()` is not a
    ///   multiple of the buffer size
    /// - `Err(Error::NotEnabled)`: the direction is not streaming
    /// - the recorded fault, if the stream has faulted
    pub fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let engine = &self.engine;
        if engine.direction != Direction::Rx {
            return Err(Error::invalid_argument("read on a TX channel"));
        }
        let blocks = engine.config.blocks_in(buf.len())?;
        let deadline = deadline_after(timeout);

        let mut state = engine.state.lock();
        engine.check_streaming(&state)?;
        if blocks == 0 {
            return Ok(0);
        }

        while !state.pool.has_readable() {
            let timed_out = wait_until(&engine.ready, &mut state, deadline);
            engine.check_streaming(&state)?;
            if timed_out && !state.pool.has_readable() {
                return Err(Error::Timeout);
            }
        }

        let mut copied = 0;
        for chunk in buf.chunks_exact_mut(engine.config.buffer_size) {
            if !state.pool.consume(chunk) {
                break;
            }
            copied += chunk.len();
        }
        drop(state);

        engine.try_submit_more();
        Ok(copied)
    }

    /// Queue whole buffers of samples from `buf` for transmission.
    ///
    /// Blocks until at least one slot is free or `timeout` passes, then arms
    /// as many consecutive slots as are free without waiting again. Armed
    /// buffers are sent in the order they were written.
    ///
    /// # Returns
    ///
    /// - `Ok(n)`: `n` bytes queued, a multiple of the buffer size
    /// - `Err(Error::Timeout)`: no slot freed up in time; nothing was queued
    /// - the same argument, lifecycle and fault errors as [`read`](Self::read)
    pub fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        let engine = &self.engine;
        if engine.direction != Direction::Tx {
            return Err(Error::invalid_argument("write on an RX channel"));
        }
        let blocks = engine.config.blocks_in(buf.len())?;
        let deadline = deadline_after(timeout);

        let mut state = engine.state.lock();
        engine.check_streaming(&state)?;
        if blocks == 0 {
            return Ok(0);
        }

        while !state.pool.has_writable() {
            let timed_out = wait_until(&engine.ready, &mut state, deadline);
            engine.check_streaming(&state)?;
            if timed_out && !state.pool.has_writable() {
                return Err(Error::Timeout);
            }
        }

        let mut written = 0;
        for chunk in buf.chunks_exact(engine.config.buffer_size) {
            if !state.pool.arm(chunk) {
                break;
            }
            written += chunk.len();
        }
        drop(state);

        engine.try_submit_more();
        Ok(written)
    }

    /// Write all of `buf`, waiting up to `timeout` for each chunk to fit.
    ///
    /// Unlike [`write`](Self::write), a timeout after part of `buf` has been
    /// queued still returns `Err(Error::Timeout)`; the queued part is sent.
    pub fn write_all(&mut self, mut buf: &[u8], timeout: Duration) -> Result<()> {
        while !buf.is_empty() {
            let written = self.write(buf, timeout)?;
            buf = &buf[written..];
        }
        Ok(())
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        let streaming = {
            let mut state = self.engine.state.lock();
            state.bound = false;
            state.lifecycle == Lifecycle::Enabled
        };
        debug!("{} channel closed", self.engine.direction);

        if streaming {
            if let Err(e) = self.engine.disable() {
                warn!("disabling {} stream on close failed: {}", self.engine.direction, e);
            }
        }
    }
}

impl std::fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannel")
            .field("direction", &self.engine.direction)
            .finish()
    }
}
