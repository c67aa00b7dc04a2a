//! Stream lifecycle: enable, disable, channel binding and device removal.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channel::{StreamChannel, deadline_after, wait_until};
use crate::config::StreamConfig;
use crate::engine::{DeviceLink, DirectionEngine, Lifecycle, StreamStats};
use crate::error::{Error, Fault, Result};
use crate::pool::PoolStatus;
use crate::transport::{RadioControl, Transport};
use crate::Direction;

impl DirectionEngine {
    /// Reset the pool, arm the RF path and prime up to `num_concurrent`
    /// transfers.
    pub(crate) fn enable(self: &Arc<Self>) -> Result<()> {
        let _control = self.control.lock();
        if self.link.is_removed() {
            return Err(Error::Disconnected);
        }
        {
            let mut state = self.state.lock();
            if state.lifecycle != Lifecycle::Disabled {
                return Err(Error::AlreadyEnabled(self.direction));
            }
            state.pool.reset();
            state.fault = None;
            state.stats = StreamStats::default();
            state.enabled = true;
            state.lifecycle = Lifecycle::Enabling;
        }
        info!("enabling {} stream", self.direction);

        if let Err(e) = self.radio.start_direction(self.direction) {
            warn!("failed to start {} stream: {}", self.direction, e);
            if let Err(stop_err) = self.radio.stop_direction(self.direction) {
                debug!("stop after failed start also failed: {}", stop_err);
            }
            let mut state = self.state.lock();
            state.enabled = false;
            state.lifecycle = Lifecycle::Disabled;
            return Err(e);
        }

        let submit = self.lock_submit();
        self.submit_pending();
        self.unlock_submit(submit);

        let fault = {
            let mut state = self.state.lock();
            if state.fault.is_none() {
                state.lifecycle = Lifecycle::Enabled;
                debug!(
                    "{} stream primed with {} transfers",
                    self.direction,
                    state.pool.inflight()
                );
            }
            state.fault.clone()
        };

        if let Some(fault) = fault {
            warn!("priming {} stream failed: {:?}", self.direction, fault);
            if let Err(e) = self.shutdown() {
                debug!("cleanup after failed priming: {}", e);
            }
            return Err(fault.to_error());
        }
        Ok(())
    }

    /// Stop resubmission, cancel and drain every outstanding transfer, then
    /// disarm the RF path. Disabling a disabled direction does nothing.
    pub(crate) fn disable(self: &Arc<Self>) -> Result<()> {
        let _control = self.control.lock();
        self.shutdown()
    }

    fn shutdown(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.lifecycle == Lifecycle::Disabled {
                return Ok(());
            }
            state.enabled = false;
            state.lifecycle = Lifecycle::Disabling;
            self.ready.notify_all();
        }
        info!("disabling {} stream", self.direction);

        // No new submission can start once this is held, so the cancel below
        // reaches every transfer the transport will ever see.
        let submit = self.lock_submit();
        self.transport.cancel_all(self.direction);
        self.unlock_submit(submit);

        let stats = {
            let mut state = self.state.lock();
            while state.pool.inflight() > 0 {
                let timed_out = self
                    .drained
                    .wait_for(&mut state, self.config.drain_poll)
                    .timed_out();
                if timed_out && state.pool.inflight() > 0 {
                    warn!(
                        "{} stream still waiting for {} cancelled transfers",
                        self.direction,
                        state.pool.inflight()
                    );
                }
            }
            state.stats
        };

        let stopped = if self.link.is_removed() {
            Ok(())
        } else {
            self.radio.stop_direction(self.direction)
        };
        if let Err(e) = &stopped {
            warn!("failed to stop {} stream: {}", self.direction, e);
        }

        {
            let mut state = self.state.lock();
            state.discarded = state.pool.used();
            if state.discarded > 0 {
                debug!(
                    "{} stream discarding {} unsent buffers",
                    self.direction, state.discarded
                );
            }
            state.pool.reset();
            state.lifecycle = Lifecycle::Disabled;
            self.ready.notify_all();
            self.drained.notify_all();
        }
        info!("{} stream disabled", self.direction);
        debug!("{} stream stats: {:?}", self.direction, stats);
        stopped
    }
}

/// Owner of both stream directions of one device.
///
/// The controller enables and disables directions and binds
/// [`StreamChannel`]s to them. It is `Sync`; lifecycle calls may come from
/// any thread.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use bladerf_stream::{Direction, LoopbackTransport, StreamConfig, StreamController};
///
/// let loopback = Arc::new(LoopbackTransport::new());
/// let config = StreamConfig::new(512, 8, 2);
/// let controller = StreamController::new(config, loopback.clone(), loopback)?;
///
/// let mut tx = controller.open(Direction::Tx)?;
/// let mut rx = controller.open(Direction::Rx)?;
/// controller.enable(Direction::Rx)?;
/// controller.enable(Direction::Tx)?;
///
/// tx.write(&[0x5a; 512], Duration::from_secs(1))?;
/// let mut buf = [0u8; 512];
/// let n = rx.read(&mut buf, Duration::from_secs(1))?;
/// assert_eq!(n, 512);
/// assert_eq!(buf, [0x5a; 512]);
/// # Ok::<(), bladerf_stream::Error>(())
/// ```
pub struct StreamController {
    config: StreamConfig,
    rx: Arc<DirectionEngine>,
    tx: Arc<DirectionEngine>,
    link: Arc<DeviceLink>,
}

impl StreamController {
    /// Create a controller with both directions disabled
    ///
    /// # Arguments
    ///
    /// * `config` - Buffer sizes and concurrency, validated here
    /// * `transport` - Bulk transfer primitive shared by both directions
    /// * `radio` - RF start/stop commands
    pub fn new(
        config: StreamConfig,
        transport: Arc<dyn Transport>,
        radio: Arc<dyn RadioControl>,
    ) -> Result<Self> {
        config.validate()?;
        let link = DeviceLink::new();
        let rx = DirectionEngine::new(
            Direction::Rx,
            &config,
            Arc::clone(&transport),
            Arc::clone(&radio),
            Arc::clone(&link),
        );
        let tx = DirectionEngine::new(Direction::Tx, &config, transport, radio, Arc::clone(&link));
        link.attach(&rx, &tx);

        debug!(
            "stream controller ready: {} x {} byte buffers, {} concurrent",
            config.num_buffers, config.buffer_size, config.num_concurrent
        );
        Ok(Self {
            config,
            rx,
            tx,
            link,
        })
    }

    fn engine(&self, direction: Direction) -> &Arc<DirectionEngine> {
        match direction {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Start streaming in `direction`.
    ///
    /// # Returns
    ///
    /// - `Ok(())` once the RF path is armed and the first transfers are queued
    /// - `Err(Error::AlreadyEnabled)` if the direction is already streaming
    /// - `Err(Error::Disconnected)` after the device was removed
    /// - the radio control error if the RF path could not be armed; the
    ///   direction is left disabled
    /// - `Err(Error::SubmissionFailed)` if priming failed; the direction is
    ///   left disabled
    pub fn enable(&self, direction: Direction) -> Result<()> {
        self.engine(direction).enable()
    }

    /// Stop streaming in `direction` and wait until every outstanding
    /// transfer has come back.
    ///
    /// Received data that was not read and transmit data that was not sent
    /// are discarded.
    pub fn disable(&self, direction: Direction) -> Result<()> {
        self.engine(direction).disable()
    }

    /// Bind a channel to `direction`
    ///
    /// # Returns
    ///
    /// - `Ok(channel)` if no other channel is bound to the direction
    /// - `Err(Error::PermissionDenied)` otherwise
    pub fn open(&self, direction: Direction) -> Result<StreamChannel> {
        StreamChannel::bind(Arc::clone(self.engine(direction)))
    }

    pub fn lifecycle(&self, direction: Direction) -> Lifecycle {
        self.engine(direction).state.lock().lifecycle
    }

    pub fn is_enabled(&self, direction: Direction) -> bool {
        self.lifecycle(direction) == Lifecycle::Enabled
    }

    /// Sticky fault of `direction`, cleared by the next enable
    pub fn fault(&self, direction: Direction) -> Option<Fault> {
        self.engine(direction).state.lock().fault.clone()
    }

    pub fn status(&self, direction: Direction) -> PoolStatus {
        self.engine(direction).state.lock().pool.status()
    }

    pub fn stats(&self, direction: Direction) -> StreamStats {
        self.engine(direction).state.lock().stats
    }

    /// Wait until every buffer written to the TX channel has been sent.
    ///
    /// # Returns
    ///
    /// - `Ok(())` once the TX pool is empty
    /// - `Err(Error::Timeout)` if data is still queued when `timeout` passes
    /// - `Err(Error::NotEnabled)` if TX stops streaming with data queued
    /// - the recorded fault, if TX faults
    pub fn flush_tx(&self, timeout: Duration) -> Result<()> {
        let engine = &self.tx;
        let deadline = deadline_after(timeout);
        let mut state = engine.state.lock();
        let epoch = state.pool.epoch();
        loop {
            if let Some(fault) = &state.fault {
                return Err(fault.to_error());
            }
            // A disable reset the pool while we waited
            if state.pool.epoch() != epoch {
                if state.pool.epoch() == epoch.wrapping_add(1) && state.discarded == 0 {
                    return Ok(());
                }
                return Err(Error::NotEnabled(Direction::Tx));
            }
            if state.pool.used() == 0 {
                return Ok(());
            }
            if state.lifecycle != Lifecycle::Enabled {
                return Err(Error::NotEnabled(Direction::Tx));
            }
            if wait_until(&engine.drained, &mut state, deadline)
                && state.pool.epoch() == epoch
                && state.pool.used() > 0
            {
                return Err(Error::Timeout);
            }
        }
    }

    /// Report that the device went away.
    ///
    /// Both directions fault with [`Error::Disconnected`], blocked readers
    /// and writers wake up, and outstanding transfers are cancelled. The
    /// directions must still be disabled to reclaim their buffers.
    pub fn device_removed(&self) {
        self.link.mark_removed();
    }

    pub fn is_removed(&self) -> bool {
        self.link.is_removed()
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        for direction in Direction::ALL {
            if let Err(e) = self.engine(direction).disable() {
                warn!("failed to disable {} stream on drop: {}", direction, e);
            }
        }
    }
}

impl std::fmt::Debug for StreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("config", &self.config)
            .field("rx", &self.lifecycle(Direction::Rx))
            .field("tx", &self.lifecycle(Direction::Tx))
            .finish()
    }
}
