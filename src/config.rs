//! Stream configuration
//!
//! Buffer size, pool capacity and the concurrency ceiling are deployment
//! constants of the bladeRF firmware rather than negotiated values. They are
//! exposed here so that a deployment (or a test) can pick other values.

use std::time::Duration;

use crate::error::{Error, Result};

/// Size of one transfer buffer in bytes (`DATA_BUF_SZ`).
pub const DATA_BUF_SZ: usize = 4096;

/// Number of transfer buffers per direction (`NUM_DATA_URB`).
pub const NUM_DATA_URB: usize = 1024;

/// Maximum number of transfers outstanding per direction (`NUM_CONCURRENT`).
pub const NUM_CONCURRENT: usize = 8;

/// Interval at which a disable that is still waiting for outstanding
/// completions logs a warning.
pub const DEFAULT_DRAIN_POLL: Duration = Duration::from_secs(1);

/// Streaming configuration shared by both directions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Size of one transfer buffer in bytes. Reads and writes must use a
    /// multiple of this size.
    pub buffer_size: usize,
    /// Pool capacity `N`
    pub num_buffers: usize,
    /// Concurrency ceiling `K`, must be smaller than `num_buffers`
    pub num_concurrent: usize,
    /// Warning interval while a disable waits for in-flight transfers
    pub drain_poll: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: DATA_BUF_SZ,
            num_buffers: NUM_DATA_URB,
            num_concurrent: NUM_CONCURRENT,
            drain_poll: DEFAULT_DRAIN_POLL,
        }
    }
}

impl StreamConfig {
    /// Create a configuration with explicit sizes
    ///
    /// # Arguments
    ///
    /// * `buffer_size` - Bytes per transfer buffer
    /// * `num_buffers` - Pool capacity per direction
    /// * `num_concurrent` - Maximum outstanding transfers per direction
    pub fn new(buffer_size: usize, num_buffers: usize, num_concurrent: usize) -> Self {
        Self {
            buffer_size,
            num_buffers,
            num_concurrent,
            ..Self::default()
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_num_buffers(mut self, num_buffers: usize) -> Self {
        self.num_buffers = num_buffers;
        self
    }

    pub fn with_num_concurrent(mut self, num_concurrent: usize) -> Self {
        self.num_concurrent = num_concurrent;
        self
    }

    pub fn with_drain_poll(mut self, drain_poll: Duration) -> Self {
        self.drain_poll = drain_poll;
        self
    }

    /// Check the sizes against the pool invariants
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the configuration can be used to build a pool
    /// - `Err(Error::Config)` describing the first violated constraint
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::config("buffer_size must be non-zero"));
        }
        if self.num_concurrent == 0 {
            return Err(Error::config("num_concurrent must be at least 1"));
        }
        if self.num_concurrent >= self.num_buffers {
            return Err(Error::config(format!(
                "num_concurrent ({}) must be smaller than num_buffers ({})",
                self.num_concurrent, self.num_buffers
            )));
        }
        if self.drain_poll.is_zero() {
            return Err(Error::config("drain_poll must be non-zero"));
        }
        Ok(())
    }

    /// Number of whole buffers in `len` bytes, or an error if `len` is not a
    /// multiple of the buffer size
    pub(crate) fn blocks_in(&self, len: usize) -> Result<usize> {
        if len % self.buffer_size != 0 {
            return Err(Error::invalid_argument(format!(
                "byte count {} is not a multiple of the {} byte buffer size",
                len, self.buffer_size
            )));
        }
        Ok(len / self.buffer_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_firmware_constants() {
        let config = StreamConfig::default();
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.num_buffers, 1024);
        assert_eq!(config.num_concurrent, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = StreamConfig::default()
            .with_buffer_size(512)
            .with_num_buffers(4)
            .with_num_concurrent(2);
        assert_eq!(config, StreamConfig::new(512, 4, 2));
    }

    #[test]
    fn test_validate_rejects_ceiling_at_capacity() {
        let err = StreamConfig::new(512, 4, 4).validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(StreamConfig::new(0, 4, 2).validate().is_err());
        assert!(StreamConfig::new(512, 4, 0).validate().is_err());
    }

    #[test]
    fn test_blocks_in() {
        let config = StreamConfig::new(512, 4, 2);
        assert_eq!(config.blocks_in(0).unwrap(), 0);
        assert_eq!(config.blocks_in(1024).unwrap(), 2);
        assert!(matches!(
            config.blocks_in(1000),
            Err(Error::InvalidArgument(_))
        ));
    }
}
