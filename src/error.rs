//! Error handling for the bladerf-stream library
//!
//! This module provides a unified error type for every streaming operation:
//! lifecycle control, blocking reads and writes, and faults reported by the
//! transport on the completion path.

use thiserror::Error;

use crate::Direction;

/// A specialized Result type for bladerf-stream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by a [`RadioControl`](crate::RadioControl) implementation
pub type ControlError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for bladerf-stream operations
#[derive(Debug, Error)]
pub enum Error {
    /// The wait bound expired before any buffer became available.
    /// Nothing was consumed or queued; the call may be retried.
    #[error("Timed out waiting for a transfer buffer")]
    Timeout,

    /// Byte count is not a multiple of the buffer size, or the operation does
    /// not apply to the channel's direction
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Read or write attempted while the direction is disabled
    #[error("{0} stream is not enabled")]
    NotEnabled(Direction),

    /// Enable requested on a direction that is already streaming
    #[error("{0} stream is already enabled")]
    AlreadyEnabled(Direction),

    /// Another channel is already bound to this direction
    #[error("{0} stream is bound to another channel")]
    PermissionDenied(Direction),

    /// Unrecoverable transfer error reported on the completion path
    #[error("Device fault: {0}")]
    DeviceFault(String),

    /// The transport rejected a submission
    #[error("Transfer submission failed: {0}")]
    SubmissionFailed(String),

    /// The device was removed
    #[error("Device disconnected")]
    Disconnected,

    /// The RF start/stop command failed
    #[error("Radio control command failed: {0}")]
    Control(#[source] ControlError),

    /// Invalid stream configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an invalid-argument error with a custom message
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Wrap an error raised by a radio control implementation
    pub fn control<E>(err: E) -> Self
    where
        E: Into<ControlError>,
    {
        Error::Control(err.into())
    }

    /// True when the call may simply be retried
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// True when the direction must be disabled and re-enabled before it can
    /// stream again
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DeviceFault(_) | Error::SubmissionFailed(_) | Error::Disconnected
        )
    }
}

/// Sticky per-direction fault recorded by the completion path or the submitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// A transfer completed with an unrecoverable error
    Device(String),
    /// The transport refused a submission
    Submission(String),
    /// The device went away
    Disconnected,
}

impl Fault {
    pub(crate) fn to_error(&self) -> Error {
        match self {
            Fault::Device(msg) => Error::DeviceFault(msg.clone()),
            Fault::Submission(msg) => Error::SubmissionFailed(msg.clone()),
            Fault::Disconnected => Error::Disconnected,
        }
    }
}
