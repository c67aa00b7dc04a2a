//! Error types for bladerf-usb operations.

use thiserror::Error;

/// Result type for bladerf-usb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a bladeRF.
#[derive(Debug, Error)]
pub enum Error {
    /// USB operation failed.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// No bladeRF device found.
    #[error("No bladeRF device found")]
    DeviceNotFound,

    /// Control transfer failed after every retry.
    #[error("Control transfer failed: {0}")]
    ControlTransferFailed(String),

    /// Invalid response from device.
    #[error("Invalid device response: {0}")]
    InvalidResponse(String),

    /// A transfer worker thread could not be started.
    #[error("Failed to start transfer thread: {0}")]
    Thread(#[from] std::io::Error),
}

impl From<Error> for bladerf_stream::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Usb(rusb::Error::NoDevice) => bladerf_stream::Error::Disconnected,
            other => bladerf_stream::Error::control(other),
        }
    }
}
