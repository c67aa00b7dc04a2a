//! rusb backend for `bladerf-stream`.
//!
//! # Overview
//!
//! [`BladeRf`] opens the device, selects the RF link interface and sends the
//! vendor commands that arm and disarm the RX and TX paths. It implements
//! [`RadioControl`](bladerf_stream::RadioControl). [`BulkTransport`] carries
//! sample buffers over the bulk endpoints and implements
//! [`Transport`](bladerf_stream::Transport).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bladerf_stream::{Direction, StreamConfig, StreamController};
//! use bladerf_usb::{BladeRf, BulkConfig};
//!
//! let device = Arc::new(BladeRf::open_first()?);
//! let (major, minor) = device.version()?;
//! println!("Firmware: {}.{}", major, minor);
//!
//! let transport = Arc::new(device.transport(BulkConfig::default())?);
//! let controller = StreamController::new(StreamConfig::default(), transport, device)?;
//! let mut rx = controller.open(Direction::Rx)?;
//! controller.enable(Direction::Rx)?;
//!
//! let mut buf = vec![0u8; 4096];
//! rx.read(&mut buf, Duration::from_secs(1))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bulk;
pub mod device;
pub mod error;

pub use bulk::{BulkConfig, BulkTransport};
pub use device::BladeRf;
pub use error::{Error, Result};

// bladeRF device identifiers (USB VID/PID)
pub const BLADERF_VID: u16 = 0x1d50;
pub const BLADERF_PID: u16 = 0x6066;
/// Product ID of the FX3 bootloader
pub const BLADERF_BOOT_PID: u16 = 0x6080;

/// Bulk IN endpoint carrying RX samples
pub const ENDPOINT_RX: u8 = 0x81;
/// Bulk OUT endpoint carrying TX samples
pub const ENDPOINT_TX: u8 = 0x01;

/// Alternate setting of interface 0 exposing the RF link endpoints
pub const INTERFACE_RF_LINK: u8 = 1;
