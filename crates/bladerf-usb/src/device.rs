//! Device discovery and vendor control commands.

use std::sync::Arc;
use std::time::Duration;

use bladerf_stream::{Direction, RadioControl};
use rusb::{Context, Device, DeviceHandle, UsbContext};

use crate::bulk::{BulkConfig, BulkTransport};
use crate::error::{Error, Result};
use crate::{BLADERF_BOOT_PID, BLADERF_PID, BLADERF_VID, INTERFACE_RF_LINK};

/// Timeout for USB control transfers, from the firmware's BLADE_USB_TIMEOUT_MS.
const USB_TIMEOUT: Duration = Duration::from_millis(1000);

/// Attempts made for every vendor command before giving up.
const CONTROL_TRIES: usize = 3;

// REQUEST_TYPE_VENDOR | RECIPIENT_DEVICE
const BLADE_USB_TYPE_OUT: u8 = 0x40;
const BLADE_USB_TYPE_IN: u8 = 0xC0;

// bladeRF vendor command codes
const BLADE_USB_CMD_QUERY_VERSION: u8 = 0;
const BLADE_USB_CMD_QUERY_FPGA_STATUS: u8 = 1;
const BLADE_USB_CMD_RF_RX: u8 = 4;
const BLADE_USB_CMD_RF_TX: u8 = 5;

/// Open USB handle shared by the control side and the bulk transport.
///
/// The interface is released once the last user goes away.
pub(crate) struct UsbLink {
    pub(crate) handle: DeviceHandle<Context>,
}

impl Drop for UsbLink {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(0) {
            tracing::debug!("Failed to release USB interface: {}", e);
        }
        tracing::debug!("bladeRF device closed");
    }
}

/// bladeRF device handle.
pub struct BladeRf {
    link: Arc<UsbLink>,
}

impl BladeRf {
    /// Open the first available bladeRF.
    ///
    /// # Returns
    ///
    /// - `Ok(BladeRf)` if a device was found and opened
    /// - `Err(Error::DeviceNotFound)` if no bladeRF is connected
    pub fn open_first() -> Result<Self> {
        Self::open_by_index(0)
    }

    /// Open a specific bladeRF by index, counting in [`list_devices`](Self::list_devices) order.
    pub fn open_by_index(index: usize) -> Result<Self> {
        let context = Context::new()?;
        let device = scan(&context)?
            .into_iter()
            .nth(index)
            .ok_or(Error::DeviceNotFound)?;
        Self::open_device(&device)
    }

    /// Bus location of every bladeRF ready to stream, in index order.
    pub fn list_devices() -> Result<Vec<String>> {
        let context = Context::new()?;
        Ok(scan(&context)?.iter().map(describe).collect())
    }

    /// Open a device handle.
    ///
    /// 1. Open the USB device
    /// 2. Detach kernel driver (Linux only)
    /// 3. Set configuration to 1
    /// 4. Claim interface 0 and select the RF link alternate setting
    fn open_device(device: &Device<Context>) -> Result<Self> {
        let handle = device.open()?;

        #[cfg(target_os = "linux")]
        {
            if handle.kernel_driver_active(0).unwrap_or(false) {
                tracing::debug!("Detaching kernel driver from interface 0");
                if let Err(e) = handle.detach_kernel_driver(0) {
                    tracing::warn!("Failed to detach kernel driver: {}", e);
                }
            }
        }

        if let Err(e) = handle.set_active_configuration(1) {
            tracing::debug!("Failed to set configuration (may already be set): {}", e);
        }

        handle.claim_interface(0)?;
        let link = Arc::new(UsbLink { handle });
        link.handle.set_alternate_setting(0, INTERFACE_RF_LINK)?;

        tracing::info!("opened bladeRF at {}", describe(device));
        Ok(BladeRf { link })
    }

    /// Firmware version as `(major, minor)`.
    pub fn version(&self) -> Result<(u16, u16)> {
        let mut buffer = [0u8; 4];
        let n = self.vendor_in(BLADE_USB_CMD_QUERY_VERSION, &mut buffer)?;
        if n < buffer.len() {
            return Err(Error::InvalidResponse(format!(
                "Version response incomplete: got {} bytes, expected 4",
                n
            )));
        }
        let major = u16::from_le_bytes([buffer[0], buffer[1]]);
        let minor = u16::from_le_bytes([buffer[2], buffer[3]]);
        Ok((major, minor))
    }

    /// True once the FPGA has been configured. Streaming needs a loaded FPGA.
    pub fn fpga_loaded(&self) -> Result<bool> {
        Ok(self.vendor_in_word(BLADE_USB_CMD_QUERY_FPGA_STATUS)? != 0)
    }

    /// Arm (`true`) or disarm (`false`) the RF path of `direction`.
    pub fn set_rf_enabled(&self, direction: Direction, enabled: bool) -> Result<()> {
        let request = match direction {
            Direction::Rx => BLADE_USB_CMD_RF_RX,
            Direction::Tx => BLADE_USB_CMD_RF_TX,
        };
        tracing::debug!(
            "{} RF {}",
            direction,
            if enabled { "enable" } else { "disable" }
        );
        self.vendor_out_word(request, enabled as u32)
    }

    /// Bulk transport sharing this device handle.
    pub fn transport(&self, config: BulkConfig) -> Result<BulkTransport> {
        BulkTransport::new(Arc::clone(&self.link), config)
    }

    /// Vendor control IN transfer, retried on failure.
    fn vendor_in(&self, request: u8, buf: &mut [u8]) -> Result<usize> {
        retry(request, || {
            self.link
                .handle
                .read_control(BLADE_USB_TYPE_IN, request, 0, 0, buf, USB_TIMEOUT)
        })
    }

    fn vendor_in_word(&self, request: u8) -> Result<u32> {
        let mut buffer = [0u8; 4];
        let n = self.vendor_in(request, &mut buffer)?;
        if n < buffer.len() {
            return Err(Error::InvalidResponse(format!(
                "Command {} returned {} bytes, expected 4",
                request, n
            )));
        }
        Ok(u32::from_le_bytes(buffer))
    }

    /// Vendor control OUT transfer carrying one little-endian word, retried
    /// on failure.
    fn vendor_out_word(&self, request: u8, value: u32) -> Result<()> {
        let data = value.to_le_bytes();
        let n = retry(request, || {
            self.link
                .handle
                .write_control(BLADE_USB_TYPE_OUT, request, 0, 0, &data, USB_TIMEOUT)
        })?;
        if n != data.len() {
            return Err(Error::ControlTransferFailed(format!(
                "Command {} sent {} of {} bytes",
                request,
                n,
                data.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoardMode {
    Firmware,
    Bootloader,
}

fn board_mode(vendor_id: u16, product_id: u16) -> Option<BoardMode> {
    match (vendor_id, product_id) {
        (BLADERF_VID, BLADERF_PID) => Some(BoardMode::Firmware),
        (BLADERF_VID, BLADERF_BOOT_PID) => Some(BoardMode::Bootloader),
        _ => None,
    }
}

/// bladeRFs running their firmware. Boards sitting in the FX3 bootloader
/// cannot stream and are only reported.
fn scan(context: &Context) -> Result<Vec<Device<Context>>> {
    let mut found = Vec::new();
    for device in context.devices()?.iter() {
        let desc = device.device_descriptor()?;
        match board_mode(desc.vendor_id(), desc.product_id()) {
            Some(BoardMode::Firmware) => found.push(device),
            Some(BoardMode::Bootloader) => tracing::warn!(
                "bladeRF at {} is in bootloader mode, load its firmware first",
                describe(&device)
            ),
            None => {}
        }
    }
    Ok(found)
}

fn describe(device: &Device<Context>) -> String {
    format!("Bus {:03} Device {:03}", device.bus_number(), device.address())
}

/// Run a control transfer up to [`CONTROL_TRIES`] times. A vanished device is
/// not retried.
fn retry<F>(request: u8, mut transfer: F) -> Result<usize>
where
    F: FnMut() -> rusb::Result<usize>,
{
    let mut tries_left = CONTROL_TRIES;
    loop {
        match transfer() {
            Ok(n) => return Ok(n),
            Err(rusb::Error::NoDevice) => return Err(Error::Usb(rusb::Error::NoDevice)),
            Err(e) => {
                tries_left -= 1;
                tracing::warn!(
                    "Control transfer failed: req={}, error={}, {} tries left",
                    request,
                    e,
                    tries_left
                );
                if tries_left == 0 {
                    return Err(Error::ControlTransferFailed(e.to_string()));
                }
            }
        }
    }
}

impl RadioControl for BladeRf {
    fn start_direction(&self, direction: Direction) -> bladerf_stream::Result<()> {
        self.set_rf_enabled(direction, true)?;
        Ok(())
    }

    fn stop_direction(&self, direction: Direction) -> bladerf_stream::Result<()> {
        self.set_rf_enabled(direction, false)?;
        Ok(())
    }
}
