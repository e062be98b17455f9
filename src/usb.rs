use std::fmt;
use std::time::Duration;

use log::{debug, trace};
use rusb::{Context, Device, DeviceHandle, UsbContext};

use crate::transfer::{RequestCode, TransferError, Transport};
use crate::Error;

/// Emagic USB Vendor ID
pub const EMAGIC_VID: u16 = 0x086a;
/// emi 2|6 USB Product ID
pub const EMI26_PID: u16 = 0x0100;
/// emi 2|6 (revision B) USB Product ID
pub const EMI26B_PID: u16 = 0x0102;

/// Vendor request, host to device, addressed to the device
const REQUEST_TYPE_VENDOR_OUT: u8 = 0x40;

/// The default timeout for a single control transfer
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// An attached emi 2|6 that has not been opened yet
pub struct DeviceInfo {
    device: Device<Context>,
    product_id: u16,
}

impl DeviceInfo {
    pub fn bus_number(&self) -> u8 {
        self.device.bus_number()
    }

    pub fn address(&self) -> u8 {
        self.device.address()
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }
}

impl fmt::Debug for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceInfo")
            .field("bus", &self.bus_number())
            .field("address", &self.address())
            .field("product_id", &format!("{:#06x}", self.product_id))
            .finish()
    }
}

/// Returns true if `vendor_id` and `product_id` belong to an emi 2|6
pub fn is_emi26(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == EMAGIC_VID && (product_id == EMI26_PID || product_id == EMI26B_PID)
}

/// Returns every emi 2|6 attached to the system
pub fn list_devices(context: &Context) -> Result<Vec<DeviceInfo>, Error> {
    let mut found = Vec::new();

    for device in context.devices()?.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(err) => {
                trace!("Skipping device without a readable descriptor: {}", err);
                continue;
            }
        };

        if is_emi26(descriptor.vendor_id(), descriptor.product_id()) {
            found.push(DeviceInfo {
                device,
                product_id: descriptor.product_id(),
            });
        }
    }

    Ok(found)
}

/// An open emi 2|6 that firmware can be written to.
pub struct UsbDevice {
    handle: DeviceHandle<Context>,
    timeout: Duration,
}

impl fmt::Debug for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let device = self.handle.device();

        f.debug_struct("UsbDevice")
            .field("bus", &device.bus_number())
            .field("address", &device.address())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl UsbDevice {
    /// Opens the first emi 2|6 found on the system.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use emi26::UsbDevice;
    ///
    /// let context = rusb::Context::new()?;
    /// let device = UsbDevice::open_first(&context)?;
    ///
    /// # Ok::<(), emi26::Error>(())
    /// ```
    pub fn open_first(context: &Context) -> Result<UsbDevice, Error> {
        let info = list_devices(context)?
            .into_iter()
            .next()
            .ok_or(Error::DeviceNotFound)?;

        UsbDevice::open(&info)
    }

    /// Opens the given device
    pub fn open(info: &DeviceInfo) -> Result<UsbDevice, Error> {
        debug!(
            "Opening emi 2|6 at bus {} address {}",
            info.bus_number(),
            info.address()
        );

        let handle = info.device.open()?;

        Ok(UsbDevice {
            handle,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Sets the timeout used for every control transfer
    pub fn set_timeout(&mut self, timeout: Duration) {
        debug!("Setting timeout to {:?}", timeout);
        self.timeout = timeout;
    }
}

impl Transport for UsbDevice {
    fn write_control(
        &mut self,
        address: u16,
        data: &[u8],
        request: RequestCode,
    ) -> Result<usize, TransferError> {
        self.handle
            .write_control(
                REQUEST_TYPE_VENDOR_OUT,
                request.into(),
                address,
                0,
                data,
                self.timeout,
            )
            .map_err(|source| TransferError::Usb {
                address,
                length: data.len(),
                source,
            })
    }
}
