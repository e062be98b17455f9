//! Firmware loader for the Emagic emi 2|6 USB audio interface.
//!
//! The emi 2|6 is built around an EZ-USB AN2131 (an 8051 with a USB core) and an FPGA, and keeps
//! no firmware of its own. Every time it is plugged in, the host has to upload a loader, an FPGA
//! bitstream and the main firmware over vendor specific control transfers before the device is
//! usable.
//!
//! ```no_run
//! use emi26::{FirmwareImageSet, Uploader, UsbDevice};
//!
//! let images = FirmwareImageSet::load_from_dir("/lib/firmware/emi26")?;
//! let context = rusb::Context::new()?;
//! let mut device = UsbDevice::open_first(&context)?;
//!
//! Uploader::new(&mut device, &images).upload()?;
//!
//! # Ok::<(), emi26::Error>(())
//! ```

mod error;
pub mod firmware;
pub mod ihex;
pub mod transfer;
pub mod upload;
pub mod usb;

#[cfg(test)]
mod test_util;

pub use error::Error;

pub use firmware::{FirmwareImage, FirmwareImageSet, ImageRole};
pub use ihex::{BinaryRecord, RecordStream, ValidationError};
pub use transfer::{ChunkedWriter, RequestCode, TransferError, Transport};
pub use upload::{Phase, UploadConfig, UploadSession, Uploader, CPUCS_REG, MAX_INTERNAL_ADDRESS};
pub use usb::UsbDevice;

pub use rusb;
