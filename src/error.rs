use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::firmware::ImageRole;
use crate::ihex::ValidationError;
use crate::transfer::TransferError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The {role} image is not a valid binary record stream: {source}")]
    InvalidImage {
        role: ImageRole,
        #[source]
        source: ValidationError,
    },
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("The firmware image has no records above internal RAM address {boundary:#06x}")]
    FirmwareImageInvalid { boundary: u32 },
    #[error("Could not read firmware file {}: {source}", .path.display())]
    FileLoad {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Firmware file {} is too large ({size} bytes)", .path.display())]
    FileTooLarge { path: PathBuf, size: u64 },
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
    #[error("No emi 2|6 device found")]
    DeviceNotFound,
}
