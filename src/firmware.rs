//! Firmware images for the emi 2|6
//!
//! Bringing the device up takes three images: a loader that runs on the 8051 and implements the
//! external memory and FPGA requests, the FPGA bitstream, and the main firmware.

use std::fmt;
use std::fs;
use std::path::Path;

use log::debug;

use crate::ihex::{BinaryRecord, RecordStream};
use crate::Error;

/// Files at or above this size are refused before they are read
pub const MAX_FILE_SIZE: u64 = 0x7fff_ffff;

/// The role an image plays in the upload sequence
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ImageRole {
    Loader,
    Bitstream,
    Firmware,
}

impl ImageRole {
    /// Returns the file name the image is stored under in a firmware directory
    pub fn file_name(self) -> &'static str {
        match self {
            ImageRole::Loader => "loader.fw",
            ImageRole::Bitstream => "bitstream.fw",
            ImageRole::Firmware => "firmware.fw",
        }
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// A validated firmware image.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    role: ImageRole,
    raw: Vec<u8>,
    records: RecordStream,
}

impl FirmwareImage {
    /// Validates `raw` as the image for `role`.
    pub fn new(role: ImageRole, raw: Vec<u8>) -> Result<FirmwareImage, Error> {
        let records =
            RecordStream::parse(&raw).map_err(|source| Error::InvalidImage { role, source })?;

        Ok(FirmwareImage { role, raw, records })
    }

    pub fn role(&self) -> ImageRole {
        self.role
    }

    /// Returns the image as it was read
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn records(&self) -> &RecordStream {
        &self.records
    }
}

/// The set of images needed to bring up the device.
#[derive(Debug, Clone)]
pub struct FirmwareImageSet {
    loader: FirmwareImage,
    bitstream: FirmwareImage,
    firmware: FirmwareImage,
}

impl FirmwareImageSet {
    /// Validates the three raw images and returns them as a set.
    pub fn from_buffers(
        loader: Vec<u8>,
        bitstream: Vec<u8>,
        firmware: Vec<u8>,
    ) -> Result<FirmwareImageSet, Error> {
        Ok(FirmwareImageSet {
            loader: FirmwareImage::new(ImageRole::Loader, loader)?,
            bitstream: FirmwareImage::new(ImageRole::Bitstream, bitstream)?,
            firmware: FirmwareImage::new(ImageRole::Firmware, firmware)?,
        })
    }

    /// Loads and validates `loader.fw`, `bitstream.fw` and `firmware.fw` from `dir`.
    ///
    /// Either all three images are loaded, or none are.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use emi26::FirmwareImageSet;
    ///
    /// let images = FirmwareImageSet::load_from_dir("/lib/firmware/emi26")?;
    ///
    /// # Ok::<(), emi26::Error>(())
    /// ```
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Result<FirmwareImageSet, Error> {
        let dir = dir.as_ref();

        let bitstream = load_image(dir, ImageRole::Bitstream)?;
        let firmware = load_image(dir, ImageRole::Firmware)?;
        let loader = load_image(dir, ImageRole::Loader)?;

        Ok(FirmwareImageSet {
            loader,
            bitstream,
            firmware,
        })
    }

    pub fn get(&self, role: ImageRole) -> &FirmwareImage {
        match role {
            ImageRole::Loader => &self.loader,
            ImageRole::Bitstream => &self.bitstream,
            ImageRole::Firmware => &self.firmware,
        }
    }

    pub fn loader(&self) -> &FirmwareImage {
        &self.loader
    }

    pub fn bitstream(&self) -> &FirmwareImage {
        &self.bitstream
    }

    pub fn firmware(&self) -> &FirmwareImage {
        &self.firmware
    }

    /// Splits the main firmware into the records that go to internal RAM and the ones that go to
    /// external memory, at the first record above `boundary`.
    ///
    /// The firmware has to be loaded through the loader first, so a firmware without any external
    /// records cannot be uploaded and is refused with `FirmwareImageInvalid`.
    pub fn split_firmware(
        &self,
        boundary: u32,
    ) -> Result<(&[BinaryRecord], &[BinaryRecord]), Error> {
        let (internal, external) = self.firmware.records.split_at_address(boundary);

        if external.is_empty() {
            return Err(Error::FirmwareImageInvalid { boundary });
        }

        Ok((internal, external))
    }
}

/// Reads and validates the image for `role` from `dir`
fn load_image(dir: &Path, role: ImageRole) -> Result<FirmwareImage, Error> {
    let path = dir.join(role.file_name());

    debug!("Loading firmware from {}", path.display());

    let raw = read_file(&path)?;

    FirmwareImage::new(role, raw)
}

fn read_file(path: &Path) -> Result<Vec<u8>, Error> {
    let metadata = fs::metadata(path).map_err(|source| Error::FileLoad {
        path: path.to_path_buf(),
        source,
    })?;

    if metadata.len() >= MAX_FILE_SIZE {
        return Err(Error::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
        });
    }

    fs::read(path).map_err(|source| Error::FileLoad {
        path: path.to_path_buf(),
        source,
    })
}
