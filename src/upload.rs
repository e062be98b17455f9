//! The emi 2|6 firmware upload sequence
//!
//! The device enumerates with nothing but the EZ-USB core running, which only understands
//! internal RAM writes. The sequence below first puts a loader in place so that the FPGA and
//! external memory can be written, then replaces the loader with the main firmware:
//!
//! 1. Hold the 8051 in reset, load the loader into internal RAM and release reset
//! 2. Load the FPGA bitstream through the loader
//! 3. Reset and load the loader again
//! 4. Load the external memory part of the firmware through the loader
//! 5. Reset, load the internal RAM part of the firmware and release reset

use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::firmware::{FirmwareImageSet, ImageRole};
use crate::ihex::BinaryRecord;
use crate::transfer::{ChunkedWriter, RequestCode, Transport, CHUNK_SIZE};
use crate::Error;

/// The highest internal RAM address of the AN2131Q
pub const MAX_INTERNAL_ADDRESS: u32 = 0x1B3F;

/// EZ-USB control and status register. Bit 0 holds the 8051 in reset
pub const CPUCS_REG: u32 = 0x7F92;

/// How long to wait for the loader to start after releasing reset
pub const RESET_DELAY: Duration = Duration::from_millis(250);

/// Tunables for the upload sequence.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct UploadConfig {
    /// Time to block after releasing the 8051 from reset with the loader in place
    pub reset_delay: Duration,
    /// The coalescing limit for record writes
    pub chunk_size: usize,
    /// Records at or below this address are loaded into internal RAM
    pub internal_ram_max: u32,
}

impl Default for UploadConfig {
    fn default() -> UploadConfig {
        UploadConfig {
            reset_delay: RESET_DELAY,
            chunk_size: CHUNK_SIZE,
            internal_ram_max: MAX_INTERNAL_ADDRESS,
        }
    }
}

/// A step in the upload sequence
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Phase {
    Start,
    LoadLoader,
    ReleaseResetA,
    LoadBitstream,
    ResetB,
    ReloadLoader,
    SplitFirmware,
    LoadExternal,
    ResetC,
    LoadInternal,
    ReleaseResetB,
    Done,
}

impl Phase {
    /// Returns the phase that follows `self` when it completes, or `None` once done
    pub fn next(self) -> Option<Phase> {
        use Phase::*;

        match self {
            Start => Some(LoadLoader),
            LoadLoader => Some(ReleaseResetA),
            ReleaseResetA => Some(LoadBitstream),
            LoadBitstream => Some(ResetB),
            ResetB => Some(ReloadLoader),
            ReloadLoader => Some(SplitFirmware),
            SplitFirmware => Some(LoadExternal),
            LoadExternal => Some(ResetC),
            ResetC => Some(LoadInternal),
            LoadInternal => Some(ReleaseResetB),
            ReleaseResetB => Some(Done),
            Done => None,
        }
    }
}

/// The state of a single upload.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct UploadSession {
    phase: Option<Phase>,
    visited: Vec<Phase>,
    bytes_transferred: usize,
}

impl UploadSession {
    /// Returns the phase currently executing, or the last one if the upload is done
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Returns every phase that has been entered, in order
    pub fn visited(&self) -> &[Phase] {
        &self.visited
    }

    /// Returns the number of payload bytes written to the device, reset writes included
    pub fn bytes_transferred(&self) -> usize {
        self.bytes_transferred
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = Some(phase);
        self.visited.push(phase);
    }
}

/// Drives the upload sequence over a transport.
pub struct Uploader<'a, T: ?Sized> {
    transport: &'a mut T,
    images: &'a FirmwareImageSet,
    config: UploadConfig,
}

impl<'a, T: Transport + ?Sized> Uploader<'a, T> {
    pub fn new(transport: &'a mut T, images: &'a FirmwareImageSet) -> Uploader<'a, T> {
        Uploader::with_config(transport, images, UploadConfig::default())
    }

    pub fn with_config(
        transport: &'a mut T,
        images: &'a FirmwareImageSet,
        config: UploadConfig,
    ) -> Uploader<'a, T> {
        Uploader {
            transport,
            images,
            config,
        }
    }

    /// Runs the whole upload sequence, blocking until it completes.
    ///
    /// The first error aborts the upload and is returned as is. The device may be left in reset,
    /// and a retry has to start over from the beginning.
    pub fn upload(&mut self) -> Result<UploadSession, Error> {
        let mut session = UploadSession::default();
        let mut phase = Phase::Start;

        info!("Uploading firmwares");

        loop {
            session.enter(phase);
            debug!("Entering phase {:?}", phase);

            self.run_phase(phase, &mut session)?;

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        info!("Done");

        Ok(session)
    }

    fn run_phase(&mut self, phase: Phase, session: &mut UploadSession) -> Result<(), Error> {
        let images = self.images;
        let boundary = self.config.internal_ram_max;

        match phase {
            Phase::Start | Phase::ResetB | Phase::ResetC => self.set_reset(true, session),
            Phase::LoadLoader => {
                info!("Uploading {}", ImageRole::Loader);
                self.write(images.loader().records().records(), RequestCode::InternalLoad, session)
            }
            Phase::ReleaseResetA => {
                self.set_reset(false, session)?;
                self.settle();
                Ok(())
            }
            Phase::LoadBitstream => {
                info!("Uploading {}", ImageRole::Bitstream);
                self.write(images.bitstream().records().records(), RequestCode::FpgaLoad, session)
            }
            Phase::ReloadLoader => {
                info!("Re-uploading {}", ImageRole::Loader);
                self.write(images.loader().records().records(), RequestCode::InternalLoad, session)?;
                self.set_reset(false, session)?;
                self.settle();
                Ok(())
            }
            Phase::SplitFirmware => {
                let (internal, external) = images.split_firmware(boundary)?;

                debug!(
                    "Firmware has {} internal and {} external records",
                    internal.len(),
                    external.len()
                );

                Ok(())
            }
            Phase::LoadExternal => {
                info!("Uploading {} into external storage", ImageRole::Firmware);
                let (_, external) = images.split_firmware(boundary)?;
                self.write(external, RequestCode::ExternalLoad, session)
            }
            Phase::LoadInternal => {
                info!("Uploading {} into internal storage", ImageRole::Firmware);
                let (internal, _) = images.split_firmware(boundary)?;
                self.write(internal, RequestCode::InternalLoad, session)
            }
            Phase::ReleaseResetB => self.set_reset(false, session),
            Phase::Done => Ok(()),
        }
    }

    fn write(
        &mut self,
        records: &[BinaryRecord],
        request: RequestCode,
        session: &mut UploadSession,
    ) -> Result<(), Error> {
        let written = ChunkedWriter::new(&mut *self.transport, self.config.chunk_size)
            .write(records, request)?;

        session.bytes_transferred += written;

        Ok(())
    }

    /// Holds the 8051 in reset when `reset` is true, and releases it otherwise
    fn set_reset(&mut self, reset: bool, session: &mut UploadSession) -> Result<(), Error> {
        debug!("{} reset", if reset { "Asserting" } else { "Releasing" });

        ChunkedWriter::new(&mut *self.transport, self.config.chunk_size).write_single(
            CPUCS_REG,
            &[reset as u8],
            RequestCode::InternalLoad,
        )?;

        session.bytes_transferred += 1;

        Ok(())
    }

    /// Gives the loader time to start after it has been released from reset
    fn settle(&self) {
        thread::sleep(self.config.reset_delay);
    }
}
