use std::convert::TryFrom;

use log::trace;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::ihex::BinaryRecord;

/// The soft limit for how many bytes of coalesced records are sent in one control transfer
pub const CHUNK_SIZE: usize = 1024;

/// The largest data stage a single control transfer may carry
pub const MAX_TRANSFER_SIZE: usize = 4096;

/// Vendor specific request codes understood by the EZ-USB core and the emi 2|6 loader
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
pub enum RequestCode {
    /// Anchor upload/download to internal RAM, implemented by the EZ-USB core itself
    InternalLoad = 0xA0,
    /// Download to external memory, requires the loader firmware
    ExternalLoad = 0xA3,
    /// Emagic extension for loading the FPGA bitstream, requires the loader firmware
    FpgaLoad = 0xA5,
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Control transfer of {length} bytes to {address:#06x} failed: {source}")]
    Usb {
        address: u16,
        length: usize,
        #[source]
        source: rusb::Error,
    },
    #[error("Not all data was transferred to {address:#06x} - sent {written} of {expected} bytes")]
    ShortWrite {
        address: u16,
        written: usize,
        expected: usize,
    },
    #[error("Transfer of {0} bytes exceeds the control transfer limit of 4096 bytes")]
    Oversized(usize),
    #[error("Address {0:#x} does not fit in a control transfer")]
    AddressOutOfRange(u32),
}

/// A channel capable of writing to device memory with vendor control requests.
pub trait Transport {
    /// Writes `data` to `address` using the given `request` and returns the number of bytes the
    /// device accepted.
    ///
    /// Callers must keep `data` within `MAX_TRANSFER_SIZE` bytes.
    fn write_control(
        &mut self,
        address: u16,
        data: &[u8],
        request: RequestCode,
    ) -> Result<usize, TransferError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write_control(
        &mut self,
        address: u16,
        data: &[u8],
        request: RequestCode,
    ) -> Result<usize, TransferError> {
        (**self).write_control(address, data, request)
    }
}

/// Writes record streams to a transport, merging contiguous records into larger transfers.
pub struct ChunkedWriter<'t, T: ?Sized> {
    transport: &'t mut T,
    max_chunk: usize,
    buf: Vec<u8>,
}

impl<'t, T: Transport + ?Sized> ChunkedWriter<'t, T> {
    /// Creates a writer that coalesces at most `max_chunk` bytes per transfer
    pub fn new(transport: &'t mut T, max_chunk: usize) -> ChunkedWriter<'t, T> {
        ChunkedWriter {
            transport,
            max_chunk,
            buf: Vec::with_capacity(max_chunk),
        }
    }

    /// Writes every record in `records` with the given `request` and returns the number of
    /// payload bytes written.
    ///
    /// Consecutive records are merged into one transfer as long as they are contiguous in device
    /// memory and the merged size stays within the chunk size. A record that is larger than the
    /// chunk size on its own is sent as it is. Writing stops at the first failed transfer.
    pub fn write(
        &mut self,
        records: &[BinaryRecord],
        request: RequestCode,
    ) -> Result<usize, TransferError> {
        let mut written = 0;
        let mut index = 0;

        while index < records.len() {
            let first = &records[index];
            let end = self.coalesce(&records[index..]) + index;

            if end == index {
                self.write_single(first.address, &first.payload, request)?;
                written += first.payload.len();
                index += 1;
                continue;
            }

            self.buf.clear();
            for record in &records[index..end] {
                self.buf.extend_from_slice(&record.payload);
            }

            let buf = std::mem::take(&mut self.buf);
            let result = self.write_single(first.address, &buf, request);
            self.buf = buf;
            result?;

            written += self.buf.len();
            index = end;
        }

        Ok(written)
    }

    /// Returns how many records from the start of `records` fit into a single chunk.
    fn coalesce(&self, records: &[BinaryRecord]) -> usize {
        let start = match records.first() {
            Some(record) => record.address,
            None => return 0,
        };
        let mut size = 0usize;
        let mut count = 0;

        for record in records {
            if size + record.payload.len() > self.max_chunk {
                break;
            }

            if count > 0 && u64::from(start) + size as u64 != u64::from(record.address) {
                break;
            }

            size += record.payload.len();
            count += 1;
        }

        count
    }

    /// Writes `payload` to `address` in a single control transfer.
    pub fn write_single(
        &mut self,
        address: u32,
        payload: &[u8],
        request: RequestCode,
    ) -> Result<(), TransferError> {
        if payload.len() > MAX_TRANSFER_SIZE {
            return Err(TransferError::Oversized(payload.len()));
        }

        let address =
            u16::try_from(address).map_err(|_| TransferError::AddressOutOfRange(address))?;

        trace!(
            "Writing {} bytes to {:#06x} with request {:#04x}",
            payload.len(),
            address,
            u8::from(request)
        );

        let written = self.transport.write_control(address, payload, request)?;

        if written != payload.len() {
            return Err(TransferError::ShortWrite {
                address,
                written,
                expected: payload.len(),
            });
        }

        Ok(())
    }
}
