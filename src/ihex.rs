//! Binary Intel HEX records
//!
//! Firmware images for the emi 2|6 are stored as a flat sequence of binary records, each one
//! describing where a chunk of data belongs in device memory. This is the same layout the Linux
//! kernel `ihex2fw` tool produces:
//!
//! ```text
//! +--------------+-----------+-----------------+---------+
//! | address: u32 | len: u16  | data: [u8; len] | padding |
//! +--------------+-----------+-----------------+---------+
//! ```
//!
//! Both header fields are big endian. Each record is padded so that the next one starts on a
//! 4-byte boundary relative to the start of the current record, and the stream ends with a
//! record whose length is zero.

use std::convert::TryFrom;
use std::io::{self, Cursor, Write};
use std::slice;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

/// The size of the packed `address` and `len` header fields
pub const HEADER_LEN: usize = 6;

/// Record stream validation errors
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum ValidationError {
    #[error("Record header at offset {offset:#x} runs past the end of the image")]
    TruncatedHeader { offset: usize },
    #[error("Record at offset {offset:#x} has {length} bytes of data which runs past the end of the image")]
    PayloadOverrun { offset: usize, length: u16 },
    #[error("Terminator at offset {offset:#x} is followed by {remaining} bytes of trailing data")]
    TrailingData { offset: usize, remaining: usize },
    #[error("Image ended without a terminating record")]
    MissingTerminator,
}

/// A single record with its address and payload decoded to host order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BinaryRecord {
    /// The device address the payload should be written to
    pub address: u32,
    /// The record data
    pub payload: Vec<u8>,
}

impl BinaryRecord {
    pub fn new(address: u32, payload: Vec<u8>) -> BinaryRecord {
        BinaryRecord { address, payload }
    }

    /// Returns the length of the payload
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns the number of bytes from the start of a record with `length` bytes of data to the
    /// start of the next record.
    pub fn stride(length: u16) -> usize {
        (HEADER_LEN + length as usize + 3) & !3
    }

    /// Writes the record in its wire format, including the alignment padding.
    ///
    /// The payload must hold between 1 and 65535 bytes. An empty record would be read back as the
    /// terminator, and anything longer does not fit in the length field, so both are refused
    /// with `InvalidInput` before anything is written.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let length = match u16::try_from(self.payload.len()) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("record at {:#x} has no data", self.address),
                ))
            }
            Ok(length) => length,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "record at {:#x} has {} bytes of data, more than a record can hold",
                        self.address,
                        self.payload.len()
                    ),
                ))
            }
        };

        writer.write_u32::<BigEndian>(self.address)?;
        writer.write_u16::<BigEndian>(length)?;
        writer.write_all(&self.payload)?;

        let padding = Self::stride(length) - HEADER_LEN - length as usize;
        writer.write_all(&[0u8; 3][..padding])?;

        Ok(())
    }
}

/// An ordered, validated sequence of binary records.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RecordStream {
    records: Vec<BinaryRecord>,
}

impl RecordStream {
    /// Parses and validates `buf` as a terminated sequence of binary records.
    ///
    /// The whole buffer must be accounted for: every record must fit within it, and the
    /// terminating record must end exactly at the end of the buffer. Anything else is rejected
    /// as a whole.
    ///
    /// # Examples
    ///
    /// ```
    /// use emi26::ihex::RecordStream;
    ///
    /// let image = [
    ///     0x00, 0x00, 0x00, 0x10, 0x00, 0x02, 0xAA, 0xBB, // address 0x10, 2 bytes of data
    ///     0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // terminator
    /// ];
    /// let stream = RecordStream::parse(&image)?;
    ///
    /// assert_eq!(stream.len(), 1);
    /// assert_eq!(stream.records()[0].payload, [0xAA, 0xBB]);
    ///
    /// # Ok::<(), emi26::ihex::ValidationError>(())
    /// ```
    pub fn parse(buf: &[u8]) -> Result<RecordStream, ValidationError> {
        let mut records = Vec::new();
        let mut offset = 0;

        while offset < buf.len() {
            if buf.len() - offset < HEADER_LEN {
                return Err(ValidationError::TruncatedHeader { offset });
            }

            let mut cursor = Cursor::new(&buf[offset..offset + HEADER_LEN]);
            let (address, length) = match (
                cursor.read_u32::<BigEndian>(),
                cursor.read_u16::<BigEndian>(),
            ) {
                (Ok(address), Ok(length)) => (address, length),
                _ => return Err(ValidationError::TruncatedHeader { offset }),
            };

            if length == 0 {
                let end = offset + HEADER_LEN;

                if end != buf.len() {
                    return Err(ValidationError::TrailingData {
                        offset,
                        remaining: buf.len() - end,
                    });
                }

                return Ok(RecordStream { records });
            }

            let data_start = offset + HEADER_LEN;
            let data_end = data_start + length as usize;

            if data_end > buf.len() {
                return Err(ValidationError::PayloadOverrun { offset, length });
            }

            records.push(BinaryRecord::new(address, buf[data_start..data_end].to_vec()));
            offset += BinaryRecord::stride(length);
        }

        Err(ValidationError::MissingTerminator)
    }

    /// Returns the records in stream order
    pub fn records(&self) -> &[BinaryRecord] {
        &self.records
    }

    pub fn iter(&self) -> slice::Iter<'_, BinaryRecord> {
        self.records.iter()
    }

    /// Returns the number of records, not counting the terminator
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the total number of payload bytes across all records
    pub fn payload_len(&self) -> usize {
        self.records.iter().map(|record| record.payload.len()).sum()
    }

    /// Splits the records in two at the first record whose address is above `boundary`.
    ///
    /// The first slice holds every record before that point, the second everything from it
    /// onward. Order is preserved in both, and records after the split point are not
    /// reconsidered even if they fall back below the boundary.
    pub fn split_at_address(&self, boundary: u32) -> (&[BinaryRecord], &[BinaryRecord]) {
        let index = self
            .records
            .iter()
            .position(|record| record.address > boundary)
            .unwrap_or(self.records.len());

        self.records.split_at(index)
    }

    /// Writes the stream in its wire format, followed by the terminating record.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for record in &self.records {
            record.write_to(writer)?;
        }

        writer.write_all(&[0u8; HEADER_LEN])
    }
}

impl From<Vec<BinaryRecord>> for RecordStream {
    fn from(records: Vec<BinaryRecord>) -> RecordStream {
        RecordStream { records }
    }
}

impl<'a> IntoIterator for &'a RecordStream {
    type Item = &'a BinaryRecord;
    type IntoIter = slice::Iter<'a, BinaryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use assert_hex::assert_eq_hex;
    use hex_literal::hex;

    use super::*;

    #[test]
    fn it_should_parse_records() {
        let image = hex!("00 00 00 00 00 03 01 02 03 00 00 00 00 00 7F 92 00 01 01 00 00 00 20 00 00 04 DE AD BE EF 00 00 00 00 00 00 00 00");
        let stream = RecordStream::parse(&image).unwrap();

        assert_eq!(stream.len(), 3);
        assert_eq!(stream.payload_len(), 8);

        let records = stream.records();
        assert_eq_hex!(records[0].address, 0x0000);
        assert_eq!(records[0].payload, [0x01, 0x02, 0x03]);
        assert_eq_hex!(records[1].address, 0x7F92);
        assert_eq!(records[1].len(), 1);
        assert_eq!(records[1].payload, [0x01]);
        assert_eq_hex!(records[2].address, 0x2000);
        assert_eq!(records[2].payload, hex!("DE AD BE EF"));
    }

    #[test]
    fn it_should_restart_iteration_from_the_first_record() {
        let image = hex!("00 00 01 00 00 02 AA BB 00 00 01 02 00 02 CC DD 00 00 00 00 00 00");
        let stream = RecordStream::parse(&image).unwrap();

        let first: Vec<u32> = stream.iter().map(|r| r.address).collect();
        let second: Vec<u32> = stream.iter().map(|r| r.address).collect();

        assert_eq!(first, vec![0x100, 0x102]);
        assert_eq!(first, second);
    }

    #[test]
    fn it_should_accept_an_empty_stream() {
        let stream = RecordStream::parse(&hex!("00 00 00 00 00 00")).unwrap();

        assert!(stream.is_empty());
    }

    #[test]
    fn it_should_reject_a_missing_terminator() {
        let image = hex!("00 00 00 00 00 02 01 02");

        assert_eq!(
            RecordStream::parse(&image),
            Err(ValidationError::MissingTerminator)
        );
        assert_eq!(
            RecordStream::parse(&[]),
            Err(ValidationError::MissingTerminator)
        );
    }

    #[test]
    fn it_should_reject_a_truncated_header() {
        let image = hex!("00 00 00 00 00 02 01 02 00 00 00");

        assert_eq!(
            RecordStream::parse(&image),
            Err(ValidationError::TruncatedHeader { offset: 8 })
        );
    }

    #[test]
    fn it_should_reject_a_payload_overrun() {
        let image = hex!("00 00 00 00 00 10 01 02 03 04 00 00 00 00 00 00");

        assert_eq!(
            RecordStream::parse(&image),
            Err(ValidationError::PayloadOverrun {
                offset: 0,
                length: 0x10
            })
        );
    }

    #[test]
    fn it_should_reject_trailing_data_after_the_terminator() {
        let image = hex!("00 00 00 00 00 02 01 02 00 00 00 00 00 00 FF FF");

        assert_eq!(
            RecordStream::parse(&image),
            Err(ValidationError::TrailingData {
                offset: 8,
                remaining: 2
            })
        );
    }

    #[test]
    fn it_should_reject_a_padded_terminator() {
        let image = hex!("00 00 00 00 00 00 00 00");

        assert!(RecordStream::parse(&image).is_err());
    }

    #[test]
    fn it_should_compute_aligned_strides() {
        assert_eq!(BinaryRecord::stride(1), 8);
        assert_eq!(BinaryRecord::stride(2), 8);
        assert_eq!(BinaryRecord::stride(3), 12);
        assert_eq!(BinaryRecord::stride(6), 12);
        assert_eq!(BinaryRecord::stride(7), 16);
    }

    #[test]
    fn it_should_write_records_in_wire_format() {
        let image = hex!("00 00 00 00 00 03 01 02 03 00 00 00 00 00 20 00 00 04 DE AD BE EF 00 00 00 00 00 00 00 00");
        let stream = RecordStream::from(vec![
            BinaryRecord::new(0x0000, vec![0x01, 0x02, 0x03]),
            BinaryRecord::new(0x2000, hex!("DE AD BE EF").to_vec()),
        ]);

        let mut buf: Vec<u8> = Vec::with_capacity(image.len());
        stream.write_to(&mut buf).unwrap();

        assert_eq!(&buf[..], &image[..]);
        assert_eq!(RecordStream::parse(&buf).unwrap(), stream);
    }

    #[test]
    fn it_should_reject_oversized_records_on_write() {
        let mut buf = Vec::new();

        let err = BinaryRecord::new(0x10, vec![0xAB; 0x1_0000])
            .write_to(&mut buf)
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());

        // The largest payload the length field can describe still goes through
        BinaryRecord::new(0x10, vec![0xAB; 0xFFFF])
            .write_to(&mut buf)
            .unwrap();
        assert_eq!(buf.len(), BinaryRecord::stride(0xFFFF));
        assert_eq!(&buf[4..6], &hex!("FF FF"));
    }

    #[test]
    fn it_should_reject_empty_records_on_write() {
        let mut buf = Vec::new();
        let stream = RecordStream::from(vec![
            BinaryRecord::new(0x0000, vec![0x01]),
            BinaryRecord::new(0x0001, vec![]),
        ]);

        let err = stream.write_to(&mut buf).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn it_should_split_at_the_first_record_above_the_boundary() {
        let stream = RecordStream::from(vec![
            BinaryRecord::new(0x0000, vec![0; 4]),
            BinaryRecord::new(0x0100, vec![0; 4]),
            BinaryRecord::new(0x2000, vec![0; 4]),
        ]);

        let (internal, external) = stream.split_at_address(0x1B3F);
        let internal: Vec<u32> = internal.iter().map(|r| r.address).collect();
        let external: Vec<u32> = external.iter().map(|r| r.address).collect();

        assert_eq!(internal, vec![0x0000, 0x0100]);
        assert_eq!(external, vec![0x2000]);
    }

    #[test]
    fn it_should_keep_later_low_records_in_the_external_group() {
        let stream = RecordStream::from(vec![
            BinaryRecord::new(0x0010, vec![0; 4]),
            BinaryRecord::new(0x4000, vec![0; 4]),
            BinaryRecord::new(0x0020, vec![0; 4]),
        ]);

        let (internal, external) = stream.split_at_address(0x1B3F);

        assert_eq!(internal.len(), 1);
        assert_eq!(external.len(), 2);
        assert_eq_hex!(external[1].address, 0x0020);
    }

    #[test]
    fn it_should_leave_the_external_group_empty_when_all_records_are_internal() {
        let stream = RecordStream::from(vec![
            BinaryRecord::new(0x0000, vec![0; 4]),
            BinaryRecord::new(0x1B3F, vec![0; 1]),
        ]);

        let (internal, external) = stream.split_at_address(0x1B3F);

        assert_eq!(internal.len(), 2);
        assert!(external.is_empty());
    }
}
