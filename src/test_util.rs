//! Helpers shared by the unit tests

use crate::ihex::{BinaryRecord, RecordStream};
use crate::transfer::{RequestCode, TransferError, Transport};

/// A single control transfer as seen by `MockTransport`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Write {
    pub address: u16,
    pub data: Vec<u8>,
    pub request: RequestCode,
}

/// A transport that records every write and accepts it, unless told otherwise.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub writes: Vec<Write>,
    fail_after: Option<usize>,
    fail_on_request: Option<RequestCode>,
    truncate: bool,
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport::default()
    }

    /// Fails every write after the first `count` have succeeded
    pub fn failing_after(mut self, count: usize) -> MockTransport {
        self.fail_after = Some(count);
        self
    }

    /// Fails the first write that uses `request`
    pub fn failing_on(mut self, request: RequestCode) -> MockTransport {
        self.fail_on_request = Some(request);
        self
    }

    /// Reports one byte less than requested for every write
    pub fn truncating_writes(mut self) -> MockTransport {
        self.truncate = true;
        self
    }
}

impl Transport for MockTransport {
    fn write_control(
        &mut self,
        address: u16,
        data: &[u8],
        request: RequestCode,
    ) -> Result<usize, TransferError> {
        self.writes.push(Write {
            address,
            data: data.to_vec(),
            request,
        });

        let exhausted = matches!(self.fail_after, Some(count) if self.writes.len() > count);

        if exhausted || self.fail_on_request == Some(request) {
            return Err(TransferError::Usb {
                address,
                length: data.len(),
                source: rusb::Error::Pipe,
            });
        }

        if self.truncate {
            Ok(data.len().saturating_sub(1))
        } else {
            Ok(data.len())
        }
    }
}

pub fn record(address: u32, payload: &[u8]) -> BinaryRecord {
    BinaryRecord::new(address, payload.to_vec())
}

/// Encodes `records` as a terminated record stream
pub fn encode(records: Vec<BinaryRecord>) -> Vec<u8> {
    let mut buf = Vec::new();

    RecordStream::from(records)
        .write_to(&mut buf)
        .expect("test records must be encodable");

    buf
}
