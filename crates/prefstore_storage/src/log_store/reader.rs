//! Sequential record scan used by recovery.
//!
//! Reads one record at a time, so memory stays bounded by the largest
//! record rather than the log size.
//!
//! - A record whose verified header claims more bytes than the device
//!   holds is a torn tail from an interrupted append. So is a header that
//!   is itself cut short. The scan stops there and reports the end of the
//!   last whole record.
//! - A header that fails its checksum is corruption, even when its length
//!   runs past the end. A damaged length is never mistaken for a torn tail.
//! - A whole record with a bad checksum, bad magic, newer version or
//!   unknown type is corruption and fails the scan.

use super::record::{
    RecordType, CRC_SIZE, HEADER_FIELDS_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION,
};
use crate::device::LogDevice;
use crate::error::{StorageError, StorageResult};

/// A whole, verified record.
#[derive(Debug)]
pub(crate) struct RawRecord {
    /// Offset of the record's first byte.
    pub offset: u64,
    pub record_type: RecordType,
    pub payload: Vec<u8>,
}

pub(crate) struct RecordReader<'a> {
    device: &'a dyn LogDevice,
    position: u64,
    end: u64,
}

impl<'a> RecordReader<'a> {
    pub fn new(device: &'a dyn LogDevice) -> Self {
        Self {
            device,
            position: 0,
            end: device.len(),
        }
    }

    /// End of the last whole record read so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn next_record(&mut self) -> StorageResult<Option<RawRecord>> {
        let offset = self.position;
        let remaining = self.end - offset;
        if remaining < HEADER_SIZE as u64 {
            return Ok(None);
        }

        let header = self.device.read_at(offset, HEADER_SIZE)?;
        if header[0..4] != LOG_MAGIC {
            return Err(StorageError::corrupted(format!(
                "invalid magic at offset {offset}"
            )));
        }

        let mut stored = [0u8; CRC_SIZE];
        stored.copy_from_slice(&header[HEADER_FIELDS_SIZE..]);
        let expected = u32::from_le_bytes(stored);
        let actual = crc32fast::hash(&header[..HEADER_FIELDS_SIZE]);
        if actual != expected {
            return Err(StorageError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > LOG_VERSION {
            return Err(StorageError::corrupted(format!(
                "unsupported record version {version} at offset {offset}"
            )));
        }

        let type_byte = header[6];
        let record_type = RecordType::from_byte(type_byte).ok_or_else(|| {
            StorageError::corrupted(format!(
                "unknown record type {type_byte} at offset {offset}"
            ))
        })?;

        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total = (HEADER_SIZE + payload_len + CRC_SIZE) as u64;
        if remaining < total {
            return Ok(None);
        }

        let mut body = self.device.read_at(offset + HEADER_SIZE as u64, payload_len + CRC_SIZE)?;
        let mut stored = [0u8; CRC_SIZE];
        stored.copy_from_slice(&body[payload_len..]);
        let expected = u32::from_le_bytes(stored);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(&body[..payload_len]);
        let actual = hasher.finalize();
        if actual != expected {
            return Err(StorageError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }

        body.truncate(payload_len);
        self.position = offset + total;
        Ok(Some(RawRecord {
            offset,
            record_type,
            payload: body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::log_store::record::frame;

    fn device_with(records: &[(RecordType, &[u8])]) -> MemoryDevice {
        let mut device = MemoryDevice::new();
        for (ty, payload) in records {
            device.append(&frame(*ty, payload).unwrap()).unwrap();
        }
        device
    }

    #[test]
    fn reads_records_in_order() {
        let device = device_with(&[(RecordType::Put, b"one"), (RecordType::Delete, b"two")]);
        let mut reader = RecordReader::new(&device);

        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(first.payload, b"one");

        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.record_type, RecordType::Delete);
        assert_eq!(second.offset, (HEADER_SIZE + 3 + CRC_SIZE) as u64);

        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(reader.position(), device.len());
    }

    #[test]
    fn torn_tail_stops_scan() {
        let device = device_with(&[(RecordType::Put, b"whole")]);
        let whole = device.len();
        let mut device = device;
        let torn = frame(RecordType::Put, b"partial").unwrap();
        device.append(&torn[..torn.len() - 2]).unwrap();

        let mut reader = RecordReader::new(&device);
        assert!(reader.next_record().unwrap().is_some());
        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(reader.position(), whole);
    }

    #[test]
    fn checksum_mismatch_is_fatal() {
        let device = device_with(&[(RecordType::Put, b"payload")]);
        device.corrupt(HEADER_SIZE + 2, b'!');

        let mut reader = RecordReader::new(&device);
        assert!(matches!(
            reader.next_record(),
            Err(StorageError::ChecksumMismatch { offset: 0, .. })
        ));
    }

    #[test]
    fn damaged_length_is_not_a_torn_tail() {
        let device = device_with(&[
            (RecordType::Put, b"first"),
            (RecordType::Put, b"second"),
            (RecordType::Put, b"third"),
        ]);
        let second = (HEADER_SIZE + 5 + CRC_SIZE) as u64;
        // high byte of the second record's length
        device.corrupt(second as usize + 10, 0x7f);

        let mut reader = RecordReader::new(&device);
        assert!(reader.next_record().unwrap().is_some());
        assert!(matches!(
            reader.next_record(),
            Err(StorageError::ChecksumMismatch { offset, .. }) if offset == second
        ));
    }

    #[test]
    fn torn_header_stops_scan() {
        let mut device = device_with(&[(RecordType::Put, b"whole")]);
        let whole = device.len();
        let next = frame(RecordType::Put, b"next").unwrap();
        device.append(&next[..HEADER_SIZE - 1]).unwrap();

        let mut reader = RecordReader::new(&device);
        assert!(reader.next_record().unwrap().is_some());
        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(reader.position(), whole);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let device = MemoryDevice::with_data(vec![0u8; 32]);
        let mut reader = RecordReader::new(&device);
        assert!(matches!(
            reader.next_record(),
            Err(StorageError::Corrupted(_))
        ));
    }
}
