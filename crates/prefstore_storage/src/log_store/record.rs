//! Log record framing and payload layout.
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | header crc32 (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Integers are little-endian. The header CRC covers the eleven bytes
//! before it, so a damaged length is caught before it is trusted. The
//! trailing CRC covers everything before it.
//!
//! Payloads:
//!
//! ```text
//! Put:    key_len u32 | key | value_len u32 | value
//! Delete: key_len u32 | key
//! Batch:  count u32 | count x (op u8 | Put or Delete body)
//! ```

use crate::error::{StorageError, StorageResult};
use crate::ordered::BatchOp;

/// Magic bytes opening every record.
pub const LOG_MAGIC: [u8; 4] = *b"PLOG";

/// Current record format version.
pub const LOG_VERSION: u16 = 1;

/// Bytes covered by the header CRC: magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_FIELDS_SIZE: usize = 11;

/// Header fields plus their CRC.
pub(crate) const HEADER_SIZE: usize = HEADER_FIELDS_SIZE + CRC_SIZE;

pub(crate) const CRC_SIZE: usize = 4;

/// Type of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Write one key.
    Put = 1,
    /// Remove one key.
    Delete = 2,
    /// Several operations applied atomically.
    Batch = 3,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Delete),
            3 => Some(Self::Batch),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One key mutation parsed out of a payload, borrowing from it.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct PayloadOp<'a> {
    pub key: &'a [u8],
    /// For puts: the value's offset within the payload, and the value.
    pub value: Option<(usize, &'a [u8])>,
}

fn length_prefix(len: usize) -> StorageResult<[u8; 4]> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| StorageError::corrupted(format!("{len} bytes exceed the record field limit")))
}

fn encode_op_body(buf: &mut Vec<u8>, op: &BatchOp) -> StorageResult<()> {
    let key = op.key();
    buf.extend_from_slice(&length_prefix(key.len())?);
    buf.extend_from_slice(key);
    if let BatchOp::Put { value, .. } = op {
        buf.extend_from_slice(&length_prefix(value.len())?);
        buf.extend_from_slice(value);
    }
    Ok(())
}

fn op_type(op: &BatchOp) -> RecordType {
    match op {
        BatchOp::Put { .. } => RecordType::Put,
        BatchOp::Delete { .. } => RecordType::Delete,
    }
}

/// Encodes operations as a record payload.
///
/// A single operation uses its own record type; anything else becomes a
/// batch.
pub(crate) fn encode_ops(ops: &[BatchOp]) -> StorageResult<(RecordType, Vec<u8>)> {
    if let [op] = ops {
        let mut buf = Vec::new();
        encode_op_body(&mut buf, op)?;
        return Ok((op_type(op), buf));
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(&length_prefix(ops.len())?);
    for op in ops {
        buf.push(op_type(op).as_byte());
        encode_op_body(&mut buf, op)?;
    }
    Ok((RecordType::Batch, buf))
}

/// Wraps a payload in the record envelope.
pub(crate) fn frame(record_type: RecordType, payload: &[u8]) -> StorageResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    buf.extend_from_slice(&LOG_MAGIC);
    buf.extend_from_slice(&LOG_VERSION.to_le_bytes());
    buf.push(record_type.as_byte());
    buf.extend_from_slice(&length_prefix(payload.len())?);
    let header_crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&header_crc.to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn take(&mut self, len: usize) -> StorageResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| StorageError::corrupted("unexpected end of record payload"))?;
        let bytes = &self.payload[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> StorageResult<usize> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf) as usize)
    }

    fn op(&mut self, record_type: RecordType) -> StorageResult<PayloadOp<'a>> {
        let key_len = self.u32()?;
        let key = self.take(key_len)?;
        let value = match record_type {
            RecordType::Put => {
                let value_len = self.u32()?;
                let offset = self.pos;
                Some((offset, self.take(value_len)?))
            }
            RecordType::Delete => None,
            RecordType::Batch => {
                return Err(StorageError::corrupted("nested batch in record payload"));
            }
        };
        Ok(PayloadOp { key, value })
    }
}

/// Parses a payload into its operations.
pub(crate) fn parse_payload(
    record_type: RecordType,
    payload: &[u8],
) -> StorageResult<Vec<PayloadOp<'_>>> {
    let mut reader = PayloadReader { payload, pos: 0 };

    let ops = match record_type {
        RecordType::Put | RecordType::Delete => vec![reader.op(record_type)?],
        RecordType::Batch => {
            let count = reader.u32()?;
            // each op takes at least 5 bytes
            let mut ops = Vec::with_capacity(count.min(payload.len() / 5));
            for _ in 0..count {
                let type_byte = reader.take(1)?[0];
                let op_type = RecordType::from_byte(type_byte).ok_or_else(|| {
                    StorageError::corrupted(format!("unknown batch op type {type_byte}"))
                })?;
                ops.push(reader.op(op_type)?);
            }
            ops
        }
    };

    if reader.pos != payload.len() {
        return Err(StorageError::corrupted("trailing bytes in record payload"));
    }
    Ok(ops)
}
