//! Chunk framing: header, payload, trailing block CRC.

use super::checksum::crc16;
use super::cursor::ByteCursor;
use super::header::{FileKind, HeaderRecord};
use crate::error::{ImportError, IntegrityError, ProtocolError};

/// Size of the trailing block CRC
pub const CRC_SIZE: usize = 2;

/// One verified chunk
#[derive(Debug, Clone, PartialEq)]
pub struct DataChunk {
    pub header: HeaderRecord,
    pub payload: Vec<u8>,
    pub crc: u16,
}

impl DataChunk {
    /// Read one chunk, verifying the header checksum and the payload CRC.
    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self, ImportError> {
        let start = cursor.position();
        let header = HeaderRecord::decode(cursor)?;
        let header_len = cursor.position() - start;

        let overhead = header_len + CRC_SIZE;
        let block_length = header.block_length as usize;
        if block_length < overhead {
            return Err(IntegrityError::BlockTooShort {
                block_length: header.block_length,
                overhead,
            }
            .into());
        }

        let payload = cursor.read_bytes(block_length - overhead)?.to_vec();
        let expected = cursor.read_u16_le()?;
        let actual = crc16(&payload);
        if expected != actual {
            return Err(IntegrityError::BlockCrc { expected, actual }.into());
        }

        Ok(Self {
            header,
            payload,
            crc: expected,
        })
    }

    /// Read every chunk of a file.
    pub fn read_all(bytes: &[u8]) -> Result<Vec<Self>, ImportError> {
        let mut cursor = ByteCursor::new(bytes);
        let mut chunks = Vec::new();
        while !cursor.is_empty() {
            let chunk = Self::read(&mut cursor)?;
            tracing::debug!(
                session = chunk.header.session_number,
                kind = ?chunk.header.file_kind,
                payload = chunk.payload.len(),
                "decoded chunk"
            );
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    /// Build a framed chunk, filling in the block length and CRC.
    pub fn encode(mut header: HeaderRecord, payload: &[u8]) -> Vec<u8> {
        header.block_length = (header.encoded_len() + payload.len() + CRC_SIZE) as u16;
        let mut out = header.encode();
        out.extend_from_slice(payload);
        out.extend_from_slice(&crc16(payload).to_le_bytes());
        out
    }

    /// Fail unless the chunk carries `expected` records.
    pub fn expect_kind(&self, expected: FileKind) -> Result<(), ProtocolError> {
        if self.header.file_kind == expected {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedChunkKind {
                expected: expected.extension(),
                found: self.header.file_kind.code(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::prs1::header::HeaderKind;
    use crate::error::ErrorClass;
    use chrono::{TimeZone, Utc};

    fn header(kind: FileKind) -> HeaderRecord {
        HeaderRecord {
            format_version: 2,
            block_length: 0,
            kind: HeaderKind::Standard,
            family: 0,
            family_version: 4,
            file_kind: kind,
            session_number: 9,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap(),
            layout: None,
        }
    }

    #[test]
    fn test_payload_length_from_block_length() {
        let payload = [0x0d, 0x05, 0x00];
        let bytes = DataChunk::encode(header(FileKind::Events), &payload);
        let chunk = DataChunk::read(&mut ByteCursor::new(&bytes)).unwrap();
        assert_eq!(chunk.payload, payload);
        assert_eq!(chunk.header.block_length as usize, bytes.len());
    }

    #[test]
    fn test_multiple_chunks_in_one_file() {
        let mut bytes = DataChunk::encode(header(FileKind::Events), &[1, 2, 3]);
        bytes.extend(DataChunk::encode(header(FileKind::Events), &[4, 5]));
        let chunks = DataChunk::read_all(&bytes).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].payload, vec![4, 5]);
    }

    #[test]
    fn test_payload_corruption_fails_crc() {
        let mut bytes = DataChunk::encode(header(FileKind::Events), &[1, 2, 3, 4]);
        bytes[17] ^= 0x10;
        let err = DataChunk::read(&mut ByteCursor::new(&bytes)).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Integrity(IntegrityError::BlockCrc { .. })
        ));
        assert_eq!(err.class(), ErrorClass::Corrupt);
    }

    #[test]
    fn test_truncated_file() {
        let bytes = DataChunk::encode(header(FileKind::Events), &[1, 2, 3, 4]);
        let err = DataChunk::read_all(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Integrity(IntegrityError::Truncated { .. })
        ));
    }

    #[test]
    fn test_expect_kind() {
        let bytes = DataChunk::encode(header(FileKind::Summary), &[]);
        let chunk = DataChunk::read(&mut ByteCursor::new(&bytes)).unwrap();
        assert!(chunk.expect_kind(FileKind::Summary).is_ok());
        assert!(chunk.expect_kind(FileKind::Events).is_err());
    }
}
