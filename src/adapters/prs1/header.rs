//! Generic PRS1 chunk header shared by summary, event and waveform chunks.
//!
//! Layout (little-endian):
//!
//! ```text
//! format_version   u8     only 2 is decoded
//! block_length     u16    header + checksum + payload + CRC
//! header_kind      u8     0 = standard, 1 = signal
//! family           u8
//! family_version   u8
//! extension        u8     1 = summary, 2 = events, 5 = waveform
//! session_number   u32
//! timestamp        u32    Unix seconds
//! -- signal headers only --
//! interval_count   u16
//! interval_secs    u8
//! channel_count    u8
//! channel[i]       u8 sample format, u16 interleave
//! terminator       u8     must be 0
//! -- always --
//! checksum         u8     additive sum of every byte above
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::checksum::header_checksum;
use super::cursor::ByteCursor;
use crate::error::{FormatError, ImportError, IntegrityError};

/// The only chunk format version we decode
pub const FORMAT_VERSION: u8 = 2;

/// Bytes of a standard header before the checksum
pub const STANDARD_HEADER_LEN: usize = 15;

/// Supported `(family, family_version, format_version)` triples
pub const SUPPORTED_VARIANTS: &[(u8, u8, u8)] = &[(0, 4, FORMAT_VERSION)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderKind {
    Standard,
    Signal,
}

impl HeaderKind {
    fn code(self) -> u8 {
        match self {
            HeaderKind::Standard => 0,
            HeaderKind::Signal => 1,
        }
    }
}

/// Which file a chunk belongs to, from the extension code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Summary,
    Events,
    Waveform,
}

impl FileKind {
    pub fn from_code(code: u8) -> Result<Self, FormatError> {
        match code {
            1 => Ok(FileKind::Summary),
            2 => Ok(FileKind::Events),
            5 => Ok(FileKind::Waveform),
            other => Err(FormatError::UnsupportedExtension(other)),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            FileKind::Summary => 1,
            FileKind::Events => 2,
            FileKind::Waveform => 5,
        }
    }

    /// File name extension used on the card
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Summary => "001",
            FileKind::Events => "002",
            FileKind::Waveform => "005",
        }
    }
}

/// Encoding of one waveform channel's samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// One signed byte per sample
    SignedByte,
}

impl SampleFormat {
    pub fn from_code(code: u8) -> Result<Self, FormatError> {
        match code {
            0 => Ok(SampleFormat::SignedByte),
            other => Err(FormatError::UnsupportedSampleFormat(other)),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            SampleFormat::SignedByte => 0,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::SignedByte => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout {
    pub format: SampleFormat,
    /// Samples of this channel per interval
    pub interleave: u16,
}

/// Shape of the sample payload of a signal chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalLayout {
    pub interval_count: u16,
    pub interval_secs: u8,
    pub channels: Vec<ChannelLayout>,
}

impl SignalLayout {
    /// Declared duration of the chunk
    pub fn duration_secs(&self) -> f64 {
        self.interval_count as f64 * self.interval_secs as f64
    }

    /// Bytes of one interval across all channels
    pub fn interval_bytes(&self) -> usize {
        self.channels
            .iter()
            .map(|c| c.interleave as usize * c.format.bytes_per_sample())
            .sum()
    }

    /// Sample rate of `channel` in Hz
    pub fn frequency_hz(&self, channel: usize) -> Option<f64> {
        let layout = self.channels.get(channel)?;
        if self.interval_secs == 0 {
            return None;
        }
        Some(layout.interleave as f64 / self.interval_secs as f64)
    }
}

/// Decoded chunk header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderRecord {
    pub format_version: u8,
    pub block_length: u16,
    pub kind: HeaderKind,
    pub family: u8,
    pub family_version: u8,
    pub file_kind: FileKind,
    pub session_number: u32,
    pub timestamp: DateTime<Utc>,
    pub layout: Option<SignalLayout>,
}

impl HeaderRecord {
    /// Decode a header and verify its checksum.
    ///
    /// The checksum is verified before the version and family are validated,
    /// so any corrupted header byte surfaces as an integrity error.
    pub fn decode(cursor: &mut ByteCursor<'_>) -> Result<Self, ImportError> {
        let start = cursor.position();

        let format_version = cursor.read_u8()?;
        let block_length = cursor.read_u16_le()?;
        let kind_code = cursor.read_u8()?;
        let family = cursor.read_u8()?;
        let family_version = cursor.read_u8()?;
        let extension = cursor.read_u8()?;
        let session_number = cursor.read_u32_le()?;
        let timestamp_secs = cursor.read_u32_le()?;

        let mut raw_channels = Vec::new();
        let mut raw_intervals = None;
        if kind_code == HeaderKind::Signal.code() {
            let interval_count = cursor.read_u16_le()?;
            let interval_secs = cursor.read_u8()?;
            let channel_count = cursor.read_u8()?;
            for _ in 0..channel_count {
                let format = cursor.read_u8()?;
                let interleave = cursor.read_u16_le()?;
                raw_channels.push((format, interleave));
            }
            let terminator = cursor.read_u8()?;
            if terminator != 0 {
                return Err(IntegrityError::MissingTerminator(terminator).into());
            }
            raw_intervals = Some((interval_count, interval_secs));
        }

        let actual = header_checksum(cursor.consumed_since(start));
        let expected = cursor.read_u8()?;
        if expected != actual {
            return Err(IntegrityError::HeaderChecksum { expected, actual }.into());
        }

        if format_version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(format_version).into());
        }
        if !SUPPORTED_VARIANTS.contains(&(family, family_version, format_version)) {
            return Err(FormatError::UnsupportedFamily {
                family,
                family_version,
                format_version,
            }
            .into());
        }

        let kind = match kind_code {
            0 => HeaderKind::Standard,
            1 => HeaderKind::Signal,
            other => return Err(FormatError::UnsupportedHeaderKind(other).into()),
        };
        let file_kind = FileKind::from_code(extension)?;

        let layout = match raw_intervals {
            Some((interval_count, interval_secs)) => {
                let channels = raw_channels
                    .into_iter()
                    .map(|(format, interleave)| {
                        Ok(ChannelLayout {
                            format: SampleFormat::from_code(format)?,
                            interleave,
                        })
                    })
                    .collect::<Result<Vec<_>, FormatError>>()?;
                Some(SignalLayout {
                    interval_count,
                    interval_secs,
                    channels,
                })
            }
            None => None,
        };

        let timestamp = DateTime::from_timestamp(timestamp_secs as i64, 0)
            .ok_or(IntegrityError::InvalidTimestamp(timestamp_secs as i64))?;

        Ok(Self {
            format_version,
            block_length,
            kind,
            family,
            family_version,
            file_kind,
            session_number,
            timestamp,
            layout,
        })
    }

    /// Encoded size including the checksum byte
    pub fn encoded_len(&self) -> usize {
        let layout_len = self
            .layout
            .as_ref()
            .map(|l| 4 + 3 * l.channels.len() + 1)
            .unwrap_or(0);
        STANDARD_HEADER_LEN + layout_len + 1
    }

    /// Encode the header followed by its checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.format_version);
        out.extend_from_slice(&self.block_length.to_le_bytes());
        out.push(self.kind.code());
        out.push(self.family);
        out.push(self.family_version);
        out.push(self.file_kind.code());
        out.extend_from_slice(&self.session_number.to_le_bytes());
        out.extend_from_slice(&(self.timestamp.timestamp() as u32).to_le_bytes());
        if let Some(layout) = &self.layout {
            out.extend_from_slice(&layout.interval_count.to_le_bytes());
            out.push(layout.interval_secs);
            out.push(layout.channels.len() as u8);
            for channel in &layout.channels {
                out.push(channel.format.code());
                out.extend_from_slice(&channel.interleave.to_le_bytes());
            }
            out.push(0);
        }
        out.push(header_checksum(&out));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn standard_header() -> HeaderRecord {
        HeaderRecord {
            format_version: 2,
            block_length: 40,
            kind: HeaderKind::Standard,
            family: 0,
            family_version: 4,
            file_kind: FileKind::Events,
            session_number: 417,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 22, 30, 0).unwrap(),
            layout: None,
        }
    }

    fn signal_header() -> HeaderRecord {
        HeaderRecord {
            kind: HeaderKind::Signal,
            file_kind: FileKind::Waveform,
            layout: Some(SignalLayout {
                interval_count: 60,
                interval_secs: 1,
                channels: vec![ChannelLayout {
                    format: SampleFormat::SignedByte,
                    interleave: 5,
                }],
            }),
            ..standard_header()
        }
    }

    #[test]
    fn test_standard_round_trip() {
        let header = standard_header();
        let bytes = header.encode();
        assert_eq!(bytes.len(), 16);

        let mut cursor = ByteCursor::new(&bytes);
        let decoded = HeaderRecord::decode(&mut cursor).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.encode(), bytes);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_signal_round_trip() {
        let header = signal_header();
        let bytes = header.encode();
        assert_eq!(bytes.len(), header.encoded_len());

        let decoded = HeaderRecord::decode(&mut ByteCursor::new(&bytes)).unwrap();
        let layout = decoded.layout.as_ref().unwrap();
        assert_eq!(layout.duration_secs(), 60.0);
        assert_eq!(layout.frequency_hz(0), Some(5.0));
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_any_flipped_byte_is_an_integrity_error() {
        let bytes = standard_header().encode();
        for i in 0..bytes.len() {
            let mut corrupted = bytes.clone();
            corrupted[i] ^= 0xff;
            let err = HeaderRecord::decode(&mut ByteCursor::new(&corrupted)).unwrap_err();
            assert!(
                matches!(err, ImportError::Integrity(_)),
                "byte {i}: unexpected {err:?}"
            );
        }
    }

    #[test]
    fn test_signal_header_corruption_detected() {
        let bytes = signal_header().encode();
        // interval count, interval length, interleave, terminator, checksum
        for i in [15usize, 17, 20, 22, bytes.len() - 1] {
            let mut corrupted = bytes.clone();
            corrupted[i] ^= 0x01;
            let err = HeaderRecord::decode(&mut ByteCursor::new(&corrupted)).unwrap_err();
            assert_eq!(err.class(), ErrorClass::Corrupt, "byte {i}: {err:?}");
        }
    }

    #[test]
    fn test_unsupported_version_fails_fast() {
        let header = HeaderRecord {
            format_version: 3,
            ..standard_header()
        };
        let err = HeaderRecord::decode(&mut ByteCursor::new(&header.encode())).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Format(FormatError::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn test_unsupported_family_fails_fast() {
        let header = HeaderRecord {
            family_version: 6,
            ..standard_header()
        };
        let err = HeaderRecord::decode(&mut ByteCursor::new(&header.encode())).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Format(FormatError::UnsupportedFamily {
                family: 0,
                family_version: 6,
                format_version: 2
            })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let bytes = standard_header().encode();
        let err = HeaderRecord::decode(&mut ByteCursor::new(&bytes[..10])).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Integrity(IntegrityError::Truncated { .. })
        ));
    }
}
