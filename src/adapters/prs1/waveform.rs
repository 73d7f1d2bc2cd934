//! Waveform chunk (`.005`) reassembly.
//!
//! A session's flow waveform is split over many signal chunks. Each chunk
//! interleaves its channels per interval; channel 0 carries flow rate as
//! signed bytes. Chunks are stitched into one continuous [`Signal`], padding
//! timing gaps with zeros.

use chrono::{DateTime, Utc};

use super::chunk::DataChunk;
use super::header::{FileKind, SignalLayout};
use crate::error::{ImportError, ProtocolError};
use crate::types::{duration_from_secs, secs_between, signal_names, Signal};

/// Flow channel index within the interleaved layout
const FLOW_CHANNEL: usize = 0;

/// Flow samples are signed bytes in L/min
const FLOW_MIN: f64 = -127.0;
const FLOW_MAX: f64 = 127.0;

/// A chunk ending this far past the next chunk's start has a bad timestamp
const ORDERING_TOLERANCE_SECS: f64 = 1.0;

/// Flow samples of one chunk with their declared timing
#[derive(Debug, Clone)]
struct Segment {
    start: DateTime<Utc>,
    declared_secs: f64,
    samples: Vec<f64>,
}

impl Segment {
    fn declared_end(&self) -> DateTime<Utc> {
        self.start + duration_from_secs(self.declared_secs)
    }
}

/// Pull channel `channel` out of an interleaved payload.
///
/// A trailing partial interval is dropped.
pub fn deinterleave(layout: &SignalLayout, payload: &[u8], channel: usize) -> Vec<i8> {
    let interval_bytes = layout.interval_bytes();
    let Some(target) = layout.channels.get(channel) else {
        return Vec::new();
    };
    if interval_bytes == 0 {
        return Vec::new();
    }

    let offset: usize = layout.channels[..channel]
        .iter()
        .map(|c| c.interleave as usize * c.format.bytes_per_sample())
        .sum();
    let width = target.interleave as usize * target.format.bytes_per_sample();

    payload
        .chunks_exact(interval_bytes)
        .flat_map(|interval| interval[offset..offset + width].iter().map(|&b| b as i8))
        .collect()
}

/// Stitch the signal chunks of one session into a flow-rate signal.
///
/// Returns `Ok(None)` when there are no chunks.
pub fn reassemble(chunks: &[DataChunk]) -> Result<Option<Signal>, ImportError> {
    let Some(first) = chunks.first() else {
        return Ok(None);
    };
    let first_layout = layout_of(first)?;
    let frequency = first_layout
        .frequency_hz(FLOW_CHANNEL)
        .filter(|f| *f > 0.0)
        .ok_or(ProtocolError::EmptySignalLayout)?;

    let mut segments = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let layout = layout_of(chunk)?;
        if layout.channels != first_layout.channels || layout.interval_secs != first_layout.interval_secs {
            return Err(ProtocolError::LayoutMismatch(chunk.header.session_number).into());
        }
        segments.push(Segment {
            start: chunk.header.timestamp,
            declared_secs: layout.duration_secs(),
            samples: deinterleave(layout, &chunk.payload, FLOW_CHANNEL)
                .into_iter()
                .map(f64::from)
                .collect(),
        });
    }

    correct_ordering_anomaly(&mut segments, first.header.session_number);

    let start = segments[0].start;
    let interval = 1.0 / frequency;
    let mut samples: Vec<f64> = Vec::new();
    for segment in segments {
        if !samples.is_empty() {
            let expected = start + duration_from_secs(samples.len() as f64 / frequency);
            let gap = secs_between(expected, segment.start);
            if gap > interval {
                let fill = (gap / interval).round() as usize;
                tracing::debug!(gap_secs = gap, fill, "padding waveform gap");
                samples.resize(samples.len() + fill, 0.0);
            }
        }
        samples.extend(segment.samples);
    }

    Ok(Some(Signal::new(
        signal_names::FLOW_RATE,
        frequency,
        FLOW_MIN,
        FLOW_MAX,
        start,
        samples,
    )))
}

fn layout_of(chunk: &DataChunk) -> Result<&SignalLayout, ImportError> {
    chunk.expect_kind(FileKind::Waveform)?;
    match &chunk.header.layout {
        Some(layout) if !layout.channels.is_empty() => Ok(layout),
        _ => Err(ProtocolError::EmptySignalLayout.into()),
    }
}

/// When a chunk claims to end well after its successor starts, its own
/// timestamp is wrong: rebase it on the successor. Applied once per session.
fn correct_ordering_anomaly(segments: &mut [Segment], session_number: u32) {
    for i in 1..segments.len() {
        let overlap = secs_between(segments[i].start, segments[i - 1].declared_end());
        if overlap > ORDERING_TOLERANCE_SECS {
            let corrected = segments[i].start - duration_from_secs(segments[i - 1].declared_secs);
            tracing::warn!(
                session = session_number,
                chunk = i - 1,
                from = %segments[i - 1].start,
                to = %corrected,
                "correcting waveform chunk timestamp"
            );
            segments[i - 1].start = corrected;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::prs1::header::{
        ChannelLayout, HeaderKind, HeaderRecord, SampleFormat,
    };
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 10, 23, 0, 0).unwrap()
    }

    fn flow_layout(interval_count: u16) -> SignalLayout {
        SignalLayout {
            interval_count,
            interval_secs: 1,
            channels: vec![ChannelLayout {
                format: SampleFormat::SignedByte,
                interleave: 5,
            }],
        }
    }

    fn chunk(start: DateTime<Utc>, layout: SignalLayout, payload: Vec<u8>) -> DataChunk {
        DataChunk {
            header: HeaderRecord {
                format_version: 2,
                block_length: 0,
                kind: HeaderKind::Signal,
                family: 0,
                family_version: 4,
                file_kind: FileKind::Waveform,
                session_number: 77,
                timestamp: start,
                layout: Some(layout),
            },
            payload,
            crc: 0,
        }
    }

    fn flow_chunk(start: DateTime<Utc>, secs: u16, value: i8) -> DataChunk {
        chunk(start, flow_layout(secs), vec![value as u8; secs as usize * 5])
    }

    #[test]
    fn test_deinterleave_picks_channel() {
        let layout = SignalLayout {
            interval_count: 2,
            interval_secs: 1,
            channels: vec![
                ChannelLayout {
                    format: SampleFormat::SignedByte,
                    interleave: 3,
                },
                ChannelLayout {
                    format: SampleFormat::SignedByte,
                    interleave: 1,
                },
            ],
        };
        let payload = [1, 2, 0xff, 9, 4, 5, 6, 8];
        assert_eq!(deinterleave(&layout, &payload, 0), vec![1, 2, -1, 4, 5, 6]);
        assert_eq!(deinterleave(&layout, &payload, 1), vec![9, 8]);
        assert!(deinterleave(&layout, &payload, 2).is_empty());
    }

    #[test]
    fn test_contiguous_chunks_concatenate() {
        let chunks = vec![
            flow_chunk(t0(), 10, 20),
            flow_chunk(t0() + Duration::seconds(10), 10, -20),
        ];
        let signal = reassemble(&chunks).unwrap().unwrap();
        assert_eq!(signal.name, signal_names::FLOW_RATE);
        assert_eq!(signal.frequency_hz, 5.0);
        assert_eq!(signal.samples.len(), 100);
        assert_eq!(signal.samples[49], 20.0);
        assert_eq!(signal.samples[50], -20.0);
        assert_eq!(signal.end, t0() + Duration::seconds(20));
    }

    #[test]
    fn test_gap_is_zero_filled() {
        let chunks = vec![
            flow_chunk(t0(), 10, 20),
            flow_chunk(t0() + Duration::seconds(16), 4, 30),
        ];
        let signal = reassemble(&chunks).unwrap().unwrap();
        assert_eq!(signal.samples.len(), 50 + 30 + 20);
        assert!(signal.samples[50..80].iter().all(|&v| v == 0.0));
        assert_eq!(signal.samples[80], 30.0);
        assert_eq!(signal.end, t0() + Duration::seconds(20));
    }

    #[test]
    fn test_small_overlap_is_not_duplicated() {
        let chunks = vec![
            flow_chunk(t0(), 10, 20),
            flow_chunk(t0() + Duration::milliseconds(9600), 10, 30),
        ];
        let signal = reassemble(&chunks).unwrap().unwrap();
        assert_eq!(signal.samples.len(), 100);
    }

    #[test]
    fn test_ordering_anomaly_rebases_chunk_once() {
        // first chunk's timestamp is 30 s late
        let chunks = vec![
            flow_chunk(t0() + Duration::seconds(30), 10, 20),
            flow_chunk(t0() + Duration::seconds(10), 10, 30),
        ];
        let signal = reassemble(&chunks).unwrap().unwrap();
        assert_eq!(signal.start, t0());
        assert_eq!(signal.samples.len(), 100);
        assert_eq!(signal.end, t0() + Duration::seconds(20));
    }

    #[test]
    fn test_layout_change_is_protocol_error() {
        let chunks = vec![
            flow_chunk(t0(), 10, 20),
            chunk(
                t0() + Duration::seconds(10),
                SignalLayout {
                    interval_secs: 2,
                    ..flow_layout(5)
                },
                vec![0; 25],
            ),
        ];
        let err = reassemble(&chunks).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Protocol(ProtocolError::LayoutMismatch(77))
        ));
    }

    #[test]
    fn test_no_chunks() {
        assert!(reassemble(&[]).unwrap().is_none());
    }
}
