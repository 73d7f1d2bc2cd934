//! European Data Format (EDF / EDF+) reader.
//!
//! Fixed-width ASCII header, one 256-byte block per signal, then data records
//! of little-endian `i16` samples. EDF+ annotation signals carry
//! time-stamped annotation lists (TALs) instead of samples.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adapters::prs1::ByteCursor;
use crate::error::{FormatError, ImportError, IntegrityError};

/// Size of the fixed file header
pub const HEADER_LEN: usize = 256;
/// Size of one signal's header block
pub const SIGNAL_HEADER_LEN: usize = 256;

/// Label of EDF+ annotation signals
pub const ANNOTATION_LABEL: &str = "EDF Annotations";

const TAL_DURATION: u8 = 0x15;
const TAL_SEPARATOR: u8 = 0x14;

/// Two-digit years at or above this are 19xx
const CENTURY_PIVOT: u32 = 85;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalParam {
    pub label: String,
    pub transducer: String,
    pub physical_dimension: String,
    pub physical_min: f64,
    pub physical_max: f64,
    pub digital_min: i32,
    pub digital_max: i32,
    pub prefilter: String,
    pub samples_per_record: usize,
}

impl SignalParam {
    pub fn is_annotation(&self) -> bool {
        self.label == ANNOTATION_LABEL
    }

    /// Physical units per digital step
    pub fn gain(&self) -> f64 {
        (self.physical_max - self.physical_min) / (self.digital_max - self.digital_min) as f64
    }

    pub fn to_physical(&self, digital: i16) -> f64 {
        (digital as i32 - self.digital_min) as f64 * self.gain() + self.physical_min
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdfHeader {
    pub patient: String,
    pub recording: String,
    pub start: DateTime<Utc>,
    pub header_bytes: usize,
    pub reserved: String,
    pub record_count: usize,
    pub record_duration_secs: f64,
    pub signals: Vec<SignalParam>,
}

impl EdfHeader {
    pub fn is_edf_plus(&self) -> bool {
        self.reserved.starts_with("EDF+")
    }

    /// Bytes of one data record across all signals
    pub fn record_bytes(&self) -> usize {
        self.signals.iter().map(|s| s.samples_per_record * 2).sum()
    }

    pub fn duration_secs(&self) -> f64 {
        self.record_count as f64 * self.record_duration_secs
    }

    /// Sample rate of signal `index`
    pub fn frequency_hz(&self, index: usize) -> Option<f64> {
        let signal = self.signals.get(index)?;
        (self.record_duration_secs > 0.0)
            .then(|| signal.samples_per_record as f64 / self.record_duration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdfAnnotation {
    /// Seconds from the recording start
    pub onset_secs: f64,
    pub duration_secs: Option<f64>,
    pub description: String,
}

/// A fully decoded EDF file
#[derive(Debug, Clone, PartialEq)]
pub struct EdfFile {
    pub header: EdfHeader,
    /// Physical samples per signal, parallel to `header.signals`; empty for
    /// annotation signals
    pub samples: Vec<Vec<f64>>,
    pub annotations: Vec<EdfAnnotation>,
}

impl EdfFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, ImportError> {
        let mut cursor = ByteCursor::new(bytes);
        let header = parse_header(&mut cursor, bytes.len())?;

        let needed = header
            .record_count
            .checked_mul(header.record_bytes())
            .ok_or_else(|| malformed("number of records", header.record_count.to_string()))?;
        let available = bytes.len().saturating_sub(header.header_bytes);
        if needed > available {
            return Err(IntegrityError::Truncated {
                offset: header.header_bytes,
                needed,
                available,
            }
            .into());
        }

        let mut samples: Vec<Vec<f64>> = header
            .signals
            .iter()
            .map(|s| {
                if s.is_annotation() {
                    Vec::new()
                } else {
                    Vec::with_capacity(s.samples_per_record * header.record_count)
                }
            })
            .collect();
        let mut annotations = Vec::new();

        for _ in 0..header.record_count {
            for (index, signal) in header.signals.iter().enumerate() {
                let raw = cursor.read_bytes(signal.samples_per_record * 2)?;
                if signal.is_annotation() {
                    annotations.extend(parse_tals(raw));
                } else {
                    samples[index].extend(
                        raw.chunks_exact(2)
                            .map(|b| signal.to_physical(i16::from_le_bytes([b[0], b[1]]))),
                    );
                }
            }
        }

        Ok(Self {
            header,
            samples,
            annotations,
        })
    }

    /// Index of the first signal with `label`
    pub fn signal_index(&self, label: &str) -> Option<usize> {
        self.header.signals.iter().position(|s| s.label == label)
    }
}

fn parse_header(cursor: &mut ByteCursor<'_>, file_len: usize) -> Result<EdfHeader, ImportError> {
    let version = ascii_field(cursor, 8)?;
    if version != "0" {
        return Err(FormatError::NotEdf(format!("version field {version:?}")).into());
    }
    let patient = ascii_field(cursor, 80)?;
    let recording = ascii_field(cursor, 80)?;
    let date = ascii_field(cursor, 8)?;
    let time = ascii_field(cursor, 8)?;
    let header_bytes: usize = numeric_field(cursor, 8, "header bytes")?;
    let reserved = ascii_field(cursor, 44)?;
    let declared_records: i64 = numeric_field(cursor, 8, "number of records")?;
    let record_duration_secs: f64 = numeric_field(cursor, 8, "record duration")?;
    let signal_count: usize = numeric_field(cursor, 4, "number of signals")?;

    if header_bytes != HEADER_LEN + signal_count * SIGNAL_HEADER_LEN {
        return Err(malformed("header bytes", header_bytes.to_string()));
    }

    let start = parse_start(&date, &time)?;

    // Signal header fields are stored column-wise: every label, then every
    // transducer, and so on.
    let labels = column(cursor, signal_count, 16)?;
    let transducers = column(cursor, signal_count, 80)?;
    let dimensions = column(cursor, signal_count, 8)?;
    let physical_min = numeric_column::<f64>(cursor, signal_count, "physical minimum")?;
    let physical_max = numeric_column::<f64>(cursor, signal_count, "physical maximum")?;
    let digital_min = numeric_column::<i32>(cursor, signal_count, "digital minimum")?;
    let digital_max = numeric_column::<i32>(cursor, signal_count, "digital maximum")?;
    let prefilters = column(cursor, signal_count, 80)?;
    let samples_per_record = numeric_column::<usize>(cursor, signal_count, "samples per record")?;
    column(cursor, signal_count, 32)?;

    let mut signals = Vec::with_capacity(signal_count);
    for i in 0..signal_count {
        if digital_max[i] <= digital_min[i] {
            return Err(malformed(
                "digital maximum",
                format!("{} <= {} for {}", digital_max[i], digital_min[i], labels[i]),
            ));
        }
        signals.push(SignalParam {
            label: labels[i].clone(),
            transducer: transducers[i].clone(),
            physical_dimension: dimensions[i].clone(),
            physical_min: physical_min[i],
            physical_max: physical_max[i],
            digital_min: digital_min[i],
            digital_max: digital_max[i],
            prefilter: prefilters[i].clone(),
            samples_per_record: samples_per_record[i],
        });
    }

    let mut header = EdfHeader {
        patient,
        recording,
        start,
        header_bytes,
        reserved,
        record_count: 0,
        record_duration_secs,
        signals,
    };

    // -1 means the writer never patched the count; derive it from the size
    header.record_count = match usize::try_from(declared_records) {
        Ok(count) => count,
        Err(_) if declared_records == -1 => {
            let record_bytes = header.record_bytes();
            if record_bytes == 0 {
                0
            } else {
                file_len.saturating_sub(header_bytes) / record_bytes
            }
        }
        Err(_) => return Err(malformed("number of records", declared_records.to_string())),
    };

    Ok(header)
}

/// `dd.mm.yy` and `hh.mm.ss`
fn parse_start(date: &str, time: &str) -> Result<DateTime<Utc>, ImportError> {
    let parts = |s: &str| -> Option<[u32; 3]> {
        let mut it = s.split('.').map(|p| p.trim().parse::<u32>().ok());
        let out = [it.next()??, it.next()??, it.next()??];
        it.next().is_none().then_some(out)
    };

    let [day, month, yy] = parts(date).ok_or_else(|| malformed("start date", date.to_string()))?;
    let [hour, minute, second] = parts(time).ok_or_else(|| malformed("start time", time.to_string()))?;
    let year = if yy >= CENTURY_PIVOT { 1900 + yy } else { 2000 + yy };

    let date = NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| malformed("start date", date.to_string()))?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)
        .ok_or_else(|| malformed("start time", time.to_string()))?;
    Ok(NaiveDateTime::new(date, time).and_utc())
}

/// Split an annotation signal's bytes into annotations. The leading
/// time-keeping TAL of each record has no description and is dropped.
pub fn parse_tals(raw: &[u8]) -> Vec<EdfAnnotation> {
    let mut out = Vec::new();
    for tal in raw.split(|&b| b == 0).filter(|t| !t.is_empty()) {
        let mut parts = tal.split(|&b| b == TAL_SEPARATOR);
        let Some(timing) = parts.next() else {
            continue;
        };
        let mut timing = timing.split(|&b| b == TAL_DURATION);
        let Some(onset_secs) = timing.next().and_then(parse_ascii_number) else {
            tracing::debug!("skipping TAL with unreadable onset");
            continue;
        };
        let duration_secs = timing.next().and_then(parse_ascii_number);

        for text in parts.filter(|p| !p.is_empty()) {
            out.push(EdfAnnotation {
                onset_secs,
                duration_secs,
                description: String::from_utf8_lossy(text).trim().to_string(),
            });
        }
    }
    out
}

fn parse_ascii_number(bytes: &[u8]) -> Option<f64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

fn ascii_field(cursor: &mut ByteCursor<'_>, width: usize) -> Result<String, ImportError> {
    let raw = cursor.read_bytes(width)?;
    Ok(String::from_utf8_lossy(raw).trim().to_string())
}

fn numeric_field<T: std::str::FromStr>(
    cursor: &mut ByteCursor<'_>,
    width: usize,
    name: &str,
) -> Result<T, ImportError> {
    let text = ascii_field(cursor, width)?;
    text.parse().map_err(|_| malformed(name, text))
}

fn column(cursor: &mut ByteCursor<'_>, count: usize, width: usize) -> Result<Vec<String>, ImportError> {
    (0..count).map(|_| ascii_field(cursor, width)).collect()
}

fn numeric_column<T: std::str::FromStr>(
    cursor: &mut ByteCursor<'_>,
    count: usize,
    name: &str,
) -> Result<Vec<T>, ImportError> {
    (0..count).map(|_| numeric_field(cursor, 8, name)).collect()
}

fn malformed(field: &str, value: String) -> ImportError {
    IntegrityError::MalformedEdfField {
        field: field.to_string(),
        value,
    }
    .into()
}
