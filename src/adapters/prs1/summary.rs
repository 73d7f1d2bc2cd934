//! Summary chunk (`.001`) lifecycle records.
//!
//! Records are `(code, ...)`. "Equipment On" carries the settings block and
//! is stamped with the chunk timestamp; every other record starts with a
//! u16 delta in seconds that advances the running timestamp.
//!
//! | Code | Record | Bytes after the delta |
//! |---|---|---|
//! | 0x00 | Equipment On | 24-byte settings block (no delta) |
//! | 0x01 | Equipment Off | 5 |
//! | 0x02 | Mask On | 5, humidifier settings first |
//! | 0x03 | Mask Off | 34 usage statistics |
//! | 0x04 | Time elapsed | 0 |
//! | 0x07 | Humidifier changed | 2 |
//! | 0x08 | Settings checkpoint | 9, humidifier settings first |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::chunk::DataChunk;
use super::cursor::ByteCursor;
use super::header::FileKind;
use super::settings::{HumidifierSettings, Prs1Settings};
use crate::error::{ImportError, ProtocolError};
use crate::types::{Session, SourceType};

const EQUIPMENT_ON: u8 = 0x00;
const EQUIPMENT_OFF: u8 = 0x01;
const MASK_ON: u8 = 0x02;
const MASK_OFF: u8 = 0x03;
const TIME_ELAPSED: u8 = 0x04;
const HUMIDIFIER_CHANGED: u8 = 0x07;
const SETTINGS_CHECKPOINT: u8 = 0x08;

const EQUIPMENT_OFF_LEN: usize = 5;
const MASK_ON_TRAILER_LEN: usize = 3;
const MASK_OFF_STATS_LEN: usize = 34;
const CHECKPOINT_TRAILER_LEN: usize = 7;

/// One mask-on to mask-off interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Everything a summary chunk says about one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub session_number: u32,
    pub settings: Option<Prs1Settings>,
    pub equipment_on: Option<DateTime<Utc>>,
    pub equipment_off: Option<DateTime<Utc>>,
    pub mask_intervals: Vec<MaskInterval>,
    pub humidifier_changes: Vec<(DateTime<Utc>, HumidifierSettings)>,
}

impl SummaryRecord {
    /// Decode one summary chunk.
    pub fn decode(chunk: &DataChunk) -> Result<Self, ImportError> {
        chunk.expect_kind(FileKind::Summary)?;

        let mut record = SummaryRecord {
            session_number: chunk.header.session_number,
            settings: None,
            equipment_on: None,
            equipment_off: None,
            mask_intervals: Vec::new(),
            humidifier_changes: Vec::new(),
        };

        let mut cursor = ByteCursor::new(&chunk.payload);
        let mut now = chunk.header.timestamp;
        let mut open_mask: Option<DateTime<Utc>> = None;

        while !cursor.is_empty() {
            let offset = cursor.position();
            let code = cursor.read_u8()?;

            if code == EQUIPMENT_ON {
                record.settings = Some(Prs1Settings::decode(&mut cursor)?);
                record.equipment_on = Some(now);
                continue;
            }

            now += Duration::seconds(cursor.read_u16_le()? as i64);
            match code {
                EQUIPMENT_OFF => {
                    cursor.skip(EQUIPMENT_OFF_LEN)?;
                    record.equipment_off = Some(now);
                }
                MASK_ON => {
                    let humidifier = HumidifierSettings::decode(&mut cursor)?;
                    cursor.skip(MASK_ON_TRAILER_LEN)?;
                    if open_mask.is_some() {
                        return Err(ProtocolError::MaskAlreadyOn(now.to_rfc3339()).into());
                    }
                    open_mask = Some(now);
                    record.humidifier_changes.push((now, humidifier));
                }
                MASK_OFF => {
                    cursor.skip(MASK_OFF_STATS_LEN)?;
                    let start = open_mask
                        .take()
                        .ok_or_else(|| ProtocolError::MaskNotOn(now.to_rfc3339()))?;
                    record.mask_intervals.push(MaskInterval { start, end: now });
                }
                TIME_ELAPSED => {}
                HUMIDIFIER_CHANGED => {
                    let humidifier = HumidifierSettings::decode(&mut cursor)?;
                    record.humidifier_changes.push((now, humidifier));
                }
                SETTINGS_CHECKPOINT => {
                    let humidifier = HumidifierSettings::decode(&mut cursor)?;
                    cursor.skip(CHECKPOINT_TRAILER_LEN)?;
                    record.humidifier_changes.push((now, humidifier));
                }
                other => {
                    return Err(ProtocolError::UnknownSummaryCode {
                        code: other,
                        offset,
                    }
                    .into())
                }
            }
        }

        if let Some(start) = open_mask {
            return Err(ProtocolError::UnclosedMaskInterval(start.to_rfc3339()).into());
        }

        Ok(record)
    }

    /// Merge every mask interval into one session spanning the first start
    /// to the last end. `None` when the mask was never worn.
    pub fn to_session(&self) -> Option<Session> {
        let start = self.mask_intervals.iter().map(|m| m.start).min()?;
        let end = self.mask_intervals.iter().map(|m| m.end).max()?;
        let mut session = Session::new(self.session_number as u64, start, end, SourceType::Cpap);
        session.settings = self.settings.as_ref().map(Prs1Settings::to_session_settings);
        Some(session)
    }

    /// Seconds of actual mask wear, excluding pauses between intervals
    pub fn mask_secs(&self) -> f64 {
        self.mask_intervals
            .iter()
            .map(|m| (m.end - m.start).num_seconds() as f64)
            .sum()
    }
}
