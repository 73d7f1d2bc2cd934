//! Event chunk (`.002`) records.
//!
//! Each record is `code u8, delta u16, payload`. The delta is added to a
//! running timestamp (starting at the chunk timestamp) before the payload is
//! interpreted. Events carry an "elapsed" byte: the device logs them after
//! the fact, so their start is the running timestamp minus that many seconds.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::chunk::DataChunk;
use super::cursor::ByteCursor;
use super::header::FileKind;
use crate::error::{ImportError, ProtocolError};
use crate::types::{signal_names, EventType, ReportedEvent};

/// Scale of pressure bytes, cmH2O per unit
const PRESSURE_SCALE: f64 = 0.1;

/// Long events store their duration in units of two seconds
const LONG_DURATION_SCALE: f64 = 2.0;

/// Periodic values reported alongside the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticKind {
    Pressure,
    Epap,
    LeakRate,
    SnoreCount,
}

impl StatisticKind {
    /// Canonical name of the signal built from these samples
    pub fn signal_name(&self) -> &'static str {
        match self {
            StatisticKind::Pressure => signal_names::PRESSURE,
            StatisticKind::Epap => signal_names::EPAP,
            StatisticKind::LeakRate => signal_names::LEAK_RATE,
            StatisticKind::SnoreCount => signal_names::SNORE_COUNT,
        }
    }

    /// Declared `(min, max)` of the resulting signal
    pub fn range(&self) -> (f64, f64) {
        match self {
            StatisticKind::Pressure | StatisticKind::Epap => (0.0, 25.5),
            StatisticKind::LeakRate => (0.0, 255.0),
            StatisticKind::SnoreCount => (0.0, 255.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticSample {
    pub kind: StatisticKind,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Decoded contents of one event chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecords {
    pub events: Vec<ReportedEvent>,
    pub statistics: Vec<StatisticSample>,
}

impl EventRecords {
    /// Decode one event chunk.
    pub fn decode(chunk: &DataChunk) -> Result<Self, ImportError> {
        chunk.expect_kind(FileKind::Events)?;

        let mut out = EventRecords::default();
        let mut cursor = ByteCursor::new(&chunk.payload);
        let mut now = chunk.header.timestamp;

        while !cursor.is_empty() {
            let offset = cursor.position();
            let code = cursor.read_u8()?;
            now += Duration::seconds(cursor.read_u16_le()? as i64);

            match code {
                0x01 => {
                    let pressure = read_pressure(&mut cursor)?;
                    out.statistic(StatisticKind::Pressure, now, pressure);
                }
                0x02 => {
                    let epap = read_pressure(&mut cursor)?;
                    let ipap = read_pressure(&mut cursor)?;
                    out.statistic(StatisticKind::Epap, now, epap);
                    out.statistic(StatisticKind::Pressure, now, ipap);
                }
                // opti-start and pressure pulse carry nothing we keep
                0x03 | 0x04 => cursor.skip(1)?,
                0x05 => out.elapsed_event(&mut cursor, EventType::Rera, now)?,
                0x06 => out.elapsed_event(&mut cursor, EventType::ObstructiveApnea, now)?,
                0x07 => out.elapsed_event(&mut cursor, EventType::ClearAirway, now)?,
                0x0a => out.elapsed_event(&mut cursor, EventType::Hypopnea, now)?,
                0x0b => {
                    let duration = cursor.read_u8()? as f64;
                    let elapsed = cursor.read_u8()?;
                    out.events.push(ReportedEvent::new(
                        EventType::Hypopnea,
                        now - Duration::seconds(elapsed as i64),
                        duration,
                    ));
                }
                0x0c => out.elapsed_event(&mut cursor, EventType::FlowLimitation, now)?,
                0x0d => out
                    .events
                    .push(ReportedEvent::new(EventType::VibratorySnore, now, 0.0)),
                0x0e => out.long_event(&mut cursor, EventType::VariableBreathing, now)?,
                0x0f => out.long_event(&mut cursor, EventType::PeriodicBreathing, now)?,
                0x10 => out.long_event(&mut cursor, EventType::LargeLeak, now)?,
                0x11 => {
                    let leak = cursor.read_u8()? as f64;
                    let snore = cursor.read_u8()? as f64;
                    let pressure = read_pressure(&mut cursor)?;
                    out.statistic(StatisticKind::LeakRate, now, leak);
                    out.statistic(StatisticKind::SnoreCount, now, snore);
                    out.statistic(StatisticKind::Pressure, now, pressure);
                }
                0x12 => cursor.skip(2)?,
                other => {
                    return Err(ProtocolError::UnknownEventCode {
                        code: other,
                        offset,
                    }
                    .into())
                }
            }
        }

        Ok(out)
    }

    fn statistic(&mut self, kind: StatisticKind, timestamp: DateTime<Utc>, value: f64) {
        self.statistics.push(StatisticSample {
            kind,
            timestamp,
            value,
        });
    }

    fn elapsed_event(
        &mut self,
        cursor: &mut ByteCursor<'_>,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> Result<(), ImportError> {
        let elapsed = cursor.read_u8()?;
        self.events.push(ReportedEvent::new(
            event_type,
            now - Duration::seconds(elapsed as i64),
            0.0,
        ));
        Ok(())
    }

    fn long_event(
        &mut self,
        cursor: &mut ByteCursor<'_>,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> Result<(), ImportError> {
        let duration = cursor.read_u16_le()? as f64 * LONG_DURATION_SCALE;
        let elapsed = cursor.read_u8()?;
        self.events.push(ReportedEvent::new(
            event_type,
            now - Duration::seconds(elapsed as i64),
            duration,
        ));
        Ok(())
    }

    /// Append another chunk's records, keeping chronological order.
    pub fn extend(&mut self, other: EventRecords) {
        self.events.extend(other.events);
        self.statistics.extend(other.statistics);
        self.events.sort_by_key(|e| e.start);
        self.statistics.sort_by_key(|s| s.timestamp);
    }
}

fn read_pressure(cursor: &mut ByteCursor<'_>) -> Result<f64, ImportError> {
    Ok(cursor.read_u8()? as f64 * PRESSURE_SCALE)
}
