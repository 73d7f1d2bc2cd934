//! PRS1 card layout.
//!
//! A card holds one `PROP.TXT` plus, per recorded session, files named by the
//! zero-padded session number: `.001` summary, `.002` events, `.005` waveform.
//! They may sit in nested `pN/` directories.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::chunk::DataChunk;
use super::events::{EventRecords, StatisticKind, StatisticSample};
use super::header::FileKind;
use super::properties::{DeviceProperties, PROPERTIES_FILE};
use super::summary::SummaryRecord;
use super::waveform;
use crate::adapters::{collect_files, DeviceImport, LoadContext, SkippedFile};
use crate::error::ImportError;
use crate::types::{secs_between, ImportedSession, Session, Signal, SourceType};

/// Output cadence of signals built from periodic statistic records
pub const STATISTIC_INTERVAL_SECS: f64 = 2.0;

/// Files of one session, in path order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionFiles {
    pub summary: Vec<PathBuf>,
    pub events: Vec<PathBuf>,
    pub waveforms: Vec<PathBuf>,
}

/// Card contents before decoding
#[derive(Debug, Clone, Default)]
pub struct CardIndex {
    pub properties: Option<PathBuf>,
    pub sessions: BTreeMap<u32, SessionFiles>,
}

impl CardIndex {
    pub fn scan(root: &Path) -> Result<Self, ImportError> {
        let mut index = CardIndex::default();
        for path in collect_files(root)? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.eq_ignore_ascii_case(PROPERTIES_FILE) {
                index.properties.get_or_insert(path);
                continue;
            }
            let Some((number, kind)) = classify(&path) else {
                tracing::trace!(path = %path.display(), "ignoring file");
                continue;
            };
            let files = index.sessions.entry(number).or_default();
            match kind {
                FileKind::Summary => files.summary.push(path),
                FileKind::Events => files.events.push(path),
                FileKind::Waveform => files.waveforms.push(path),
            }
        }
        Ok(index)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_none() && self.sessions.is_empty()
    }
}

/// Session number and file kind from a `0000000042.002` style name
pub fn classify(path: &Path) -> Option<(u32, FileKind)> {
    let stem = path.file_stem()?.to_str()?;
    let number = stem.parse::<u32>().ok()?;
    let kind = match path.extension()?.to_str()? {
        "001" => FileKind::Summary,
        "002" => FileKind::Events,
        "005" => FileKind::Waveform,
        _ => return None,
    };
    Some((number, kind))
}

/// Decode every session on a PRS1 card.
pub fn load_card(root: &Path, ctx: &LoadContext<'_>) -> Result<DeviceImport, ImportError> {
    let index = CardIndex::scan(root)?;

    let device = match &index.properties {
        Some(path) => Some(DeviceProperties::parse(&std::fs::read_to_string(path)?).to_device_info()),
        None => {
            tracing::warn!(root = %root.display(), "no {PROPERTIES_FILE} on card");
            None
        }
    };

    let mut skipped = Vec::new();
    let mut sessions = Vec::new();
    for (&number, files) in &index.sessions {
        ctx.cancel.check()?;
        if let Some(session) = load_session(number, files, ctx, &mut skipped)? {
            sessions.push(session);
        }
    }

    tracing::info!(
        sessions = sessions.len(),
        skipped = skipped.len(),
        "loaded PRS1 card"
    );
    Ok(DeviceImport {
        device,
        sessions,
        skipped,
    })
}

/// Decode one session's files; `None` when nothing usable remains.
pub fn load_session(
    number: u32,
    files: &SessionFiles,
    ctx: &LoadContext<'_>,
    skipped: &mut Vec<SkippedFile>,
) -> Result<Option<ImportedSession>, ImportError> {
    let mut summary: Option<SummaryRecord> = None;
    for path in &files.summary {
        ctx.cancel.check()?;
        let decoded = decode_file(path, ctx, skipped, |chunks| {
            chunks.iter().map(SummaryRecord::decode).collect::<Result<Vec<_>, _>>()
        })?;
        for record in decoded.into_iter().flatten() {
            summary = Some(match summary.take() {
                None => record,
                Some(mut merged) => {
                    merged.mask_intervals.extend(record.mask_intervals);
                    merged.humidifier_changes.extend(record.humidifier_changes);
                    merged.settings = record.settings.or(merged.settings);
                    merged.equipment_on = merged.equipment_on.or(record.equipment_on);
                    merged.equipment_off = record.equipment_off.or(merged.equipment_off);
                    merged
                }
            });
        }
    }

    let mut records = EventRecords::default();
    for path in &files.events {
        ctx.cancel.check()?;
        let decoded = decode_file(path, ctx, skipped, |chunks| {
            chunks.iter().map(EventRecords::decode).collect::<Result<Vec<_>, _>>()
        })?;
        for chunk_records in decoded.into_iter().flatten() {
            records.extend(chunk_records);
        }
    }

    let mut waveform_chunks = Vec::new();
    for path in &files.waveforms {
        ctx.cancel.check()?;
        if let Some(chunks) = decode_file(path, ctx, skipped, |chunks| Ok(chunks.to_vec()))? {
            waveform_chunks.extend(chunks);
        }
    }
    let flow = match waveform::reassemble(&waveform_chunks) {
        Ok(flow) => flow,
        Err(err) => {
            let path = files.waveforms.first().map(PathBuf::as_path).unwrap_or(Path::new(""));
            ctx.skip_or_fail(path, err, skipped)?;
            None
        }
    };

    let session = summary.as_ref().and_then(SummaryRecord::to_session).or_else(|| {
        flow.as_ref()
            .map(|f| Session::new(number as u64, f.start, f.end, SourceType::Cpap))
    });
    let Some(mut session) = session else {
        tracing::debug!(session = number, "no mask time or waveform, dropping session");
        return Ok(None);
    };

    if let Some(flow) = flow {
        session.add_signal(flow);
    }
    for kind in [
        StatisticKind::Pressure,
        StatisticKind::Epap,
        StatisticKind::LeakRate,
        StatisticKind::SnoreCount,
    ] {
        let samples: Vec<_> = records.statistics.iter().filter(|s| s.kind == kind).copied().collect();
        if let Some(signal) = step_signal(kind, &samples, session.end) {
            session.add_signal(signal);
        }
    }

    tracing::debug!(
        session = number,
        start = %session.start,
        signals = session.signals.len(),
        events = records.events.len(),
        "decoded PRS1 session"
    );
    Ok(Some(ImportedSession {
        session,
        events: records.events,
    }))
}

/// Read and frame a file, then decode its chunks. Corrupt files are recorded
/// in `skipped` and yield `None` when the policy allows it.
fn decode_file<T>(
    path: &Path,
    ctx: &LoadContext<'_>,
    skipped: &mut Vec<SkippedFile>,
    decode: impl FnOnce(&[DataChunk]) -> Result<T, ImportError>,
) -> Result<Option<T>, ImportError> {
    let bytes = std::fs::read(path)?;
    match DataChunk::read_all(&bytes).and_then(|chunks| decode(&chunks)) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            ctx.skip_or_fail(path, err, skipped)?;
            Ok(None)
        }
    }
}

/// Hold each statistic value until the next one, sampled every
/// [`STATISTIC_INTERVAL_SECS`] up to `until`.
pub fn step_signal(
    kind: StatisticKind,
    samples: &[StatisticSample],
    until: DateTime<Utc>,
) -> Option<Signal> {
    let first = samples.first()?;
    let start = first.timestamp;
    let end = until.max(samples.last()?.timestamp);
    let ticks = ((secs_between(start, end) / STATISTIC_INTERVAL_SECS).floor() as usize).max(1);

    let mut values = Vec::with_capacity(ticks);
    let mut next = 0;
    let mut current = first.value;
    for tick in 0..ticks {
        let offset = tick as f64 * STATISTIC_INTERVAL_SECS;
        while next < samples.len() && secs_between(start, samples[next].timestamp) <= offset {
            current = samples[next].value;
            next += 1;
        }
        values.push(current);
    }

    let (min, max) = kind.range();
    Some(Signal::new(
        kind.signal_name(),
        1.0 / STATISTIC_INTERVAL_SECS,
        min,
        max,
        start,
        values,
    ))
}
