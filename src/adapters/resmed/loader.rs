//! ResMed card layout.
//!
//! `DATALOG/<yyyymmdd>/` holds one set of EDF files per session, named
//! `<yyyymmdd>_<hhmmss>_<KIND>.edf`: `BRP` (high-rate flow and pressure),
//! `PLD` (low-rate leak, pressure, flow limitation), `SAD` (oximetry) and
//! `EVE` (annotated events). `Identification.tgt` at the card root names the
//! device.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::edf::{EdfAnnotation, EdfFile};
use crate::adapters::{collect_files, DeviceImport, LoadContext};
use crate::error::ImportError;
use crate::types::{
    duration_from_secs, signal_names, DeviceFamily, DeviceInfo, EventType, ImportedSession,
    ReportedEvent, Session, Signal, SourceType,
};

pub const IDENTIFICATION_FILE: &str = "Identification.tgt";

/// Session file kinds in load order; earlier kinds win when two files carry
/// the same canonical signal
pub const FILE_KINDS: &[&str] = &["BRP", "PLD", "SAD", "EVE"];

/// ResMed records flow and leak in L/s
const LITRES_PER_SECOND_TO_PER_MINUTE: f64 = 60.0;

/// Canonical name and scale for an EDF signal label.
pub fn canonical_signal(label: &str) -> Option<(&'static str, f64)> {
    let label = label.to_ascii_lowercase();
    let mapped = if label.starts_with("ffl") || label.starts_with("flowlim") || label.starts_with("flow lim") {
        (signal_names::FLOW_LIMIT, 1.0)
    } else if label.starts_with("flow") {
        (signal_names::FLOW_RATE, LITRES_PER_SECOND_TO_PER_MINUTE)
    } else if label.starts_with("leak") {
        (signal_names::LEAK_RATE, LITRES_PER_SECOND_TO_PER_MINUTE)
    } else if label.starts_with("epap") || label.starts_with("eprpress") {
        (signal_names::EPAP, 1.0)
    } else if label.contains("press") {
        (signal_names::PRESSURE, 1.0)
    } else if label.starts_with("snore") {
        (signal_names::SNORE_COUNT, 1.0)
    } else if label.starts_with("spo2") {
        (signal_names::SPO2, 1.0)
    } else if label.starts_with("pulse") {
        (signal_names::PULSE, 1.0)
    } else {
        return None;
    };
    Some(mapped)
}

/// Event type for an annotation description.
pub fn annotation_event(description: &str) -> Option<EventType> {
    let text = description.to_ascii_lowercase();
    if text.contains("obstructive") {
        Some(EventType::ObstructiveApnea)
    } else if text.contains("central") {
        Some(EventType::ClearAirway)
    } else if text.contains("hypopnea") {
        Some(EventType::Hypopnea)
    } else if text.contains("apnea") {
        Some(EventType::UnclassifiedApnea)
    } else if text.contains("arousal") || text.contains("rera") {
        Some(EventType::Rera)
    } else {
        None
    }
}

/// `#SRN`, `#PNA` and `#PCD` lines of `Identification.tgt`
pub fn parse_identification(text: &str) -> DeviceInfo {
    let mut info = DeviceInfo {
        family: DeviceFamily::Resmed,
        model_number: String::new(),
        product_name: String::new(),
        serial_number: String::new(),
    };
    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once(char::is_whitespace) else {
            continue;
        };
        let value = value.trim();
        match key {
            "#SRN" => info.serial_number = value.to_string(),
            "#PNA" => info.product_name = value.replace('_', " "),
            "#PCD" => info.model_number = value.to_string(),
            _ => {}
        }
    }
    info
}

/// `(prefix, kind)` from `20240210_230000_BRP.edf`
pub fn classify(path: &Path) -> Option<(String, &'static str)> {
    if !path.extension()?.to_str()?.eq_ignore_ascii_case("edf") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (prefix, kind) = stem.rsplit_once('_')?;
    let kind = *FILE_KINDS.iter().find(|k| k.eq_ignore_ascii_case(kind))?;
    Some((prefix.to_string(), kind))
}

/// Decode every session on a ResMed card.
pub fn load_card(root: &Path, ctx: &LoadContext<'_>) -> Result<DeviceImport, ImportError> {
    let mut device = None;
    let mut groups: BTreeMap<String, Vec<(usize, PathBuf)>> = BTreeMap::new();
    for path in collect_files(root)? {
        let is_identification = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.eq_ignore_ascii_case(IDENTIFICATION_FILE));
        if is_identification {
            device = Some(parse_identification(&std::fs::read_to_string(&path)?));
            continue;
        }
        if let Some((prefix, kind)) = classify(&path) {
            let order = FILE_KINDS.iter().position(|k| *k == kind).unwrap_or(FILE_KINDS.len());
            groups.entry(prefix).or_default().push((order, path));
        }
    }

    let mut skipped = Vec::new();
    let mut sessions = Vec::new();
    for (prefix, mut files) in groups {
        files.sort();
        let mut decoded = Vec::with_capacity(files.len());
        for (_, path) in files {
            ctx.cancel.check()?;
            let bytes = std::fs::read(&path)?;
            match EdfFile::parse(&bytes) {
                Ok(edf) => decoded.push(edf),
                Err(err) => ctx.skip_or_fail(&path, err, &mut skipped)?,
            }
        }
        match build_session(&decoded) {
            Some(session) => sessions.push(session),
            None => tracing::debug!(prefix = %prefix, "no usable EDF data in session"),
        }
    }

    tracing::info!(
        sessions = sessions.len(),
        skipped = skipped.len(),
        "loaded ResMed card"
    );
    Ok(DeviceImport {
        device,
        sessions,
        skipped,
    })
}

/// Merge the EDF files of one session prefix.
pub fn build_session(files: &[EdfFile]) -> Option<ImportedSession> {
    let start = files.iter().map(|f| f.header.start).min()?;
    let end = files
        .iter()
        .map(|f| f.header.start + duration_from_secs(f.header.duration_secs()))
        .max()?;
    let mut session = Session::new(start.timestamp() as u64, start, end, SourceType::Cpap);
    let mut events = Vec::new();

    for file in files {
        for (index, param) in file.header.signals.iter().enumerate() {
            if param.is_annotation() {
                continue;
            }
            let Some((name, scale)) = canonical_signal(&param.label) else {
                tracing::debug!(label = %param.label, "skipping unmapped EDF signal");
                continue;
            };
            if session.signal(name).is_some() {
                continue;
            }
            let Some(frequency) = file.header.frequency_hz(index).filter(|f| *f > 0.0) else {
                continue;
            };
            let samples: Vec<f64> = file.samples[index].iter().map(|v| v * scale).collect();
            if samples.is_empty() {
                continue;
            }
            session.add_signal(Signal::new(
                name,
                frequency,
                param.physical_min * scale,
                param.physical_max * scale,
                file.header.start,
                samples,
            ));
        }
        events.extend(file.annotations.iter().filter_map(|a| to_event(file, a)));
    }

    events.sort_by_key(|e: &ReportedEvent| e.start);
    Some(ImportedSession { session, events })
}

fn to_event(file: &EdfFile, annotation: &EdfAnnotation) -> Option<ReportedEvent> {
    let event_type = annotation_event(&annotation.description)?;
    Some(ReportedEvent::new(
        event_type,
        file.header.start + duration_from_secs(annotation.onset_secs),
        annotation.duration_secs.unwrap_or(0.0),
    ))
}
