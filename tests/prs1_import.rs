//! End-to-end import of a synthetic PRS1 card

use std::f64::consts::PI;
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use pretty_assertions::assert_eq;

use cpap_flux::adapters::prs1::header::{ChannelLayout, SampleFormat};
use cpap_flux::adapters::prs1::{DataChunk, FileKind, HeaderKind, HeaderRecord, SignalLayout};
use cpap_flux::encoder::ReportEncoder;
use cpap_flux::types::{signal_names, EventSource, EventType};
use cpap_flux::{import_directory, ErrorClass, PipelineConfig};

const SESSION_SECS: u16 = 1200;

fn night_one() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap()
}

fn night_two() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 2, 22, 30, 0).unwrap()
}

fn header(session: u32, file_kind: FileKind, timestamp: DateTime<Utc>) -> HeaderRecord {
    HeaderRecord {
        format_version: 2,
        block_length: 0,
        kind: HeaderKind::Standard,
        family: 0,
        family_version: 4,
        file_kind,
        session_number: session,
        timestamp,
        layout: None,
    }
}

/// Settings, then one mask-on/mask-off pair `secs` apart
fn summary_file(session: u32, start: DateTime<Utc>, secs: u16) -> Vec<u8> {
    let mut payload = vec![0x00];
    payload.extend_from_slice(&[0u8; 24]);
    payload.extend_from_slice(&[0x02, 0, 0, 0, 0, 0, 0, 0]);
    payload.push(0x03);
    payload.extend_from_slice(&secs.to_le_bytes());
    payload.extend_from_slice(&[0u8; 34]);
    DataChunk::encode(header(session, FileKind::Summary, start), &payload)
}

/// Leak statistics with a 120 s excursion to 40 L/min and two apneas
fn events_file(session: u32, start: DateTime<Utc>) -> Vec<u8> {
    let payload: &[u8] = &[
        0x11, 0, 0, 10, 0, 80, // t0: leak 10
        0x11, 0x2c, 0x01, 40, 0, 80, // t0 + 300: leak 40
        0x11, 120, 0, 10, 0, 80, // t0 + 420: leak 10
        0x06, 180, 0, 10, // obstructive apnea at t0 + 590
        0x06, 0x2c, 0x01, 10, // obstructive apnea at t0 + 890
        0x11, 0x2c, 0x01, 10, 0, 80, // t0 + 1200
    ];
    DataChunk::encode(header(session, FileKind::Events, start), payload)
}

/// Sine breathing with a 4 s period at 5 Hz
fn waveform_file(session: u32, start: DateTime<Utc>, secs: u16) -> Vec<u8> {
    let mut h = header(session, FileKind::Waveform, start);
    h.kind = HeaderKind::Signal;
    h.layout = Some(SignalLayout {
        interval_count: secs,
        interval_secs: 1,
        channels: vec![ChannelLayout {
            format: SampleFormat::SignedByte,
            interleave: 5,
        }],
    });
    let payload: Vec<u8> = (0..secs as usize * 5)
        .map(|i| {
            let t = i as f64 / 5.0;
            (30.0 * (2.0 * PI * t / 4.0).sin()).round() as i8 as u8
        })
        .collect();
    DataChunk::encode(h, &payload)
}

fn write_card(root: &Path) {
    let card = root.join("P-Series").join("P8675309");
    let p0 = card.join("p0");
    std::fs::create_dir_all(&p0).unwrap();
    std::fs::write(
        card.join("PROP.TXT"),
        "SerialNumber=P8675309\nModelNumber=560P\nFamily=0\nFamilyVersion=4\nDataFormatVersion=2\n",
    )
    .unwrap();

    std::fs::write(p0.join("0000000001.001"), summary_file(1, night_one(), SESSION_SECS)).unwrap();
    std::fs::write(p0.join("0000000001.002"), events_file(1, night_one())).unwrap();
    std::fs::write(p0.join("0000000001.005"), waveform_file(1, night_one(), SESSION_SECS)).unwrap();

    std::fs::write(p0.join("0000000002.001"), summary_file(2, night_two(), 3600)).unwrap();

    let mut corrupt = events_file(3, night_two() + Duration::hours(2));
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0x5a;
    std::fs::write(p0.join("0000000003.002"), corrupt).unwrap();
}

#[test]
fn test_full_card_import() {
    let dir = tempfile::tempdir().unwrap();
    write_card(dir.path());

    let outcome = import_directory(dir.path(), &PipelineConfig::default()).unwrap();

    let device = outcome.device.as_ref().unwrap();
    assert_eq!(device.serial_number, "P8675309");
    assert_eq!(device.model_number, "560P");

    assert_eq!(outcome.skipped.len(), 1);
    assert!(outcome.skipped[0].path.ends_with("0000000003.002"));

    let dates: Vec<NaiveDate> = outcome.reports.iter().map(|r| r.date).collect();
    assert_eq!(
        dates,
        vec![
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
        ]
    );

    let first = &outcome.reports[0];
    assert_eq!(first.sessions.len(), 1);
    let session = &first.sessions[0];
    assert_eq!(session.id, 1);
    assert_eq!(session.start, night_one());
    assert_eq!(session.end, night_one() + Duration::seconds(SESSION_SECS as i64));

    for signal in &session.signals {
        assert!(
            signal.start >= session.start && signal.end <= session.end,
            "{} outside session",
            signal.name
        );
    }

    let rr = first.statistics_for(signal_names::RESPIRATION_RATE).unwrap();
    assert!((rr.median - 15.0).abs() < 0.5, "{rr:?}");
    let tv = first.statistics_for(signal_names::TIDAL_VOLUME).unwrap();
    assert!(tv.median > 0.0);

    let apneas = first
        .events
        .iter()
        .filter(|e| e.event_type == EventType::ObstructiveApnea)
        .count();
    assert_eq!(apneas, 2);
    assert!((first.ahi() - 6.0).abs() < 1e-9);

    let leaks: Vec<_> = first
        .events
        .iter()
        .filter(|e| e.event_type == EventType::LargeLeak)
        .collect();
    assert_eq!(leaks.len(), 1);
    assert_eq!(leaks[0].source, EventSource::Generated);
    assert!((leaks[0].duration_secs - 120.0).abs() < 2.0, "{:?}", leaks[0]);

    assert!(first
        .events
        .iter()
        .all(|e| e.event_type != EventType::FlowReduction));

    let second = &outcome.reports[1];
    assert_eq!(second.sessions[0].id, 2);
    assert!(second.events.is_empty());
    assert!((second.usage_hours() - 1.0).abs() < 1e-9);
}

#[test]
fn test_strict_import_fails_on_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    write_card(dir.path());

    let mut config = PipelineConfig::default();
    config.import.skip_corrupt_files = false;
    let err = import_directory(dir.path(), &config).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Corrupt);
    assert!(err.to_string().contains("0000000003.002"));
}

#[test]
fn test_envelope_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write_card(dir.path());
    let outcome = import_directory(dir.path(), &PipelineConfig::default()).unwrap();

    let json = ReportEncoder::new().encode_to_json(&outcome, true).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["device"]["serial"], "P8675309");
    assert_eq!(value["summaries"][0]["date"], "2024-03-01");
    assert_eq!(value["reports"].as_array().unwrap().len(), 2);
    assert_eq!(value["skipped_files"].as_array().unwrap().len(), 1);
}
