//! Core types for the cpap-flux pipeline
//!
//! This module defines the entities that flow through each stage of the
//! pipeline: decoded sessions and their signals, device-reported and generated
//! events, detected breaths, and the per-day reports handed to storage.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Canonical signal names shared by every device family
pub mod signal_names {
    pub const FLOW_RATE: &str = "FlowRate";
    pub const PRESSURE: &str = "Pressure";
    pub const EPAP: &str = "EPAP";
    pub const LEAK_RATE: &str = "LeakRate";
    pub const SNORE_COUNT: &str = "SnoreCount";
    pub const FLOW_LIMIT: &str = "FlowLimit";
    pub const SPO2: &str = "SpO2";
    pub const PULSE: &str = "Pulse";
    pub const RESPIRATION_RATE: &str = "RespirationRate";
    pub const TIDAL_VOLUME: &str = "TidalVolume";
    pub const MINUTE_VENTILATION: &str = "MinuteVent";
    pub const INSPIRATION_TIME: &str = "InspirationTime";
    pub const EXPIRATION_TIME: &str = "ExpirationTime";
    pub const IE_RATIO: &str = "IERatio";
    pub const AHI: &str = "AHI";
}

/// Device family a recording was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    Prs1,
    Resmed,
}

impl DeviceFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFamily::Prs1 => "prs1",
            DeviceFamily::Resmed => "resmed",
        }
    }
}

/// Kind of equipment that produced a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Cpap,
    PulseOximeter,
    HealthApi,
}

/// Event classification (vendor-agnostic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ObstructiveApnea,
    ClearAirway,
    UnclassifiedApnea,
    Hypopnea,
    Rera,
    FlowLimitation,
    FlowReduction,
    LargeLeak,
    VibratorySnore,
    VariableBreathing,
    PeriodicBreathing,
    Desaturation,
    Hypoxemia,
}

impl EventType {
    /// Events counted toward the apnea-hypopnea index.
    pub fn is_apnea_family(&self) -> bool {
        matches!(
            self,
            EventType::ObstructiveApnea
                | EventType::ClearAirway
                | EventType::UnclassifiedApnea
                | EventType::Hypopnea
        )
    }

    /// Events counted toward the respiratory disturbance index.
    pub fn is_respiratory_disturbance(&self) -> bool {
        self.is_apnea_family() || matches!(self, EventType::Rera)
    }
}

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Reported by the device in its event log
    Device,
    /// Synthesized by a threshold generator
    Generated,
}

/// A timed event within a day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedEvent {
    pub event_type: EventType,
    pub start: DateTime<Utc>,
    /// Duration in seconds (>= 0)
    pub duration_secs: f64,
    pub source: EventSource,
}

impl ReportedEvent {
    pub fn new(event_type: EventType, start: DateTime<Utc>, duration_secs: f64) -> Self {
        Self {
            event_type,
            start,
            duration_secs: duration_secs.max(0.0),
            source: EventSource::Device,
        }
    }

    pub fn generated(event_type: EventType, start: DateTime<Utc>, duration_secs: f64) -> Self {
        Self {
            source: EventSource::Generated,
            ..Self::new(event_type, start, duration_secs)
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + duration_from_secs(self.duration_secs)
    }

    /// Inclusive overlap test against `[start, end]`; zero-length events count
    /// when they fall inside the range.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= end && self.end() >= start
    }
}

/// Runs of exact zeros at least this long are padding where the recording
/// paused, not measured values
pub const PADDING_MIN_SECS: f64 = 30.0;

/// A uniformly sampled physiological signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub frequency_hz: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub samples: Vec<f64>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Signal {
    /// Build a signal whose end is derived from its sample count.
    pub fn new(
        name: impl Into<String>,
        frequency_hz: f64,
        min_value: f64,
        max_value: f64,
        start: DateTime<Utc>,
        samples: Vec<f64>,
    ) -> Self {
        let end = start + duration_from_secs(samples.len() as f64 / frequency_hz);
        Self {
            name: name.into(),
            frequency_hz,
            min_value,
            max_value,
            samples,
            start,
            end,
        }
    }

    /// Seconds between consecutive samples
    pub fn sample_interval(&self) -> f64 {
        1.0 / self.frequency_hz
    }

    pub fn duration_secs(&self) -> f64 {
        secs_between(self.start, self.end)
    }

    /// Timestamp of sample `index`
    pub fn time_at(&self, index: usize) -> DateTime<Utc> {
        self.start + duration_from_secs(index as f64 / self.frequency_hz)
    }

    /// Iterate `(timestamp, value)` pairs
    pub fn iter_timed(&self) -> impl Iterator<Item = (DateTime<Utc>, f64)> + '_ {
        self.samples
            .iter()
            .enumerate()
            .map(move |(i, &v)| (self.time_at(i), v))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Flags every sample inside a run of exact zeros lasting at least
    /// [`PADDING_MIN_SECS`].
    pub fn padding_mask(&self) -> Vec<bool> {
        let min_run = ((PADDING_MIN_SECS * self.frequency_hz).ceil() as usize).max(1);
        let mut mask = vec![false; self.samples.len()];
        let mut i = 0;
        while i < self.samples.len() {
            if self.samples[i] != 0.0 {
                i += 1;
                continue;
            }
            let run_start = i;
            while i < self.samples.len() && self.samples[i] == 0.0 {
                i += 1;
            }
            if i - run_start >= min_run {
                mask[run_start..i].fill(true);
            }
        }
        mask
    }
}

/// Therapy settings in effect for a session (family-agnostic view)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub mode: String,
    /// cmH2O
    pub min_pressure: f64,
    /// cmH2O
    pub max_pressure: f64,
    pub min_pressure_support: Option<f64>,
    pub max_pressure_support: Option<f64>,
    pub ramp_minutes: Option<u8>,
    pub ramp_pressure: Option<f64>,
    pub flex: Option<String>,
    pub humidifier_level: Option<u8>,
}

/// One recorded therapy interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub source_type: SourceType,
    pub signals: Vec<Signal>,
    pub settings: Option<SessionSettings>,
}

impl Session {
    pub fn new(id: u64, start: DateTime<Utc>, end: DateTime<Utc>, source_type: SourceType) -> Self {
        Self {
            id,
            start,
            end,
            source_type,
            signals: Vec::new(),
            settings: None,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        secs_between(self.start, self.end)
    }

    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Add a signal, widening the session range so it still covers every
    /// owned signal.
    pub fn add_signal(&mut self, signal: Signal) {
        if signal.start < self.start {
            self.start = signal.start;
        }
        if signal.end > self.end {
            self.end = signal.end;
        }
        self.signals.push(signal);
    }
}

/// One detected breath cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreathRecord {
    pub inspiration_start: DateTime<Utc>,
    pub expiration_start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub min_flow: f64,
    pub max_flow: f64,
    /// Integrated absolute flow over the cycle (volume proxy)
    pub total_flow: f64,
}

impl BreathRecord {
    pub fn total_cycle_secs(&self) -> f64 {
        secs_between(self.inspiration_start, self.end)
    }

    pub fn inspiration_secs(&self) -> f64 {
        secs_between(self.inspiration_start, self.expiration_start)
    }

    pub fn expiration_secs(&self) -> f64 {
        secs_between(self.expiration_start, self.end)
    }

    pub fn flow_range(&self) -> f64 {
        self.max_flow - self.min_flow
    }
}

/// Summary statistics for one signal over one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalStatistics {
    pub signal_name: String,
    /// Smallest strictly positive sample (0 when none)
    pub minimum: f64,
    pub maximum: f64,
    pub median: f64,
    pub mean: f64,
    pub percentile_95: f64,
    pub percentile_995: f64,
    pub mean_deviation: f64,
}

/// Device identity read from the card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub family: DeviceFamily,
    pub model_number: String,
    pub product_name: String,
    pub serial_number: String,
}

/// One decoded session with its device-reported events, before grouping
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedSession {
    pub session: Session,
    pub events: Vec<ReportedEvent>,
}

/// Everything recorded on one calendar date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub sessions: Vec<Session>,
    pub events: Vec<ReportedEvent>,
    pub statistics: Vec<SignalStatistics>,
}

impl DailyReport {
    /// Total recorded hours across all sessions
    pub fn usage_hours(&self) -> f64 {
        self.sessions.iter().map(Session::duration_secs).sum::<f64>() / 3600.0
    }

    /// Apnea-hypopnea events per recorded hour
    pub fn ahi(&self) -> f64 {
        self.index_for(EventType::is_apnea_family)
    }

    /// Respiratory disturbances per recorded hour
    pub fn rdi(&self) -> f64 {
        self.index_for(EventType::is_respiratory_disturbance)
    }

    fn index_for(&self, include: impl Fn(&EventType) -> bool) -> f64 {
        let hours = self.usage_hours();
        if hours <= 0.0 {
            return 0.0;
        }
        let count = self.events.iter().filter(|e| include(&e.event_type)).count();
        count as f64 / hours
    }

    pub fn statistics_for(&self, name: &str) -> Option<&SignalStatistics> {
        self.statistics.iter().find(|s| s.signal_name == name)
    }
}

/// Convert fractional seconds to a millisecond-resolution duration
pub fn duration_from_secs(secs: f64) -> Duration {
    Duration::milliseconds((secs * 1000.0).round() as i64)
}

/// Signed seconds from `from` to `to`
pub fn secs_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 22, 0, 0).unwrap()
    }

    #[test]
    fn test_padding_mask_needs_long_zero_run() {
        // 1 Hz: a 40 s run of zeros is padding, a 5 s run is not
        let mut samples = vec![3.0; 100];
        samples[10..15].fill(0.0);
        samples[50..90].fill(0.0);
        let signal = Signal::new(signal_names::FLOW_RATE, 1.0, -127.0, 127.0, t0(), samples);
        let mask = signal.padding_mask();
        assert_eq!(mask.iter().filter(|&&m| m).count(), 40);
        assert!(!mask[12]);
        assert!(mask[50] && mask[89]);
        assert!(!mask[49] && !mask[90]);
    }

    #[test]
    fn test_signal_end_matches_sample_count() {
        let signal = Signal::new(signal_names::FLOW_RATE, 5.0, -127.0, 127.0, t0(), vec![0.0; 50]);
        assert!((signal.duration_secs() - 10.0).abs() < 0.2);
        assert_eq!(signal.time_at(5), t0() + Duration::seconds(1));
    }

    #[test]
    fn test_event_overlap_includes_points() {
        let rera = ReportedEvent::new(EventType::Rera, t0() + Duration::seconds(5), 0.0);
        assert!(rera.overlaps(t0(), t0() + Duration::seconds(10)));
        assert!(!rera.overlaps(t0() + Duration::seconds(6), t0() + Duration::seconds(10)));
    }

    #[test]
    fn test_add_signal_widens_session() {
        let mut session = Session::new(1, t0(), t0() + Duration::seconds(5), SourceType::Cpap);
        session.add_signal(Signal::new("x", 1.0, 0.0, 1.0, t0(), vec![1.0; 20]));
        assert_eq!(session.end, t0() + Duration::seconds(20));
    }

    #[test]
    fn test_daily_indices() {
        let start = t0();
        let report = DailyReport {
            date: start.date_naive(),
            sessions: vec![Session::new(1, start, start + Duration::hours(2), SourceType::Cpap)],
            events: vec![
                ReportedEvent::new(EventType::ObstructiveApnea, start, 10.0),
                ReportedEvent::new(EventType::Hypopnea, start, 10.0),
                ReportedEvent::new(EventType::Rera, start, 0.0),
                ReportedEvent::new(EventType::VibratorySnore, start, 0.0),
            ],
            statistics: vec![],
        };
        assert!((report.ahi() - 1.0).abs() < 1e-9);
        assert!((report.rdi() - 1.5).abs() < 1e-9);
    }
}
