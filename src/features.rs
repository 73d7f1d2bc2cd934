//! Derived signal generation
//!
//! Turns the breath list of a session into smoothed respiratory signals
//! sampled at a fixed 0.5 Hz cadence:
//! - Respiration rate, tidal volume and minute ventilation
//! - Inspiration time, expiration time and their ratio
//! - A trailing-window AHI trend from the event list

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::config::DerivedConfig;
use crate::stats::MovingAverage;
use crate::types::{
    duration_from_secs, secs_between, signal_names, BreathRecord, ReportedEvent, Signal,
};

/// Seconds between derived samples
pub const OUTPUT_INTERVAL_SECS: f64 = 2.0;

/// A window reports 0 until it holds this fraction of its capacity
pub const MIN_FILL_FRACTION: f64 = 0.25;

/// Converts (flow volume per second) / (breaths per minute) to mL
const TIDAL_VOLUME_SCALE: f64 = 1000.0 / 60.0;

const SECS_PER_HOUR: f64 = 3600.0;

/// Sliding window that only reports once sufficiently filled
#[derive(Debug, Clone)]
struct Smoothed {
    window: MovingAverage,
    min_fill: usize,
}

impl Smoothed {
    fn new(window_secs: f64) -> Self {
        let capacity = ((window_secs / OUTPUT_INTERVAL_SECS).round() as usize).max(1);
        Self {
            window: MovingAverage::new(capacity),
            min_fill: ((capacity as f64 * MIN_FILL_FRACTION).ceil() as usize).max(1),
        }
    }

    fn push(&mut self, value: f64) {
        self.window.push(value);
    }

    fn ready(&self) -> bool {
        self.window.len() >= self.min_fill
    }

    fn mean(&self) -> f64 {
        if self.ready() {
            self.window.mean()
        } else {
            0.0
        }
    }

    fn mean_plus_std(&self) -> f64 {
        if self.ready() {
            self.window.mean() + self.window.std_dev()
        } else {
            0.0
        }
    }
}

/// Derived signal generator for one session
#[derive(Debug, Clone)]
pub struct FeatureDeriver {
    config: DerivedConfig,
}

impl FeatureDeriver {
    pub fn new(config: DerivedConfig) -> Self {
        Self { config }
    }

    /// Respiratory signals from a session's breaths, covering `[start, end]`.
    ///
    /// Empty when there are no breaths or the span is shorter than one
    /// output interval.
    pub fn derive(
        &self,
        breaths: &[BreathRecord],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Signal> {
        let ticks = tick_count(start, end);
        if breaths.is_empty() || ticks == 0 {
            return Vec::new();
        }

        let mut rate = Smoothed::new(self.config.respiration_window_secs);
        let mut flow_per_sec = Smoothed::new(self.config.respiration_window_secs);
        let mut inspiration = Smoothed::new(self.config.ie_window_secs);
        let mut expiration = Smoothed::new(self.config.ie_window_secs);

        let mut rr = Vec::with_capacity(ticks);
        let mut tv = Vec::with_capacity(ticks);
        let mut mv = Vec::with_capacity(ticks);
        let mut ti = Vec::with_capacity(ticks);
        let mut te = Vec::with_capacity(ticks);
        let mut ratio = Vec::with_capacity(ticks);

        let mut next = 0;
        for tick in 0..ticks {
            let now = tick_time(start, tick);
            while next < breaths.len() && breaths[next].end <= now {
                next += 1;
            }
            if let Some(breath) = breaths.get(next).filter(|b| b.inspiration_start <= now) {
                let cycle = breath.total_cycle_secs();
                if cycle > 0.0 {
                    rate.push(60.0 / cycle);
                    flow_per_sec.push(breath.total_flow / cycle);
                    inspiration.push(breath.inspiration_secs());
                    expiration.push(breath.expiration_secs());
                }
            }

            let rr_now = rate.mean();
            let tv_now = if rr_now > 0.0 {
                flow_per_sec.mean_plus_std() / rr_now * TIDAL_VOLUME_SCALE
            } else {
                0.0
            };
            let ti_now = inspiration.mean();
            let te_now = expiration.mean();

            rr.push(rr_now);
            tv.push(tv_now);
            mv.push(tv_now * rr_now / 1000.0);
            ti.push(ti_now);
            te.push(te_now);
            ratio.push(if ti_now > 0.0 { te_now / ti_now } else { 0.0 });
        }

        let frequency = 1.0 / OUTPUT_INTERVAL_SECS;
        vec![
            Signal::new(signal_names::RESPIRATION_RATE, frequency, 0.0, 60.0, start, rr),
            Signal::new(signal_names::TIDAL_VOLUME, frequency, 0.0, 2000.0, start, tv),
            Signal::new(signal_names::MINUTE_VENTILATION, frequency, 0.0, 30.0, start, mv),
            Signal::new(signal_names::INSPIRATION_TIME, frequency, 0.0, 10.0, start, ti),
            Signal::new(signal_names::EXPIRATION_TIME, frequency, 0.0, 10.0, start, te),
            Signal::new(signal_names::IE_RATIO, frequency, 0.0, 5.0, start, ratio),
        ]
    }

    /// Apnea-family events per hour over the trailing window ending at each
    /// sample, clipped to the configured maximum. `None` when the span is
    /// shorter than one output interval.
    pub fn ahi_trend(
        &self,
        events: &[ReportedEvent],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<Signal> {
        let ticks = tick_count(start, end);
        if ticks == 0 {
            return None;
        }
        let mut starts: Vec<DateTime<Utc>> = events
            .iter()
            .filter(|e| e.event_type.is_apnea_family())
            .map(|e| e.start)
            .collect();
        starts.sort();

        let window = duration_from_secs(self.config.ahi_window_secs);
        let per_hour = SECS_PER_HOUR / self.config.ahi_window_secs;

        let mut active: VecDeque<DateTime<Utc>> = VecDeque::new();
        let mut next = 0;
        let mut values = Vec::with_capacity(ticks);
        for tick in 0..ticks {
            let now = tick_time(start, tick);
            while next < starts.len() && starts[next] <= now {
                active.push_back(starts[next]);
                next += 1;
            }
            while active.front().is_some_and(|&s| s <= now - window) {
                active.pop_front();
            }
            values.push((active.len() as f64 * per_hour).min(self.config.ahi_max));
        }

        Some(Signal::new(
            signal_names::AHI,
            1.0 / OUTPUT_INTERVAL_SECS,
            0.0,
            self.config.ahi_max,
            start,
            values,
        ))
    }
}

fn tick_count(start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
    (secs_between(start, end) / OUTPUT_INTERVAL_SECS).floor().max(0.0) as usize
}

fn tick_time(start: DateTime<Utc>, tick: usize) -> DateTime<Utc> {
    start + duration_from_secs(tick as f64 * OUTPUT_INTERVAL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    /// Regular breaths: 1.5 s inspiration, 2.5 s expiration
    fn regular_breaths(count: usize, total_flow: f64) -> Vec<BreathRecord> {
        (0..count)
            .map(|i| {
                let start = t0() + Duration::seconds(4 * i as i64);
                BreathRecord {
                    inspiration_start: start,
                    expiration_start: start + Duration::milliseconds(1500),
                    end: start + Duration::seconds(4),
                    min_flow: -30.0,
                    max_flow: 30.0,
                    total_flow,
                }
            })
            .collect()
    }

    fn signal<'a>(signals: &'a [Signal], name: &str) -> &'a Signal {
        signals.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn test_regular_breathing() {
        let breaths = regular_breaths(60, 2400.0);
        let deriver = FeatureDeriver::new(DerivedConfig::default());
        let signals = deriver.derive(&breaths, t0(), t0() + Duration::seconds(240));
        assert_eq!(signals.len(), 6);

        let rr = signal(&signals, signal_names::RESPIRATION_RATE);
        assert_eq!(rr.frequency_hz, 0.5);
        assert_eq!(rr.samples.len(), 120);
        assert_eq!(rr.end, t0() + Duration::seconds(240));
        // window of 30 needs 8 samples before reporting
        assert_eq!(rr.samples[6], 0.0);
        assert!((rr.samples[7] - 15.0).abs() < 1e-9);
        assert!((rr.samples[100] - 15.0).abs() < 1e-9);

        // 2400 / 4 s / 15 bpm * 1000 / 60
        let tv = signal(&signals, signal_names::TIDAL_VOLUME);
        assert!((tv.samples[100] - 666.666).abs() < 0.01);

        let mv = signal(&signals, signal_names::MINUTE_VENTILATION);
        assert!((mv.samples[100] - 10.0).abs() < 1e-3);

        let ti = signal(&signals, signal_names::INSPIRATION_TIME);
        let te = signal(&signals, signal_names::EXPIRATION_TIME);
        let ratio = signal(&signals, signal_names::IE_RATIO);
        // window of 15 needs 4 samples
        assert_eq!(ti.samples[2], 0.0);
        assert!((ti.samples[3] - 1.5).abs() < 1e-9);
        assert!((te.samples[50] - 2.5).abs() < 1e-9);
        assert!((ratio.samples[50] - 2.5 / 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_tidal_volume_includes_spread() {
        // alternating shallow and deep breaths of the same length
        let breaths: Vec<_> = regular_breaths(60, 0.0)
            .into_iter()
            .enumerate()
            .map(|(i, mut b)| {
                b.total_flow = if i % 2 == 0 { 1600.0 } else { 3200.0 };
                b
            })
            .collect();
        let deriver = FeatureDeriver::new(DerivedConfig::default());
        let signals = deriver.derive(&breaths, t0(), t0() + Duration::seconds(240));

        // the 30-sample window at t = 200 s holds 15 samples of each breath
        // kind: 400 and 800 per second, mean 600, population std 200
        let rr = signal(&signals, signal_names::RESPIRATION_RATE);
        assert!((rr.samples[100] - 15.0).abs() < 1e-9);
        let tv = signal(&signals, signal_names::TIDAL_VOLUME);
        let expected = (600.0 + 200.0) / 15.0 * 1000.0 / 60.0;
        assert!((tv.samples[100] - expected).abs() < 1e-6, "{}", tv.samples[100]);
    }

    #[test]
    fn test_span_shorter_than_interval_has_no_signals() {
        let deriver = FeatureDeriver::new(DerivedConfig::default());
        let end = t0() + Duration::milliseconds(1500);
        assert!(deriver.derive(&regular_breaths(1, 2400.0), t0(), end).is_empty());
        assert!(deriver.ahi_trend(&[], t0(), end).is_none());
        assert!(deriver.ahi_trend(&[], t0(), t0() + Duration::seconds(2)).is_some());
    }

    #[test]
    fn test_gap_in_breaths_holds_last_values() {
        let mut breaths = regular_breaths(20, 2400.0);
        // no breaths between 80 s and 200 s
        breaths.extend(regular_breaths(60, 2400.0).into_iter().skip(50));
        let deriver = FeatureDeriver::new(DerivedConfig::default());
        let signals = deriver.derive(&breaths, t0(), t0() + Duration::seconds(240));
        let rr = signal(&signals, signal_names::RESPIRATION_RATE);
        assert!((rr.samples[70] - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_breaths() {
        let deriver = FeatureDeriver::new(DerivedConfig::default());
        assert!(deriver.derive(&[], t0(), t0() + Duration::hours(1)).is_empty());
    }

    #[test]
    fn test_ahi_trend_trailing_window() {
        let events = vec![
            ReportedEvent::new(EventType::ObstructiveApnea, t0() + Duration::minutes(10), 10.0),
            ReportedEvent::new(EventType::Hypopnea, t0() + Duration::minutes(20), 10.0),
            ReportedEvent::new(EventType::VibratorySnore, t0() + Duration::minutes(30), 0.0),
            ReportedEvent::new(EventType::ClearAirway, t0() + Duration::minutes(90), 10.0),
        ];
        let deriver = FeatureDeriver::new(DerivedConfig::default());
        let ahi = deriver
            .ahi_trend(&events, t0(), t0() + Duration::hours(2))
            .unwrap();
        let at = |minutes: i64| ahi.samples[(minutes * 30) as usize];

        assert_eq!(at(5), 0.0);
        assert_eq!(at(15), 1.0);
        assert_eq!(at(45), 2.0);
        // the first event leaves the window one hour after it started
        assert_eq!(at(70), 1.0);
        assert_eq!(at(95), 1.0);
    }

    #[test]
    fn test_ahi_trend_is_clipped() {
        let events: Vec<_> = (0..100)
            .map(|i| ReportedEvent::new(EventType::Hypopnea, t0() + Duration::seconds(i * 10), 5.0))
            .collect();
        let config = DerivedConfig {
            ahi_max: 40.0,
            ..DerivedConfig::default()
        };
        let ahi = FeatureDeriver::new(config)
            .ahi_trend(&events, t0(), t0() + Duration::hours(1))
            .unwrap();
        assert_eq!(ahi.samples.iter().cloned().fold(0.0, f64::max), 40.0);
        assert_eq!(ahi.max_value, 40.0);
    }
}
