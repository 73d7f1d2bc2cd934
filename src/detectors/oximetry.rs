//! Oximetry events: desaturations against a trailing baseline and
//! hypoxemia below a fixed saturation.
//!
//! Samples at or below zero are dropouts and never enter a baseline.

use chrono::{DateTime, Utc};

use crate::config::EventsConfig;
use crate::stats::MovingAverage;
use crate::types::{duration_from_secs, secs_between, EventType, ReportedEvent, Signal};

#[derive(Debug, Clone, Copy, PartialEq)]
enum DesatState {
    Normal,
    Dropped { start: DateTime<Utc>, baseline: f64 },
    /// Capped event already emitted; waiting for the saturation to recover
    Capped { baseline: f64 },
}

#[derive(Debug, Clone)]
pub struct DesaturationDetector {
    pub drop: f64,
    pub baseline_secs: f64,
    pub min_duration_secs: f64,
    pub max_duration_secs: f64,
    pub grace_period_secs: f64,
}

impl DesaturationDetector {
    pub fn from_config(config: &EventsConfig) -> Self {
        Self {
            drop: config.desaturation_drop,
            baseline_secs: config.desaturation_baseline_secs,
            min_duration_secs: config.desaturation_min_secs,
            max_duration_secs: config.desaturation_max_secs,
            grace_period_secs: config.grace_period_secs,
        }
    }

    pub fn detect(&self, spo2: &Signal, session_start: DateTime<Utc>) -> Vec<ReportedEvent> {
        let grace_until = session_start + duration_from_secs(self.grace_period_secs);
        let capacity = (self.baseline_secs * spo2.frequency_hz).round() as usize;
        let mut window = MovingAverage::new(capacity);
        let mut state = DesatState::Normal;
        let mut events = Vec::new();

        for (time, value) in spo2.iter_timed() {
            if value <= 0.0 {
                continue;
            }

            state = match state {
                DesatState::Normal
                    if time >= grace_until
                        && !window.is_empty()
                        && window.mean() - value >= self.drop =>
                {
                    DesatState::Dropped {
                        start: time,
                        baseline: window.mean(),
                    }
                }
                DesatState::Dropped { start, baseline } => {
                    let elapsed = secs_between(start, time);
                    if baseline - value < self.drop {
                        if elapsed >= self.min_duration_secs {
                            events.push(self.event(start, elapsed));
                        }
                        DesatState::Normal
                    } else if elapsed >= self.max_duration_secs {
                        events.push(self.event(start, self.max_duration_secs));
                        DesatState::Capped { baseline }
                    } else {
                        state
                    }
                }
                DesatState::Capped { baseline } if baseline - value < self.drop => {
                    DesatState::Normal
                }
                other => other,
            };
            window.push(value);
        }

        if let DesatState::Dropped { start, .. } = state {
            let elapsed = secs_between(start, spo2.end).min(self.max_duration_secs);
            if elapsed >= self.min_duration_secs {
                events.push(self.event(start, elapsed));
            }
        }
        events
    }

    fn event(&self, start: DateTime<Utc>, duration: f64) -> ReportedEvent {
        ReportedEvent::generated(EventType::Desaturation, start, duration)
    }
}

#[derive(Debug, Clone)]
pub struct HypoxemiaDetector {
    pub threshold: f64,
    pub min_duration_secs: f64,
    pub max_duration_secs: f64,
    pub grace_period_secs: f64,
}

impl HypoxemiaDetector {
    pub fn from_config(config: &EventsConfig) -> Self {
        Self {
            threshold: config.hypoxemia_threshold,
            min_duration_secs: config.hypoxemia_min_secs,
            max_duration_secs: config.hypoxemia_max_secs,
            grace_period_secs: config.grace_period_secs,
        }
    }

    /// Long stretches below the threshold are split into capped events.
    pub fn detect(&self, spo2: &Signal, session_start: DateTime<Utc>) -> Vec<ReportedEvent> {
        let grace_until = session_start + duration_from_secs(self.grace_period_secs);
        let mut open: Option<DateTime<Utc>> = None;
        let mut events = Vec::new();

        for (time, value) in spo2.iter_timed() {
            let low = value > 0.0 && value < self.threshold && time >= grace_until;
            match (open, low) {
                (None, true) => open = Some(time),
                (Some(start), true) if secs_between(start, time) >= self.max_duration_secs => {
                    events.push(self.event(start, self.max_duration_secs));
                    open = Some(time);
                }
                (Some(start), false) => {
                    let elapsed = secs_between(start, time);
                    if elapsed >= self.min_duration_secs {
                        events.push(self.event(start, elapsed));
                    }
                    open = None;
                }
                _ => {}
            }
        }

        if let Some(start) = open {
            let elapsed = secs_between(start, spo2.end);
            if elapsed >= self.min_duration_secs {
                events.push(self.event(start, elapsed.min(self.max_duration_secs)));
            }
        }
        events
    }

    fn event(&self, start: DateTime<Utc>, duration: f64) -> ReportedEvent {
        ReportedEvent::generated(EventType::Hypoxemia, start, duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::signal_names;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 11, 1, 0, 0).unwrap()
    }

    /// 1 Hz SpO2 built from `(value, seconds)` runs
    fn spo2(runs: &[(f64, usize)]) -> Signal {
        let samples = runs
            .iter()
            .flat_map(|&(value, secs)| std::iter::repeat(value).take(secs))
            .collect();
        Signal::new(signal_names::SPO2, 1.0, 0.0, 100.0, t0(), samples)
    }

    #[test]
    fn test_desaturation_against_baseline() {
        let signal = spo2(&[(96.0, 300), (91.0, 20), (96.0, 100)]);
        let events = DesaturationDetector::from_config(&EventsConfig::default()).detect(&signal, t0());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, t0() + Duration::seconds(300));
        assert!((events[0].duration_secs - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_dip_is_not_a_desaturation() {
        let signal = spo2(&[(96.0, 300), (94.0, 20), (96.0, 100)]);
        let events = DesaturationDetector::from_config(&EventsConfig::default()).detect(&signal, t0());
        assert!(events.is_empty());
    }

    #[test]
    fn test_long_desaturation_is_capped_once() {
        let signal = spo2(&[(96.0, 200), (90.0, 300), (96.0, 60)]);
        let events = DesaturationDetector::from_config(&EventsConfig::default()).detect(&signal, t0());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].duration_secs, 120.0);
    }

    #[test]
    fn test_dropouts_are_ignored() {
        let signal = spo2(&[(96.0, 200), (0.0, 30), (96.0, 60)]);
        let config = EventsConfig::default();
        assert!(DesaturationDetector::from_config(&config).detect(&signal, t0()).is_empty());
        assert!(HypoxemiaDetector::from_config(&config).detect(&signal, t0()).is_empty());
    }

    #[test]
    fn test_hypoxemia_split_at_cap() {
        let signal = spo2(&[(95.0, 100), (85.0, 300), (95.0, 20)]);
        let events = HypoxemiaDetector::from_config(&EventsConfig::default()).detect(&signal, t0());
        let durations: Vec<f64> = events.iter().map(|e| e.duration_secs).collect();
        assert_eq!(durations, vec![120.0, 120.0, 60.0]);
        assert_eq!(events[1].start, t0() + Duration::seconds(220));
        assert!(events.iter().all(|e| e.event_type == EventType::Hypoxemia));
    }
}
