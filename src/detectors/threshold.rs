//! Redline crossing detection
//!
//! A two-state machine over `(time, value)` samples. `step` is the pure
//! transition; `ThresholdDetector` drives it over a whole signal.

use chrono::{DateTime, Utc};

use crate::types::{duration_from_secs, secs_between, EventType, ReportedEvent, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdState {
    Below,
    Above { start: DateTime<Utc> },
}

/// One closed interval spent at or above the redline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Crossing {
    pub fn duration_secs(&self) -> f64 {
        secs_between(self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdDetector {
    pub event_type: EventType,
    pub redline: f64,
    pub min_duration_secs: f64,
    pub grace_period_secs: f64,
    /// Place crossings between bracketing samples instead of on them
    pub interpolate: bool,
}

impl ThresholdDetector {
    /// Events for every stretch of `signal` at or above the redline lasting
    /// at least the minimum duration.
    pub fn detect(&self, signal: &Signal, session_start: DateTime<Utc>) -> Vec<ReportedEvent> {
        let grace_until = session_start + duration_from_secs(self.grace_period_secs);
        let mut state = ThresholdState::Below;
        let mut prev = None;
        let mut crossings = Vec::new();

        for sample in signal.iter_timed() {
            let (next, crossing) = step(state, prev, sample, grace_until, self);
            state = next;
            prev = Some(sample);
            crossings.extend(crossing);
        }
        if let Some((last, _)) = prev {
            crossings.extend(self.finish(state, last));
        }

        crossings
            .into_iter()
            .map(|c| ReportedEvent::generated(self.event_type, c.start, c.duration_secs()))
            .collect()
    }

    /// Close an interval still open when the signal ends.
    pub fn finish(&self, state: ThresholdState, last: DateTime<Utc>) -> Option<Crossing> {
        match state {
            ThresholdState::Above { start } => self.qualify(Crossing { start, end: last }),
            ThresholdState::Below => None,
        }
    }

    fn qualify(&self, crossing: Crossing) -> Option<Crossing> {
        (crossing.duration_secs() >= self.min_duration_secs).then_some(crossing)
    }

    fn crossing_time(&self, prev: Option<(DateTime<Utc>, f64)>, sample: (DateTime<Utc>, f64)) -> DateTime<Utc> {
        let (t1, v1) = sample;
        match prev {
            Some((t0, v0)) if self.interpolate && v1 != v0 => {
                let fraction = ((self.redline - v0) / (v1 - v0)).clamp(0.0, 1.0);
                t0 + duration_from_secs(secs_between(t0, t1) * fraction)
            }
            _ => t1,
        }
    }
}

/// Advance the machine by one sample; returns the new state and the interval
/// closed by this sample, if it qualifies.
pub fn step(
    state: ThresholdState,
    prev: Option<(DateTime<Utc>, f64)>,
    sample: (DateTime<Utc>, f64),
    grace_until: DateTime<Utc>,
    detector: &ThresholdDetector,
) -> (ThresholdState, Option<Crossing>) {
    let (time, value) = sample;
    if time < grace_until {
        return (ThresholdState::Below, None);
    }

    match state {
        ThresholdState::Below if value >= detector.redline => {
            let start = detector.crossing_time(prev, sample).max(grace_until);
            (ThresholdState::Above { start }, None)
        }
        ThresholdState::Above { start } if value < detector.redline => {
            let end = detector.crossing_time(prev, sample).max(start);
            (ThresholdState::Below, detector.qualify(Crossing { start, end }))
        }
        _ => (state, None),
    }
}
