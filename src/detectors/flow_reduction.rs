//! Flow reduction detection
//!
//! Works on the rectified, low-pass filtered flow. The baseline is the mean
//! plus one standard deviation over a trailing window; a stretch at or below
//! a fraction of that baseline is a reduction, unless it starts too soon
//! after a recovery breath. Zero padding where the recording paused closes
//! any open reduction and is kept out of the baseline.

use chrono::{DateTime, Utc};

use crate::config::EventsConfig;
use crate::filter::ButterworthLowPass;
use crate::stats::MovingAverage;
use crate::types::{duration_from_secs, secs_between, EventType, ReportedEvent, Signal};

/// A sample at this multiple of the baseline marks a recovery breath
pub const RECOVERY_FACTOR: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowState {
    Normal,
    Reduced { start: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct FlowReductionDetector {
    pub fraction: f64,
    pub window_secs: f64,
    pub arousal_delay_secs: f64,
    pub min_duration_secs: f64,
    pub cutoff_hz: f64,
    pub grace_period_secs: f64,
}

impl FlowReductionDetector {
    pub fn from_config(config: &EventsConfig) -> Self {
        Self {
            fraction: config.flow_reduction_fraction,
            window_secs: config.flow_reduction_window_secs,
            arousal_delay_secs: config.flow_reduction_arousal_delay_secs,
            min_duration_secs: config.flow_reduction_min_secs,
            cutoff_hz: config.flow_reduction_cutoff_hz,
            grace_period_secs: config.grace_period_secs,
        }
    }

    /// Detection starts once the baseline window has filled.
    pub fn detect(&self, flow: &Signal, session_start: DateTime<Utc>) -> Vec<ReportedEvent> {
        if flow.samples.len() < 2 || flow.frequency_hz <= 0.0 {
            return Vec::new();
        }
        let rectified: Vec<f64> = flow.samples.iter().map(|v| v.abs()).collect();
        let smoothed =
            ButterworthLowPass::new(self.cutoff_hz, flow.frequency_hz).filtfilt(&rectified);

        let grace_until = session_start + duration_from_secs(self.grace_period_secs);
        let capacity = (self.window_secs * flow.frequency_hz).round() as usize;
        let padding = flow.padding_mask();
        let mut window = MovingAverage::new(capacity);
        let mut last_recovery: Option<DateTime<Utc>> = None;
        let mut state = FlowState::Normal;
        let mut events = Vec::new();

        for (i, &value) in smoothed.iter().enumerate() {
            let time = flow.time_at(i);
            if padding[i] {
                if let FlowState::Reduced { start } = state {
                    events.extend(self.close(start, time));
                    state = FlowState::Normal;
                }
                continue;
            }
            if window.is_full() {
                let baseline = window.mean() + window.std_dev();
                if value >= RECOVERY_FACTOR * baseline {
                    last_recovery = Some(time);
                }
                let reduced = value <= self.fraction * baseline;

                state = match state {
                    FlowState::Normal if reduced && time >= grace_until => {
                        let settled = last_recovery.map_or(true, |r| {
                            secs_between(r, time) >= self.arousal_delay_secs
                        });
                        if settled {
                            FlowState::Reduced { start: time }
                        } else {
                            FlowState::Normal
                        }
                    }
                    FlowState::Reduced { start } if !reduced => {
                        events.extend(self.close(start, time));
                        FlowState::Normal
                    }
                    other => other,
                };
            }
            window.push(value);
        }

        if let FlowState::Reduced { start } = state {
            events.extend(self.close(start, flow.time_at(smoothed.len() - 1)));
        }

        tracing::debug!(events = events.len(), "flow reduction scan complete");
        events
    }

    fn close(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<ReportedEvent> {
        let duration = secs_between(start, end);
        (duration >= self.min_duration_secs)
            .then(|| ReportedEvent::generated(EventType::FlowReduction, start, duration))
    }
}
