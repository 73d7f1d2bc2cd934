//! Threshold event generators
//!
//! Each generator scans one signal of a session and synthesizes events.
//! `EventGenerator` runs all of them and drops anything that repeats an event
//! already present for the same time range.

pub mod flow_reduction;
pub mod oximetry;
pub mod threshold;

pub use flow_reduction::FlowReductionDetector;
pub use oximetry::{DesaturationDetector, HypoxemiaDetector};
pub use threshold::{step, Crossing, ThresholdDetector, ThresholdState};

use crate::config::EventsConfig;
use crate::types::{signal_names, EventType, ReportedEvent, Session};

/// Runs every generator over one session
#[derive(Debug, Clone)]
pub struct EventGenerator {
    config: EventsConfig,
}

impl EventGenerator {
    pub fn new(config: EventsConfig) -> Self {
        Self { config }
    }

    pub fn leak_detector(&self) -> ThresholdDetector {
        ThresholdDetector {
            event_type: EventType::LargeLeak,
            redline: self.config.leak_redline,
            min_duration_secs: self.config.leak_min_secs,
            grace_period_secs: self.config.grace_period_secs,
            interpolate: self.config.interpolate_crossings,
        }
    }

    pub fn flow_limit_detector(&self) -> ThresholdDetector {
        ThresholdDetector {
            event_type: EventType::FlowLimitation,
            redline: self.config.flow_limit_redline,
            min_duration_secs: self.config.flow_limit_min_secs,
            grace_period_secs: self.config.grace_period_secs,
            interpolate: self.config.interpolate_crossings,
        }
    }

    /// New events for `session`, given the events already known for its day.
    ///
    /// The result never overlaps an existing event of the same type, and
    /// generated flow limitations never overlap a respiratory disturbance.
    pub fn generate(&self, session: &Session, existing: &[ReportedEvent]) -> Vec<ReportedEvent> {
        let start = session.start;
        let mut generated = Vec::new();

        if let Some(leak) = session.signal(signal_names::LEAK_RATE) {
            generated.extend(self.leak_detector().detect(leak, start));
        }

        if let Some(limit) = session.signal(signal_names::FLOW_LIMIT) {
            generated.extend(
                self.flow_limit_detector()
                    .detect(limit, start)
                    .into_iter()
                    .filter(|event| !overlaps_disturbance(event, existing)),
            );
        }

        if let Some(flow) = session.signal(signal_names::FLOW_RATE) {
            generated.extend(FlowReductionDetector::from_config(&self.config).detect(flow, start));
        }

        if let Some(spo2) = session.signal(signal_names::SPO2) {
            generated.extend(DesaturationDetector::from_config(&self.config).detect(spo2, start));
            generated.extend(HypoxemiaDetector::from_config(&self.config).detect(spo2, start));
        }

        let mut accepted: Vec<ReportedEvent> = Vec::with_capacity(generated.len());
        for event in generated {
            let duplicate = existing
                .iter()
                .chain(accepted.iter())
                .any(|e| e.event_type == event.event_type && e.overlaps(event.start, event.end()));
            if !duplicate {
                accepted.push(event);
            }
        }
        accepted.sort_by_key(|e| e.start);

        tracing::debug!(
            session = session.id,
            generated = accepted.len(),
            "generated threshold events"
        );
        accepted
    }
}

fn overlaps_disturbance(event: &ReportedEvent, existing: &[ReportedEvent]) -> bool {
    existing
        .iter()
        .any(|e| e.event_type.is_respiratory_disturbance() && e.overlaps(event.start, event.end()))
}
