//! Breath detection on the flow waveform
//!
//! The flow signal is low-pass filtered with zero phase, then split into
//! cycles at each expiration-to-inspiration transition. A hysteresis band
//! around the baseline keeps noise at the zero line from splitting breaths.

use crate::config::BreathConfig;
use crate::filter::ButterworthLowPass;
use crate::stats::MovingAverage;
use crate::types::{BreathRecord, Signal};

/// Leading samples are skipped until the flow first exceeds this
pub const START_THRESHOLD: f64 = 1.0;

/// Half-width of the hysteresis band around the baseline
pub const HYSTERESIS: f64 = 0.5;

/// Breaths shorter than this are folded into their predecessor
pub const MIN_BREATH_SECS: f64 = 0.5;

/// Breaths whose flow range is at or below this are folded into their predecessor
pub const MIN_FLOW_RANGE: f64 = 5.0;

/// A predecessor longer than this never absorbs a short breath
pub const MAX_MERGE_TARGET_SECS: f64 = 10.0;

/// Integrated flow is scaled by this over the sample rate to approximate mL
pub const VOLUME_SCALE: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Inspiration,
    Expiration,
}

/// Sample range and flow summary of one cycle
#[derive(Debug, Clone, Copy)]
struct Cycle {
    inspiration: usize,
    expiration: usize,
    end: usize,
    min: f64,
    max: f64,
    total: f64,
}

impl Cycle {
    fn starting_at(index: usize, value: f64) -> Self {
        Self {
            inspiration: index,
            expiration: index,
            end: index,
            min: value,
            max: value,
            total: value.abs(),
        }
    }

    fn secs(&self, frequency: f64) -> f64 {
        (self.end - self.inspiration) as f64 / frequency
    }

    fn is_noise(&self, frequency: f64) -> bool {
        self.secs(frequency) < MIN_BREATH_SECS || self.max - self.min <= MIN_FLOW_RANGE
    }

    fn absorb(&mut self, next: Cycle) {
        self.end = next.end;
        self.min = self.min.min(next.min);
        self.max = self.max.max(next.max);
        self.total += next.total;
    }
}

/// Detect breath cycles in a flow-rate signal.
pub fn detect_breaths(flow: &Signal, config: &BreathConfig) -> Vec<BreathRecord> {
    let frequency = flow.frequency_hz;
    if flow.samples.len() < 2 || frequency <= 0.0 {
        return Vec::new();
    }

    let values = classification_values(flow, config);
    let cycles = segment(&values, &flow.padding_mask(), frequency);

    tracing::debug!(
        signal = %flow.name,
        breaths = cycles.len(),
        "detected breaths"
    );

    cycles
        .into_iter()
        .map(|c| BreathRecord {
            inspiration_start: flow.time_at(c.inspiration),
            expiration_start: flow.time_at(c.expiration),
            end: flow.time_at(c.end),
            min_flow: c.min,
            max_flow: c.max,
            total_flow: c.total * VOLUME_SCALE / frequency,
        })
        .collect()
}

/// Filtered flow, optionally relative to a trailing mean baseline
fn classification_values(flow: &Signal, config: &BreathConfig) -> Vec<f64> {
    let filtered = ButterworthLowPass::new(config.filter_cutoff_hz, flow.frequency_hz)
        .filtfilt(&flow.samples);
    if !config.variable_baseline {
        return filtered;
    }

    let window = (config.baseline_window_secs * flow.frequency_hz).round() as usize;
    let mut baseline = MovingAverage::new(window);
    filtered
        .into_iter()
        .map(|v| {
            baseline.push(v);
            v - baseline.mean()
        })
        .collect()
}

/// Split `values` into cycles. Padding samples end the cycle in progress; a
/// cycle that had not reached expiration yet is dropped. After padding, and
/// at the start, samples are skipped until the flow first exceeds
/// [`START_THRESHOLD`].
fn segment(values: &[f64], padding: &[bool], frequency: f64) -> Vec<Cycle> {
    let mut cycles: Vec<Cycle> = Vec::new();
    let mut open: Option<(Phase, Cycle)> = None;

    for (i, &v) in values.iter().enumerate() {
        if padding.get(i).copied().unwrap_or(false) {
            if let Some((Phase::Expiration, mut cycle)) = open.take() {
                cycle.end = i;
                push_cycle(&mut cycles, cycle, frequency);
            }
            continue;
        }

        let Some((mut phase, mut current)) = open.take() else {
            if v > START_THRESHOLD {
                open = Some((Phase::Inspiration, Cycle::starting_at(i, v)));
            }
            continue;
        };

        match phase {
            Phase::Inspiration if v < -HYSTERESIS => {
                phase = Phase::Expiration;
                current.expiration = i;
            }
            Phase::Expiration if v > HYSTERESIS => {
                current.end = i;
                push_cycle(&mut cycles, current, frequency);
                open = Some((Phase::Inspiration, Cycle::starting_at(i, v)));
                continue;
            }
            _ => {}
        }
        current.min = current.min.min(v);
        current.max = current.max.max(v);
        current.total += v.abs();
        open = Some((phase, current));
    }

    cycles
}

fn push_cycle(cycles: &mut Vec<Cycle>, cycle: Cycle, frequency: f64) {
    if cycle.is_noise(frequency) {
        if let Some(previous) = cycles.last_mut() {
            if previous.secs(frequency) <= MAX_MERGE_TARGET_SECS {
                previous.absorb(cycle);
                return;
            }
        }
    }
    cycles.push(cycle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::signal_names;
    use chrono::{TimeZone, Utc};
    use std::f64::consts::PI;

    fn sine_flow(amplitude: f64, period: f64, secs: f64) -> Signal {
        let frequency = 5.0;
        let samples = (0..(secs * frequency) as usize)
            .map(|i| amplitude * (2.0 * PI * i as f64 / frequency / period).sin())
            .collect();
        Signal::new(
            signal_names::FLOW_RATE,
            frequency,
            -127.0,
            127.0,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            samples,
        )
    }

    #[test]
    fn test_sine_wave_breath_count() {
        let flow = sine_flow(30.0, 4.0, 62.0);
        let breaths = detect_breaths(&flow, &BreathConfig::default());
        assert_eq!(breaths.len(), 15);
        for breath in &breaths {
            assert!((breath.total_cycle_secs() - 4.0).abs() < 0.25, "{breath:?}");
            assert!(breath.inspiration_start < breath.expiration_start);
            assert!(breath.expiration_start < breath.end);
        }
    }

    #[test]
    fn test_breaths_are_contiguous() {
        let flow = sine_flow(25.0, 3.0, 60.0);
        let breaths = detect_breaths(&flow, &BreathConfig::default());
        assert!(breaths.len() >= 18);
        for pair in breaths.windows(2) {
            assert_eq!(pair[0].end, pair[1].inspiration_start);
        }
    }

    #[test]
    fn test_padding_ends_cycles() {
        // recording paused between 300 s and 400 s
        let mut flow = sine_flow(30.0, 4.0, 600.0);
        flow.samples[1500..2000].fill(0.0);
        let breaths = detect_breaths(&flow, &BreathConfig::default());

        let longest = breaths
            .iter()
            .map(BreathRecord::total_cycle_secs)
            .fold(0.0, f64::max);
        assert!(longest < 5.0, "longest cycle {longest}");
        let pause_start = flow.time_at(1500);
        let pause_end = flow.time_at(2000);
        assert!(breaths
            .iter()
            .all(|b| b.end <= pause_start || b.inspiration_start >= pause_end));
        assert!(breaths.len() >= 115, "{}", breaths.len());
        assert!(breaths.iter().any(|b| b.inspiration_start >= pause_end));
    }

    #[test]
    fn test_flat_signal_has_no_breaths() {
        let mut flow = sine_flow(0.0, 4.0, 30.0);
        flow.samples.iter_mut().for_each(|v| *v = 0.3);
        assert!(detect_breaths(&flow, &BreathConfig::default()).is_empty());
    }

    #[test]
    fn test_volume_proxy_scales_with_amplitude() {
        let small = detect_breaths(&sine_flow(10.0, 4.0, 40.0), &BreathConfig::default());
        let large = detect_breaths(&sine_flow(20.0, 4.0, 40.0), &BreathConfig::default());
        let ratio = large[3].total_flow / small[3].total_flow;
        assert!((ratio - 2.0).abs() < 0.05, "ratio {ratio}");
    }

    #[test]
    fn test_shallow_breath_is_merged() {
        let mut cycles = vec![Cycle {
            inspiration: 0,
            expiration: 10,
            end: 20,
            min: -20.0,
            max: 20.0,
            total: 100.0,
        }];
        let shallow = Cycle {
            inspiration: 20,
            expiration: 25,
            end: 30,
            min: -1.0,
            max: 2.0,
            total: 5.0,
        };
        push_cycle(&mut cycles, shallow, 5.0);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].end, 30);
        assert_eq!(cycles[0].total, 105.0);
    }

    #[test]
    fn test_long_breath_does_not_absorb() {
        let mut cycles = vec![Cycle {
            inspiration: 0,
            expiration: 30,
            end: 60,
            min: -20.0,
            max: 20.0,
            total: 100.0,
        }];
        let blip = Cycle {
            inspiration: 60,
            expiration: 61,
            end: 62,
            min: -1.0,
            max: 1.0,
            total: 1.0,
        };
        push_cycle(&mut cycles, blip, 5.0);
        assert_eq!(cycles.len(), 2);
    }

    #[test]
    fn test_variable_baseline_handles_offset() {
        let mut flow = sine_flow(30.0, 4.0, 62.0);
        flow.samples.iter_mut().for_each(|v| *v += 8.0);
        let config = BreathConfig {
            variable_baseline: true,
            ..BreathConfig::default()
        };
        let breaths = detect_breaths(&flow, &config);
        assert!((14..=15).contains(&breaths.len()), "{}", breaths.len());
    }
}
