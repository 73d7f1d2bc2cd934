//! Zero-phase Butterworth low-pass filtering

use std::f64::consts::{PI, SQRT_2};

/// Samples of odd extension added at each edge before filtering, per
/// coefficient of the filter
const PAD_PER_COEFFICIENT: usize = 6;

/// Cutoffs are clamped below this fraction of the sample rate
const MAX_CUTOFF_RATIO: f64 = 0.49;

/// Second-order Butterworth low-pass section (bilinear transform)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ButterworthLowPass {
    b: [f64; 3],
    /// Feedback coefficients; `a[0]` is normalised to 1
    a: [f64; 3],
}

impl ButterworthLowPass {
    /// Design a filter for `cutoff_hz` at `sample_rate_hz`.
    pub fn new(cutoff_hz: f64, sample_rate_hz: f64) -> Self {
        let cutoff = cutoff_hz.min(sample_rate_hz * MAX_CUTOFF_RATIO);
        // pre-warped analog frequency
        let k = (PI * cutoff / sample_rate_hz).tan();
        let k_sq = k * k;
        let denom = 1.0 + SQRT_2 * k + k_sq;

        let b0 = k_sq / denom;
        Self {
            b: [b0, 2.0 * b0, b0],
            a: [
                1.0,
                2.0 * (k_sq - 1.0) / denom,
                (1.0 - SQRT_2 * k + k_sq) / denom,
            ],
        }
    }

    /// Filter state that makes a constant input produce a constant output.
    fn steady_state(&self) -> [f64; 2] {
        let z1 = self.b[2] - self.a[2];
        let z0 = self.b[1] - self.a[1] + z1;
        [z0, z1]
    }

    /// One causal pass, starting from the steady state for `signal[0]`.
    pub fn filter(&self, signal: &[f64]) -> Vec<f64> {
        let Some(&first) = signal.first() else {
            return Vec::new();
        };
        let [mut z0, mut z1] = self.steady_state().map(|z| z * first);
        let [b0, b1, b2] = self.b;
        let [_, a1, a2] = self.a;

        signal
            .iter()
            .map(|&x| {
                let y = b0 * x + z0;
                z0 = b1 * x - a1 * y + z1;
                z1 = b2 * x - a2 * y;
                y
            })
            .collect()
    }

    /// Forward-backward filtering: no phase shift, squared magnitude response.
    ///
    /// Edges are padded with an odd reflection so the start-up transient
    /// falls outside the returned samples.
    pub fn filtfilt(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n < 2 {
            return signal.to_vec();
        }
        let pad = (PAD_PER_COEFFICIENT * self.b.len()).min(n - 1);

        let first = signal[0];
        let last = signal[n - 1];
        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        extended.extend_from_slice(signal);
        extended.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        let mut forward = self.filter(&extended);
        forward.reverse();
        let mut backward = self.filter(&forward);
        backward.reverse();

        backward[pad..pad + n].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: f64, secs: f64) -> Vec<f64> {
        (0..(secs * sample_rate) as usize)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_unity_dc_gain() {
        let filter = ButterworthLowPass::new(1.0, 5.0);
        let sum_b: f64 = filter.b.iter().sum();
        let sum_a: f64 = filter.a.iter().sum();
        assert!((sum_b / sum_a - 1.0).abs() < 1e-12);

        let constant = vec![7.5; 40];
        for value in filter.filtfilt(&constant) {
            assert!((value - 7.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_passband_without_phase_shift() {
        let filter = ButterworthLowPass::new(1.0, 5.0);
        let input = sine(0.25, 5.0, 40.0);
        let output = filter.filtfilt(&input);
        assert_eq!(output.len(), input.len());

        // away from the edges the slow sine passes essentially unchanged
        for i in 25..output.len() - 25 {
            assert!((output[i] - input[i]).abs() < 0.05, "sample {i}");
        }
    }

    #[test]
    fn test_stopband_is_attenuated() {
        let filter = ButterworthLowPass::new(1.0, 25.0);
        let noise = sine(8.0, 25.0, 20.0);
        let output = filter.filtfilt(&noise);
        let peak = output[50..450].iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(peak < 0.05, "peak {peak}");
    }

    #[test]
    fn test_short_inputs() {
        let filter = ButterworthLowPass::new(1.0, 5.0);
        assert!(filter.filtfilt(&[]).is_empty());
        assert_eq!(filter.filtfilt(&[3.0]), vec![3.0]);
        assert_eq!(filter.filtfilt(&[3.0, 3.0, 3.0]).len(), 3);
    }

    #[test]
    fn test_cutoff_above_nyquist_is_clamped() {
        let filter = ButterworthLowPass::new(10.0, 5.0);
        assert!(filter.a.iter().chain(filter.b.iter()).all(|c| c.is_finite()));
    }
}
