//! Statistics engine
//!
//! Online sliding-window mean and variance, and a bounded heap for tail
//! percentiles that avoids sorting a full night of samples.

use std::collections::VecDeque;

use crate::types::SignalStatistics;

pub const MEDIAN: f64 = 0.5;
pub const PERCENTILE_95: f64 = 0.95;
pub const PERCENTILE_995: f64 = 0.995;

/// Tolerance applied before rounding heap capacities up
const CAPACITY_EPSILON: f64 = 1e-9;

/// Sliding-window mean and population variance (Welford).
///
/// While the window fills, statistics cover the samples seen so far; once
/// full, each push replaces the oldest sample.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: VecDeque<f64>,
    capacity: usize,
    mean: f64,
    /// Sum of squared deviations from the mean
    m2: f64,
}

impl MovingAverage {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.window.len() < self.capacity {
            self.window.push_back(value);
            let delta = value - self.mean;
            self.mean += delta / self.window.len() as f64;
            self.m2 += delta * (value - self.mean);
        } else if let Some(oldest) = self.window.pop_front() {
            self.window.push_back(value);
            let old_mean = self.mean;
            self.mean += (value - oldest) / self.capacity as f64;
            self.m2 += (value - oldest) * (value - self.mean + oldest - old_mean);
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            (self.m2 / self.window.len() as f64).max(0.0)
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.window.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.mean = 0.0;
        self.m2 = 0.0;
    }
}

/// Array-backed min-heap keeping the largest `capacity` samples seen.
///
/// Sized to `total × (1 − percentile)`, its root is the percentile boundary.
#[derive(Debug, Clone)]
pub struct PercentileHeap {
    heap: Vec<f64>,
    capacity: usize,
}

impl PercentileHeap {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            heap: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Heap sized for the `percentile` (0..1) of `total_samples` values
    pub fn for_percentile(total_samples: usize, percentile: f64) -> Self {
        Self::with_capacity(tail_size(total_samples, percentile))
    }

    pub fn push(&mut self, value: f64) {
        if self.heap.len() < self.capacity {
            self.heap.push(value);
            self.sift_up(self.heap.len() - 1);
        } else if value > self.heap[0] {
            self.heap[0] = value;
            self.sift_down(0);
        }
    }

    /// Smallest retained sample
    pub fn peek(&self) -> Option<f64> {
        self.heap.first().copied()
    }

    pub fn pop(&mut self) -> Option<f64> {
        if self.heap.is_empty() {
            return None;
        }
        let top = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(top)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop the smallest samples until only `size` remain.
    pub fn shrink_to(&mut self, size: usize) {
        while self.heap.len() > size.max(1) {
            self.pop();
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[i] >= self.heap[parent] {
                break;
            }
            self.heap.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.heap.len();
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut smallest = i;
            if left < n && self.heap[left] < self.heap[smallest] {
                smallest = left;
            }
            if right < n && self.heap[right] < self.heap[smallest] {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.heap.swap(i, smallest);
            i = smallest;
        }
    }
}

/// Number of samples at or above the `percentile` boundary
pub fn tail_size(total_samples: usize, percentile: f64) -> usize {
    ((total_samples as f64 * (1.0 - percentile) - CAPACITY_EPSILON).ceil() as usize).max(1)
}

/// Summarise one signal's samples; `None` when there are none.
pub fn summarize(name: &str, samples: &[f64]) -> Option<SignalStatistics> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len();

    let mut median = PercentileHeap::for_percentile(n, MEDIAN);
    let mut tail = PercentileHeap::for_percentile(n, PERCENTILE_95);
    let mut sum = 0.0;
    let mut maximum = f64::NEG_INFINITY;
    let mut minimum_positive: Option<f64> = None;
    for &value in samples {
        median.push(value);
        tail.push(value);
        sum += value;
        maximum = maximum.max(value);
        if value > 0.0 {
            minimum_positive = Some(minimum_positive.map_or(value, |m| m.min(value)));
        }
    }
    let mean = sum / n as f64;
    let mean_deviation = samples.iter().map(|v| (v - mean).abs()).sum::<f64>() / n as f64;

    let percentile_95 = tail.peek().unwrap_or(maximum);
    tail.shrink_to(tail_size(n, PERCENTILE_995));
    let percentile_995 = tail.peek().unwrap_or(maximum);

    Some(SignalStatistics {
        signal_name: name.to_string(),
        minimum: minimum_positive.unwrap_or(0.0),
        maximum,
        median: median.peek().unwrap_or(mean),
        mean,
        percentile_95,
        percentile_995,
        mean_deviation,
    })
}
