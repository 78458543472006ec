//! Rolling z-score detection
//!
//! Keeps the most recent samples in a fixed-capacity ring buffer and flags
//! values lying more than a configurable number of standard deviations from
//! the buffer mean.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use super::{DetectionModel, Deviation, ModelKind, ModelStats, ThresholdConfig};

/// Default rolling window size (samples)
pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// Default number of standard deviations considered anomalous
pub const DEFAULT_Z_THRESHOLD: f64 = 2.0;

/// Minimum samples before a z-score is meaningful
const MIN_SAMPLES_FOR_SCORE: usize = 2;

/// Per-sample rounding allowance; scaled by window length and mean magnitude
const RELATIVE_VARIANCE_FLOOR: f64 = 4.0 * f64::EPSILON;

/// Rolling window with z-score deviation detection
#[derive(Debug, Clone)]
pub struct StatisticalModel {
    /// Number of standard deviations to consider anomalous
    pub threshold: f64,
    capacity: usize,
    samples: VecDeque<f64>,
}

impl StatisticalModel {
    /// Create a model holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_SAMPLES_FOR_SCORE);
        Self {
            threshold: DEFAULT_Z_THRESHOLD,
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Current window contents, oldest first
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// Push a value, evicting the oldest when the window is full
    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Mean of the current window
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Sample standard deviation (Bessel's correction), two-pass for stability
    pub fn std_dev(&self) -> Option<f64> {
        let n = self.samples.len();
        if n < MIN_SAMPLES_FOR_SCORE {
            return None;
        }
        let mean = self.mean()?;
        let variance = self
            .samples
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        Some(variance.sqrt())
    }

    /// True when every held value is the same
    fn is_flat(&self) -> bool {
        let mut values = self.samples.iter();
        match values.next() {
            Some(first) => values.all(|v| v == first),
            None => true,
        }
    }

    /// `|v - mean| / stddev` over the current window
    ///
    /// Zero while fewer than two samples are held or the window has no
    /// variance, whatever the window length.
    pub fn z_score(&self, value: f64) -> f64 {
        if self.is_flat() {
            return 0.0;
        }
        let (Some(mean), Some(std_dev)) = (self.mean(), self.std_dev()) else {
            return 0.0;
        };

        let n = self.samples.len() as f64;
        if std_dev <= RELATIVE_VARIANCE_FLOOR * n * mean.abs().max(1.0) {
            return 0.0;
        }

        (value - mean).abs() / std_dev
    }

    pub fn is_anomaly(&self, value: f64) -> bool {
        self.z_score(value) > self.threshold
    }

    /// Change the window capacity, dropping the oldest samples if it shrinks
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(MIN_SAMPLES_FOR_SCORE);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }
}

impl Default for StatisticalModel {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl DetectionModel for StatisticalModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Statistical
    }

    fn add_sample(&mut self, value: f64, _at: DateTime<Utc>) {
        self.push(value);
    }

    fn score(&self, value: f64, _at: DateTime<Utc>) -> Option<Deviation> {
        if self.samples.len() < MIN_SAMPLES_FOR_SCORE {
            return None;
        }
        Some(Deviation {
            score: self.z_score(value),
            baseline: self.mean()?,
        })
    }

    fn reset(&mut self) {
        self.samples.clear();
    }

    fn stats(&self) -> ModelStats {
        ModelStats {
            sample_count: self.samples.len() as u64,
            mean: self.mean(),
            std_dev: self.std_dev(),
            ..ModelStats::default()
        }
    }

    fn reconfigure(&mut self, config: &ThresholdConfig) {
        self.threshold = config.z_threshold;
        if config.window_size != self.capacity {
            self.resize(config.window_size);
        }
    }
}
