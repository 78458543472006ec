//! Fixed set of running-average buckets shared by the trend and seasonal models

use super::Deviation;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    count: u64,
    mean: f64,
    /// Average before the most recent update to this bucket
    previous_mean: Option<f64>,
}

/// Running averages indexed by a time slot
#[derive(Debug, Clone)]
pub(crate) struct BucketedAverages {
    buckets: Vec<Bucket>,
}

impl BucketedAverages {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            buckets: vec![Bucket::default(); len],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Fold a value into a bucket's running average
    pub(crate) fn update(&mut self, index: usize, value: f64) {
        let Some(bucket) = self.buckets.get_mut(index) else {
            return;
        };
        bucket.previous_mean = (bucket.count > 0).then_some(bucket.mean);
        bucket.count += 1;
        bucket.mean += (value - bucket.mean) / bucket.count as f64;
    }

    /// Fractional deviation of `value` from the bucket's pre-update average
    ///
    /// `None` if the bucket had no history before its last update, or that
    /// history averages to zero.
    pub(crate) fn deviation(&self, index: usize, value: f64) -> Option<Deviation> {
        let previous = self.buckets.get(index)?.previous_mean?;
        if previous.abs() < f64::EPSILON {
            return None;
        }
        Some(Deviation {
            score: (value - previous).abs() / previous.abs(),
            baseline: previous,
        })
    }

    pub(crate) fn mean(&self, index: usize) -> Option<f64> {
        self.buckets
            .get(index)
            .filter(|b| b.count > 0)
            .map(|b| b.mean)
    }

    pub(crate) fn occupied(&self) -> usize {
        self.buckets.iter().filter(|b| b.count > 0).count()
    }

    pub(crate) fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = Bucket::default());
    }
}
