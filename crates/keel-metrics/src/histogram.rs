//! Streaming count/sum/min/max aggregate.
//!
//! No buckets are kept. A quantile sketch can be added as another field
//! of [`Histogram`] without changing the observe/summary contract.

use serde::{Deserialize, Serialize};

/// Running aggregate of observed values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    count: u64,
    sum: f64,
    /// `None` until the first observation.
    min: Option<f64>,
    max: Option<f64>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one value into the aggregate. The caller guarantees it is finite.
    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn summary(&self) -> HistogramSummary {
        HistogramSummary {
            count: self.count,
            sum: self.sum,
            avg: self.avg(),
            min: self.min,
            max: self.max,
        }
    }
}

/// Reporting shape of a histogram: `{count, sum, avg, min, max}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_extremes() {
        let h = Histogram::new();
        assert_eq!(h.count(), 0);
        assert_eq!(h.min(), None);
        assert_eq!(h.max(), None);
        assert_eq!(h.avg(), None);
    }

    #[test]
    fn tracks_count_sum_min_max_avg() {
        let values = [12.5, -3.0, 40.0, 7.25, 0.0];
        let mut h = Histogram::new();
        for v in values {
            h.observe(v);
        }

        let sum: f64 = values.iter().sum();
        assert_eq!(h.count(), values.len() as u64);
        assert!((h.sum() - sum).abs() < 1e-9);
        assert_eq!(h.min(), Some(-3.0));
        assert_eq!(h.max(), Some(40.0));
        let avg = h.avg().unwrap();
        assert!((avg - sum / values.len() as f64).abs() < 1e-9);
    }

    #[test]
    fn single_observation_is_min_and_max() {
        let mut h = Histogram::new();
        h.observe(4.0);
        let s = h.summary();
        assert_eq!(s.min, Some(4.0));
        assert_eq!(s.max, Some(4.0));
        assert_eq!(s.avg, Some(4.0));
    }
}
