//! Robust reduction of repeated trials to one representative sample.
//!
//! Samples whose z-score magnitude exceeds the threshold are discarded;
//! of the survivors, the one closest to their median is chosen. The full
//! sample is returned, not only its scalar.

use tracing::debug;

use crate::error::BenchError;
use crate::record::Measured;

/// Samples with `|z|` above this are treated as outliers.
pub const DEFAULT_Z_SCORE_THRESHOLD: f64 = 1.4;

/// Outcome of a reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a, T> {
    pub chosen: &'a T,
    /// Index of `chosen` in the input.
    pub index: usize,
    pub kept: usize,
    pub discarded: usize,
}

/// Outlier-aware median selector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregator {
    pub z_threshold: f64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            z_threshold: DEFAULT_Z_SCORE_THRESHOLD,
        }
    }
}

impl Aggregator {
    pub fn new(z_threshold: f64) -> Self {
        Self { z_threshold }
    }

    /// Choose the representative sample.
    ///
    /// A single sample is returned as-is. Otherwise non-finite metrics are
    /// unusable, outliers are dropped and the sample nearest the median of
    /// the rest wins; ties go to the earlier sample.
    pub fn reduce<'a, T: Measured>(&self, samples: &'a [T]) -> Result<Selection<'a, T>, BenchError> {
        if samples.len() == 1 {
            return Ok(Selection {
                chosen: &samples[0],
                index: 0,
                kept: 1,
                discarded: 0,
            });
        }

        let usable: Vec<(usize, f64)> = samples
            .iter()
            .enumerate()
            .map(|(i, s)| (i, s.metric()))
            .filter(|(_, v)| v.is_finite())
            .collect();

        let values: Vec<f64> = usable.iter().map(|(_, v)| *v).collect();
        let scores = z_scores(&values);

        let survivors: Vec<(usize, f64)> = usable
            .iter()
            .zip(scores.iter())
            .filter(|(_, z)| z.abs() <= self.z_threshold)
            .map(|(entry, _)| *entry)
            .collect();

        if survivors.is_empty() {
            return Err(BenchError::InsufficientData {
                usable: 0,
                total: samples.len(),
            });
        }

        let surviving_values: Vec<f64> = survivors.iter().map(|(_, v)| *v).collect();
        let center = median(&surviving_values).ok_or(BenchError::InsufficientData {
            usable: 0,
            total: samples.len(),
        })?;

        let mut best = survivors[0];
        for candidate in &survivors[1..] {
            if (candidate.1 - center).abs() < (best.1 - center).abs() {
                best = *candidate;
            }
        }

        debug!(
            total = samples.len(),
            kept = survivors.len(),
            median = center,
            chosen = best.1,
            "reduced samples"
        );

        Ok(Selection {
            chosen: &samples[best.0],
            index: best.0,
            kept: survivors.len(),
            discarded: samples.len() - survivors.len(),
        })
    }
}

/// Reduce with the default threshold.
pub fn reduce<T: Measured>(samples: &[T]) -> Result<Selection<'_, T>, BenchError> {
    Aggregator::default().reduce(samples)
}

/// Population z-scores. A zero spread yields all zeros.
pub fn z_scores(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 || !std_dev.is_finite() {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std_dev).collect()
}

/// Median; mean of the middle pair for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sample_passthrough() {
        let samples = [f64::NAN];
        let selection = reduce(&samples).unwrap();
        assert_eq!(selection.index, 0);
        assert!(selection.chosen.is_nan());

        let samples = [1_000_000.0];
        assert_eq!(*reduce(&samples).unwrap().chosen, 1_000_000.0);
    }

    #[test]
    fn test_outlier_discarded() {
        let samples = [10.0, 10.2, 9.8, 10.1, 100.0];
        let selection = reduce(&samples).unwrap();
        assert_eq!(selection.kept, 4);
        assert_eq!(selection.discarded, 1);
        assert_ne!(selection.index, 4);
    }

    #[test]
    fn test_tie_goes_to_earlier_sample() {
        // Survivors 10.0, 10.5, 9.5, 11.0 have median 10.25; 10.0 and 10.5
        // are exactly 0.25 away.
        let samples = [10.0, 10.5, 9.5, 11.0, 100.0];
        let selection = reduce(&samples).unwrap();
        assert_eq!(selection.kept, 4);
        assert_eq!(*selection.chosen, 10.0);
        assert_eq!(selection.index, 0);

        let reversed = [10.5, 10.0, 9.5, 11.0, 100.0];
        assert_eq!(*reduce(&reversed).unwrap().chosen, 10.5);
    }

    #[test]
    fn test_odd_survivors_pick_median() {
        let samples = [5.0, 7.0, 6.0];
        let selection = reduce(&samples).unwrap();
        assert_eq!(*selection.chosen, 6.0);
        assert_eq!(selection.index, 2);
    }

    #[test]
    fn test_identical_values_keep_all() {
        let samples = [3.0, 3.0, 3.0];
        let selection = reduce(&samples).unwrap();
        assert_eq!(selection.kept, 3);
        assert_eq!(selection.index, 0);
    }

    #[test]
    fn test_empty_is_insufficient() {
        let samples: [f64; 0] = [];
        let err = reduce(&samples).unwrap_err();
        assert!(matches!(err, BenchError::InsufficientData { total: 0, .. }));
    }

    #[test]
    fn test_all_non_finite_is_insufficient() {
        let samples = [f64::NAN, f64::INFINITY];
        let err = reduce(&samples).unwrap_err();
        assert!(matches!(err, BenchError::InsufficientData { total: 2, .. }));
    }

    #[test]
    fn test_threshold_controls_discards() {
        // z-scores are 0, ±0.707 and ±1.414
        let samples = [1.0, 2.0, 3.0, 4.0, 5.0];
        let lenient = Aggregator::new(2.0).reduce(&samples).unwrap();
        let default = Aggregator::default().reduce(&samples).unwrap();
        let strict = Aggregator::new(0.5).reduce(&samples).unwrap();
        assert_eq!(lenient.kept, 5);
        assert_eq!(default.kept, 3);
        assert_eq!(strict.kept, 1);
        assert_eq!(*strict.chosen, 3.0);
    }

    #[test]
    fn test_z_scores_population() {
        let scores = z_scores(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        // mean 5, population std 2
        assert!((scores[0] + 1.5).abs() < 1e-12);
        assert!((scores[7] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }
}
