//! Cumulative per-node feature histograms.
//!
//! For one node and one feature the histogram stores, per threshold bin,
//! the cumulative `count`, `Σy` and `Σy²` over the node's samples whose
//! value is `<=` that threshold. The last bin therefore holds the node
//! totals, and a split at threshold index `t` is scored from two array
//! reads.
//!
//! # Lifecycle
//!
//! A histogram belongs to exactly one tree node at a time. On a split the
//! left child always gets a fresh build from its sample set; the right
//! child takes the parent's histogram, transformed in place by subtracting
//! the left. The hand-off is a move, so the peak cost at the moment of a
//! split is two histograms, not three.

use rayon::prelude::*;

use super::cuts::BinnedMatrix;

// ============================================================================
// FeatureHistogram
// ============================================================================

/// Cumulative statistics for one feature at one node.
#[derive(Debug, Clone)]
pub struct FeatureHistogram {
    /// Cumulative sample count per threshold bin.
    count: Vec<u32>,
    /// Cumulative label sum per threshold bin.
    sum: Vec<f64>,
    /// Cumulative squared-label sum per threshold bin.
    sqsum: Vec<f64>,
}

impl FeatureHistogram {
    /// Build from the node's sample ids against one feature's bin column.
    ///
    /// `bins` is indexed by sample id; `labels` by sample id as well.
    pub fn build(n_bins: usize, bins: &[u32], labels: &[f64], samples: &[u32]) -> Self {
        let mut count = vec![0u32; n_bins];
        let mut sum = vec![0.0f64; n_bins];
        let mut sqsum = vec![0.0f64; n_bins];

        for &s in samples {
            let bin = bins[s as usize] as usize;
            let y = labels[s as usize];
            count[bin] += 1;
            sum[bin] += y;
            sqsum[bin] += y * y;
        }

        // Per-bin tallies become cumulative in one pass.
        for t in 1..n_bins {
            count[t] += count[t - 1];
            sum[t] += sum[t - 1];
            sqsum[t] += sqsum[t - 1];
        }

        Self { count, sum, sqsum }
    }

    /// Number of threshold bins.
    #[inline]
    pub fn num_bins(&self) -> usize {
        self.count.len()
    }

    /// Cumulative count at threshold index `t`.
    #[inline]
    pub fn count(&self, t: usize) -> u32 {
        self.count[t]
    }

    /// Cumulative label sum at threshold index `t`.
    #[inline]
    pub fn sum(&self, t: usize) -> f64 {
        self.sum[t]
    }

    /// Cumulative squared-label sum at threshold index `t`.
    #[inline]
    pub fn sqsum(&self, t: usize) -> f64 {
        self.sqsum[t]
    }

    /// Node total count (last bin; 0 for a feature with no bins).
    #[inline]
    pub fn total_count(&self) -> u32 {
        self.count.last().copied().unwrap_or(0)
    }

    /// Node total label sum.
    #[inline]
    pub fn total_sum(&self) -> f64 {
        self.sum.last().copied().unwrap_or(0.0)
    }

    /// Node total squared-label sum.
    #[inline]
    pub fn total_sqsum(&self) -> f64 {
        self.sqsum.last().copied().unwrap_or(0.0)
    }

    /// Subtract a left-child histogram, leaving the right child's.
    ///
    /// Valid because cumulative sums are linear in the sample set.
    pub fn subtract(&mut self, left: &FeatureHistogram) {
        debug_assert_eq!(self.count.len(), left.count.len());
        for t in 0..self.count.len() {
            self.count[t] -= left.count[t];
            self.sum[t] -= left.sum[t];
            self.sqsum[t] -= left.sqsum[t];
        }
    }
}

// ============================================================================
// NodeHistogram
// ============================================================================

/// Histograms for all features at a single tree node.
#[derive(Debug, Clone)]
pub struct NodeHistogram {
    features: Vec<FeatureHistogram>,
}

impl NodeHistogram {
    /// Build for the full training set (the root node).
    pub fn from_all_samples(binned: &BinnedMatrix, labels: &[f64]) -> Self {
        let samples: Vec<u32> = (0..binned.num_rows() as u32).collect();
        Self::from_samples(binned, labels, &samples)
    }

    /// Build for an arbitrary sample-id set, in parallel across features.
    pub fn from_samples(binned: &BinnedMatrix, labels: &[f64], samples: &[u32]) -> Self {
        let features: Vec<FeatureHistogram> = (0..binned.num_features())
            .into_par_iter()
            .map(|f| {
                FeatureHistogram::build(binned.num_bins(f), binned.feature_bins(f), labels, samples)
            })
            .collect();

        Self { features }
    }

    /// Number of features.
    #[inline]
    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// Histogram of one feature.
    #[inline]
    pub fn feature(&self, f: usize) -> &FeatureHistogram {
        &self.features[f]
    }

    /// Node total count (taken from feature 0; all features agree).
    #[inline]
    pub fn total_count(&self) -> u32 {
        self.features.first().map_or(0, |fh| fh.total_count())
    }

    /// Within-node deviance `Σy² - (Σy)²/count`, 0 for an empty node.
    pub fn deviance(&self) -> f64 {
        let Some(first) = self.features.first() else {
            return 0.0;
        };
        let count = first.total_count();
        if count == 0 {
            return 0.0;
        }
        let sum = first.total_sum();
        first.total_sqsum() - sum * sum / count as f64
    }

    /// Turn this parent histogram into the right child by subtracting the
    /// freshly built left child.
    pub fn subtract(&mut self, left: &NodeHistogram) {
        debug_assert_eq!(self.features.len(), left.features.len());
        for (own, l) in self.features.iter_mut().zip(&left.features) {
            own.subtract(l);
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::data::Dataset;
    use crate::training::tree::ThresholdCuts;

    fn setup() -> (BinnedMatrix, Vec<f64>) {
        // 6 rows, 1 feature with values 1..=3 duplicated
        let features = vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0];
        let ds = Dataset::from_parts(features, vec![0.0; 6], 1, &[6]).unwrap();
        let cuts = ThresholdCuts::from_dataset(&ds);
        let binned = BinnedMatrix::from_dataset(&ds, &cuts);
        let labels = vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0];
        (binned, labels)
    }

    #[test]
    fn cumulative_arrays_hold_totals_in_last_bin() {
        let (binned, labels) = setup();
        let hist = NodeHistogram::from_all_samples(&binned, &labels);
        let fh = hist.feature(0);

        assert_eq!(fh.num_bins(), 3);
        assert_eq!(fh.count(0), 2);
        assert_eq!(fh.count(1), 4);
        assert_eq!(fh.total_count(), 6);
        assert_relative_eq!(fh.total_sum(), 12.0);
        assert_relative_eq!(fh.total_sqsum(), 28.0);

        // Monotonic non-decreasing cumulative count.
        for t in 1..fh.num_bins() {
            assert!(fh.count(t) >= fh.count(t - 1));
        }
    }

    #[test]
    fn deviance_matches_definition() {
        let (binned, labels) = setup();
        let hist = NodeHistogram::from_all_samples(&binned, &labels);
        // sqsum - sum^2 / n = 28 - 144/6 = 4
        assert_relative_eq!(hist.deviance(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn subset_build_and_subtraction_are_consistent() {
        let (binned, labels) = setup();
        let mut parent = NodeHistogram::from_all_samples(&binned, &labels);

        let left_samples = vec![0u32, 3]; // the two rows with value 1.0
        let left = NodeHistogram::from_samples(&binned, &labels, &left_samples);
        assert_eq!(left.total_count(), 2);
        assert_relative_eq!(left.feature(0).total_sum(), 2.0);

        parent.subtract(&left);
        let right = parent;
        assert_eq!(right.total_count(), 4);
        assert_relative_eq!(right.feature(0).total_sum(), 10.0);
        assert_relative_eq!(right.feature(0).total_sqsum(), 26.0);

        // c_L + c_R = c_total and s_L + s_R = s_total per bin.
        let full = NodeHistogram::from_all_samples(&binned, &labels);
        for t in 0..full.feature(0).num_bins() {
            assert_eq!(
                left.feature(0).count(t) + right.feature(0).count(t),
                full.feature(0).count(t)
            );
            assert_relative_eq!(
                left.feature(0).sum(t) + right.feature(0).sum(t),
                full.feature(0).sum(t),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn empty_sample_set_has_zero_totals() {
        let (binned, labels) = setup();
        let hist = NodeHistogram::from_samples(&binned, &labels, &[]);
        assert_eq!(hist.total_count(), 0);
        assert_eq!(hist.deviance(), 0.0);
    }
}
