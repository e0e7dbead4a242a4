//! Threshold discovery and sample binning.

use rayon::prelude::*;

use crate::data::Dataset;

// ============================================================================
// ThresholdCuts
// ============================================================================

/// Per-feature sorted distinct feature values, the split candidates.
///
/// Thresholds are stored in one flat vector with an offsets table, so a
/// feature's candidates are a contiguous slice. Within a feature the
/// thresholds are strictly increasing.
#[derive(Debug, Clone)]
pub struct ThresholdCuts {
    /// Concatenated per-feature sorted distinct values.
    values: Vec<f32>,
    /// `offsets[f]..offsets[f + 1]` indexes feature `f`'s thresholds.
    offsets: Vec<usize>,
}

impl ThresholdCuts {
    /// Collect the distinct values of every feature column.
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let n_features = dataset.num_features();
        let n_rows = dataset.num_instances();

        let per_feature: Vec<Vec<f32>> = (0..n_features)
            .into_par_iter()
            .map(|f| {
                let mut column: Vec<f32> = (0..n_rows).map(|s| dataset.at(s, f)).collect();
                column.sort_by(|a, b| a.partial_cmp(b).unwrap());
                column.dedup();
                column
            })
            .collect();

        let mut offsets = Vec::with_capacity(n_features + 1);
        offsets.push(0);
        let mut values = Vec::new();
        for column in per_feature {
            values.extend_from_slice(&column);
            offsets.push(values.len());
        }

        Self { values, offsets }
    }

    /// Number of features.
    #[inline]
    pub fn num_features(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Number of thresholds for feature `f`.
    #[inline]
    pub fn num_thresholds(&self, f: usize) -> usize {
        self.offsets[f + 1] - self.offsets[f]
    }

    /// Feature `f`'s thresholds as a strictly increasing slice.
    #[inline]
    pub fn thresholds(&self, f: usize) -> &[f32] {
        &self.values[self.offsets[f]..self.offsets[f + 1]]
    }

    /// The split value at threshold index `t` of feature `f`.
    #[inline]
    pub fn threshold(&self, f: usize, t: usize) -> f32 {
        self.thresholds(f)[t]
    }
}

// ============================================================================
// BinnedMatrix
// ============================================================================

/// Column-major matrix of per-sample threshold bin ids.
///
/// `bin(s, f) == t` means sample `s`'s value for feature `f` equals
/// `cuts.threshold(f, t)`; routing a sample left on a split at threshold
/// index `t` is therefore the integer test `bin(s, f) <= t`.
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    /// `bins[f * n_rows + s]`
    bins: Vec<u32>,
    /// Number of bins per feature (= the feature's threshold count).
    bin_counts: Vec<usize>,
    n_rows: usize,
    n_features: usize,
}

impl BinnedMatrix {
    /// Bin every sample of `dataset` against `cuts`.
    pub fn from_dataset(dataset: &Dataset, cuts: &ThresholdCuts) -> Self {
        let n_rows = dataset.num_instances();
        let n_features = dataset.num_features();
        debug_assert_eq!(n_features, cuts.num_features());

        let mut bins = vec![0u32; n_rows * n_features];
        bins.par_chunks_mut(n_rows.max(1))
            .enumerate()
            .take(n_features)
            .for_each(|(f, column)| {
                let thresholds = cuts.thresholds(f);
                for (s, bin) in column.iter_mut().enumerate() {
                    let value = dataset.at(s, f);
                    // Every value was observed at cut time, so the search hits.
                    let t = thresholds
                        .binary_search_by(|probe| probe.partial_cmp(&value).unwrap())
                        .expect("value missing from threshold cuts");
                    *bin = t as u32;
                }
            });

        let bin_counts = (0..n_features).map(|f| cuts.num_thresholds(f)).collect();

        Self {
            bins,
            bin_counts,
            n_rows,
            n_features,
        }
    }

    /// Number of bins for feature `f`.
    #[inline]
    pub fn num_bins(&self, f: usize) -> usize {
        self.bin_counts[f]
    }

    /// Number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of features.
    #[inline]
    pub fn num_features(&self) -> usize {
        self.n_features
    }

    /// Bin id of one sample under one feature.
    #[inline]
    pub fn bin(&self, sample: usize, feature: usize) -> u32 {
        self.bins[feature * self.n_rows + sample]
    }

    /// All bin ids for feature `f`, indexed by sample.
    #[inline]
    pub fn feature_bins(&self, f: usize) -> &[u32] {
        &self.bins[f * self.n_rows..(f + 1) * self.n_rows]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        // 5 rows, 2 features; feature 1 has duplicated values
        let features = vec![
            3.0, 1.0, //
            1.0, 1.0, //
            2.0, 5.0, //
            5.0, 1.0, //
            4.0, 5.0, //
        ];
        Dataset::from_parts(features, vec![0.0; 5], 2, &[5]).unwrap()
    }

    #[test]
    fn cuts_are_sorted_distinct() {
        let cuts = ThresholdCuts::from_dataset(&dataset());
        assert_eq!(cuts.num_features(), 2);
        assert_eq!(cuts.thresholds(0), &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(cuts.thresholds(1), &[1.0, 5.0]);
        assert_eq!(cuts.num_thresholds(1), 2);
        assert_eq!(cuts.threshold(0, 2), 3.0);
    }

    #[test]
    fn bins_route_like_raw_values() {
        let ds = dataset();
        let cuts = ThresholdCuts::from_dataset(&ds);
        let binned = BinnedMatrix::from_dataset(&ds, &cuts);

        assert_eq!(binned.num_rows(), 5);
        assert_eq!(binned.feature_bins(1), &[0, 0, 1, 0, 1]);

        // bin(s, f) <= t must agree with value <= threshold(f, t)
        for f in 0..2 {
            for t in 0..cuts.num_thresholds(f) {
                let threshold = cuts.threshold(f, t);
                for s in 0..5 {
                    assert_eq!(binned.bin(s, f) <= t as u32, ds.at(s, f) <= threshold);
                }
            }
        }
    }
}
