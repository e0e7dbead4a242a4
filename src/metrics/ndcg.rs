//! Discounted Cumulative Gain metrics.
//!
//! Gains are exponential (`2^label - 1`), discounts logarithmic
//! (`log2(rank + 2)`). [`Ndcg`] normalizes by the ideal ordering's DCG;
//! [`Dcg`] reports the raw value.

use crate::data::Dataset;

use super::{mean_over_queries, Metric, SwapDeltas};

/// `2^label - 1` gain of a single relevance label.
#[inline]
fn gain(label: f32) -> f64 {
    (label as f64).exp2() - 1.0
}

/// DCG of labels already in rank order, truncated at `k` (`0` = all).
pub(crate) fn dcg(labels: &[f32], k: usize) -> f64 {
    let size = if k == 0 || k > labels.len() { labels.len() } else { k };
    labels[..size]
        .iter()
        .enumerate()
        .map(|(i, &label)| gain(label) / ((i + 2) as f64).log2())
        .sum()
}

/// Ideal DCG: DCG of the labels sorted descending.
pub(crate) fn ideal_dcg(labels: &[f32], k: usize) -> f64 {
    let mut sorted = labels.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
    dcg(&sorted, k)
}

/// Indices of `scores` sorted descending; stable on ties.
fn rank_by_scores(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap());
    order
}

// =============================================================================
// NDCG
// =============================================================================

/// Normalized Discounted Cumulative Gain at a rank cutoff.
///
/// Per query: `DCG@k / IDCG@k`, or 0 when the ideal DCG is 0 (all labels
/// zero) or the query is empty. Dataset score is the unweighted mean over
/// queries. A cutoff of `0` uses all results.
#[derive(Debug, Clone, Copy)]
pub struct Ndcg {
    cutoff: usize,
}

impl Ndcg {
    /// NDCG@`cutoff`; `0` means no cutoff.
    pub fn new(cutoff: usize) -> Self {
        Self { cutoff }
    }

    /// Configured rank cutoff.
    pub fn cutoff(&self) -> usize {
        self.cutoff
    }
}

impl Metric for Ndcg {
    fn evaluate_query(&self, labels: &[f32], scores: &[f64]) -> f64 {
        debug_assert_eq!(labels.len(), scores.len());
        if labels.is_empty() {
            return 0.0;
        }
        let k = if self.cutoff == 0 || self.cutoff > labels.len() {
            labels.len()
        } else {
            self.cutoff
        };
        let idcg = ideal_dcg(labels, k);
        if idcg <= 0.0 {
            return 0.0;
        }
        let ranked: Vec<f32> = rank_by_scores(scores).into_iter().map(|i| labels[i]).collect();
        dcg(&ranked, k) / idcg
    }

    fn evaluate_dataset(&self, dataset: &Dataset, scores: &[f64]) -> f64 {
        mean_over_queries(self, dataset, scores)
    }

    fn swap_deltas(&self, labels: &[f32]) -> Option<SwapDeltas> {
        let n = labels.len();
        let k = if self.cutoff == 0 || self.cutoff > n { n } else { self.cutoff };
        let mut deltas = SwapDeltas::zeros(n);
        let idcg = ideal_dcg(labels, k);
        if idcg > 0.0 {
            for i in 0..k {
                let discount_i = 1.0 / ((i + 2) as f64).log2();
                let gain_i = gain(labels[i]);
                for j in (i + 1)..n {
                    let discount_j = 1.0 / ((j + 2) as f64).log2();
                    let delta = (discount_i - discount_j).abs() * (gain_i - gain(labels[j])).abs() / idcg;
                    deltas.set(i, j, delta);
                }
            }
        }
        Some(deltas)
    }

    fn name(&self) -> &'static str {
        "NDCG"
    }
}

// =============================================================================
// DCG
// =============================================================================

/// Raw Discounted Cumulative Gain at a rank cutoff, averaged over queries.
#[derive(Debug, Clone, Copy)]
pub struct Dcg {
    cutoff: usize,
}

impl Dcg {
    /// DCG@`cutoff`; `0` means no cutoff.
    pub fn new(cutoff: usize) -> Self {
        Self { cutoff }
    }
}

impl Metric for Dcg {
    fn evaluate_query(&self, labels: &[f32], scores: &[f64]) -> f64 {
        debug_assert_eq!(labels.len(), scores.len());
        if labels.is_empty() {
            return 0.0;
        }
        let ranked: Vec<f32> = rank_by_scores(scores).into_iter().map(|i| labels[i]).collect();
        dcg(&ranked, self.cutoff)
    }

    fn evaluate_dataset(&self, dataset: &Dataset, scores: &[f64]) -> f64 {
        mean_over_queries(self, dataset, scores)
    }

    fn swap_deltas(&self, labels: &[f32]) -> Option<SwapDeltas> {
        let n = labels.len();
        let k = if self.cutoff == 0 || self.cutoff > n { n } else { self.cutoff };
        let mut deltas = SwapDeltas::zeros(n);
        for i in 0..k {
            let discount_i = 1.0 / ((i + 2) as f64).log2();
            let gain_i = gain(labels[i]);
            for j in (i + 1)..n {
                let discount_j = 1.0 / ((j + 2) as f64).log2();
                let delta = (discount_i - discount_j).abs() * (gain_i - gain(labels[j])).abs();
                deltas.set(i, j, delta);
            }
        }
        Some(deltas)
    }

    fn name(&self) -> &'static str {
        "DCG"
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    /// Scores that keep the labels in their given order when ranked.
    fn descending_scores(n: usize) -> Vec<f64> {
        (0..n).map(|i| (n - i) as f64).collect()
    }

    #[test]
    fn ndcg_at_3_hand_computed() {
        let labels = [3.0, 2.0, 3.0, 0.0, 1.0, 2.0];
        let scores = descending_scores(6);

        let dcg3 = 7.0 + 3.0 / 3f64.log2() + 7.0 / 4f64.log2();
        let idcg3 = 7.0 + 7.0 / 3f64.log2() + 3.0 / 4f64.log2();

        let ndcg = Ndcg::new(3).evaluate_query(&labels, &scores);
        assert_relative_eq!(ndcg, dcg3 / idcg3, epsilon = 1e-12);
        assert_relative_eq!(ndcg, 0.9594, epsilon = 1e-4);
    }

    #[test]
    fn ndcg_ranks_by_score_not_input_order() {
        // Best document listed last but scored highest.
        let labels = [0.0, 1.0, 3.0];
        let scores = [1.0, 2.0, 3.0];
        let ndcg = Ndcg::new(0).evaluate_query(&labels, &scores);
        assert_relative_eq!(ndcg, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn ndcg_perfect_ranking_is_one() {
        let features = vec![0.0; 5];
        let ds = Dataset::from_parts(features, vec![2.0, 2.0, 1.0, 0.0, 3.0], 1, &[3, 2]).unwrap();
        // Scores matching label order within each query.
        let scores = vec![2.0, 2.0, 1.0, 0.0, 3.0];
        assert_relative_eq!(Ndcg::new(0).evaluate_dataset(&ds, &scores), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn ndcg_all_zero_labels_scores_zero() {
        let labels = [0.0, 0.0, 0.0];
        let scores = [3.0, 2.0, 1.0];
        assert_eq!(Ndcg::new(0).evaluate_query(&labels, &scores), 0.0);
    }

    #[test]
    fn ndcg_cutoff_zero_uses_all_results() {
        let labels = [1.0, 0.0, 2.0];
        let scores = descending_scores(3);
        let all = Ndcg::new(0).evaluate_query(&labels, &scores);
        let wide = Ndcg::new(100).evaluate_query(&labels, &scores);
        assert_relative_eq!(all, wide, epsilon = 1e-12);
    }

    #[test]
    fn empty_dataset_scores_zero() {
        let ds = Dataset::from_parts(vec![], vec![], 1, &[]).unwrap();
        assert_eq!(Ndcg::new(10).evaluate_dataset(&ds, &[]), 0.0);
        assert_eq!(Dcg::new(10).evaluate_dataset(&ds, &[]), 0.0);
    }

    #[test]
    fn swap_deltas_match_hand_formula() {
        let labels = [3.0, 1.0, 0.0];
        let deltas = Ndcg::new(0).swap_deltas(&labels).unwrap();
        let idcg = ideal_dcg(&labels, 3);

        let expected_01 = (1.0 / 2f64.log2() - 1.0 / 3f64.log2()).abs() * (7.0 - 1.0) / idcg;
        let expected_02 = (1.0 / 2f64.log2() - 1.0 / 4f64.log2()).abs() * (7.0 - 0.0) / idcg;
        assert_relative_eq!(deltas.at(0, 1), expected_01, epsilon = 1e-12);
        assert_relative_eq!(deltas.at(0, 2), expected_02, epsilon = 1e-12);

        // Symmetric, non-negative, zero diagonal.
        for i in 0..3 {
            assert_eq!(deltas.at(i, i), 0.0);
            for j in 0..3 {
                assert_eq!(deltas.at(i, j), deltas.at(j, i));
                assert!(deltas.at(i, j) >= 0.0);
            }
        }
    }

    #[test]
    fn swap_deltas_zero_when_idcg_zero() {
        let labels = [0.0, 0.0];
        let deltas = Ndcg::new(0).swap_deltas(&labels).unwrap();
        assert_eq!(deltas.at(0, 1), 0.0);
    }

    #[test]
    fn dcg_raw_value() {
        let labels = [3.0, 2.0];
        let scores = descending_scores(2);
        let expected = 7.0 / 2f64.log2() + 3.0 / 3f64.log2();
        assert_relative_eq!(Dcg::new(0).evaluate_query(&labels, &scores), expected, epsilon = 1e-12);
    }
}
