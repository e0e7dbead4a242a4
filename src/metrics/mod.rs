//! IR evaluation metrics driven by the learners' inner loops.
//!
//! Every scorer follows one contract: **larger is better**. Error-style
//! metrics negate internally ([`Rmse`]) so that the line-search comparator
//! and early stopping can treat all metrics uniformly.
//!
//! Scorers are pure and `Send + Sync`; the only state is the configured
//! rank cutoff. A cutoff of `0` means "use all results".
//!
//! # Swap deltas
//!
//! Rank-sensitive metrics additionally expose [`Metric::swap_deltas`]: a
//! per-query symmetric matrix `delta[i][j]` giving the magnitude of metric
//! change caused by swapping the documents at ranks `i` and `j`. Pairwise
//! gradient learners consume it; metrics that are insensitive to rank
//! order return `None`.

mod ndcg;
mod rmse;

pub use ndcg::{Dcg, Ndcg};
pub use rmse::Rmse;

use crate::data::Dataset;

// =============================================================================
// Metric Trait
// =============================================================================

/// A query-grouped ranking metric.
///
/// `evaluate_dataset` aggregates per-query scores over the whole dataset;
/// `evaluate_query` scores a single contiguous query block. `scores` is the
/// flat prediction vector aligned with the dataset's instance order.
pub trait Metric: Send + Sync {
    /// Score one query. `labels` and `scores` are aligned with the query's
    /// row order; rank-sensitive metrics sort by score internally.
    fn evaluate_query(&self, labels: &[f32], scores: &[f64]) -> f64;

    /// Aggregate score over all queries. Degenerate empty datasets score 0.
    fn evaluate_dataset(&self, dataset: &Dataset, scores: &[f64]) -> f64;

    /// Pairwise swap-delta matrix for a query whose `labels` are given in
    /// rank order. `None` for metrics insensitive to rank order.
    fn swap_deltas(&self, _labels: &[f32]) -> Option<SwapDeltas> {
        None
    }

    /// Metric name (for logging).
    fn name(&self) -> &'static str;
}

/// Mean of per-query scores across the dataset; 0 when there are no queries.
///
/// Shared by the gain-style metrics. Error-style metrics aggregate their own
/// way and negate.
pub(crate) fn mean_over_queries(metric: &impl Metric, dataset: &Dataset, scores: &[f64]) -> f64 {
    let num_queries = dataset.num_queries();
    if num_queries == 0 {
        return 0.0;
    }
    let mut sum = 0.0;
    for q in 0..num_queries {
        let view = dataset.query_results(q);
        let end = view.offset + view.num_results();
        sum += metric.evaluate_query(view.labels, &scores[view.offset..end]);
    }
    sum / num_queries as f64
}

// =============================================================================
// MetricKind
// =============================================================================

/// Closed set of available scorers, delegating to the concrete types.
///
/// Convenient for configuration surfaces that pick a metric by tag instead
/// of carrying a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Normalized Discounted Cumulative Gain at a rank cutoff.
    Ndcg { cutoff: usize },
    /// Raw Discounted Cumulative Gain at a rank cutoff.
    Dcg { cutoff: usize },
    /// Negated root mean squared error at a rank cutoff.
    Rmse { cutoff: usize },
}

impl Metric for MetricKind {
    fn evaluate_query(&self, labels: &[f32], scores: &[f64]) -> f64 {
        match *self {
            MetricKind::Ndcg { cutoff } => Ndcg::new(cutoff).evaluate_query(labels, scores),
            MetricKind::Dcg { cutoff } => Dcg::new(cutoff).evaluate_query(labels, scores),
            MetricKind::Rmse { cutoff } => Rmse::new(cutoff).evaluate_query(labels, scores),
        }
    }

    fn evaluate_dataset(&self, dataset: &Dataset, scores: &[f64]) -> f64 {
        match *self {
            MetricKind::Ndcg { cutoff } => Ndcg::new(cutoff).evaluate_dataset(dataset, scores),
            MetricKind::Dcg { cutoff } => Dcg::new(cutoff).evaluate_dataset(dataset, scores),
            MetricKind::Rmse { cutoff } => Rmse::new(cutoff).evaluate_dataset(dataset, scores),
        }
    }

    fn swap_deltas(&self, labels: &[f32]) -> Option<SwapDeltas> {
        match *self {
            MetricKind::Ndcg { cutoff } => Ndcg::new(cutoff).swap_deltas(labels),
            MetricKind::Dcg { cutoff } => Dcg::new(cutoff).swap_deltas(labels),
            MetricKind::Rmse { cutoff } => Rmse::new(cutoff).swap_deltas(labels),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            MetricKind::Ndcg { .. } => "NDCG",
            MetricKind::Dcg { .. } => "DCG",
            MetricKind::Rmse { .. } => "RMSE",
        }
    }
}

// =============================================================================
// SwapDeltas
// =============================================================================

/// Symmetric per-query swap matrix with a zero diagonal.
///
/// Only the strict upper triangle is stored; `at(i, j)` mirrors across the
/// diagonal. Values are non-negative magnitudes.
#[derive(Debug, Clone)]
pub struct SwapDeltas {
    /// Upper triangle in row order: `(0,1) (0,2) .. (0,n-1) (1,2) ..`
    values: Vec<f64>,
    n: usize,
}

impl SwapDeltas {
    /// All-zero matrix for `n` ranked documents.
    pub fn zeros(n: usize) -> Self {
        Self {
            values: vec![0.0; n * n.saturating_sub(1) / 2],
            n,
        }
    }

    /// Matrix side length (number of ranked documents).
    #[inline]
    pub fn len(&self) -> usize {
        self.n
    }

    /// True for a 0x0 matrix.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    fn tri_index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < j && j < self.n);
        // row i starts after the triangles of rows 0..i
        i * (2 * self.n - i - 1) / 2 + (j - i - 1)
    }

    /// Delta for swapping ranks `i` and `j`; symmetric, zero on the diagonal.
    #[inline]
    pub fn at(&self, i: usize, j: usize) -> f64 {
        match i.cmp(&j) {
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Less => self.values[self.tri_index(i, j)],
            std::cmp::Ordering::Greater => self.values[self.tri_index(j, i)],
        }
    }

    /// Set the upper-triangle entry `(i, j)`, `i < j`.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        let idx = self.tri_index(i, j);
        self.values[idx] = value;
    }
}
