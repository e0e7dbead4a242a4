//! Root mean squared error, negated.
//!
//! The sign flip keeps the "larger is better" contract uniform across
//! scorers: a perfect fit evaluates to `-0.0` and every worse fit is more
//! negative.

use crate::data::Dataset;

use super::Metric;

/// Negated RMSE between scores and labels, truncated per query at a rank
/// cutoff (`0` = all results).
///
/// `evaluate_query` returns the query's raw sum of squared errors; the
/// dataset aggregate is `-sqrt(total_sse / n_instances)`.
#[derive(Debug, Clone, Copy)]
pub struct Rmse {
    cutoff: usize,
}

impl Rmse {
    /// RMSE@`cutoff`; `0` means no cutoff.
    pub fn new(cutoff: usize) -> Self {
        Self { cutoff }
    }

    /// Configured rank cutoff.
    pub fn cutoff(&self) -> usize {
        self.cutoff
    }
}

impl Metric for Rmse {
    /// Sum of squared errors over the first `min(cutoff, n)` results.
    fn evaluate_query(&self, labels: &[f32], scores: &[f64]) -> f64 {
        debug_assert_eq!(labels.len(), scores.len());
        let size = if self.cutoff == 0 || self.cutoff > labels.len() {
            labels.len()
        } else {
            self.cutoff
        };
        labels[..size]
            .iter()
            .zip(&scores[..size])
            .map(|(&label, &score)| {
                let err = score - label as f64;
                err * err
            })
            .sum()
    }

    fn evaluate_dataset(&self, dataset: &Dataset, scores: &[f64]) -> f64 {
        if dataset.num_instances() == 0 {
            return 0.0;
        }
        let mut sse = 0.0;
        for q in 0..dataset.num_queries() {
            let view = dataset.query_results(q);
            let end = view.offset + view.num_results();
            sse += self.evaluate_query(view.labels, &scores[view.offset..end]);
        }
        -(sse / dataset.num_instances() as f64).sqrt()
    }

    fn name(&self) -> &'static str {
        "RMSE"
    }
}
