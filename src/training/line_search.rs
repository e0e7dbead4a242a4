//! Line-search training of linear ranking models.
//!
//! Each iteration runs two phases over a shrinking weight window `W`:
//!
//! 1. **Coordinate search.** For every feature independently, evaluate the
//!    metric at `P + 1` equally spaced candidate weights in
//!    `[w_prev[f] - W, w_prev[f] + W]` (clipped to non-negative values),
//!    holding all other weights at `w_prev`. A candidate beating the best
//!    known training metric is written into `w[f]`, but the best metric
//!    itself is not advanced: phase 1 only proposes.
//! 2. **Joint search.** Evaluate `P + 1` points along the direction from
//!    `w_prev` to the proposed `w`. Only an improvement here commits:
//!    weights, best metric and `w_prev` all advance together.
//!
//! After both phases the window shrinks by the reduction factor; in
//! adaptive mode the factor swells or shrinks with the achieved gain and
//! training stops once the window falls below 0.01. A validation set adds
//! early stopping: the best weights by validation metric are kept, and
//! training aborts after `max_failed_vali` consecutive non-improvements.

use rayon::prelude::*;

use crate::data::{Dataset, DatasetLayout};
use crate::metrics::Metric;
use crate::model::LineSearchModel;
use crate::training::logger::IterationRecord;
use crate::training::{TrainError, TrainingLogger, Verbosity};

/// Gain level at which the adaptive schedule neither swells nor shrinks
/// the reduction factor.
const ADAPTIVE_MAX_GAIN: f64 = 0.005;

/// Window size below which adaptive training stops.
const ADAPTIVE_MIN_WINDOW: f64 = 0.01;

// ============================================================================
// LineSearchParams
// ============================================================================

/// Parameters for line-search training.
#[derive(Debug, Clone)]
pub struct LineSearchParams {
    /// Number of window steps `P`; odd values are decremented so the window
    /// centre is always among the `P + 1` candidates.
    pub num_points: usize,
    /// Initial half-width of the search window.
    pub window_size: f64,
    /// Multiplier applied to the window after every iteration.
    pub reduction_factor: f64,
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Consecutive validation non-improvements tolerated before stopping.
    pub max_failed_vali: usize,
    /// Scale the reduction factor by the achieved gain and stop on tiny
    /// windows.
    pub adaptive: bool,
    /// Write a model snapshot every this many iterations (`0` = never).
    pub partial_save: usize,
    /// Verbosity of the progress table.
    pub verbosity: Verbosity,
}

impl Default for LineSearchParams {
    fn default() -> Self {
        Self {
            num_points: 20,
            window_size: 1.0,
            reduction_factor: 0.95,
            max_iterations: 100,
            max_failed_vali: 20,
            adaptive: false,
            partial_save: 0,
            verbosity: Verbosity::default(),
        }
    }
}

impl LineSearchParams {
    /// Effective number of steps: forced even.
    fn effective_num_points(&self) -> usize {
        self.num_points - self.num_points % 2
    }

    fn validate(&self) -> Result<(), TrainError> {
        if self.effective_num_points() < 2 {
            return Err(TrainError::Config(format!(
                "num_points must be at least 2, got {}",
                self.num_points
            )));
        }
        if !(self.window_size > 0.0) {
            return Err(TrainError::Config(format!(
                "window_size must be positive, got {}",
                self.window_size
            )));
        }
        if !(self.reduction_factor > 0.0) {
            return Err(TrainError::Config(format!(
                "reduction_factor must be positive, got {}",
                self.reduction_factor
            )));
        }
        if self.max_iterations == 0 {
            return Err(TrainError::Config("max_iterations must be at least 1".into()));
        }
        Ok(())
    }
}

// ============================================================================
// LineSearch
// ============================================================================

/// Line-search trainer for linear ranking models.
pub struct LineSearch {
    params: LineSearchParams,
}

impl LineSearch {
    pub fn new(params: LineSearchParams) -> Self {
        Self { params }
    }

    /// Candidate weights in `[center - window, center + window]` with the
    /// given spacing, keeping only non-negative points.
    fn window_points(center: f64, window: f64, step: f64, max_points: usize) -> Vec<f64> {
        let mut points = Vec::with_capacity(max_points);
        let mut point = center - window;
        while point <= center + window && points.len() < max_points {
            if point >= 0.0 {
                points.push(point);
            }
            point += step;
        }
        points
    }

    /// Train on `train`, optionally early-stopping against `validation`.
    ///
    /// Both datasets are preprocessed to horizontal layout. When
    /// `partial_save` is non-zero and `output_prefix` is given, the current
    /// best model is written to `{prefix}.T{iteration}.xml` periodically.
    pub fn learn(
        &self,
        train: &mut Dataset,
        validation: Option<&mut Dataset>,
        metric: &dyn Metric,
        output_prefix: Option<&str>,
    ) -> Result<LineSearchModel, TrainError> {
        self.params.validate()?;
        let num_points = self.params.effective_num_points();

        train.ensure_layout(DatasetLayout::Horizontal);
        let validation = validation.map(|ds| {
            ds.ensure_layout(DatasetLayout::Horizontal);
            &*ds
        });
        let train = &*train;

        if train.num_instances() == 0 || train.num_queries() == 0 {
            return Err(TrainError::EmptyDataset);
        }

        let n_features = train.num_features();
        let n_instances = train.num_instances();

        let mut weights = vec![1.0f64; n_features];
        let mut weights_prev = vec![1.0f64; n_features];
        let mut best_weights = vec![1.0f64; n_features];

        let mut window = self.params.window_size;
        let mut metric_scores = vec![0.0f64; num_points + 1];
        let mut pre_sum = vec![0.0f64; n_instances];
        let mut train_scores = vec![0.0f64; n_instances * (num_points + 1)];
        let mut base_scores = vec![0.0f64; n_instances];

        let logger = TrainingLogger::new(self.params.verbosity);
        logger.start_training(metric.name());

        // Metric of the starting weights.
        score_into(train, &weights, &mut base_scores);
        let mut best_train_metric = metric.evaluate_dataset(train, &base_scores);
        ensure_finite(best_train_metric, 0)?;

        let mut best_validation_metric = f64::NEG_INFINITY;
        let mut validation_scores = vec![0.0f64; validation.map_or(0, |ds| ds.num_instances())];
        if let Some(vali) = validation {
            score_into(vali, &weights, &mut validation_scores);
            best_validation_metric = metric.evaluate_dataset(vali, &validation_scores);
            ensure_finite(best_validation_metric, 0)?;
        }
        logger.log_initial(
            best_train_metric,
            validation.map(|_| best_validation_metric),
        );

        let mut failed_vali_count = 0usize;

        for iteration in 0..self.params.max_iterations {
            let step1 = 2.0 * window / num_points as f64;

            // Shared by every feature of this sweep: w_prev only moves in
            // the committing phase below.
            score_into(train, &weights_prev, &mut base_scores);

            // Phase 1: coordinate search, each feature independently.
            for f in 0..n_features {
                pre_sum
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(s, out)| {
                        *out = base_scores[s] - weights_prev[f] * train.row(s)[f] as f64;
                    });

                let points =
                    Self::window_points(weights_prev[f], window, step1, num_points + 1);
                if points.is_empty() {
                    continue;
                }

                train_scores
                    .par_chunks_mut(n_instances)
                    .zip(points.par_iter())
                    .map(|(column, &point)| {
                        for (s, out) in column.iter_mut().enumerate() {
                            *out = point * train.row(s)[f] as f64 + pre_sum[s];
                        }
                        metric.evaluate_dataset(train, column)
                    })
                    .collect_into_vec(&mut metric_scores);

                ensure_all_finite(&metric_scores, iteration + 1)?;
                let (best_p, best_score) = argmax(&metric_scores);
                if best_score > best_train_metric {
                    weights[f] = points[best_p];
                }
            }

            // Phase 2: joint search along w_prev -> w; the committing step.
            let step2: Vec<f64> = weights
                .iter()
                .zip(&weights_prev)
                .map(|(&curr, &prev)| (curr - prev) / num_points as f64)
                .collect();

            let mut gain = 0.0;
            if step2.iter().any(|&s| s != 0.0) {
                train_scores
                    .par_chunks_mut(n_instances)
                    .enumerate()
                    .map(|(p, column)| {
                        for (s, out) in column.iter_mut().enumerate() {
                            let mut score = 0.0;
                            for (g, &x) in train.row(s).iter().enumerate() {
                                score += (weights_prev[g] + step2[g] * p as f64) * x as f64;
                            }
                            *out = score;
                        }
                        metric.evaluate_dataset(train, column)
                    })
                    .collect_into_vec(&mut metric_scores);

                ensure_all_finite(&metric_scores, iteration + 1)?;
                let (best_p, best_score) = argmax(&metric_scores);
                if best_score > best_train_metric {
                    for (g, weight) in weights.iter_mut().enumerate() {
                        *weight = weights_prev[g] + step2[g] * best_p as f64;
                    }
                    gain = best_score - best_train_metric;
                    best_train_metric = best_score;
                    weights_prev.copy_from_slice(&weights);
                }
            }

            let mut cur_reduction_factor = self.params.reduction_factor;
            if self.params.adaptive {
                let relative_gain =
                    (((gain - ADAPTIVE_MAX_GAIN) / ADAPTIVE_MAX_GAIN).min(1.0)).max(-0.5);
                cur_reduction_factor = self.params.reduction_factor * (1.0 + relative_gain);
            }

            let mut validation_entry = None;
            let mut stop_on_validation = false;
            if let Some(vali) = validation {
                validation_scores
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(s, out)| {
                        *out = vali
                            .row(s)
                            .iter()
                            .zip(&weights)
                            .map(|(&x, &w)| w * x as f64)
                            .sum();
                    });
                let metric_on_validation = metric.evaluate_dataset(vali, &validation_scores);
                ensure_finite(metric_on_validation, iteration + 1)?;

                let improved = metric_on_validation > best_validation_metric;
                if improved {
                    failed_vali_count = 0;
                    best_validation_metric = metric_on_validation;
                    best_weights.copy_from_slice(&weights);
                } else {
                    failed_vali_count += 1;
                    if failed_vali_count >= self.params.max_failed_vali {
                        stop_on_validation = true;
                    }
                }
                validation_entry = Some((metric_on_validation, improved));
            }

            logger.log_iteration(&IterationRecord {
                iteration: iteration + 1,
                training_metric: best_train_metric,
                validation: validation_entry,
                gain,
                window,
                reduction_factor: cur_reduction_factor,
            });

            if stop_on_validation {
                logger.log_early_stopping(iteration + 1, failed_vali_count);
                break;
            }

            if self.params.partial_save > 0 && (iteration + 1) % self.params.partial_save == 0 {
                if let Some(prefix) = output_prefix {
                    let snapshot_weights = if validation.is_some() {
                        best_weights.clone()
                    } else {
                        weights.clone()
                    };
                    let snapshot = LineSearchModel::new(snapshot_weights, &self.params);
                    snapshot.save_to_file(&format!("{}.T{}.xml", prefix, iteration + 1))?;
                }
            }

            window *= cur_reduction_factor;
            if self.params.adaptive && window < ADAPTIVE_MIN_WINDOW {
                break;
            }
        }

        // Without a validation set, the best weights are the final ones.
        if validation.is_none() {
            best_weights.copy_from_slice(&weights);
        }
        logger.finish_training();

        Ok(LineSearchModel::new(best_weights, &self.params))
    }
}

/// Dot-product scores for every row, in parallel.
fn score_into(dataset: &Dataset, weights: &[f64], scores: &mut [f64]) {
    scores.par_iter_mut().enumerate().for_each(|(s, out)| {
        *out = dataset
            .row(s)
            .iter()
            .zip(weights)
            .map(|(&x, &w)| w * x as f64)
            .sum();
    });
}

/// Index and value of the first-seen maximum.
fn argmax(values: &[f64]) -> (usize, f64) {
    let mut best = (0usize, f64::NEG_INFINITY);
    for (i, &value) in values.iter().enumerate() {
        if value > best.1 {
            best = (i, value);
        }
    }
    best
}

fn ensure_finite(value: f64, iteration: usize) -> Result<(), TrainError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(TrainError::NonFiniteMetric { iteration })
    }
}

/// No window point may score NaN or infinity, even a losing one.
fn ensure_all_finite(values: &[f64], iteration: usize) -> Result<(), TrainError> {
    for &value in values {
        ensure_finite(value, iteration)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::metrics::{Ndcg, Rmse};

    fn silent(params: LineSearchParams) -> LineSearch {
        LineSearch::new(LineSearchParams {
            verbosity: Verbosity::Silent,
            ..params
        })
    }

    /// One query, one constant feature; every score equals the weight.
    fn constant_feature_dataset(labels: &[f32]) -> Dataset {
        let n = labels.len();
        Dataset::from_parts(vec![1.0; n], labels.to_vec(), 1, &[n]).unwrap()
    }

    #[test]
    fn candidate_points_are_clipped_to_non_negative() {
        // Window reaches well below zero around a small weight.
        let points = LineSearch::window_points(0.3, 1.0, 0.25, 9);
        assert!(!points.is_empty());
        assert!(points.iter().all(|&p| p >= 0.0));
        // The centre itself is one of the candidates.
        assert!(points.iter().any(|&p| (p - 0.3).abs() < 1e-12));
    }

    #[test]
    fn stationary_optimum_terminates_via_adaptive_window() {
        // Labels equal the starting score, so w = 1 is already optimal:
        // phase 1 proposes nothing, phase 2 gains nothing, and the window
        // halves until the adaptive exit fires.
        let mut train = constant_feature_dataset(&[1.0, 1.0, 1.0]);
        let trainer = silent(LineSearchParams {
            num_points: 4,
            window_size: 1.0,
            reduction_factor: 0.95,
            max_iterations: 1000,
            adaptive: true,
            ..Default::default()
        });

        let model = trainer.learn(&mut train, None, &Rmse::new(0), None).unwrap();
        assert_eq!(model.weights(), &[1.0]);
    }

    #[test]
    fn moves_weight_toward_metric_optimum() {
        // Optimum at w = 0 (labels are all zero); candidates never go
        // negative, so the weight lands exactly on zero.
        let mut train = constant_feature_dataset(&[0.0, 0.0]);
        let trainer = silent(LineSearchParams {
            num_points: 4,
            window_size: 1.0,
            reduction_factor: 0.5,
            max_iterations: 10,
            ..Default::default()
        });

        let model = trainer.learn(&mut train, None, &Rmse::new(0), None).unwrap();
        assert_relative_eq!(model.weights()[0], 0.0);
    }

    #[test]
    fn two_feature_recovery() {
        // Two queries; ranking by feature 1 matches the labels, feature 0
        // is anti-correlated. NDCG is maximised by down-weighting feature 0.
        let features = vec![
            5.0, 1.0, //
            1.0, 5.0, //
            4.0, 2.0, //
            2.0, 6.0, //
        ];
        let labels = vec![0.0, 2.0, 0.0, 2.0];
        let mut train = Dataset::from_parts(features, labels, 2, &[2, 2]).unwrap();

        let trainer = silent(LineSearchParams {
            num_points: 10,
            window_size: 1.0,
            reduction_factor: 0.9,
            max_iterations: 20,
            ..Default::default()
        });
        let model = trainer.learn(&mut train, None, &Ndcg::new(0), None).unwrap();

        let w = model.weights();
        // The relevant documents must outrank the irrelevant ones.
        assert!(w[1] * 5.0 + w[0] * 1.0 > w[1] * 1.0 + w[0] * 5.0);
    }

    #[test]
    fn validation_early_stopping_preserves_best_weights() {
        // Training pulls the weight from 1 toward 2; the validation metric
        // (labels 0) strictly worsens as the weight grows, so it never
        // improves on the starting point and training stops after
        // max_failed_vali iterations with the initial weights kept.
        let mut train = constant_feature_dataset(&[2.0, 2.0]);
        let mut vali = constant_feature_dataset(&[0.0, 0.0]);

        let trainer = silent(LineSearchParams {
            num_points: 4,
            window_size: 0.5,
            reduction_factor: 0.95,
            max_iterations: 50,
            max_failed_vali: 2,
            ..Default::default()
        });
        let model = trainer
            .learn(&mut train, Some(&mut vali), &Rmse::new(0), None)
            .unwrap();

        assert_eq!(model.weights(), &[1.0]);
    }

    #[test]
    fn no_validation_returns_final_weights() {
        let mut train = constant_feature_dataset(&[0.0, 0.0]);
        let trainer = silent(LineSearchParams {
            num_points: 4,
            window_size: 1.0,
            reduction_factor: 0.5,
            max_iterations: 3,
            ..Default::default()
        });
        let model = trainer.learn(&mut train, None, &Rmse::new(0), None).unwrap();
        // With no validation set the model must equal the final weights,
        // which the optimum has pinned at zero.
        assert_eq!(model.weights(), &[0.0]);
    }

    #[test]
    fn odd_num_points_is_decremented() {
        let params = LineSearchParams {
            num_points: 5,
            ..Default::default()
        };
        assert_eq!(params.effective_num_points(), 4);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let mut train = constant_feature_dataset(&[1.0]);

        for params in [
            LineSearchParams {
                num_points: 1,
                ..Default::default()
            },
            LineSearchParams {
                window_size: 0.0,
                ..Default::default()
            },
            LineSearchParams {
                reduction_factor: -1.0,
                ..Default::default()
            },
            LineSearchParams {
                max_iterations: 0,
                ..Default::default()
            },
        ] {
            let err = silent(params)
                .learn(&mut train, None, &Rmse::new(0), None)
                .unwrap_err();
            assert!(matches!(err, TrainError::Config(_)));
        }
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let mut train = Dataset::from_parts(vec![], vec![], 1, &[]).unwrap();
        let err = silent(LineSearchParams::default())
            .learn(&mut train, None, &Rmse::new(0), None)
            .unwrap_err();
        assert!(matches!(err, TrainError::EmptyDataset));
    }
}
