//! ranklearn: a learning-to-rank training core.
//!
//! This crate provides the training side of an LtR toolkit: a line-search
//! linear ranker, a best-first histogram-based regression tree fitter, and
//! the IR metric machinery (NDCG, DCG, RMSE) both learners drive from
//! their inner loops.
//!
//! # Overview
//!
//! - [`data`]: query-grouped feature matrices with row/column layouts
//! - [`metrics`]: pluggable scorers with a uniform larger-is-better
//!   contract and per-query swap-delta matrices for pairwise learners
//! - [`training`]: the two learners plus progress logging
//! - [`model`]: trained model representations and XML persistence
//!
//! # Example
//!
//! ```ignore
//! use ranklearn::data::Dataset;
//! use ranklearn::metrics::Ndcg;
//! use ranklearn::training::{LineSearch, LineSearchParams};
//!
//! let mut train = Dataset::from_parts(features, labels, n_features, &query_lens)?;
//! let trainer = LineSearch::new(LineSearchParams::default());
//! let model = trainer.learn(&mut train, None, &Ndcg::new(10), None)?;
//! model.save_to_file("model.xml")?;
//! ```

pub mod data;
pub mod metrics;
pub mod model;
pub mod training;
