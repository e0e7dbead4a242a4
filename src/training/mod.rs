//! Training infrastructure: the two learners and their shared plumbing.
//!
//! - [`tree`]: best-first regression tree fitting over pre-aggregated
//!   feature histograms
//! - [`line_search`]: coordinate + joint-direction line search for linear
//!   ranking models
//! - [`TrainingLogger`], [`Verbosity`]: per-iteration progress output
//!
//! Both learners share one scheduling model: a single logical thread of
//! control with data-parallel fork-join regions inside each algorithm
//! step. A training call blocks until completion.

mod logger;

pub mod line_search;
pub mod tree;

pub use line_search::{LineSearch, LineSearchParams};
pub use logger::{IterationRecord, TrainingLogger, Verbosity};
pub use tree::{
    BinnedMatrix, FeatureHistogram, NodeHistogram, NodeId, RegressionTree, ThresholdCuts,
    TreeGrower, TreeParams,
};

/// Errors reported by the training entry points.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    /// Invalid hyperparameter combination, rejected before any work starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Zero instances or zero queries.
    #[error("training dataset is empty")]
    EmptyDataset,

    /// The scorer produced NaN or infinity; no iteration silently accepts it.
    #[error("metric returned a non-finite value at iteration {iteration}")]
    NonFiniteMetric { iteration: usize },

    /// Failure writing a periodic model snapshot.
    #[error("failed to write model snapshot: {0}")]
    Snapshot(#[from] std::io::Error),
}
