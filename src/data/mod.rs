//! Dataset abstractions for query-grouped ranking data.

mod dataset;

pub use dataset::{Dataset, DatasetError, DatasetLayout, QueryView};
