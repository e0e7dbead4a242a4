//! Query-grouped feature matrix.
//!
//! A [`Dataset`] holds `n_instances` rows of `n_features` values together
//! with a relevance label per row. Rows belonging to the same query form a
//! contiguous block; the dataset records each block's offset so metrics can
//! walk query by query.
//!
//! The matrix is physically stored in one of two layouts:
//!
//! - [`DatasetLayout::Horizontal`]: row-major, `row(s)` is a contiguous
//!   slice. Preferred by the line-search trainer.
//! - [`DatasetLayout::Vertical`]: column-major, `feature_column(f)` is a
//!   contiguous slice. Preferred by the tree fitter.
//!
//! [`Dataset::transpose`] flips between the two; learners call it through
//! their preprocess step rather than assuming a layout.

/// Physical storage order of the feature matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetLayout {
    /// Row-major: `features[s * n_features + f]`.
    Horizontal,
    /// Column-major: `features[f * n_instances + s]`.
    Vertical,
}

/// Dataset construction/validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DatasetError {
    #[error("feature matrix has {got} values, expected {rows} rows x {cols} features = {expected}")]
    FeatureLenMismatch {
        rows: usize,
        cols: usize,
        expected: usize,
        got: usize,
    },

    #[error("number of labels ({labels}) does not match number of rows ({rows})")]
    LabelLenMismatch { rows: usize, labels: usize },

    #[error("query lengths sum to {sum}, expected {rows} rows")]
    QueryLenMismatch { rows: usize, sum: usize },

    #[error("query {query} is empty")]
    EmptyQuery { query: usize },
}

/// Labelled sub-view over one query's contiguous block of rows.
#[derive(Debug, Clone, Copy)]
pub struct QueryView<'a> {
    /// Row offset of the block within the dataset.
    pub offset: usize,
    /// Relevance labels for the block, in row order.
    pub labels: &'a [f32],
}

impl<'a> QueryView<'a> {
    /// Number of results in the query.
    #[inline]
    pub fn num_results(&self) -> usize {
        self.labels.len()
    }
}

/// A query-grouped dataset of real-valued features and relevance labels.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Flat feature matrix in `layout` order.
    features: Vec<f32>,
    /// Relevance labels, one per row.
    labels: Vec<f32>,
    /// Query block boundaries: `offsets[q]..offsets[q + 1]` are the rows of
    /// query `q`. Length is `num_queries + 1`, last entry is `n_instances`.
    offsets: Vec<usize>,
    n_instances: usize,
    n_features: usize,
    layout: DatasetLayout,
}

impl Dataset {
    /// Create a dataset from a row-major feature matrix.
    ///
    /// # Arguments
    ///
    /// * `features` - Flat row-major matrix, `labels.len() * n_features` values
    /// * `labels` - Relevance labels, one per row
    /// * `n_features` - Number of feature columns
    /// * `query_lens` - Number of rows per query block, in row order
    pub fn from_parts(
        features: Vec<f32>,
        labels: Vec<f32>,
        n_features: usize,
        query_lens: &[usize],
    ) -> Result<Self, DatasetError> {
        let n_instances = labels.len();

        if features.len() != n_instances * n_features {
            return Err(DatasetError::FeatureLenMismatch {
                rows: n_instances,
                cols: n_features,
                expected: n_instances * n_features,
                got: features.len(),
            });
        }

        let sum: usize = query_lens.iter().sum();
        if sum != n_instances {
            return Err(DatasetError::QueryLenMismatch {
                rows: n_instances,
                sum,
            });
        }
        if let Some(q) = query_lens.iter().position(|&len| len == 0) {
            return Err(DatasetError::EmptyQuery { query: q });
        }

        let mut offsets = Vec::with_capacity(query_lens.len() + 1);
        offsets.push(0);
        for &len in query_lens {
            offsets.push(offsets.last().unwrap() + len);
        }

        Ok(Self {
            features,
            labels,
            offsets,
            n_instances,
            n_features,
            layout: DatasetLayout::Horizontal,
        })
    }

    /// Number of rows.
    #[inline]
    pub fn num_instances(&self) -> usize {
        self.n_instances
    }

    /// Number of feature columns.
    #[inline]
    pub fn num_features(&self) -> usize {
        self.n_features
    }

    /// Number of query blocks.
    #[inline]
    pub fn num_queries(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Current physical layout.
    #[inline]
    pub fn layout(&self) -> DatasetLayout {
        self.layout
    }

    /// Relevance labels in row order.
    #[inline]
    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    /// Single feature value, valid under either layout.
    #[inline]
    pub fn at(&self, sample: usize, feature: usize) -> f32 {
        debug_assert!(sample < self.n_instances && feature < self.n_features);
        match self.layout {
            DatasetLayout::Horizontal => self.features[sample * self.n_features + feature],
            DatasetLayout::Vertical => self.features[feature * self.n_instances + sample],
        }
    }

    /// One row as a contiguous slice.
    ///
    /// # Panics
    ///
    /// Panics if the dataset is not in [`DatasetLayout::Horizontal`] layout.
    #[inline]
    pub fn row(&self, sample: usize) -> &[f32] {
        assert_eq!(self.layout, DatasetLayout::Horizontal, "row access requires horizontal layout");
        let start = sample * self.n_features;
        &self.features[start..start + self.n_features]
    }

    /// One feature column as a contiguous slice.
    ///
    /// # Panics
    ///
    /// Panics if the dataset is not in [`DatasetLayout::Vertical`] layout.
    #[inline]
    pub fn feature_column(&self, feature: usize) -> &[f32] {
        assert_eq!(self.layout, DatasetLayout::Vertical, "column access requires vertical layout");
        let start = feature * self.n_instances;
        &self.features[start..start + self.n_instances]
    }

    /// Labelled view over query `q`.
    #[inline]
    pub fn query_results(&self, q: usize) -> QueryView<'_> {
        let (start, end) = (self.offsets[q], self.offsets[q + 1]);
        QueryView {
            offset: start,
            labels: &self.labels[start..end],
        }
    }

    /// Flip the physical storage between row-major and column-major.
    pub fn transpose(&mut self) {
        let (rows, cols) = (self.n_instances, self.n_features);
        let mut flipped = vec![0.0f32; self.features.len()];
        match self.layout {
            DatasetLayout::Horizontal => {
                for s in 0..rows {
                    for f in 0..cols {
                        flipped[f * rows + s] = self.features[s * cols + f];
                    }
                }
                self.layout = DatasetLayout::Vertical;
            }
            DatasetLayout::Vertical => {
                for f in 0..cols {
                    for s in 0..rows {
                        flipped[s * cols + f] = self.features[f * rows + s];
                    }
                }
                self.layout = DatasetLayout::Horizontal;
            }
        }
        self.features = flipped;
    }

    /// Ensure the dataset is in the requested layout, transposing if needed.
    pub fn ensure_layout(&mut self, layout: DatasetLayout) {
        if self.layout != layout {
            self.transpose();
        }
    }
}
