//! Best-first tree growth by node deviance.

use std::collections::BinaryHeap;

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

use super::cuts::{BinnedMatrix, ThresholdCuts};
use super::histogram::{FeatureHistogram, NodeHistogram};
use super::tree::{NodeId, RegressionTree, TreeNode};
use crate::training::TrainError;

// ============================================================================
// TreeParams
// ============================================================================

/// Parameters for regression tree fitting.
#[derive(Debug, Clone)]
pub struct TreeParams {
    /// Maximum number of leaves; `0` means unbounded.
    pub n_leaves: usize,
    /// Minimum samples each child of a split must keep.
    pub min_leaf_support: usize,
    /// Fraction of features scanned per split; `1.0` scans all.
    pub feature_sampling_rate: f32,
    /// Seed for feature sub-sampling.
    pub seed: u64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            n_leaves: 10,
            min_leaf_support: 1,
            feature_sampling_rate: 1.0,
            seed: 42,
        }
    }
}

impl TreeParams {
    fn validate(&self) -> Result<(), TrainError> {
        if self.min_leaf_support == 0 {
            return Err(TrainError::Config(
                "min_leaf_support must be at least 1".into(),
            ));
        }
        if !(self.feature_sampling_rate > 0.0 && self.feature_sampling_rate <= 1.0) {
            return Err(TrainError::Config(format!(
                "feature_sampling_rate must be in (0, 1], got {}",
                self.feature_sampling_rate
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Split candidate
// ============================================================================

/// Best split found by one scan worker.
#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    score: f64,
    feature: u32,
    threshold: u32,
}

impl SplitCandidate {
    /// Sentinel: any admissible split scores strictly higher.
    const SENTINEL_SCORE: f64 = -1.0;

    fn sentinel() -> Self {
        Self {
            score: Self::SENTINEL_SCORE,
            feature: u32::MAX,
            threshold: u32::MAX,
        }
    }

    fn is_sentinel(&self) -> bool {
        self.feature == u32::MAX
    }

    /// Deterministic reduction: larger score wins, ties go to the smaller
    /// `(feature, threshold)` pair. Associative and commutative, so the
    /// outcome does not depend on worker scheduling.
    fn better(a: Self, b: Self) -> Self {
        if b.score > a.score {
            b
        } else if b.score < a.score {
            a
        } else if (b.feature, b.threshold) < (a.feature, a.threshold) {
            b
        } else {
            a
        }
    }
}

// ============================================================================
// Heap entry
// ============================================================================

/// Max-heap entry ordered by deviance; ties pop the older node first.
#[derive(Debug)]
struct HeapEntry {
    deviance: f64,
    id: NodeId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deviance
            .total_cmp(&other.deviance)
            .then_with(|| other.id.cmp(&self.id))
    }
}

// ============================================================================
// TreeGrower
// ============================================================================

/// Grows a [`RegressionTree`] over a binned training set.
///
/// `labels` is the target vector histograms aggregate; under a boosting
/// driver it is the current round's pseudo-response vector.
pub struct TreeGrower<'a> {
    cuts: &'a ThresholdCuts,
    binned: &'a BinnedMatrix,
    labels: &'a [f64],
    params: TreeParams,
}

impl<'a> TreeGrower<'a> {
    pub fn new(
        cuts: &'a ThresholdCuts,
        binned: &'a BinnedMatrix,
        labels: &'a [f64],
        params: TreeParams,
    ) -> Self {
        debug_assert_eq!(binned.num_rows(), labels.len());
        debug_assert_eq!(binned.num_features(), cuts.num_features());
        Self {
            cuts,
            binned,
            labels,
            params,
        }
    }

    /// Build a root histogram for the full training set.
    pub fn root_histogram(&self) -> NodeHistogram {
        NodeHistogram::from_all_samples(self.binned, self.labels)
    }

    /// Grow a tree to at most `n_leaves` leaves from a caller-supplied root
    /// histogram.
    pub fn fit(&self, root_hist: NodeHistogram) -> Result<RegressionTree, TrainError> {
        self.params.validate()?;
        let n_rows = self.binned.num_rows();
        if n_rows == 0 {
            return Err(TrainError::EmptyDataset);
        }

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.params.seed);
        let n_leaves = self.params.n_leaves;

        let all_samples: Vec<u32> = (0..n_rows as u32).collect();
        let mut tree =
            RegressionTree::with_root(TreeNode::new_leaf(all_samples, f64::INFINITY, root_hist));
        let root = tree.root();

        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
        let mut taken = 0usize;

        if self.try_split(&mut tree, root, &mut rng) {
            push_children(&tree, root, &mut heap);
        }

        while !heap.is_empty() && (n_leaves == 0 || taken + heap.len() < n_leaves) {
            let entry = heap.pop().expect("heap checked non-empty");
            if self.try_split(&mut tree, entry.id, &mut rng) {
                push_children(&tree, entry.id, &mut heap);
            } else {
                // Terminal leaf: growth state is gone, output stays at the
                // epsilon-guarded 0 until a caller supplies responses.
                taken += 1;
                tree.node_mut(entry.id).release_growth_state();
            }
        }

        // Nodes still queued become leaves. They keep their sample ids for
        // update_output, but their histograms are no longer needed.
        while let Some(entry) = heap.pop() {
            tree.node_mut(entry.id).hist = None;
        }
        if tree.node(root).is_leaf() {
            tree.node_mut(root).hist = None;
        }

        tree.collect_leaves();
        Ok(tree)
    }

    /// Attempt to split `id`. On success the node becomes internal, its two
    /// children enter the arena, and its growth state has been handed off.
    fn try_split(
        &self,
        tree: &mut RegressionTree,
        id: NodeId,
        rng: &mut Xoshiro256PlusPlus,
    ) -> bool {
        if tree.node(id).deviance <= 0.0 {
            return false;
        }

        let features = self.sample_features(rng);
        let min_support = self.params.min_leaf_support as u32;

        let best = {
            let hist = tree
                .node(id)
                .hist
                .as_ref()
                .expect("growth node must own a histogram");
            features
                .par_iter()
                .map(|&f| scan_feature(hist.feature(f as usize), f, min_support))
                .reduce(SplitCandidate::sentinel, SplitCandidate::better)
        };
        if best.is_sentinel() {
            return false;
        }

        let f = best.feature as usize;
        let t = best.threshold as usize;

        // Parent totals and left-prefix stats at the winning threshold.
        let (count, sum, sqsum, lcount, lsum, lsqsum) = {
            let fh = tree.node(id).hist.as_ref().expect("histogram").feature(f);
            (
                fh.total_count(),
                fh.total_sum(),
                fh.total_sqsum(),
                fh.count(t),
                fh.sum(t),
                fh.sqsum(t),
            )
        };
        let rcount = count - lcount;
        let rsum = sum - lsum;
        let rsqsum = sqsum - lsqsum;

        // Partition the node's samples; children adopt the pieces.
        let samples = tree
            .node_mut(id)
            .samples
            .take()
            .expect("growth node must own its sample ids");
        let bins = self.binned.feature_bins(f);
        let mut lsamples = Vec::with_capacity(lcount as usize);
        let mut rsamples = Vec::with_capacity(rcount as usize);
        for &k in &samples {
            if bins[k as usize] <= best.threshold {
                lsamples.push(k);
            } else {
                rsamples.push(k);
            }
        }
        drop(samples);

        // Left child is built fresh; the right child takes the parent's
        // histogram, transformed by subtraction, in the same step.
        let lhist = NodeHistogram::from_samples(self.binned, self.labels, &lsamples);
        let mut rhist = tree
            .node_mut(id)
            .hist
            .take()
            .expect("histogram already taken");
        rhist.subtract(&lhist);

        let ldeviance = lsqsum - lsum * lsum / lcount as f64;
        let rdeviance = rsqsum - rsum * rsum / rcount as f64;

        let left = tree.push(TreeNode::new_leaf(lsamples, ldeviance, lhist));
        let right = tree.push(TreeNode::new_leaf(rsamples, rdeviance, rhist));

        let node = tree.node_mut(id);
        node.feature = Some(best.feature);
        node.threshold = self.cuts.threshold(f, t);
        node.deviance = sqsum - sum * sum / count as f64;
        node.left = Some(left);
        node.right = Some(right);
        true
    }

    /// Features to scan for this split.
    ///
    /// With a sampling rate below 1, draws `floor(rate * F)` features (at
    /// least one) uniformly without replacement by swap-down.
    fn sample_features(&self, rng: &mut Xoshiro256PlusPlus) -> Vec<u32> {
        let n_features = self.cuts.num_features();
        let mut features: Vec<u32> = (0..n_features as u32).collect();
        if self.params.feature_sampling_rate >= 1.0 {
            return features;
        }

        let keep = (self.params.feature_sampling_rate * n_features as f32).floor() as usize;
        let mut len = n_features;
        while len > keep && len > 1 {
            let i = rng.gen_range(0..len);
            features[i] = features[len - 1];
            len -= 1;
        }
        features.truncate(len);
        features
    }
}

/// Scan one feature's thresholds sequentially, keeping the worker-local
/// best `(score, feature, threshold)`.
fn scan_feature(fh: &FeatureHistogram, feature: u32, min_support: u32) -> SplitCandidate {
    let total_count = fh.total_count();
    let total_sum = fh.total_sum();
    let mut best = SplitCandidate::sentinel();

    for t in 0..fh.num_bins() {
        let lcount = fh.count(t);
        let rcount = total_count - lcount;
        if lcount < min_support || rcount < min_support {
            continue;
        }
        let lsum = fh.sum(t);
        let rsum = total_sum - lsum;
        let score = lsum * lsum / lcount as f64 + rsum * rsum / rcount as f64;
        if score > best.score {
            best = SplitCandidate {
                score,
                feature,
                threshold: t as u32,
            };
        }
    }
    best
}

fn push_children(tree: &RegressionTree, id: NodeId, heap: &mut BinaryHeap<HeapEntry>) {
    let node = tree.node(id);
    let (left, right) = (
        node.left.expect("split node has left child"),
        node.right.expect("split node has right child"),
    );
    heap.push(HeapEntry {
        deviance: tree.node(left).deviance,
        id: left,
    });
    heap.push(HeapEntry {
        deviance: tree.node(right).deviance,
        id: right,
    });
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::data::Dataset;

    fn prepared(
        features: Vec<f32>,
        labels: Vec<f64>,
        n_features: usize,
    ) -> (ThresholdCuts, BinnedMatrix, Vec<f64>) {
        let f32_labels: Vec<f32> = labels.iter().map(|&y| y as f32).collect();
        let n = labels.len();
        let ds = Dataset::from_parts(features, f32_labels, n_features, &[n]).unwrap();
        let cuts = ThresholdCuts::from_dataset(&ds);
        let binned = BinnedMatrix::from_dataset(&ds, &cuts);
        (cuts, binned, labels)
    }

    #[test]
    fn splits_two_separable_samples() {
        let (cuts, binned, labels) = prepared(vec![1.0, 2.0], vec![0.0, 1.0], 1);
        let params = TreeParams {
            n_leaves: 2,
            ..Default::default()
        };
        let grower = TreeGrower::new(&cuts, &binned, &labels, params);
        let mut tree = grower.fit(grower.root_histogram()).unwrap();

        assert_eq!(tree.num_leaves(), 2);
        let (feature, threshold) = tree.split_of(tree.root()).unwrap();
        assert_eq!(feature, 0);
        assert_eq!(threshold, 1.0);

        // Children are pure, so each leaf reproduces its sample's label.
        let ones = vec![1.0; 2];
        tree.update_output(&labels, &ones);
        assert_relative_eq!(tree.output(&[1.0]), 0.0);
        assert_relative_eq!(tree.output(&[2.0]), 1.0);
    }

    #[test]
    fn min_support_blocks_split_and_leaf_averages() {
        let (cuts, binned, labels) = prepared(vec![1.0, 2.0], vec![0.0, 1.0], 1);
        let params = TreeParams {
            min_leaf_support: 2,
            ..Default::default()
        };
        let grower = TreeGrower::new(&cuts, &binned, &labels, params);
        let mut tree = grower.fit(grower.root_histogram()).unwrap();

        assert_eq!(tree.num_leaves(), 1);
        let ones = vec![1.0; 2];
        let max = tree.update_output(&labels, &ones);
        assert_relative_eq!(max, 0.5);
        assert_relative_eq!(tree.leaf_output(0), 0.5);
    }

    #[test]
    fn leaf_budget_is_respected() {
        // 8 well-separated values: unbounded growth would isolate each one.
        let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let labels: Vec<f64> = (0..8).map(|v| v as f64).collect();
        let (cuts, binned, labels) = prepared(values, labels, 1);

        for budget in [2usize, 3, 4] {
            let params = TreeParams {
                n_leaves: budget,
                ..Default::default()
            };
            let grower = TreeGrower::new(&cuts, &binned, &labels, params);
            let tree = grower.fit(grower.root_histogram()).unwrap();
            assert!(tree.num_leaves() <= budget, "budget {budget} exceeded");
        }
    }

    #[test]
    fn unbounded_growth_isolates_every_value() {
        let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let labels: Vec<f64> = (0..8).map(|v| v as f64).collect();
        let (cuts, binned, labels) = prepared(values, labels, 1);

        let params = TreeParams {
            n_leaves: 0,
            ..Default::default()
        };
        let grower = TreeGrower::new(&cuts, &binned, &labels, params);
        let tree = grower.fit(grower.root_histogram()).unwrap();
        assert_eq!(tree.num_leaves(), 8);
    }

    #[test]
    fn exact_budget_keeps_leaf_samples_for_outputs() {
        let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let labels: Vec<f64> = (0..8).map(|v| v as f64).collect();
        let (cuts, binned, labels) = prepared(values, labels, 1);

        let params = TreeParams {
            n_leaves: 8,
            ..Default::default()
        };
        let grower = TreeGrower::new(&cuts, &binned, &labels, params);
        let mut tree = grower.fit(grower.root_histogram()).unwrap();

        assert_eq!(tree.num_leaves(), 8);
        let ones = vec![1.0; 8];
        let max = tree.update_output(&labels, &ones);
        assert_relative_eq!(max, 7.0);
        for v in 0..8 {
            assert_relative_eq!(tree.output(&[v as f32]), v as f64);
        }
    }

    #[test]
    fn highest_deviance_node_splits_first() {
        // Root separates {0, 1} from {100, 130}; with one split left in the
        // budget, the far noisier right child must win it.
        let values = vec![0.0, 1.0, 2.0, 3.0];
        let labels = vec![0.0, 1.0, 100.0, 130.0];
        let (cuts, binned, labels) = prepared(values, labels, 1);

        let params = TreeParams {
            n_leaves: 3,
            ..Default::default()
        };
        let grower = TreeGrower::new(&cuts, &binned, &labels, params);
        let mut tree = grower.fit(grower.root_histogram()).unwrap();

        assert_eq!(tree.num_leaves(), 3);
        let ones = vec![1.0; 4];
        tree.update_output(&labels, &ones);
        // Left pair stays one leaf; the noisy values got isolated.
        assert_relative_eq!(tree.output(&[0.0]), 0.5);
        assert_relative_eq!(tree.output(&[1.0]), 0.5);
        assert_relative_eq!(tree.output(&[2.0]), 100.0);
        assert_relative_eq!(tree.output(&[3.0]), 130.0);
    }

    #[test]
    fn feature_sampling_is_deterministic_per_seed() {
        let n = 16;
        let mut features = Vec::with_capacity(n * 4);
        for s in 0..n {
            for f in 0..4 {
                features.push(((s * 7 + f * 3) % 5) as f32);
            }
        }
        let labels: Vec<f64> = (0..n).map(|s| (s % 3) as f64).collect();
        let (cuts, binned, labels) = prepared(features, labels, 4);

        let params = TreeParams {
            n_leaves: 4,
            feature_sampling_rate: 0.5,
            seed: 7,
            ..Default::default()
        };
        let grower = TreeGrower::new(&cuts, &binned, &labels, params.clone());
        let a = grower.fit(grower.root_histogram()).unwrap();
        let b = grower.fit(grower.root_histogram()).unwrap();

        assert_eq!(a.num_leaves(), b.num_leaves());
        assert_eq!(a.split_of(a.root()), b.split_of(b.root()));
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let ds = Dataset::from_parts(vec![], vec![], 1, &[]).unwrap();
        let cuts = ThresholdCuts::from_dataset(&ds);
        let binned = BinnedMatrix::from_dataset(&ds, &cuts);
        let labels: Vec<f64> = Vec::new();
        let grower = TreeGrower::new(&cuts, &binned, &labels, TreeParams::default());
        let err = grower
            .fit(NodeHistogram::from_samples(&binned, &labels, &[]))
            .unwrap_err();
        assert!(matches!(err, TrainError::EmptyDataset));
    }

    #[test]
    fn zero_min_support_is_a_config_error() {
        let (cuts, binned, labels) = prepared(vec![1.0, 2.0], vec![0.0, 1.0], 1);
        let params = TreeParams {
            min_leaf_support: 0,
            ..Default::default()
        };
        let grower = TreeGrower::new(&cuts, &binned, &labels, params);
        let err = grower.fit(grower.root_histogram()).unwrap_err();
        assert!(matches!(err, TrainError::Config(_)));
    }
}
