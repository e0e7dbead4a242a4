//! Arena-allocated regression tree.
//!
//! All nodes live in one arena and reference each other by [`NodeId`]; the
//! leaves table and the grower's heap hold ids, never owning pointers, so
//! a node being simultaneously the root and a leaf needs no special
//! casing.
//!
//! During growth a node carries its routed sample ids, its histogram and
//! its pre-split deviance. Histogram and samples are handed off or dropped
//! the moment the node becomes internal; a node popped as unsplittable
//! releases them too. Leaves that were still queued when the leaf budget
//! was reached keep their sample ids, which is what lets
//! [`RegressionTree::update_output`] recompute leaf values on every
//! boosting round.

use rayon::prelude::*;

use super::histogram::NodeHistogram;

/// Index of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node: internal (feature, threshold, children) or leaf (output).
#[derive(Debug)]
pub(crate) struct TreeNode {
    /// Split feature; `None` while the node is a leaf.
    pub feature: Option<u32>,
    /// Split value; samples with `value <= threshold` go left.
    pub threshold: f32,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
    /// Leaf output (`avglabel`); recomputed by `update_output`.
    pub output: f64,

    // Growth state, released when the node becomes internal or is popped
    // as an unsplittable leaf.
    pub samples: Option<Vec<u32>>,
    pub hist: Option<NodeHistogram>,
    pub deviance: f64,
}

impl TreeNode {
    pub(crate) fn new_leaf(samples: Vec<u32>, deviance: f64, hist: NodeHistogram) -> Self {
        Self {
            feature: None,
            threshold: 0.0,
            left: None,
            right: None,
            output: 0.0,
            samples: Some(samples),
            hist: Some(hist),
            deviance,
        }
    }

    #[inline]
    pub(crate) fn is_leaf(&self) -> bool {
        self.feature.is_none()
    }

    /// Drop sample ids and histogram.
    pub(crate) fn release_growth_state(&mut self) {
        self.samples = None;
        self.hist = None;
    }
}

/// A fitted regression tree with a densely packed leaves table.
#[derive(Debug)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
    root: NodeId,
    leaves: Vec<NodeId>,
}

impl RegressionTree {
    pub(crate) fn with_root(root_node: TreeNode) -> Self {
        Self {
            nodes: vec![root_node],
            root: NodeId(0),
            leaves: Vec::new(),
        }
    }

    /// Id of the root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Children of an internal node.
    pub fn children(&self, id: NodeId) -> Option<(NodeId, NodeId)> {
        let node = self.node(id);
        match (node.left, node.right) {
            (Some(left), Some(right)) => Some((left, right)),
            _ => None,
        }
    }

    pub(crate) fn push(&mut self, node: TreeNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub(crate) fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id.index()]
    }

    /// Number of nodes in the arena.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of collected leaves.
    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Leaf ids in collection (preorder) order.
    pub fn leaves(&self) -> &[NodeId] {
        &self.leaves
    }

    /// Output value of leaf `i` of the leaves table.
    pub fn leaf_output(&self, i: usize) -> f64 {
        self.node(self.leaves[i]).output
    }

    /// Split description of an internal node, if it is one.
    pub fn split_of(&self, id: NodeId) -> Option<(u32, f32)> {
        let node = self.node(id);
        node.feature.map(|f| (f, node.threshold))
    }

    /// Walk the tree and pack all leaves into the leaves table.
    pub(crate) fn collect_leaves(&mut self) {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.is_leaf() {
                leaves.push(id);
            } else {
                // Right first so the left subtree is visited first.
                stack.push(node.right.expect("internal node missing right child"));
                stack.push(node.left.expect("internal node missing left child"));
            }
        }
        self.leaves = leaves;
    }

    /// Recompute every leaf's output from per-sample pseudo-responses and
    /// weights; returns the maximum leaf output.
    ///
    /// A leaf whose weight sum falls below epsilon (including leaves that
    /// released their samples during growth) outputs 0.
    pub fn update_output(&mut self, pseudo: &[f64], weights: &[f64]) -> f64 {
        let outputs: Vec<f64> = self
            .leaves
            .par_iter()
            .map(|&id| {
                let node = &self.nodes[id.index()];
                let mut s1 = 0.0;
                let mut s2 = 0.0;
                for &k in node.samples.as_deref().unwrap_or(&[]) {
                    s1 += pseudo[k as usize];
                    s2 += weights[k as usize];
                }
                if s2 >= f64::EPSILON {
                    s1 / s2
                } else {
                    0.0
                }
            })
            .collect();

        let mut max_label = f64::NEG_INFINITY;
        for (i, &output) in outputs.iter().enumerate() {
            let id = self.leaves[i];
            self.nodes[id.index()].output = output;
            if output > max_label {
                max_label = output;
            }
        }
        max_label
    }

    /// Route one feature row to its leaf and return the leaf output.
    pub fn output(&self, row: &[f32]) -> f64 {
        let mut id = self.root;
        loop {
            let node = self.node(id);
            match node.feature {
                None => return node.output,
                Some(f) => {
                    id = if row[f as usize] <= node.threshold {
                        node.left.expect("internal node missing left child")
                    } else {
                        node.right.expect("internal node missing right child")
                    };
                }
            }
        }
    }
}
