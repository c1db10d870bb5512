//! The caller-supplied edge relation consumed by `rechain`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::node::GraphNode;

/// Stable identity key for a node: the address behind its `Arc` handle.
pub(crate) fn node_key(node: &Arc<GraphNode>) -> usize {
    Arc::as_ptr(node) as usize
}

/// A who-feeds-whom adjacency relation over [`GraphNode`]s.
///
/// Built by the connectivity-discovery layer and handed to
/// [`GraphScheduler::rechain`](crate::GraphScheduler::rechain) together with
/// the node list. Duplicate edges collapse, so dependency counts follow the
/// distinct-upstream rule.
#[derive(Default)]
pub struct GraphEdges {
    feeds: HashMap<usize, Vec<Arc<GraphNode>>>,
}

impl GraphEdges {
    /// Creates an empty relation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `from` feeds `to`. Adding the same edge twice has no
    /// further effect.
    pub fn add(&mut self, from: &Arc<GraphNode>, to: &Arc<GraphNode>) {
        let downstream = self.feeds.entry(node_key(from)).or_default();
        if downstream.iter().any(|n| Arc::ptr_eq(n, to)) {
            return;
        }
        downstream.push(Arc::clone(to));
    }

    /// The nodes directly fed by `from`.
    pub fn feeds_from(&self, from: &Arc<GraphNode>) -> &[Arc<GraphNode>] {
        self.feeds.get(&node_key(from)).map_or(&[], Vec::as_slice)
    }
}
