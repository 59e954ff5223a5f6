//! Tracks which group nodes need recomputation after a transaction.

use std::collections::HashSet;

use crate::row_node::NodeKey;
use crate::store::NodeStore;

/// The set of nodes whose derived state is stale.
///
/// An inactive path means "everything changed": every node is revisited.
/// An active path holds the ancestor chains of touched rows; stages skip
/// subtrees whose root is not on the path and keep their existing children.
#[derive(Debug, Clone, Default)]
pub struct ChangedPath {
    active: bool,
    nodes: HashSet<NodeKey>,
}

impl ChangedPath {
    /// A path that treats every node as changed.
    pub fn everything() -> Self {
        Self {
            active: false,
            nodes: HashSet::new(),
        }
    }

    /// An empty active path.
    pub fn new() -> Self {
        Self {
            active: true,
            nodes: HashSet::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Mark every ancestor of `key` (excluding `key` itself) as changed.
    pub fn add_parent_chain<T>(&mut self, store: &NodeStore<T>, key: NodeKey) {
        let mut pointer = store.get(key).and_then(|n| n.parent);
        while let Some(parent) = pointer {
            // Chains converge; stop at the first node already recorded.
            if !self.nodes.insert(parent) {
                break;
            }
            pointer = store.get(parent).and_then(|n| n.parent);
        }
    }

    /// Mark one node as changed.
    pub fn add_node(&mut self, key: NodeKey) {
        self.nodes.insert(key);
    }

    /// Whether the node must be recomputed.
    pub fn is_changed(&self, key: NodeKey) -> bool {
        !self.active || self.nodes.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
