//! Grouping stage.
//!
//! Turns the root's flat leaf list into the `children_after_group` tree.
//! Two strategies implement [`GroupStrategy`]: grouping by row group column
//! values and tree data built from explicit row paths. The strategy is chosen
//! once when the row model is built.
//!
//! Both strategies re-derive the whole tree on each run but reuse existing
//! group nodes by key and parent, so node identity and expansion state survive
//! and unchanged levels keep their child lists. Every node whose child list
//! changed is recorded on the [`ChangedPath`] together with its ancestors.

mod by_column;
mod footer;
mod tree_data;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub use by_column::GroupByColumns;
pub(crate) use footer::refresh_footers;
pub use tree_data::{TreeDataPathGetter, TreeDataStrategy};

use crate::changed_path::ChangedPath;
use crate::columns::ColumnModel;
use crate::config::GridOptions;
use crate::error::GridError;
use crate::row_node::{NodeKey, share_if_equal};
use crate::store::NodeStore;
use crate::value_service::ValueService;

/// Read-only inputs of a grouping run.
pub struct GroupingContext<'a, T> {
    pub options: &'a GridOptions,
    pub columns: &'a ColumnModel,
    pub values: &'a ValueService<T>,
}

/// A way of deriving `children_after_group` from the root's leaves.
pub trait GroupStrategy<T>: Send + Sync {
    /// Rebuild the group tree. Returns per-row problems; the rows concerned
    /// are still placed in the tree.
    fn derive_children(
        &mut self,
        store: &mut NodeStore<T>,
        ctx: &GroupingContext<'_, T>,
        changed: &mut ChangedPath,
    ) -> Vec<GridError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Per-run bookkeeping shared by the strategies.
#[derive(Default)]
struct GroupingPass {
    children: HashMap<NodeKey, Vec<NodeKey>>,
    visited: HashSet<NodeKey>,
}

impl GroupingPass {
    /// Append `child` under `parent` the first time it is seen this pass.
    fn attach(&mut self, parent: NodeKey, child: NodeKey) {
        if self.visited.insert(child) {
            self.children.entry(parent).or_default().push(child);
        }
    }

    /// Write the collected child lists and drop stale `children_mapped`
    /// entries. Visited nodes missing from `children` become childless.
    /// Nodes whose list changed go on `changed` with their ancestors.
    fn commit<T>(mut self, store: &mut NodeStore<T>, changed: &mut ChangedPath) -> HashSet<NodeKey> {
        let root = store.root();
        let targets: Vec<NodeKey> = self.visited.iter().copied().chain([root]).collect();
        for key in targets {
            let children = self.children.remove(&key).unwrap_or_default();
            let mapped: HashMap<String, NodeKey> = match store.get(key) {
                Some(node) => node
                    .children_mapped
                    .iter()
                    .filter(|(_, child)| {
                        self.visited.contains(*child)
                            && store.get(**child).and_then(|c| c.parent) == Some(key)
                    })
                    .map(|(k, v)| (k.clone(), *v))
                    .collect(),
                None => continue,
            };
            let mut regrouped = false;
            if let Some(node) = store.get_mut(key) {
                let list = share_if_equal(&node.children_after_group, children);
                regrouped = !Arc::ptr_eq(&list, &node.children_after_group);
                node.children_after_group = list;
                node.children_mapped = mapped;
            }
            if regrouped {
                changed.add_node(key);
                changed.add_parent_chain(store, key);
            }
        }
        self.visited
    }
}

/// Destroy a group node together with its footer.
fn remove_group<T>(store: &mut NodeStore<T>, key: NodeKey) {
    if let Some(node) = store.remove(key) {
        if let Some(footer) = node.sibling {
            store.remove(footer);
        }
    }
}

/// All data leaves under `key` in `children_after_group` order.
fn collect_leaves<T>(store: &NodeStore<T>, key: NodeKey, out: &mut Vec<NodeKey>) {
    let Some(node) = store.get(key) else {
        return;
    };
    for child in node.children_after_group.iter() {
        if let Some(child_node) = store.get(*child) {
            if child_node.data.is_some() {
                out.push(*child);
            }
            if child_node.group {
                collect_leaves(store, *child, out);
            }
        }
    }
}

/// Recompute `all_leaf_children` for every group below the root.
fn refresh_all_leaf_children<T>(store: &mut NodeStore<T>, groups: &[NodeKey]) {
    for &group in groups {
        let mut leaves = Vec::new();
        collect_leaves(store, group, &mut leaves);
        if let Some(node) = store.get_mut(group) {
            node.all_leaf_children = share_if_equal(&node.all_leaf_children, leaves);
        }
    }
}
