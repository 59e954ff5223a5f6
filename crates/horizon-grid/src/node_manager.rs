//! Creation and bookkeeping of data row nodes.
//!
//! The node manager turns application rows into leaf [`RowNode`]s, keeps the
//! root's `all_leaf_children` in source order and enforces id uniqueness. It
//! never derives groups; the grouping stage consumes its output.

use std::collections::HashSet;
use std::sync::Arc;

use horizon_grid_core::logging::{span_names, targets};

use crate::changed_path::ChangedPath;
use crate::error::GridError;
use crate::events::RowNodeEvent;
use crate::row_node::{NodeKey, RowNode};
use crate::store::NodeStore;

/// Derives a stable id from a data row.
pub type RowIdGetter<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// A batch of row additions, removals and updates.
///
/// Removals and updates are matched by row id, so they need a row id getter.
/// They are applied in the order remove, update, add.
#[derive(Debug, Clone)]
pub struct RowTransaction<T> {
    pub add: Vec<T>,
    /// Insert added rows at this position of the leaf list instead of
    /// appending them.
    pub add_index: Option<usize>,
    pub remove: Vec<T>,
    pub update: Vec<T>,
}

impl<T> Default for RowTransaction<T> {
    fn default() -> Self {
        Self {
            add: Vec::new(),
            add_index: None,
            remove: Vec::new(),
            update: Vec::new(),
        }
    }
}

impl<T> RowTransaction<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, rows: impl IntoIterator<Item = T>) -> Self {
        self.add.extend(rows);
        self
    }

    pub fn add_at(mut self, index: usize, rows: impl IntoIterator<Item = T>) -> Self {
        self.add_index = Some(index);
        self.add.extend(rows);
        self
    }

    pub fn remove(mut self, rows: impl IntoIterator<Item = T>) -> Self {
        self.remove.extend(rows);
        self
    }

    pub fn update(mut self, rows: impl IntoIterator<Item = T>) -> Self {
        self.update.extend(rows);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.update.is_empty()
    }
}

/// Outcome of a transaction.
///
/// A row that could not be applied is reported in `errors`; the remaining
/// rows are still applied.
#[derive(Debug)]
pub struct TransactionResult<T> {
    pub add: Vec<NodeKey>,
    pub update: Vec<NodeKey>,
    /// Detached removed nodes. Nodes that were selected come back with
    /// `daemon` set.
    pub remove: Vec<RowNode<T>>,
    pub errors: Vec<GridError>,
}

impl<T> Default for TransactionResult<T> {
    fn default() -> Self {
        Self {
            add: Vec::new(),
            update: Vec::new(),
            remove: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Builds and maintains leaf nodes from row data.
pub struct RowNodeManager<T> {
    row_id: Option<RowIdGetter<T>>,
    next_id: u64,
    next_source_index: usize,
}

impl<T> RowNodeManager<T> {
    pub fn new(row_id: Option<RowIdGetter<T>>) -> Self {
        Self {
            row_id,
            next_id: 0,
            next_source_index: 0,
        }
    }

    /// Whether rows carry application ids.
    pub fn has_row_id_getter(&self) -> bool {
        self.row_id.is_some()
    }

    /// Replace all rows. Previous nodes, including groups, are destroyed.
    ///
    /// Returns one error per rejected row.
    pub fn set_row_data(&mut self, store: &mut NodeStore<T>, rows: Vec<T>) -> Vec<GridError> {
        store.clear();
        self.next_id = 0;
        self.next_source_index = 0;

        let mut errors = Vec::new();
        let mut leaves = Vec::with_capacity(rows.len());
        for row in rows {
            match self.create_node(store, row) {
                Ok(key) => leaves.push(key),
                Err(error) => errors.push(error),
            }
        }

        tracing::debug!(
            target: targets::NODE_MANAGER,
            rows = leaves.len(),
            rejected = errors.len(),
            "row data set"
        );
        let root = store.root();
        if let Some(root) = store.get_mut(root) {
            root.all_leaf_children = Arc::from(leaves);
        }
        errors
    }

    /// Apply a transaction, recording the ancestors of removed and updated
    /// rows in `changed_path`.
    pub fn apply_transaction(
        &mut self,
        store: &mut NodeStore<T>,
        transaction: RowTransaction<T>,
        changed_path: &mut ChangedPath,
    ) -> TransactionResult<T> {
        let _span = tracing::debug_span!(target: targets::NODE_MANAGER, "transaction", name = span_names::TRANSACTION).entered();
        let mut result = TransactionResult::default();
        let root = store.root();
        let mut leaves: Vec<NodeKey> = store
            .get(root)
            .map(|r| r.all_leaf_children.to_vec())
            .unwrap_or_default();

        let mut removed = HashSet::new();
        for row in &transaction.remove {
            let key = match self.lookup(store, row) {
                Ok(key) => key,
                Err(error) => {
                    tracing::warn!(target: targets::NODE_MANAGER, %error, "could not remove row");
                    result.errors.push(error);
                    continue;
                }
            };
            changed_path.add_parent_chain(store, key);
            removed.insert(key);

            let was_selected = store.get(key).and_then(|n| n.selected) == Some(true);
            if was_selected {
                store.events().dispatch(key, RowNodeEvent::SelectionChanged);
            }
            if let Some(mut node) = store.remove(key) {
                node.parent = None;
                node.daemon = was_selected;
                node.displayed = false;
                node.row_index = None;
                node.row_top = None;
                result.remove.push(node);
            }
        }
        if !removed.is_empty() {
            leaves.retain(|k| !removed.contains(k));
        }

        for row in transaction.update {
            let key = match self.lookup(store, &row) {
                Ok(key) => key,
                Err(error) => {
                    tracing::warn!(target: targets::NODE_MANAGER, %error, "could not update row");
                    result.errors.push(error);
                    continue;
                }
            };
            changed_path.add_parent_chain(store, key);
            store.set_data(key, Arc::new(row), true);
            result.update.push(key);
        }

        let mut added = Vec::with_capacity(transaction.add.len());
        for row in transaction.add {
            match self.create_node(store, row) {
                Ok(key) => added.push(key),
                Err(error) => result.errors.push(error),
            }
        }
        let position = transaction
            .add_index
            .map_or(leaves.len(), |index| index.min(leaves.len()));
        leaves.splice(position..position, added.iter().copied());
        result.add = added;

        if let Some(root) = store.get_mut(root) {
            root.all_leaf_children = Arc::from(leaves);
        }
        tracing::debug!(
            target: targets::NODE_MANAGER,
            added = result.add.len(),
            removed = result.remove.len(),
            updated = result.update.len(),
            errors = result.errors.len(),
            "transaction applied"
        );
        result
    }

    /// Leaf nodes in source order.
    pub fn for_each_node(&self, store: &NodeStore<T>, callback: &mut dyn FnMut(NodeKey, &RowNode<T>)) {
        let Some(root) = store.get(store.root()) else {
            return;
        };
        for key in root.all_leaf_children.iter() {
            if let Some(node) = store.get(*key) {
                callback(*key, node);
            }
        }
    }

    fn lookup(&self, store: &NodeStore<T>, row: &T) -> Result<NodeKey, GridError> {
        let getter = self.row_id.as_ref().ok_or(GridError::MissingRowId)?;
        let id = getter(row);
        store.by_id(&id).ok_or(GridError::RowNotFound { id })
    }

    fn create_node(&mut self, store: &mut NodeStore<T>, row: T) -> Result<NodeKey, GridError> {
        let id = match &self.row_id {
            Some(getter) => getter(&row),
            None => {
                let id = self.next_id.to_string();
                self.next_id += 1;
                id
            }
        };
        if store.is_id_taken(&id) {
            tracing::warn!(target: targets::NODE_MANAGER, %id, "duplicate row id, row rejected");
            return Err(GridError::DuplicateRowId { id });
        }

        let mut node = store.create_node(id.clone());
        node.data = Some(Arc::new(row));
        node.source_row_index = Some(self.next_source_index);
        node.parent = Some(store.root());
        self.next_source_index += 1;

        let key = store.insert(node);
        store.register_id(id, key);
        Ok(key)
    }
}
