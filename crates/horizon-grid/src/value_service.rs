//! Resolves cell values for row nodes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::columns::ColumnModel;
use crate::row_node::{NodeKey, RowNode};
use crate::store::NodeStore;
use crate::value::{CellValue, RowData};

/// Computes a column value from row data.
pub type ValueGetter<T> = Arc<dyn Fn(&T) -> CellValue + Send + Sync>;

/// Per-column value getters plus the lookup rules for group rows.
///
/// A leaf reads its data through the column's getter or field. A group row
/// answers from its aggregated values first, then its group values, then any
/// data it carries (tree data parents and server-side groups). A footer
/// answers for its group.
pub struct ValueService<T> {
    getters: HashMap<String, ValueGetter<T>>,
}

impl<T> Clone for ValueService<T> {
    fn clone(&self) -> Self {
        Self {
            getters: self.getters.clone(),
        }
    }
}

impl<T> Default for ValueService<T> {
    fn default() -> Self {
        Self {
            getters: HashMap::new(),
        }
    }
}

impl<T: RowData> ValueService<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a getter for a column.
    pub fn set_getter(&mut self, col_id: impl Into<String>, getter: ValueGetter<T>) {
        self.getters.insert(col_id.into(), getter);
    }

    /// Value of `col_id` in a data row.
    pub fn data_value(&self, columns: &ColumnModel, data: &T, col_id: &str) -> CellValue {
        if let Some(getter) = self.getters.get(col_id) {
            return getter(data);
        }
        let field = columns.get(col_id).map(|c| c.data_field()).unwrap_or(col_id);
        data.value(field)
    }

    /// Value of `col_id` for a node already borrowed from the store.
    pub fn node_value(
        &self,
        store: &NodeStore<T>,
        columns: &ColumnModel,
        node: &RowNode<T>,
        col_id: &str,
    ) -> CellValue {
        if node.footer {
            return match node.sibling.and_then(|s| store.get(s)) {
                Some(group) => self.node_value(store, columns, group, col_id),
                None => CellValue::Null,
            };
        }
        if node.group {
            if let Some(value) = node.agg_data.get(col_id).or_else(|| node.group_data.get(col_id)) {
                return value.clone();
            }
        }
        match &node.data {
            Some(data) => self.data_value(columns, data, col_id),
            None => CellValue::Null,
        }
    }

    /// Value of `col_id` for the node at `key`.
    pub fn value(
        &self,
        store: &NodeStore<T>,
        columns: &ColumnModel,
        key: NodeKey,
        col_id: &str,
    ) -> CellValue {
        match store.get(key) {
            Some(node) => self.node_value(store, columns, node, col_id),
            None => CellValue::Null,
        }
    }
}
