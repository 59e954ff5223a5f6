//! Read access shared by the row models.
//!
//! The chart datasource and the export projection only read rows, so they are
//! written against [`RowModel`] and work with either row model.

use crate::aggregation::AggFuncRegistry;
use crate::client_side::ClientSideRowModel;
use crate::columns::ColumnModel;
use crate::pivot::PivotResultColumn;
use crate::row_node::{NodeKey, RowNode};
use crate::value::{CellValue, RowData};

/// Which row model a [`RowModel`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowModelKind {
    ClientSide,
    ServerSide,
}

/// Read-only view of a row model.
pub trait RowModel<T: RowData> {
    fn kind(&self) -> RowModelKind;

    /// Number of displayed rows.
    fn row_count(&self) -> usize;

    /// Key of the displayed row at `index`.
    fn row_at(&self, index: usize) -> Option<NodeKey>;

    fn node(&self, key: NodeKey) -> Option<&RowNode<T>>;

    /// Every loaded group and data row, parents before children.
    fn for_each_node(&self, callback: &mut dyn FnMut(NodeKey, &RowNode<T>));

    /// Rows that passed filtering, in sorted order. Only the client-side
    /// model knows this set; other models visit nothing.
    fn for_each_node_after_filter_and_sort(&self, callback: &mut dyn FnMut(NodeKey, &RowNode<T>)) {
        let _ = callback;
    }

    fn columns(&self) -> &ColumnModel;

    /// Resolved value of a column for a node.
    fn value(&self, key: NodeKey, col_id: &str) -> CellValue;

    fn agg_funcs(&self) -> &AggFuncRegistry;

    /// Order nodes by the active sort model. Models that sort remotely
    /// return the input unchanged.
    fn sort_nodes(&self, keys: Vec<NodeKey>) -> Vec<NodeKey> {
        keys
    }

    fn pivot_result_columns(&self) -> &[PivotResultColumn];

    fn is_pivot_mode(&self) -> bool;

    /// Active row group column ids.
    fn row_group_columns(&self) -> &[String] {
        self.columns().row_group_columns()
    }
}

impl<T: RowData> RowModel<T> for ClientSideRowModel<T> {
    fn kind(&self) -> RowModelKind {
        RowModelKind::ClientSide
    }

    fn row_count(&self) -> usize {
        Self::row_count(self)
    }

    fn row_at(&self, index: usize) -> Option<NodeKey> {
        Self::row_at(self, index)
    }

    fn node(&self, key: NodeKey) -> Option<&RowNode<T>> {
        Self::node(self, key)
    }

    fn for_each_node(&self, callback: &mut dyn FnMut(NodeKey, &RowNode<T>)) {
        Self::for_each_node(self, callback);
    }

    fn for_each_node_after_filter_and_sort(&self, callback: &mut dyn FnMut(NodeKey, &RowNode<T>)) {
        Self::for_each_node_after_filter_and_sort(self, callback);
    }

    fn columns(&self) -> &ColumnModel {
        Self::columns(self)
    }

    fn value(&self, key: NodeKey, col_id: &str) -> CellValue {
        Self::value(self, key, col_id)
    }

    fn agg_funcs(&self) -> &AggFuncRegistry {
        Self::agg_funcs(self)
    }

    fn sort_nodes(&self, keys: Vec<NodeKey>) -> Vec<NodeKey> {
        Self::sort_nodes(self, &keys)
    }

    fn pivot_result_columns(&self) -> &[PivotResultColumn] {
        Self::pivot_result_columns(self)
    }

    fn is_pivot_mode(&self) -> bool {
        self.options().pivot_mode
    }
}
