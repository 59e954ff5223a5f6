//! Pipeline stage ordering and shared stage inputs.

use crate::columns::ColumnModel;
use crate::config::GridOptions;
use crate::row_node::{NodeKey, RowNode};
use crate::store::NodeStore;
use crate::value::{CellValue, RowData};
use crate::value_service::ValueService;

/// Where a pipeline refresh starts. Every later stage runs as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefreshStage {
    /// Regroup from the leaf list.
    Everything,
    Filter,
    Pivot,
    Aggregate,
    FilterAggregates,
    Sort,
    /// Recompute displayed rows only.
    Map,
}

/// Read-only configuration handed to the filter, aggregation and sort stages.
pub struct StageContext<'a, T> {
    pub options: &'a GridOptions,
    pub columns: &'a ColumnModel,
    pub values: &'a ValueService<T>,
}

impl<T: RowData> StageContext<'_, T> {
    pub fn value(&self, store: &NodeStore<T>, node: &RowNode<T>, col_id: &str) -> CellValue {
        self.values.node_value(store, self.columns, node, col_id)
    }

    pub fn value_of(&self, store: &NodeStore<T>, key: NodeKey, col_id: &str) -> CellValue {
        self.values.value(store, self.columns, key, col_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(RefreshStage::Everything < RefreshStage::Filter);
        assert!(RefreshStage::Filter < RefreshStage::Pivot);
        assert!(RefreshStage::Aggregate < RefreshStage::FilterAggregates);
        assert!(RefreshStage::Sort < RefreshStage::Map);
    }
}
