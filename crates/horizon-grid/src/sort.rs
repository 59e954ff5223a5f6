//! Sort model and the sort stage.
//!
//! Children are sorted per level, never across levels. The multi-column
//! comparison honours each column's direction and the configured null
//! placement, and falls back to `object_id` so the order is total and stable.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use horizon_grid_core::logging::targets;
use serde::{Deserialize, Serialize};

use crate::changed_path::ChangedPath;
use crate::row_node::{NodeKey, derive_child_list};
use crate::stage::StageContext;
use crate::store::NodeStore;
use crate::value::{CellValue, RowData};

/// Sort direction of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One entry of the sort model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortModelItem {
    pub col_id: String,
    pub sort: SortDirection,
}

impl SortModelItem {
    pub fn asc(col_id: impl Into<String>) -> Self {
        Self {
            col_id: col_id.into(),
            sort: SortDirection::Asc,
        }
    }

    pub fn desc(col_id: impl Into<String>) -> Self {
        Self {
            col_id: col_id.into(),
            sort: SortDirection::Desc,
        }
    }
}

/// Ordered sort keys, primary first.
pub type SortModel = Vec<SortModelItem>;

/// Placement of null values. Applies in both directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NullsPosition {
    First,
    #[default]
    Last,
}

/// Compares two non-null values of a column, ascending.
pub type RowComparator = Arc<dyn Fn(&CellValue, &CellValue) -> Ordering + Send + Sync>;

/// Sort state of a row model.
#[derive(Default)]
pub struct SortStage {
    model: SortModel,
    comparators: HashMap<String, RowComparator>,
}

impl SortStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self) -> &SortModel {
        &self.model
    }

    pub fn set_model(&mut self, model: SortModel) {
        self.model = model;
    }

    pub fn set_comparator(&mut self, col_id: impl Into<String>, comparator: RowComparator) {
        self.comparators.insert(col_id.into(), comparator);
    }

    pub fn is_sorting(&self) -> bool {
        !self.model.is_empty()
    }

    /// Compare two values of one sort column.
    pub fn compare_values(
        &self,
        item: &SortModelItem,
        a: &CellValue,
        b: &CellValue,
        nulls: NullsPosition,
    ) -> Ordering {
        let null_first = nulls == NullsPosition::First;
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => if null_first { Ordering::Less } else { Ordering::Greater },
            (false, true) => if null_first { Ordering::Greater } else { Ordering::Less },
            (false, false) => {
                let ordering = match self.comparators.get(&item.col_id) {
                    Some(comparator) => comparator(a, b),
                    None => a.compare(b),
                };
                match item.sort {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            }
        }
    }

    /// Sort an arbitrary list of nodes with the full sort model.
    pub fn sort_keys<T: RowData>(
        &self,
        store: &NodeStore<T>,
        ctx: &StageContext<'_, T>,
        keys: &[NodeKey],
    ) -> Vec<NodeKey> {
        let mut rows: Vec<(NodeKey, u64, Vec<CellValue>)> = keys
            .iter()
            .filter_map(|&key| {
                let node = store.get(key)?;
                let values = self
                    .model
                    .iter()
                    .map(|item| ctx.value(store, node, &item.col_id))
                    .collect();
                Some((key, node.object_id, values))
            })
            .collect();

        let nulls = ctx.options.nulls_position;
        rows.sort_by(|(_, a_id, a), (_, b_id, b)| {
            self.model
                .iter()
                .zip(a.iter().zip(b.iter()))
                .map(|(item, (a, b))| self.compare_values(item, a, b, nulls))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| a_id.cmp(b_id))
        });
        rows.into_iter().map(|(key, _, _)| key).collect()
    }

    /// Compute `children_after_sort` for changed nodes.
    pub(crate) fn execute<T: RowData>(
        &self,
        store: &mut NodeStore<T>,
        ctx: &StageContext<'_, T>,
        changed: &ChangedPath,
    ) {
        let root = store.root();
        self.sort_node(store, ctx, changed, root);
        tracing::trace!(target: targets::SORT, columns = self.model.len(), "sort stage done");
    }

    fn sort_node<T: RowData>(
        &self,
        store: &mut NodeStore<T>,
        ctx: &StageContext<'_, T>,
        changed: &ChangedPath,
        key: NodeKey,
    ) {
        let Some(node) = store.get(key) else {
            return;
        };
        if !node.group || !changed.is_changed(key) {
            return;
        }
        let input = node.children_after_agg_filter.clone();
        let sorted = if self.is_sorting() {
            let keys = self.sort_keys(store, ctx, &input);
            derive_child_list(&input, &node.children_after_sort, keys)
        } else {
            Arc::clone(&input)
        };
        store.set_children_after_sort(key, sorted);

        for &child in input.iter() {
            self.sort_node(store, ctx, changed, child);
        }
    }
}
