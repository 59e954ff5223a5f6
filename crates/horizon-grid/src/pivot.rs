//! Pivot result column generation.
//!
//! In pivot mode the distinct pivot key paths of the filtered leaves become
//! secondary columns, one per key path and value column. The aggregation
//! stage then fills one `agg_data` entry per generated column.

use std::collections::BTreeSet;

use horizon_grid_core::logging::targets;
use serde::{Deserialize, Serialize};

use crate::row_node::{NodeKey, RowNode};
use crate::stage::StageContext;
use crate::store::NodeStore;
use crate::value::RowData;

/// A generated (or server supplied) pivot column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotResultColumn {
    /// `keys.join(sep) + sep + value_col_id`.
    pub col_id: String,
    /// Header of the value column.
    pub header_name: String,
    pub pivot_keys: Vec<String>,
    pub value_col_id: String,
    pub agg_func: Option<String>,
    /// Ids of the enclosing column groups, innermost first.
    pub parent_group_ids: Vec<String>,
}

impl PivotResultColumn {
    /// Build a column for one key path and value column.
    pub fn new(
        pivot_keys: Vec<String>,
        value_col_id: &str,
        header_name: &str,
        agg_func: Option<String>,
        separator: &str,
    ) -> Self {
        let joined = pivot_keys.join(separator);
        let parent_group_ids = (1..=pivot_keys.len())
            .rev()
            .map(|len| pivot_keys[..len].join(separator))
            .collect();
        Self {
            col_id: format!("{joined}{separator}{value_col_id}"),
            header_name: header_name.to_string(),
            pivot_keys,
            value_col_id: value_col_id.to_string(),
            agg_func,
            parent_group_ids,
        }
    }
}

/// Holds the current pivot result columns.
#[derive(Debug, Default)]
pub struct PivotStage {
    result_columns: Vec<PivotResultColumn>,
}

impl PivotStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result_columns(&self) -> &[PivotResultColumn] {
        &self.result_columns
    }

    /// Whether pivoting is in effect.
    pub fn is_active<T>(ctx: &StageContext<'_, T>) -> bool {
        ctx.options.pivot_mode && !ctx.columns.pivot_columns().is_empty()
    }

    /// The pivot key path of a data row.
    pub fn pivot_keys<T: RowData>(
        ctx: &StageContext<'_, T>,
        store: &NodeStore<T>,
        node: &RowNode<T>,
    ) -> Vec<String> {
        ctx.columns
            .pivot_columns()
            .iter()
            .map(|col_id| ctx.value(store, node, col_id).key_string())
            .collect()
    }

    /// Regenerate the result columns. Returns `true` when the set changed.
    pub(crate) fn execute<T: RowData>(
        &mut self,
        store: &NodeStore<T>,
        ctx: &StageContext<'_, T>,
    ) -> bool {
        let next = if Self::is_active(ctx) {
            self.generate(store, ctx)
        } else {
            Vec::new()
        };
        if next == self.result_columns {
            return false;
        }
        tracing::debug!(
            target: targets::PIVOT,
            columns = next.len(),
            "pivot result columns changed"
        );
        self.result_columns = next;
        true
    }

    fn generate<T: RowData>(
        &self,
        store: &NodeStore<T>,
        ctx: &StageContext<'_, T>,
    ) -> Vec<PivotResultColumn> {
        let mut leaves = Vec::new();
        filtered_leaves(store, store.root(), &mut leaves);

        // BTreeSet orders key paths level by level.
        let key_paths: BTreeSet<Vec<String>> = leaves
            .iter()
            .filter_map(|key| store.get(*key))
            .map(|node| Self::pivot_keys(ctx, store, node))
            .collect();

        let separator = &ctx.options.pivot_key_separator;
        let mut columns = Vec::new();
        for keys in key_paths {
            for value_col in ctx.columns.value_columns() {
                columns.push(PivotResultColumn::new(
                    keys.clone(),
                    &value_col.col_id,
                    value_col.display_name(),
                    value_col.agg_func.clone(),
                    separator,
                ));
            }
        }
        columns
    }
}

/// Data rows under `key` that survived filtering.
pub(crate) fn filtered_leaves<T>(store: &NodeStore<T>, key: NodeKey, out: &mut Vec<NodeKey>) {
    let Some(node) = store.get(key) else {
        return;
    };
    for &child in node.children_after_filter.iter() {
        match store.get(child) {
            Some(child_node) if child_node.group => filtered_leaves(store, child, out),
            Some(_) => out.push(child),
            None => {}
        }
    }
}
