//! The client-side row model.
//!
//! [`ClientSideRowModel`] holds every row in memory and derives the display
//! rows through the stage pipeline:
//!
//! ```text
//! rows -> node manager -> group -> filter -> pivot -> aggregate
//!      -> filter aggregates -> sort -> flatten
//! ```
//!
//! Configuration changes re-run the pipeline from the first affected
//! [`RefreshStage`]. Transactions re-run it along a [`ChangedPath`] so that
//! untouched groups keep their child lists.
//!
//! # Example
//!
//! ```
//! use horizon_grid::{ClientSideRowModel, ColumnDef, GridOptions};
//! use serde_json::json;
//!
//! let mut model = ClientSideRowModel::<serde_json::Value>::builder()
//!     .options(GridOptions { group_default_expanded: -1, ..Default::default() })
//!     .columns(vec![
//!         ColumnDef::new("country").row_group(),
//!         ColumnDef::new("gold").agg("sum"),
//!     ])
//!     .build()
//!     .unwrap();
//!
//! model.set_row_data(vec![
//!     json!({ "country": "US", "gold": 3 }),
//!     json!({ "country": "US", "gold": 2 }),
//! ]);
//! // one group row and two leaves
//! assert_eq!(model.row_count(), 3);
//! ```

use std::sync::Arc;

use horizon_grid_core::logging::{PerfSpan, span_names, targets};

use crate::aggregation::{AggFuncRegistry, AggregationStage};
use crate::changed_path::ChangedPath;
use crate::columns::{ColumnDef, ColumnModel};
use crate::config::GridOptions;
use crate::error::{GridError, Result};
use crate::events::{ModelUpdated, NodeEventBus, RowModelSignals, RowNodeEvent, RowsChanged};
use crate::filter::{ExternalFilter, FilterModel, FilterStage};
use crate::flatten::{FlattenParams, flatten};
use crate::grouping::{
    GroupByColumns, GroupStrategy, GroupingContext, TreeDataPathGetter, TreeDataStrategy,
    refresh_footers,
};
use crate::node_manager::{RowIdGetter, RowNodeManager, RowTransaction, TransactionResult};
use crate::pivot::{PivotResultColumn, PivotStage, filtered_leaves};
use crate::row_node::{NodeKey, RowNode};
use crate::sort::{RowComparator, SortModel, SortStage};
use crate::stage::{RefreshStage, StageContext};
use crate::store::NodeStore;
use crate::value::{CellValue, RowData};
use crate::value_service::{ValueGetter, ValueService};

/// In-memory row model.
pub struct ClientSideRowModel<T> {
    options: GridOptions,
    columns: ColumnModel,
    values: ValueService<T>,
    store: NodeStore<T>,
    manager: RowNodeManager<T>,
    strategy: Box<dyn GroupStrategy<T>>,
    filter: FilterStage<T>,
    pivot: PivotStage,
    sort: SortStage,
    agg_funcs: AggFuncRegistry,
    rows_to_display: Vec<NodeKey>,
    signals: RowModelSignals,
}

impl<T: RowData> ClientSideRowModel<T> {
    /// Start configuring a row model.
    pub fn builder() -> ClientSideRowModelBuilder<T> {
        ClientSideRowModelBuilder::new()
    }

    // =========================================================================
    // Row data
    // =========================================================================

    /// Replace all rows. Previous nodes are destroyed.
    ///
    /// Rejected rows (duplicate ids) and misplaced tree rows are reported;
    /// every other row is loaded.
    pub fn set_row_data(&mut self, rows: Vec<T>) -> Vec<GridError> {
        let mut issues = self.manager.set_row_data(&mut self.store, rows);
        self.rows_to_display.clear();
        let rows = self
            .store
            .get(self.store.root())
            .map_or(0, |root| root.all_leaf_children.len());
        self.signals.rows_changed.emit(RowsChanged::Full { rows });
        issues.extend(self.refresh(RefreshStage::Everything, ChangedPath::everything(), &[]));
        issues
    }

    /// Apply an add/remove/update batch and re-derive the touched groups.
    pub fn apply_transaction(&mut self, transaction: RowTransaction<T>) -> TransactionResult<T> {
        let mut changed = ChangedPath::new();
        let mut result = self
            .manager
            .apply_transaction(&mut self.store, transaction, &mut changed);

        self.signals.rows_changed.emit(RowsChanged::Incremental {
            added: result.add.len(),
            removed: result.remove.len(),
            updated: result.update.len(),
        });

        let touched: Vec<NodeKey> = result.add.iter().chain(&result.update).copied().collect();
        let issues = self.refresh(RefreshStage::Everything, changed, &touched);
        result.errors.extend(issues);
        if self.options.group_selects_children && result.remove.iter().any(|n| n.daemon) {
            let root = self.store.root();
            self.refresh_group_selection(root);
        }
        result
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Install a new filter model. Invalid filters are reported and ignored.
    pub fn set_filter_model(&mut self, model: FilterModel) -> Vec<GridError> {
        let issues = self.filter.set_model(model);
        self.refresh_model(RefreshStage::Filter);
        issues
    }

    pub fn set_external_filter(&mut self, filter: Option<ExternalFilter<T>>) {
        self.filter.set_external(filter);
        self.refresh_model(RefreshStage::Filter);
    }

    pub fn set_sort_model(&mut self, model: SortModel) {
        self.sort.set_model(model);
        self.refresh_model(RefreshStage::Sort);
    }

    /// Replace the active row group columns and regroup.
    pub fn set_row_group_columns(&mut self, col_ids: &[String]) -> Result<()> {
        self.columns.set_row_group_columns(col_ids)?;
        self.refresh_model(RefreshStage::Everything);
        Ok(())
    }

    pub fn set_pivot_mode(&mut self, pivot_mode: bool) {
        if self.options.pivot_mode == pivot_mode {
            return;
        }
        self.options.pivot_mode = pivot_mode;
        self.refresh_model(RefreshStage::Pivot);
    }

    pub fn set_pivot_columns(&mut self, col_ids: &[String]) -> Result<()> {
        self.columns.set_pivot_columns(col_ids)?;
        self.refresh_model(RefreshStage::Pivot);
        Ok(())
    }

    /// Change the aggregation function of a column.
    pub fn set_agg_func(&mut self, col_id: &str, func: Option<String>) -> Result<()> {
        self.columns.set_agg_func(col_id, func)?;
        self.refresh_model(RefreshStage::Pivot);
        Ok(())
    }

    /// Re-run the pipeline from `stage`.
    pub fn refresh_model(&mut self, stage: RefreshStage) {
        let issues = self.refresh(stage, ChangedPath::everything(), &[]);
        for issue in issues {
            tracing::debug!(target: targets::GROUPING, %issue, "row placed with issues");
        }
    }

    // =========================================================================
    // Display state
    // =========================================================================

    /// Expand or collapse a group. Footers act on their group.
    pub fn set_expanded(&mut self, key: NodeKey, expanded: bool) -> bool {
        let Some(key) = self.resolve_footer(key) else {
            return false;
        };
        if !self.store.get(key).is_some_and(|n| n.is_expandable()) {
            return false;
        }
        let changed = self.store.set_expanded(key, expanded);
        if changed {
            self.refresh_model(RefreshStage::Map);
        }
        changed
    }

    /// Expand or collapse every group.
    pub fn expand_all(&mut self, expanded: bool) {
        let groups: Vec<NodeKey> = self
            .store
            .iter()
            .filter(|(_, n)| n.is_expandable())
            .map(|(key, _)| key)
            .collect();
        let mut changed = false;
        for key in groups {
            changed |= self.store.set_expanded(key, expanded);
        }
        if changed {
            self.refresh_model(RefreshStage::Map);
        }
    }

    /// Select or deselect a row.
    ///
    /// With `group_selects_children`, selecting a group selects its filtered
    /// leaves and group rows show the derived state of their children.
    pub fn set_selected(&mut self, key: NodeKey, selected: bool) -> bool {
        let Some(key) = self.resolve_footer(key) else {
            return false;
        };
        let Some(node) = self.store.get(key) else {
            return false;
        };
        if !node.selectable {
            return false;
        }
        let is_group = node.group;
        let parent = node.parent;

        if !self.options.group_selects_children {
            return self.store.set_selected(key, Some(selected));
        }

        let mut changed = false;
        if is_group {
            let mut leaves = Vec::new();
            filtered_leaves(&self.store, key, &mut leaves);
            for leaf in leaves {
                changed |= self.store.set_selected(leaf, Some(selected));
            }
            changed |= self.refresh_group_selection(key);
        } else {
            changed |= self.store.set_selected(key, Some(selected));
        }

        let mut pointer = parent;
        while let Some(ancestor) = pointer {
            let Some(node) = self.store.get(ancestor) else {
                break;
            };
            if node.is_root() {
                break;
            }
            pointer = node.parent;
            let state = self.derived_selection(ancestor);
            changed |= self.store.set_selected(ancestor, state);
        }
        changed
    }

    /// Keys of selected data rows, in source order.
    pub fn selected_nodes(&self) -> Vec<NodeKey> {
        let mut selected = Vec::new();
        self.manager.for_each_node(&self.store, &mut |key, node| {
            if node.selected == Some(true) {
                selected.push(key);
            }
        });
        selected
    }

    fn resolve_footer(&self, key: NodeKey) -> Option<NodeKey> {
        let node = self.store.get(key)?;
        if node.footer { node.sibling } else { Some(key) }
    }

    /// Recompute tri-state selection of groups under (and including) `key`.
    fn refresh_group_selection(&mut self, key: NodeKey) -> bool {
        let children = match self.store.get(key) {
            Some(node) if node.group => node.children_after_filter.clone(),
            _ => return false,
        };
        let mut changed = false;
        for &child in children.iter() {
            changed |= self.refresh_group_selection(child);
        }
        if self.store.get(key).is_some_and(|n| !n.is_root()) {
            let state = self.derived_selection(key);
            changed |= self.store.set_selected(key, state);
        }
        changed
    }

    fn derived_selection(&self, key: NodeKey) -> Option<bool> {
        let Some(node) = self.store.get(key) else {
            return Some(false);
        };
        let mut states = node
            .children_after_filter
            .iter()
            .filter_map(|child| self.store.get(*child))
            .map(|child| child.selected);
        let Some(first) = states.next() else {
            return node.selected;
        };
        if states.all(|state| state == first) { first } else { None }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of displayed rows.
    pub fn row_count(&self) -> usize {
        self.rows_to_display.len()
    }

    /// Key of the row at a display index.
    pub fn row_at(&self, index: usize) -> Option<NodeKey> {
        self.rows_to_display.get(index).copied()
    }

    pub fn node(&self, key: NodeKey) -> Option<&RowNode<T>> {
        self.store.get(key)
    }

    /// Look up a data row by id.
    pub fn get_row_node(&self, id: &str) -> Option<NodeKey> {
        self.store.by_id(id)
    }

    /// Displayed rows in display order.
    pub fn displayed_rows(&self) -> &[NodeKey] {
        &self.rows_to_display
    }

    pub fn root(&self) -> NodeKey {
        self.store.root()
    }

    pub fn store(&self) -> &NodeStore<T> {
        &self.store
    }

    /// Node event bus for per-row listeners.
    pub fn events(&self) -> &NodeEventBus {
        self.store.events()
    }

    pub fn signals(&self) -> &RowModelSignals {
        &self.signals
    }

    pub fn options(&self) -> &GridOptions {
        &self.options
    }

    pub fn columns(&self) -> &ColumnModel {
        &self.columns
    }

    pub fn filter_model(&self) -> &FilterModel {
        self.filter.model()
    }

    pub fn sort_model(&self) -> &SortModel {
        self.sort.model()
    }

    pub fn agg_funcs(&self) -> &AggFuncRegistry {
        &self.agg_funcs
    }

    pub fn pivot_result_columns(&self) -> &[PivotResultColumn] {
        self.pivot.result_columns()
    }

    /// Resolved value of a column for a node.
    pub fn value(&self, key: NodeKey, col_id: &str) -> CellValue {
        self.values.value(&self.store, &self.columns, key, col_id)
    }

    /// Whether `node` passes the current column and external filters.
    pub fn does_row_pass_filter(&self, key: NodeKey) -> bool {
        let Some(node) = self.store.get(key) else {
            return false;
        };
        self.filter.passes(&self.store, &self.context(), node)
    }

    /// Sort an arbitrary list of nodes with the current sort model.
    pub fn sort_nodes(&self, keys: &[NodeKey]) -> Vec<NodeKey> {
        if !self.sort.is_sorting() {
            return keys.to_vec();
        }
        self.sort.sort_keys(&self.store, &self.context(), keys)
    }

    /// Groups and leaves in `children_after_group` order, parents first.
    pub fn for_each_node(&self, callback: &mut dyn FnMut(NodeKey, &RowNode<T>)) {
        self.walk(self.store.root(), |n| &n.children_after_group, callback);
    }

    /// Data rows in source order.
    pub fn for_each_leaf_node(&self, callback: &mut dyn FnMut(NodeKey, &RowNode<T>)) {
        self.manager.for_each_node(&self.store, callback);
    }

    pub fn for_each_node_after_filter(&self, callback: &mut dyn FnMut(NodeKey, &RowNode<T>)) {
        self.walk(self.store.root(), |n| &n.children_after_filter, callback);
    }

    pub fn for_each_node_after_filter_and_sort(
        &self,
        callback: &mut dyn FnMut(NodeKey, &RowNode<T>),
    ) {
        self.walk(self.store.root(), |n| &n.children_after_sort, callback);
    }

    fn walk(
        &self,
        key: NodeKey,
        children: fn(&RowNode<T>) -> &crate::row_node::ChildList,
        callback: &mut dyn FnMut(NodeKey, &RowNode<T>),
    ) {
        let Some(node) = self.store.get(key) else {
            return;
        };
        for &child in children(node).iter() {
            if let Some(child_node) = self.store.get(child) {
                callback(child, child_node);
                if child_node.group {
                    self.walk(child, children, callback);
                }
            }
        }
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    fn context(&self) -> StageContext<'_, T> {
        StageContext {
            options: &self.options,
            columns: &self.columns,
            values: &self.values,
        }
    }

    fn is_grouped(&self) -> bool {
        self.options.tree_data || !self.columns.row_group_columns().is_empty()
    }

    /// Run the pipeline from `stage`. `touched` are rows whose new ancestors
    /// join `changed` once regrouping has placed them; groups whose child
    /// list the grouping stage rewrote are added by the strategy.
    fn refresh(
        &mut self,
        stage: RefreshStage,
        mut changed: ChangedPath,
        touched: &[NodeKey],
    ) -> Vec<GridError> {
        let _perf = PerfSpan::new(span_names::REFRESH);
        let mut issues = Vec::new();

        if stage <= RefreshStage::Everything {
            let ctx = GroupingContext {
                options: &self.options,
                columns: &self.columns,
                values: &self.values,
            };
            issues = self.strategy.derive_children(&mut self.store, &ctx, &mut changed);
            refresh_footers(&mut self.store, &self.options);
            for &key in touched {
                changed.add_parent_chain(&self.store, key);
            }
            tracing::debug!(
                target: targets::GROUPING,
                strategy = self.strategy.name(),
                incremental = changed.is_active(),
                "rows regrouped"
            );
        }

        let ctx = StageContext {
            options: &self.options,
            columns: &self.columns,
            values: &self.values,
        };
        if stage <= RefreshStage::Filter {
            self.filter.execute(&mut self.store, &ctx, &changed);
        }
        if stage <= RefreshStage::Pivot && self.pivot.execute(&self.store, &ctx) {
            // New result columns: every group needs its pivot values.
            changed = ChangedPath::everything();
            self.signals
                .pivot_columns_changed
                .emit(self.pivot.result_columns().to_vec());
        }
        if stage <= RefreshStage::Aggregate {
            AggregationStage::new(&self.store, &ctx, &self.agg_funcs, &self.pivot)
                .execute(&mut self.store, &changed);
        }
        if stage <= RefreshStage::FilterAggregates {
            self.filter.execute_agg_filter(&mut self.store, &ctx, &changed);
        }
        if stage <= RefreshStage::Sort {
            self.sort.execute(&mut self.store, &ctx, &changed);
        }

        let grouped = self.is_grouped();
        let params = FlattenParams::new(&self.options, grouped);
        let previous = std::mem::take(&mut self.rows_to_display);
        self.rows_to_display = flatten(&mut self.store, &params, &previous);

        self.signals.model_updated.emit(ModelUpdated {
            stage,
            row_count: self.rows_to_display.len(),
        });
        issues
    }
}

impl<T: RowData + Clone> ClientSideRowModel<T> {
    /// Edit one cell through the row model.
    ///
    /// Rows sharing data with other rows are copied before the write. A
    /// change to a grouping or pivot column regroups; any other change
    /// re-runs the pipeline along the row's ancestors. Returns `false` when
    /// the node has no data or the row type rejects the field.
    pub fn set_data_value(&mut self, key: NodeKey, col_id: &str, value: CellValue) -> bool {
        let Some(column) = self.columns.get(col_id) else {
            tracing::warn!(target: targets::NODE, %col_id, "cannot edit unknown column");
            return false;
        };
        let field = column.data_field().to_string();
        let Some(node) = self.store.get(key) else {
            return false;
        };
        if node.footer {
            return false;
        }
        let Some(mut data) = node.data.clone() else {
            return false;
        };
        let old = self.values.node_value(&self.store, &self.columns, node, col_id);
        if !Arc::make_mut(&mut data).set_value(&field, value.clone()) {
            return false;
        }
        if let Some(node) = self.store.get_mut(key) {
            node.data = Some(data);
        }
        self.store.events().dispatch(
            key,
            RowNodeEvent::CellChanged {
                col_id: col_id.to_string(),
                old,
                new: value,
            },
        );

        let structural = self.columns.row_group_columns().iter().any(|c| c == col_id)
            || self.columns.pivot_columns().iter().any(|c| c == col_id);
        let mut changed = ChangedPath::new();
        changed.add_parent_chain(&self.store, key);
        let (stage, touched) = if structural {
            (RefreshStage::Everything, vec![key])
        } else {
            (RefreshStage::Filter, Vec::new())
        };
        let issues = self.refresh(stage, changed, &touched);
        for issue in issues {
            tracing::debug!(target: targets::GROUPING, %issue, "row placed with issues");
        }
        true
    }
}

/// Builder for [`ClientSideRowModel`].
///
/// Holds the configuration that cannot be serialised: row id and tree path
/// getters, value getters, comparators, custom aggregation functions and the
/// external filter.
pub struct ClientSideRowModelBuilder<T> {
    options: GridOptions,
    columns: Vec<ColumnDef>,
    row_id: Option<RowIdGetter<T>>,
    tree_data_path: Option<TreeDataPathGetter<T>>,
    values: ValueService<T>,
    comparators: Vec<(String, RowComparator)>,
    agg_funcs: AggFuncRegistry,
    external_filter: Option<ExternalFilter<T>>,
}

impl<T: RowData> ClientSideRowModelBuilder<T> {
    pub fn new() -> Self {
        Self {
            options: GridOptions::default(),
            columns: Vec::new(),
            row_id: None,
            tree_data_path: None,
            values: ValueService::new(),
            comparators: Vec::new(),
            agg_funcs: AggFuncRegistry::new(),
            external_filter: None,
        }
    }

    pub fn options(mut self, options: GridOptions) -> Self {
        self.options = options;
        self
    }

    pub fn columns(mut self, columns: Vec<ColumnDef>) -> Self {
        self.columns = columns;
        self
    }

    /// Derive row ids from data. Required for transaction removes and updates.
    pub fn row_id<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.row_id = Some(Arc::new(f));
        self
    }

    /// Path of each row for tree data.
    pub fn tree_data_path<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> Vec<String> + Send + Sync + 'static,
    {
        self.tree_data_path = Some(Arc::new(f));
        self
    }

    pub fn value_getter<F>(mut self, col_id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T) -> CellValue + Send + Sync + 'static,
    {
        let getter: ValueGetter<T> = Arc::new(f);
        self.values.set_getter(col_id, getter);
        self
    }

    pub fn comparator<F>(mut self, col_id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CellValue, &CellValue) -> std::cmp::Ordering + Send + Sync + 'static,
    {
        self.comparators.push((col_id.into(), Arc::new(f)));
        self
    }

    /// Register a custom aggregation function under `name`.
    pub fn register_agg_func<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[CellValue]) -> CellValue + Send + Sync + 'static,
    {
        self.agg_funcs.register(name, f);
        self
    }

    pub fn external_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&RowNode<T>) -> bool + Send + Sync + 'static,
    {
        self.external_filter = Some(Arc::new(f));
        self
    }

    /// Build the row model. Fails on inconsistent configuration.
    pub fn build(self) -> Result<ClientSideRowModel<T>> {
        let columns = ColumnModel::new(self.columns)?;
        let strategy: Box<dyn GroupStrategy<T>> = if self.options.tree_data {
            let path = self.tree_data_path.ok_or_else(|| {
                GridError::MissingConfiguration(
                    "tree data is enabled but no tree data path getter was supplied".into(),
                )
            })?;
            Box::new(TreeDataStrategy::new(path))
        } else {
            Box::new(GroupByColumns::new())
        };

        let mut filter = FilterStage::new();
        filter.set_external(self.external_filter);
        let mut sort = SortStage::new();
        for (col_id, comparator) in self.comparators {
            sort.set_comparator(col_id, comparator);
        }

        tracing::debug!(
            target: targets::NODE_MANAGER,
            strategy = strategy.name(),
            columns = columns.columns().len(),
            "client-side row model built"
        );
        let mut model = ClientSideRowModel {
            options: self.options,
            columns,
            values: self.values,
            store: NodeStore::new(),
            manager: RowNodeManager::new(self.row_id),
            strategy,
            filter,
            pivot: PivotStage::new(),
            sort,
            agg_funcs: self.agg_funcs,
            rows_to_display: Vec::new(),
            signals: RowModelSignals::new(),
        };
        model.refresh_model(RefreshStage::Everything);
        Ok(model)
    }
}

impl<T: RowData> Default for ClientSideRowModelBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ColumnFilter;
    use crate::sort::SortModelItem;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    fn olympics() -> Vec<Value> {
        vec![
            json!({ "id": "1", "country": "US", "sport": "Swim", "gold": 1 }),
            json!({ "id": "2", "country": "UK", "sport": "Run", "gold": 2 }),
            json!({ "id": "3", "country": "US", "sport": "Run", "gold": 3 }),
            json!({ "id": "4", "country": "UK", "sport": "Swim", "gold": 4 }),
        ]
    }

    fn grouped_model(options: GridOptions) -> ClientSideRowModel<Value> {
        let mut model = ClientSideRowModel::builder()
            .options(options)
            .columns(vec![
                ColumnDef::new("country").row_group(),
                ColumnDef::new("sport"),
                ColumnDef::new("gold").agg("sum"),
            ])
            .row_id(|row: &Value| row["id"].as_str().unwrap_or_default().to_string())
            .build()
            .unwrap();
        assert!(model.set_row_data(olympics()).is_empty());
        model
    }

    fn displayed_ids(model: &ClientSideRowModel<Value>) -> Vec<String> {
        model
            .displayed_rows()
            .iter()
            .map(|k| model.node(*k).unwrap().id.clone())
            .collect()
    }

    #[test]
    fn test_tree_data_requires_path_getter() {
        let result = ClientSideRowModel::<Value>::builder()
            .options(GridOptions {
                tree_data: true,
                ..Default::default()
            })
            .build();
        assert!(matches!(result, Err(GridError::MissingConfiguration(_))));
    }

    #[test]
    fn test_grouped_display_and_aggregation() {
        let mut model = grouped_model(GridOptions::default());
        assert_eq!(displayed_ids(&model), ["row-group-country-US", "row-group-country-UK"]);

        let us = model.row_at(0).unwrap();
        assert_eq!(model.value(us, "gold"), CellValue::Int(4));
        assert_eq!(model.node(us).unwrap().all_children_count, Some(2));

        model.set_expanded(us, true);
        assert_eq!(
            displayed_ids(&model),
            ["row-group-country-US", "1", "3", "row-group-country-UK"]
        );
        assert_eq!(model.node(model.row_at(3).unwrap()).unwrap().row_top, Some(75.0));
    }

    #[test]
    fn test_sort_groups_by_aggregate() {
        let mut model = grouped_model(GridOptions::default());
        model.set_sort_model(vec![SortModelItem::desc("gold")]);
        assert_eq!(displayed_ids(&model), ["row-group-country-UK", "row-group-country-US"]);
    }

    #[test]
    fn test_filter_keeps_groups_with_passing_leaves() {
        let mut model = grouped_model(GridOptions::default());
        let issues = model.set_filter_model(
            FilterModel::new().with("sport", ColumnFilter::Equals { filter: "Swim".into() }),
        );
        assert!(issues.is_empty());
        let us = model.get_row_node("1").and_then(|k| model.node(k)).and_then(|n| n.parent).unwrap();
        assert_eq!(model.value(us, "gold"), CellValue::Int(1));
    }

    #[test]
    fn test_transaction_only_touches_changed_groups() {
        let mut model = grouped_model(GridOptions::default());
        let uk = model.row_at(1).unwrap();
        let uk_children = model.node(uk).unwrap().children_after_sort.clone();

        let result = model.apply_transaction(
            RowTransaction::new().add([json!({ "id": "5", "country": "US", "sport": "Swim", "gold": 10 })]),
        );
        assert!(result.errors.is_empty());
        assert!(Arc::ptr_eq(&uk_children, &model.node(uk).unwrap().children_after_sort));

        let us = model.row_at(0).unwrap();
        assert_eq!(model.value(us, "gold"), CellValue::Int(14));
    }

    #[test]
    fn test_group_selects_children() {
        let mut model = grouped_model(GridOptions {
            group_selects_children: true,
            ..Default::default()
        });
        let us = model.row_at(0).unwrap();
        let one = model.get_row_node("1").unwrap();

        model.set_selected(one, true);
        assert_eq!(model.node(us).unwrap().selected, None);

        model.set_selected(us, true);
        assert_eq!(model.node(us).unwrap().selected, Some(true));
        assert_eq!(model.selected_nodes().len(), 2);
    }

    #[test]
    fn test_signals() {
        let model = grouped_model(GridOptions::default());
        let updates = Arc::new(Mutex::new(Vec::new()));
        let u = updates.clone();
        model.signals().model_updated.connect(move |update| u.lock().push(*update));

        let mut model = model;
        model.set_sort_model(vec![SortModelItem::asc("country")]);
        assert_eq!(
            *updates.lock(),
            vec![ModelUpdated {
                stage: RefreshStage::Sort,
                row_count: 2
            }]
        );
    }

    #[test]
    fn test_set_data_value_regroups() {
        let mut model = grouped_model(GridOptions::default());
        let one = model.get_row_node("1").unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        model.events().subscribe(one, move |_, event| e.lock().push(event.clone()));

        assert!(model.set_data_value(one, "country", CellValue::from("UK")));
        let parent = model.node(one).unwrap().parent.unwrap();
        assert_eq!(model.node(parent).unwrap().key.as_deref(), Some("UK"));
        assert_eq!(model.value(parent, "gold"), CellValue::Int(7));
        assert!(events.lock().contains(&RowNodeEvent::CellChanged {
            col_id: "country".into(),
            old: CellValue::from("US"),
            new: CellValue::from("UK"),
        }));
    }
}
