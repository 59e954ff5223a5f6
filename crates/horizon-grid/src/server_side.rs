//! Server-side row model.
//!
//! Rows are fetched block by block from a [`ServerSideDatasource`]. Each
//! level of the group tree has its own store: the root store holds the top
//! level rows and every expanded server group opens a child store whose
//! requests carry the group's route in `group_keys`.
//!
//! Rows that are not loaded yet are stub nodes. The datasource answers
//! through a [`LoadCallback`] that may be completed on any thread; answers
//! are queued on a channel and applied by
//! [`ServerSideRowModel::process_responses`]. Every block request carries the
//! version of its store, and purging a store bumps the version, so answers
//! that arrive after a filter or sort change are dropped.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use horizon_grid_core::logging::targets;
use serde::{Deserialize, Serialize};

use crate::aggregation::AggFuncRegistry;
use crate::columns::{ColumnDef, ColumnModel};
use crate::config::GridOptions;
use crate::error::{GridError, Result};
use crate::events::{ModelUpdated, NodeEventBus, RowModelSignals};
use crate::filter::FilterModel;
use crate::flatten::{FlattenParams, flatten};
use crate::node_manager::RowIdGetter;
use crate::pivot::PivotResultColumn;
use crate::row_model::{RowModel, RowModelKind};
use crate::row_node::{ChildList, NodeKey, RowNode};
use crate::sort::SortModel;
use crate::stage::RefreshStage;
use crate::store::NodeStore;
use crate::value::{CellValue, RowData};
use crate::value_service::ValueService;

/// A column as described to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub id: String,
    pub display_name: String,
    pub field: String,
    pub agg_func: Option<String>,
}

impl From<&ColumnDef> for ColumnDescriptor {
    fn from(column: &ColumnDef) -> Self {
        Self {
            id: column.col_id.clone(),
            display_name: column.display_name().to_string(),
            field: column.data_field().to_string(),
            agg_func: column.agg_func.clone(),
        }
    }
}

/// What the server is asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSideGetRowsRequest {
    /// First row of the block.
    pub start_row: usize,
    /// One past the last row of the block.
    pub end_row: usize,
    pub row_group_cols: Vec<ColumnDescriptor>,
    pub value_cols: Vec<ColumnDescriptor>,
    pub pivot_cols: Vec<ColumnDescriptor>,
    pub pivot_mode: bool,
    /// Keys of the expanded group being loaded, top level first.
    pub group_keys: Vec<String>,
    pub filter_model: FilterModel,
    pub sort_model: SortModel,
}

/// A successful block load.
#[derive(Debug, Clone)]
pub struct LoadSuccessParams<T> {
    pub row_data: Vec<T>,
    /// Total rows in the store, when the server knows it.
    pub row_count: Option<usize>,
}

impl<T> LoadSuccessParams<T> {
    pub fn new(row_data: Vec<T>) -> Self {
        Self {
            row_data,
            row_count: None,
        }
    }

    pub fn with_row_count(mut self, row_count: usize) -> Self {
        self.row_count = Some(row_count);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockTicket {
    store: NodeKey,
    block: usize,
    version: u64,
}

enum BlockOutcome<T> {
    Loaded(LoadSuccessParams<T>),
    Failed,
}

struct BlockResponse<T> {
    ticket: BlockTicket,
    outcome: BlockOutcome<T>,
}

/// Completes one block request. Can be sent to another thread.
pub struct LoadCallback<T> {
    sender: Sender<BlockResponse<T>>,
    ticket: BlockTicket,
}

impl<T> fmt::Debug for LoadCallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCallback")
            .field("block", &self.ticket.block)
            .field("version", &self.ticket.version)
            .finish()
    }
}

impl<T> LoadCallback<T> {
    /// Deliver the rows of the block.
    pub fn success(self, params: LoadSuccessParams<T>) {
        self.send(BlockOutcome::Loaded(params));
    }

    /// Report that the block could not be loaded.
    pub fn fail(self) {
        self.send(BlockOutcome::Failed);
    }

    fn send(self, outcome: BlockOutcome<T>) {
        let ticket = self.ticket;
        if self.sender.send(BlockResponse { ticket, outcome }).is_err() {
            tracing::debug!(
                target: targets::SERVER_SIDE,
                block = ticket.block,
                "row model dropped before the block load completed"
            );
        }
    }
}

/// One block request.
#[derive(Debug)]
pub struct ServerSideGetRowsParams<T> {
    pub request: ServerSideGetRowsRequest,
    pub callback: LoadCallback<T>,
}

/// Source of server-side rows.
///
/// `get_rows` must not block. Answer through `params.callback`, now or later.
pub trait ServerSideDatasource<T>: Send + Sync {
    fn get_rows(&self, params: ServerSideGetRowsParams<T>);
}

impl<T, F> ServerSideDatasource<T> for F
where
    F: Fn(ServerSideGetRowsParams<T>) + Send + Sync,
{
    fn get_rows(&self, params: ServerSideGetRowsParams<T>) {
        self(params)
    }
}

/// Load state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockState {
    Loading,
    Loaded,
    Failed,
}

/// Outcome of [`ServerSideRowModel::process_responses`].
#[derive(Debug, Default)]
pub struct ProcessedResponses {
    /// Answers applied; stale answers are dropped and not counted.
    pub applied: usize,
    /// Rows loaded with problems, such as a row id already in use. The rows
    /// are still shown but cannot be looked up by id.
    pub errors: Vec<GridError>,
}

/// Rows of one tree level under one parent.
struct ServerStore {
    level: i32,
    group_keys: Vec<String>,
    version: u64,
    rows: Vec<NodeKey>,
    last_row_known: bool,
    blocks: BTreeMap<usize, BlockState>,
}

/// Row model backed by a [`ServerSideDatasource`].
pub struct ServerSideRowModel<T> {
    options: GridOptions,
    columns: ColumnModel,
    values: ValueService<T>,
    store: NodeStore<T>,
    datasource: Arc<dyn ServerSideDatasource<T>>,
    stores: HashMap<NodeKey, ServerStore>,
    filter_model: FilterModel,
    sort_model: SortModel,
    pivot_result_columns: Vec<PivotResultColumn>,
    agg_funcs: AggFuncRegistry,
    row_id: Option<RowIdGetter<T>>,
    sender: Sender<BlockResponse<T>>,
    receiver: Receiver<BlockResponse<T>>,
    next_version: u64,
    rows_to_display: Vec<NodeKey>,
    signals: RowModelSignals,
}

impl<T: RowData> ServerSideRowModel<T> {
    /// Create the model and request the first block of the root store.
    pub fn new(
        options: GridOptions,
        columns: Vec<ColumnDef>,
        datasource: Arc<dyn ServerSideDatasource<T>>,
    ) -> Result<Self> {
        if options.server_side_block_size == 0 {
            return Err(GridError::config("serverSideBlockSize must be at least 1"));
        }
        let columns = ColumnModel::new(columns)?;
        let (sender, receiver) = unbounded();
        let mut model = Self {
            options,
            columns,
            values: ValueService::new(),
            store: NodeStore::new(),
            datasource,
            stores: HashMap::new(),
            filter_model: FilterModel::new(),
            sort_model: SortModel::new(),
            pivot_result_columns: Vec::new(),
            agg_funcs: AggFuncRegistry::new(),
            row_id: None,
            sender,
            receiver,
            next_version: 0,
            rows_to_display: Vec::new(),
            signals: RowModelSignals::new(),
        };

        let root = model.store.root();
        let requests: Vec<_> = model.open_store(root, 0, Vec::new()).into_iter().collect();
        model.refresh_display();
        model.issue(requests);
        Ok(model)
    }

    /// Derive row ids from loaded data instead of generating them.
    pub fn with_row_id<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.row_id = Some(Arc::new(f));
        self
    }

    pub fn with_value_getter<F>(mut self, col_id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T) -> CellValue + Send + Sync + 'static,
    {
        self.values.set_getter(col_id, Arc::new(f));
        self
    }

    pub fn with_agg_func<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[CellValue]) -> CellValue + Send + Sync + 'static,
    {
        self.agg_funcs.register(name, f);
        self
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Apply every queued datasource answer.
    pub fn process_responses(&mut self) -> ProcessedResponses {
        let mut processed = ProcessedResponses::default();
        let mut requests = Vec::new();
        while let Ok(response) = self.receiver.try_recv() {
            if self.apply_response(response, &mut requests, &mut processed.errors) {
                processed.applied += 1;
            }
        }
        if processed.applied > 0 {
            self.refresh_display();
        }
        self.issue(requests);
        processed
    }

    /// Request the blocks behind any stub rows in the display range
    /// `start..=end`. Returns the number of requests issued.
    pub fn ensure_range_loaded(&mut self, start: usize, end: usize) -> usize {
        let block_size = self.options.server_side_block_size;
        let end = end.min(self.rows_to_display.len().saturating_sub(1));
        let mut wanted: Vec<(NodeKey, usize)> = Vec::new();
        for &key in self.rows_to_display.get(start..=end).unwrap_or_default() {
            let Some(node) = self.store.get(key) else {
                continue;
            };
            if !node.stub || node.failed_load {
                continue;
            }
            let (Some(parent), Some(index)) = (node.parent, node.child_index) else {
                continue;
            };
            let block = index / block_size;
            let pending = self
                .stores
                .get(&parent)
                .is_some_and(|s| s.blocks.contains_key(&block));
            if !pending && !wanted.contains(&(parent, block)) {
                wanted.push((parent, block));
            }
        }

        let requests: Vec<_> = wanted
            .into_iter()
            .filter_map(|(store, block)| self.load_block(store, block))
            .collect();
        let issued = requests.len();
        self.issue(requests);
        issued
    }

    /// Request every failed block again.
    pub fn retry_failed_loads(&mut self) -> usize {
        let block_size = self.options.server_side_block_size;
        let failed: Vec<(NodeKey, usize)> = self
            .stores
            .iter()
            .flat_map(|(key, store)| {
                store
                    .blocks
                    .iter()
                    .filter(|(_, state)| **state == BlockState::Failed)
                    .map(move |(block, _)| (*key, *block))
            })
            .collect();

        let mut requests = Vec::new();
        for (store_key, block) in failed {
            let stubs: Vec<NodeKey> = self
                .stores
                .get(&store_key)
                .map(|s| s.rows.iter().skip(block * block_size).take(block_size).copied().collect())
                .unwrap_or_default();
            for stub in stubs {
                if let Some(node) = self.store.get_mut(stub) {
                    node.failed_load = false;
                }
            }
            requests.extend(self.load_block(store_key, block));
        }
        let issued = requests.len();
        self.issue(requests);
        issued
    }

    /// Purge and reload the store at `route` (empty for the root store).
    /// Returns `false` when no store is open at that route.
    pub fn refresh_store(&mut self, route: &[String]) -> bool {
        let Some(store_key) = self
            .stores
            .iter()
            .find(|(_, store)| store.group_keys == route)
            .map(|(key, _)| *key)
        else {
            return false;
        };
        let requests = self.purge_store(store_key);
        self.refresh_display();
        self.issue(requests);
        true
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Filters are evaluated by the server. Invalid ones are reported and
    /// left out of the requests.
    pub fn set_filter_model(&mut self, mut model: FilterModel) -> Vec<GridError> {
        let mut issues = Vec::new();
        let invalid: Vec<(String, String)> = model
            .iter()
            .filter_map(|(col_id, filter)| filter.validate().err().map(|r| (col_id.clone(), r)))
            .collect();
        for (col_id, reason) in invalid {
            tracing::warn!(target: targets::FILTER, %col_id, %reason, "ignoring invalid filter");
            model.remove(&col_id);
            issues.push(GridError::invalid_filter(col_id, reason));
        }
        self.filter_model = model;
        self.reload();
        issues
    }

    pub fn set_sort_model(&mut self, model: SortModel) {
        self.sort_model = model;
        self.reload();
    }

    pub fn set_row_group_columns(&mut self, col_ids: &[String]) -> Result<()> {
        self.columns.set_row_group_columns(col_ids)?;
        self.reload();
        Ok(())
    }

    pub fn set_pivot_mode(&mut self, pivot_mode: bool) {
        if self.options.pivot_mode != pivot_mode {
            self.options.pivot_mode = pivot_mode;
            self.reload();
        }
    }

    pub fn set_pivot_columns(&mut self, col_ids: &[String]) -> Result<()> {
        self.columns.set_pivot_columns(col_ids)?;
        self.reload();
        Ok(())
    }

    /// Install the pivot result columns the server produced.
    pub fn set_pivot_result_columns(&mut self, columns: Vec<PivotResultColumn>) {
        if columns == self.pivot_result_columns {
            return;
        }
        self.pivot_result_columns = columns;
        self.signals
            .pivot_columns_changed
            .emit(self.pivot_result_columns.clone());
    }

    /// Expand or collapse a server group. Expanding opens its child store.
    pub fn set_expanded(&mut self, key: NodeKey, expanded: bool) -> bool {
        if !self.store.get(key).is_some_and(|n| n.is_expandable()) {
            return false;
        }
        if !self.store.set_expanded(key, expanded) {
            return false;
        }
        let requests: Vec<_> = if expanded {
            self.open_group(key).into_iter().collect()
        } else {
            Vec::new()
        };
        self.refresh_display();
        self.issue(requests);
        true
    }

    pub fn set_selected(&mut self, key: NodeKey, selected: bool) -> bool {
        if self.store.get(key).is_none_or(|n| n.stub || !n.selectable) {
            return false;
        }
        self.store.set_selected(key, Some(selected))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn row_count(&self) -> usize {
        self.rows_to_display.len()
    }

    pub fn row_at(&self, index: usize) -> Option<NodeKey> {
        self.rows_to_display.get(index).copied()
    }

    pub fn node(&self, key: NodeKey) -> Option<&RowNode<T>> {
        self.store.get(key)
    }

    /// Look up a loaded row by id.
    pub fn get_row_node(&self, id: &str) -> Option<NodeKey> {
        self.store.by_id(id)
    }

    pub fn displayed_rows(&self) -> &[NodeKey] {
        &self.rows_to_display
    }

    pub fn root(&self) -> NodeKey {
        self.store.root()
    }

    pub fn store(&self) -> &NodeStore<T> {
        &self.store
    }

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
        &self.filter_model
    }

    pub fn sort_model(&self) -> &SortModel {
        &self.sort_model
    }

    pub fn pivot_result_columns(&self) -> &[PivotResultColumn] {
        &self.pivot_result_columns
    }

    /// State of one block of the store under `parent`.
    pub fn block_state(&self, parent: NodeKey, block: usize) -> Option<BlockState> {
        self.stores.get(&parent)?.blocks.get(&block).copied()
    }

    /// Row count of the store under `parent`, and whether it is final.
    pub fn store_row_count(&self, parent: NodeKey) -> Option<(usize, bool)> {
        self.stores
            .get(&parent)
            .map(|s| (s.rows.len(), s.last_row_known))
    }

    pub fn value(&self, key: NodeKey, col_id: &str) -> CellValue {
        self.values.value(&self.store, &self.columns, key, col_id)
    }

    /// Loaded rows, parents before children. Stubs are skipped.
    pub fn for_each_node(&self, callback: &mut dyn FnMut(NodeKey, &RowNode<T>)) {
        self.walk(self.store.root(), callback);
    }

    fn walk(&self, key: NodeKey, callback: &mut dyn FnMut(NodeKey, &RowNode<T>)) {
        let Some(node) = self.store.get(key) else {
            return;
        };
        for &child in node.children_after_group.iter() {
            match self.store.get(child) {
                Some(child_node) if !child_node.stub => {
                    callback(child, child_node);
                    self.walk(child, callback);
                }
                _ => {}
            }
        }
    }

    // =========================================================================
    // Stores
    // =========================================================================

    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn id_prefix(&self, parent: NodeKey) -> String {
        match self.store.get(parent) {
            Some(node) if !node.is_root() => format!("{}-", node.id),
            _ => String::new(),
        }
    }

    fn create_stub(&mut self, parent: NodeKey, level: i32, index: usize) -> NodeKey {
        let id = format!("{}stub-{index}", self.id_prefix(parent));
        let mut node = self.store.create_node(id);
        node.stub = true;
        node.parent = Some(parent);
        node.level = level;
        self.store.insert(node)
    }

    /// Create the store under `parent` holding one stub and request its
    /// first block.
    fn open_store(
        &mut self,
        parent: NodeKey,
        level: i32,
        group_keys: Vec<String>,
    ) -> Option<ServerSideGetRowsParams<T>> {
        let version = self.bump_version();
        let stub = self.create_stub(parent, level, 0);
        let store = ServerStore {
            level,
            group_keys,
            version,
            rows: vec![stub],
            last_row_known: false,
            blocks: BTreeMap::new(),
        };
        self.publish_rows(parent, &store.rows);
        self.stores.insert(parent, store);
        self.load_block(parent, 0)
    }

    fn open_group(&mut self, key: NodeKey) -> Option<ServerSideGetRowsParams<T>> {
        if self.stores.contains_key(&key) {
            return None;
        }
        let level = self.store.get(key).filter(|n| n.group)?.level + 1;
        let route = self.store.route(key)?;
        self.open_store(key, level, route)
    }

    /// Drop every row of a store and start it over with a new version.
    fn purge_store(&mut self, store_key: NodeKey) -> Vec<ServerSideGetRowsParams<T>> {
        let Some(mut store) = self.stores.remove(&store_key) else {
            return Vec::new();
        };
        for key in std::mem::take(&mut store.rows) {
            self.destroy_node(key);
        }
        store.blocks.clear();
        store.last_row_known = false;
        store.version = self.bump_version();
        store.rows.push(self.create_stub(store_key, store.level, 0));
        self.publish_rows(store_key, &store.rows);
        self.stores.insert(store_key, store);
        self.load_block(store_key, 0).into_iter().collect()
    }

    fn reload(&mut self) {
        let root = self.store.root();
        let requests = self.purge_store(root);
        self.refresh_display();
        self.issue(requests);
    }

    /// Destroy a row together with any store opened under it.
    fn destroy_node(&mut self, key: NodeKey) {
        if let Some(child_store) = self.stores.remove(&key) {
            for child in child_store.rows {
                self.destroy_node(child);
            }
        }
        self.store.remove(key);
    }

    fn publish_rows(&mut self, parent: NodeKey, rows: &[NodeKey]) {
        let list: ChildList = Arc::from(rows.to_vec());
        if let Some(node) = self.store.get_mut(parent) {
            node.set_all_child_views(Arc::clone(&list));
        }
        self.store.set_children_after_sort(parent, list);
    }

    fn load_block(&mut self, store_key: NodeKey, block: usize) -> Option<ServerSideGetRowsParams<T>> {
        let block_size = self.options.server_side_block_size;
        let describe = |ids: &[String], columns: &ColumnModel| -> Vec<ColumnDescriptor> {
            ids.iter()
                .filter_map(|id| columns.get(id))
                .map(ColumnDescriptor::from)
                .collect()
        };
        let store = self.stores.get_mut(&store_key)?;
        store.blocks.insert(block, BlockState::Loading);

        let request = ServerSideGetRowsRequest {
            start_row: block * block_size,
            end_row: (block + 1) * block_size,
            row_group_cols: describe(self.columns.row_group_columns(), &self.columns),
            value_cols: self.columns.value_columns().map(ColumnDescriptor::from).collect(),
            pivot_cols: describe(self.columns.pivot_columns(), &self.columns),
            pivot_mode: self.options.pivot_mode,
            group_keys: store.group_keys.clone(),
            filter_model: self.filter_model.clone(),
            sort_model: self.sort_model.clone(),
        };
        let ticket = BlockTicket {
            store: store_key,
            block,
            version: store.version,
        };
        Some(ServerSideGetRowsParams {
            request,
            callback: LoadCallback {
                sender: self.sender.clone(),
                ticket,
            },
        })
    }

    fn issue(&self, requests: Vec<ServerSideGetRowsParams<T>>) {
        for params in requests {
            tracing::debug!(
                target: targets::SERVER_SIDE,
                start = params.request.start_row,
                end = params.request.end_row,
                group_keys = ?params.request.group_keys,
                "requesting block"
            );
            self.datasource.get_rows(params);
        }
    }

    fn apply_response(
        &mut self,
        response: BlockResponse<T>,
        requests: &mut Vec<ServerSideGetRowsParams<T>>,
        errors: &mut Vec<GridError>,
    ) -> bool {
        let BlockTicket { store: store_key, block, version } = response.ticket;
        let Some(mut store) = self.stores.remove(&store_key) else {
            tracing::debug!(target: targets::SERVER_SIDE, block, "answer for a closed store ignored");
            return false;
        };
        if store.version != version {
            tracing::debug!(
                target: targets::SERVER_SIDE,
                block,
                version,
                current = store.version,
                "stale block answer ignored"
            );
            self.stores.insert(store_key, store);
            return false;
        }

        let block_size = self.options.server_side_block_size;
        let start = block * block_size;
        match response.outcome {
            BlockOutcome::Failed => {
                tracing::warn!(target: targets::SERVER_SIDE, block, "block load failed");
                store.blocks.insert(block, BlockState::Failed);
                for &key in store.rows.iter().skip(start).take(block_size) {
                    if let Some(node) = self.store.get_mut(key).filter(|n| n.stub) {
                        node.failed_load = true;
                    }
                }
            }
            BlockOutcome::Loaded(params) => {
                let returned = params.row_data.len();
                let (count, known) = match params.row_count {
                    Some(count) => (count, true),
                    None if returned < block_size => (start + returned, true),
                    None if store.last_row_known => (store.rows.len().max(start + returned), true),
                    // One extra stub row past the block so scrolling reaches the next one.
                    None => (store.rows.len().max(start + returned + 1), false),
                };
                self.resize(&mut store, store_key, count);
                store.last_row_known = known;

                for (offset, data) in params.row_data.into_iter().enumerate() {
                    let index = start + offset;
                    if index >= count {
                        break;
                    }
                    // The old row goes first so a reloaded row keeps its id.
                    self.destroy_node(store.rows[index]);
                    let (key, registered) = self.create_row_node(&store, store_key, index, data);
                    store.rows[index] = key;
                    if !registered {
                        let id = self.store.get(key).map(|n| n.id.clone()).unwrap_or_default();
                        tracing::warn!(target: targets::SERVER_SIDE, %id, "duplicate row id from server");
                        errors.push(GridError::DuplicateRowId { id });
                    }
                    if self.store.get(key).is_some_and(|n| n.group && n.expanded) {
                        requests.extend(self.open_group(key));
                    }
                }
                store.blocks.insert(block, BlockState::Loaded);
                tracing::debug!(
                    target: targets::SERVER_SIDE,
                    block,
                    returned,
                    row_count = count,
                    last_row_known = known,
                    "block loaded"
                );
            }
        }
        self.publish_rows(store_key, &store.rows);
        self.stores.insert(store_key, store);
        true
    }

    fn resize(&mut self, store: &mut ServerStore, store_key: NodeKey, count: usize) {
        if count < store.rows.len() {
            for key in store.rows.split_off(count) {
                self.destroy_node(key);
            }
            let block_size = self.options.server_side_block_size;
            store.blocks.retain(|block, _| block * block_size < count);
        }
        while store.rows.len() < count {
            let stub = self.create_stub(store_key, store.level, store.rows.len());
            store.rows.push(stub);
        }
    }

    /// Build a loaded row. The flag is `false` when the id was already taken
    /// and the row was left out of the id index.
    fn create_row_node(
        &mut self,
        store: &ServerStore,
        parent: NodeKey,
        index: usize,
        data: T,
    ) -> (NodeKey, bool) {
        let prefix = self.id_prefix(parent);
        let id = match &self.row_id {
            Some(getter) => getter(&data),
            None => format!("{prefix}{index}"),
        };
        let register = !self.store.is_id_taken(&id);

        let level = store.level;
        let group_col = usize::try_from(level)
            .ok()
            .and_then(|l| self.columns.row_group_columns().get(l))
            .cloned();
        let group_depth = self.columns.row_group_columns().len();

        let mut node = self.store.create_node(id.clone());
        node.parent = Some(parent);
        node.level = level;
        if let Some(col_id) = group_col {
            let value = self.values.data_value(&self.columns, &data, &col_id);
            node.group = true;
            node.key = Some(value.key_string());
            node.field = self.columns.get(&col_id).map(|c| c.data_field().to_string());
            node.row_group_index = usize::try_from(level).ok();
            node.leaf_group = usize::try_from(level).is_ok_and(|l| l + 1 == group_depth);
            node.expanded = self.options.is_expanded_by_default(level);
            node.group_data.insert(col_id.clone(), value);
            node.row_group_column = Some(col_id);
        }
        node.data = Some(Arc::new(data));

        let key = self.store.insert(node);
        if register {
            self.store.register_id(id, key);
        }
        (key, register)
    }

    fn refresh_display(&mut self) {
        let params = FlattenParams {
            include_footers: false,
            total_footer: false,
            hide_leaves: false,
            root_only: false,
            ..FlattenParams::new(&self.options, true)
        };
        let previous = std::mem::take(&mut self.rows_to_display);
        self.rows_to_display = flatten(&mut self.store, &params, &previous);
        self.signals.model_updated.emit(ModelUpdated {
            stage: RefreshStage::Map,
            row_count: self.rows_to_display.len(),
        });
    }
}

impl<T: RowData> RowModel<T> for ServerSideRowModel<T> {
    fn kind(&self) -> RowModelKind {
        RowModelKind::ServerSide
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

    fn columns(&self) -> &ColumnModel {
        Self::columns(self)
    }

    fn value(&self, key: NodeKey, col_id: &str) -> CellValue {
        Self::value(self, key, col_id)
    }

    fn agg_funcs(&self) -> &AggFuncRegistry {
        &self.agg_funcs
    }

    fn pivot_result_columns(&self) -> &[PivotResultColumn] {
        Self::pivot_result_columns(self)
    }

    fn is_pivot_mode(&self) -> bool {
        self.options.pivot_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::SortModelItem;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    type Pending = Arc<Mutex<Vec<ServerSideGetRowsParams<Value>>>>;

    fn deferred() -> (Arc<dyn ServerSideDatasource<Value>>, Pending) {
        let pending: Pending = Arc::new(Mutex::new(Vec::new()));
        let p = pending.clone();
        let datasource: Arc<dyn ServerSideDatasource<Value>> =
            Arc::new(move |params: ServerSideGetRowsParams<Value>| p.lock().push(params));
        (datasource, pending)
    }

    fn take(pending: &Pending) -> ServerSideGetRowsParams<Value> {
        pending.lock().remove(0)
    }

    fn options(block_size: usize) -> GridOptions {
        GridOptions {
            server_side_block_size: block_size,
            ..Default::default()
        }
    }

    fn ids(model: &ServerSideRowModel<Value>) -> Vec<String> {
        model
            .displayed_rows()
            .iter()
            .map(|k| model.node(*k).unwrap().id.clone())
            .collect()
    }

    #[test]
    fn test_blocks_and_row_count() {
        let (datasource, pending) = deferred();
        let mut model =
            ServerSideRowModel::new(options(2), vec![ColumnDef::new("a")], datasource).unwrap();
        assert_eq!(ids(&model), ["stub-0"]);
        assert!(model.node(model.row_at(0).unwrap()).unwrap().stub);

        let first = take(&pending);
        assert_eq!((first.request.start_row, first.request.end_row), (0, 2));
        first.callback.success(LoadSuccessParams::new(vec![json!({"a": 1}), json!({"a": 2})]));
        assert_eq!(model.process_responses().applied, 1);
        // full block: one more stub while the end is unknown
        assert_eq!(ids(&model), ["0", "1", "stub-2"]);
        assert_eq!(model.store_row_count(model.root()), Some((3, false)));

        assert_eq!(model.ensure_range_loaded(0, 10), 1);
        assert_eq!(model.ensure_range_loaded(0, 10), 0);
        let second = take(&pending);
        assert_eq!(second.request.start_row, 2);
        second.callback.success(LoadSuccessParams::new(vec![json!({"a": 3})]));
        model.process_responses();
        assert_eq!(ids(&model), ["0", "1", "2"]);
        assert_eq!(model.store_row_count(model.root()), Some((3, true)));
        assert_eq!(model.value(model.row_at(2).unwrap(), "a"), CellValue::Int(3));
    }

    #[test]
    fn test_explicit_row_count() {
        let (datasource, pending) = deferred();
        let mut model =
            ServerSideRowModel::new(options(2), vec![ColumnDef::new("a")], datasource).unwrap();
        take(&pending).callback.success(
            LoadSuccessParams::new(vec![json!({"a": 1}), json!({"a": 2})]).with_row_count(5),
        );
        model.process_responses();
        assert_eq!(model.row_count(), 5);
        assert!(model.node(model.row_at(4).unwrap()).unwrap().stub);
    }

    #[test]
    fn test_stale_answer_ignored() {
        let (datasource, pending) = deferred();
        let mut model =
            ServerSideRowModel::new(options(10), vec![ColumnDef::new("a")], datasource).unwrap();
        let stale = take(&pending);

        model.set_sort_model(vec![SortModelItem::desc("a")]);
        let fresh = take(&pending);
        assert_eq!(fresh.request.sort_model, vec![SortModelItem::desc("a")]);

        stale.callback.success(LoadSuccessParams::new(vec![json!({"a": 1})]));
        assert_eq!(model.process_responses().applied, 0);
        assert_eq!(ids(&model), ["stub-0"]);

        fresh.callback.success(LoadSuccessParams::new(vec![json!({"a": 2})]));
        assert_eq!(model.process_responses().applied, 1);
        assert_eq!(model.value(model.row_at(0).unwrap(), "a"), CellValue::Int(2));
    }

    #[test]
    fn test_duplicate_server_row_id_reported() {
        let (datasource, pending) = deferred();
        let mut model = ServerSideRowModel::new(options(10), vec![ColumnDef::new("a")], datasource)
            .unwrap()
            .with_row_id(|row: &Value| row["id"].as_str().unwrap_or_default().to_string());
        take(&pending).callback.success(LoadSuccessParams::new(vec![
            json!({"id": "x", "a": 1}),
            json!({"id": "x", "a": 2}),
        ]));

        let processed = model.process_responses();
        assert_eq!(processed.applied, 1);
        assert_eq!(processed.errors.len(), 1);
        assert!(matches!(&processed.errors[0], GridError::DuplicateRowId { id } if id == "x"));
        // both rows are shown, the first one owns the id
        assert_eq!(model.row_count(), 2);
        assert_eq!(model.get_row_node("x"), model.row_at(0));

        // reloading the same rows does not report the first one again
        assert!(model.refresh_store(&[]));
        take(&pending).callback.success(LoadSuccessParams::new(vec![json!({"id": "x", "a": 1})]));
        assert!(model.process_responses().errors.is_empty());
    }

    #[test]
    fn test_failed_block() {
        let (datasource, pending) = deferred();
        let mut model =
            ServerSideRowModel::new(options(10), vec![ColumnDef::new("a")], datasource).unwrap();
        take(&pending).callback.fail();
        model.process_responses();

        let root = model.root();
        assert_eq!(model.block_state(root, 0), Some(BlockState::Failed));
        assert!(model.node(model.row_at(0).unwrap()).unwrap().failed_load);
        assert_eq!(model.ensure_range_loaded(0, 0), 0);

        assert_eq!(model.retry_failed_loads(), 1);
        assert_eq!(model.block_state(root, 0), Some(BlockState::Loading));
    }

    #[test]
    fn test_expand_server_group() {
        let (datasource, pending) = deferred();
        let columns = vec![ColumnDef::new("country").row_group(), ColumnDef::new("gold").agg("sum")];
        let mut model = ServerSideRowModel::new(options(10), columns, datasource).unwrap();

        let first = take(&pending);
        assert_eq!(first.request.row_group_cols[0].id, "country");
        assert_eq!(first.request.value_cols[0].agg_func.as_deref(), Some("sum"));
        first.callback.success(LoadSuccessParams::new(vec![
            json!({"country": "US", "gold": 3}),
            json!({"country": "UK", "gold": 2}),
        ]));
        model.process_responses();

        let us = model.row_at(0).unwrap();
        assert!(model.node(us).unwrap().group);
        assert_eq!(model.value(us, "gold"), CellValue::Int(3));

        assert!(model.set_expanded(us, true));
        let child = take(&pending);
        assert_eq!(child.request.group_keys, ["US"]);
        child
            .callback
            .success(LoadSuccessParams::new(vec![json!({"country": "US", "athlete": "a"})]));
        model.process_responses();
        assert_eq!(ids(&model), ["0", "0-0", "1"]);
        assert!(model.refresh_store(&["US".to_string()]));
        assert!(!model.refresh_store(&["FR".to_string()]));
    }

    #[test]
    fn test_request_serde() {
        let (datasource, pending) = deferred();
        let _model =
            ServerSideRowModel::new(options(10), vec![ColumnDef::new("a")], datasource).unwrap();
        let json = serde_json::to_value(&take(&pending).request).unwrap();
        assert_eq!(json["startRow"], 0);
        assert_eq!(json["endRow"], 10);
        assert_eq!(json["groupKeys"], json!([]));
    }
}
