//! Horizon Grid - the row model layer of a data grid.
//!
//! Rows live in an arena of [`RowNode`]s. A pipeline of stages derives the
//! grouped, filtered, pivoted, aggregated and sorted views of that tree and
//! assigns display positions. Two row models drive it:
//!
//! - [`ClientSideRowModel`]: every row in memory, incremental transactions
//! - [`ServerSideRowModel`]: rows loaded in blocks from a datasource
//!
//! Read-only consumers such as the [`chart`] datasource and the [`export`]
//! projection work against the [`RowModel`] trait.
//!
//! # Example
//!
//! ```
//! use horizon_grid::{ClientSideRowModel, ColumnDef, ColumnFilter, FilterModel};
//! use serde_json::json;
//!
//! let mut model = ClientSideRowModel::<serde_json::Value>::builder()
//!     .columns(vec![ColumnDef::new("athlete"), ColumnDef::new("gold")])
//!     .build()
//!     .unwrap();
//! model.set_row_data(vec![
//!     json!({ "athlete": "Phelps", "gold": 8 }),
//!     json!({ "athlete": "Bolt", "gold": 3 }),
//! ]);
//!
//! let filter = FilterModel::new().with("gold", ColumnFilter::GreaterThan { filter: 5.into() });
//! model.set_filter_model(filter);
//! assert_eq!(model.row_count(), 1);
//! ```
//!
//! # Logging
//!
//! Diagnostics go through `tracing` with one target per subsystem, see
//! [`horizon_grid_core::logging::targets`].

pub mod aggregation;
pub mod changed_path;
pub mod chart;
pub mod client_side;
pub mod columns;
pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod export;
pub mod filter;
mod flatten;
pub mod grouping;
pub mod node_manager;
pub mod pivot;
pub mod row_model;
pub mod row_node;
pub mod server_side;
pub mod sort;
pub mod stage;
pub mod store;
pub mod value;
pub mod value_service;

pub use aggregation::{AggFunc, AggFuncRegistry, aggregate_values};
pub use changed_path::ChangedPath;
pub use chart::{CategoryLabel, ChartData, ChartDataParams, ChartDatasource, ChartValue};
pub use client_side::{ClientSideRowModel, ClientSideRowModelBuilder};
pub use columns::{ColumnDef, ColumnModel};
pub use config::{FooterPosition, GridOptions};
pub use error::{GridError, Result};
pub use events::{ModelUpdated, NodeEventBus, RowModelSignals, RowNodeEvent, RowsChanged};
pub use export::{ExportParams, ExportRow, ExportTable, export_rows};
pub use filter::{ColumnFilter, ExternalFilter, FilterModel};
pub use node_manager::{RowTransaction, TransactionResult};
pub use pivot::PivotResultColumn;
pub use row_model::{RowModel, RowModelKind};
pub use row_node::{NodeKey, RowNode};
pub use server_side::{
    LoadCallback, LoadSuccessParams, ProcessedResponses, ServerSideDatasource,
    ServerSideGetRowsParams, ServerSideGetRowsRequest, ServerSideRowModel,
};
pub use sort::{NullsPosition, SortDirection, SortModel, SortModelItem};
pub use stage::RefreshStage;
pub use store::NodeStore;
pub use value::{CellValue, RowData};

pub use horizon_grid_core::{ConnectionId, Signal};
