//! Export projection.
//!
//! Produces headers and cell values for the displayed rows of a row model.
//! Footers and detail rows are never exported. Formatting the table as CSV
//! or a spreadsheet is left to the caller.

use serde::Serialize;

use crate::row_model::RowModel;
use crate::value::{CellValue, RowData};

/// What to export.
#[derive(Debug, Clone, Default)]
pub struct ExportParams {
    /// Column ids in output order. Defaults to every column, or in pivot
    /// mode to the row group columns followed by the pivot result columns.
    pub columns: Option<Vec<String>>,
    pub only_selected: bool,
    pub skip_group_rows: bool,
}

/// One exported row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub id: String,
    /// Display depth, for outline-style output.
    pub level: i32,
    pub group: bool,
    pub values: Vec<CellValue>,
}

/// Exported table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportTable {
    pub col_ids: Vec<String>,
    pub headers: Vec<String>,
    pub rows: Vec<ExportRow>,
}

/// Project the displayed rows of `model` into an [`ExportTable`].
pub fn export_rows<T, M>(model: &M, params: &ExportParams) -> ExportTable
where
    T: RowData,
    M: RowModel<T> + ?Sized,
{
    let col_ids = params.columns.clone().unwrap_or_else(|| default_columns(model));
    let headers = col_ids.iter().map(|col_id| header(model, col_id)).collect();

    let mut rows = Vec::new();
    for index in 0..model.row_count() {
        let Some(key) = model.row_at(index) else {
            continue;
        };
        let Some(node) = model.node(key) else {
            continue;
        };
        if node.footer || node.detail || node.stub || node.is_root() {
            continue;
        }
        if params.skip_group_rows && node.group {
            continue;
        }
        if params.only_selected && node.selected != Some(true) {
            continue;
        }
        rows.push(ExportRow {
            id: node.id.clone(),
            level: node.ui_level,
            group: node.group,
            values: col_ids.iter().map(|col_id| model.value(key, col_id)).collect(),
        });
    }

    ExportTable {
        col_ids,
        headers,
        rows,
    }
}

fn default_columns<T: RowData, M: RowModel<T> + ?Sized>(model: &M) -> Vec<String> {
    let pivot_columns = model.pivot_result_columns();
    if model.is_pivot_mode() && !pivot_columns.is_empty() {
        return model
            .row_group_columns()
            .iter()
            .cloned()
            .chain(pivot_columns.iter().map(|c| c.col_id.clone()))
            .collect();
    }
    model
        .columns()
        .columns()
        .iter()
        .map(|c| c.col_id.clone())
        .collect()
}

fn header<T: RowData, M: RowModel<T> + ?Sized>(model: &M, col_id: &str) -> String {
    if let Some(column) = model.columns().get(col_id) {
        return column.display_name().to_string();
    }
    match model.pivot_result_columns().iter().find(|c| c.col_id == col_id) {
        Some(column) => {
            let mut parts = column.pivot_keys.clone();
            parts.push(column.header_name.clone());
            parts.join(" ")
        }
        None => col_id.to_string(),
    }
}
