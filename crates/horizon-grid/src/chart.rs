//! Chart datasource.
//!
//! A read-only projection of a row model into chart rows. Rows come either
//! from a display range or, when cross filtering, from every node with the
//! filtered set tracked alongside. With grouping, dimension values become
//! [`CategoryLabel`]s built from the ancestor keys, and the rows of expanded
//! groups are split off into `group_chart_data`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use horizon_grid_core::logging::{PerfSpan, span_names, targets};

use crate::aggregation::aggregate_values;
use crate::pivot::PivotResultColumn;
use crate::row_model::{RowModel, RowModelKind};
use crate::row_node::{NodeKey, RowNode};
use crate::value::{CellValue, RowData};

/// Category column added when a dimension column does not exist.
pub const DEFAULT_CATEGORY: &str = "AG-GRID-DEFAULT-CATEGORY";

/// Suffix of the companion column holding cross-filtered values.
pub const CROSS_FILTER_SUFFIX: &str = "-filtered-out";

/// Id of the auto group column: group rows show their key, leaves nothing.
pub const AUTO_GROUP_COLUMN: &str = "ag-Grid-AutoColumn";

/// What to extract.
#[derive(Debug, Clone, Default)]
pub struct ChartDataParams {
    pub dimension_cols: Vec<String>,
    pub value_cols: Vec<String>,
    pub grouping: bool,
    pub pivoting: bool,
    pub cross_filtering: bool,
    /// Value of filtered-out rows. `None` leaves the companion column unset.
    pub cross_filtering_zero_value: Option<CellValue>,
    pub cross_filtering_is_highlight: bool,
    /// Cross filtering: chart only rows passing the filters.
    pub show_filtered_data_only: bool,
    pub start_row: usize,
    /// Last display row, inclusive. `None` runs to the last row.
    pub end_row: Option<usize>,
    /// Aggregate rows sharing the same dimension values.
    pub agg_func: Option<String>,
}

/// Multi-level category of a grouped chart row.
///
/// `labels` runs from the row's own value up through its ancestors' keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryLabel {
    pub labels: Vec<String>,
    pub id: usize,
}

impl fmt::Display for CategoryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for label in self.labels.iter().rev().filter(|l| !l.is_empty()) {
            if !first {
                f.write_str(" - ")?;
            }
            f.write_str(label)?;
            first = false;
        }
        Ok(())
    }
}

/// A field of a chart row.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartValue {
    Value(CellValue),
    Category(CategoryLabel),
}

impl ChartValue {
    pub fn as_cell(&self) -> Option<&CellValue> {
        match self {
            ChartValue::Value(value) => Some(value),
            ChartValue::Category(_) => None,
        }
    }
}

impl fmt::Display for ChartValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartValue::Value(value) => fmt::Display::fmt(value, f),
            ChartValue::Category(label) => fmt::Display::fmt(label, f),
        }
    }
}

impl From<CellValue> for ChartValue {
    fn from(value: CellValue) -> Self {
        ChartValue::Value(value)
    }
}

/// One chart row keyed by column id.
pub type ChartRow = BTreeMap<String, ChartValue>;

/// Result of [`ChartDatasource::get_data`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartData {
    pub chart_data: Vec<ChartRow>,
    /// Legend names per value column: pivot keys, then the header.
    pub col_names: BTreeMap<String, Vec<String>>,
    /// Rows of expanded groups, when grouping.
    pub group_chart_data: Option<Vec<ChartRow>>,
}

/// Extracts chart data from a row model.
pub struct ChartDatasource<'a, T> {
    model: &'a dyn RowModel<T>,
}

impl<'a, T: RowData> ChartDatasource<'a, T> {
    pub fn new<M: RowModel<T>>(model: &'a M) -> Self {
        Self { model }
    }

    pub fn get_data(&self, params: &ChartDataParams) -> ChartData {
        let _perf = PerfSpan::new(span_names::CHART);

        if params.cross_filtering {
            if params.grouping {
                tracing::warn!(target: targets::CHART, "cross filtering with grouping is not supported");
                return ChartData::default();
            }
            if self.model.kind() != RowModelKind::ClientSide {
                tracing::warn!(
                    target: targets::CHART,
                    "cross filtering requires the client-side row model"
                );
                return ChartData::default();
            }
        }

        let pivot_keys = self.pivot_keys(params);
        let mut result = self.extract_rows(params, &pivot_keys);
        result.chart_data = self.aggregate_rows_by_dimension(params, result.chart_data);
        tracing::debug!(
            target: targets::CHART,
            rows = result.chart_data.len(),
            "chart data extracted"
        );
        result
    }

    /// Pivot keys per pivot result column. Server supplied columns have
    /// their keys recovered from the column ids.
    fn pivot_keys(&self, params: &ChartDataParams) -> HashMap<String, Vec<String>> {
        let columns = self.model.pivot_result_columns();
        if self.model.kind() == RowModelKind::ServerSide && params.pivoting {
            let separator = extract_pivot_key_separator(columns);
            return columns
                .iter()
                .map(|column| {
                    let keys = if separator.is_empty() {
                        Vec::new()
                    } else {
                        let mut parts: Vec<String> =
                            column.col_id.split(separator.as_str()).map(str::to_string).collect();
                        parts.pop();
                        parts
                    };
                    (column.col_id.clone(), keys)
                })
                .collect();
        }
        columns
            .iter()
            .map(|column| (column.col_id.clone(), column.pivot_keys.clone()))
            .collect()
    }

    fn col_names(&self, col_id: &str, pivot_keys: &HashMap<String, Vec<String>>) -> Vec<String> {
        let mut names = match pivot_keys.get(col_id) {
            Some(keys) => keys.clone(),
            None => self
                .model
                .columns()
                .get(col_id)
                .map(|c| c.pivot_keys.clone())
                .unwrap_or_default(),
        };
        let header = match self.model.columns().get(col_id) {
            Some(column) => column.header_name.clone(),
            None => self
                .model
                .pivot_result_columns()
                .iter()
                .find(|c| c.col_id == col_id)
                .map(|c| c.header_name.clone())
                .filter(|h| !h.is_empty()),
        };
        names.extend(header);
        names
    }

    fn extract_rows(&self, params: &ChartDataParams, pivot_keys: &HashMap<String, Vec<String>>) -> ChartData {
        let mut filtered: HashSet<NodeKey> = HashSet::new();
        let rows: Vec<NodeKey> = if params.cross_filtering {
            let mut passing = Vec::new();
            self.model
                .for_each_node_after_filter_and_sort(&mut |key, _| passing.push(key));
            filtered.extend(passing.iter().copied());
            if params.show_filtered_data_only {
                passing.sort_by_key(|key| self.model.node(*key).and_then(|n| n.row_index).unwrap_or(0));
                passing
            } else {
                let mut all = Vec::new();
                self.model.for_each_node(&mut |key, _| all.push(key));
                self.model.sort_nodes(all)
            }
        } else {
            self.display_range(params)
        };

        let mut col_names = BTreeMap::new();
        if !rows.is_empty() {
            for col_id in &params.value_cols {
                let names = self.col_names(col_id, pivot_keys);
                if !names.is_empty() {
                    col_names.insert(col_id.clone(), names);
                }
            }
        }

        let mut extracted: Vec<ChartRow> = Vec::new();
        let mut group_indexes: HashMap<Vec<String>, usize> = HashMap::new();
        let mut groups_to_remove: HashMap<Vec<String>, Option<usize>> = HashMap::new();
        let mut label_id = 0;

        for (i, &key) in rows.iter().enumerate() {
            let Some(node) = self.model.node(key) else {
                continue;
            };
            if node.footer || node.detail {
                continue;
            }
            let position = extracted.len();
            let mut row = ChartRow::new();

            for col_id in &params.dimension_cols {
                if !self.is_known_column(col_id) {
                    row.insert(DEFAULT_CATEGORY.to_string(), CellValue::from(i + 1).into());
                    continue;
                }
                let value = self.dimension_value(key, node, col_id);
                if !params.grouping {
                    row.insert(col_id.clone(), value.into());
                    continue;
                }

                let labels = self.group_labels(node, value.key_string());
                if node.group {
                    group_indexes.insert(labels.clone(), position);
                }
                let parent_labels = &labels[1..];
                if parent_labels.iter().any(|l| !l.is_empty()) {
                    groups_to_remove.insert(
                        parent_labels.to_vec(),
                        group_indexes.get(parent_labels).copied(),
                    );
                }
                row.insert(
                    col_id.clone(),
                    ChartValue::Category(CategoryLabel { labels, id: label_id }),
                );
                label_id += 1;
            }

            for col_id in &params.value_cols {
                let value = self.model.value(key, col_id);
                if !params.cross_filtering {
                    row.insert(col_id.clone(), value.into());
                    continue;
                }
                let filtered_out_id = format!("{col_id}{CROSS_FILTER_SUFFIX}");
                let companion = if params.cross_filtering_is_highlight || filtered.contains(&key) {
                    Some(value.clone())
                } else {
                    params.cross_filtering_zero_value.clone()
                };
                if let Some(companion) = companion {
                    row.insert(filtered_out_id, companion.into());
                }
                let value = if value.is_null() { CellValue::Int(0) } else { value };
                row.insert(col_id.clone(), value.into());
            }

            extracted.push(row);
        }

        let group_chart_data = params.grouping.then(|| {
            let remove: HashSet<usize> = groups_to_remove.values().flatten().copied().collect();
            let all = std::mem::take(&mut extracted);
            let mut groups = Vec::new();
            for (index, row) in all.into_iter().enumerate() {
                if remove.contains(&index) {
                    groups.push(row);
                } else {
                    extracted.push(row);
                }
            }
            groups
        });

        ChartData {
            chart_data: extracted,
            col_names,
            group_chart_data,
        }
    }

    /// Display rows in the requested range. A range with no columns is empty.
    fn display_range(&self, params: &ChartDataParams) -> Vec<NodeKey> {
        let no_range = params.start_row == 0
            && params.end_row == Some(0)
            && params.dimension_cols.is_empty()
            && params.value_cols.is_empty();
        let row_count = self.model.row_count();
        if no_range || row_count == 0 {
            return Vec::new();
        }
        let last = params.end_row.map_or(row_count - 1, |end| end.min(row_count - 1));
        (params.start_row..=last)
            .filter_map(|index| self.model.row_at(index))
            .collect()
    }

    fn is_known_column(&self, col_id: &str) -> bool {
        col_id == AUTO_GROUP_COLUMN || self.model.columns().contains(col_id)
    }

    fn dimension_value(&self, key: NodeKey, node: &RowNode<T>, col_id: &str) -> CellValue {
        if col_id != AUTO_GROUP_COLUMN {
            return self.model.value(key, col_id);
        }
        match &node.key {
            Some(group_key) if node.group => CellValue::String(group_key.clone()),
            _ => CellValue::Null,
        }
    }

    /// The row's own label followed by the keys of its ancestors.
    fn group_labels(&self, node: &RowNode<T>, own: String) -> Vec<String> {
        let mut labels = vec![own];
        let mut current = node;
        while current.level > 0 {
            let Some(parent) = current.parent.and_then(|p| self.model.node(p)) else {
                break;
            };
            labels.push(parent.key.clone().unwrap_or_default());
            current = parent;
        }
        labels
    }

    /// Merge rows with equal dimension values and aggregate their value
    /// columns with `params.agg_func`.
    pub fn aggregate_rows_by_dimension(&self, params: &ChartDataParams, rows: Vec<ChartRow>) -> Vec<ChartRow> {
        let Some(func_name) = &params.agg_func else {
            return rows;
        };
        if params.dimension_cols.is_empty() {
            return rows;
        }
        let Some(func) = self.model.agg_funcs().resolve(func_name) else {
            tracing::warn!(target: targets::CHART, func = %func_name, "unknown chart aggregation function");
            return rows;
        };

        let mut index: HashMap<Vec<String>, usize> = HashMap::new();
        let mut groups: Vec<(ChartRow, Vec<ChartRow>)> = Vec::new();
        for row in rows {
            let dims: Vec<String> = params
                .dimension_cols
                .iter()
                .map(|col_id| row.get(col_id).map(ToString::to_string).unwrap_or_default())
                .collect();
            let slot = *index.entry(dims).or_insert_with(|| {
                let head = params
                    .dimension_cols
                    .iter()
                    .filter_map(|col_id| Some((col_id.clone(), row.get(col_id)?.clone())))
                    .collect();
                groups.push((head, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(row);
        }

        let mut value_ids: Vec<String> = params.value_cols.clone();
        if params.cross_filtering {
            value_ids.extend(
                params
                    .value_cols
                    .iter()
                    .map(|col_id| format!("{col_id}{CROSS_FILTER_SUFFIX}")),
            );
        }

        groups
            .into_iter()
            .map(|(mut head, children)| {
                for col_id in &value_ids {
                    let values: Vec<CellValue> = children
                        .iter()
                        .filter_map(|child| child.get(col_id).and_then(ChartValue::as_cell).cloned())
                        .collect();
                    head.insert(col_id.clone(), aggregate_values(&values, &func).into());
                }
                head
            })
            .collect()
    }
}

/// Infer the pivot key separator from the first column's group ids.
///
/// The outermost group id is a prefix of the next id down; the character
/// following it is the separator. Columns without groups yield `""`.
pub fn extract_pivot_key_separator(columns: &[PivotResultColumn]) -> String {
    let Some(first) = columns.first() else {
        return String::new();
    };
    let Some(top) = first.parent_group_ids.last() else {
        return String::new();
    };
    let child = match first.parent_group_ids.len() {
        1 => first.col_id.as_str(),
        n => first.parent_group_ids[n - 2].as_str(),
    };
    child
        .strip_prefix(top.as_str())
        .and_then(|rest| rest.chars().next())
        .map(String::from)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(keys: &[&str], sep: &str) -> PivotResultColumn {
        PivotResultColumn::new(
            keys.iter().map(|k| k.to_string()).collect(),
            "gold",
            "Gold",
            Some("sum".into()),
            sep,
        )
    }

    #[test]
    fn test_category_label_display() {
        let label = CategoryLabel {
            labels: vec!["".into(), "Swimming".into(), "US".into()],
            id: 0,
        };
        assert_eq!(label.to_string(), "US - Swimming");
    }

    #[test]
    fn test_extract_separator() {
        assert_eq!(extract_pivot_key_separator(&[column(&["2000", "Swimming"], "|")]), "|");
        assert_eq!(extract_pivot_key_separator(&[column(&["2000"], "_")]), "_");
        assert_eq!(extract_pivot_key_separator(&[]), "");

        let mut ungrouped = column(&["2000"], "_");
        ungrouped.parent_group_ids.clear();
        assert_eq!(extract_pivot_key_separator(&[ungrouped]), "");
    }
}
