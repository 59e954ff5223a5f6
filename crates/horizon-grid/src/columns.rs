//! Column definitions and the column model.
//!
//! A [`ColumnDef`] carries the data binding (`field`) and the grouping, pivot
//! and aggregation flags for one column. [`ColumnModel`] keeps them in
//! declaration order and answers the questions the pipeline stages ask:
//! which columns group rows, which ones pivot, which ones aggregate.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};

/// Definition of a single grid column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnDef {
    /// Unique column id. Defaults to `field` when empty.
    pub col_id: String,
    /// Field read from row data.
    pub field: Option<String>,
    /// Display name used by chart and export projections.
    pub header_name: Option<String>,
    /// Whether rows are grouped by this column.
    pub row_group: bool,
    /// Explicit position among the row group columns.
    pub row_group_index: Option<usize>,
    /// Whether this column contributes pivot keys.
    pub pivot: bool,
    /// Explicit position among the pivot columns.
    pub pivot_index: Option<usize>,
    /// Aggregation function name (`sum`, `avg`, ... or a registered name).
    pub agg_func: Option<String>,
    /// Pivot keys of a generated or server-supplied pivot result column.
    pub pivot_keys: Vec<String>,
}

impl ColumnDef {
    /// Create a column bound to `field`, using the field as its id.
    pub fn new(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            col_id: field.clone(),
            field: Some(field),
            ..Default::default()
        }
    }

    /// Set the header name.
    pub fn header(mut self, name: impl Into<String>) -> Self {
        self.header_name = Some(name.into());
        self
    }

    /// Mark as a row group column.
    pub fn row_group(mut self) -> Self {
        self.row_group = true;
        self
    }

    /// Mark as a pivot column.
    pub fn pivot(mut self) -> Self {
        self.pivot = true;
        self
    }

    /// Aggregate this column with the named function.
    pub fn agg(mut self, func: impl Into<String>) -> Self {
        self.agg_func = Some(func.into());
        self
    }

    /// The field to read from row data, falling back to the column id.
    pub fn data_field(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.col_id)
    }

    /// The display name, falling back to the column id.
    pub fn display_name(&self) -> &str {
        self.header_name.as_deref().unwrap_or(&self.col_id)
    }
}

/// Ordered set of column definitions.
#[derive(Debug, Clone, Default)]
pub struct ColumnModel {
    columns: Vec<ColumnDef>,
    index: HashMap<String, usize>,
    row_group_ids: Vec<String>,
    pivot_ids: Vec<String>,
}

impl ColumnModel {
    /// Build a column model, rejecting duplicate ids.
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self> {
        let mut model = Self::default();
        for mut column in columns {
            if column.col_id.is_empty() {
                if let Some(field) = &column.field {
                    column.col_id = field.clone();
                }
            }
            if model.index.contains_key(&column.col_id) {
                return Err(GridError::DuplicateColumn {
                    col_id: column.col_id,
                });
            }
            model.index.insert(column.col_id.clone(), model.columns.len());
            model.columns.push(column);
        }
        model.row_group_ids = model.ordered_ids(|c| c.row_group, |c| c.row_group_index);
        model.pivot_ids = model.ordered_ids(|c| c.pivot, |c| c.pivot_index);
        Ok(model)
    }

    fn ordered_ids(
        &self,
        active: impl Fn(&ColumnDef) -> bool,
        position: impl Fn(&ColumnDef) -> Option<usize>,
    ) -> Vec<String> {
        let mut selected: Vec<(usize, &ColumnDef)> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| active(c))
            .collect();
        // Explicit indexes first, then declaration order.
        selected.sort_by_key(|(decl, c)| (position(c).unwrap_or(usize::MAX), *decl));
        selected.into_iter().map(|(_, c)| c.col_id.clone()).collect()
    }

    /// All columns in declaration order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Look up a column by id.
    pub fn get(&self, col_id: &str) -> Option<&ColumnDef> {
        self.index.get(col_id).map(|&i| &self.columns[i])
    }

    /// Whether a column with this id exists.
    pub fn contains(&self, col_id: &str) -> bool {
        self.index.contains_key(col_id)
    }

    /// Active row group column ids, outermost first.
    pub fn row_group_columns(&self) -> &[String] {
        &self.row_group_ids
    }

    /// Active pivot column ids, outermost first.
    pub fn pivot_columns(&self) -> &[String] {
        &self.pivot_ids
    }

    /// Columns with an aggregation function.
    pub fn value_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.agg_func.is_some())
    }

    /// Replace the row group columns.
    pub fn set_row_group_columns(&mut self, col_ids: &[String]) -> Result<()> {
        self.check_known(col_ids)?;
        let wanted: HashSet<&str> = col_ids.iter().map(String::as_str).collect();
        for column in &mut self.columns {
            column.row_group = wanted.contains(column.col_id.as_str());
            column.row_group_index = col_ids.iter().position(|id| *id == column.col_id);
        }
        self.row_group_ids = col_ids.to_vec();
        Ok(())
    }

    /// Replace the pivot columns.
    pub fn set_pivot_columns(&mut self, col_ids: &[String]) -> Result<()> {
        self.check_known(col_ids)?;
        for column in &mut self.columns {
            column.pivot_index = col_ids.iter().position(|id| *id == column.col_id);
            column.pivot = column.pivot_index.is_some();
        }
        self.pivot_ids = col_ids.to_vec();
        Ok(())
    }

    /// Set or clear the aggregation function of a column.
    pub fn set_agg_func(&mut self, col_id: &str, func: Option<String>) -> Result<()> {
        let index = *self
            .index
            .get(col_id)
            .ok_or_else(|| GridError::UnknownColumn {
                col_id: col_id.to_string(),
            })?;
        self.columns[index].agg_func = func;
        Ok(())
    }

    fn check_known(&self, col_ids: &[String]) -> Result<()> {
        match col_ids.iter().find(|id| !self.contains(id)) {
            Some(unknown) => Err(GridError::UnknownColumn {
                col_id: unknown.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_group_order() {
        let model = ColumnModel::new(vec![
            ColumnDef::new("sport").row_group(),
            ColumnDef {
                row_group_index: Some(0),
                ..ColumnDef::new("country").row_group()
            },
            ColumnDef::new("gold").agg("sum"),
        ])
        .unwrap();

        assert_eq!(model.row_group_columns(), ["country", "sport"]);
        assert_eq!(model.value_columns().count(), 1);
    }

    #[test]
    fn test_duplicate_column() {
        let err = ColumnModel::new(vec![ColumnDef::new("a"), ColumnDef::new("a")]).unwrap_err();
        assert!(matches!(err, GridError::DuplicateColumn { col_id } if col_id == "a"));
    }

    #[test]
    fn test_set_row_group_columns() {
        let mut model =
            ColumnModel::new(vec![ColumnDef::new("a"), ColumnDef::new("b").row_group()]).unwrap();
        model.set_row_group_columns(&["a".to_string()]).unwrap();
        assert_eq!(model.row_group_columns(), ["a"]);
        assert!(!model.get("b").unwrap().row_group);

        let err = model.set_row_group_columns(&["zzz".to_string()]).unwrap_err();
        assert!(matches!(err, GridError::UnknownColumn { .. }));
    }

    #[test]
    fn test_deserialize_defaults() {
        let column: ColumnDef =
            serde_json::from_str(r#"{ "colId": "gold", "aggFunc": "sum" }"#).unwrap();
        assert_eq!(column.data_field(), "gold");
        assert_eq!(column.display_name(), "gold");
        assert_eq!(column.agg_func.as_deref(), Some("sum"));
    }
}
