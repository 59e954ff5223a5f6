//! Column filters and the filter stages.
//!
//! A [`FilterModel`] maps column ids to serialisable [`ColumnFilter`]
//! descriptors. The filter stage produces `children_after_filter` bottom-up:
//! a leaf passes when every column filter and the external filter accept it,
//! a group passes when any child passes. With `group_agg_filtering` the
//! column filters move to the filter-aggregates stage, where groups are also
//! tested against their own aggregated values.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use horizon_grid_core::logging::targets;
use serde::{Deserialize, Serialize};

use crate::changed_path::ChangedPath;
use crate::error::GridError;
use crate::row_node::{NodeKey, RowNode, derive_child_list};
use crate::stage::StageContext;
use crate::store::NodeStore;
use crate::value::{CellValue, RowData};

/// Application filter applied to leaf rows in addition to column filters.
pub type ExternalFilter<T> = Arc<dyn Fn(&RowNode<T>) -> bool + Send + Sync>;

/// A predicate on one column.
///
/// Serialises in the `{ "type": "greaterThan", "filter": 5 }` shape.
/// Range filters are exclusive at both ends. Text filters compare
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ColumnFilter {
    Equals {
        filter: CellValue,
    },
    NotEqual {
        filter: CellValue,
    },
    LessThan {
        filter: CellValue,
    },
    LessThanOrEqual {
        filter: CellValue,
    },
    GreaterThan {
        filter: CellValue,
    },
    GreaterThanOrEqual {
        filter: CellValue,
    },
    InRange {
        filter: CellValue,
        #[serde(rename = "filterTo")]
        filter_to: CellValue,
    },
    Contains {
        filter: CellValue,
    },
    NotContains {
        filter: CellValue,
    },
    StartsWith {
        filter: CellValue,
    },
    EndsWith {
        filter: CellValue,
    },
    Blank,
    NotBlank,
    /// Passes values whose key equals one of `values`.
    Set {
        values: Vec<CellValue>,
    },
}

impl ColumnFilter {
    /// Check that the descriptor can be evaluated.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ColumnFilter::InRange { filter, filter_to } => {
                if filter.is_null() || filter_to.is_null() {
                    Err("inRange needs both bounds".to_string())
                } else if filter.compare(filter_to) == Ordering::Greater {
                    Err(format!("inRange lower bound {filter} is above upper bound {filter_to}"))
                } else {
                    Ok(())
                }
            }
            ColumnFilter::Blank | ColumnFilter::NotBlank | ColumnFilter::Set { .. } => Ok(()),
            ColumnFilter::Equals { filter }
            | ColumnFilter::NotEqual { filter }
            | ColumnFilter::LessThan { filter }
            | ColumnFilter::LessThanOrEqual { filter }
            | ColumnFilter::GreaterThan { filter }
            | ColumnFilter::GreaterThanOrEqual { filter }
            | ColumnFilter::Contains { filter }
            | ColumnFilter::NotContains { filter }
            | ColumnFilter::StartsWith { filter }
            | ColumnFilter::EndsWith { filter } => {
                if filter.is_null() {
                    Err("missing filter value".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Whether `value` passes. Nulls only pass the negative and blank filters.
    pub fn evaluate(&self, value: &CellValue) -> bool {
        match self {
            ColumnFilter::Blank => value.is_blank(),
            ColumnFilter::NotBlank => !value.is_blank(),
            ColumnFilter::Set { values } => values
                .iter()
                .any(|v| v.is_null() == value.is_null() && v.key_string() == value.key_string()),
            ColumnFilter::NotEqual { filter } => value.is_null() || !equals(value, filter),
            ColumnFilter::NotContains { filter } => {
                value.is_null() || !lower(value).contains(&lower(filter))
            }
            _ if value.is_null() => false,
            ColumnFilter::Equals { filter } => equals(value, filter),
            ColumnFilter::LessThan { filter } => ordering(value, filter) == Some(Ordering::Less),
            ColumnFilter::LessThanOrEqual { filter } => {
                matches!(ordering(value, filter), Some(Ordering::Less | Ordering::Equal))
            }
            ColumnFilter::GreaterThan { filter } => {
                ordering(value, filter) == Some(Ordering::Greater)
            }
            ColumnFilter::GreaterThanOrEqual { filter } => {
                matches!(ordering(value, filter), Some(Ordering::Greater | Ordering::Equal))
            }
            ColumnFilter::InRange { filter, filter_to } => {
                ordering(value, filter) == Some(Ordering::Greater)
                    && ordering(value, filter_to) == Some(Ordering::Less)
            }
            ColumnFilter::Contains { filter } => lower(value).contains(&lower(filter)),
            ColumnFilter::StartsWith { filter } => lower(value).starts_with(&lower(filter)),
            ColumnFilter::EndsWith { filter } => lower(value).ends_with(&lower(filter)),
        }
    }
}

fn lower(value: &CellValue) -> String {
    value.key_string().to_lowercase()
}

fn equals(value: &CellValue, filter: &CellValue) -> bool {
    match (value, filter) {
        (CellValue::String(a), CellValue::String(b)) => a.to_lowercase() == b.to_lowercase(),
        _ => ordering(value, filter) == Some(Ordering::Equal),
    }
}

/// Ordering between comparable values; `None` across kinds.
fn ordering(value: &CellValue, filter: &CellValue) -> Option<Ordering> {
    let comparable = (value.is_numeric() && filter.is_numeric())
        || matches!(
            (value, filter),
            (CellValue::String(_), CellValue::String(_)) | (CellValue::Bool(_), CellValue::Bool(_))
        );
    comparable.then(|| value.compare(filter))
}

/// Column filters by column id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterModel(BTreeMap<String, ColumnFilter>);

impl FilterModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, col_id: impl Into<String>, filter: ColumnFilter) -> Self {
        self.0.insert(col_id.into(), filter);
        self
    }

    pub fn insert(&mut self, col_id: impl Into<String>, filter: ColumnFilter) {
        self.0.insert(col_id.into(), filter);
    }

    pub fn remove(&mut self, col_id: &str) -> Option<ColumnFilter> {
        self.0.remove(col_id)
    }

    pub fn get(&self, col_id: &str) -> Option<&ColumnFilter> {
        self.0.get(col_id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ColumnFilter)> {
        self.0.iter()
    }
}

/// Filter state of a row model: the active model, the columns whose filters
/// were rejected and the external filter.
pub struct FilterStage<T> {
    model: FilterModel,
    invalid: HashSet<String>,
    external: Option<ExternalFilter<T>>,
}

impl<T> Default for FilterStage<T> {
    fn default() -> Self {
        Self {
            model: FilterModel::default(),
            invalid: HashSet::new(),
            external: None,
        }
    }
}

impl<T: RowData> FilterStage<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self) -> &FilterModel {
        &self.model
    }

    /// Install a filter model. Filters that cannot be evaluated are reported,
    /// logged and then ignored, so the column does not filter at all.
    pub fn set_model(&mut self, model: FilterModel) -> Vec<GridError> {
        let mut errors = Vec::new();
        self.invalid.clear();
        for (col_id, filter) in model.iter() {
            if let Err(reason) = filter.validate() {
                tracing::warn!(target: targets::FILTER, %col_id, %reason, "ignoring invalid filter");
                self.invalid.insert(col_id.clone());
                errors.push(GridError::invalid_filter(col_id.clone(), reason));
            }
        }
        self.model = model;
        errors
    }

    pub fn set_external(&mut self, filter: Option<ExternalFilter<T>>) {
        self.external = filter;
    }

    /// Whether any column filter is active.
    pub fn is_column_filter_present(&self) -> bool {
        self.model.iter().any(|(col_id, _)| !self.invalid.contains(col_id))
    }

    pub fn is_filter_present(&self) -> bool {
        self.is_column_filter_present() || self.external.is_some()
    }

    /// Column filters only, evaluated on the node's resolved values.
    pub fn passes_column_filters(
        &self,
        store: &NodeStore<T>,
        ctx: &StageContext<'_, T>,
        node: &RowNode<T>,
    ) -> bool {
        self.model
            .iter()
            .filter(|(col_id, _)| !self.invalid.contains(*col_id))
            .all(|(col_id, filter)| filter.evaluate(&ctx.value(store, node, col_id)))
    }

    fn passes_external(&self, node: &RowNode<T>) -> bool {
        self.external.as_ref().is_none_or(|f| f(node))
    }

    /// Whether a data row passes everything the filter stage checks.
    pub fn passes(&self, store: &NodeStore<T>, ctx: &StageContext<'_, T>, node: &RowNode<T>) -> bool {
        let columns = ctx.options.group_agg_filtering || self.passes_column_filters(store, ctx, node);
        columns && self.passes_external(node)
    }

    /// Compute `children_after_filter` for changed nodes.
    pub(crate) fn execute(
        &self,
        store: &mut NodeStore<T>,
        ctx: &StageContext<'_, T>,
        changed: &ChangedPath,
    ) {
        let root = store.root();
        let present = if ctx.options.group_agg_filtering {
            self.external.is_some()
        } else {
            self.is_filter_present()
        };
        self.filter_node(store, ctx, changed, root, !present);
        tracing::trace!(target: targets::FILTER, present, "filter stage done");
    }

    fn filter_node(
        &self,
        store: &mut NodeStore<T>,
        ctx: &StageContext<'_, T>,
        changed: &ChangedPath,
        key: NodeKey,
        include_all: bool,
    ) {
        let Some(node) = store.get(key) else {
            return;
        };
        if !node.group || !changed.is_changed(key) {
            return;
        }
        let input = node.children_after_group.clone();
        let mut kept = Vec::with_capacity(input.len());
        for &child in input.iter() {
            let Some(child_node) = store.get(child) else {
                continue;
            };
            if child_node.group {
                // A tree data parent that passes keeps its whole subtree.
                let own = !include_all
                    && child_node.data.is_some()
                    && ctx.options.tree_data
                    && self.passes(store, ctx, child_node);
                self.filter_node(store, ctx, changed, child, include_all || own);
                let has_children = store
                    .get(child)
                    .is_some_and(|n| !n.children_after_filter.is_empty());
                if include_all || own || has_children {
                    kept.push(child);
                }
            } else if include_all || self.passes(store, ctx, child_node) {
                kept.push(child);
            }
        }

        if let Some(node) = store.get_mut(key) {
            node.children_after_filter = derive_child_list(&input, &node.children_after_filter, kept);
        }
    }

    /// Compute `children_after_agg_filter` for changed nodes.
    pub(crate) fn execute_agg_filter(
        &self,
        store: &mut NodeStore<T>,
        ctx: &StageContext<'_, T>,
        changed: &ChangedPath,
    ) {
        let root = store.root();
        let active = ctx.options.group_agg_filtering && self.is_column_filter_present();
        self.agg_filter_node(store, ctx, changed, root, !active);
    }

    fn agg_filter_node(
        &self,
        store: &mut NodeStore<T>,
        ctx: &StageContext<'_, T>,
        changed: &ChangedPath,
        key: NodeKey,
        include_all: bool,
    ) {
        let Some(node) = store.get(key) else {
            return;
        };
        if !node.group || !changed.is_changed(key) {
            return;
        }
        let input = node.children_after_filter.clone();
        let mut kept = Vec::with_capacity(input.len());
        for &child in input.iter() {
            let Some(child_node) = store.get(child) else {
                continue;
            };
            if child_node.group {
                let own = !include_all && self.passes_column_filters(store, ctx, child_node);
                self.agg_filter_node(store, ctx, changed, child, include_all || own);
                let has_children = store
                    .get(child)
                    .is_some_and(|n| !n.children_after_agg_filter.is_empty());
                if include_all || own || has_children {
                    kept.push(child);
                }
            } else if include_all || self.passes_column_filters(store, ctx, child_node) {
                kept.push(child);
            }
        }

        if let Some(node) = store.get_mut(key) {
            node.children_after_agg_filter =
                derive_child_list(&input, &node.children_after_agg_filter, kept);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_filters() {
        let gt = ColumnFilter::GreaterThan { filter: 5.into() };
        assert!(gt.evaluate(&6.into()));
        assert!(gt.evaluate(&5.5.into()));
        assert!(!gt.evaluate(&5.into()));
        assert!(!gt.evaluate(&CellValue::Null));
        assert!(!gt.evaluate(&"9".into()));

        let range = ColumnFilter::InRange {
            filter: 1.into(),
            filter_to: 3.into(),
        };
        assert!(range.evaluate(&2.into()));
        assert!(!range.evaluate(&3.into()));
    }

    #[test]
    fn test_text_filters() {
        let contains = ColumnFilter::Contains { filter: "ST".into() };
        assert!(contains.evaluate(&"United States".into()));
        assert!(!contains.evaluate(&CellValue::Null));

        let not_contains = ColumnFilter::NotContains { filter: "x".into() };
        assert!(not_contains.evaluate(&CellValue::Null));
        assert!(ColumnFilter::Equals { filter: "us".into() }.evaluate(&"US".into()));
        assert!(ColumnFilter::StartsWith { filter: "un".into() }.evaluate(&"United".into()));
        assert!(ColumnFilter::EndsWith { filter: "ED".into() }.evaluate(&"United".into()));
    }

    #[test]
    fn test_blank_and_set() {
        assert!(ColumnFilter::Blank.evaluate(&CellValue::Null));
        assert!(ColumnFilter::NotBlank.evaluate(&0.into()));

        let set = ColumnFilter::Set {
            values: vec!["US".into(), CellValue::Null],
        };
        assert!(set.evaluate(&"US".into()));
        assert!(set.evaluate(&CellValue::Null));
        assert!(!set.evaluate(&"".into()));
        assert!(!set.evaluate(&"UK".into()));
    }

    #[test]
    fn test_validate() {
        assert!(ColumnFilter::Equals { filter: CellValue::Null }.validate().is_err());
        assert!(
            ColumnFilter::InRange {
                filter: 5.into(),
                filter_to: 1.into()
            }
            .validate()
            .is_err()
        );

        let mut stage: FilterStage<serde_json::Value> = FilterStage::new();
        let errors = stage.set_model(
            FilterModel::new()
                .with("a", ColumnFilter::LessThan { filter: CellValue::Null })
                .with("b", ColumnFilter::NotBlank),
        );
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], GridError::InvalidFilter { col_id, .. } if col_id == "a"));
        assert!(stage.is_column_filter_present());
    }

    #[test]
    fn test_model_serde() {
        let model: FilterModel = serde_json::from_str(
            r#"{
                "gold": { "type": "inRange", "filter": 1, "filterTo": 10 },
                "country": { "type": "set", "values": ["US", null] }
            }"#,
        )
        .unwrap();
        assert_eq!(
            model.get("gold"),
            Some(&ColumnFilter::InRange {
                filter: 1.into(),
                filter_to: 10.into()
            })
        );
        assert!(matches!(model.get("country"), Some(ColumnFilter::Set { values }) if values.len() == 2));
    }
}
