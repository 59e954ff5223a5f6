//! Aggregation functions and the aggregation stage.
//!
//! The stage walks the filtered tree bottom-up and stores one `agg_data`
//! entry per value column on every group. `sum`, `min`, `max` and `count`
//! combine the already aggregated values of child groups; other functions
//! scan the group's filtered leaves.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use horizon_grid_core::logging::targets;

use crate::changed_path::ChangedPath;
use crate::pivot::{PivotStage, filtered_leaves};
use crate::row_node::NodeKey;
use crate::stage::StageContext;
use crate::store::NodeStore;
use crate::value::{CellValue, RowData};

/// A custom aggregation over leaf values.
pub type CustomAggFn = Arc<dyn Fn(&[CellValue]) -> CellValue + Send + Sync>;

/// An aggregation function.
#[derive(Clone)]
pub enum AggFunc {
    Sum,
    Min,
    Max,
    Count,
    Avg,
    First,
    Last,
    Custom(CustomAggFn),
}

impl fmt::Debug for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggFunc::Sum => f.write_str("Sum"),
            AggFunc::Min => f.write_str("Min"),
            AggFunc::Max => f.write_str("Max"),
            AggFunc::Count => f.write_str("Count"),
            AggFunc::Avg => f.write_str("Avg"),
            AggFunc::First => f.write_str("First"),
            AggFunc::Last => f.write_str("Last"),
            AggFunc::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl AggFunc {
    /// Built-in function by name.
    pub fn builtin(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => AggFunc::Sum,
            "min" => AggFunc::Min,
            "max" => AggFunc::Max,
            "count" => AggFunc::Count,
            "avg" => AggFunc::Avg,
            "first" => AggFunc::First,
            "last" => AggFunc::Last,
            _ => return None,
        })
    }

    /// Whether results of child groups can be combined instead of rescanning
    /// leaves.
    pub fn is_combinable(&self) -> bool {
        matches!(self, AggFunc::Sum | AggFunc::Min | AggFunc::Max | AggFunc::Count)
    }
}

/// Named aggregation functions: the built-ins plus registered custom ones.
/// Registered names shadow built-ins.
#[derive(Clone, Default)]
pub struct AggFuncRegistry {
    custom: HashMap<String, CustomAggFn>,
}

impl fmt::Debug for AggFuncRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggFuncRegistry")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AggFuncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom function under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[CellValue]) -> CellValue + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), Arc::new(func));
    }

    pub fn resolve(&self, name: &str) -> Option<AggFunc> {
        match self.custom.get(name) {
            Some(func) => Some(AggFunc::Custom(Arc::clone(func))),
            None => AggFunc::builtin(name),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }
}

/// Apply `func` to a list of values.
///
/// Non-numeric values are ignored by the numeric functions. Integer sums stay
/// integers unless they overflow. Averages are always floats.
pub fn aggregate_values(values: &[CellValue], func: &AggFunc) -> CellValue {
    match func {
        AggFunc::Sum => sum(values),
        AggFunc::Min => numeric(values)
            .min_by(|a, b| a.compare(b))
            .cloned()
            .unwrap_or_default(),
        AggFunc::Max => numeric(values)
            .max_by(|a, b| a.compare(b))
            .cloned()
            .unwrap_or_default(),
        AggFunc::Count => CellValue::from(values.len()),
        AggFunc::Avg => {
            let (total, count) = numeric(values)
                .filter_map(CellValue::as_f64)
                .fold((0.0, 0usize), |(t, c), v| (t + v, c + 1));
            if count == 0 {
                CellValue::Null
            } else {
                CellValue::Float(total / count as f64)
            }
        }
        AggFunc::First => values.first().cloned().unwrap_or_default(),
        AggFunc::Last => values.last().cloned().unwrap_or_default(),
        AggFunc::Custom(func) => func(values),
    }
}

fn numeric(values: &[CellValue]) -> impl Iterator<Item = &CellValue> {
    values.iter().filter(|v| v.is_numeric())
}

fn sum(values: &[CellValue]) -> CellValue {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    let mut seen = false;
    for value in numeric(values) {
        seen = true;
        int_total = match (int_total, value) {
            (Some(total), CellValue::Int(n)) => total.checked_add(*n),
            _ => None,
        };
        float_total += value.as_f64().unwrap_or_default();
    }
    match (seen, int_total) {
        (false, _) => CellValue::Null,
        (true, Some(total)) => CellValue::Int(total),
        (true, None) => CellValue::Float(float_total),
    }
}

/// Combine child results of a combinable function.
fn combine(partials: &[CellValue], func: &AggFunc) -> CellValue {
    match func {
        AggFunc::Count => match sum(partials) {
            CellValue::Null => CellValue::Int(0),
            total => total,
        },
        other => aggregate_values(partials, other),
    }
}

struct ValuePlan {
    col_id: String,
    func: Option<AggFunc>,
}

struct PivotPlan {
    col_id: String,
    value_col_id: String,
    pivot_keys: Vec<String>,
    func: Option<AggFunc>,
}

/// Computes `agg_data` for group nodes.
pub(crate) struct AggregationStage<'a, T> {
    ctx: &'a StageContext<'a, T>,
    values: Vec<ValuePlan>,
    pivot: Option<(Vec<PivotPlan>, HashMap<NodeKey, Vec<String>>)>,
}

impl<'a, T: RowData> AggregationStage<'a, T> {
    pub(crate) fn new(
        store: &NodeStore<T>,
        ctx: &'a StageContext<'a, T>,
        registry: &AggFuncRegistry,
        pivot: &PivotStage,
    ) -> Self {
        let resolve = |col_id: &str, name: &str| {
            let func = registry.resolve(name);
            if func.is_none() {
                tracing::warn!(
                    target: targets::AGGREGATION,
                    %col_id,
                    %name,
                    "unknown aggregation function, value set to null"
                );
            }
            func
        };

        let values = ctx
            .columns
            .value_columns()
            .filter_map(|c| {
                let name = c.agg_func.as_deref()?;
                Some(ValuePlan {
                    col_id: c.col_id.clone(),
                    func: resolve(&c.col_id, name),
                })
            })
            .collect();

        let pivot = PivotStage::is_active(ctx).then(|| {
            let plans = pivot
                .result_columns()
                .iter()
                .map(|c| PivotPlan {
                    col_id: c.col_id.clone(),
                    value_col_id: c.value_col_id.clone(),
                    pivot_keys: c.pivot_keys.clone(),
                    func: c.agg_func.as_deref().and_then(|name| resolve(&c.col_id, name)),
                })
                .collect();
            let mut leaves = Vec::new();
            filtered_leaves(store, store.root(), &mut leaves);
            let keys = leaves
                .into_iter()
                .filter_map(|k| Some((k, PivotStage::pivot_keys(ctx, store, store.get(k)?))))
                .collect();
            (plans, keys)
        });

        Self { ctx, values, pivot }
    }

    pub(crate) fn execute(&self, store: &mut NodeStore<T>, changed: &ChangedPath) {
        let root = store.root();
        self.aggregate_node(store, changed, root);
    }

    fn aggregate_node(&self, store: &mut NodeStore<T>, changed: &ChangedPath, key: NodeKey) {
        let Some(node) = store.get(key) else {
            return;
        };
        if !node.group || !changed.is_changed(key) {
            return;
        }
        let children = node.children_after_filter.clone();
        let is_root = node.is_root();
        for &child in children.iter() {
            if store.get(child).is_some_and(|n| n.group) {
                self.aggregate_node(store, changed, child);
            }
        }

        let grouped = !self.ctx.columns.row_group_columns().is_empty() || self.ctx.options.tree_data;
        let suppress = is_root
            && self.ctx.options.suppress_agg_at_root_level
            && !(self.pivot.is_some() && !grouped);
        let agg_data = if suppress {
            HashMap::new()
        } else if let Some((plans, keys)) = &self.pivot {
            self.pivot_agg(store, key, plans, keys)
        } else {
            self.value_agg(store, key, &children)
        };
        if let Some(node) = store.get_mut(key) {
            node.agg_data = agg_data;
        }
    }

    fn value_agg(
        &self,
        store: &NodeStore<T>,
        key: NodeKey,
        children: &[NodeKey],
    ) -> HashMap<String, CellValue> {
        let mut leaves: Option<Vec<NodeKey>> = None;
        let mut result = HashMap::with_capacity(self.values.len());
        for plan in &self.values {
            let value = match &plan.func {
                None => CellValue::Null,
                Some(func) if func.is_combinable() => {
                    let partials: Vec<CellValue> = children
                        .iter()
                        .filter_map(|c| store.get(*c))
                        .map(|child| {
                            if child.group {
                                child.agg_data.get(&plan.col_id).cloned().unwrap_or_default()
                            } else if matches!(func, AggFunc::Count) {
                                CellValue::Int(1)
                            } else {
                                self.ctx.value(store, child, &plan.col_id)
                            }
                        })
                        .collect();
                    combine(&partials, func)
                }
                Some(func) => {
                    let leaves = leaves.get_or_insert_with(|| {
                        let mut out = Vec::new();
                        filtered_leaves(store, key, &mut out);
                        out
                    });
                    let values: Vec<CellValue> = leaves
                        .iter()
                        .map(|leaf| self.ctx.value_of(store, *leaf, &plan.col_id))
                        .collect();
                    aggregate_values(&values, func)
                }
            };
            result.insert(plan.col_id.clone(), value);
        }
        result
    }

    fn pivot_agg(
        &self,
        store: &NodeStore<T>,
        key: NodeKey,
        plans: &[PivotPlan],
        leaf_keys: &HashMap<NodeKey, Vec<String>>,
    ) -> HashMap<String, CellValue> {
        let mut leaves = Vec::new();
        filtered_leaves(store, key, &mut leaves);

        let mut result = HashMap::with_capacity(plans.len());
        for plan in plans {
            let value = match &plan.func {
                None => CellValue::Null,
                Some(func) => {
                    let values: Vec<CellValue> = leaves
                        .iter()
                        .filter(|leaf| leaf_keys.get(*leaf) == Some(&plan.pivot_keys))
                        .map(|leaf| self.ctx.value_of(store, *leaf, &plan.value_col_id))
                        .collect();
                    aggregate_values(&values, func)
                }
            };
            result.insert(plan.col_id.clone(), value);
        }
        result
    }
}
