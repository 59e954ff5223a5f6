use horizon_grid_core::logging::targets;

use super::{GroupStrategy, GroupingContext, GroupingPass, refresh_all_leaf_children, remove_group};
use crate::changed_path::ChangedPath;
use crate::error::GridError;
use crate::row_node::{NodeKey, ROW_ID_PREFIX_ROW_GROUP, share_if_equal};
use crate::store::NodeStore;
use crate::value::{CellValue, RowData};

/// Groups leaves by the values of the active row group columns.
///
/// Each distinct key at each level gets one group node, ordered by the first
/// leaf that produced it. Null values fall into a blank-key group.
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupByColumns;

impl GroupByColumns {
    pub fn new() -> Self {
        Self
    }
}

impl<T: RowData> GroupStrategy<T> for GroupByColumns {
    fn derive_children(
        &mut self,
        store: &mut NodeStore<T>,
        ctx: &GroupingContext<'_, T>,
        changed: &mut ChangedPath,
    ) -> Vec<GridError> {
        let root = store.root();
        let leaves = match store.get(root) {
            Some(node) => node.all_leaf_children.clone(),
            None => return Vec::new(),
        };
        let group_columns = ctx.columns.row_group_columns();
        let previous = existing_groups(store, root);

        if group_columns.is_empty() {
            for group in previous {
                remove_group(store, group);
            }
            for &leaf in leaves.iter() {
                if let Some(node) = store.get_mut(leaf) {
                    node.parent = Some(root);
                    node.level = 0;
                }
            }
            if let Some(node) = store.get_mut(root) {
                node.children_mapped.clear();
                node.children_after_group = share_if_equal(&node.children_after_group, leaves.to_vec());
            }
            changed.add_node(root);
            return Vec::new();
        }

        let depth = group_columns.len();
        let mut pass = GroupingPass::default();
        let mut groups = Vec::new();
        for &leaf in leaves.iter() {
            let Some(data) = store.get(leaf).and_then(|n| n.data.clone()) else {
                continue;
            };
            let mut parent = root;
            for (level, col_id) in group_columns.iter().enumerate() {
                let value = ctx.values.data_value(ctx.columns, &data, col_id);
                let group = match find_group(store, parent, &value.key_string(), col_id) {
                    Some(group) => group,
                    None => create_group(store, ctx, parent, level, col_id, value),
                };
                if let Some(node) = store.get_mut(group) {
                    node.level = level as i32;
                    node.row_group_index = Some(level);
                    node.leaf_group = level + 1 == depth;
                }
                if !pass.visited.contains(&group) {
                    groups.push(group);
                }
                pass.attach(parent, group);
                parent = group;
            }
            pass.attach(parent, leaf);
            if let Some(node) = store.get_mut(leaf) {
                node.parent = Some(parent);
                node.level = depth as i32;
            }
        }

        let visited = pass.commit(store, changed);
        let mut removed = 0;
        for group in previous {
            if !visited.contains(&group) {
                remove_group(store, group);
                removed += 1;
            }
        }
        refresh_all_leaf_children(store, &groups);

        tracing::debug!(
            target: targets::GROUPING,
            groups = groups.len(),
            removed,
            "grouped rows by column"
        );
        Vec::new()
    }

    fn name(&self) -> &'static str {
        "group-by-column"
    }
}

/// Groups reachable through `children_mapped`, parents before children.
fn existing_groups<T>(store: &NodeStore<T>, root: NodeKey) -> Vec<NodeKey> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(key) = stack.pop() {
        if let Some(node) = store.get(key) {
            for child in node.children_mapped.values() {
                out.push(*child);
                stack.push(*child);
            }
        }
    }
    out
}

fn find_group<T>(store: &NodeStore<T>, parent: NodeKey, key: &str, col_id: &str) -> Option<NodeKey> {
    let group = *store.get(parent)?.children_mapped.get(key)?;
    let node = store.get(group)?;
    (node.row_group_column.as_deref() == Some(col_id)).then_some(group)
}

fn create_group<T: RowData>(
    store: &mut NodeStore<T>,
    ctx: &GroupingContext<'_, T>,
    parent: NodeKey,
    level: usize,
    col_id: &str,
    value: CellValue,
) -> NodeKey {
    let key = value.key_string();
    let id = match store.get(parent) {
        Some(p) if !p.is_root() => format!("{}-{col_id}-{}", p.id, escape_key(&key)),
        _ => format!("{ROW_ID_PREFIX_ROW_GROUP}{col_id}-{}", escape_key(&key)),
    };

    let mut node = store.create_node(id);
    node.group = true;
    node.key = Some(key.clone());
    node.field = ctx.columns.get(col_id).map(|c| c.data_field().to_string());
    node.row_group_column = Some(col_id.to_string());
    node.parent = Some(parent);
    node.level = level as i32;
    node.row_group_index = Some(level);
    node.expanded = ctx.options.is_expanded_by_default(level as i32);
    node.group_data.insert(col_id.to_string(), value);
    tracing::trace!(target: targets::GROUPING, id = %node.id, "created group node");

    let group = store.insert(node);
    if let Some(p) = store.get_mut(parent) {
        p.children_mapped.insert(key, group);
    }
    group
}

/// Escape `-` in a group key so it cannot be read as an id separator.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        if c == '\\' || c == '-' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
