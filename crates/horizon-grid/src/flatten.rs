//! Display row computation.
//!
//! Turns the sorted tree into the ordered list of rows a renderer shows and
//! writes the display state (`row_index`, `row_top`, `displayed`, `ui_level`,
//! child position flags) onto the nodes through the store setters.

use std::collections::HashSet;

use horizon_grid_core::logging::targets;

use crate::config::{FooterPosition, GridOptions};
use crate::row_node::{NodeKey, empty_children};
use crate::store::NodeStore;

/// Inputs of one flatten pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlattenParams {
    pub include_footers: bool,
    pub footer_position: FooterPosition,
    pub total_footer: bool,
    /// Pivot mode: leaf rows are hidden and leaf groups do not open.
    pub hide_leaves: bool,
    /// Pivot mode without row groups: only the root is shown.
    pub root_only: bool,
    pub row_height: f64,
}

impl FlattenParams {
    pub(crate) fn new(options: &GridOptions, grouped: bool) -> Self {
        Self {
            include_footers: options.group_include_footer,
            footer_position: options.group_footer_position,
            total_footer: options.group_include_total_footer,
            hide_leaves: options.pivot_mode,
            root_only: options.pivot_mode && !grouped,
            row_height: options.row_height,
        }
    }
}

/// Compute the displayed rows and assign display state.
///
/// `previous` holds the rows displayed before this pass; rows that are no
/// longer shown get their index and position cleared.
pub(crate) fn flatten<T>(
    store: &mut NodeStore<T>,
    params: &FlattenParams,
    previous: &[NodeKey],
) -> Vec<NodeKey> {
    let root = store.root();
    let mut rows = Vec::new();

    if params.root_only {
        store.set_ui_level(root, 0);
        rows.push(root);
    } else {
        let children = store
            .get(root)
            .map(|n| n.children_after_sort.clone())
            .unwrap_or_else(empty_children);
        add_children(store, params, &children, 0, &mut rows);
    }
    if params.total_footer {
        if let Some(footer) = store.get(root).and_then(|n| n.sibling) {
            store.set_ui_level(footer, 0);
            rows.push(footer);
        }
    }

    count_children(store, root);

    let mut top = 0.0;
    for (index, &key) in rows.iter().enumerate() {
        store.set_row_index(key, Some(index));
        store.set_row_top(key, Some(top));
        store.set_row_height(key, params.row_height);
        store.set_displayed(key, true);
        top += params.row_height;
    }

    let shown: HashSet<NodeKey> = rows.iter().copied().collect();
    for &key in previous {
        if shown.contains(&key) || !store.contains(key) {
            continue;
        }
        store.set_row_index(key, None);
        store.set_row_top(key, None);
        store.set_displayed(key, false);
    }

    tracing::trace!(target: targets::FLATTEN, rows = rows.len(), "display rows computed");
    rows
}

fn add_children<T>(
    store: &mut NodeStore<T>,
    params: &FlattenParams,
    children: &[NodeKey],
    ui_level: i32,
    rows: &mut Vec<NodeKey>,
) {
    let last = children.len().saturating_sub(1);
    for (index, &key) in children.iter().enumerate() {
        let Some(node) = store.get(key) else {
            continue;
        };
        if params.hide_leaves && node.is_leaf() {
            continue;
        }
        let opens = node.is_expandable()
            && node.expanded
            && !(params.hide_leaves && node.leaf_group);
        let footer = node.sibling.filter(|_| params.include_footers && opens);
        let grandchildren = node.children_after_sort.clone();

        store.set_first_child(key, index == 0);
        store.set_last_child(key, index == last);
        store.set_child_index(key, Some(index));
        store.set_ui_level(key, ui_level);
        rows.push(key);

        if !opens {
            continue;
        }
        let footer_top = params.footer_position == FooterPosition::Top;
        if let Some(footer) = footer.filter(|_| footer_top) {
            store.set_ui_level(footer, ui_level + 1);
            rows.push(footer);
        }
        add_children(store, params, &grandchildren, ui_level + 1, rows);
        if let Some(footer) = footer.filter(|_| !footer_top) {
            store.set_ui_level(footer, ui_level + 1);
            rows.push(footer);
        }
    }
}

/// Set `all_children_count` on groups to their filtered leaf count.
fn count_children<T>(store: &mut NodeStore<T>, key: NodeKey) -> usize {
    let Some(node) = store.get(key) else {
        return 0;
    };
    if !node.group {
        return 1;
    }
    let children = node.children_after_sort.clone();
    let sibling = node.sibling;
    let has_data = node.data.is_some() && !node.is_root();

    let mut count = 0;
    for &child in children.iter() {
        count += count_children(store, child);
    }
    store.set_all_children_count(key, Some(count));
    if let Some(footer) = sibling {
        store.set_all_children_count(footer, Some(count));
    }
    // A tree data parent with its own data counts as a row of its parent.
    count + usize::from(has_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::row_node::ChildList;

    struct Tree {
        store: NodeStore<()>,
        group: NodeKey,
        leaves: Vec<NodeKey>,
    }

    /// root -> group(g) -> [a, b], root -> c
    fn tree() -> Tree {
        let mut store = NodeStore::new();
        let root = store.root();
        let mut group = store.create_node("row-group-g");
        group.group = true;
        group.leaf_group = true;
        group.level = 0;
        group.parent = Some(root);
        let group = store.insert(group);

        let mut leaves = Vec::new();
        for (id, parent, level) in [("a", group, 1), ("b", group, 1), ("c", root, 0)] {
            let mut leaf = store.create_node(id);
            leaf.data = Some(Arc::new(()));
            leaf.parent = Some(parent);
            leaf.level = level;
            leaves.push(store.insert(leaf));
        }
        let group_children: ChildList = Arc::from(vec![leaves[0], leaves[1]]);
        store.get_mut(group).unwrap().set_all_child_views(group_children.clone());
        store.set_children_after_sort(group, group_children);
        let root_children: ChildList = Arc::from(vec![group, leaves[2]]);
        store.get_mut(root).unwrap().set_all_child_views(root_children.clone());
        store.set_children_after_sort(root, root_children);
        Tree { store, group, leaves }
    }

    fn params() -> FlattenParams {
        FlattenParams::new(&GridOptions::default(), true)
    }

    #[test]
    fn test_collapsed_and_expanded() {
        let mut t = tree();
        let rows = flatten(&mut t.store, &params(), &[]);
        assert_eq!(rows, vec![t.group, t.leaves[2]]);
        assert_eq!(t.store.get(t.group).unwrap().all_children_count, Some(2));
        assert_eq!(t.store.get(t.leaves[2]).unwrap().row_top, Some(25.0));

        t.store.set_expanded(t.group, true);
        let expanded = flatten(&mut t.store, &params(), &rows);
        assert_eq!(expanded, vec![t.group, t.leaves[0], t.leaves[1], t.leaves[2]]);
        let b = t.store.get(t.leaves[1]).unwrap();
        assert_eq!((b.row_index, b.ui_level, b.last_child), (Some(2), 1, true));

        t.store.set_expanded(t.group, false);
        flatten(&mut t.store, &params(), &expanded);
        let a = t.store.get(t.leaves[0]).unwrap();
        assert_eq!(a.row_index, None);
        assert!(!a.displayed);
    }

    #[test]
    fn test_footer_positions() {
        let mut t = tree();
        let options = GridOptions {
            group_include_footer: true,
            ..Default::default()
        };
        crate::grouping::refresh_footers(&mut t.store, &options);
        t.store.set_expanded(t.group, true);
        let footer = t.store.get(t.group).unwrap().sibling.unwrap();

        let rows = flatten(&mut t.store, &FlattenParams::new(&options, true), &[]);
        assert_eq!(rows, vec![t.group, t.leaves[0], t.leaves[1], footer, t.leaves[2]]);

        let top = GridOptions {
            group_footer_position: FooterPosition::Top,
            ..options
        };
        let rows = flatten(&mut t.store, &FlattenParams::new(&top, true), &rows);
        assert_eq!(rows, vec![t.group, footer, t.leaves[0], t.leaves[1], t.leaves[2]]);
    }

    #[test]
    fn test_pivot_hides_leaves() {
        let mut t = tree();
        t.store.set_expanded(t.group, true);
        let options = GridOptions {
            pivot_mode: true,
            ..Default::default()
        };
        let rows = flatten(&mut t.store, &FlattenParams::new(&options, true), &[]);
        assert_eq!(rows, vec![t.group]);

        let rows = flatten(&mut t.store, &FlattenParams::new(&options, false), &rows);
        assert_eq!(rows, vec![t.store.root()]);
    }
}
