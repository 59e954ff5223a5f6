//! Text rendering of the derived row tree.
//!
//! ```
//! use horizon_grid::client_side::ClientSideRowModel;
//! use horizon_grid::debug::{RowTreeDebug, TreeFormatOptions};
//! use serde_json::json;
//!
//! let mut model = ClientSideRowModel::<serde_json::Value>::builder().build().unwrap();
//! model.set_row_data(vec![json!({"a": 1})]);
//!
//! let tree = RowTreeDebug::with_options(TreeFormatOptions::minimal()).format_tree(model.store());
//! assert_eq!(tree, "(root)\n\u{2514}\u{2500}\u{2500} 0\n");
//! ```

use std::fmt::Write;

use crate::row_node::{NodeKey, RowNode};
use crate::store::NodeStore;

/// Style options for tree visualization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
    /// Compact single-line representation.
    Compact,
}

/// Configuration for row tree debug output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    pub style: TreeStyle,
    /// Append node ids to group and footer labels.
    pub show_ids: bool,
    /// Append state flags (expanded, selected, stub, ...).
    pub show_flags: bool,
    /// Maximum depth to traverse (None for unlimited).
    pub max_depth: Option<usize>,
    /// Indent size for each level.
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: true,
            show_flags: false,
            max_depth: None,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    pub fn detailed() -> Self {
        Self {
            show_flags: true,
            ..Default::default()
        }
    }

    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            show_flags: false,
            ..Default::default()
        }
    }
}

/// Renders the sorted tree of a [`NodeStore`], footers included.
#[derive(Debug, Clone, Default)]
pub struct RowTreeDebug {
    options: TreeFormatOptions,
}

impl RowTreeDebug {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: TreeFormatOptions) -> Self {
        Self { options }
    }

    /// Format the whole tree from the root.
    pub fn format_tree<T>(&self, store: &NodeStore<T>) -> String {
        self.format_subtree(store, store.root())
    }

    pub fn format_subtree<T>(&self, store: &NodeStore<T>, key: NodeKey) -> String {
        let mut output = String::new();
        self.format_into(store, key, 0, true, &mut output);
        output
    }

    fn format_into<T>(&self, store: &NodeStore<T>, key: NodeKey, depth: usize, is_last: bool, output: &mut String) {
        if self.options.max_depth.is_some_and(|max| depth > max) {
            return;
        }
        let Some(node) = store.get(key) else {
            return;
        };

        output.push_str(&self.build_prefix(depth, is_last));
        output.push_str(&label(node));
        if self.options.show_ids && (node.group || node.footer) && !node.is_root() {
            let _ = write!(output, " [{}]", node.id);
        }
        if self.options.show_flags {
            let flags = flags(node);
            if !flags.is_empty() {
                let _ = write!(output, " ({})", flags.join(", "));
            }
        }
        output.push('\n');

        let mut children: Vec<NodeKey> = node.children_after_sort.to_vec();
        if let Some(footer) = node.sibling.filter(|_| node.group) {
            children.push(footer);
        }
        let last = children.len().saturating_sub(1);
        for (i, child) in children.into_iter().enumerate() {
            self.format_into(store, child, depth + 1, i == last, output);
        }
    }

    fn build_prefix(&self, depth: usize, is_last: bool) -> String {
        if depth == 0 {
            return String::new();
        }

        let (branch, corner, end) = match self.options.style {
            TreeStyle::Ascii => ("|", "+-- ", "`-- "),
            TreeStyle::Unicode => ("\u{2502}", "\u{251c}\u{2500}\u{2500} ", "\u{2514}\u{2500}\u{2500} "),
            TreeStyle::Compact => ("", "- ", "- "),
        };

        let mut prefix = String::new();
        for _ in 0..(depth - 1) {
            prefix.push_str(branch);
            prefix.push_str(&" ".repeat(self.options.indent_size));
        }
        prefix.push_str(if is_last { end } else { corner });
        prefix
    }
}

fn label<T>(node: &RowNode<T>) -> String {
    if node.is_root() {
        return "(root)".to_string();
    }
    let key = match node.key.as_deref() {
        Some("") => "(blank)",
        Some(key) => key,
        None => node.id.as_str(),
    };
    if node.footer {
        format!("Total {key}")
    } else if node.stub {
        "(loading)".to_string()
    } else {
        key.to_string()
    }
}

fn flags<T>(node: &RowNode<T>) -> Vec<String> {
    let mut flags = Vec::new();
    if let Some(count) = node.all_children_count.filter(|_| node.group) {
        flags.push(format!("{count} rows"));
    }
    if node.expanded && node.is_expandable() {
        flags.push("expanded".to_string());
    }
    match node.selected {
        Some(true) => flags.push("selected".to_string()),
        None => flags.push("partial".to_string()),
        Some(false) => {}
    }
    if node.filler {
        flags.push("filler".to_string());
    }
    if node.failed_load {
        flags.push("failed".to_string());
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::row_node::ChildList;

    fn store() -> NodeStore<()> {
        let mut store = NodeStore::new();
        let root = store.root();
        let mut group = store.create_node("row-group-country-US");
        group.group = true;
        group.key = Some("US".into());
        group.level = 0;
        group.parent = Some(root);
        group.expanded = true;
        group.all_children_count = Some(1);
        let group = store.insert(group);
        let mut leaf = store.create_node("7");
        leaf.parent = Some(group);
        leaf.level = 1;
        leaf.selected = Some(true);
        let leaf = store.insert(leaf);

        let children: ChildList = Arc::from(vec![leaf]);
        store.get_mut(group).unwrap().set_all_child_views(children.clone());
        store.set_children_after_sort(group, children);
        let top: ChildList = Arc::from(vec![group]);
        store.get_mut(root).unwrap().set_all_child_views(top.clone());
        store.set_children_after_sort(root, top);
        store
    }

    #[test]
    fn test_ascii_tree_with_flags() {
        let options = TreeFormatOptions {
            style: TreeStyle::Ascii,
            ..TreeFormatOptions::detailed()
        };
        let text = RowTreeDebug::with_options(options).format_tree(&store());
        assert_eq!(
            text,
            "(root)\n`-- US [row-group-country-US] (1 rows, expanded)\n|  `-- 7 (selected)\n"
        );
    }

    #[test]
    fn test_max_depth() {
        let options = TreeFormatOptions {
            max_depth: Some(1),
            ..TreeFormatOptions::minimal()
        };
        let text = RowTreeDebug::with_options(options).format_tree(&store());
        assert_eq!(text.lines().count(), 2);
    }
}
