//! The row node entity.
//!
//! Row nodes live in a [`NodeStore`](crate::NodeStore) arena and refer to each
//! other through [`NodeKey`]s. Child views produced by the pipeline stages are
//! shared [`ChildList`]s: a stage that changes nothing hands on the previous
//! stage's list, so pointer equality tells consumers whether a level changed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::CellValue;

slotmap::new_key_type! {
    /// Arena key of a row node.
    pub struct NodeKey;
}

/// A frozen, shared list of child node keys.
pub type ChildList = Arc<[NodeKey]>;

/// Id of the root node.
pub const ROOT_NODE_ID: &str = "ROOT_NODE_ID";
/// Prefix of generated group node ids.
pub const ROW_ID_PREFIX_ROW_GROUP: &str = "row-group-";
/// Prefix of footer node ids.
pub const ROW_ID_PREFIX_FOOTER: &str = "rowGroupFooter_";

/// Returns an empty child list.
pub fn empty_children() -> ChildList {
    Arc::from(Vec::new())
}

/// Shares `previous` when `next` holds the same keys, so that unchanged
/// levels keep their list identity.
pub(crate) fn share_if_equal(previous: &ChildList, next: Vec<NodeKey>) -> ChildList {
    if previous[..] == next[..] {
        Arc::clone(previous)
    } else {
        Arc::from(next)
    }
}

/// Result list of a stage: the input list itself when nothing was dropped or
/// reordered, otherwise `previous` when the output did not change since the
/// last run, otherwise a fresh list.
pub(crate) fn derive_child_list(
    input: &ChildList,
    previous: &ChildList,
    next: Vec<NodeKey>,
) -> ChildList {
    if input[..] == next[..] {
        Arc::clone(input)
    } else {
        share_if_equal(previous, next)
    }
}

/// Pinned section a row is displayed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowPinned {
    Top,
    Bottom,
}

/// Drop highlight of a row during drag interactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowHighlightPosition {
    Above,
    Below,
}

/// One logical row or group.
///
/// Nodes are created by the node manager and the grouping strategies and
/// mutated in place across pipeline passes. Display state changes go through
/// the store so that row node events are dispatched.
#[derive(Debug)]
pub struct RowNode<T> {
    /// Stable id. Application supplied or generated.
    pub id: String,
    /// Per-instance monotonic sequence used to break sort ties.
    pub object_id: u64,
    /// Group discriminator at this level.
    pub key: Option<String>,
    /// Field of the row group column, for group nodes.
    pub field: Option<String>,
    /// Column id this group node was created for.
    pub row_group_column: Option<String>,
    pub parent: Option<NodeKey>,
    /// Depth in the tree. The root is `-1`.
    pub level: i32,
    /// Depth adjusted for collapsed groups.
    pub ui_level: i32,
    pub row_group_index: Option<usize>,

    pub group: bool,
    pub footer: bool,
    /// Group whose children are leaves.
    pub leaf_group: bool,
    pub master: bool,
    pub detail: bool,
    pub row_pinned: Option<RowPinned>,
    /// Placeholder awaiting server data.
    pub stub: bool,
    pub failed_load: bool,
    /// Tree data group created for a path segment with no data row.
    pub filler: bool,
    /// Detached copy kept alive so selection tracking can observe a removal.
    pub daemon: bool,
    pub selectable: bool,

    pub data: Option<Arc<T>>,
    pub group_data: HashMap<String, CellValue>,
    pub agg_data: HashMap<String, CellValue>,
    /// Position in the original data array. Never changes once assigned.
    pub source_row_index: Option<usize>,

    /// All leaf descendants. Written by the node manager (root) and the
    /// grouping stage only.
    pub all_leaf_children: ChildList,
    pub children_after_group: ChildList,
    pub children_after_filter: ChildList,
    pub children_after_agg_filter: ChildList,
    pub children_after_sort: ChildList,
    /// Child groups (or tree path segments) by key.
    pub children_mapped: HashMap<String, NodeKey>,
    /// Footer of a group, or group of a footer.
    pub sibling: Option<NodeKey>,
    pub all_children_count: Option<usize>,

    pub expanded: bool,
    /// `None` for a partially selected group.
    pub selected: Option<bool>,
    pub row_index: Option<usize>,
    pub row_top: Option<f64>,
    pub old_row_top: Option<f64>,
    pub row_height: f64,
    pub displayed: bool,
    pub highlighted: Option<RowHighlightPosition>,
    pub first_child: bool,
    pub last_child: bool,
    pub child_index: Option<usize>,
    pub has_children: bool,
}

impl<T> RowNode<T> {
    pub(crate) fn new(id: impl Into<String>, object_id: u64) -> Self {
        Self {
            id: id.into(),
            object_id,
            key: None,
            field: None,
            row_group_column: None,
            parent: None,
            level: 0,
            ui_level: 0,
            row_group_index: None,
            group: false,
            footer: false,
            leaf_group: false,
            master: false,
            detail: false,
            row_pinned: None,
            stub: false,
            failed_load: false,
            filler: false,
            daemon: false,
            selectable: true,
            data: None,
            group_data: HashMap::new(),
            agg_data: HashMap::new(),
            source_row_index: None,
            all_leaf_children: empty_children(),
            children_after_group: empty_children(),
            children_after_filter: empty_children(),
            children_after_agg_filter: empty_children(),
            children_after_sort: empty_children(),
            children_mapped: HashMap::new(),
            sibling: None,
            all_children_count: None,
            expanded: false,
            selected: Some(false),
            row_index: None,
            row_top: None,
            old_row_top: None,
            row_height: 0.0,
            displayed: false,
            highlighted: None,
            first_child: false,
            last_child: false,
            child_index: None,
            has_children: false,
        }
    }

    /// Whether this node is the tree root.
    pub fn is_root(&self) -> bool {
        self.level == -1 && !self.footer
    }

    /// A leaf is any non-group row, including detail rows.
    pub fn is_leaf(&self) -> bool {
        !self.group
    }

    /// Whether the node has derived children to show.
    pub fn has_child_nodes(&self) -> bool {
        self.group && !self.footer && !self.children_after_group.is_empty()
    }

    /// Whether the node can be expanded: group rows and master rows.
    pub fn is_expandable(&self) -> bool {
        self.master || (self.group && !self.footer && !self.is_root())
    }

    /// Selection state. Footers report through the store via their sibling.
    pub fn is_selected(&self) -> Option<bool> {
        self.selected
    }

    /// Display index as a string, prefixed for pinned rows.
    ///
    /// Returns `None` for rows that are not displayed, which happens when UI
    /// code still holds a node that was removed or filtered out.
    pub fn row_index_string(&self) -> Option<String> {
        let index = match self.row_index {
            Some(index) => index,
            None => {
                tracing::debug!(
                    target: horizon_grid_core::logging::targets::NODE,
                    id = %self.id,
                    "row index requested for a node that is not displayed"
                );
                return None;
            }
        };
        Some(match self.row_pinned {
            Some(RowPinned::Top) => format!("t-{index}"),
            Some(RowPinned::Bottom) => format!("b-{index}"),
            None => index.to_string(),
        })
    }

    /// Set all four derived child views to the same list.
    pub(crate) fn set_all_child_views(&mut self, children: ChildList) {
        self.children_after_filter = Arc::clone(&children);
        self.children_after_agg_filter = Arc::clone(&children);
        self.children_after_sort = Arc::clone(&children);
        self.children_after_group = children;
    }

    pub(crate) fn clear_child_views(&mut self) {
        self.set_all_child_views(empty_children());
        self.all_leaf_children = empty_children();
        self.children_mapped.clear();
    }
}
