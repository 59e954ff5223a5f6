//! Arena storage for row nodes.
//!
//! [`NodeStore`] owns every [`RowNode`] of one row model instance together
//! with the object id sequence, the id index of data rows and the event bus.
//! Display state is written through the setters here, which dispatch a
//! [`RowNodeEvent`] only when the value actually changes.

use std::collections::HashMap;
use std::sync::Arc;

use slotmap::SlotMap;

use crate::events::{NodeEventBus, RowNodeEvent};
use crate::row_node::{ChildList, NodeKey, ROOT_NODE_ID, RowHighlightPosition, RowNode};

/// Arena of row nodes for one row model instance.
#[derive(Debug)]
pub struct NodeStore<T> {
    nodes: SlotMap<NodeKey, RowNode<T>>,
    ids: HashMap<String, NodeKey>,
    next_object_id: u64,
    events: NodeEventBus,
    root: NodeKey,
}

impl<T> NodeStore<T> {
    /// Create a store holding only the root node.
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let mut root = RowNode::new(ROOT_NODE_ID, 0);
        root.level = -1;
        root.group = true;
        root.expanded = true;
        let root = nodes.insert(root);
        Self {
            nodes,
            ids: HashMap::new(),
            next_object_id: 1,
            events: NodeEventBus::new(),
            root,
        }
    }

    /// Key of the root node.
    pub fn root(&self) -> NodeKey {
        self.root
    }

    pub fn get(&self, key: NodeKey) -> Option<&RowNode<T>> {
        self.nodes.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: NodeKey) -> Option<&mut RowNode<T>> {
        self.nodes.get_mut(key)
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Number of nodes, including the root, groups and footers.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeKey, &RowNode<T>)> {
        self.nodes.iter()
    }

    /// The event bus. Subscribe here to observe node changes.
    pub fn events(&self) -> &NodeEventBus {
        &self.events
    }

    /// Create a detached node with the next object id.
    pub(crate) fn create_node(&mut self, id: impl Into<String>) -> RowNode<T> {
        let object_id = self.next_object_id;
        self.next_object_id += 1;
        RowNode::new(id, object_id)
    }

    pub(crate) fn insert(&mut self, node: RowNode<T>) -> NodeKey {
        self.nodes.insert(node)
    }

    /// Destroy a node: drop it from the arena, the id index and the bus.
    pub(crate) fn remove(&mut self, key: NodeKey) -> Option<RowNode<T>> {
        if key == self.root {
            return None;
        }
        let node = self.nodes.remove(key)?;
        if self.ids.get(&node.id) == Some(&key) {
            self.ids.remove(&node.id);
        }
        self.events.clear_node(key);
        Some(node)
    }

    /// Drop every node except the root, resetting the root's children.
    pub(crate) fn clear(&mut self) {
        let keys: Vec<NodeKey> = self.nodes.keys().filter(|k| *k != self.root).collect();
        for key in keys {
            self.remove(key);
        }
        if let Some(root) = self.nodes.get_mut(self.root) {
            root.clear_child_views();
            root.sibling = None;
            root.agg_data.clear();
        }
    }

    /// Look up a data row by id.
    pub fn by_id(&self, id: &str) -> Option<NodeKey> {
        self.ids.get(id).copied()
    }

    pub(crate) fn register_id(&mut self, id: String, key: NodeKey) {
        self.ids.insert(id, key);
    }

    pub(crate) fn is_id_taken(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Keys from the top level down to `key`, or `None` for unkeyed nodes.
    ///
    /// The root has an empty route.
    pub fn route(&self, key: NodeKey) -> Option<Vec<String>> {
        let node = self.get(key)?;
        if node.is_root() {
            return Some(Vec::new());
        }
        node.key.as_ref()?;

        let mut route = Vec::new();
        let mut pointer = Some(key);
        while let Some(node) = pointer.and_then(|k| self.get(k)) {
            match &node.key {
                Some(key) => route.push(key.clone()),
                None => break,
            }
            pointer = node.parent;
        }
        route.reverse();
        Some(route)
    }

    /// Visit `key` and its group descendants, children first.
    pub fn depth_first_search(&self, key: NodeKey, callback: &mut dyn FnMut(NodeKey, &RowNode<T>)) {
        let Some(node) = self.get(key) else {
            return;
        };
        for child in node.children_after_group.iter() {
            self.depth_first_search(*child, callback);
        }
        callback(key, node);
    }

    /// Selection state, with footers reporting their group's state.
    pub fn is_selected(&self, key: NodeKey) -> Option<bool> {
        let node = self.get(key)?;
        if node.footer {
            return node.sibling.and_then(|s| self.get(s)).and_then(|s| s.selected);
        }
        node.selected
    }

    fn update<V: PartialEq>(
        &mut self,
        key: NodeKey,
        value: V,
        event: RowNodeEvent,
        field: impl FnOnce(&mut RowNode<T>) -> &mut V,
    ) -> bool {
        let Some(node) = self.nodes.get_mut(key) else {
            return false;
        };
        let slot = field(node);
        if *slot == value {
            return false;
        }
        *slot = value;
        self.events.dispatch(key, event);
        true
    }

    pub fn set_row_index(&mut self, key: NodeKey, index: Option<usize>) -> bool {
        self.update(key, index, RowNodeEvent::RowIndexChanged, |n| &mut n.row_index)
    }

    pub fn set_row_top(&mut self, key: NodeKey, top: Option<f64>) -> bool {
        if let Some(node) = self.nodes.get_mut(key) {
            node.old_row_top = node.row_top;
        }
        self.update(key, top, RowNodeEvent::TopChanged, |n| &mut n.row_top)
    }

    pub fn set_displayed(&mut self, key: NodeKey, displayed: bool) -> bool {
        self.update(key, displayed, RowNodeEvent::DisplayedChanged, |n| &mut n.displayed)
    }

    pub fn set_expanded(&mut self, key: NodeKey, expanded: bool) -> bool {
        self.update(key, expanded, RowNodeEvent::ExpandedChanged, |n| &mut n.expanded)
    }

    /// Set the raw selection state of one node, mirroring it onto its footer.
    pub fn set_selected(&mut self, key: NodeKey, selected: Option<bool>) -> bool {
        let changed = self.update(key, selected, RowNodeEvent::SelectionChanged, |n| {
            &mut n.selected
        });
        let footer = self
            .get(key)
            .filter(|n| !n.footer)
            .and_then(|n| n.sibling);
        if let Some(footer) = footer {
            self.update(footer, selected, RowNodeEvent::SelectionChanged, |n| {
                &mut n.selected
            });
        }
        changed
    }

    pub fn set_ui_level(&mut self, key: NodeKey, level: i32) -> bool {
        self.update(key, level, RowNodeEvent::UiLevelChanged, |n| &mut n.ui_level)
    }

    pub fn set_first_child(&mut self, key: NodeKey, first: bool) -> bool {
        self.update(key, first, RowNodeEvent::FirstChildChanged, |n| &mut n.first_child)
    }

    pub fn set_last_child(&mut self, key: NodeKey, last: bool) -> bool {
        self.update(key, last, RowNodeEvent::LastChildChanged, |n| &mut n.last_child)
    }

    pub fn set_child_index(&mut self, key: NodeKey, index: Option<usize>) -> bool {
        self.update(key, index, RowNodeEvent::ChildIndexChanged, |n| &mut n.child_index)
    }

    pub fn set_all_children_count(&mut self, key: NodeKey, count: Option<usize>) -> bool {
        self.update(key, count, RowNodeEvent::AllChildrenCountChanged, |n| {
            &mut n.all_children_count
        })
    }

    pub fn set_highlighted(&mut self, key: NodeKey, highlight: Option<RowHighlightPosition>) -> bool {
        self.update(key, highlight, RowNodeEvent::HighlightChanged, |n| &mut n.highlighted)
    }

    pub fn set_row_height(&mut self, key: NodeKey, height: f64) -> bool {
        self.update(key, height, RowNodeEvent::HeightChanged, |n| &mut n.row_height)
    }

    /// Replace the sorted children and refresh the cached `has_children` flag.
    pub(crate) fn set_children_after_sort(&mut self, key: NodeKey, children: ChildList) {
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        let has_children = node.group && !node.footer && !children.is_empty();
        node.children_after_sort = children;
        self.update(key, has_children, RowNodeEvent::HasChildrenChanged, |n| {
            &mut n.has_children
        });
    }

    /// Replace row data, dispatching `DataChanged`.
    pub(crate) fn set_data(&mut self, key: NodeKey, data: Arc<T>, update: bool) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.data = Some(data);
            self.events.dispatch(key, RowNodeEvent::DataChanged { update });
        }
    }
}

impl<T> Default for NodeStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn store_with_leaf() -> (NodeStore<()>, NodeKey) {
        let mut store = NodeStore::new();
        let leaf = store.create_node("a");
        let key = store.insert(leaf);
        store.register_id("a".to_string(), key);
        (store, key)
    }

    #[test]
    fn test_root() {
        let store: NodeStore<()> = NodeStore::new();
        let root = store.get(store.root()).unwrap();
        assert_eq!(root.level, -1);
        assert_eq!(root.id, ROOT_NODE_ID);
        assert!(store.is_empty());
        assert_eq!(store.route(store.root()), Some(Vec::new()));
    }

    #[test]
    fn test_object_ids_monotonic() {
        let mut store: NodeStore<()> = NodeStore::new();
        let a = store.create_node("a").object_id;
        let b = store.create_node("b").object_id;
        assert!(b > a);
    }

    #[test]
    fn test_setters_dispatch_on_change_only() {
        let (mut store, key) = store_with_leaf();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        store.events().subscribe(key, move |_, event| e.lock().push(event.clone()));

        assert!(store.set_row_index(key, Some(1)));
        assert!(!store.set_row_index(key, Some(1)));
        assert!(store.set_displayed(key, true));
        assert!(store.set_row_top(key, Some(25.0)));

        assert_eq!(
            *events.lock(),
            vec![
                RowNodeEvent::RowIndexChanged,
                RowNodeEvent::DisplayedChanged,
                RowNodeEvent::TopChanged,
            ]
        );
    }

    #[test]
    fn test_remove_clears_listeners_and_id() {
        let (mut store, key) = store_with_leaf();
        store.events().subscribe(key, |_, _| {});
        assert_eq!(store.by_id("a"), Some(key));

        let removed = store.remove(key).unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(store.by_id("a"), None);
        assert_eq!(store.events().listener_count(), 0);
        assert!(store.remove(store.root()).is_none());
    }

    #[test]
    fn test_route() {
        let mut store: NodeStore<()> = NodeStore::new();
        let root = store.root();
        let mut us = store.create_node("row-group-country-US");
        us.key = Some("US".into());
        us.parent = Some(root);
        let us = store.insert(us);
        let mut swim = store.create_node("row-group-country-US-sport-Swim");
        swim.key = Some("Swim".into());
        swim.parent = Some(us);
        let swim = store.insert(swim);

        assert_eq!(store.route(swim), Some(vec!["US".to_string(), "Swim".to_string()]));
        let leaf = store.create_node("1");
        let leaf = store.insert(leaf);
        assert_eq!(store.route(leaf), None);
    }
}
