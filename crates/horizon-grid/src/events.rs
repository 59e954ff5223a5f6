//! Row node events and model-level signals.
//!
//! Per-node notifications go through one [`NodeEventBus`] owned by the node
//! store. Listeners subscribe to a node key, or to every node, and are invoked
//! outside the bus lock so that they may subscribe or unsubscribe while being
//! called.

use std::collections::HashMap;
use std::sync::Arc;

use horizon_grid_core::Signal;
use horizon_grid_core::logging::targets;
use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::pivot::PivotResultColumn;
use crate::row_node::NodeKey;
use crate::stage::RefreshStage;
use crate::value::CellValue;

/// A change on a single row node.
#[derive(Debug, Clone, PartialEq)]
pub enum RowNodeEvent {
    /// Row data was replaced. `update` is `true` for transaction updates and
    /// `false` for a fresh assignment.
    DataChanged { update: bool },
    /// A single cell was edited through the row model.
    CellChanged {
        col_id: String,
        old: CellValue,
        new: CellValue,
    },
    RowIndexChanged,
    TopChanged,
    DisplayedChanged,
    ExpandedChanged,
    SelectionChanged,
    AllChildrenCountChanged,
    UiLevelChanged,
    FirstChildChanged,
    LastChildChanged,
    HasChildrenChanged,
    HeightChanged,
    HighlightChanged,
    ChildIndexChanged,
}

slotmap::new_key_type! {
    /// Handle returned by [`NodeEventBus::subscribe`].
    pub struct ListenerId;
}

type Listener = Arc<dyn Fn(NodeKey, &RowNodeEvent) + Send + Sync>;

struct Subscription {
    node: Option<NodeKey>,
    listener: Listener,
}

#[derive(Default)]
struct BusState {
    subscriptions: SlotMap<ListenerId, Subscription>,
    by_node: HashMap<NodeKey, Vec<ListenerId>>,
    global: Vec<ListenerId>,
}

/// Central dispatcher for [`RowNodeEvent`]s.
#[derive(Default)]
pub struct NodeEventBus {
    state: Mutex<BusState>,
}

impl std::fmt::Debug for NodeEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeEventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl NodeEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to events of one node.
    pub fn subscribe<F>(&self, node: NodeKey, listener: F) -> ListenerId
    where
        F: Fn(NodeKey, &RowNodeEvent) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = state.subscriptions.insert(Subscription {
            node: Some(node),
            listener: Arc::new(listener),
        });
        state.by_node.entry(node).or_default().push(id);
        id
    }

    /// Listen to events of every node.
    pub fn subscribe_all<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(NodeKey, &RowNodeEvent) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = state.subscriptions.insert(Subscription {
            node: None,
            listener: Arc::new(listener),
        });
        state.global.push(id);
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock();
        let Some(subscription) = state.subscriptions.remove(id) else {
            return false;
        };
        match subscription.node {
            Some(node) => {
                if let Some(ids) = state.by_node.get_mut(&node) {
                    ids.retain(|other| *other != id);
                    if ids.is_empty() {
                        state.by_node.remove(&node);
                    }
                }
            }
            None => state.global.retain(|other| *other != id),
        }
        true
    }

    /// Drop every listener of a node. Called when the node is destroyed.
    pub fn clear_node(&self, node: NodeKey) {
        let mut state = self.state.lock();
        if let Some(ids) = state.by_node.remove(&node) {
            for id in ids {
                state.subscriptions.remove(id);
            }
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Deliver an event to the node's listeners, then to global listeners.
    pub fn dispatch(&self, node: NodeKey, event: RowNodeEvent) {
        let listeners: Vec<Listener> = {
            let state = self.state.lock();
            if state.subscriptions.is_empty() {
                return;
            }
            state
                .by_node
                .get(&node)
                .into_iter()
                .flatten()
                .chain(state.global.iter())
                .filter_map(|id| state.subscriptions.get(*id))
                .map(|s| Arc::clone(&s.listener))
                .collect()
        };

        if listeners.is_empty() {
            return;
        }
        tracing::trace!(target: targets::NODE, ?event, count = listeners.len(), "dispatching row node event");
        for listener in listeners {
            listener(node, &event);
        }
    }
}

/// How the row set changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsChanged {
    /// All rows were replaced.
    Full { rows: usize },
    /// A transaction touched some rows.
    Incremental {
        added: usize,
        removed: usize,
        updated: usize,
    },
}

/// Emitted after each pipeline refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelUpdated {
    /// Stage the refresh started from.
    pub stage: RefreshStage,
    /// Displayed row count after the refresh.
    pub row_count: usize,
}

/// Model-level signals.
pub struct RowModelSignals {
    /// Row data was set or a transaction was applied.
    pub rows_changed: Signal<RowsChanged>,
    /// The displayed rows were recomputed.
    pub model_updated: Signal<ModelUpdated>,
    /// The generated pivot result columns changed.
    pub pivot_columns_changed: Signal<Vec<PivotResultColumn>>,
}

impl RowModelSignals {
    pub fn new() -> Self {
        Self {
            rows_changed: Signal::new(),
            model_updated: Signal::new(),
            pivot_columns_changed: Signal::new(),
        }
    }
}

impl Default for RowModelSignals {
    fn default() -> Self {
        Self::new()
    }
}
