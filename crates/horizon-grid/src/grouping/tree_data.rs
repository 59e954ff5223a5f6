use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use horizon_grid_core::logging::targets;

use super::{GroupStrategy, GroupingContext, GroupingPass, refresh_all_leaf_children, remove_group};
use crate::changed_path::ChangedPath;
use crate::error::GridError;
use crate::row_node::{NodeKey, ROW_ID_PREFIX_ROW_GROUP};
use crate::store::NodeStore;
use crate::value::RowData;

/// Returns the hierarchy path of a data row, outermost segment first.
pub type TreeDataPathGetter<T> = Arc<dyn Fn(&T) -> Vec<String> + Send + Sync>;

/// Builds the tree from explicit row paths.
///
/// Missing intermediate segments get filler group nodes. A data row whose
/// path ends at an existing filler takes the filler's place. Rows with an
/// empty or already occupied path are placed at the root and reported.
pub struct TreeDataStrategy<T> {
    path: TreeDataPathGetter<T>,
}

impl<T> TreeDataStrategy<T> {
    pub fn new(path: TreeDataPathGetter<T>) -> Self {
        Self { path }
    }
}

struct TreeRun<'s, T> {
    store: &'s mut NodeStore<T>,
    pass: GroupingPass,
    paths: HashMap<NodeKey, Vec<String>>,
    /// Rows that took over a filler this pass and kept its expansion.
    took_over: HashSet<NodeKey>,
    default_expanded: &'s dyn Fn(i32) -> bool,
}

impl<T: RowData> GroupStrategy<T> for TreeDataStrategy<T> {
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
        let paths: HashMap<NodeKey, Vec<String>> = leaves
            .iter()
            .map(|&key| {
                let path = store
                    .get(key)
                    .and_then(|n| n.data.as_deref())
                    .map(|data| (self.path)(data))
                    .unwrap_or_default();
                (key, path)
            })
            .collect();
        let previous_fillers: Vec<NodeKey> = store
            .iter()
            .filter(|(_, n)| n.filler)
            .map(|(k, _)| k)
            .collect();
        let previous_parents: HashSet<NodeKey> = leaves
            .iter()
            .copied()
            .filter(|&key| store.get(key).is_some_and(|n| n.group))
            .collect();

        let default_expanded = |level: i32| ctx.options.is_expanded_by_default(level);
        let mut run = TreeRun {
            store,
            pass: GroupingPass::default(),
            paths,
            took_over: HashSet::new(),
            default_expanded: &default_expanded,
        };
        let mut errors = Vec::new();
        for &leaf in leaves.iter() {
            if let Err(error) = run.place(leaf) {
                tracing::warn!(target: targets::GROUPING, %error, "row placed at root");
                errors.push(error);
            }
        }

        let TreeRun {
            store,
            pass,
            took_over,
            ..
        } = run;
        let visited = pass.commit(store, changed);
        let mut groups = Vec::new();
        for &key in &visited {
            if let Some(node) = store.get_mut(key) {
                node.group = node.filler || !node.children_after_group.is_empty();
                if node.group {
                    // A data row that just became a parent starts like a new group.
                    if !node.filler && !previous_parents.contains(&key) && !took_over.contains(&key) {
                        node.expanded = default_expanded(node.level);
                    }
                    groups.push(key);
                } else {
                    node.all_leaf_children = Arc::from(Vec::new());
                }
            }
        }
        for filler in previous_fillers {
            if !visited.contains(&filler) {
                remove_group(store, filler);
            }
        }
        refresh_all_leaf_children(store, &groups);

        tracing::debug!(
            target: targets::GROUPING,
            groups = groups.len(),
            issues = errors.len(),
            "derived tree data"
        );
        errors
    }

    fn name(&self) -> &'static str {
        "tree-data"
    }
}

impl<T> TreeRun<'_, T> {
    fn place(&mut self, leaf: NodeKey) -> Result<(), GridError> {
        let root = self.store.root();
        let path = self.paths.get(&leaf).cloned().unwrap_or_default();
        let Some((last, prefix)) = path.split_last() else {
            self.attach_at_root(leaf, None);
            return Err(GridError::invalid_tree_path(self.id_of(leaf), "empty path"));
        };

        let mut parent = root;
        for depth in 0..prefix.len() {
            parent = self.descend(parent, &path[..=depth]);
        }

        let occupant = self.mapped(parent, last);
        match occupant {
            Some(existing) if existing == leaf => {}
            Some(existing) if self.store.get(existing).is_some_and(|n| n.filler) => {
                self.replace_filler(parent, existing, leaf);
            }
            Some(existing)
                if self.store.contains(existing)
                    && self.paths.get(&existing).is_some_and(|p| *p == path) =>
            {
                self.attach_at_root(leaf, Some(last.clone()));
                return Err(GridError::invalid_tree_path(
                    self.id_of(leaf),
                    format!("path {path:?} is already used by row '{}'", self.id_of(existing)),
                ));
            }
            _ => {
                if let Some(p) = self.store.get_mut(parent) {
                    p.children_mapped.insert(last.clone(), leaf);
                }
            }
        }

        self.pass.attach(parent, leaf);
        if let Some(node) = self.store.get_mut(leaf) {
            node.parent = Some(parent);
            node.level = prefix.len() as i32;
            node.key = Some(last.clone());
            node.filler = false;
        }
        Ok(())
    }

    /// Step from `parent` into the node for the last segment of `prefix`,
    /// creating a filler when no valid node exists.
    fn descend(&mut self, parent: NodeKey, prefix: &[String]) -> NodeKey {
        let segment = &prefix[prefix.len() - 1];
        let level = prefix.len() as i32 - 1;
        if let Some(existing) = self.mapped(parent, segment) {
            let valid = match self.store.get(existing) {
                Some(node) if node.filler => true,
                Some(_) => self.paths.get(&existing).is_some_and(|p| p[..] == prefix[..]),
                None => false,
            };
            if valid {
                self.pass.attach(parent, existing);
                if let Some(node) = self.store.get_mut(existing) {
                    node.parent = Some(parent);
                    node.level = level;
                }
                return existing;
            }
        }

        let mut filler = self
            .store
            .create_node(format!("{ROW_ID_PREFIX_ROW_GROUP}{}", prefix.join("-")));
        filler.group = true;
        filler.filler = true;
        filler.key = Some(segment.clone());
        filler.parent = Some(parent);
        filler.level = level;
        filler.expanded = (self.default_expanded)(level);
        let filler = self.store.insert(filler);
        if let Some(p) = self.store.get_mut(parent) {
            p.children_mapped.insert(segment.clone(), filler);
        }
        self.pass.attach(parent, filler);
        filler
    }

    /// Put a data row where a filler stood, taking over its children.
    fn replace_filler(&mut self, parent: NodeKey, filler: NodeKey, leaf: NodeKey) {
        let (mapped, expanded) = match self.store.get_mut(filler) {
            Some(node) => (std::mem::take(&mut node.children_mapped), node.expanded),
            None => return,
        };
        let key = self.store.get(filler).and_then(|n| n.key.clone());

        if self.pass.visited.remove(&filler) {
            if let Some(siblings) = self.pass.children.get_mut(&parent) {
                if let Some(slot) = siblings.iter_mut().find(|k| **k == filler) {
                    *slot = leaf;
                }
            }
            self.pass.visited.insert(leaf);
        }
        if let Some(children) = self.pass.children.remove(&filler) {
            for &child in &children {
                if let Some(node) = self.store.get_mut(child) {
                    node.parent = Some(leaf);
                }
            }
            self.pass.children.insert(leaf, children);
        }
        for &child in mapped.values() {
            if let Some(node) = self.store.get_mut(child) {
                if node.parent == Some(filler) {
                    node.parent = Some(leaf);
                }
            }
        }

        if let Some(node) = self.store.get_mut(leaf) {
            node.children_mapped.extend(mapped);
            node.expanded = expanded;
        }
        self.took_over.insert(leaf);
        if let (Some(p), Some(key)) = (self.store.get_mut(parent), key) {
            p.children_mapped.insert(key, leaf);
        }
        remove_group(self.store, filler);
    }

    fn attach_at_root(&mut self, leaf: NodeKey, key: Option<String>) {
        let root = self.store.root();
        self.pass.attach(root, leaf);
        if let Some(node) = self.store.get_mut(leaf) {
            node.parent = Some(root);
            node.level = 0;
            node.key = key;
        }
    }

    fn mapped(&self, parent: NodeKey, segment: &str) -> Option<NodeKey> {
        self.store.get(parent)?.children_mapped.get(segment).copied()
    }

    fn id_of(&self, key: NodeKey) -> String {
        self.store.get(key).map(|n| n.id.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ColumnModel;
    use crate::config::GridOptions;
    use crate::node_manager::RowNodeManager;
    use crate::value_service::ValueService;
    use serde_json::{Value, json};

    fn path_getter() -> TreeDataPathGetter<Value> {
        Arc::new(|row: &Value| {
            row["path"]
                .as_array()
                .map(|p| p.iter().filter_map(|s| s.as_str().map(String::from)).collect())
                .unwrap_or_default()
        })
    }

    fn derive(store: &mut NodeStore<Value>, strategy: &mut TreeDataStrategy<Value>) -> Vec<GridError> {
        let options = GridOptions::default();
        let columns = ColumnModel::default();
        let values = ValueService::new();
        let ctx = GroupingContext {
            options: &options,
            columns: &columns,
            values: &values,
        };
        strategy.derive_children(store, &ctx, &mut ChangedPath::everything())
    }

    fn keys_of(store: &NodeStore<Value>, key: NodeKey) -> Vec<String> {
        store
            .get(key)
            .unwrap()
            .children_after_group
            .iter()
            .map(|k| store.get(*k).unwrap().key.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_fillers_created_and_replaced() {
        let mut store = NodeStore::new();
        let mut manager = RowNodeManager::new(None);
        manager.set_row_data(
            &mut store,
            vec![
                json!({"path": ["Erica", "Malcolm", "Jo"]}),
                json!({"path": ["Erica"]}),
            ],
        );
        let mut strategy = TreeDataStrategy::new(path_getter());
        let errors = derive(&mut store, &mut strategy);
        assert!(errors.is_empty());

        let root = store.root();
        assert_eq!(keys_of(&store, root), ["Erica"]);
        let erica = store.get(root).unwrap().children_after_group[0];
        let erica_node = store.get(erica).unwrap();
        // the data row replaced the filler
        assert_eq!(erica_node.id, "1");
        assert!(erica_node.group);
        assert!(!erica_node.filler);

        let malcolm = erica_node.children_after_group[0];
        let malcolm_node = store.get(malcolm).unwrap();
        assert!(malcolm_node.filler);
        assert_eq!(malcolm_node.level, 1);
        assert_eq!(malcolm_node.parent, Some(erica));
        assert_eq!(keys_of(&store, malcolm), ["Jo"]);

        let jo = store.by_id("0").unwrap();
        assert!(!store.get(jo).unwrap().group);
        assert_eq!(store.get(jo).unwrap().level, 2);
        assert_eq!(store.get(erica).unwrap().all_leaf_children.len(), 1);

        // stable across runs
        let count = store.len();
        derive(&mut store, &mut strategy);
        assert_eq!(store.len(), count);
        assert_eq!(store.get(root).unwrap().children_after_group[0], erica);
    }

    #[test]
    fn test_invalid_paths_go_to_root() {
        let mut store = NodeStore::new();
        let mut manager = RowNodeManager::new(None);
        manager.set_row_data(
            &mut store,
            vec![
                json!({"path": ["A", "B"]}),
                json!({"path": []}),
                json!({"path": ["A", "B"]}),
            ],
        );
        let mut strategy = TreeDataStrategy::new(path_getter());
        let errors = derive(&mut store, &mut strategy);

        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, GridError::InvalidTreePath { .. })));
        let root = store.root();
        assert_eq!(store.get(root).unwrap().children_after_group.len(), 3);
        let dup = store.by_id("2").unwrap();
        assert_eq!(store.get(dup).unwrap().parent, Some(root));
    }

    #[test]
    fn test_filler_removed_when_unused() {
        let mut store = NodeStore::new();
        let mut manager = RowNodeManager::new(None);
        manager.set_row_data(&mut store, vec![json!({"path": ["A", "B"]})]);
        let mut strategy = TreeDataStrategy::new(path_getter());
        derive(&mut store, &mut strategy);
        assert_eq!(store.len(), 3);

        manager.set_row_data(&mut store, vec![json!({"path": ["C"]})]);
        derive(&mut store, &mut strategy);
        assert_eq!(store.len(), 2);
        assert_eq!(keys_of(&store, store.root()), ["C"]);
    }
}
