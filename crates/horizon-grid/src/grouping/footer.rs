use horizon_grid_core::logging::targets;

use crate::config::GridOptions;
use crate::row_node::{NodeKey, ROW_ID_PREFIX_FOOTER};
use crate::store::NodeStore;

/// Create or drop footer siblings so that every group has one exactly when
/// footers are enabled. The root gets a grand total footer when enabled.
///
/// Footers are never part of any child list; flattening inserts them.
pub(crate) fn refresh_footers<T>(store: &mut NodeStore<T>, options: &GridOptions) {
    let root = store.root();
    let candidates: Vec<(NodeKey, bool, Option<NodeKey>)> = store
        .iter()
        .filter(|(_, n)| !n.footer && (n.group || n.sibling.is_some()))
        .map(|(key, n)| {
            let wanted = if key == root {
                options.group_include_total_footer
            } else {
                options.group_include_footer && n.group
            };
            (key, wanted, n.sibling)
        })
        .collect();

    let mut created = 0;
    for (key, wanted, sibling) in candidates {
        match (wanted, sibling) {
            (true, None) => {
                create_footer(store, key);
                created += 1;
            }
            (false, Some(footer)) => {
                store.remove(footer);
                if let Some(node) = store.get_mut(key) {
                    node.sibling = None;
                }
            }
            _ => {}
        }
    }
    if created > 0 {
        tracing::trace!(target: targets::GROUPING, created, "created footer nodes");
    }
}

fn create_footer<T>(store: &mut NodeStore<T>, group: NodeKey) {
    let Some(source) = store.get(group) else {
        return;
    };
    let id = format!("{ROW_ID_PREFIX_FOOTER}{}", source.id);
    let key = source.key.clone();
    let field = source.field.clone();
    let row_group_column = source.row_group_column.clone();
    let level = source.level;
    let parent = source.parent;
    let data = source.data.clone();
    let group_data = source.group_data.clone();
    let selected = source.selected;

    let mut footer = store.create_node(id);
    footer.footer = true;
    footer.group = true;
    footer.key = key;
    footer.field = field;
    footer.row_group_column = row_group_column;
    footer.level = level;
    footer.parent = parent;
    footer.data = data;
    footer.group_data = group_data;
    footer.selected = selected;
    footer.sibling = Some(group);

    let footer = store.insert(footer);
    if let Some(node) = store.get_mut(group) {
        node.sibling = Some(footer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footers_follow_options() {
        let mut store: NodeStore<()> = NodeStore::new();
        let root = store.root();
        let mut group = store.create_node("row-group-a-x");
        group.group = true;
        group.parent = Some(root);
        let group = store.insert(group);

        let mut options = GridOptions {
            group_include_footer: true,
            group_include_total_footer: true,
            ..Default::default()
        };
        refresh_footers(&mut store, &options);

        let footer = store.get(group).unwrap().sibling.unwrap();
        let footer_node = store.get(footer).unwrap();
        assert!(footer_node.footer);
        assert_eq!(footer_node.id, "rowGroupFooter_row-group-a-x");
        assert_eq!(footer_node.sibling, Some(group));
        assert!(store.get(root).unwrap().sibling.is_some());
        assert_eq!(store.len(), 4);

        // idempotent
        refresh_footers(&mut store, &options);
        assert_eq!(store.len(), 4);

        options.group_include_footer = false;
        options.group_include_total_footer = false;
        refresh_footers(&mut store, &options);
        assert_eq!(store.len(), 2);
        assert!(store.get(group).unwrap().sibling.is_none());
    }
}
