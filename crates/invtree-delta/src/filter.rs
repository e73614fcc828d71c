//! Filtering delta trees with the same rules as inventory trees.

use crate::tree::{DeltaAttributes, DeltaTable, ImmutableDeltaTree};
use invtree_core::{FilterTree, SDFilterChoice};
use std::collections::BTreeMap;

fn filter_delta_node(tree: &ImmutableDeltaTree, filters: &FilterTree) -> ImmutableDeltaTree {
    let empty_filters = FilterTree::new();
    let mut nodes_by_name = BTreeMap::new();
    for name in filters.filter_node_names(tree.nodes_by_name.keys()) {
        let child_filters = filters.child(&name).unwrap_or(&empty_filters);
        let filtered = match tree.nodes_by_name.get(&name) {
            Some(child) => filter_delta_node(child, child_filters),
            None => {
                let mut path = tree.path.clone();
                path.push(name.clone());
                filter_delta_node(&ImmutableDeltaTree::with_path(path), child_filters)
            }
        };
        if !filtered.is_empty() {
            nodes_by_name.insert(name, filtered);
        }
    }
    ImmutableDeltaTree {
        path: tree.path.clone(),
        attributes: DeltaAttributes {
            pairs: filters.filter_pairs(&tree.attributes.pairs),
        },
        table: DeltaTable {
            key_columns: tree.table.key_columns.clone(),
            rows: tree
                .table
                .rows
                .iter()
                .map(|row| filters.filter_row(row))
                .filter(|row| !row.is_empty())
                .collect(),
        },
        nodes_by_name,
    }
}

pub fn filter_delta_tree<'a>(
    tree: &ImmutableDeltaTree,
    choices: impl IntoIterator<Item = &'a SDFilterChoice>,
) -> ImmutableDeltaTree {
    filter_delta_node(tree, &FilterTree::from_choices(choices))
}
