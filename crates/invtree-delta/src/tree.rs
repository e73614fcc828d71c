//! Delta trees: the shape of an inventory tree with old/new pairs as values.

use crate::value::{DeltaStats, EncodeAs, SDDeltaValue};
use invtree_core::{SDKey, SDNodeName, SDPath, TreeView};
use std::collections::BTreeMap;

/// A delta row or delta pairs mapping.
pub type DeltaRow = BTreeMap<SDKey, SDDeltaValue>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeltaAttributes {
    pub pairs: DeltaRow,
}

impl DeltaAttributes {
    pub const fn new() -> Self {
        Self {
            pairs: BTreeMap::new(),
        }
    }

    pub fn from_attributes(attributes: &invtree_core::Attributes, encode_as: EncodeAs) -> Self {
        Self {
            pairs: attributes
                .pairs()
                .iter()
                .map(|(k, v)| (k.clone(), encode_as(v.clone())))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get_stats(&self) -> DeltaStats {
        DeltaStats::from_map(&self.pairs)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeltaTable {
    pub key_columns: Vec<SDKey>,
    pub rows: Vec<DeltaRow>,
}

impl DeltaTable {
    pub const fn new() -> Self {
        Self {
            key_columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn from_table(table: &invtree_core::Table, encode_as: EncodeAs) -> Self {
        Self {
            key_columns: table.key_columns().to_vec(),
            rows: table
                .rows()
                .map(|row| {
                    row.iter()
                        .map(|(k, v)| (k.clone(), encode_as(v.clone())))
                        .collect()
                })
                .collect(),
        }
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.rows.iter().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_stats(&self) -> DeltaStats {
        self.rows.iter().map(DeltaStats::from_map).sum()
    }
}

static EMPTY_DELTA_TREE: ImmutableDeltaTree = ImmutableDeltaTree::new();

/// Result of comparing two trees. Only built by comparison or by reading a
/// persisted delta.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImmutableDeltaTree {
    pub path: SDPath,
    pub attributes: DeltaAttributes,
    pub table: DeltaTable,
    pub nodes_by_name: BTreeMap<SDNodeName, ImmutableDeltaTree>,
}

impl ImmutableDeltaTree {
    pub const fn new() -> Self {
        Self {
            path: Vec::new(),
            attributes: DeltaAttributes::new(),
            table: DeltaTable::new(),
            nodes_by_name: BTreeMap::new(),
        }
    }

    pub fn with_path(path: SDPath) -> Self {
        Self {
            path,
            ..Self::new()
        }
    }

    /// Encode every fact of `tree` with `encode_as`, e.g. a subtree that
    /// exists only in the current snapshot becomes all-new.
    pub fn from_tree<T: TreeView>(tree: &T, encode_as: EncodeAs) -> Self {
        Self {
            path: tree.path().to_vec(),
            attributes: DeltaAttributes::from_attributes(tree.attributes(), encode_as),
            table: DeltaTable::from_table(tree.table(), encode_as),
            nodes_by_name: tree
                .nodes_by_name()
                .iter()
                .map(|(name, node)| (name.clone(), Self::from_tree(node, encode_as)))
                .collect(),
        }
    }

    /// Node at `path`, or a shared empty delta tree if any segment is missing.
    pub fn get_tree(&self, path: &[SDNodeName]) -> &ImmutableDeltaTree {
        let mut node = self;
        for name in path {
            match node.nodes_by_name.get(name) {
                Some(child) => node = child,
                None => return &EMPTY_DELTA_TREE,
            }
        }
        node
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
            + self.table.len()
            + self
                .nodes_by_name
                .values()
                .map(ImmutableDeltaTree::len)
                .sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_stats(&self) -> DeltaStats {
        self.attributes.get_stats()
            + self.table.get_stats()
            + self
                .nodes_by_name
                .values()
                .map(ImmutableDeltaTree::get_stats)
                .sum::<DeltaStats>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{encode_as_new, encode_as_removed};
    use invtree_core::{row, sd_path, MutableTree, SDValue};

    #[test]
    fn test_from_tree_encodes_everything() {
        let mut tree = MutableTree::new();
        tree.add_pairs(&sd_path(&["a"]), row([("k", "v")]));
        tree.add_rows(
            &sd_path(&["a", "b"]),
            &["c".to_string()],
            vec![row([("c", 1), ("d", 2)])],
        );

        let delta = ImmutableDeltaTree::from_tree(&tree, encode_as_new);
        assert_eq!(delta.len(), 3);
        assert_eq!(delta.get_stats(), DeltaStats::new(3, 0, 0));
        assert_eq!(
            delta.get_tree(&sd_path(&["a"])).attributes.pairs["k"],
            SDDeltaValue::new(SDValue::Null, SDValue::from("v"))
        );
        assert_eq!(
            delta.get_tree(&sd_path(&["a", "b"])).path,
            sd_path(&["a", "b"])
        );

        let removed = ImmutableDeltaTree::from_tree(&tree, encode_as_removed);
        assert_eq!(removed.get_stats(), DeltaStats::new(0, 0, 3));
    }

    #[test]
    fn test_get_tree_missing_is_empty() {
        let delta = ImmutableDeltaTree::new();
        assert!(delta.get_tree(&sd_path(&["x", "y"])).is_empty());
    }
}
