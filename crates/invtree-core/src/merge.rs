//! Merging two trees, for example inventory and status data of one host.
//!
//! Later wins: on any collision the right-hand side overrides the left.

use crate::tree::{Attributes, ImmutableTree, Table, TreeView};
use crate::value::{make_row_ident, Row, SDKey, SDRowIdent};
use std::collections::{BTreeMap, BTreeSet};

fn merge_attributes(left: &Attributes, right: &Attributes) -> Attributes {
    let mut pairs = left.pairs().clone();
    pairs.extend(right.pairs().iter().map(|(k, v)| (k.clone(), v.clone())));
    let mut retentions = left.retentions().clone();
    retentions.extend(right.retentions().iter().map(|(k, v)| (k.clone(), *v)));
    Attributes::from_parts(pairs, retentions)
}

fn merge_table_retentions(left: &Table, right: &Table) -> crate::tree::TableRetentions {
    let mut retentions = left.retentions().clone();
    retentions.extend(
        right
            .retentions()
            .iter()
            .map(|(ident, intervals)| (ident.clone(), intervals.clone())),
    );
    retentions
}

fn merge_tables_by_ident(key_columns: &[SDKey], left: &Table, right: &Table) -> Table {
    let mut rows_by_ident: BTreeMap<SDRowIdent, Row> = left.rows_by_ident().clone();
    for (ident, row) in right.rows_by_ident() {
        rows_by_ident
            .entry(ident.clone())
            .or_default()
            .extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Table::from_parts(
        key_columns.to_vec(),
        rows_by_ident,
        merge_table_retentions(left, right),
    )
}

fn merge_tables(left: &Table, right: &Table) -> Table {
    let (lkc, rkc) = (left.key_columns(), right.key_columns());
    if rkc.is_empty() || lkc == rkc {
        return merge_tables_by_ident(lkc, left, right);
    }
    if lkc.is_empty() {
        return merge_tables_by_ident(rkc, left, right);
    }

    // Differing key columns: legacy tables or inventory vs. status data.
    // Rows are re-identified by the columns both sides share.
    let shared: BTreeSet<&SDKey> = lkc.iter().collect::<BTreeSet<_>>();
    let key_columns: Vec<SDKey> = rkc
        .iter()
        .filter(|k| shared.contains(k))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut rows_by_ident: BTreeMap<SDRowIdent, Row> = BTreeMap::new();
    for row in left.rows().chain(right.rows()) {
        rows_by_ident
            .entry(make_row_ident(&key_columns, row))
            .or_default()
            .extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Table::from_parts(key_columns, rows_by_ident, merge_table_retentions(left, right))
}

/// Merge `right` into `left`, producing a new tree rooted at `left`'s path.
pub fn merge_trees<L: TreeView, R: TreeView>(left: &L, right: &R) -> ImmutableTree {
    let mut nodes_by_name = BTreeMap::new();
    for (name, node) in left.nodes_by_name() {
        let merged = match right.nodes_by_name().get(name) {
            Some(other) => merge_trees(node, other),
            None => node.to_immutable(),
        };
        nodes_by_name.insert(name.clone(), merged);
    }
    for (name, node) in right.nodes_by_name() {
        if !left.nodes_by_name().contains_key(name) {
            nodes_by_name.insert(name.clone(), node.to_immutable());
        }
    }
    ImmutableTree::from_parts(
        left.path().to_vec(),
        merge_attributes(left.attributes(), right.attributes()),
        merge_tables(left.table(), right.table()),
        nodes_by_name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::MutableTree;
    use crate::value::{row, sd_path, SDValue};

    fn kc(names: &[&str]) -> Vec<SDKey> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_merge_attributes_right_wins() {
        let mut left = MutableTree::new();
        left.add_pairs(&[], row([("a", 1), ("b", 2)]));
        let mut right = MutableTree::new();
        right.add_pairs(&[], row([("b", 3), ("c", 4)]));
        let merged = merge_trees(&left, &right);
        assert_eq!(merged.attributes().pairs(), &row([("a", 1), ("b", 3), ("c", 4)]));
    }

    #[test]
    fn test_merge_tables_same_key_columns() {
        let path = sd_path(&["interfaces"]);
        let mut left = MutableTree::new();
        left.add_rows(
            &path,
            &kc(&["index"]),
            vec![row([("index", SDValue::from(1)), ("speed", SDValue::from(100))])],
        );
        let mut right = MutableTree::new();
        right.add_rows(
            &path,
            &kc(&["index"]),
            vec![
                row([("index", SDValue::from(1)), ("state", SDValue::from("up"))]),
                row([("index", SDValue::from(2)), ("state", SDValue::from("down"))]),
            ],
        );
        let merged = merge_trees(&left, &right);
        let table = merged.get_tree(&path).table();
        assert_eq!(table.key_columns(), kc(&["index"]).as_slice());
        assert_eq!(
            table.rows_by_ident()[&vec![SDValue::from(1)]],
            row([
                ("index", SDValue::from(1)),
                ("speed", SDValue::from(100)),
                ("state", SDValue::from("up")),
            ])
        );
        assert_eq!(table.rows_by_ident().len(), 2);
    }

    #[test]
    fn test_merge_tables_one_side_key_columns() {
        let left = ImmutableTree::from_parts(
            Vec::new(),
            Attributes::new(),
            Table::from_parts(
                Vec::new(),
                BTreeMap::from([(Vec::new(), row([("x", 1)]))]),
                BTreeMap::new(),
            ),
            BTreeMap::new(),
        );
        let mut right = MutableTree::new();
        right.add_rows(&[], &kc(&["k"]), vec![row([("k", 1)])]);
        let merged = merge_trees(&left, &right);
        assert_eq!(merged.table().key_columns(), kc(&["k"]).as_slice());
        assert_eq!(merged.table().rows_by_ident().len(), 2);
    }

    #[test]
    fn test_merge_tables_different_key_columns() {
        let mut left = MutableTree::new();
        left.add_rows(
            &[],
            &kc(&["a", "b"]),
            vec![row([("a", 1), ("b", 2), ("l", 3)])],
        );
        let mut right = MutableTree::new();
        right.add_rows(
            &[],
            &kc(&["a", "c"]),
            vec![row([("a", 1), ("c", 5), ("r", 6)])],
        );
        let merged = merge_trees(&left, &right);
        let table = merged.table();
        assert_eq!(table.key_columns(), kc(&["a"]).as_slice());
        assert_eq!(
            table.rows().collect::<Vec<_>>(),
            vec![&row([("a", 1), ("b", 2), ("c", 5), ("l", 3), ("r", 6)])]
        );
    }

    #[test]
    fn test_merge_nodes() {
        let mut left = MutableTree::new();
        left.add_pairs(&sd_path(&["only_left"]), row([("k", 1)]));
        left.add_pairs(&sd_path(&["both", "deep"]), row([("k", 1)]));
        let mut right = MutableTree::new();
        right.add_pairs(&sd_path(&["only_right"]), row([("k", 2)]));
        right.add_pairs(&sd_path(&["both", "deep"]), row([("j", 2)]));
        let merged = merge_trees(&left, &right);
        assert_eq!(merged.len(), 4);
        assert_eq!(
            merged.get_tree(&sd_path(&["both", "deep"])).attributes().pairs(),
            &row([("j", 2), ("k", 1)])
        );
        assert_eq!(
            merged.get_tree(&sd_path(&["both", "deep"])).path(),
            sd_path(&["both", "deep"]).as_slice()
        );
    }
}
