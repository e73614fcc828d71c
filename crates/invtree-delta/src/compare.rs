//! Comparing a current tree (left) against a previous one (right).

use crate::tree::{DeltaAttributes, DeltaRow, DeltaTable, ImmutableDeltaTree};
use crate::value::{encode_as_new, encode_as_removed, SDDeltaValue};
use invtree_core::{trees_equal, Attributes, Row, SDKey, Table, TreeView};
use std::collections::{BTreeMap, BTreeSet};

struct DeltaDict {
    result: DeltaRow,
    has_changes: bool,
}

impl DeltaDict {
    /// `keep_identical` keeps equal values as `(value, value)` pairs.
    fn compare(left: &Row, right: &Row, keep_identical: bool) -> Self {
        let mut result = DeltaRow::new();
        let mut has_changes = false;
        for (key, left_value) in left {
            match right.get(key) {
                Some(right_value) if right_value != left_value => {
                    result.insert(
                        key.clone(),
                        SDDeltaValue::new(right_value.clone(), left_value.clone()),
                    );
                    has_changes = true;
                }
                Some(_) => {
                    if keep_identical {
                        result.insert(
                            key.clone(),
                            SDDeltaValue::new(left_value.clone(), left_value.clone()),
                        );
                    }
                }
                None => {
                    result.insert(key.clone(), encode_as_new(left_value.clone()));
                    has_changes = true;
                }
            }
        }
        for (key, right_value) in right {
            if !left.contains_key(key) {
                result.insert(key.clone(), encode_as_removed(right_value.clone()));
                has_changes = true;
            }
        }
        Self {
            result,
            has_changes,
        }
    }
}

fn compare_attributes(left: &Attributes, right: &Attributes) -> DeltaAttributes {
    DeltaAttributes {
        pairs: DeltaDict::compare(left.pairs(), right.pairs(), false).result,
    }
}

fn encode_row(row: &Row, encode_as: crate::value::EncodeAs) -> DeltaRow {
    row.iter()
        .map(|(k, v)| (k.clone(), encode_as(v.clone())))
        .collect()
}

fn compare_tables(left: &Table, right: &Table) -> DeltaTable {
    let left_rows = left.rows_by_ident();
    let right_rows = right.rows_by_ident();
    let mut rows = Vec::new();

    for (ident, row) in left_rows {
        if !right_rows.contains_key(ident) {
            rows.push(encode_row(row, encode_as_new));
        }
    }
    // A row with at least one change is emitted in full, so a changed package
    // version still shows the package name.
    for (ident, row) in left_rows {
        if let Some(other) = right_rows.get(ident) {
            let compared = DeltaDict::compare(row, other, true);
            if compared.has_changes {
                rows.push(compared.result);
            }
        }
    }
    for (ident, row) in right_rows {
        if !left_rows.contains_key(ident) {
            rows.push(encode_row(row, encode_as_removed));
        }
    }

    let key_columns: BTreeSet<&SDKey> = left
        .key_columns()
        .iter()
        .chain(right.key_columns())
        .collect();
    DeltaTable {
        key_columns: key_columns.into_iter().cloned().collect(),
        rows,
    }
}

/// Delta from `right` (previous) to `left` (current). Old values come from
/// the right, new values from the left.
pub fn compare_trees<L: TreeView, R: TreeView>(left: &L, right: &R) -> ImmutableDeltaTree {
    let mut nodes_by_name = BTreeMap::new();
    for (name, child_left) in left.nodes_by_name() {
        match right.nodes_by_name().get(name) {
            None => {
                if !child_left.is_empty() {
                    nodes_by_name.insert(
                        name.clone(),
                        ImmutableDeltaTree::from_tree(child_left, encode_as_new),
                    );
                }
            }
            Some(child_right) => {
                if trees_equal(child_left, child_right) {
                    continue;
                }
                let node = compare_trees(child_left, child_right);
                if !node.get_stats().is_empty() {
                    nodes_by_name.insert(name.clone(), node);
                }
            }
        }
    }
    for (name, child_right) in right.nodes_by_name() {
        if !left.nodes_by_name().contains_key(name) && !child_right.is_empty() {
            nodes_by_name.insert(
                name.clone(),
                ImmutableDeltaTree::from_tree(child_right, encode_as_removed),
            );
        }
    }
    ImmutableDeltaTree {
        path: left.path().to_vec(),
        attributes: compare_attributes(left.attributes(), right.attributes()),
        table: compare_tables(left.table(), right.table()),
        nodes_by_name,
    }
}
