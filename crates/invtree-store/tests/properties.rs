//! Property-based tests for inventory persistence
//!
//! These tests verify:
//!  - Trees survive serialization unchanged
//!  - Serialized trees are always read back in typed form
//!  - Delta trees keep their change counts across serialization
//!  - Saving and loading through the store preserves the tree

use invtree_core::{MutableTree, Row, SDPath, SDValue};
use invtree_delta::compare_trees;
use invtree_store::{
    deserialize_delta_tree, deserialize_tree, make_meta, serialize_delta_tree, serialize_tree,
    InventoryStore,
};
use proptest::prelude::*;
use tempfile::TempDir;

fn value_strategy() -> impl Strategy<Value = SDValue> {
    prop_oneof![
        Just(SDValue::Null),
        any::<bool>().prop_map(SDValue::Bool),
        (-100i64..100).prop_map(SDValue::Int),
        "[a-z ]{0,4}".prop_map(SDValue::Str),
    ]
}

fn path_strategy() -> impl Strategy<Value = SDPath> {
    prop::collection::vec(
        prop::sample::select(vec!["a", "b", "c"]).prop_map(String::from),
        0..3,
    )
}

fn pairs_strategy() -> impl Strategy<Value = Row> {
    prop::collection::btree_map("[a-d]", value_strategy(), 0..4)
}

fn tree_strategy() -> impl Strategy<Value = MutableTree> {
    prop::collection::vec(
        (
            path_strategy(),
            pairs_strategy(),
            prop::collection::vec((0i64..4, pairs_strategy()), 0..4),
        ),
        0..6,
    )
    .prop_map(|entries| {
        let mut tree = MutableTree::new();
        for (path, pairs, rows) in entries {
            let rows = rows
                .into_iter()
                .map(|(k, mut row)| {
                    row.insert("k".to_string(), SDValue::Int(k));
                    row
                })
                .collect();
            tree.add(&path, Some(pairs), &["k".to_string()], rows);
        }
        tree
    })
}

proptest! {
    #[test]
    fn serialization_preserves_trees(tree in tree_strategy()) {
        let restored = deserialize_tree(&serialize_tree(&tree)).unwrap();
        prop_assert_eq!(restored, tree);
    }

    #[test]
    fn serialized_trees_carry_all_sections(tree in tree_strategy()) {
        let raw = serialize_tree(&tree);
        let raw = raw.as_object().unwrap();
        for key in ["Attributes", "Table", "Nodes"] {
            prop_assert!(raw.contains_key(key));
        }
    }

    #[test]
    fn delta_serialization_keeps_counts(a in tree_strategy(), b in tree_strategy()) {
        let delta = compare_trees(&a, &b);
        let restored = deserialize_delta_tree(&serialize_delta_tree(&delta)).unwrap();
        prop_assert_eq!(restored.get_stats(), delta.get_stats());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn store_round_trip(tree in tree_strategy(), do_archive in any::<bool>()) {
        let dir = TempDir::new().unwrap();
        let store = InventoryStore::new(dir.path());
        store.save_inventory_tree("host", &tree, &make_meta(do_archive)).unwrap();
        prop_assert_eq!(store.load_inventory_tree("host").unwrap(), tree);
    }
}
