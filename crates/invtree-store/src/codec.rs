//! JSON wire format of inventory trees and delta trees.
//!
//! A node is written as
//!
//! ```json
//! {
//!   "Attributes": {"Pairs": {...}, "Retentions": {"key": [cached_at, cache_interval, retention_interval, "current"]}},
//!   "Table": {"KeyColumns": [...], "Rows": [...], "Retentions": {"[\"ident\"]": {"column": [...]}}},
//!   "Nodes": {"name": {...}}
//! }
//! ```
//!
//! Empty parts inside `Attributes` and `Table` are left out and children
//! without facts are skipped. Objects lacking the three markers are read
//! with the legacy heuristic in [`crate::legacy`].

use crate::error::{Result, StoreError};
use crate::legacy::deserialize_legacy_tree;
use invtree_core::{
    make_row_ident, Attributes, ImmutableTree, RetentionInterval, Row, SDKey, SDNodeName,
    SDPath, SDRowIdent, SDValue, Table, TableRetentions, TreeView,
};
use invtree_delta::{
    DeltaAttributes, DeltaRow, DeltaTable, ImmutableDeltaTree, SDDeltaValue,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

const ATTRIBUTES: &str = "Attributes";
const TABLE: &str = "Table";
const NODES: &str = "Nodes";
const PAIRS: &str = "Pairs";
const KEY_COLUMNS: &str = "KeyColumns";
const ROWS: &str = "Rows";
const RETENTIONS: &str = "Retentions";

// Values

/// JSON has no NaN or infinity, so non-finite floats are written as `null`
/// and read back as [`SDValue::Null`]. This is the only lossy mapping.
pub(crate) fn value_to_json(value: &SDValue) -> Value {
    match value {
        SDValue::Null => Value::Null,
        SDValue::Bool(b) => Value::Bool(*b),
        SDValue::Int(i) => Value::from(*i),
        SDValue::Float(f) if !f.is_finite() => Value::Null,
        SDValue::Float(f) => Value::from(*f),
        SDValue::Str(s) => Value::String(s.clone()),
    }
}

pub(crate) fn value_from_json(raw: &Value) -> Result<SDValue> {
    match raw {
        Value::Null => Ok(SDValue::Null),
        Value::Bool(b) => Ok(SDValue::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(SDValue::Int(i)),
            None => n
                .as_f64()
                .map(SDValue::Float)
                .ok_or_else(|| StoreError::malformed(format!("unrepresentable number {}", n))),
        },
        Value::String(s) => Ok(SDValue::Str(s.clone())),
        other => Err(StoreError::malformed(format!(
            "expected a scalar value, got {}",
            other
        ))),
    }
}

pub(crate) fn is_scalar(raw: &Value) -> bool {
    !matches!(raw, Value::Array(_) | Value::Object(_))
}

fn row_to_json(row: &Row) -> Value {
    Value::Object(
        row.iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect(),
    )
}

pub(crate) fn row_from_json(raw: &Map<String, Value>) -> Result<Row> {
    raw.iter()
        .map(|(k, v)| Ok((k.clone(), value_from_json(v)?)))
        .collect()
}

fn as_object<'a>(raw: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    raw.as_object()
        .ok_or_else(|| StoreError::malformed(format!("{} must be an object, got {}", what, raw)))
}

fn as_array<'a>(raw: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    raw.as_array()
        .ok_or_else(|| StoreError::malformed(format!("{} must be an array, got {}", what, raw)))
}

fn keys_from_json(raw: &Value) -> Result<Vec<SDKey>> {
    as_array(raw, KEY_COLUMNS)?
        .iter()
        .map(|key| {
            key.as_str()
                .map(str::to_string)
                .ok_or_else(|| StoreError::malformed(format!("key column {} is not a string", key)))
        })
        .collect()
}

/// `raw[key]`; a missing or null entry reads as empty.
fn section<'a>(raw: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    raw.get(key).filter(|v| !v.is_null())
}

// Retentions

fn interval_to_json(interval: &RetentionInterval) -> Value {
    json!([
        interval.cached_at,
        interval.cache_interval,
        interval.retention_interval,
        interval.source.to_string(),
    ])
}

fn interval_from_json(raw: &Value) -> Result<RetentionInterval> {
    serde_json::from_value(raw.clone())
        .map_err(|e| StoreError::malformed(format!("retention interval {}: {}", raw, e)))
}

fn intervals_from_json(raw: &Value) -> Result<BTreeMap<SDKey, RetentionInterval>> {
    as_object(raw, RETENTIONS)?
        .iter()
        .map(|(key, raw)| Ok((key.clone(), interval_from_json(raw)?)))
        .collect()
}

/// Row idents key the table retentions as the JSON text of the ident array.
fn ident_to_key(ident: &SDRowIdent) -> String {
    Value::Array(ident.iter().map(value_to_json).collect()).to_string()
}

fn ident_from_key(key: &str) -> Result<SDRowIdent> {
    let raw: Value = serde_json::from_str(key)
        .map_err(|e| StoreError::malformed(format!("row ident {:?}: {}", key, e)))?;
    as_array(&raw, "row ident")?
        .iter()
        .map(value_from_json)
        .collect()
}

// Trees

fn serialize_attributes(attributes: &Attributes) -> Value {
    let mut raw = Map::new();
    if !attributes.pairs().is_empty() {
        raw.insert(PAIRS.to_string(), row_to_json(attributes.pairs()));
    }
    if !attributes.retentions().is_empty() {
        raw.insert(
            RETENTIONS.to_string(),
            Value::Object(
                attributes
                    .retentions()
                    .iter()
                    .map(|(k, v)| (k.clone(), interval_to_json(v)))
                    .collect(),
            ),
        );
    }
    Value::Object(raw)
}

fn serialize_table(table: &Table) -> Value {
    let mut raw = Map::new();
    if !table.rows_by_ident().is_empty() {
        raw.insert(KEY_COLUMNS.to_string(), json!(table.key_columns()));
        raw.insert(
            ROWS.to_string(),
            Value::Array(table.rows().map(row_to_json).collect()),
        );
    }
    if !table.retentions().is_empty() {
        raw.insert(
            RETENTIONS.to_string(),
            Value::Object(
                table
                    .retentions()
                    .iter()
                    .map(|(ident, intervals)| {
                        let intervals = intervals
                            .iter()
                            .map(|(k, v)| (k.clone(), interval_to_json(v)))
                            .collect();
                        (ident_to_key(ident), Value::Object(intervals))
                    })
                    .collect(),
            ),
        );
    }
    Value::Object(raw)
}

/// Wire form of any tree. Children without facts are dropped; NaN and
/// infinite floats are written as `null`.
pub fn serialize_tree<T: TreeView>(tree: &T) -> Value {
    let nodes: Map<String, Value> = tree
        .nodes_by_name()
        .iter()
        .filter(|(_, node)| !node.is_empty())
        .map(|(name, node)| (name.clone(), serialize_tree(node)))
        .collect();
    json!({
        ATTRIBUTES: serialize_attributes(tree.attributes()),
        TABLE: serialize_table(tree.table()),
        NODES: Value::Object(nodes),
    })
}

fn deserialize_attributes(raw: Option<&Value>) -> Result<Attributes> {
    let Some(raw) = raw else {
        return Ok(Attributes::new());
    };
    let raw = as_object(raw, ATTRIBUTES)?;
    let pairs = match section(raw, PAIRS) {
        Some(pairs) => row_from_json(as_object(pairs, PAIRS)?)?,
        None => Row::new(),
    };
    let retentions = match section(raw, RETENTIONS) {
        Some(retentions) => intervals_from_json(retentions)?,
        None => BTreeMap::new(),
    };
    Ok(Attributes::from_parts(pairs, retentions))
}

fn deserialize_table(raw: Option<&Value>) -> Result<Table> {
    let Some(raw) = raw else {
        return Ok(Table::new());
    };
    let raw = as_object(raw, TABLE)?;
    let key_columns = match section(raw, KEY_COLUMNS) {
        Some(key_columns) => keys_from_json(key_columns)?,
        None => Vec::new(),
    };
    let mut rows_by_ident: BTreeMap<SDRowIdent, Row> = BTreeMap::new();
    if let Some(rows) = section(raw, ROWS) {
        for raw_row in as_array(rows, ROWS)? {
            let row = row_from_json(as_object(raw_row, "row")?)?;
            if !row.is_empty() {
                rows_by_ident
                    .entry(make_row_ident(&key_columns, &row))
                    .or_default()
                    .extend(row);
            }
        }
    }
    let mut retentions = TableRetentions::new();
    if let Some(raw_retentions) = section(raw, RETENTIONS) {
        for (key, intervals) in as_object(raw_retentions, RETENTIONS)? {
            retentions.insert(ident_from_key(key)?, intervals_from_json(intervals)?);
        }
    }
    Ok(Table::from_parts(key_columns, rows_by_ident, retentions))
}

fn deserialize_node(path: SDPath, raw: &Map<String, Value>) -> Result<ImmutableTree> {
    let attributes = deserialize_attributes(section(raw, ATTRIBUTES))?;
    let table = deserialize_table(section(raw, TABLE))?;
    let mut nodes_by_name = BTreeMap::new();
    if let Some(nodes) = section(raw, NODES) {
        for (name, raw_node) in as_object(nodes, NODES)? {
            let mut child_path = path.clone();
            child_path.push(SDNodeName::from(name.as_str()));
            let child = deserialize_node(child_path, as_object(raw_node, "node")?)?;
            nodes_by_name.insert(name.clone(), child);
        }
    }
    Ok(ImmutableTree::from_parts(path, attributes, table, nodes_by_name))
}

/// Read a tree written by [`serialize_tree`], or a legacy structure without
/// the `Attributes`/`Table`/`Nodes` markers.
///
/// # Errors
///
/// Returns [`StoreError::Malformed`] if `raw` is not an object or any part
/// has the wrong shape.
pub fn deserialize_tree(raw: &Value) -> Result<ImmutableTree> {
    let raw = as_object(raw, "tree")?;
    if [ATTRIBUTES, TABLE, NODES].iter().all(|k| raw.contains_key(*k)) {
        deserialize_node(Vec::new(), raw)
    } else {
        deserialize_legacy_tree(Vec::new(), raw)
    }
}

// Delta trees

fn delta_row_to_json(row: &DeltaRow) -> Value {
    Value::Object(
        row.iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    Value::Array(vec![value_to_json(&v.old), value_to_json(&v.new)]),
                )
            })
            .collect(),
    )
}

fn delta_row_from_json(raw: &Value) -> Result<DeltaRow> {
    as_object(raw, "delta row")?
        .iter()
        .map(|(k, v)| {
            let pair = as_array(v, "delta value")?;
            match pair.as_slice() {
                [old, new] => Ok((
                    k.clone(),
                    SDDeltaValue::new(value_from_json(old)?, value_from_json(new)?),
                )),
                _ => Err(StoreError::malformed(format!(
                    "delta value {} must be an [old, new] pair",
                    v
                ))),
            }
        })
        .collect()
}

/// Wire form of a delta tree; values are `[old, new]` pairs.
pub fn serialize_delta_tree(tree: &ImmutableDeltaTree) -> Value {
    let attributes = if tree.attributes.is_empty() {
        json!({})
    } else {
        json!({ PAIRS: delta_row_to_json(&tree.attributes.pairs) })
    };
    let table = if tree.table.rows.is_empty() {
        json!({})
    } else {
        json!({
            KEY_COLUMNS: tree.table.key_columns,
            ROWS: tree.table.rows.iter().map(delta_row_to_json).collect::<Vec<_>>(),
        })
    };
    let nodes: Map<String, Value> = tree
        .nodes_by_name
        .iter()
        .filter(|(_, node)| !node.is_empty())
        .map(|(name, node)| (name.clone(), serialize_delta_tree(node)))
        .collect();
    json!({
        ATTRIBUTES: attributes,
        TABLE: table,
        NODES: Value::Object(nodes),
    })
}

fn deserialize_delta_node(path: SDPath, raw: &Value) -> Result<ImmutableDeltaTree> {
    let raw = as_object(raw, "delta node")?;
    let mut tree = ImmutableDeltaTree::with_path(path);
    if let Some(attributes) = section(raw, ATTRIBUTES) {
        if let Some(pairs) = section(as_object(attributes, ATTRIBUTES)?, PAIRS) {
            tree.attributes = DeltaAttributes {
                pairs: delta_row_from_json(pairs)?,
            };
        }
    }
    if let Some(table) = section(raw, TABLE) {
        let table = as_object(table, TABLE)?;
        tree.table = DeltaTable {
            key_columns: match section(table, KEY_COLUMNS) {
                Some(key_columns) => keys_from_json(key_columns)?,
                None => Vec::new(),
            },
            rows: match section(table, ROWS) {
                Some(rows) => as_array(rows, ROWS)?
                    .iter()
                    .map(delta_row_from_json)
                    .collect::<Result<_>>()?,
                None => Vec::new(),
            },
        };
    }
    if let Some(nodes) = section(raw, NODES) {
        for (name, raw_node) in as_object(nodes, NODES)? {
            let mut child_path = tree.path.clone();
            child_path.push(name.clone());
            let child = deserialize_delta_node(child_path, raw_node)?;
            tree.nodes_by_name.insert(name.clone(), child);
        }
    }
    Ok(tree)
}

pub fn deserialize_delta_tree(raw: &Value) -> Result<ImmutableDeltaTree> {
    deserialize_delta_node(Vec::new(), raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use invtree_core::{
        row, sd_path, MutableTree, RetentionSource, SDChoice, SDRetentionFilterChoices,
    };
    use invtree_delta::compare_trees;

    #[test]
    fn test_empty_parts_are_omitted() {
        let mut tree = MutableTree::new();
        tree.add_pairs(&sd_path(&["hardware", "cpu"]), row([("arch", "x86_64")]));
        tree.setdefault_node(&sd_path(&["empty"]));

        let raw = serialize_tree(&tree);
        assert_eq!(
            raw,
            json!({
                "Attributes": {},
                "Table": {},
                "Nodes": {
                    "hardware": {
                        "Attributes": {},
                        "Table": {},
                        "Nodes": {
                            "cpu": {
                                "Attributes": {"Pairs": {"arch": "x86_64"}},
                                "Table": {},
                                "Nodes": {}
                            }
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn test_non_finite_floats_are_written_as_null() {
        let mut tree = MutableTree::new();
        tree.add_pairs(
            &[],
            row([
                ("nan", SDValue::Float(f64::NAN)),
                ("inf", SDValue::Float(f64::INFINITY)),
                ("half", SDValue::Float(0.5)),
            ]),
        );
        let raw = serialize_tree(&tree);
        assert_eq!(
            raw["Attributes"]["Pairs"],
            json!({"nan": null, "inf": null, "half": 0.5})
        );
        let restored = deserialize_tree(&raw).unwrap();
        assert_eq!(restored.get_attribute(&[], "nan"), Some(&SDValue::Null));
        assert_eq!(restored.get_attribute(&[], "half"), Some(&SDValue::Float(0.5)));
    }

    #[test]
    fn test_retentions_survive_a_persistence_cycle() {
        let mut choices = SDRetentionFilterChoices::new(Vec::new(), 8);
        choices.add_pairs_choice(SDChoice::All, (1, 2));
        choices.add_columns_choice(SDChoice::All, (1, 2));

        let mut first = MutableTree::new();
        first.add_pairs(&[], row([("old", "x")]));
        first.add_rows(
            &[],
            &["kc".to_string()],
            vec![row([("kc", SDValue::from("KC")), ("c1", SDValue::from(1))])],
        );
        first.update(5, &ImmutableTree::new(), &choices);

        let raw = serialize_tree(&first);
        assert_eq!(raw["Attributes"]["Retentions"]["old"], json!([1, 2, 8, "current"]));
        assert_eq!(
            raw["Table"]["Retentions"]["[\"KC\"]"]["c1"],
            json!([1, 2, 8, "current"])
        );
        let persisted = deserialize_tree(&raw).unwrap();
        assert_eq!(persisted, first);
        assert_eq!(persisted.table().retentions(), first.table().retentions());

        // next cycle sees nothing, so everything is carried from the persisted tree
        let mut second = MutableTree::new();
        second.update(6, &persisted, &choices);
        assert_eq!(second, first);
        let raw = serialize_tree(&second);
        assert_eq!(raw["Attributes"]["Retentions"]["old"], json!([1, 2, 8, "previous"]));
        let interval = deserialize_tree(&raw).unwrap().attributes().retentions()["old"];
        assert_eq!(interval.source, RetentionSource::Previous);
    }

    #[test]
    fn test_three_tuple_retention_defaults_to_current() {
        let raw = json!({
            "Attributes": {"Pairs": {"a": 1}, "Retentions": {"a": [1, 2, 3]}},
            "Table": {},
            "Nodes": {}
        });
        let tree = deserialize_tree(&raw).unwrap();
        assert_eq!(
            tree.attributes().retentions()["a"].source,
            RetentionSource::Current
        );
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let raw = json!({
            "Attributes": {},
            "Table": {},
            "Nodes": {"a": {"Attributes": {"Pairs": {"k": "v"}}}}
        });
        let tree = deserialize_tree(&raw).unwrap();
        assert_eq!(tree.get_attribute(&sd_path(&["a"]), "k"), Some(&SDValue::from("v")));
        assert_eq!(tree.get_tree(&sd_path(&["a"])).path(), sd_path(&["a"]).as_slice());
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        assert!(matches!(
            deserialize_tree(&json!([1, 2])),
            Err(StoreError::Malformed(_))
        ));
        let bad_retention = json!({
            "Attributes": {"Pairs": {"a": 1}, "Retentions": {"a": [1, 2]}},
            "Table": {},
            "Nodes": {}
        });
        assert!(matches!(
            deserialize_tree(&bad_retention),
            Err(StoreError::Malformed(_))
        ));
        let bad_node = json!({"Attributes": {}, "Table": {}, "Nodes": {"a": 5}});
        assert!(deserialize_tree(&bad_node).is_err());
    }

    #[test]
    fn test_delta_tree_round_trip() {
        let mut current = MutableTree::new();
        current.add_pairs(&sd_path(&["a"]), row([("k", 2)]));
        current.add_rows(
            &sd_path(&["a", "b"]),
            &["n".to_string()],
            vec![row([("n", "x"), ("v", "1")])],
        );
        let mut previous = MutableTree::new();
        previous.add_pairs(&sd_path(&["a"]), row([("k", 1)]));

        let delta = compare_trees(&current, &previous);
        let raw = serialize_delta_tree(&delta);
        assert_eq!(raw["Nodes"]["a"]["Attributes"]["Pairs"]["k"], json!([1, 2]));
        assert_eq!(raw["Attributes"], json!({}));
        let back = deserialize_delta_tree(&raw).unwrap();
        assert_eq!(back, delta);
        assert_eq!(back.get_stats(), delta.get_stats());
    }
}
