//! Reinterpretation of untyped inventory structures written before trees
//! carried `Attributes`/`Table`/`Nodes` markers.
//!
//! * scalars become pairs
//! * objects become child nodes
//! * lists of scalars become one comma-joined pair, skipping falsy entries
//! * lists of flat objects become the table of a child node
//! * lists of nested objects become children named `"0"`, `"1"`, ...

use crate::codec::{is_scalar, row_from_json, value_from_json};
use crate::error::{Result, StoreError};
use invtree_core::{
    make_row_ident, Attributes, ImmutableTree, Row, SDKey, SDNodeName, SDPath, SDRowIdent,
    SDValue, Table,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

fn legacy_table(raw_rows: &[Value]) -> Result<Table> {
    let rows = raw_rows
        .iter()
        .map(|raw| match raw {
            Value::Object(raw) => row_from_json(raw),
            other => Err(StoreError::malformed(format!(
                "legacy table row must be an object, got {}",
                other
            ))),
        })
        .collect::<Result<Vec<Row>>>()?;
    let key_columns: Vec<SDKey> = rows
        .iter()
        .flat_map(|row| row.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut rows_by_ident: BTreeMap<SDRowIdent, Row> = BTreeMap::new();
    for row in rows {
        rows_by_ident
            .entry(make_row_ident(&key_columns, &row))
            .or_default()
            .extend(row);
    }
    Ok(Table::from_parts(key_columns, rows_by_ident, BTreeMap::new()))
}

fn joined_scalars(values: &[Value]) -> Result<String> {
    let mut parts = Vec::new();
    for raw in values {
        let value = value_from_json(raw)?;
        if value.is_truthy() {
            parts.push(value.to_string());
        }
    }
    Ok(parts.join(", "))
}

fn is_flat_rows(values: &[Value]) -> Result<bool> {
    for raw in values {
        match raw {
            Value::Object(row) => {
                if !row.values().all(is_scalar) {
                    return Ok(false);
                }
            }
            other => {
                return Err(StoreError::malformed(format!(
                    "mixed legacy list entry {}",
                    other
                )))
            }
        }
    }
    Ok(true)
}

fn child_path(path: &SDPath, name: &str) -> SDPath {
    let mut child = path.clone();
    child.push(SDNodeName::from(name));
    child
}

pub(crate) fn deserialize_legacy_tree(
    path: SDPath,
    raw: &Map<String, Value>,
) -> Result<ImmutableTree> {
    let mut pairs = Row::new();
    let mut tables: BTreeMap<SDNodeName, &[Value]> = BTreeMap::new();
    let mut nodes: BTreeMap<SDNodeName, Map<String, Value>> = BTreeMap::new();

    for (key, value) in raw {
        match value {
            Value::Object(map) => {
                if !map.is_empty() {
                    nodes.insert(key.clone(), map.clone());
                }
            }
            Value::Array(values) => {
                if values.is_empty() {
                    continue;
                }
                if values.iter().all(is_scalar) {
                    let joined = joined_scalars(values)?;
                    if !joined.is_empty() {
                        pairs.insert(key.clone(), SDValue::Str(joined));
                    }
                } else if is_flat_rows(values)? {
                    tables.insert(key.clone(), values);
                } else {
                    let indexed = values
                        .iter()
                        .enumerate()
                        .map(|(idx, entry)| (idx.to_string(), entry.clone()))
                        .collect();
                    nodes.insert(key.clone(), indexed);
                }
            }
            scalar => {
                pairs.insert(key.clone(), value_from_json(scalar)?);
            }
        }
    }

    let mut nodes_by_name = BTreeMap::new();
    for (name, raw_node) in &nodes {
        let node = deserialize_legacy_tree(child_path(&path, name), raw_node)?;
        nodes_by_name.insert(name.clone(), node);
    }
    for (name, raw_rows) in tables {
        let node = ImmutableTree::from_parts(
            child_path(&path, &name),
            Attributes::new(),
            legacy_table(raw_rows)?,
            BTreeMap::new(),
        );
        nodes_by_name.insert(name, node);
    }

    Ok(ImmutableTree::from_parts(
        path,
        Attributes::from_pairs(pairs),
        Table::new(),
        nodes_by_name,
    ))
}

#[cfg(test)]
mod tests {
    use crate::codec::deserialize_tree;
    use crate::error::StoreError;
    use invtree_core::{sd_path, SDValue, TreeView};
    use serde_json::json;

    #[test]
    fn test_legacy_heuristic() {
        let raw = json!({
            "hardware": {
                "cpu": {"arch": "x86_64", "cores": 4},
                "memory": {}
            },
            "software": {
                "packages": [
                    {"name": "bash", "version": "5.1"},
                    {"name": "zsh", "version": "5.8"}
                ],
                "tags": ["a", "", null, "b", 0, 3],
                "empty": []
            },
            "networking": {
                "interfaces": [
                    {"index": 1, "addresses": [{"ip": "10.0.0.1"}]},
                    {"index": 2}
                ]
            }
        });
        let tree = deserialize_tree(&raw).unwrap();

        assert_eq!(
            tree.get_attribute(&sd_path(&["hardware", "cpu"]), "cores"),
            Some(&SDValue::from(4))
        );
        assert!(!tree
            .get_tree(&sd_path(&["hardware"]))
            .nodes_by_name()
            .contains_key("memory"));

        let packages = tree.get_tree(&sd_path(&["software", "packages"]));
        assert_eq!(packages.table().key_columns(), ["name".to_string(), "version".to_string()]);
        assert_eq!(packages.table().rows_by_ident().len(), 2);
        assert_eq!(packages.path(), sd_path(&["software", "packages"]).as_slice());

        assert_eq!(
            tree.get_attribute(&sd_path(&["software"]), "tags"),
            Some(&SDValue::from("a, b, 3"))
        );
        assert_eq!(tree.get_attribute(&sd_path(&["software"]), "empty"), None);

        // nested list entries become indexed children, themselves re-read
        let first = tree.get_tree(&sd_path(&["networking", "interfaces", "0"]));
        assert_eq!(first.attributes().get("index"), Some(&SDValue::from(1)));
        let addresses = tree.get_tree(&sd_path(&["networking", "interfaces", "0", "addresses"]));
        assert_eq!(addresses.table().len(), 1);
        assert_eq!(
            tree.get_attribute(&sd_path(&["networking", "interfaces", "1"]), "index"),
            Some(&SDValue::from(2))
        );
    }

    #[test]
    fn test_joined_floats_render_like_python() {
        let raw = json!({"sizes": [1e20, 2.5, 1.5e-5, 0.0]});
        let tree = deserialize_tree(&raw).unwrap();
        assert_eq!(
            tree.get_attribute(&[], "sizes"),
            Some(&SDValue::from("1e+20, 2.5, 1.5e-05"))
        );
    }

    #[test]
    fn test_partial_markers_read_as_legacy() {
        let raw = json!({"Attributes": {"Pairs": {"a": 1}}, "Table": {}});
        let tree = deserialize_tree(&raw).unwrap();
        // "Attributes" is just another node here
        assert_eq!(
            tree.get_tree(&sd_path(&["Attributes", "Pairs"])).attributes().get("a"),
            Some(&SDValue::from(1))
        );
    }

    #[test]
    fn test_mixed_lists() {
        // a nested first entry makes the list indexed; scalar entries become pairs
        let raw = json!({"entries": [{"a": [1]}, "scalar"]});
        let tree = deserialize_tree(&raw).unwrap();
        assert_eq!(
            tree.get_attribute(&sd_path(&["entries"]), "1"),
            Some(&SDValue::from("scalar"))
        );
        assert_eq!(
            tree.get_attribute(&sd_path(&["entries", "0"]), "a"),
            Some(&SDValue::from("1"))
        );

        let raw = json!({"entries": [1, {"a": 1}]});
        assert!(matches!(
            deserialize_tree(&raw),
            Err(StoreError::Malformed(_))
        ));
    }
}
