//! The gzip envelope `{"meta": {...}, "raw_tree": {...}}` and the dumps
//! older installations produced.

use crate::codec::deserialize_tree;
use crate::error::{Result, StoreError};
use crate::literal;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use invtree_core::ImmutableTree;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::io::{Read, Write};

/// The only envelope version written and understood.
pub const META_VERSION: &str = "1";

/// Envelope metadata; `do_archive` tells the next inventory run whether
/// the current tree should be archived before it is replaced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SDMeta {
    pub version: String,
    pub do_archive: bool,
}

pub fn make_meta(do_archive: bool) -> SDMeta {
    SDMeta {
        version: META_VERSION.to_string(),
        do_archive,
    }
}

/// Envelope contents; `raw_tree` always holds the three typed sections.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SDMetaAndRawTree {
    pub meta: SDMeta,
    pub raw_tree: Value,
}

impl SDMetaAndRawTree {
    pub fn tree(&self) -> Result<ImmutableTree> {
        deserialize_tree(&self.raw_tree)
    }
}

fn typed_sections(raw: &Map<String, Value>) -> Value {
    let get = |key: &str| raw.get(key).cloned().unwrap_or_else(|| json!({}));
    json!({
        "Attributes": get("Attributes"),
        "Table": get("Table"),
        "Nodes": get("Nodes"),
    })
}

fn parse_raw_meta(raw: &Value) -> Result<SDMeta> {
    let raw = raw
        .as_object()
        .ok_or_else(|| StoreError::malformed(format!("meta must be an object, got {}", raw)))?;
    let version = match raw.get("version") {
        Some(Value::String(version)) => version,
        other => {
            return Err(StoreError::malformed(format!(
                "meta version must be a string, got {:?}",
                other
            )))
        }
    };
    let do_archive = match raw.get("do_archive") {
        Some(Value::Bool(do_archive)) => *do_archive,
        other => {
            return Err(StoreError::malformed(format!(
                "do_archive must be a boolean, got {:?}",
                other
            )))
        }
    };
    if version != META_VERSION {
        return Err(StoreError::UnsupportedVersion(version.clone()));
    }
    Ok(SDMeta {
        version: version.clone(),
        do_archive,
    })
}

/// Normalize either envelope shape to [`SDMetaAndRawTree`].
///
/// The current shape has exactly the keys `meta` and `raw_tree`. Anything
/// else is the pre-meta shape: the tree sections at top level next to an
/// optional `meta_do_archive` flag (default `true`); other `meta_*` keys are
/// ignored.
pub fn parse_from_unzipped(raw: &Value) -> Result<SDMetaAndRawTree> {
    let raw = raw
        .as_object()
        .ok_or_else(|| StoreError::malformed(format!("envelope must be an object, got {}", raw)))?;
    if raw.len() == 2 && raw.contains_key("meta") && raw.contains_key("raw_tree") {
        let raw_tree = raw["raw_tree"].as_object().ok_or_else(|| {
            StoreError::malformed(format!("raw_tree must be an object, got {}", raw["raw_tree"]))
        })?;
        return Ok(SDMetaAndRawTree {
            meta: parse_raw_meta(&raw["meta"])?,
            raw_tree: typed_sections(raw_tree),
        });
    }
    let do_archive = match raw.get("meta_do_archive") {
        None => true,
        Some(Value::Bool(do_archive)) => *do_archive,
        Some(other) => {
            return Err(StoreError::malformed(format!(
                "meta_do_archive must be a boolean, got {}",
                other
            )))
        }
    };
    Ok(SDMetaAndRawTree {
        meta: make_meta(do_archive),
        raw_tree: typed_sections(raw),
    })
}

/// Decode a dump as JSON, falling back to a Python literal.
pub fn parse_dump(dump: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(dump)
        .map_err(|e| StoreError::malformed(format!("dump is not UTF-8: {}", e)))?;
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(_) => literal::parse(text),
    }
}

pub fn parse_from_gzipped(gzipped: &[u8]) -> Result<SDMetaAndRawTree> {
    let mut unzipped = Vec::new();
    GzDecoder::new(gzipped)
        .read_to_end(&mut unzipped)
        .map_err(StoreError::Gzip)?;
    parse_from_unzipped(&parse_dump(&unzipped)?)
}

pub fn parse_from_raw_status_data_tree(dump: &[u8]) -> Result<ImmutableTree> {
    deserialize_tree(&parse_dump(dump)?)
}

pub(crate) fn gzip(meta_and_raw_tree: &SDMetaAndRawTree, level: Compression) -> Result<Vec<u8>> {
    let mut text = serde_json::to_string(meta_and_raw_tree)?;
    text.push('\n');
    let mut encoder = GzEncoder::new(Vec::new(), level);
    encoder.write_all(text.as_bytes()).map_err(StoreError::Gzip)?;
    encoder.finish().map_err(StoreError::Gzip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use invtree_core::{sd_path, SDValue};

    #[test]
    fn test_both_envelope_shapes_normalize() {
        let legacy = json!({
            "meta_version": "0",
            "meta_do_archive": true,
            "Attributes": {},
            "Table": {},
            "Nodes": {"a": {"Attributes": {"Pairs": {"k": 1}}, "Table": {}, "Nodes": {}}}
        });
        let current = json!({
            "meta": {"version": "1", "do_archive": true},
            "raw_tree": {
                "Attributes": {},
                "Table": {},
                "Nodes": {"a": {"Attributes": {"Pairs": {"k": 1}}, "Table": {}, "Nodes": {}}}
            }
        });
        let from_legacy = parse_from_unzipped(&legacy).unwrap();
        let from_current = parse_from_unzipped(&current).unwrap();
        assert_eq!(from_legacy.meta, make_meta(true));
        assert_eq!(from_legacy, from_current);
        assert_eq!(
            from_current.tree().unwrap().get_attribute(&sd_path(&["a"]), "k"),
            Some(&SDValue::from(1))
        );
    }

    #[test]
    fn test_missing_sections_and_flags_default() {
        let parsed = parse_from_unzipped(&json!({})).unwrap();
        assert!(parsed.meta.do_archive);
        assert_eq!(
            parsed.raw_tree,
            json!({"Attributes": {}, "Table": {}, "Nodes": {}})
        );
    }

    #[test]
    fn test_meta_is_strict() {
        let not_bool = json!({"meta": {"version": "1", "do_archive": "yes"}, "raw_tree": {}});
        assert!(matches!(
            parse_from_unzipped(&not_bool),
            Err(StoreError::Malformed(_))
        ));
        let numeric_version = json!({"meta": {"version": 1, "do_archive": true}, "raw_tree": {}});
        assert!(matches!(
            parse_from_unzipped(&numeric_version),
            Err(StoreError::Malformed(_))
        ));
        let future = json!({"meta": {"version": "2", "do_archive": true}, "raw_tree": {}});
        assert!(matches!(
            parse_from_unzipped(&future),
            Err(StoreError::UnsupportedVersion(v)) if v == "2"
        ));
        let legacy_flag = json!({"meta_do_archive": 1});
        assert!(parse_from_unzipped(&legacy_flag).is_err());
    }

    #[test]
    fn test_gzip_round_trip() {
        let envelope = SDMetaAndRawTree {
            meta: make_meta(false),
            raw_tree: json!({"Attributes": {"Pairs": {"a": "b"}}, "Table": {}, "Nodes": {}}),
        };
        let gzipped = gzip(&envelope, Compression::default()).unwrap();
        assert_eq!(parse_from_gzipped(&gzipped).unwrap(), envelope);
        assert!(matches!(
            parse_from_gzipped(b"not gzip"),
            Err(StoreError::Gzip(_))
        ));
    }

    #[test]
    fn test_parse_dump_falls_back_to_literal() {
        assert_eq!(parse_dump(br#"{"a": [1]}"#).unwrap(), json!({"a": [1]}));
        assert_eq!(
            parse_dump(b"{'a': (1, None, True)}").unwrap(),
            json!({"a": [1, null, true]})
        );
        let tree = parse_from_raw_status_data_tree(b"{'cpu': {'cores': 4}}").unwrap();
        assert_eq!(
            tree.get_attribute(&sd_path(&["cpu"]), "cores"),
            Some(&SDValue::from(4))
        );
    }
}
