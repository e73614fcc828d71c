//! Scalar values, keys, paths and rows of a structured inventory tree.
//!
//! Every fact in a tree is an [`SDValue`] stored under an [`SDKey`], either as
//! an attribute pair or as a cell of a table row. Row identity is the tuple of
//! key-column values ([`SDRowIdent`]), so values need a total order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Name of a child node.
pub type SDNodeName = String;

/// Ordered sequence of node names; the empty path is the root.
pub type SDPath = Vec<SDNodeName>;

/// Key of an attribute pair or a table column.
pub type SDKey = String;

/// A table row: column key to value.
pub type Row = BTreeMap<SDKey, SDValue>;

/// Projection of a row onto the table's key columns.
pub type SDRowIdent = Vec<SDValue>;

/// A single inventory value.
///
/// `Null` doubles as "absent" in delta trees.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SDValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl SDValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SDValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SDValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SDValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            SDValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SDValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Falsy values are null, `false`, zero and the empty string.
    pub fn is_truthy(&self) -> bool {
        match self {
            SDValue::Null => false,
            SDValue::Bool(b) => *b,
            SDValue::Int(i) => *i != 0,
            SDValue::Float(f) => *f != 0.0,
            SDValue::Str(s) => !s.is_empty(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SDValue::Null => 0,
            SDValue::Bool(_) => 1,
            SDValue::Int(_) => 2,
            SDValue::Float(_) => 3,
            SDValue::Str(_) => 4,
        }
    }
}

impl PartialEq for SDValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SDValue {}

impl PartialOrd for SDValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SDValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SDValue::Null, SDValue::Null) => Ordering::Equal,
            (SDValue::Bool(a), SDValue::Bool(b)) => a.cmp(b),
            (SDValue::Int(a), SDValue::Int(b)) => a.cmp(b),
            (SDValue::Float(a), SDValue::Float(b)) => a.total_cmp(b),
            (SDValue::Str(a), SDValue::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for SDValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            SDValue::Null => {}
            SDValue::Bool(b) => b.hash(state),
            SDValue::Int(i) => i.hash(state),
            SDValue::Float(f) => f.to_bits().hash(state),
            SDValue::Str(s) => s.hash(state),
        }
    }
}

/// Python's `repr` of a float: shortest round-trip digits, with a signed,
/// at least two-digit exponent (`1e+20`, `1.5e-05`) and `nan`/`inf`.
fn float_repr(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let debug = format!("{:?}", v);
    match debug.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => debug,
    }
}

/// Renders the value the way legacy enumerations were joined into text
/// (`True`, `None`, `1.0`).
impl fmt::Display for SDValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SDValue::Null => write!(f, "None"),
            SDValue::Bool(true) => write!(f, "True"),
            SDValue::Bool(false) => write!(f, "False"),
            SDValue::Int(i) => write!(f, "{}", i),
            SDValue::Float(v) => f.write_str(&float_repr(*v)),
            SDValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for SDValue {
    fn from(s: &str) -> Self {
        SDValue::Str(s.to_string())
    }
}

impl From<String> for SDValue {
    fn from(s: String) -> Self {
        SDValue::Str(s)
    }
}

impl From<i64> for SDValue {
    fn from(i: i64) -> Self {
        SDValue::Int(i)
    }
}

impl From<i32> for SDValue {
    fn from(i: i32) -> Self {
        SDValue::Int(i64::from(i))
    }
}

impl From<f64> for SDValue {
    fn from(f: f64) -> Self {
        SDValue::Float(f)
    }
}

impl From<bool> for SDValue {
    fn from(b: bool) -> Self {
        SDValue::Bool(b)
    }
}

impl<T: Into<SDValue>> From<Option<T>> for SDValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SDValue::Null)
    }
}

/// Build a row (or a pairs mapping) from key/value entries.
pub fn row<K, V, I>(entries: I) -> Row
where
    K: Into<SDKey>,
    V: Into<SDValue>,
    I: IntoIterator<Item = (K, V)>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Build an owned path from node names.
pub fn sd_path<S: AsRef<str>>(names: &[S]) -> SDPath {
    names.iter().map(|n| n.as_ref().to_string()).collect()
}

/// Parse a dotted path such as `"hardware.cpu"`; empty segments are dropped.
pub fn parse_visible_raw_path(raw_path: &str) -> SDPath {
    raw_path
        .split('.')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Project a row onto `key_columns`, skipping columns the row lacks.
pub fn make_row_ident(key_columns: &[SDKey], row: &Row) -> SDRowIdent {
    key_columns
        .iter()
        .filter_map(|k| row.get(k).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_visible_raw_path() {
        assert!(parse_visible_raw_path("").is_empty());
        assert_eq!(
            parse_visible_raw_path("path-to.node_1"),
            vec!["path-to".to_string(), "node_1".to_string()]
        );
        assert_eq!(parse_visible_raw_path(".a..b."), sd_path(&["a", "b"]));
    }

    #[test]
    fn test_values_are_type_strict() {
        assert_ne!(SDValue::Int(1), SDValue::Float(1.0));
        assert_ne!(SDValue::Int(1), SDValue::Bool(true));
        assert_eq!(SDValue::Float(f64::NAN), SDValue::Float(f64::NAN));
        assert!(SDValue::Null < SDValue::Bool(false));
        assert!(SDValue::Int(10) < SDValue::Str("a".into()));
    }

    #[test]
    fn test_display_matches_legacy_join() {
        assert_eq!(SDValue::Float(1.0).to_string(), "1.0");
        assert_eq!(SDValue::Int(2).to_string(), "2");
        assert_eq!(SDValue::Bool(true).to_string(), "True");
        assert_eq!(SDValue::from("v1").to_string(), "v1");
    }

    #[test]
    fn test_float_display_uses_python_exponents() {
        assert_eq!(SDValue::Float(1e20).to_string(), "1e+20");
        assert_eq!(SDValue::Float(1e16).to_string(), "1e+16");
        assert_eq!(SDValue::Float(1.5e-5).to_string(), "1.5e-05");
        assert_eq!(SDValue::Float(-2.5e-123).to_string(), "-2.5e-123");
        assert_eq!(SDValue::Float(1e15).to_string(), "1000000000000000.0");
        assert_eq!(SDValue::Float(0.0001).to_string(), "0.0001");
        assert_eq!(SDValue::Float(f64::NAN).to_string(), "nan");
        assert_eq!(SDValue::Float(f64::NEG_INFINITY).to_string(), "-inf");
    }

    #[test]
    fn test_truthiness() {
        assert!(!SDValue::Null.is_truthy());
        assert!(!SDValue::Int(0).is_truthy());
        assert!(!SDValue::Float(0.0).is_truthy());
        assert!(!SDValue::from("").is_truthy());
        assert!(!SDValue::Bool(false).is_truthy());
        assert!(SDValue::from("x").is_truthy());
    }

    #[test]
    fn test_row_ident_skips_missing_columns() {
        let r = row([("a", SDValue::from("A")), ("c", SDValue::from(3))]);
        let key_columns = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(
            make_row_ident(&key_columns, &r),
            vec![SDValue::from("A"), SDValue::Int(3)]
        );
    }

    #[test]
    fn test_untagged_serde() {
        let values: Vec<SDValue> = serde_json::from_str(r#"[null, true, 3, 1.5, "s"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                SDValue::Null,
                SDValue::Bool(true),
                SDValue::Int(3),
                SDValue::Float(1.5),
                SDValue::from("s"),
            ]
        );
        assert_eq!(serde_json::to_string(&values).unwrap(), r#"[null,true,3,1.5,"s"]"#);
    }
}
