//! Path-scoped inclusion rules compiled into a prefix tree.
//!
//! Several [`SDFilterChoice`]s may target the same path; a key passes if any of
//! them permits it. A node without registered choices passes everything
//! through.

use crate::tree::{Attributes, ImmutableTree, Table, TreeView};
use crate::value::{Row, SDKey, SDNodeName, SDPath};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

/// Which keys (or node names) a rule admits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SDChoice {
    All,
    Nothing,
    Keys(Vec<String>),
}

impl SDChoice {
    pub fn keys<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        SDChoice::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn permits(&self, key: &str) -> bool {
        match self {
            SDChoice::All => true,
            SDChoice::Nothing => false,
            SDChoice::Keys(keys) => keys.iter().any(|k| k == key),
        }
    }
}

impl Serialize for SDChoice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            SDChoice::All => serializer.serialize_str("all"),
            SDChoice::Nothing => serializer.serialize_str("nothing"),
            SDChoice::Keys(keys) => keys.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawChoice {
    Word(String),
    Keys(Vec<String>),
    Tagged(String, Vec<String>),
}

/// Accepts `"all"`, `"nothing"`, a plain key list, or the configuration
/// form `["choices", [key, ...]]`.
impl<'de> Deserialize<'de> for SDChoice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawChoice::deserialize(deserializer)? {
            RawChoice::Word(word) => match word.as_str() {
                "all" => Ok(SDChoice::All),
                "nothing" => Ok(SDChoice::Nothing),
                other => Err(de::Error::unknown_variant(other, &["all", "nothing"])),
            },
            RawChoice::Keys(keys) => Ok(SDChoice::Keys(keys)),
            RawChoice::Tagged(tag, keys) if tag == "choices" => Ok(SDChoice::Keys(keys)),
            RawChoice::Tagged(tag, _) => Err(de::Error::unknown_variant(&tag, &["choices"])),
        }
    }
}

/// One filter rule for the node at `path`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SDFilterChoice {
    pub path: SDPath,
    pub pairs: SDChoice,
    pub columns: SDChoice,
    pub nodes: SDChoice,
}

impl SDFilterChoice {
    pub fn new(path: SDPath, pairs: SDChoice, columns: SDChoice, nodes: SDChoice) -> Self {
        Self {
            path,
            pairs,
            columns,
            nodes,
        }
    }
}

fn any_permits(choices: &[SDChoice], key: &str) -> bool {
    choices.iter().any(|c| c.permits(key))
}

/// Filter choices grouped by path prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterTree {
    by_name: BTreeMap<SDNodeName, FilterTree>,
    pairs: Vec<SDChoice>,
    columns: Vec<SDChoice>,
    nodes: Vec<SDChoice>,
}

impl FilterTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_choices<'a>(choices: impl IntoIterator<Item = &'a SDFilterChoice>) -> Self {
        let mut tree = Self::new();
        for choice in choices {
            tree.append(&choice.path, choice);
        }
        tree
    }

    pub fn append(&mut self, path: &[SDNodeName], choice: &SDFilterChoice) {
        match path.split_first() {
            Some((name, rest)) => self
                .by_name
                .entry(name.clone())
                .or_default()
                .append(rest, choice),
            None => {
                self.pairs.push(choice.pairs.clone());
                self.columns.push(choice.columns.clone());
                self.nodes.push(choice.nodes.clone());
            }
        }
    }

    /// Sub-filter for the child `name`, if any rule reaches below it.
    pub fn child(&self, name: &str) -> Option<&FilterTree> {
        self.by_name.get(name)
    }

    pub fn filters_by_name(&self) -> &BTreeMap<SDNodeName, FilterTree> {
        &self.by_name
    }

    pub fn filter_pairs<V: Clone>(&self, pairs: &BTreeMap<SDKey, V>) -> BTreeMap<SDKey, V> {
        filter_map(&self.pairs, pairs)
    }

    pub fn filter_row<V: Clone>(&self, row: &BTreeMap<SDKey, V>) -> BTreeMap<SDKey, V> {
        filter_map(&self.columns, row)
    }

    /// Names admitted by the `nodes` rules, plus every name that has rules of
    /// its own further down.
    pub fn filter_node_names<'a>(
        &self,
        names: impl IntoIterator<Item = &'a SDNodeName>,
    ) -> BTreeSet<SDNodeName> {
        names
            .into_iter()
            .filter(|n| any_permits(&self.nodes, n))
            .cloned()
            .chain(self.by_name.keys().cloned())
            .collect()
    }
}

fn filter_map<V: Clone>(choices: &[SDChoice], map: &BTreeMap<SDKey, V>) -> BTreeMap<SDKey, V> {
    if choices.is_empty() {
        return map.clone();
    }
    map.iter()
        .filter(|(k, _)| any_permits(choices, k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn filter_attributes(attributes: &Attributes, filters: &FilterTree) -> Attributes {
    Attributes::from_parts(
        filters.filter_pairs(attributes.pairs()),
        attributes.retentions().clone(),
    )
}

fn filter_table(table: &Table, filters: &FilterTree) -> Table {
    let rows_by_ident = table
        .rows_by_ident()
        .iter()
        .filter_map(|(ident, row)| {
            let filtered: Row = filters.filter_row(row);
            (!filtered.is_empty()).then(|| (ident.clone(), filtered))
        })
        .collect();
    Table::from_parts(
        table.key_columns().to_vec(),
        rows_by_ident,
        table.retentions().clone(),
    )
}

fn filter_node<T: TreeView>(tree: &T, filters: &FilterTree) -> ImmutableTree {
    let empty_filters = FilterTree::new();
    let mut nodes = BTreeMap::new();
    for name in filters.filter_node_names(tree.nodes_by_name().keys()) {
        let child_filters = filters.child(&name).unwrap_or(&empty_filters);
        let filtered = match tree.nodes_by_name().get(&name) {
            Some(child) => filter_node(child, child_filters),
            None => {
                let mut path = tree.path().to_vec();
                path.push(name.clone());
                filter_node(&ImmutableTree::with_path(path), child_filters)
            }
        };
        if filtered.len() > 0 {
            nodes.insert(name, filtered);
        }
    }
    ImmutableTree::from_parts(
        tree.path().to_vec(),
        filter_attributes(tree.attributes(), filters),
        filter_table(tree.table(), filters),
        nodes,
    )
}

/// Apply `choices` to `tree`, producing a new tree.
///
/// A child admitted without rules of its own keeps its attributes and table
/// but none of its children.
pub fn filter_tree<'a, T: TreeView>(
    tree: &T,
    choices: impl IntoIterator<Item = &'a SDFilterChoice>,
) -> ImmutableTree {
    filter_node(tree, &FilterTree::from_choices(choices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{row, sd_path, SDValue};

    fn choice(path: &[&str], pairs: SDChoice, columns: SDChoice, nodes: SDChoice) -> SDFilterChoice {
        SDFilterChoice::new(sd_path(path), pairs, columns, nodes)
    }

    #[test]
    fn test_choice_deserialize() {
        let choices: Vec<SDChoice> =
            serde_json::from_str(r#"["all", "nothing", ["a", "b"], ["choices", ["c"]]]"#).unwrap();
        assert_eq!(
            choices,
            vec![
                SDChoice::All,
                SDChoice::Nothing,
                SDChoice::keys(["a", "b"]),
                SDChoice::keys(["c"]),
            ]
        );
        assert!(serde_json::from_str::<SDChoice>(r#""some""#).is_err());
        assert!(serde_json::from_str::<SDChoice>(r#"["other", ["c"]]"#).is_err());
    }

    #[test]
    fn test_no_rules_pass_through() {
        let filters = FilterTree::new();
        let pairs = row([("a", 1), ("b", 2)]);
        assert_eq!(filters.filter_pairs(&pairs), pairs);
        assert_eq!(filters.filter_row(&pairs), pairs);
    }

    #[test]
    fn test_rules_are_ored() {
        let filters = FilterTree::from_choices(&[
            choice(&[], SDChoice::keys(["a"]), SDChoice::Nothing, SDChoice::Nothing),
            choice(&[], SDChoice::keys(["b"]), SDChoice::Nothing, SDChoice::Nothing),
        ]);
        let pairs = row([("a", 1), ("b", 2), ("c", 3)]);
        assert_eq!(filters.filter_pairs(&pairs), row([("a", 1), ("b", 2)]));
        assert!(filters.filter_row(&pairs).is_empty());
    }

    #[test]
    fn test_node_names_keep_deeper_rules() {
        let filters = FilterTree::from_choices(&[
            choice(&[], SDChoice::All, SDChoice::All, SDChoice::Nothing),
            choice(&["deep", "er"], SDChoice::All, SDChoice::All, SDChoice::All),
        ]);
        let names = vec!["deep".to_string(), "other".to_string()];
        assert_eq!(
            filters.filter_node_names(names.iter()),
            BTreeSet::from(["deep".to_string()])
        );
    }

    #[test]
    fn test_filter_tree() {
        let mut tree = crate::MutableTree::new();
        tree.add_pairs(
            &sd_path(&["hardware", "cpu"]),
            row([("arch", "x86_64"), ("cores", "4")]),
        );
        tree.add_rows(
            &sd_path(&["software", "packages"]),
            &["name".to_string()],
            vec![row([("name", "bash"), ("version", "5")])],
        );
        let filtered = filter_tree(
            &tree,
            &[choice(
                &["hardware", "cpu"],
                SDChoice::keys(["arch"]),
                SDChoice::Nothing,
                SDChoice::Nothing,
            )],
        );
        assert_eq!(
            filtered.get_attribute(&sd_path(&["hardware", "cpu"]), "arch"),
            Some(&SDValue::from("x86_64"))
        );
        assert!(filtered
            .get_attribute(&sd_path(&["hardware", "cpu"]), "cores")
            .is_none());
        // no rule reaches "software"
        assert_eq!(filtered.get_tree(&sd_path(&["software"])).len(), 0);
    }

    #[test]
    fn test_filter_tree_nodes_nothing_prunes() {
        let mut tree = crate::MutableTree::new();
        tree.add_pairs(&sd_path(&["a", "b"]), row([("k", "v")]));
        let filtered = filter_tree(
            &tree,
            &[choice(&["a"], SDChoice::All, SDChoice::All, SDChoice::Nothing)],
        );
        assert_eq!(filtered.len(), 0);
    }
}
