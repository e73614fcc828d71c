//! Mutable and immutable inventory trees.
//!
//! Both variants share the [`Attributes`] and [`Table`] value types and are
//! read through the [`TreeView`] trait, so equality and length are defined
//! once and hold across variants: a freshly built [`MutableTree`] compares
//! equal to a persisted [`ImmutableTree`] with the same facts.

use crate::retention::{RetentionInterval, SDRetentionFilterChoices};
use crate::update::UpdateResult;
use crate::value::{make_row_ident, Row, SDKey, SDNodeName, SDPath, SDRowIdent, SDValue};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Retention stamps of a table, per row ident and column.
pub type TableRetentions = BTreeMap<SDRowIdent, BTreeMap<SDKey, RetentionInterval>>;

/// Key/value pairs of a node plus their retention stamps.
///
/// Only `pairs` take part in equality and length.
#[derive(Clone, Debug, Default)]
pub struct Attributes {
    pub(crate) pairs: BTreeMap<SDKey, SDValue>,
    pub(crate) retentions: BTreeMap<SDKey, RetentionInterval>,
}

impl Attributes {
    pub const fn new() -> Self {
        Self {
            pairs: BTreeMap::new(),
            retentions: BTreeMap::new(),
        }
    }

    pub fn from_pairs(pairs: BTreeMap<SDKey, SDValue>) -> Self {
        Self {
            pairs,
            retentions: BTreeMap::new(),
        }
    }

    pub fn from_parts(
        pairs: BTreeMap<SDKey, SDValue>,
        retentions: BTreeMap<SDKey, RetentionInterval>,
    ) -> Self {
        Self { pairs, retentions }
    }

    pub fn pairs(&self) -> &BTreeMap<SDKey, SDValue> {
        &self.pairs
    }

    pub fn retentions(&self) -> &BTreeMap<SDKey, RetentionInterval> {
        &self.retentions
    }

    pub fn get(&self, key: &str) -> Option<&SDValue> {
        self.pairs.get(key)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn add(&mut self, pairs: impl IntoIterator<Item = (SDKey, SDValue)>) {
        self.pairs.extend(pairs);
    }
}

impl PartialEq for Attributes {
    fn eq(&self, other: &Self) -> bool {
        self.pairs == other.pairs
    }
}

impl Eq for Attributes {}

/// Rows of a node, keyed by their projection onto the key columns.
///
/// Only `rows_by_ident` takes part in equality and length.
#[derive(Clone, Debug, Default)]
pub struct Table {
    pub(crate) key_columns: Vec<SDKey>,
    pub(crate) rows_by_ident: BTreeMap<SDRowIdent, Row>,
    pub(crate) retentions: TableRetentions,
}

impl Table {
    pub const fn new() -> Self {
        Self {
            key_columns: Vec::new(),
            rows_by_ident: BTreeMap::new(),
            retentions: BTreeMap::new(),
        }
    }

    pub fn from_parts(
        key_columns: Vec<SDKey>,
        rows_by_ident: BTreeMap<SDRowIdent, Row>,
        retentions: TableRetentions,
    ) -> Self {
        Self {
            key_columns,
            rows_by_ident,
            retentions,
        }
    }

    /// Build a table the way [`Table::add`] accumulates rows.
    pub fn from_rows(key_columns: &[SDKey], rows: impl IntoIterator<Item = Row>) -> Self {
        let mut table = Self::new();
        table.add(key_columns, rows);
        table
    }

    pub fn key_columns(&self) -> &[SDKey] {
        &self.key_columns
    }

    pub fn rows_by_ident(&self) -> &BTreeMap<SDRowIdent, Row> {
        &self.rows_by_ident
    }

    pub fn retentions(&self) -> &TableRetentions {
        &self.retentions
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows_by_ident.values()
    }

    /// Every cell paired with its retention stamp, if it has one.
    pub fn rows_with_retentions(
        &self,
    ) -> Vec<BTreeMap<SDKey, (SDValue, Option<RetentionInterval>)>> {
        self.rows_by_ident
            .iter()
            .map(|(ident, row)| {
                let intervals = self.retentions.get(ident);
                row.iter()
                    .map(|(key, value)| {
                        let interval = intervals.and_then(|i| i.get(key)).copied();
                        (key.clone(), (value.clone(), interval))
                    })
                    .collect()
            })
            .collect()
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.rows_by_ident.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key columns become the sorted union of old and new; each row lands
    /// under its ident, merging into an existing row with the same ident.
    pub fn add(&mut self, key_columns: &[SDKey], rows: impl IntoIterator<Item = Row>) {
        self.add_key_columns(key_columns);
        for row in rows {
            let ident = make_row_ident(&self.key_columns, &row);
            self.add_row(ident, row);
        }
    }

    pub(crate) fn add_key_columns(&mut self, key_columns: &[SDKey]) {
        let union: BTreeSet<SDKey> = self
            .key_columns
            .iter()
            .chain(key_columns)
            .cloned()
            .collect();
        self.key_columns = union.into_iter().collect();
    }

    pub(crate) fn add_row(&mut self, ident: SDRowIdent, row: Row) {
        if !row.is_empty() {
            self.rows_by_ident.entry(ident).or_default().extend(row);
        }
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.rows_by_ident == other.rows_by_ident
    }
}

impl Eq for Table {}

/// Read-only access shared by both tree variants.
pub trait TreeView {
    type Node: TreeView;

    fn path(&self) -> &[SDNodeName];
    fn attributes(&self) -> &Attributes;
    fn table(&self) -> &Table;
    fn nodes_by_name(&self) -> &BTreeMap<SDNodeName, Self::Node>;

    /// Number of facts (pairs and cells) in the whole subtree.
    fn len(&self) -> usize {
        self.attributes().len()
            + self.table().len()
            + self.nodes_by_name().values().map(TreeView::len).sum::<usize>()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deep copy into the immutable variant.
    fn to_immutable(&self) -> ImmutableTree {
        ImmutableTree {
            path: self.path().to_vec(),
            attributes: self.attributes().clone(),
            table: self.table().clone(),
            nodes_by_name: self
                .nodes_by_name()
                .iter()
                .map(|(name, node)| (name.clone(), node.to_immutable()))
                .collect(),
        }
    }
}

/// Structural equality over any two views. Children that hold no facts are
/// ignored, so an empty subtree equals a missing one.
pub fn trees_equal<A: TreeView, B: TreeView>(left: &A, right: &B) -> bool {
    if left.attributes() != right.attributes() || left.table() != right.table() {
        return false;
    }
    let left_nodes = left.nodes_by_name();
    let right_nodes = right.nodes_by_name();
    for (name, node) in left_nodes {
        match right_nodes.get(name) {
            Some(other) => {
                if !trees_equal(node, other) {
                    return false;
                }
            }
            None if node.len() > 0 => return false,
            None => {}
        }
    }
    right_nodes
        .iter()
        .filter(|(name, _)| !left_nodes.contains_key(*name))
        .all(|(_, node)| node.len() == 0)
}

fn descend<'a, T>(mut tree: &'a T, path: &[SDNodeName]) -> Option<&'a T>
where
    T: TreeView<Node = T>,
{
    for name in path {
        tree = tree.nodes_by_name().get(name)?;
    }
    Some(tree)
}

static EMPTY_MUTABLE_TREE: MutableTree = MutableTree::new();
static EMPTY_IMMUTABLE_TREE: ImmutableTree = ImmutableTree::new();

/// A tree under construction for the current inventory cycle.
#[derive(Clone, Debug, Default)]
pub struct MutableTree {
    path: SDPath,
    attributes: Attributes,
    table: Table,
    nodes_by_name: BTreeMap<SDNodeName, MutableTree>,
}

impl MutableTree {
    pub const fn new() -> Self {
        Self {
            path: Vec::new(),
            attributes: Attributes::new(),
            table: Table::new(),
            nodes_by_name: BTreeMap::new(),
        }
    }

    fn with_path(path: SDPath) -> Self {
        Self {
            path,
            ..Self::new()
        }
    }

    /// Add facts at `path`, creating missing nodes on the way. A table is
    /// only touched when both `key_columns` and `rows` are non-empty.
    pub fn add(
        &mut self,
        path: &[SDNodeName],
        pairs: Option<Row>,
        key_columns: &[SDKey],
        rows: Vec<Row>,
    ) {
        let node = self.setdefault_node(path);
        if let Some(pairs) = pairs {
            node.attributes.add(pairs);
        }
        if !key_columns.is_empty() && !rows.is_empty() {
            node.table.add(key_columns, rows);
        }
    }

    pub fn add_pairs(&mut self, path: &[SDNodeName], pairs: Row) {
        self.add(path, Some(pairs), &[], Vec::new());
    }

    pub fn add_rows(&mut self, path: &[SDNodeName], key_columns: &[SDKey], rows: Vec<Row>) {
        self.add(path, None, key_columns, rows);
    }

    /// Get or create the node at `path`; the empty path is `self`.
    pub fn setdefault_node(&mut self, path: &[SDNodeName]) -> &mut MutableTree {
        let mut node = self;
        for name in path {
            let child_path = {
                let mut p = node.path.clone();
                p.push(name.clone());
                p
            };
            node = node
                .nodes_by_name
                .entry(name.clone())
                .or_insert_with(|| MutableTree::with_path(child_path));
        }
        node
    }

    /// Node at `path`, or a shared empty tree if any segment is missing.
    pub fn get_tree(&self, path: &[SDNodeName]) -> &MutableTree {
        descend(self, path).unwrap_or(&EMPTY_MUTABLE_TREE)
    }

    pub fn get_attribute(&self, path: &[SDNodeName], key: &str) -> Option<&SDValue> {
        self.get_tree(path).attributes.get(key)
    }

    pub fn has_table(&self, path: &[SDNodeName]) -> bool {
        !self.get_tree(path).table.is_empty()
    }

    /// Carry retained facts of `previous_tree` forward into this tree,
    /// applying every pairs rule to the attributes and every columns rule to
    /// the table at `choices.path`, in registration order.
    pub fn update(
        &mut self,
        now: i64,
        previous_tree: &ImmutableTree,
        choices: &SDRetentionFilterChoices,
    ) -> Vec<UpdateResult> {
        let previous_node = previous_tree.get_tree(&choices.path);
        let node = self.setdefault_node(&choices.path);
        let mut results = Vec::new();
        for choice in choices.pairs() {
            results.extend(node.attributes.update(
                now,
                &previous_node.attributes,
                &choices.path,
                choices.interval,
                choice,
            ));
        }
        for choice in choices.columns() {
            results.extend(node.table.update(
                now,
                &previous_node.table,
                &choices.path,
                choices.interval,
                choice,
            ));
        }
        for result in &results {
            debug!(path = ?choices.path, "{}", result);
        }
        results
    }

    /// Convert into the immutable variant, moving all contents.
    pub fn freeze(self) -> ImmutableTree {
        ImmutableTree {
            path: self.path,
            attributes: self.attributes,
            table: self.table,
            nodes_by_name: self
                .nodes_by_name
                .into_iter()
                .map(|(name, node)| (name, node.freeze()))
                .collect(),
        }
    }
}

impl TreeView for MutableTree {
    type Node = MutableTree;

    fn path(&self) -> &[SDNodeName] {
        &self.path
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn table(&self) -> &Table {
        &self.table
    }

    fn nodes_by_name(&self) -> &BTreeMap<SDNodeName, MutableTree> {
        &self.nodes_by_name
    }
}

/// A read-only tree: deserialized, filtered, merged or frozen.
#[derive(Clone, Debug, Default)]
pub struct ImmutableTree {
    path: SDPath,
    attributes: Attributes,
    table: Table,
    nodes_by_name: BTreeMap<SDNodeName, ImmutableTree>,
}

impl ImmutableTree {
    pub const fn new() -> Self {
        Self {
            path: Vec::new(),
            attributes: Attributes::new(),
            table: Table::new(),
            nodes_by_name: BTreeMap::new(),
        }
    }

    pub fn with_path(path: SDPath) -> Self {
        Self {
            path,
            ..Self::new()
        }
    }

    /// Assemble a node; children must already carry `path` plus their name.
    pub fn from_parts(
        path: SDPath,
        attributes: Attributes,
        table: Table,
        nodes_by_name: BTreeMap<SDNodeName, ImmutableTree>,
    ) -> Self {
        Self {
            path,
            attributes,
            table,
            nodes_by_name,
        }
    }

    /// Node at `path`, or a shared empty tree if any segment is missing.
    pub fn get_tree(&self, path: &[SDNodeName]) -> &ImmutableTree {
        descend(self, path).unwrap_or(&EMPTY_IMMUTABLE_TREE)
    }

    pub fn get_attribute(&self, path: &[SDNodeName], key: &str) -> Option<&SDValue> {
        self.get_tree(path).attributes.get(key)
    }

    pub fn get_rows(&self, path: &[SDNodeName]) -> Vec<&Row> {
        self.get_tree(path).table.rows().collect()
    }

    pub fn has_table(&self, path: &[SDNodeName]) -> bool {
        !self.get_tree(path).table.is_empty()
    }
}

impl TreeView for ImmutableTree {
    type Node = ImmutableTree;

    fn path(&self) -> &[SDNodeName] {
        &self.path
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn table(&self) -> &Table {
        &self.table
    }

    fn nodes_by_name(&self) -> &BTreeMap<SDNodeName, ImmutableTree> {
        &self.nodes_by_name
    }
}

impl From<MutableTree> for ImmutableTree {
    fn from(tree: MutableTree) -> Self {
        tree.freeze()
    }
}

impl PartialEq for MutableTree {
    fn eq(&self, other: &Self) -> bool {
        trees_equal(self, other)
    }
}

impl Eq for MutableTree {}

impl PartialEq for ImmutableTree {
    fn eq(&self, other: &Self) -> bool {
        trees_equal(self, other)
    }
}

impl Eq for ImmutableTree {}

impl PartialEq<ImmutableTree> for MutableTree {
    fn eq(&self, other: &ImmutableTree) -> bool {
        trees_equal(self, other)
    }
}

impl PartialEq<MutableTree> for ImmutableTree {
    fn eq(&self, other: &MutableTree) -> bool {
        trees_equal(self, other)
    }
}
