//! Update-from-previous: carry retained facts of the last cycle forward.
//!
//! A previous key is eligible only if its rule permits it and its own
//! retention stamp has not expired at `now`. Keys seen in the current cycle
//! get a fresh stamp from the rule's cache info and the configured interval.

use crate::retention::{is_retainable, RetentionFilterChoice, RetentionInterval};
use crate::tree::{Attributes, Table, TableRetentions};
use crate::value::{Row, SDKey, SDPath, SDRowIdent, SDValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// What an update did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    AddedPairs,
    AddedRow,
    KeepUntil,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateKind::AddedPairs => write!(f, "Added pairs"),
            UpdateKind::AddedRow => write!(f, "Added row"),
            UpdateKind::KeepUntil => write!(f, "Keep until"),
        }
    }
}

/// Advisory record of one update step, meant for logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateResult {
    Attributes {
        path: SDPath,
        kind: UpdateKind,
        message: String,
    },
    Table {
        path: SDPath,
        ident: SDRowIdent,
        kind: UpdateKind,
        message: String,
    },
}

impl UpdateResult {
    pub fn path(&self) -> &SDPath {
        match self {
            UpdateResult::Attributes { path, .. } | UpdateResult::Table { path, .. } => path,
        }
    }

    pub fn kind(&self) -> UpdateKind {
        match self {
            UpdateResult::Attributes { kind, .. } | UpdateResult::Table { kind, .. } => *kind,
        }
    }
}

impl fmt::Display for UpdateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateResult::Attributes { kind, message, .. } => {
                write!(f, "[Attributes] {}: {}", kind, message)
            }
            UpdateResult::Table {
                ident,
                kind,
                message,
                ..
            } => {
                let ident: Vec<String> = ident.iter().map(SDValue::to_string).collect();
                write!(f, "[Table] '{}': {}: {}", ident.join(", "), kind, message)
            }
        }
    }
}

fn join_keys<'a>(keys: impl IntoIterator<Item = &'a SDKey>) -> String {
    keys.into_iter().cloned().collect::<Vec<_>>().join(", ")
}

fn keep_until_message(retentions: &BTreeMap<SDKey, RetentionInterval>) -> String {
    retentions
        .iter()
        .map(|(k, v)| format!("{} ({})", k, v.keep_until()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn retainable_keys(
    choice: &RetentionFilterChoice,
    values: &Row,
    intervals: Option<&BTreeMap<SDKey, RetentionInterval>>,
    now: i64,
) -> BTreeSet<SDKey> {
    values
        .keys()
        .filter(|k| is_retainable(&choice.choice, k, intervals.and_then(|i| i.get(*k)), now))
        .cloned()
        .collect()
}

fn permitted_keys(choice: &RetentionFilterChoice, values: &Row) -> BTreeSet<SDKey> {
    values
        .keys()
        .filter(|k| choice.choice.permits(k))
        .cloned()
        .collect()
}

fn previous_stamp(
    intervals: Option<&BTreeMap<SDKey, RetentionInterval>>,
    key: &str,
) -> Option<RetentionInterval> {
    intervals
        .and_then(|i| i.get(key))
        .map(RetentionInterval::from_previous)
}

impl Attributes {
    pub(crate) fn update(
        &mut self,
        now: i64,
        previous: &Attributes,
        path: &SDPath,
        interval: i64,
        choice: &RetentionFilterChoice,
    ) -> Vec<UpdateResult> {
        let fresh = choice.interval(interval);
        let previous_keys = retainable_keys(choice, &previous.pairs, Some(&previous.retentions), now);
        let current_keys = permitted_keys(choice, &self.pairs);

        let mut pairs = Row::new();
        let mut retentions = BTreeMap::new();
        for key in previous_keys.difference(&current_keys) {
            if let (Some(value), Some(stamp)) = (
                previous.pairs.get(key),
                previous_stamp(Some(&previous.retentions), key),
            ) {
                pairs.insert(key.clone(), value.clone());
                retentions.insert(key.clone(), stamp);
            }
        }
        for key in &current_keys {
            retentions.insert(key.clone(), fresh);
        }

        let mut results = Vec::new();
        if !pairs.is_empty() {
            let message = join_keys(pairs.keys());
            self.add(pairs);
            results.push(UpdateResult::Attributes {
                path: path.clone(),
                kind: UpdateKind::AddedPairs,
                message,
            });
        }
        if !retentions.is_empty() {
            results.push(UpdateResult::Attributes {
                path: path.clone(),
                kind: UpdateKind::KeepUntil,
                message: keep_until_message(&retentions),
            });
            self.retentions = retentions;
        }
        results
    }
}

impl Table {
    pub(crate) fn update(
        &mut self,
        now: i64,
        previous: &Table,
        path: &SDPath,
        interval: i64,
        choice: &RetentionFilterChoice,
    ) -> Vec<UpdateResult> {
        let fresh = choice.interval(interval);
        self.add_key_columns(&previous.key_columns);

        let previous_rows: BTreeMap<&SDRowIdent, BTreeSet<SDKey>> = previous
            .rows_by_ident
            .iter()
            .filter_map(|(ident, row)| {
                let keys = retainable_keys(choice, row, previous.retentions.get(ident), now);
                (!keys.is_empty()).then_some((ident, keys))
            })
            .collect();
        let current_rows: BTreeMap<SDRowIdent, BTreeSet<SDKey>> = self
            .rows_by_ident
            .iter()
            .filter_map(|(ident, row)| {
                let keys = permitted_keys(choice, row);
                (!keys.is_empty()).then(|| (ident.clone(), keys))
            })
            .collect();

        let mut retentions = TableRetentions::new();
        let mut results = Vec::new();

        for (ident, previous_keys) in &previous_rows {
            let previous_row = &previous.rows_by_ident[*ident];
            let previous_intervals = previous.retentions.get(*ident);
            let current_keys = current_rows.get(*ident);
            let carried: Vec<&SDKey> = match current_keys {
                Some(current_keys) => previous_keys.difference(current_keys).collect(),
                None => previous_keys.iter().collect(),
            };

            let mut row = Row::new();
            for key in carried {
                if let (Some(value), Some(stamp)) = (
                    previous_row.get(key),
                    previous_stamp(previous_intervals, key),
                ) {
                    row.insert(key.clone(), value.clone());
                    retentions
                        .entry((*ident).clone())
                        .or_default()
                        .insert(key.clone(), stamp);
                }
            }
            if let Some(current_keys) = current_keys {
                for key in current_keys {
                    retentions
                        .entry((*ident).clone())
                        .or_default()
                        .insert(key.clone(), fresh);
                }
            }
            if row.is_empty() {
                continue;
            }

            // key columns are never dropped; they carry the row identity
            for key in &previous.key_columns {
                if let Some(value) = previous_row.get(key) {
                    row.insert(key.clone(), value.clone());
                }
            }
            if let Some(current_row) = self.rows_by_ident.get(*ident) {
                for key in &self.key_columns {
                    if let Some(value) = current_row.get(key) {
                        row.insert(key.clone(), value.clone());
                    }
                }
            }
            let message = join_keys(row.keys());
            self.add_row((*ident).clone(), row);
            results.push(UpdateResult::Table {
                path: path.clone(),
                ident: (*ident).clone(),
                kind: UpdateKind::AddedRow,
                message,
            });
        }

        for (ident, current_keys) in &current_rows {
            if previous_rows.contains_key(ident) {
                continue;
            }
            let intervals = retentions.entry(ident.clone()).or_default();
            for key in current_keys {
                intervals.insert(key.clone(), fresh);
            }
        }

        if !retentions.is_empty() {
            for (ident, intervals) in &retentions {
                results.push(UpdateResult::Table {
                    path: path.clone(),
                    ident: ident.clone(),
                    kind: UpdateKind::KeepUntil,
                    message: keep_until_message(intervals),
                });
            }
            self.retentions = retentions;
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SDChoice;
    use crate::retention::{RetentionSource, SDRetentionFilterChoices};
    use crate::tree::{ImmutableTree, MutableTree, TreeView};
    use crate::value::{row, sd_path};

    fn previous_tree_with_table() -> ImmutableTree {
        let ident = vec![SDValue::from("KC")];
        let table = Table::from_parts(
            vec!["kc".to_string()],
            BTreeMap::from([(
                ident.clone(),
                row([("kc", "KC"), ("c1", "prev"), ("c2", "onlyprev")]),
            )]),
            BTreeMap::from([(
                ident,
                BTreeMap::from([
                    ("c1".to_string(), RetentionInterval::from_config(1, 2, 3)),
                    ("c2".to_string(), RetentionInterval::from_config(1, 2, 3)),
                ]),
            )]),
        );
        ImmutableTree::from_parts(Vec::new(), Attributes::new(), table, BTreeMap::new())
    }

    #[test]
    fn test_update_table_merges_previous_row() {
        let previous = previous_tree_with_table();
        let mut tree = MutableTree::new();
        tree.add_rows(
            &[],
            &["kc".to_string()],
            vec![row([("kc", "KC"), ("c1", "cur"), ("c3", "onlycur")])],
        );

        let mut choices = SDRetentionFilterChoices::new(Vec::new(), 6);
        choices.add_columns_choice(SDChoice::All, (4, 5));
        let results = tree.update(0, &previous, &choices);

        let ident = vec![SDValue::from("KC")];
        let table = tree.table();
        assert_eq!(
            table.rows_by_ident()[&ident],
            row([("kc", "KC"), ("c1", "cur"), ("c2", "onlyprev"), ("c3", "onlycur")])
        );
        let fresh = RetentionInterval::from_config(4, 5, 6);
        assert_eq!(
            table.retentions()[&ident],
            BTreeMap::from([
                ("c1".to_string(), fresh),
                (
                    "c2".to_string(),
                    RetentionInterval::new(1, 2, 3, RetentionSource::Previous)
                ),
                ("c3".to_string(), fresh),
                ("kc".to_string(), fresh),
            ])
        );
        assert_eq!(
            results.iter().map(UpdateResult::kind).collect::<Vec<_>>(),
            vec![UpdateKind::AddedRow, UpdateKind::KeepUntil]
        );
        assert_eq!(results[0].to_string(), "[Table] 'KC': Added row: c2, kc");
    }

    #[test]
    fn test_update_table_expired_previous_row_is_dropped() {
        let previous = previous_tree_with_table();
        let mut tree = MutableTree::new();
        let mut choices = SDRetentionFilterChoices::new(Vec::new(), 6);
        choices.add_columns_choice(SDChoice::All, (4, 5));
        let results = tree.update(100, &previous, &choices);
        assert!(results.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.table().key_columns(), ["kc".to_string()].as_slice());
    }

    #[test]
    fn test_update_table_previous_only_row_keeps_key_columns() {
        let previous = previous_tree_with_table();
        let mut tree = MutableTree::new();
        let mut choices = SDRetentionFilterChoices::new(Vec::new(), 6);
        choices.add_columns_choice(SDChoice::keys(["c2"]), (4, 5));
        tree.update(0, &previous, &choices);
        assert_eq!(
            tree.table().rows_by_ident()[&vec![SDValue::from("KC")]],
            row([("kc", "KC"), ("c2", "onlyprev")])
        );
    }

    fn previous_tree_with_pairs(keep_until_offset: i64) -> ImmutableTree {
        let attributes = Attributes::from_parts(
            row([("old", "value"), ("shared", "previous")]),
            BTreeMap::from([
                (
                    "old".to_string(),
                    RetentionInterval::from_config(0, 0, keep_until_offset),
                ),
                (
                    "shared".to_string(),
                    RetentionInterval::from_config(0, 0, keep_until_offset),
                ),
            ]),
        );
        ImmutableTree::from_parts(
            sd_path(&["node"]),
            attributes,
            Table::new(),
            BTreeMap::new(),
        )
    }

    fn wrap(node: ImmutableTree) -> ImmutableTree {
        ImmutableTree::from_parts(
            Vec::new(),
            Attributes::new(),
            Table::new(),
            BTreeMap::from([("node".to_string(), node)]),
        )
    }

    #[test]
    fn test_update_attributes_carries_unexpired_keys() {
        let previous = wrap(previous_tree_with_pairs(10));
        let path = sd_path(&["node"]);
        let mut tree = MutableTree::new();
        tree.add_pairs(&path, row([("shared", "current"), ("new", "value")]));

        let mut choices = SDRetentionFilterChoices::new(path.clone(), 3);
        choices.add_pairs_choice(SDChoice::All, (7, 8));
        let results = tree.update(10, &previous, &choices);

        let node = tree.get_tree(&path);
        assert_eq!(
            node.attributes().pairs(),
            &row([("new", "value"), ("old", "value"), ("shared", "current")])
        );
        assert_eq!(
            node.attributes().retentions()["old"],
            RetentionInterval::new(0, 0, 10, RetentionSource::Previous)
        );
        assert_eq!(
            node.attributes().retentions()["shared"],
            RetentionInterval::from_config(7, 8, 3)
        );
        assert_eq!(results[0].to_string(), "[Attributes] Added pairs: old");
        assert_eq!(
            results[1].to_string(),
            "[Attributes] Keep until: new (18), old (10), shared (18)"
        );
    }

    #[test]
    fn test_update_attributes_drops_expired_keys() {
        let previous = wrap(previous_tree_with_pairs(10));
        let path = sd_path(&["node"]);
        let mut tree = MutableTree::new();
        let mut choices = SDRetentionFilterChoices::new(path.clone(), 3);
        choices.add_pairs_choice(SDChoice::All, (7, 8));
        let results = tree.update(11, &previous, &choices);
        assert!(results.is_empty());
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn test_update_attributes_respects_choice() {
        let previous = wrap(previous_tree_with_pairs(10));
        let path = sd_path(&["node"]);
        let mut tree = MutableTree::new();
        let mut choices = SDRetentionFilterChoices::new(path.clone(), 3);
        choices.add_pairs_choice(SDChoice::keys(["shared"]), (7, 8));
        tree.update(0, &previous, &choices);
        assert_eq!(
            tree.get_tree(&path).attributes().pairs(),
            &row([("shared", "previous")])
        );
    }
}
