//! History of a host's inventory: one entry per transition between two
//! snapshots.
//!
//! Transitions come from two places. Delta-cache files
//! (`<previous|None>_<current>.json`) hold a precomputed
//! `[new, changed, removed, delta_tree]`. Archived snapshots
//! (`<timestamp>.json`), together with the current tree, are paired up in
//! time order and compared on demand; the result is written back to the
//! delta cache unless the newer side is the live tree.

use crate::codec::{deserialize_delta_tree, serialize_delta_tree};
use crate::envelope::parse_dump;
use crate::error::{Result, StoreError};
use crate::fs;
use crate::inventory::load_tree;
use crate::paths::{InventoryPaths, TreePath};
use invtree_core::{ImmutableTree, SDFilterChoice};
use invtree_delta::{compare_trees, filter_delta_tree, ImmutableDeltaTree};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A delta-cache file; `previous_timestamp` is `None` for the first
/// snapshot of a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryDeltaPath {
    pub file_path: PathBuf,
    pub previous_timestamp: Option<i64>,
    pub current_timestamp: i64,
}

/// One snapshot; the empty predecessor of the oldest snapshot has no path
/// and no timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryPath {
    pub tree_path: Option<TreePath>,
    pub timestamp: Option<i64>,
}

impl HistoryPath {
    fn empty() -> Self {
        Self {
            tree_path: None,
            timestamp: None,
        }
    }
}

/// Two consecutive snapshots whose delta is not cached yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryArchivePath {
    pub previous: HistoryPath,
    pub current: HistoryPath,
}

impl HistoryArchivePath {
    pub fn current_timestamp(&self) -> Option<i64> {
        self.current.timestamp
    }
}

/// A transition that can be loaded with [`HistoryStore::load_history_entry`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HistoryTransition {
    Delta(HistoryDeltaPath),
    Archive(HistoryArchivePath),
}

impl HistoryTransition {
    pub fn previous_timestamp(&self) -> Option<i64> {
        match self {
            HistoryTransition::Delta(path) => path.previous_timestamp,
            HistoryTransition::Archive(path) => path.previous.timestamp,
        }
    }

    pub fn current_timestamp(&self) -> Option<i64> {
        match self {
            HistoryTransition::Delta(path) => Some(path.current_timestamp),
            HistoryTransition::Archive(path) => path.current.timestamp,
        }
    }
}

/// A transition, or the file that could not be interpreted.
pub type HistoryPathResult = std::result::Result<HistoryTransition, PathBuf>;

/// What changed between two snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub previous_timestamp: Option<i64>,
    pub current_timestamp: i64,
    pub new: usize,
    pub changed: usize,
    pub removed: usize,
    pub delta_tree: ImmutableDeltaTree,
}

fn count(raw: &Value) -> Result<usize> {
    raw.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| StoreError::malformed(format!("expected a count, got {}", raw)))
}

impl HistoryEntry {
    /// Read the cached `[new, changed, removed, raw_delta_tree]` form.
    pub fn from_raw(
        previous_timestamp: Option<i64>,
        current_timestamp: i64,
        raw: &Value,
    ) -> Result<Self> {
        match raw.as_array().map(Vec::as_slice) {
            Some([new, changed, removed, raw_delta_tree]) => Ok(Self {
                previous_timestamp,
                current_timestamp,
                new: count(new)?,
                changed: count(changed)?,
                removed: count(removed)?,
                delta_tree: deserialize_delta_tree(raw_delta_tree)?,
            }),
            _ => Err(StoreError::malformed(format!(
                "history entry must be [new, changed, removed, delta_tree], got {}",
                raw
            ))),
        }
    }

    /// Counts are taken from the delta tree itself.
    pub fn from_delta_tree(
        previous_timestamp: Option<i64>,
        current_timestamp: i64,
        delta_tree: ImmutableDeltaTree,
    ) -> Self {
        let stats = delta_tree.get_stats();
        Self {
            previous_timestamp,
            current_timestamp,
            new: stats.new,
            changed: stats.changed,
            removed: stats.removed,
            delta_tree,
        }
    }

    fn to_raw(&self) -> Value {
        json!([
            self.new,
            self.changed,
            self.removed,
            serialize_delta_tree(&self.delta_tree),
        ])
    }
}

fn file_stem(file_path: &Path) -> Option<&str> {
    let name = file_path.file_name()?.to_str()?;
    Some(name.strip_suffix(".json").unwrap_or(name))
}

fn parse_delta_cache_name(file_path: &Path) -> Option<(Option<i64>, i64)> {
    let (previous, current) = file_stem(file_path)?.split_once('_')?;
    let previous = match previous {
        "None" => None,
        previous => Some(previous.parse().ok()?),
    };
    Some((previous, current.parse().ok()?))
}

fn list_dir(dir: &Path) -> Result<Option<Vec<PathBuf>>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    let mut file_paths = Vec::new();
    for entry in entries {
        file_paths.push(entry.map_err(|e| StoreError::io(dir, e))?.path());
    }
    file_paths.sort();
    Ok(Some(file_paths))
}

type TransitionKey = (Option<i64>, Option<i64>);

/// Enumerates and loads history entries of hosts below one installation
/// root. Loaded snapshots are memoized per instance.
#[derive(Debug)]
pub struct HistoryStore {
    paths: InventoryPaths,
    lookup: HashMap<(PathBuf, PathBuf), ImmutableTree>,
}

impl HistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: InventoryPaths::new(root),
            lookup: HashMap::new(),
        }
    }

    pub fn paths(&self) -> &InventoryPaths {
        &self.paths
    }

    fn collect_paths_from_delta_cache(
        &self,
        host_name: &str,
    ) -> Result<Vec<std::result::Result<HistoryDeltaPath, PathBuf>>> {
        let Some(file_paths) = list_dir(&self.paths.delta_cache_host(host_name))? else {
            return Ok(Vec::new());
        };
        Ok(file_paths
            .into_iter()
            .map(|file_path| match parse_delta_cache_name(&file_path) {
                Some((previous_timestamp, current_timestamp)) => Ok(HistoryDeltaPath {
                    file_path,
                    previous_timestamp,
                    current_timestamp,
                }),
                None => Err(file_path),
            })
            .collect())
    }

    fn collect_paths_from_archive(
        &self,
        host_name: &str,
    ) -> Result<Vec<std::result::Result<HistoryPath, PathBuf>>> {
        let Some(file_paths) = list_dir(&self.paths.archive_host(host_name))? else {
            return Ok(Vec::new());
        };
        let mut results = vec![Ok(HistoryPath::empty())];
        for file_path in file_paths {
            match file_stem(&file_path).and_then(|stem| stem.parse::<i64>().ok()) {
                Some(timestamp) => results.push(Ok(HistoryPath {
                    tree_path: Some(TreePath::from_archive_or_delta_cache_file_path(&file_path)),
                    timestamp: Some(timestamp),
                })),
                None => results.push(Err(file_path)),
            }
        }

        let tree_path = self.paths.inventory_tree(host_name);
        let mtime = match fs::mtime(&tree_path.path)? {
            Some(mtime) => Some(mtime),
            None => fs::mtime(&tree_path.legacy)?,
        };
        if let Some(mtime) = mtime {
            results.push(Ok(HistoryPath {
                tree_path: Some(tree_path),
                timestamp: Some(mtime),
            }));
        }
        Ok(results)
    }

    /// All transitions of `host_name`, oldest first, followed by the files
    /// whose names could not be parsed. Cached deltas win over archive
    /// pairs covering the same transition.
    ///
    /// # Errors
    ///
    /// Only fails if a history directory exists but cannot be listed.
    pub fn collect_history_paths(&self, host_name: &str) -> Result<Vec<HistoryPathResult>> {
        let mut results = Vec::new();
        let mut known: BTreeMap<TransitionKey, HistoryTransition> = BTreeMap::new();
        for result in self.collect_paths_from_delta_cache(host_name)? {
            match result {
                Ok(path) => {
                    known.insert(
                        (path.previous_timestamp, Some(path.current_timestamp)),
                        HistoryTransition::Delta(path),
                    );
                }
                Err(file_path) => results.push(Err(file_path)),
            }
        }

        let mut corrupted = Vec::new();
        let mut snapshots = Vec::new();
        for result in self.collect_paths_from_archive(host_name)? {
            match result {
                Ok(path) => snapshots.push(path),
                Err(file_path) => corrupted.push(file_path),
            }
        }
        snapshots.sort_by_key(|path| path.timestamp);
        for pair in snapshots.windows(2) {
            let key = (pair[0].timestamp, pair[1].timestamp);
            known.entry(key).or_insert_with(|| {
                HistoryTransition::Archive(HistoryArchivePath {
                    previous: pair[0].clone(),
                    current: pair[1].clone(),
                })
            });
        }

        let mut transitions: Vec<(TransitionKey, HistoryTransition)> = known.into_iter().collect();
        transitions.sort_by_key(|(key, _)| key.1);
        results.extend(transitions.into_iter().map(|(_, path)| Ok(path)));
        results.extend(corrupted.into_iter().map(Err));
        Ok(results)
    }

    fn lookup_tree(&mut self, tree_path: Option<&TreePath>) -> Result<ImmutableTree> {
        let Some(tree_path) = tree_path else {
            return Ok(ImmutableTree::new());
        };
        let key = (tree_path.path.clone(), tree_path.legacy.clone());
        if let Some(tree) = self.lookup.get(&key) {
            return Ok(tree.clone());
        }
        let tree = load_tree(tree_path)?;
        self.lookup.insert(key, tree.clone());
        Ok(tree)
    }

    fn load_delta_cache_entry(&self, path: &HistoryDeltaPath) -> Result<HistoryEntry> {
        let dump = fs::load_bytes(&path.file_path)?.ok_or_else(|| {
            StoreError::malformed(format!("{} is empty or missing", path.file_path.display()))
        })?;
        let raw = if path.file_path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_slice(&dump)?
        } else {
            parse_dump(&dump)?
        };
        HistoryEntry::from_raw(path.previous_timestamp, path.current_timestamp, &raw)
    }

    fn snapshot_files(path: &HistoryPath) -> Vec<PathBuf> {
        path.tree_path
            .iter()
            .flat_map(|tree_path| [tree_path.path.clone(), tree_path.legacy.clone()])
            .collect()
    }

    /// Load one transition. Failures are reported as the files involved so
    /// callers can list them as corrupted.
    ///
    /// An archive pair is compared on the fly. A pair without any change is
    /// treated as corrupted; otherwise the entry is written to the delta
    /// cache unless its newer side is the live tree.
    pub fn load_history_entry(
        &mut self,
        host_name: &str,
        transition: &HistoryTransition,
    ) -> std::result::Result<HistoryEntry, Vec<PathBuf>> {
        match transition {
            HistoryTransition::Delta(path) => {
                self.load_delta_cache_entry(path).map_err(|e| {
                    warn!(
                        host = %host_name,
                        path = %path.file_path.display(),
                        error = %e,
                        "Corrupted delta cache file"
                    );
                    vec![path.file_path.clone()]
                })
            }
            HistoryTransition::Archive(path) => {
                let mut files = Self::snapshot_files(&path.current);
                files.extend(Self::snapshot_files(&path.previous));
                let Some(current_timestamp) = path.current.timestamp else {
                    return Err(files);
                };
                let trees = self
                    .lookup_tree(path.current.tree_path.as_ref())
                    .and_then(|current| {
                        Ok((current, self.lookup_tree(path.previous.tree_path.as_ref())?))
                    });
                let (current, previous) = match trees {
                    Ok(trees) => trees,
                    Err(e) => {
                        warn!(host = %host_name, error = %e, "Corrupted inventory snapshot");
                        return Err(files);
                    }
                };

                let entry = HistoryEntry::from_delta_tree(
                    path.previous.timestamp,
                    current_timestamp,
                    compare_trees(&current, &previous),
                );
                if entry.new == 0 && entry.changed == 0 && entry.removed == 0 {
                    return Err(files);
                }
                let is_live = path.current.tree_path.as_ref()
                    == Some(&self.paths.inventory_tree(host_name));
                if !is_live {
                    if let Err(e) = self.save_history_entry(host_name, &entry) {
                        warn!(host = %host_name, error = %e, "Could not cache history entry");
                    }
                }
                Ok(entry)
            }
        }
    }

    /// Write `entry` to the delta cache and drop its legacy file.
    ///
    /// # Panics
    ///
    /// Panics if the entry's previous timestamp is not older than its
    /// current one.
    pub fn save_history_entry(&self, host_name: &str, entry: &HistoryEntry) -> Result<()> {
        let tree_path = self.paths.delta_cache_tree(
            host_name,
            entry.previous_timestamp,
            entry.current_timestamp,
        );
        fs::save_text(&tree_path.path, &entry.to_raw().to_string())?;
        fs::unlink_missing_ok(&tree_path.legacy)?;
        debug!(host = %host_name, path = %tree_path.path.display(), "Cached history entry");
        Ok(())
    }
}

/// Loaded entries plus every file that could not be read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct History {
    pub entries: Vec<HistoryEntry>,
    pub corrupted: Vec<PathBuf>,
}

/// Load the history of `host_name`.
///
/// `paths_filter` picks which transitions to load, e.g. only the newest
/// one. With `delta_tree_filters`, every delta tree is filtered and entries
/// left without changes are dropped.
pub fn load_history<F>(
    store: &mut HistoryStore,
    host_name: &str,
    paths_filter: F,
    delta_tree_filters: Option<&[SDFilterChoice]>,
) -> Result<History>
where
    F: FnOnce(Vec<HistoryTransition>) -> Vec<HistoryTransition>,
{
    let mut transitions = Vec::new();
    let mut corrupted = BTreeSet::new();
    for result in store.collect_history_paths(host_name)? {
        match result {
            Ok(transition) => transitions.push(transition),
            Err(file_path) => {
                warn!(host = %host_name, path = %file_path.display(), "Unparseable history file name");
                corrupted.insert(file_path);
            }
        }
    }

    let mut entries = Vec::new();
    for transition in paths_filter(transitions) {
        match store.load_history_entry(host_name, &transition) {
            Ok(entry) => entries.push(entry),
            Err(file_paths) => corrupted.extend(file_paths),
        }
    }

    if let Some(filters) = delta_tree_filters {
        entries = entries
            .into_iter()
            .filter_map(|entry| {
                let delta_tree = filter_delta_tree(&entry.delta_tree, filters);
                (!delta_tree.is_empty()).then(|| {
                    HistoryEntry::from_delta_tree(
                        entry.previous_timestamp,
                        entry.current_timestamp,
                        delta_tree,
                    )
                })
            })
            .collect();
    }

    Ok(History {
        entries,
        corrupted: corrupted.into_iter().collect(),
    })
}
