//! Current, status-data and archived inventory trees of a host.

use crate::codec::{deserialize_tree, serialize_tree};
use crate::config::StoreConfig;
use crate::envelope::{gzip, parse_dump, parse_from_gzipped, SDMeta, SDMetaAndRawTree};
use crate::error::{Result, StoreError};
use crate::fs::{self, FileLock};
use crate::paths::{InventoryPaths, TreePath, TreePathGz};
use invtree_core::{ImmutableTree, TreeView};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Load from the modern path, falling back to the legacy one.
pub(crate) fn load_tree(tree_path: &TreePath) -> Result<ImmutableTree> {
    if let Some(text) = fs::load_text(&tree_path.path)? {
        return deserialize_tree(&serde_json::from_str(&text)?);
    }
    if let Some(dump) = fs::load_bytes(&tree_path.legacy)? {
        return deserialize_tree(&parse_dump(&dump)?);
    }
    Ok(ImmutableTree::new())
}

fn save_raw_tree(tree_path: &TreePath, raw_tree: &Value) -> Result<()> {
    let mut text = serde_json::to_string(raw_tree)?;
    text.push('\n');
    fs::save_text(&tree_path.path, &text)
}

fn save_raw_tree_gz(
    tree_path_gz: &TreePathGz,
    meta_and_raw_tree: &SDMetaAndRawTree,
    config: &StoreConfig,
) -> Result<()> {
    fs::save_bytes(
        &tree_path_gz.path,
        &gzip(meta_and_raw_tree, config.compression())?,
    )
}

/// Modification time of the current tree and whether it is the modern file.
fn compute_mtime(tree_path: &TreePath) -> Result<Option<(i64, bool)>> {
    if let Some(mtime) = fs::mtime(&tree_path.path)? {
        return Ok(Some((mtime, true)));
    }
    Ok(fs::mtime(&tree_path.legacy)?.map(|mtime| (mtime, false)))
}

fn archive_inventory_tree(paths: &InventoryPaths, host_name: &str) -> Result<()> {
    let tree_path = paths.inventory_tree(host_name);
    let Some((mtime, is_json)) = compute_mtime(&tree_path)? else {
        return Ok(());
    };
    let tree_path_gz = paths.inventory_tree_gz(host_name);
    let archive_tree = paths.archive_tree(host_name, mtime);

    if is_json {
        let archive_host = paths.archive_host(host_name);
        std::fs::create_dir_all(&archive_host)
            .map_err(|e| StoreError::io(&archive_host, e))?;
        std::fs::rename(&tree_path.path, &archive_tree.path)
            .map_err(|e| StoreError::io(&tree_path.path, e))?;
        fs::unlink_missing_ok(&tree_path_gz.path)?;
        fs::unlink_missing_ok(&tree_path.legacy)?;
        fs::unlink_missing_ok(&tree_path_gz.legacy)?;
        info!(host = %host_name, path = %archive_tree.path.display(), "Archived inventory tree");
        return Ok(());
    }

    if let Some(dump) = fs::load_bytes(&tree_path.legacy)? {
        let raw_tree = parse_dump(&dump)?;
        fs::save_text(&archive_tree.path, &serde_json::to_string(&raw_tree)?)?;
        fs::unlink_missing_ok(&tree_path.legacy)?;
        fs::unlink_missing_ok(&tree_path_gz.legacy)?;
        info!(
            host = %host_name,
            path = %archive_tree.path.display(),
            "Archived legacy inventory tree"
        );
    }
    Ok(())
}

fn archive_timestamp(file_path: &Path) -> Option<i64> {
    let name = file_path.file_name()?.to_str()?;
    name.strip_suffix(".json").unwrap_or(name).parse().ok()
}

/// Stores trees that were computed elsewhere and arrive already serialized.
#[derive(Clone, Debug)]
pub struct RawInventoryStore {
    paths: InventoryPaths,
    config: StoreConfig,
}

impl RawInventoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, StoreConfig::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: StoreConfig) -> Self {
        Self {
            paths: InventoryPaths::new(root),
            config,
        }
    }

    /// Write both artifacts and stamp their modification time with
    /// `timestamp`, the moment the inventory was taken.
    pub fn save_meta_and_raw_inventory_tree(
        &self,
        host_name: &str,
        meta_and_raw_tree: &SDMetaAndRawTree,
        timestamp: i64,
    ) -> Result<()> {
        let tree_path = self.paths.inventory_tree(host_name);
        save_raw_tree(&tree_path, &meta_and_raw_tree.raw_tree)?;
        fs::unlink_missing_ok(&tree_path.legacy)?;
        fs::set_mtime(&tree_path.path, timestamp)?;

        let tree_path_gz = self.paths.inventory_tree_gz(host_name);
        save_raw_tree_gz(&tree_path_gz, meta_and_raw_tree, &self.config)?;
        fs::unlink_missing_ok(&tree_path_gz.legacy)?;
        fs::set_mtime(&tree_path_gz.path, timestamp)?;
        debug!(host = %host_name, timestamp, "Saved raw inventory tree");
        Ok(())
    }

    pub fn archive_inventory_tree(&self, host_name: &str) -> Result<()> {
        archive_inventory_tree(&self.paths, host_name)
    }
}

/// Reads and writes the per-host inventory and status-data trees.
#[derive(Clone, Debug)]
pub struct InventoryStore {
    paths: InventoryPaths,
    config: StoreConfig,
}

impl InventoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, StoreConfig::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: StoreConfig) -> Self {
        Self {
            paths: InventoryPaths::new(root),
            config,
        }
    }

    pub fn paths(&self) -> &InventoryPaths {
        &self.paths
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn touch_marker(&self, marker: &Path) -> Result<()> {
        if self.config.touch_marker_files {
            fs::touch(marker)?;
        }
        Ok(())
    }

    /// A missing tree loads as the empty tree.
    pub fn load_inventory_tree(&self, host_name: &str) -> Result<ImmutableTree> {
        load_tree(&self.paths.inventory_tree(host_name))
    }

    /// Write the plain tree and the gzip envelope, drop their legacy files
    /// and touch the inventory marker.
    pub fn save_inventory_tree<T: TreeView>(
        &self,
        host_name: &str,
        tree: &T,
        meta: &SDMeta,
    ) -> Result<()> {
        let raw_tree = serialize_tree(tree);

        let tree_path = self.paths.inventory_tree(host_name);
        save_raw_tree(&tree_path, &raw_tree)?;
        fs::unlink_missing_ok(&tree_path.legacy)?;

        let tree_path_gz = self.paths.inventory_tree_gz(host_name);
        let meta_and_raw_tree = SDMetaAndRawTree {
            meta: meta.clone(),
            raw_tree,
        };
        save_raw_tree_gz(&tree_path_gz, &meta_and_raw_tree, &self.config)?;
        fs::unlink_missing_ok(&tree_path_gz.legacy)?;

        self.touch_marker(&self.paths.inventory_marker_file())?;
        debug!(host = %host_name, facts = tree.len(), "Saved inventory tree");
        Ok(())
    }

    pub fn remove_inventory_tree(&self, host_name: &str) -> Result<()> {
        let tree_path = self.paths.inventory_tree(host_name);
        fs::unlink_missing_ok(&tree_path.path)?;
        fs::unlink_missing_ok(&tree_path.legacy)?;

        let tree_path_gz = self.paths.inventory_tree_gz(host_name);
        fs::unlink_missing_ok(&tree_path_gz.path)?;
        fs::unlink_missing_ok(&tree_path_gz.legacy)
    }

    pub fn load_status_data_tree(&self, host_name: &str) -> Result<ImmutableTree> {
        load_tree(&self.paths.status_data_tree(host_name))
    }

    pub fn save_status_data_tree<T: TreeView>(&self, host_name: &str, tree: &T) -> Result<()> {
        let tree_path = self.paths.status_data_tree(host_name);
        save_raw_tree(&tree_path, &serialize_tree(tree))?;
        fs::unlink_missing_ok(&tree_path.legacy)?;
        self.touch_marker(&self.paths.status_data_marker_file())?;
        debug!(host = %host_name, facts = tree.len(), "Saved status data tree");
        Ok(())
    }

    pub fn remove_status_data_tree(&self, host_name: &str) -> Result<()> {
        let tree_path = self.paths.status_data_tree(host_name);
        fs::unlink_missing_ok(&tree_path.path)?;
        fs::unlink_missing_ok(&tree_path.legacy)
    }

    /// The current tree if it has any facts, otherwise the newest archived
    /// snapshot, otherwise the empty tree.
    pub fn load_previous_inventory_tree(&self, host_name: &str) -> Result<ImmutableTree> {
        let tree = self.load_inventory_tree(host_name)?;
        if !tree.is_empty() {
            return Ok(tree);
        }

        let archive_host = self.paths.archive_host(host_name);
        let entries = match std::fs::read_dir(&archive_host) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(tree),
            Err(e) => return Err(StoreError::io(&archive_host, e)),
        };
        let mut latest: Option<(i64, PathBuf)> = None;
        for entry in entries {
            let file_path = entry
                .map_err(|e| StoreError::io(&archive_host, e))?
                .path();
            match archive_timestamp(&file_path) {
                Some(timestamp) => {
                    if latest.as_ref().map_or(true, |(newest, _)| timestamp > *newest) {
                        latest = Some((timestamp, file_path));
                    }
                }
                None => {
                    warn!(
                        host = %host_name,
                        path = %file_path.display(),
                        "Skipping archive file without a timestamp name"
                    );
                }
            }
        }
        match latest {
            Some((_, file_path)) => {
                load_tree(&TreePath::from_archive_or_delta_cache_file_path(&file_path))
            }
            None => Ok(tree),
        }
    }

    /// Move the current tree into the archive, named by its modification
    /// time. Does nothing if the host has no current tree.
    pub fn archive_inventory_tree(&self, host_name: &str) -> Result<()> {
        archive_inventory_tree(&self.paths, host_name)
    }
}

/// A tree artifact whose legacy file can be migrated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LegacyTreePath {
    Tree(TreePath),
    TreeGz(TreePathGz),
}

impl From<TreePath> for LegacyTreePath {
    fn from(tree_path: TreePath) -> Self {
        LegacyTreePath::Tree(tree_path)
    }
}

impl From<TreePathGz> for LegacyTreePath {
    fn from(tree_path_gz: TreePathGz) -> Self {
        LegacyTreePath::TreeGz(tree_path_gz)
    }
}

fn transform_locked(
    path: &Path,
    legacy: &Path,
    mtime: i64,
    rewrite: impl FnOnce(&[u8]) -> Result<()>,
) -> Result<bool> {
    let mut rewritten = false;
    {
        let _modern = FileLock::acquire(path)?;
        let _legacy = FileLock::acquire(legacy)?;
        if let Some(dump) = fs::load_bytes(legacy)? {
            rewrite(&dump)?;
            fs::set_mtime(path, mtime)?;
            rewritten = true;
        }
    }
    // locking creates the modern file; don't leave an empty one behind
    if !rewritten && fs::load_bytes(path)?.is_none() {
        fs::unlink_missing_ok(path)?;
    }
    fs::unlink_missing_ok(legacy)?;
    Ok(rewritten)
}

/// Rewrite the legacy file of `tree_path` to its modern location, keep the
/// original modification time `mtime` and remove the legacy file. Both
/// files are locked while rewriting. Running it again is a no-op.
pub fn transform(
    tree_path: impl Into<LegacyTreePath>,
    mtime: i64,
    config: &StoreConfig,
) -> Result<()> {
    let (path, rewritten) = match tree_path.into() {
        LegacyTreePath::Tree(tree_path) => {
            let rewritten = transform_locked(&tree_path.path, &tree_path.legacy, mtime, |dump| {
                save_raw_tree(&tree_path, &parse_dump(dump)?)
            })?;
            (tree_path.path, rewritten)
        }
        LegacyTreePath::TreeGz(tree_path_gz) => {
            let rewritten =
                transform_locked(&tree_path_gz.path, &tree_path_gz.legacy, mtime, |gzipped| {
                    save_raw_tree_gz(&tree_path_gz, &parse_from_gzipped(gzipped)?, config)
                })?;
            (tree_path_gz.path, rewritten)
        }
    };
    if rewritten {
        info!(path = %path.display(), mtime, "Migrated legacy inventory file");
    }
    Ok(())
}

/// Which artifacts a host rename moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenameCategory {
    /// Current, gzip or status-data trees.
    Inventory,
    /// Archive or delta-cache directories.
    Archive,
}

impl RenameCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenameCategory::Inventory => "inv",
            RenameCategory::Archive => "invarch",
        }
    }
}

impl fmt::Display for RenameCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Move every artifact of `old_host_name` to `new_host_name`. Missing
/// artifacts are skipped; the result names the categories that moved.
pub fn rename_host(
    root: impl Into<PathBuf>,
    old_host_name: &str,
    new_host_name: &str,
) -> Result<BTreeSet<RenameCategory>> {
    let paths = InventoryPaths::new(root);
    let old_tree = paths.inventory_tree(old_host_name);
    let new_tree = paths.inventory_tree(new_host_name);
    let old_gz = paths.inventory_tree_gz(old_host_name);
    let new_gz = paths.inventory_tree_gz(new_host_name);
    let old_status = paths.status_data_tree(old_host_name);
    let new_status = paths.status_data_tree(new_host_name);

    let mut moved = BTreeSet::new();
    for (from, to) in [
        (&old_tree.path, &new_tree.path),
        (&old_tree.legacy, &new_tree.legacy),
        (&old_gz.path, &new_gz.path),
        (&old_gz.legacy, &new_gz.legacy),
        (&old_status.path, &new_status.path),
        (&old_status.legacy, &new_status.legacy),
    ] {
        if fs::rename_missing_ok(from, to)? {
            moved.insert(RenameCategory::Inventory);
        }
    }
    for (from, to) in [
        (
            paths.archive_host(old_host_name),
            paths.archive_host(new_host_name),
        ),
        (
            paths.delta_cache_host(old_host_name),
            paths.delta_cache_host(new_host_name),
        ),
    ] {
        if fs::rename_missing_ok(&from, &to)? {
            moved.insert(RenameCategory::Archive);
        }
    }
    info!(
        old = %old_host_name,
        new = %new_host_name,
        moved = ?moved.iter().map(RenameCategory::as_str).collect::<Vec<_>>(),
        "Renamed inventory host"
    );
    Ok(moved)
}
