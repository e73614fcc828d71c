//! # invtree-store
//!
//! Persistence for structured inventory trees.
//!
//! This crate provides:
//! - Wire codec: typed JSON trees and delta trees, plus the legacy heuristic
//!   for untyped structures and a reader for Python-literal dumps
//! - Gzip envelope with metadata, accepting both the current and the pre-meta
//!   shape
//! - File layout with modern and legacy locations, and the one-way migration
//!   between them
//! - Inventory store: current, status-data and archived trees per host
//! - History: cached and on-demand deltas between consecutive snapshots,
//!   with per-file corruption reporting
//!
//! ## Architecture
//!
//! Every artifact is written atomically (temporary file and rename) and read
//! from its modern location first, then from its legacy location. Missing
//! trees load as the empty tree. Errors inside one history entry never abort
//! the whole history; the files involved are reported as corrupted instead.
//!
//! ## Example
//!
//! ```rust,no_run
//! use invtree_core::{row, sd_path, MutableTree};
//! use invtree_store::{make_meta, InventoryStore};
//!
//! # fn main() -> invtree_store::Result<()> {
//! let store = InventoryStore::new("/omd/sites/mysite");
//! let mut tree = MutableTree::new();
//! tree.add_pairs(&sd_path(&["hardware", "cpu"]), row([("cores", 8)]));
//!
//! store.archive_inventory_tree("web01")?;
//! store.save_inventory_tree("web01", &tree, &make_meta(true))?;
//! assert_eq!(store.load_inventory_tree("web01")?, tree);
//! # Ok(())
//! # }
//! ```

mod codec;
mod config;
mod envelope;
mod error;
mod fs;
mod history;
mod inventory;
mod legacy;
mod literal;
mod paths;

pub use codec::{deserialize_delta_tree, deserialize_tree, serialize_delta_tree, serialize_tree};
pub use config::StoreConfig;
pub use envelope::{
    make_meta, parse_dump, parse_from_gzipped, parse_from_raw_status_data_tree,
    parse_from_unzipped, SDMeta, SDMetaAndRawTree, META_VERSION,
};
pub use error::{Result, StoreError};
pub use history::{
    load_history, History, HistoryArchivePath, HistoryDeltaPath, HistoryEntry, HistoryPath,
    HistoryPathResult, HistoryStore, HistoryTransition,
};
pub use inventory::{
    rename_host, transform, InventoryStore, LegacyTreePath, RawInventoryStore, RenameCategory,
};
pub use paths::{InventoryPaths, TreePath, TreePathGz};
