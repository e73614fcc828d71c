//! # invtree-core
//!
//! In-memory engine for structured inventory trees.
//!
//! This crate provides:
//! - Values, keys, paths and rows with a total order for row identity
//! - Retention stamps deciding whether previously seen facts survive an update
//! - Path-scoped filter rules compiled into a prefix tree
//! - Mutable trees (built per inventory cycle) and immutable trees (persisted,
//!   filtered, merged) that compare equal across variants
//!
//! ## Example
//!
//! ```rust
//! use invtree_core::{filter_tree, row, sd_path, MutableTree, SDChoice, SDFilterChoice, TreeView};
//!
//! let mut tree = MutableTree::new();
//! tree.add_pairs(&sd_path(&["hardware", "cpu"]), row([("arch", "x86_64"), ("cores", "4")]));
//!
//! let only_arch = SDFilterChoice::new(
//!     sd_path(&["hardware", "cpu"]),
//!     SDChoice::keys(["arch"]),
//!     SDChoice::Nothing,
//!     SDChoice::Nothing,
//! );
//! let filtered = filter_tree(&tree, &[only_arch]);
//! assert_eq!(filtered.len(), 1);
//! ```

mod config;
mod filter;
mod merge;
mod retention;
mod tree;
mod update;
mod value;

pub use config::RawIntervalFromConfig;
pub use filter::{filter_tree, FilterTree, SDChoice, SDFilterChoice};
pub use merge::merge_trees;
pub use retention::{
    RetentionFilterChoice, RetentionInterval, RetentionSource, SDRetentionFilterChoices,
};
pub use tree::{trees_equal, Attributes, ImmutableTree, MutableTree, Table, TableRetentions, TreeView};
pub use update::{UpdateKind, UpdateResult};
pub use value::{
    make_row_ident, parse_visible_raw_path, row, sd_path, Row, SDKey, SDNodeName, SDPath,
    SDRowIdent, SDValue,
};
