//! # invtree-delta
//!
//! Differences between two inventory snapshots.
//!
//! This crate provides:
//! - `SDDeltaValue`: an old/new pair, where a null side means added or removed
//! - `compare_trees`: current vs. previous tree into an `ImmutableDeltaTree`
//! - `DeltaStats`: new/changed/removed counters over a delta subtree
//! - `filter_delta_tree`: the inventory filter rules applied to deltas
//!
//! Delta attributes never carry unchanged pairs. A delta table row that has
//! any change carries all of its columns, unchanged ones as `(v, v)`.

mod compare;
mod filter;
mod tree;
mod value;

pub use compare::compare_trees;
pub use filter::filter_delta_tree;
pub use tree::{DeltaAttributes, DeltaRow, DeltaTable, ImmutableDeltaTree};
pub use value::{encode_as_new, encode_as_removed, DeltaStats, EncodeAs, SDDeltaValue};
