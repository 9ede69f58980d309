//! B+Tree index.
//!
//! # Components
//! - [`BPlusTree`] - Unique-key index with latch-crabbing insert and remove
//! - [`IndexIterator`] - Forward cursor over the leaf chain
//! - [`KeyComparator`] - Pluggable key order ([`OrdComparator`], closures,
//!   [`GenericComparator`])
//! - [`GenericKey`] - Fixed-width byte key

mod b_plus_tree;
mod context;
mod iterator;
mod key;

pub use b_plus_tree::BPlusTree;
pub use iterator::IndexIterator;
pub use key::{GenericComparator, GenericKey, KeyComparator, OrdComparator};
