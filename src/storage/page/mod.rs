//! Page types and layout.
//!
//! This module contains:
//! - [`Page`] - The raw 4KB data container
//! - [`FixedCodec`] - Fixed-width encoding for index keys and values
//! - Typed B+Tree views: [`HeaderPage`], [`LeafPage`], [`InternalPage`]
//!
//! Views borrow page bytes (`&[u8]` or `&mut [u8]`) taken from a page
//! guard and never own them.

mod b_plus_tree_page;
mod codec;
mod header_page;
mod internal_page;
mod leaf_page;
#[allow(clippy::module_inception)]
mod page;

pub use b_plus_tree_page::{min_size_for, BPlusTreePage, IndexPageType, TreePageHeader};
pub use codec::FixedCodec;
pub use header_page::HeaderPage;
pub use internal_page::{internal_capacity, InternalPage};
pub use leaf_page::{leaf_capacity, LeafPage};
pub use page::Page;
