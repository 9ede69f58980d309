//! Header page of a B+Tree index.
//!
//! The header page is the tree's fixed entry point: it stores only the page
//! id of the current root, so the root can move (on root split or collapse)
//! without the index's identity changing.

use crate::common::PageId;

use super::codec::{read_u32, write_u32};

const OFFSET_ROOT_PAGE_ID: usize = 0;

/// View over a header page. `B` is `&[u8]` or `&mut [u8]`.
pub struct HeaderPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HeaderPage<B> {
    pub fn new(data: B) -> Self {
        Self { data }
    }

    /// Root of the tree, or [`PageId::INVALID`] when the tree is empty.
    #[inline]
    pub fn root_page_id(&self) -> PageId {
        PageId(read_u32(self.data.as_ref(), OFFSET_ROOT_PAGE_ID))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeaderPage<B> {
    #[inline]
    pub fn set_root_page_id(&mut self, root: PageId) {
        write_u32(self.data.as_mut(), OFFSET_ROOT_PAGE_ID, root.0);
    }
}
