//! Header shared by every B+Tree node page.
//!
//! Both leaf and internal pages start with a [`TreePageHeader`]; the
//! [`IndexPageType`] discriminant tells the two apart so a page can be
//! inspected before choosing which typed view to put over it.

use super::codec::{read_u32, write_u32};

/// Kind of B+Tree node stored in a page.
///
/// Uses `#[repr(u32)]` so the discriminant is written as-is to the page.
#[repr(u32)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum IndexPageType {
    /// Uninitialized page (all zeroes).
    #[default]
    Invalid = 0,
    /// Leaf node: sorted (key, value) pairs plus a next-leaf link.
    Leaf = 1,
    /// Internal node: sorted (key, child page id) pairs, key 0 unused.
    Internal = 2,
}

impl IndexPageType {
    /// Convert from u32, returning Invalid for unknown values.
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => IndexPageType::Leaf,
            2 => IndexPageType::Internal,
            _ => IndexPageType::Invalid,
        }
    }
}

/// Metadata at the start of every B+Tree node page.
///
/// # Layout (12 bytes, little-endian)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     page_type (IndexPageType as u32)
/// 4       4     size (number of entries)
/// 8       4     max_size (split threshold)
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreePageHeader {
    pub page_type: IndexPageType,
    pub size: u32,
    pub max_size: u32,
}

impl TreePageHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 12;

    pub const OFFSET_PAGE_TYPE: usize = 0;
    pub const OFFSET_SIZE: usize = 4;
    pub const OFFSET_MAX_SIZE: usize = 8;

    pub fn new(page_type: IndexPageType, max_size: u32) -> Self {
        Self {
            page_type,
            size: 0,
            max_size,
        }
    }

    /// Read a header from the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < TreePageHeader::SIZE`.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert!(data.len() >= Self::SIZE, "buffer too small for TreePageHeader");
        Self {
            page_type: IndexPageType::from_u32(read_u32(data, Self::OFFSET_PAGE_TYPE)),
            size: read_u32(data, Self::OFFSET_SIZE),
            max_size: read_u32(data, Self::OFFSET_MAX_SIZE),
        }
    }

    /// Write this header to the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < TreePageHeader::SIZE`.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for TreePageHeader");
        write_u32(data, Self::OFFSET_PAGE_TYPE, self.page_type as u32);
        write_u32(data, Self::OFFSET_SIZE, self.size);
        write_u32(data, Self::OFFSET_MAX_SIZE, self.max_size);
    }
}

/// Read-only view over any B+Tree node page, before knowing its kind.
pub struct BPlusTreePage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> BPlusTreePage<B> {
    pub fn new(data: B) -> Self {
        Self { data }
    }

    #[inline]
    pub fn page_type(&self) -> IndexPageType {
        IndexPageType::from_u32(read_u32(self.data.as_ref(), TreePageHeader::OFFSET_PAGE_TYPE))
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.page_type() == IndexPageType::Leaf
    }

    #[inline]
    pub fn size(&self) -> usize {
        read_u32(self.data.as_ref(), TreePageHeader::OFFSET_SIZE) as usize
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        read_u32(self.data.as_ref(), TreePageHeader::OFFSET_MAX_SIZE) as usize
    }

    /// Occupancy below which a non-root node must borrow or merge.
    pub fn min_size(&self) -> usize {
        min_size_for(self.page_type(), self.max_size())
    }
}

/// Minimum occupancy of a non-root node.
///
/// Leaves count entries and keep at least `max / 2`; internal nodes count
/// children and keep at least `ceil(max / 2)`. Both choices leave room to
/// merge an underfull node with a sibling that cannot lend.
pub fn min_size_for(page_type: IndexPageType, max_size: usize) -> usize {
    match page_type {
        IndexPageType::Internal => (max_size + 1) / 2,
        _ => max_size / 2,
    }
}
