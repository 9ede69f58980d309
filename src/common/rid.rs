//! Record identifier type.

use std::fmt;

use super::PageId;

/// Locates a tuple: the page it lives on and its slot within that page.
///
/// This is the usual value type stored in a B+Tree index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Pack a 64-bit integer the way test fixtures do: high half is the page,
    /// low half the slot.
    pub fn from_i64(value: i64) -> Self {
        let raw = value as u64;
        Self {
            page_id: PageId((raw >> 32) as u32),
            slot: raw as u32,
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_id.0, self.slot)
    }
}
