//! Latch-crabbing state for structural B+Tree operations.

use std::collections::VecDeque;

use crate::buffer::PageWriteGuard;
use crate::common::{Error, PageId, Result};

/// Write guards held by an insert or remove on its way down.
///
/// `write_set` runs from the highest still-latched node down to the current
/// one. `child_indexes[j]` is the slot in `write_set[j]` that points at
/// `write_set[j + 1]`, so the two deques always differ in length by one
/// while descending.
pub(crate) struct Context<'a> {
    /// Held only while the root itself may change.
    pub header: Option<PageWriteGuard<'a>>,
    pub root_page_id: PageId,
    pub write_set: VecDeque<PageWriteGuard<'a>>,
    pub child_indexes: VecDeque<usize>,
}

impl<'a> Context<'a> {
    pub fn new(header: PageWriteGuard<'a>, root_page_id: PageId) -> Self {
        Self {
            header: Some(header),
            root_page_id,
            write_set: VecDeque::new(),
            child_indexes: VecDeque::new(),
        }
    }

    /// The node about to be pushed is safe: nothing above it can change.
    pub fn release_ancestors(&mut self) {
        self.header = None;
        self.write_set.clear();
        self.child_indexes.clear();
    }

    pub fn pop_node(&mut self) -> Result<PageWriteGuard<'a>> {
        self.write_set
            .pop_back()
            .ok_or_else(|| Error::InvariantViolation("crabbing write set is empty".into()))
    }

    pub fn pop_child_index(&mut self) -> Result<usize> {
        self.child_indexes
            .pop_back()
            .ok_or_else(|| Error::InvariantViolation("crabbing child path is empty".into()))
    }

    pub fn header_mut(&mut self) -> Result<&mut PageWriteGuard<'a>> {
        self.header
            .as_mut()
            .ok_or_else(|| Error::InvariantViolation("root change without header latch".into()))
    }

    #[inline]
    pub fn is_root(&self, page_id: PageId) -> bool {
        page_id == self.root_page_id
    }
}
