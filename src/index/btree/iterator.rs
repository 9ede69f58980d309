//! Ordered iteration over B+Tree leaves.

use std::fmt;

use log::trace;

use crate::buffer::PageReadGuard;
use crate::common::{Error, PageId, Result};
use crate::storage::page::{FixedCodec, LeafPage};

use super::{BPlusTree, KeyComparator, OrdComparator};

/// Cursor over the leaf chain.
///
/// Holds a read latch on the leaf it is positioned on and nothing else. To
/// cross to the next leaf it first releases the current one, so it never
/// waits for a latch while holding another.
///
/// Entries are yielded in strictly increasing key order even while other
/// threads split and merge leaves. On entering a leaf the cursor skips keys
/// it has already passed, and if the next leaf was merged away it
/// re-descends from the root. An entry that a concurrent rebalance moves
/// into a leaf behind the cursor is not seen.
///
/// Besides the explicit cursor API ([`current`](Self::current),
/// [`advance`](Self::advance), [`is_end`](Self::is_end)) it is an
/// [`Iterator`] of `Result<(K, V)>`; an error ends the iteration.
pub struct IndexIterator<'a, K, V, C = OrdComparator> {
    tree: &'a BPlusTree<K, V, C>,
    /// `None` at the end.
    guard: Option<PageReadGuard<'a>>,
    index: usize,
    /// Largest key on the last leaf the cursor left.
    passed: Option<K>,
    pending_error: Option<Error>,
}

impl<'a, K, V, C> IndexIterator<'a, K, V, C>
where
    K: FixedCodec,
    V: FixedCodec,
    C: KeyComparator<K>,
{
    /// Position at `index` of an already latched leaf, skipping forward if
    /// that is past its last entry.
    pub(crate) fn new(
        tree: &'a BPlusTree<K, V, C>,
        guard: PageReadGuard<'a>,
        index: usize,
    ) -> Result<Self> {
        let mut iter = Self {
            tree,
            guard: Some(guard),
            index,
            passed: None,
            pending_error: None,
        };
        iter.settle()?;
        Ok(iter)
    }

    pub(crate) fn end(tree: &'a BPlusTree<K, V, C>) -> Self {
        Self {
            tree,
            guard: None,
            index: 0,
            passed: None,
            pending_error: None,
        }
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        self.guard.is_none()
    }

    /// Page the cursor is positioned on, `PageId::INVALID` at the end.
    pub fn page_id(&self) -> PageId {
        self.guard
            .as_ref()
            .map_or(PageId::INVALID, |guard| guard.page_id())
    }

    /// Entry under the cursor, `None` at the end.
    pub fn current(&self) -> Option<(K, V)> {
        let guard = self.guard.as_ref()?;
        let leaf = LeafPage::<_, K, V>::new(guard.as_slice());
        Some(leaf.entry_at(self.index))
    }

    /// Step to the next entry. A no-op at the end.
    ///
    /// # Errors
    /// Propagates failures to fetch the next leaf; the cursor is then at the
    /// end.
    pub fn advance(&mut self) -> Result<()> {
        if self.guard.is_none() {
            return Ok(());
        }
        self.index += 1;
        self.settle()
    }

    /// Move forward along the chain until `index` names a real entry.
    fn settle(&mut self) -> Result<()> {
        let tree = self.tree;
        loop {
            let Some(guard) = self.guard.as_ref() else {
                return Ok(());
            };
            let leaf = LeafPage::<_, K, V>::new(guard.as_slice());
            if self.index < leaf.size() {
                return Ok(());
            }
            let next = leaf.next_page_id();
            if let Some(last) = leaf.size().checked_sub(1) {
                self.passed = Some(leaf.key_at(last));
            }

            // release before latching the neighbour
            self.guard = None;
            self.index = 0;
            if !next.is_valid() {
                return Ok(());
            }
            let guard = match tree.buffer_pool().fetch_page_read(next) {
                Ok(guard) => guard,
                Err(Error::PageNotFound(_)) => {
                    trace!("index {}: leaf {} vanished, re-seeking", tree.name(), next);
                    self.reseek()?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            // a leaf emptied by a merge that has not been reclaimed yet
            if LeafPage::<_, K, V>::new(guard.as_slice()).size() == 0 {
                drop(guard);
                self.reseek()?;
                continue;
            }
            self.index = match &self.passed {
                Some(passed) => tree.slot_past(&guard, passed),
                None => 0,
            };
            self.guard = Some(guard);
        }
    }

    /// Descend again to the first key past everything already yielded.
    fn reseek(&mut self) -> Result<()> {
        if let Some((guard, index)) = self.tree.seek_past(self.passed.as_ref())? {
            self.guard = Some(guard);
            self.index = index;
        }
        Ok(())
    }
}

impl<K, V, C> Iterator for IndexIterator<'_, K, V, C>
where
    K: FixedCodec,
    V: FixedCodec,
    C: KeyComparator<K>,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e));
        }
        let item = self.current()?;
        if let Err(e) = self.advance() {
            self.pending_error = Some(e);
        }
        Some(Ok(item))
    }
}

impl<K, V, C> PartialEq for IndexIterator<'_, K, V, C> {
    /// Same leaf and slot, or both at the end.
    fn eq(&self, other: &Self) -> bool {
        match (&self.guard, &other.guard) {
            (None, None) => true,
            (Some(a), Some(b)) => a.page_id() == b.page_id() && self.index == other.index,
            _ => false,
        }
    }
}

impl<K, V, C> fmt::Debug for IndexIterator<'_, K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.guard {
            Some(guard) => f
                .debug_struct("IndexIterator")
                .field("page_id", &guard.page_id())
                .field("index", &self.index)
                .finish(),
            None => f.write_str("IndexIterator(end)"),
        }
    }
}
