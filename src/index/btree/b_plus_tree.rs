//! Disk-resident B+Tree built on the buffer pool.
//!
//! Every node is a page reached through a page guard. Readers crab down with
//! read latches, releasing a parent once the child is latched. Writers crab
//! down with write latches and keep the header page and all ancestors latched
//! until they reach a node that the operation cannot split (insert) or drain
//! (remove).

use std::cmp::Ordering;
use std::fmt::{self, Write as _};
use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::buffer::{BufferPoolManager, PageReadGuard, PageWriteGuard};
use crate::common::{Error, PageId, Result};
use crate::storage::page::{
    internal_capacity, leaf_capacity, BPlusTreePage, FixedCodec, HeaderPage, IndexPageType,
    InternalPage, LeafPage,
};

use super::context::Context;
use super::iterator::IndexIterator;
use super::key::{KeyComparator, OrdComparator};

/// Which leaf a read descent is heading for.
enum Descent<'k, K> {
    Leftmost,
    Key(&'k K),
}

/// Outcome of repairing one underfull node.
enum Repair {
    /// A sibling lent an entry; the parent only had a key rewritten.
    Borrowed,
    /// Two siblings became one and the parent lost a slot. Holds the page
    /// that is now empty.
    Merged(PageId),
}

/// Sibling latches for one underfull level, taken before the leaf changes.
struct Siblings<'a> {
    left: Option<PageWriteGuard<'a>>,
    right: Option<PageWriteGuard<'a>>,
}

/// A unique-key B+Tree index mapping `K` to `V`.
///
/// The tree is identified by its header page, which stores the current root
/// page id. `C` decides key order; it defaults to `K`'s [`Ord`].
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use tesseradb::buffer::BufferPoolManager;
/// use tesseradb::index::btree::BPlusTree;
/// use tesseradb::storage::DiskManager;
///
/// let dir = tempfile::tempdir().unwrap();
/// let dm = DiskManager::create(dir.path().join("index.db")).unwrap();
/// let bpm = Arc::new(BufferPoolManager::new(32, dm));
///
/// let tree = BPlusTree::<i64, u64>::create("orders_pk", bpm).unwrap();
/// assert!(tree.insert(&7, &700).unwrap());
/// assert!(!tree.insert(&7, &701).unwrap());
/// assert_eq!(tree.get_value(&7).unwrap(), Some(700));
/// ```
pub struct BPlusTree<K, V, C = OrdComparator> {
    name: String,
    bpm: Arc<BufferPoolManager>,
    header_page_id: PageId,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> BPlusTree<K, V, OrdComparator>
where
    K: FixedCodec + Ord,
    V: FixedCodec,
{
    /// Allocate a header page and build an empty tree with the largest node
    /// sizes the page layout allows.
    pub fn create(name: impl Into<String>, bpm: Arc<BufferPoolManager>) -> Result<Self> {
        Self::create_with(
            name,
            bpm,
            OrdComparator,
            Self::leaf_capacity() - 1,
            Self::internal_capacity() - 1,
        )
    }
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: FixedCodec,
    V: FixedCodec,
    C: KeyComparator<K>,
{
    /// Entries a leaf page can physically hold for this `K`/`V`.
    pub fn leaf_capacity() -> usize {
        leaf_capacity::<K, V>()
    }

    /// Children an internal page can physically hold for this `K`.
    pub fn internal_capacity() -> usize {
        internal_capacity::<K>()
    }

    fn validated(
        name: String,
        bpm: Arc<BufferPoolManager>,
        header_page_id: PageId,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        // one slot beyond max_size is needed for the entry that triggers a split
        assert!(
            (2..Self::leaf_capacity()).contains(&leaf_max_size),
            "leaf_max_size {} must be in 2..{}",
            leaf_max_size,
            Self::leaf_capacity()
        );
        assert!(
            (3..Self::internal_capacity()).contains(&internal_max_size),
            "internal_max_size {} must be in 3..{}",
            internal_max_size,
            Self::internal_capacity()
        );
        Self {
            name,
            bpm,
            header_page_id,
            comparator,
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        }
    }

    /// Build an empty tree on an existing header page, resetting its root.
    ///
    /// # Panics
    /// Panics if a max size leaves no room for the overflow entry of a split
    /// or is too small to split.
    pub fn new(
        name: impl Into<String>,
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let tree = Self::validated(
            name.into(),
            bpm,
            header_page_id,
            comparator,
            leaf_max_size,
            internal_max_size,
        );
        {
            let mut header = tree.bpm.fetch_page_write(header_page_id)?;
            HeaderPage::new(header.as_mut_slice()).set_root_page_id(PageId::INVALID);
        }
        Ok(tree)
    }

    /// Attach to a tree whose header page already exists, keeping its root.
    pub fn open(
        name: impl Into<String>,
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let tree = Self::validated(
            name.into(),
            bpm,
            header_page_id,
            comparator,
            leaf_max_size,
            internal_max_size,
        );
        // make sure the header page is reachable
        drop(tree.bpm.fetch_page_read(header_page_id)?);
        Ok(tree)
    }

    /// Allocate a fresh header page and build an empty tree on it.
    pub fn create_with(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let header_page_id = {
            let mut header = bpm.new_page()?;
            HeaderPage::new(header.as_mut_slice()).set_root_page_id(PageId::INVALID);
            header.page_id()
        };
        let tree = Self::validated(
            name.into(),
            bpm,
            header_page_id,
            comparator,
            leaf_max_size,
            internal_max_size,
        );
        debug!("created index {} with header page {}", tree.name, header_page_id);
        Ok(tree)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    #[inline]
    pub fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    #[inline]
    pub fn internal_max_size(&self) -> usize {
        self.internal_max_size
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    /// Current root, `PageId::INVALID` for an empty tree.
    pub fn root_page_id(&self) -> Result<PageId> {
        let header = self.bpm.fetch_page_read(self.header_page_id)?;
        Ok(HeaderPage::new(header.as_slice()).root_page_id())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(!self.root_page_id()?.is_valid())
    }

    #[inline]
    fn cmp(&self, lhs: &K, rhs: &K) -> Ordering {
        self.comparator.compare(lhs, rhs)
    }

    // ========================================================================
    // Lookup and iteration
    // ========================================================================

    /// Value stored under `key`, if any.
    pub fn get_value(&self, key: &K) -> Result<Option<V>> {
        let Some(guard) = self.find_leaf_read(Descent::Key(key))? else {
            return Ok(None);
        };
        let leaf = LeafPage::<_, K, V>::new(guard.as_slice());
        Ok(leaf
            .binary_search_by(|probe| self.cmp(probe, key))
            .ok()
            .map(|index| leaf.value_at(index)))
    }

    /// Iterator positioned at the smallest key.
    pub fn iter(&self) -> Result<IndexIterator<'_, K, V, C>> {
        match self.find_leaf_read(Descent::Leftmost)? {
            Some(guard) => IndexIterator::new(self, guard, 0),
            None => Ok(self.end()),
        }
    }

    /// Iterator positioned at the first key `>= key`.
    pub fn iter_from(&self, key: &K) -> Result<IndexIterator<'_, K, V, C>> {
        let Some(guard) = self.find_leaf_read(Descent::Key(key))? else {
            return Ok(self.end());
        };
        let index = {
            let leaf = LeafPage::<_, K, V>::new(guard.as_slice());
            match leaf.binary_search_by(|probe| self.cmp(probe, key)) {
                Ok(index) | Err(index) => index,
            }
        };
        IndexIterator::new(self, guard, index)
    }

    /// The past-the-end iterator.
    pub fn end(&self) -> IndexIterator<'_, K, V, C> {
        IndexIterator::end(self)
    }

    /// Leaf that holds the first key after `key`, or the leftmost leaf for
    /// `None`, with that key's slot.
    pub(super) fn seek_past(
        &self,
        key: Option<&K>,
    ) -> Result<Option<(PageReadGuard<'_>, usize)>> {
        let descent = key.map_or(Descent::Leftmost, Descent::Key);
        let Some(guard) = self.find_leaf_read(descent)? else {
            return Ok(None);
        };
        let index = key.map_or(0, |key| self.slot_past(&guard, key));
        Ok(Some((guard, index)))
    }

    /// Slot of the first key in a leaf greater than `key`.
    pub(super) fn slot_past(&self, guard: &PageReadGuard<'_>, key: &K) -> usize {
        let leaf = LeafPage::<_, K, V>::new(guard.as_slice());
        match leaf.binary_search_by(|probe| self.cmp(probe, key)) {
            Ok(index) => index + 1,
            Err(index) => index,
        }
    }

    /// Read-crab from the header to a leaf. `None` for an empty tree.
    fn find_leaf_read(&self, descent: Descent<'_, K>) -> Result<Option<PageReadGuard<'_>>> {
        let header = self.bpm.fetch_page_read(self.header_page_id)?;
        let root = HeaderPage::new(header.as_slice()).root_page_id();
        if !root.is_valid() {
            return Ok(None);
        }

        let mut guard = self.bpm.fetch_page_read(root)?;
        drop(header);

        loop {
            let child = {
                let node = BPlusTreePage::new(guard.as_slice());
                match node.page_type() {
                    IndexPageType::Leaf => return Ok(Some(guard)),
                    IndexPageType::Internal => {}
                    IndexPageType::Invalid => return Err(self.corrupt(guard.page_id())),
                }
                let internal = InternalPage::<_, K>::new(guard.as_slice());
                let index = match descent {
                    Descent::Leftmost => 0,
                    Descent::Key(key) => internal.lookup_child_by(|probe| self.cmp(probe, key)),
                };
                internal.value_at(index)
            };
            // latch the child before the parent goes
            let child_guard = self.bpm.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    fn corrupt(&self, page_id: PageId) -> Error {
        Error::InvariantViolation(format!(
            "index {}: page {} is not a tree node",
            self.name, page_id
        ))
    }

    // ========================================================================
    // Insert
    // ========================================================================

    /// Insert `key -> value`. Returns `false` if `key` is already present.
    ///
    /// # Errors
    /// `Error::NoFreeFrames` (or an I/O error) if the pages a split needs
    /// cannot be obtained. All of them are obtained before the tree is
    /// modified, so the tree is unchanged on error.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool> {
        let mut header = self.bpm.fetch_page_write(self.header_page_id)?;
        let root = HeaderPage::new(header.as_slice()).root_page_id();
        if !root.is_valid() {
            return self.start_new_tree(&mut header, key, value);
        }

        let mut ctx = Context::new(header, root);
        let mut guard = self.bpm.fetch_page_write(root)?;
        loop {
            let (page_type, size, max_size) = {
                let node = BPlusTreePage::new(guard.as_slice());
                (node.page_type(), node.size(), node.max_size())
            };
            if size < max_size {
                ctx.release_ancestors();
            }
            match page_type {
                IndexPageType::Leaf => {
                    ctx.write_set.push_back(guard);
                    break;
                }
                IndexPageType::Internal => {}
                IndexPageType::Invalid => return Err(self.corrupt(guard.page_id())),
            }

            let (index, child) = {
                let internal = InternalPage::<_, K>::new(guard.as_slice());
                let index = internal.lookup_child_by(|probe| self.cmp(probe, key));
                (index, internal.value_at(index))
            };
            ctx.write_set.push_back(guard);
            ctx.child_indexes.push_back(index);
            guard = self.bpm.fetch_page_write(child)?;
        }

        let mut leaf_guard = ctx.pop_node()?;
        let position = {
            let leaf = LeafPage::<_, K, V>::new(leaf_guard.as_slice());
            match leaf.binary_search_by(|probe| self.cmp(probe, key)) {
                Ok(_) => return Ok(false),
                Err(position) => position,
            }
        };

        // Every full node from the leaf up splits; if that reaches the top of
        // the write set, the root splits too and a new root is needed.
        let splits = std::iter::once(&leaf_guard)
            .chain(ctx.write_set.iter().rev())
            .take_while(|guard| Self::is_full(guard))
            .count();
        let new_root = splits == ctx.write_set.len() + 1;
        let mut fresh = self.allocate_pages(splits + usize::from(new_root))?.into_iter();

        let overflow = {
            let mut leaf = LeafPage::<_, K, V>::new(leaf_guard.as_mut_slice());
            leaf.insert_at(position, key, value);
            leaf.size() > leaf.max_size()
        };
        if !overflow {
            return Ok(true);
        }

        let mut buddy = self.take_fresh(&mut fresh)?;
        let buddy_id = buddy.page_id();
        let mut separator = {
            let mut leaf = LeafPage::<_, K, V>::new(leaf_guard.as_mut_slice());
            let mut right = LeafPage::<_, K, V>::new(buddy.as_mut_slice());
            right.init(self.leaf_max_size);
            leaf.move_upper_half_to(&mut right);
            right.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(buddy_id);
            right.key_at(0)
        };
        let mut left_id = leaf_guard.page_id();
        let mut right_id = buddy_id;
        debug!("index {}: split leaf {} into {}", self.name, left_id, right_id);
        drop(buddy);
        drop(leaf_guard);

        loop {
            let Some(mut parent_guard) = ctx.write_set.pop_back() else {
                let mut root_guard = self.take_fresh(&mut fresh)?;
                let new_root = root_guard.page_id();
                {
                    let mut root = InternalPage::<_, K>::new(root_guard.as_mut_slice());
                    root.init(self.internal_max_size);
                    root.populate_new_root(left_id, &separator, right_id);
                }
                HeaderPage::new(ctx.header_mut()?.as_mut_slice()).set_root_page_id(new_root);
                debug!("index {}: new root {}", self.name, new_root);
                return Ok(true);
            };

            let index = ctx.pop_child_index()?;
            let mut parent = InternalPage::<_, K>::new(parent_guard.as_mut_slice());
            parent.insert_at(index + 1, &separator, right_id);
            if parent.size() <= parent.max_size() {
                return Ok(true);
            }

            let mut buddy = self.take_fresh(&mut fresh)?;
            right_id = buddy.page_id();
            let mut right = InternalPage::<_, K>::new(buddy.as_mut_slice());
            right.init(self.internal_max_size);
            separator = parent.move_upper_half_to(&mut right);
            left_id = parent_guard.page_id();
            debug!("index {}: split internal {} into {}", self.name, left_id, right_id);
        }
    }

    fn start_new_tree(&self, header: &mut PageWriteGuard<'_>, key: &K, value: &V) -> Result<bool> {
        let mut root_guard = self.bpm.new_page()?;
        {
            let mut leaf = LeafPage::<_, K, V>::new(root_guard.as_mut_slice());
            leaf.init(self.leaf_max_size);
            leaf.insert_at(0, key, value);
        }
        HeaderPage::new(header.as_mut_slice()).set_root_page_id(root_guard.page_id());
        debug!("index {}: started tree at leaf {}", self.name, root_guard.page_id());
        Ok(true)
    }

    fn is_full(guard: &PageWriteGuard<'_>) -> bool {
        let node = BPlusTreePage::new(guard.as_slice());
        node.size() >= node.max_size()
    }

    /// Get `count` new pages or none at all.
    fn allocate_pages(&self, count: usize) -> Result<Vec<PageWriteGuard<'_>>> {
        let mut pages = Vec::with_capacity(count);
        for _ in 0..count {
            match self.bpm.new_page() {
                Ok(guard) => pages.push(guard),
                Err(e) => {
                    let ids: Vec<PageId> = pages.iter().map(|g| g.page_id()).collect();
                    drop(pages);
                    self.reclaim(ids);
                    warn!("index {}: cannot get {} pages for split: {}", self.name, count, e);
                    return Err(e);
                }
            }
        }
        Ok(pages)
    }

    fn take_fresh<'b>(
        &self,
        fresh: &mut impl Iterator<Item = PageWriteGuard<'b>>,
    ) -> Result<PageWriteGuard<'b>> {
        fresh
            .next()
            .ok_or_else(|| Error::InvariantViolation("split ran out of pre-allocated pages".into()))
    }

    /// Give emptied pages back to the buffer pool and page store.
    fn reclaim(&self, page_ids: Vec<PageId>) {
        for page_id in page_ids {
            match self.bpm.delete_page(page_id) {
                Ok(()) => trace!("index {}: reclaimed page {}", self.name, page_id),
                Err(e) => warn!("index {}: could not reclaim page {}: {}", self.name, page_id, e),
            }
        }
    }

    // ========================================================================
    // Remove
    // ========================================================================

    /// Remove `key`. Returns `false` if it was not present.
    ///
    /// # Errors
    /// Every sibling a repair will touch is latched before the entry is
    /// removed, so a fetch failure returns with the tree unchanged.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let header = self.bpm.fetch_page_write(self.header_page_id)?;
        let root = HeaderPage::new(header.as_slice()).root_page_id();
        if !root.is_valid() {
            return Ok(false);
        }

        let mut ctx = Context::new(header, root);
        let mut guard = self.bpm.fetch_page_write(root)?;
        loop {
            let (page_type, size, min_size) = {
                let node = BPlusTreePage::new(guard.as_slice());
                (node.page_type(), node.size(), node.min_size())
            };
            let safe = if ctx.is_root(guard.page_id()) {
                match page_type {
                    IndexPageType::Leaf => size > 1,
                    _ => size > 2,
                }
            } else {
                size > min_size
            };
            if safe {
                ctx.release_ancestors();
            }
            match page_type {
                IndexPageType::Leaf => {
                    ctx.write_set.push_back(guard);
                    break;
                }
                IndexPageType::Internal => {}
                IndexPageType::Invalid => return Err(self.corrupt(guard.page_id())),
            }

            let (index, child) = {
                let internal = InternalPage::<_, K>::new(guard.as_slice());
                let index = internal.lookup_child_by(|probe| self.cmp(probe, key));
                (index, internal.value_at(index))
            };
            ctx.write_set.push_back(guard);
            ctx.child_indexes.push_back(index);
            guard = self.bpm.fetch_page_write(child)?;
        }

        let position = {
            let leaf_guard = ctx
                .write_set
                .back()
                .ok_or_else(|| Error::InvariantViolation("crabbing write set is empty".into()))?;
            let leaf = LeafPage::<_, K, V>::new(leaf_guard.as_slice());
            match leaf.binary_search_by(|probe| self.cmp(probe, key)) {
                Ok(position) => position,
                Err(_) => return Ok(false),
            }
        };
        let plan = self.lock_siblings(&ctx)?;
        if let Some(leaf_guard) = ctx.write_set.back_mut() {
            LeafPage::<_, K, V>::new(leaf_guard.as_mut_slice()).remove_at(position);
        }

        let mut emptied = Vec::new();
        let outcome = self.rebalance(&mut ctx, plan, &mut emptied);
        // pages can only be deleted once nothing pins them
        drop(ctx);
        self.reclaim(emptied);
        outcome.map(|()| true)
    }

    /// Latch the siblings of every level the coming removal will leave
    /// underfull, leaf level first.
    ///
    /// A level underflows only if its node is at min size, and the level
    /// above loses a slot only if neither sibling can lend. The root is fixed
    /// up by `adjust_root` and needs no siblings.
    fn lock_siblings<'a>(&'a self, ctx: &Context<'a>) -> Result<Vec<Siblings<'a>>> {
        let mut plan = Vec::new();
        for level in (1..ctx.write_set.len()).rev() {
            if Self::can_lend(&ctx.write_set[level]) {
                break;
            }
            let (left_id, right_id) =
                self.sibling_ids(&ctx.write_set[level - 1], ctx.child_indexes[level - 1]);

            let left = left_id.map(|id| self.bpm.fetch_page_write(id)).transpose()?;
            if left.as_ref().is_some_and(Self::can_lend) {
                plan.push(Siblings { left, right: None });
                break;
            }
            let right = right_id.map(|id| self.bpm.fetch_page_write(id)).transpose()?;
            let borrows = right.as_ref().is_some_and(Self::can_lend);
            plan.push(Siblings { left, right });
            if borrows {
                break;
            }
        }
        Ok(plan)
    }

    fn can_lend(guard: &PageWriteGuard<'_>) -> bool {
        let page = BPlusTreePage::new(guard.as_slice());
        page.size() > page.min_size()
    }

    /// Walk up the write set fixing underflow, one level per iteration.
    fn rebalance<'a>(
        &self,
        ctx: &mut Context<'a>,
        plan: Vec<Siblings<'a>>,
        emptied: &mut Vec<PageId>,
    ) -> Result<()> {
        let mut plan = plan.into_iter();
        loop {
            let mut node_guard = ctx.pop_node()?;
            let node_id = node_guard.page_id();
            let (page_type, size, min_size) = {
                let node = BPlusTreePage::new(node_guard.as_slice());
                (node.page_type(), node.size(), node.min_size())
            };

            if ctx.is_root(node_id) {
                return self.adjust_root(ctx, &node_guard, page_type, size, emptied);
            }
            if size >= min_size {
                return Ok(());
            }

            let siblings = plan.next().ok_or_else(|| {
                Error::InvariantViolation(format!(
                    "index {}: no siblings latched for {}",
                    self.name, node_id
                ))
            })?;
            let mut parent_guard = ctx.pop_node()?;
            let index = ctx.pop_child_index()?;
            let repair = match page_type {
                IndexPageType::Leaf => {
                    self.repair_leaf(&mut parent_guard, index, &mut node_guard, siblings)?
                }
                _ => self.repair_internal(&mut parent_guard, index, &mut node_guard, siblings)?,
            };
            match repair {
                Repair::Borrowed => return Ok(()),
                Repair::Merged(page_id) => emptied.push(page_id),
            }
            drop(node_guard);
            ctx.write_set.push_back(parent_guard);
        }
    }

    /// Shrink the tree at the top once the root is drained.
    fn adjust_root(
        &self,
        ctx: &mut Context<'_>,
        root_guard: &PageWriteGuard<'_>,
        page_type: IndexPageType,
        size: usize,
        emptied: &mut Vec<PageId>,
    ) -> Result<()> {
        let new_root = match page_type {
            IndexPageType::Leaf if size == 0 => PageId::INVALID,
            IndexPageType::Internal if size == 1 => {
                InternalPage::<_, K>::new(root_guard.as_slice()).value_at(0)
            }
            _ => return Ok(()),
        };
        HeaderPage::new(ctx.header_mut()?.as_mut_slice()).set_root_page_id(new_root);
        emptied.push(root_guard.page_id());
        debug!(
            "index {}: root {} replaced by {}",
            self.name,
            root_guard.page_id(),
            new_root
        );
        Ok(())
    }

    /// Fix an underfull leaf at `parent[index]`.
    fn repair_leaf(
        &self,
        parent_guard: &mut PageWriteGuard<'_>,
        index: usize,
        node_guard: &mut PageWriteGuard<'_>,
        siblings: Siblings<'_>,
    ) -> Result<Repair> {
        let Siblings {
            left: mut left_guard,
            right: mut right_guard,
        } = siblings;
        let mut parent = InternalPage::<_, K>::new(parent_guard.as_mut_slice());
        let mut node = LeafPage::<_, K, V>::new(node_guard.as_mut_slice());

        if let Some(guard) = left_guard.as_mut() {
            let mut left = LeafPage::<_, K, V>::new(guard.as_mut_slice());
            if left.size() > left.min_size() {
                left.move_last_to_front_of(&mut node);
                parent.set_key_at(index, &node.key_at(0));
                trace!("index {}: leaf borrowed from left {}", self.name, guard.page_id());
                return Ok(Repair::Borrowed);
            }
        }

        if let Some(guard) = right_guard.as_mut() {
            let mut right = LeafPage::<_, K, V>::new(guard.as_mut_slice());
            if right.size() > right.min_size() {
                right.move_first_to_end_of(&mut node);
                parent.set_key_at(index + 1, &right.key_at(0));
                trace!("index {}: leaf borrowed from right {}", self.name, guard.page_id());
                return Ok(Repair::Borrowed);
            }
        }

        if let Some(guard) = left_guard.as_mut() {
            let mut left = LeafPage::<_, K, V>::new(guard.as_mut_slice());
            node.move_all_to(&mut left);
            left.set_next_page_id(node.next_page_id());
            parent.remove_at(index);
            let gone = node_guard.page_id();
            debug!("index {}: merged leaf {} into {}", self.name, gone, guard.page_id());
            return Ok(Repair::Merged(gone));
        }
        if let Some(guard) = right_guard.as_mut() {
            let mut right = LeafPage::<_, K, V>::new(guard.as_mut_slice());
            right.move_all_to(&mut node);
            node.set_next_page_id(right.next_page_id());
            parent.remove_at(index + 1);
            let gone = guard.page_id();
            debug!("index {}: merged leaf {} into {}", self.name, gone, node_guard.page_id());
            return Ok(Repair::Merged(gone));
        }
        Err(Error::InvariantViolation(format!(
            "index {}: leaf {} has no sibling",
            self.name,
            node_guard.page_id()
        )))
    }

    /// Fix an underfull internal node at `parent[index]`.
    fn repair_internal(
        &self,
        parent_guard: &mut PageWriteGuard<'_>,
        index: usize,
        node_guard: &mut PageWriteGuard<'_>,
        siblings: Siblings<'_>,
    ) -> Result<Repair> {
        let Siblings {
            left: mut left_guard,
            right: mut right_guard,
        } = siblings;
        let mut parent = InternalPage::<_, K>::new(parent_guard.as_mut_slice());
        let mut node = InternalPage::<_, K>::new(node_guard.as_mut_slice());

        if let Some(guard) = left_guard.as_mut() {
            let mut left = InternalPage::<_, K>::new(guard.as_mut_slice());
            if left.size() > left.min_size() {
                let middle = parent.key_at(index);
                let separator = left.move_last_to_front_of(&mut node, &middle);
                parent.set_key_at(index, &separator);
                trace!("index {}: internal borrowed from left {}", self.name, guard.page_id());
                return Ok(Repair::Borrowed);
            }
        }

        if let Some(guard) = right_guard.as_mut() {
            let mut right = InternalPage::<_, K>::new(guard.as_mut_slice());
            if right.size() > right.min_size() {
                let middle = parent.key_at(index + 1);
                let separator = right.move_first_to_end_of(&mut node, &middle);
                parent.set_key_at(index + 1, &separator);
                trace!("index {}: internal borrowed from right {}", self.name, guard.page_id());
                return Ok(Repair::Borrowed);
            }
        }

        if let Some(guard) = left_guard.as_mut() {
            let mut left = InternalPage::<_, K>::new(guard.as_mut_slice());
            node.move_all_to(&mut left, &parent.key_at(index));
            parent.remove_at(index);
            let gone = node_guard.page_id();
            debug!("index {}: merged internal {} into {}", self.name, gone, guard.page_id());
            return Ok(Repair::Merged(gone));
        }
        if let Some(guard) = right_guard.as_mut() {
            let mut right = InternalPage::<_, K>::new(guard.as_mut_slice());
            right.move_all_to(&mut node, &parent.key_at(index + 1));
            parent.remove_at(index + 1);
            let gone = guard.page_id();
            debug!("index {}: merged internal {} into {}", self.name, gone, node_guard.page_id());
            return Ok(Repair::Merged(gone));
        }
        Err(Error::InvariantViolation(format!(
            "index {}: internal {} has no sibling",
            self.name,
            node_guard.page_id()
        )))
    }

    fn sibling_ids(
        &self,
        parent_guard: &PageWriteGuard<'_>,
        index: usize,
    ) -> (Option<PageId>, Option<PageId>) {
        let parent = InternalPage::<_, K>::new(parent_guard.as_slice());
        let left = (index > 0).then(|| parent.value_at(index - 1));
        let right = (index + 1 < parent.size()).then(|| parent.value_at(index + 1));
        (left, right)
    }
}

/// What a subtree check learned about the leaves below it.
struct SubtreeReport {
    leaf_depth: usize,
    entries: usize,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: FixedCodec,
    V: FixedCodec,
    C: KeyComparator<K>,
{
    // ========================================================================
    // Verification
    // ========================================================================

    /// Walk the whole tree and check its structural invariants, returning
    /// the number of entries.
    ///
    /// Checked: keys strictly increase inside a node and stay within the
    /// separator bounds of the parent; non-root nodes hold between min and
    /// max entries; an internal root has at least two children; all leaves
    /// sit at the same depth; the leaf chain visits every leaf in key order.
    ///
    /// Takes read latches one node at a time, so it is only meaningful while
    /// no writer is active.
    pub fn check_integrity(&self) -> Result<usize> {
        let root = self.root_page_id()?;
        if !root.is_valid() {
            return Ok(0);
        }
        let mut leaves = Vec::new();
        let report = self.check_subtree(root, None, None, true, &mut leaves)?;

        for pair in leaves.windows(2) {
            let next = {
                let guard = self.bpm.fetch_page_read(pair[0])?;
                LeafPage::<_, K, V>::new(guard.as_slice()).next_page_id()
            };
            if next != pair[1] {
                return Err(self.violation(format!(
                    "leaf {} links to {} instead of {}",
                    pair[0], next, pair[1]
                )));
            }
        }
        if let Some(&last) = leaves.last() {
            let guard = self.bpm.fetch_page_read(last)?;
            let next = LeafPage::<_, K, V>::new(guard.as_slice()).next_page_id();
            if next.is_valid() {
                return Err(self.violation(format!("last leaf {} links to {}", last, next)));
            }
        }
        Ok(report.entries)
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        lower: Option<&K>,
        upper: Option<&K>,
        is_root: bool,
        leaves: &mut Vec<PageId>,
    ) -> Result<SubtreeReport> {
        // copy out what we need, then let go of the latch before recursing
        let (keys, children) = {
            let guard = self.bpm.fetch_page_read(page_id)?;
            let node = BPlusTreePage::new(guard.as_slice());
            let (size, max_size, min_size) = (node.size(), node.max_size(), node.min_size());
            if size > max_size {
                return Err(self.violation(format!(
                    "page {} holds {} > {}",
                    page_id, size, max_size
                )));
            }
            match node.page_type() {
                IndexPageType::Leaf => {
                    if !is_root && size < min_size {
                        return Err(self.violation(format!(
                            "leaf {} holds {} < {}",
                            page_id, size, min_size
                        )));
                    }
                    let leaf = LeafPage::<_, K, V>::new(guard.as_slice());
                    ((0..size).map(|i| leaf.key_at(i)).collect::<Vec<_>>(), Vec::new())
                }
                IndexPageType::Internal => {
                    let floor = if is_root { 2 } else { min_size };
                    if size < floor {
                        return Err(self.violation(format!(
                            "internal {} has {} children < {}",
                            page_id, size, floor
                        )));
                    }
                    let internal = InternalPage::<_, K>::new(guard.as_slice());
                    (
                        (1..size).map(|i| internal.key_at(i)).collect::<Vec<_>>(),
                        (0..size).map(|i| internal.value_at(i)).collect::<Vec<_>>(),
                    )
                }
                IndexPageType::Invalid => return Err(self.corrupt(page_id)),
            }
        };

        for pair in keys.windows(2) {
            if self.cmp(&pair[0], &pair[1]) != Ordering::Less {
                return Err(self.violation(format!("keys out of order in page {}", page_id)));
            }
        }
        if let (Some(lower), Some(first)) = (lower, keys.first()) {
            if self.cmp(first, lower) == Ordering::Less {
                return Err(self.violation(format!("page {} has a key below its bound", page_id)));
            }
        }
        if let (Some(upper), Some(last)) = (upper, keys.last()) {
            if self.cmp(last, upper) != Ordering::Less {
                return Err(self.violation(format!("page {} has a key above its bound", page_id)));
            }
        }

        if children.is_empty() {
            leaves.push(page_id);
            return Ok(SubtreeReport {
                leaf_depth: 0,
                entries: keys.len(),
            });
        }

        let mut depth = None;
        let mut entries = 0;
        for (i, &child) in children.iter().enumerate() {
            // keys[i - 1] <= child i < keys[i]
            let child_lower = if i == 0 { lower } else { Some(&keys[i - 1]) };
            let child_upper = keys.get(i).or(upper);
            let report = self.check_subtree(child, child_lower, child_upper, false, leaves)?;
            match depth {
                None => depth = Some(report.leaf_depth),
                Some(d) if d != report.leaf_depth => {
                    return Err(self.violation(format!(
                        "leaves under page {} at uneven depth",
                        page_id
                    )));
                }
                Some(_) => {}
            }
            entries += report.entries;
        }
        Ok(SubtreeReport {
            leaf_depth: depth.unwrap_or(0) + 1,
            entries,
        })
    }

    fn violation(&self, message: String) -> Error {
        Error::InvariantViolation(format!("index {}: {}", self.name, message))
    }
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: FixedCodec + fmt::Debug,
    V: FixedCodec,
    C: KeyComparator<K>,
{
    /// Render the tree in Graphviz dot syntax.
    pub fn to_dot(&self) -> Result<String> {
        let mut out = String::from("digraph G {\n  node [shape=record];\n");
        let root = self.root_page_id()?;
        if root.is_valid() {
            self.dot_node(root, &mut out)?;
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn dot_node(&self, page_id: PageId, out: &mut String) -> Result<()> {
        let (label, children, next) = {
            let guard = self.bpm.fetch_page_read(page_id)?;
            if BPlusTreePage::new(guard.as_slice()).is_leaf() {
                let leaf = LeafPage::<_, K, V>::new(guard.as_slice());
                let keys: Vec<String> = (0..leaf.size())
                    .map(|i| format!("{:?}", leaf.key_at(i)))
                    .collect();
                (keys.join("|"), Vec::new(), Some(leaf.next_page_id()))
            } else {
                let internal = InternalPage::<_, K>::new(guard.as_slice());
                let mut slots = vec![String::from("<c0> ")];
                for i in 1..internal.size() {
                    slots.push(format!("<c{}> {:?}", i, internal.key_at(i)));
                }
                let children = (0..internal.size()).map(|i| internal.value_at(i)).collect();
                (slots.join("|"), children, None)
            }
        };

        let _ = writeln!(out, "  page{} [label=\"P{}|{}\"];", page_id.0, page_id.0, label);
        if let Some(next) = next.filter(PageId::is_valid) {
            let _ = writeln!(out, "  page{} -> page{} [style=dashed];", page_id.0, next.0);
        }
        for (i, child) in children.into_iter().enumerate() {
            let _ = writeln!(out, "  page{}:c{} -> page{};", page_id.0, i, child.0);
            self.dot_node(child, out)?;
        }
        Ok(())
    }

    /// Indented one-node-per-line dump, for debugging and test failures.
    pub fn to_pretty_string(&self) -> Result<String> {
        let mut out = String::new();
        let root = self.root_page_id()?;
        if !root.is_valid() {
            out.push_str("(empty)\n");
            return Ok(out);
        }
        self.pretty_node(root, 0, &mut out)?;
        Ok(out)
    }

    fn pretty_node(&self, page_id: PageId, depth: usize, out: &mut String) -> Result<()> {
        let children = {
            let guard = self.bpm.fetch_page_read(page_id)?;
            let indent = "  ".repeat(depth);
            if BPlusTreePage::new(guard.as_slice()).is_leaf() {
                let leaf = LeafPage::<_, K, V>::new(guard.as_slice());
                let keys: Vec<K> = (0..leaf.size()).map(|i| leaf.key_at(i)).collect();
                let _ = writeln!(
                    out,
                    "{}leaf {} {:?} -> {}",
                    indent,
                    page_id,
                    keys,
                    leaf.next_page_id()
                );
                Vec::new()
            } else {
                let internal = InternalPage::<_, K>::new(guard.as_slice());
                let keys: Vec<K> = (1..internal.size()).map(|i| internal.key_at(i)).collect();
                let _ = writeln!(out, "{}internal {} {:?}", indent, page_id, keys);
                (0..internal.size()).map(|i| internal.value_at(i)).collect()
            }
        };
        for child in children {
            self.pretty_node(child, depth + 1, out)?;
        }
        Ok(())
    }
}
