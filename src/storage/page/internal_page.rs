//! Typed view over a B+Tree internal page.

use std::cmp::Ordering;
use std::marker::PhantomData;

use crate::common::config::PAGE_SIZE;
use crate::common::PageId;

use super::b_plus_tree_page::{min_size_for, IndexPageType, TreePageHeader};
use super::codec::{read_u32, write_u32, FixedCodec};

const INTERNAL_HEADER_SIZE: usize = TreePageHeader::SIZE;

/// Number of (key, child) slots an internal page can physically hold.
pub fn internal_capacity<K: FixedCodec>() -> usize {
    (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (K::ENCODED_SIZE + PageId::ENCODED_SIZE)
}

/// An internal node laid over raw page bytes.
///
/// `size` counts children. Slot `i` holds `(key_i, child_i)`; `key_0` is
/// unused, and for `i >= 1` every key in `child_i`'s subtree is
/// `>= key_i` and `< key_{i+1}`.
pub struct InternalPage<B, K> {
    data: B,
    _marker: PhantomData<fn() -> K>,
}

impl<B, K> InternalPage<B, K>
where
    B: AsRef<[u8]>,
    K: FixedCodec,
{
    const PAIR_SIZE: usize = K::ENCODED_SIZE + PageId::ENCODED_SIZE;

    pub fn new(data: B) -> Self {
        debug_assert!(data.as_ref().len() >= PAGE_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    #[inline]
    fn slot_offset(index: usize) -> usize {
        INTERNAL_HEADER_SIZE + index * Self::PAIR_SIZE
    }

    #[inline]
    pub fn size(&self) -> usize {
        read_u32(self.bytes(), TreePageHeader::OFFSET_SIZE) as usize
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        read_u32(self.bytes(), TreePageHeader::OFFSET_MAX_SIZE) as usize
    }

    pub fn min_size(&self) -> usize {
        min_size_for(IndexPageType::Internal, self.max_size())
    }

    pub fn key_at(&self, index: usize) -> K {
        assert!(index < self.size(), "internal index {} out of range", index);
        K::decode(&self.bytes()[Self::slot_offset(index)..])
    }

    pub fn value_at(&self, index: usize) -> PageId {
        assert!(index < self.size(), "internal index {} out of range", index);
        PageId::decode(&self.bytes()[Self::slot_offset(index) + K::ENCODED_SIZE..])
    }

    /// Slot holding `child`, if any.
    pub fn child_index_of(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    /// Index of the child whose key range contains the target.
    ///
    /// `f` compares a stored key against the target. Returns the largest
    /// `i >= 1` with `key_i <= target`, or 0 when the target is below `key_1`.
    pub fn lookup_child_by<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&K) -> Ordering,
    {
        // first slot in 1..size whose key is greater than the target
        let mut lo = 1;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if f(&self.key_at(mid)) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo - 1
    }
}

impl<B, K> InternalPage<B, K>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
    K: FixedCodec,
{
    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Format the page as an empty internal node.
    pub fn init(&mut self, max_size: usize) {
        assert!(
            max_size < internal_capacity::<K>(),
            "internal max_size {} leaves no room for the overflow slot",
            max_size
        );
        TreePageHeader::new(IndexPageType::Internal, max_size as u32).write_to(self.bytes_mut());
    }

    fn set_size(&mut self, size: usize) {
        write_u32(self.bytes_mut(), TreePageHeader::OFFSET_SIZE, size as u32);
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) {
        assert!(index < self.size(), "internal index {} out of range", index);
        let offset = Self::slot_offset(index);
        key.encode(&mut self.bytes_mut()[offset..]);
    }

    pub fn set_value_at(&mut self, index: usize, child: PageId) {
        assert!(index < self.size(), "internal index {} out of range", index);
        let offset = Self::slot_offset(index) + K::ENCODED_SIZE;
        child.encode(&mut self.bytes_mut()[offset..]);
    }

    /// Turn an empty page into a root with two children.
    pub fn populate_new_root(&mut self, left: PageId, key: &K, right: PageId) {
        self.set_size(2);
        self.set_value_at(0, left);
        self.set_key_at(1, key);
        self.set_value_at(1, right);
    }

    /// Insert `(key, child)` at `index`, shifting later slots right.
    pub fn insert_at(&mut self, index: usize, key: &K, child: PageId) {
        let size = self.size();
        assert!(index <= size, "internal insert position {} out of range", index);
        assert!(size < internal_capacity::<K>(), "internal page overflow");

        let start = Self::slot_offset(index);
        let end = Self::slot_offset(size);
        self.bytes_mut().copy_within(start..end, start + Self::PAIR_SIZE);
        self.set_size(size + 1);
        self.set_key_at(index, key);
        self.set_value_at(index, child);
    }

    /// Remove the slot at `index`, shifting later slots left.
    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        assert!(index < size, "internal remove position {} out of range", index);

        let start = Self::slot_offset(index + 1);
        let end = Self::slot_offset(size);
        self.bytes_mut()
            .copy_within(start..end, Self::slot_offset(index));
        self.set_size(size - 1);
    }

    fn append_from<B2: AsRef<[u8]>>(
        &mut self,
        src: &InternalPage<B2, K>,
        from: usize,
        count: usize,
    ) {
        let size = self.size();
        assert!(size + count <= internal_capacity::<K>(), "internal page overflow");

        let src_start = Self::slot_offset(from);
        let len = count * Self::PAIR_SIZE;
        let dst_start = Self::slot_offset(size);
        self.bytes_mut()[dst_start..dst_start + len]
            .copy_from_slice(&src.bytes()[src_start..src_start + len]);
        self.set_size(size + count);
    }

    /// Split: move the upper `size / 2` slots to the empty `recipient`.
    ///
    /// Returns the key to push up to the parent. It stays in the recipient's
    /// slot 0, where it is ignored.
    pub fn move_upper_half_to<B2>(&mut self, recipient: &mut InternalPage<B2, K>) -> K
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        let moved = size / 2;
        let keep = size - moved;
        recipient.append_from(self, keep, moved);
        self.set_size(keep);
        recipient.key_at(0)
    }

    /// Merge into a left sibling. `middle_key` is the parent's separator
    /// for this page and becomes the key of our first child.
    pub fn move_all_to<B2>(&mut self, recipient: &mut InternalPage<B2, K>, middle_key: &K)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.set_key_at(0, middle_key);
        let size = self.size();
        recipient.append_from(self, 0, size);
        self.set_size(0);
    }

    /// Lend our first child to a left sibling.
    ///
    /// The child arrives under `middle_key`; the caller replaces the parent
    /// separator with our new `key_at(0)`, which this returns.
    pub fn move_first_to_end_of<B2>(
        &mut self,
        recipient: &mut InternalPage<B2, K>,
        middle_key: &K,
    ) -> K
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let child = self.value_at(0);
        let size = recipient.size();
        recipient.insert_at(size, middle_key, child);
        self.remove_at(0);
        self.key_at(0)
    }

    /// Lend our last child to a right sibling.
    ///
    /// The recipient's old first child becomes keyed by `middle_key`; the
    /// returned key replaces the parent separator.
    pub fn move_last_to_front_of<B2>(
        &mut self,
        recipient: &mut InternalPage<B2, K>,
        middle_key: &K,
    ) -> K
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let last = self.size() - 1;
        let key = self.key_at(last);
        let child = self.value_at(last);
        recipient.insert_at(0, &key, child);
        recipient.set_key_at(1, middle_key);
        self.set_size(last);
        key
    }
}
