//! Typed view over a B+Tree leaf page.

use std::cmp::Ordering;
use std::marker::PhantomData;

use crate::common::config::PAGE_SIZE;
use crate::common::PageId;

use super::b_plus_tree_page::{min_size_for, IndexPageType, TreePageHeader};
use super::codec::{read_u32, write_u32, FixedCodec};

/// Number of (key, value) pairs a leaf page can physically hold.
pub fn leaf_capacity<K: FixedCodec, V: FixedCodec>() -> usize {
    (PAGE_SIZE - LEAF_HEADER_SIZE) / (K::ENCODED_SIZE + V::ENCODED_SIZE)
}

const OFFSET_NEXT_PAGE_ID: usize = TreePageHeader::SIZE;
const LEAF_HEADER_SIZE: usize = TreePageHeader::SIZE + 4;

/// A leaf node laid over raw page bytes.
///
/// # Layout
/// ```text
/// ┌──────────────────┬──────────────┬─────────┬─────────┬─────┐
/// │ TreePageHeader   │ next_page_id │ (k0,v0) │ (k1,v1) │ ... │
/// │ 12 bytes         │ 4 bytes      │         │         │     │
/// └──────────────────┴──────────────┴─────────┴─────────┴─────┘
/// ```
/// Keys are unique and kept sorted by the tree's comparator. `B` is `&[u8]`
/// for a read view or `&mut [u8]` for a write view.
pub struct LeafPage<B, K, V> {
    data: B,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<B, K, V> LeafPage<B, K, V>
where
    B: AsRef<[u8]>,
    K: FixedCodec,
    V: FixedCodec,
{
    const PAIR_SIZE: usize = K::ENCODED_SIZE + V::ENCODED_SIZE;

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
    fn entry_offset(index: usize) -> usize {
        LEAF_HEADER_SIZE + index * Self::PAIR_SIZE
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
        min_size_for(IndexPageType::Leaf, self.max_size())
    }

    #[inline]
    pub fn next_page_id(&self) -> PageId {
        PageId(read_u32(self.bytes(), OFFSET_NEXT_PAGE_ID))
    }

    pub fn key_at(&self, index: usize) -> K {
        assert!(index < self.size(), "leaf index {} out of range", index);
        K::decode(&self.bytes()[Self::entry_offset(index)..])
    }

    pub fn value_at(&self, index: usize) -> V {
        assert!(index < self.size(), "leaf index {} out of range", index);
        V::decode(&self.bytes()[Self::entry_offset(index) + K::ENCODED_SIZE..])
    }

    pub fn entry_at(&self, index: usize) -> (K, V) {
        (self.key_at(index), self.value_at(index))
    }

    /// Binary search over the keys.
    ///
    /// `f` compares a stored key against the target, like
    /// [`slice::binary_search_by`]. `Ok(i)` is an exact match, `Err(i)` the
    /// position the target would be inserted at.
    pub fn binary_search_by<F>(&self, mut f: F) -> Result<usize, usize>
    where
        F: FnMut(&K) -> Ordering,
    {
        let mut lo = 0;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match f(&self.key_at(mid)) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }
}

impl<B, K, V> LeafPage<B, K, V>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
    K: FixedCodec,
    V: FixedCodec,
{
    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Format the page as an empty leaf.
    pub fn init(&mut self, max_size: usize) {
        assert!(
            max_size < leaf_capacity::<K, V>(),
            "leaf max_size {} leaves no room for the overflow entry",
            max_size
        );
        TreePageHeader::new(IndexPageType::Leaf, max_size as u32).write_to(self.bytes_mut());
        self.set_next_page_id(PageId::INVALID);
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        write_u32(self.bytes_mut(), OFFSET_NEXT_PAGE_ID, next.0);
    }

    fn set_size(&mut self, size: usize) {
        write_u32(self.bytes_mut(), TreePageHeader::OFFSET_SIZE, size as u32);
    }

    fn write_entry(&mut self, index: usize, key: &K, value: &V) {
        let offset = Self::entry_offset(index);
        let bytes = self.bytes_mut();
        key.encode(&mut bytes[offset..]);
        value.encode(&mut bytes[offset + K::ENCODED_SIZE..]);
    }

    /// Insert at `index`, shifting later entries right.
    ///
    /// One entry beyond `max_size` is allowed; the caller splits right after.
    pub fn insert_at(&mut self, index: usize, key: &K, value: &V) {
        let size = self.size();
        assert!(index <= size, "leaf insert position {} out of range", index);
        assert!(size < leaf_capacity::<K, V>(), "leaf page overflow");

        let start = Self::entry_offset(index);
        let end = Self::entry_offset(size);
        self.bytes_mut().copy_within(start..end, start + Self::PAIR_SIZE);
        self.write_entry(index, key, value);
        self.set_size(size + 1);
    }

    /// Remove the entry at `index`, shifting later entries left.
    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        assert!(index < size, "leaf remove position {} out of range", index);

        let start = Self::entry_offset(index + 1);
        let end = Self::entry_offset(size);
        self.bytes_mut()
            .copy_within(start..end, Self::entry_offset(index));
        self.set_size(size - 1);
    }

    /// Append `count` raw entries from `src[from..]` to the end of this page.
    fn append_from<B2: AsRef<[u8]>>(
        &mut self,
        src: &LeafPage<B2, K, V>,
        from: usize,
        count: usize,
    ) {
        let size = self.size();
        assert!(size + count <= leaf_capacity::<K, V>(), "leaf page overflow");

        let src_start = Self::entry_offset(from);
        let len = count * Self::PAIR_SIZE;
        let dst_start = Self::entry_offset(size);
        self.bytes_mut()[dst_start..dst_start + len]
            .copy_from_slice(&src.bytes()[src_start..src_start + len]);
        self.set_size(size + count);
    }

    /// Split: move the upper `size / 2` entries to the end of `recipient`.
    pub fn move_upper_half_to<B2>(&mut self, recipient: &mut LeafPage<B2, K, V>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        let moved = size / 2;
        let keep = size - moved;
        recipient.append_from(self, keep, moved);
        self.set_size(keep);
    }

    /// Merge: append every entry to `recipient`, leaving this page empty.
    ///
    /// The leaf chain is not touched; the caller relinks `next_page_id`.
    pub fn move_all_to<B2>(&mut self, recipient: &mut LeafPage<B2, K, V>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        recipient.append_from(self, 0, size);
        self.set_size(0);
    }

    /// Borrow from a right sibling: our first entry goes to the end of `recipient`.
    pub fn move_first_to_end_of<B2>(&mut self, recipient: &mut LeafPage<B2, K, V>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        recipient.append_from(self, 0, 1);
        self.remove_at(0);
    }

    /// Borrow from a left sibling: our last entry goes to the front of `recipient`.
    pub fn move_last_to_front_of<B2>(&mut self, recipient: &mut LeafPage<B2, K, V>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let last = self.size() - 1;
        let (key, value) = self.entry_at(last);
        recipient.insert_at(0, &key, &value);
        self.set_size(last);
    }
}
