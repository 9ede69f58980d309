//! RAII guards for page access.
//!
//! Every guard owns exactly one pin on a resident page:
//! - [`BasicPageGuard`] - Pin only; latches per access
//! - [`PageReadGuard`] - Pin + shared latch (multiple allowed)
//! - [`PageWriteGuard`] - Pin + exclusive latch (dirty once mutated)
//!
//! Guards are move-only. Release happens once, on `Drop` or on an earlier
//! `drop_guard()`, and always in the same order: latch first, then pin. Once
//! the pin is gone the frame may be evicted and reused, so nothing may still
//! be holding its latch at that point.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId};
use crate::storage::page::Page;

use super::buffer_pool_manager::BufferPoolManager;

/// Guard holding a pin but no latch.
///
/// Content access latches for the duration of the returned lock only, which
/// cannot outlive the guard. Use
/// [`upgrade_read`](Self::upgrade_read) / [`upgrade_write`](Self::upgrade_write)
/// to keep a latch for longer without giving up the pin.
pub struct BasicPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    is_dirty: bool,
    released: bool,
}

impl<'a> BasicPageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, frame_id: FrameId, page_id: PageId) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            is_dirty: false,
            released: false,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Override whether release reports the page as dirty.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.is_dirty = dirty;
    }

    fn assert_live(&self) {
        assert!(!self.released, "page guard for {} used after release", self.page_id);
    }

    /// Latch the page for reading until the returned lock drops.
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.assert_live();
        self.bpm.frame(self.frame_id).page()
    }

    /// Latch the page for writing until the returned lock drops.
    ///
    /// Marks the guard dirty.
    pub fn write(&mut self) -> RwLockWriteGuard<'_, Page> {
        self.assert_live();
        self.is_dirty = true;
        self.bpm.frame(self.frame_id).page_mut()
    }

    /// Take the shared latch and keep the pin.
    pub fn upgrade_read(mut self) -> PageReadGuard<'a> {
        self.assert_live();
        let frame = self.bpm.frame(self.frame_id);
        if self.is_dirty {
            frame.mark_dirty();
        }
        let lock = frame.page();
        // the pin now belongs to the read guard
        self.released = true;
        PageReadGuard::new(self.bpm, self.frame_id, self.page_id, lock)
    }

    /// Take the exclusive latch and keep the pin.
    pub fn upgrade_write(mut self) -> PageWriteGuard<'a> {
        self.assert_live();
        let lock = self.bpm.frame(self.frame_id).page_mut();
        self.released = true;
        let mut guard = PageWriteGuard::new(self.bpm, self.frame_id, self.page_id, lock);
        guard.set_dirty(self.is_dirty);
        guard
    }

    /// Release the pin now. Later calls are no-ops.
    pub fn drop_guard(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.bpm.unpin_frame(self.frame_id, self.is_dirty);
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        self.drop_guard();
    }
}

/// Guard for read-only page access.
///
/// Multiple `PageReadGuard`s can exist for the same page simultaneously.
///
/// # Example
/// ```ignore
/// let guard = bpm.fetch_page_read(page_id)?;
/// let data = guard.as_slice();  // Deref to &Page
/// // guard drops here: latch released, then page unpinned
/// ```
pub struct PageReadGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    /// `None` once released.
    lock: Option<RwLockReadGuard<'a, Page>>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            lock: Some(lock),
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Release latch and pin now. Later calls are no-ops.
    pub fn drop_guard(&mut self) {
        if let Some(lock) = self.lock.take() {
            drop(lock);
            self.bpm.unpin_frame(self.frame_id, false);
        }
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        match &self.lock {
            Some(lock) => &**lock,
            None => panic!("read guard for {} used after release", self.page_id),
        }
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.drop_guard();
    }
}

/// Guard for exclusive write access to a page.
///
/// Only one `PageWriteGuard` can exist for a page at a time. Any mutable
/// access through [`DerefMut`] marks the guard dirty; the frame's dirty flag
/// is set on release unless [`set_dirty(false)`](Self::set_dirty) was called
/// afterwards.
///
/// # Example
/// ```ignore
/// let mut guard = bpm.fetch_page_write(page_id)?;
/// guard.as_mut_slice()[0] = 0xFF;  // DerefMut to &mut Page
/// // guard drops here: latch released, page marked dirty and unpinned
/// ```
pub struct PageWriteGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    is_dirty: bool,
    /// `None` once released.
    lock: Option<RwLockWriteGuard<'a, Page>>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            is_dirty: false,
            lock: Some(lock),
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Override whether release reports the page as dirty.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.is_dirty = dirty;
    }

    /// Release latch and pin now. Later calls are no-ops.
    pub fn drop_guard(&mut self) {
        if let Some(lock) = self.lock.take() {
            drop(lock);
            self.bpm.unpin_frame(self.frame_id, self.is_dirty);
        }
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        match &self.lock {
            Some(lock) => &**lock,
            None => panic!("write guard for {} used after release", self.page_id),
        }
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        self.is_dirty = true;
        match &mut self.lock {
            Some(lock) => &mut **lock,
            None => panic!("write guard for {} used after release", self.page_id),
        }
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.drop_guard();
    }
}
