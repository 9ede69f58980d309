//! Frame - a slot in the buffer pool.
//!
//! A [`Frame`] holds a [`Page`] plus metadata needed for buffer management:
//! - Which page is loaded (if any)
//! - Pin count for eviction protection
//! - Dirty flag for write-back tracking
//! - The page latch (the `RwLock` around the page bytes)

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::PageId;
use crate::storage::page::Page;

/// A frame in the buffer pool.
///
/// Frames are the "slots" in the buffer pool. Each frame can hold one page.
/// The buffer pool has a fixed number of frames allocated at startup and
/// reuses them for different pages over time.
///
/// # Thread Safety
/// - `page`: `RwLock`, the page latch. Readers share it, a writer excludes all.
/// - `page_id`, `pin_count`, `is_dirty`: atomics. The buffer pool only changes
///   `page_id` and `pin_count` while holding its own state mutex, so reads
///   done under that mutex are consistent with the page table.
///
/// Pinning protects a frame from eviction; latching protects its bytes from
/// concurrent modification. Callers need both.
pub struct Frame {
    /// The page data, protected by the page latch.
    page: RwLock<Page>,

    /// Raw id of the loaded page, `PageId::INVALID` when the frame is free.
    page_id: AtomicU32,

    /// Number of outstanding pins.
    pin_count: AtomicU32,

    /// Whether the bytes differ from what the page store holds.
    is_dirty: AtomicBool,
}

impl Frame {
    /// Create a new empty frame.
    pub fn new() -> Self {
        Self {
            page: RwLock::new(Page::new()),
            page_id: AtomicU32::new(PageId::INVALID.0),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Page latch
    // ========================================================================

    /// Acquire the page latch in shared mode.
    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Acquire the page latch in exclusive mode.
    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    // ========================================================================
    // Page ID
    // ========================================================================

    /// Get the page ID of the loaded page.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        let raw = PageId(self.page_id.load(Ordering::Acquire));
        raw.is_valid().then_some(raw)
    }

    #[inline]
    pub(crate) fn set_page_id(&self, page_id: Option<PageId>) {
        let raw = page_id.unwrap_or(PageId::INVALID);
        self.page_id.store(raw.0, Ordering::Release);
    }

    // ========================================================================
    // Pin count
    // ========================================================================

    /// Increment the pin count. Returns the new pin count.
    #[inline]
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the pin count. Returns the new pin count.
    ///
    /// # Panics
    /// Panics if pin count is already 0.
    #[inline]
    pub(crate) fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "pin count underflow");
        old - 1
    }

    /// Get the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    // ========================================================================
    // Dirty flag
    // ========================================================================

    #[inline]
    pub fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Check if the frame is empty (no page loaded).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.page_id().is_none()
    }

    /// Zero the bytes and clear all metadata so the frame can be reused.
    ///
    /// Takes the page latch; the caller must not hold it.
    pub(crate) fn reset(&self) {
        self.page_mut().reset();
        self.set_page_id(None);
        self.pin_count.store(0, Ordering::Release);
        self.clear_dirty();
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
