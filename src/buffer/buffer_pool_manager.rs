//! Buffer Pool Manager - the core page caching layer.
//!
//! The [`BufferPoolManager`] provides:
//! - Page caching between the page store and memory
//! - Pin-based protection against eviction
//! - Dirty page write-back on eviction and flush
//! - LRU-K victim selection
//! - Page allocation and deletion

use std::collections::{HashMap, VecDeque};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::buffer::replacer::LruKReplacer;
use crate::buffer::{BasicPageGuard, BufferPoolStats, Frame, PageReadGuard, PageWriteGuard};
use crate::common::config::DEFAULT_REPLACER_K;
use crate::common::{BufferPoolConfig, Error, FrameId, PageId, Result};
use crate::storage::PageStore;

/// Metadata guarded by the pool mutex.
struct PoolState {
    /// Resident pages. Each maps to a frame whose `page_id` matches.
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page, in reuse order.
    free_list: VecDeque<FrameId>,
}

/// Manages a pool of buffer frames for caching pages.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                    BufferPoolManager                        │
/// │  ┌──────────────────────┐  ┌──────────────────────────────┐ │
/// │  │ state (Mutex)        │  │     frames: Vec<Frame>       │ │
/// │  │  page_table PageId→Fid──▶ [Frame0] [Frame1] [Frame2]...│ │
/// │  │  free_list           │  └──────────────────────────────┘ │
/// │  └──────────────────────┘                                   │
/// │  ┌──────────────┐  ┌──────────────────┐                     │
/// │  │   replacer   │  │ disk (Mutex)     │                     │
/// │  │ LruKReplacer │  │ Box<dyn PageStore>│                    │
/// │  └──────────────┘  └──────────────────┘                     │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `state`: one `Mutex` over page table and free list. Pin counts and
///   evictable flags only change while it is held.
/// - `replacer`: has its own internal mutex
/// - `disk`: `Mutex`, the page store is single-threaded
/// - `frames`: No lock, fixed size, each Frame has its own page latch
/// - `stats`: No lock, all atomic counters
///
/// The pool mutex is never held while waiting for the latch of a pinned
/// frame: flushing pins under the mutex, releases it, and only then latches.
///
/// # Usage
/// ```ignore
/// let dm = DiskManager::create("test.db")?;
/// let bpm = BufferPoolManager::new(10, dm);
///
/// // Allocate a new page
/// let mut guard = bpm.new_page()?;
/// guard.as_mut_slice()[0] = 0xAB;
/// // guard drops: latch released, page marked dirty, unpinned
///
/// // Fetch existing page for reading
/// let guard = bpm.fetch_page_read(PageId::new(0))?;
/// let data = guard.as_slice();
/// ```
pub struct BufferPoolManager {
    /// Fixed pool of frames allocated at startup.
    frames: Vec<Frame>,

    state: Mutex<PoolState>,

    /// Eviction policy for selecting victim frames.
    replacer: LruKReplacer,

    /// Handles all page I/O.
    disk: Mutex<Box<dyn PageStore>>,

    /// Performance statistics.
    stats: BufferPoolStats,

    /// Number of frames in the pool (immutable after construction).
    pool_size: usize,
}

impl BufferPoolManager {
    /// Create a new buffer pool manager with the default replacer K.
    ///
    /// # Panics
    /// Panics if `pool_size` is 0.
    pub fn new(pool_size: usize, store: impl PageStore + 'static) -> Self {
        Self::with_config(
            BufferPoolConfig {
                pool_size,
                replacer_k: DEFAULT_REPLACER_K,
            },
            store,
        )
    }

    /// Create a new buffer pool manager from a [`BufferPoolConfig`].
    ///
    /// # Panics
    /// Panics if `config.pool_size` or `config.replacer_k` is 0.
    pub fn with_config(config: BufferPoolConfig, store: impl PageStore + 'static) -> Self {
        let pool_size = config.pool_size;
        assert!(pool_size > 0, "pool_size must be > 0");

        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list: VecDeque<FrameId> = (0..pool_size).map(FrameId::new).collect();

        Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
            }),
            replacer: LruKReplacer::new(pool_size, config.replacer_k),
            disk: Mutex::new(Box::new(store)),
            stats: BufferPoolStats::new(),
            pool_size,
        }
    }

    // ========================================================================
    // Public API: unguarded pin / unpin
    // ========================================================================

    /// Allocate a page and pin it in a zeroed frame.
    ///
    /// The caller owns one pin and must release it with
    /// [`unpin_page`](Self::unpin_page). Prefer [`new_page`](Self::new_page).
    ///
    /// # Errors
    /// - `Error::NoFreeFrames` if every frame is pinned
    /// - I/O errors from allocation or from writing back a dirty victim
    pub fn pin_new_page(&self) -> Result<(PageId, &Frame)> {
        let (page_id, frame_id) = self.new_page_internal()?;
        Ok((page_id, &self.frames[frame_id.0]))
    }

    /// Pin `page_id`, loading it from the page store on a miss.
    ///
    /// The caller owns one pin and must release it with
    /// [`unpin_page`](Self::unpin_page). Prefer the guarded variants.
    ///
    /// # Errors
    /// - `Error::InvalidPageId` for `PageId::INVALID`
    /// - `Error::PageNotFound` if the page doesn't exist in the store
    /// - `Error::NoFreeFrames` if all frames are pinned
    pub fn fetch_page(&self, page_id: PageId) -> Result<&Frame> {
        let frame_id = self.fetch_page_internal(page_id)?;
        Ok(&self.frames[frame_id.0])
    }

    /// Drop one pin on `page_id`, ORing in `is_dirty`.
    ///
    /// Returns `false` if the page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.state.lock();
        match state.page_table.get(&page_id) {
            Some(&frame_id) => self.unpin_locked(frame_id, is_dirty),
            None => false,
        }
    }

    // ========================================================================
    // Public API: guarded access
    // ========================================================================

    /// Fetch a page pinned but unlatched.
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<BasicPageGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        Ok(BasicPageGuard::new(self, frame_id, page_id))
    }

    /// Fetch a page for reading (shared access).
    ///
    /// # Errors
    /// Same as [`fetch_page`](Self::fetch_page).
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page();

        Ok(PageReadGuard::new(self, frame_id, page_id, lock))
    }

    /// Fetch a page for writing (exclusive access).
    ///
    /// # Errors
    /// Same as [`fetch_page`](Self::fetch_page).
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page_mut();

        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Like [`fetch_page_read`](Self::fetch_page_read), mapping any failure to `None`.
    pub fn checked_read_page(&self, page_id: PageId) -> Option<PageReadGuard<'_>> {
        self.fetch_page_read(page_id).ok()
    }

    /// Like [`fetch_page_write`](Self::fetch_page_write), mapping any failure to `None`.
    pub fn checked_write_page(&self, page_id: PageId) -> Option<PageWriteGuard<'_>> {
        self.fetch_page_write(page_id).ok()
    }

    /// Allocate a new page and return it write-latched.
    ///
    /// # Errors
    /// - `Error::NoFreeFrames` if all frames are pinned
    /// - I/O errors from page allocation
    pub fn new_page(&self) -> Result<PageWriteGuard<'_>> {
        let (page_id, frame_id) = self.new_page_internal()?;
        let lock = self.frames[frame_id.0].page_mut();

        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Allocate a new page and return it pinned but unlatched.
    pub fn new_page_guarded(&self) -> Result<BasicPageGuard<'_>> {
        let (page_id, frame_id) = self.new_page_internal()?;
        Ok(BasicPageGuard::new(self, frame_id, page_id))
    }

    /// Reserve a page id in the page store without bringing it into the pool.
    pub fn allocate_page_id(&self) -> Result<PageId> {
        let page_id = self.disk.lock().allocate_page()?;
        self.stats.record_allocation();
        Ok(page_id)
    }

    // ========================================================================
    // Public API: delete and flush
    // ========================================================================

    /// Delete a page from the pool and deallocate it in the page store.
    ///
    /// A page that is not resident is left alone.
    ///
    /// # Errors
    /// - `Error::PagePinned` if the page is still pinned
    /// - Errors from the page store's deallocation
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&fid) => fid,
            None => return Ok(()),
        };

        let frame = &self.frames[frame_id.0];
        if frame.is_pinned() {
            return Err(Error::PagePinned(page_id.0));
        }

        self.replacer.remove(frame_id)?;
        state.page_table.remove(&page_id);
        frame.reset();
        state.free_list.push_back(frame_id);

        self.disk.lock().deallocate_page(page_id)?;
        self.stats.record_delete();
        debug!("deleted page {} from frame {}", page_id, frame_id);
        Ok(())
    }

    /// Write a resident page to the page store, dirty or not.
    ///
    /// Returns `Ok(false)` if the page is not resident.
    ///
    /// # Errors
    /// I/O errors from the page store. The dirty flag is left set.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        // Pin so the frame cannot be evicted once the pool mutex is released.
        let frame_id = {
            let state = self.state.lock();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                return Ok(false);
            };
            self.frames[frame_id.0].pin();
            self.replacer.set_evictable(frame_id, false);
            frame_id
        };

        let frame = &self.frames[frame_id.0];
        let result = {
            let page = frame.page();
            let written = self.disk.lock().write_page(page_id, &page);
            if written.is_ok() {
                frame.clear_dirty();
            }
            written
        };
        self.unpin_frame(frame_id, false);

        if let Err(e) = result {
            warn!("flush of page {} failed: {}", page_id, e);
            return Err(e);
        }
        self.stats.record_write();
        Ok(true)
    }

    /// Flush every resident page.
    ///
    /// # Errors
    /// Stops at the first I/O error.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_ids: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };

        for page_id in page_ids {
            // a page evicted in the meantime was written back already
            self.flush_page(page_id)?;
        }

        Ok(())
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    /// Get buffer pool statistics.
    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    /// Get the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Get the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Get the number of pages in the buffer pool.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Whether `page_id` is resident.
    pub fn contains_page(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Pin count of a resident page, `None` if not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|fid| self.frames[fid.0].pin_count())
    }

    // ========================================================================
    // Internal: used by guards
    // ========================================================================

    #[inline]
    pub(crate) fn frame(&self, frame_id: FrameId) -> &Frame {
        &self.frames[frame_id.0]
    }

    /// Drop one pin on a frame the caller knows is pinned.
    pub(crate) fn unpin_frame(&self, frame_id: FrameId, is_dirty: bool) {
        let _state = self.state.lock();
        let unpinned = self.unpin_locked(frame_id, is_dirty);
        debug_assert!(unpinned, "unpin of unpinned frame {}", frame_id);
    }

    /// Caller holds the pool mutex.
    fn unpin_locked(&self, frame_id: FrameId, is_dirty: bool) -> bool {
        let frame = &self.frames[frame_id.0];
        if !frame.is_pinned() {
            return false;
        }
        if is_dirty {
            frame.mark_dirty();
        }
        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    /// Pin `page_id`, loading it if needed, and return its frame.
    fn fetch_page_internal(&self, page_id: PageId) -> Result<FrameId> {
        if !page_id.is_valid() {
            return Err(Error::InvalidPageId(page_id.0));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            self.frames[frame_id.0].pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            self.stats.record_hit();
            trace!("page {} hit in frame {}", page_id, frame_id);
            return Ok(frame_id);
        }

        self.stats.record_miss();
        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id.0];

        let loaded = {
            let mut page = frame.page_mut();
            self.disk.lock().read_page(page_id, &mut page)
        };
        if let Err(e) = loaded {
            // never leave a frame looking resident for a page that failed to load
            frame.reset();
            state.free_list.push_back(frame_id);
            warn!("load of page {} failed: {}", page_id, e);
            return Err(e);
        }
        self.stats.record_read();

        self.install(&mut state, page_id, frame_id);
        trace!("page {} loaded into frame {}", page_id, frame_id);
        Ok(frame_id)
    }

    /// Allocate a page id and pin it in a zeroed frame.
    fn new_page_internal(&self) -> Result<(PageId, FrameId)> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;

        let allocated = self.disk.lock().allocate_page();
        let page_id = match allocated {
            Ok(page_id) => page_id,
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        };
        self.stats.record_allocation();

        self.frames[frame_id.0].reset();
        self.install(&mut state, page_id, frame_id);
        Ok((page_id, frame_id))
    }

    /// Map `page_id` to a freshly filled frame with one pin.
    fn install(&self, state: &mut PoolState, page_id: PageId, frame_id: FrameId) {
        let frame = &self.frames[frame_id.0];
        frame.set_page_id(Some(page_id));
        frame.pin();
        state.page_table.insert(page_id, frame_id);

        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
    }

    // ========================================================================
    // Internal: Frame acquisition and eviction
    // ========================================================================

    /// Take a free frame, or evict a victim and return its reset frame.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.evict().ok_or(Error::NoFreeFrames)?;
        let frame = &self.frames[frame_id.0];
        let Some(old_page_id) = frame.page_id() else {
            return Err(Error::InvariantViolation(format!(
                "replacer evicted empty frame {}",
                frame_id
            )));
        };

        if frame.is_dirty() {
            let written = {
                let page = frame.page();
                self.disk.lock().write_page(old_page_id, &page)
            };
            if let Err(e) = written {
                // keep the victim resident and evictable
                self.replacer.record_access(frame_id);
                self.replacer.set_evictable(frame_id, true);
                warn!(
                    "write-back of page {} from frame {} failed: {}",
                    old_page_id, frame_id, e
                );
                return Err(e);
            }
            self.stats.record_write();
        }

        state.page_table.remove(&old_page_id);
        frame.reset();
        self.stats.record_eviction();
        debug!("evicted page {} from frame {}", old_page_id, frame_id);

        Ok(frame_id)
    }
}
