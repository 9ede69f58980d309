//! Disk Manager - low-level file I/O for database pages.
//!
//! The buffer pool reaches persistent storage only through the [`PageStore`]
//! trait. [`DiskManager`] is the file-backed implementation:
//! - Reading and writing pages
//! - Allocating and deallocating page ids
//! - Managing the database file

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::common::config::{MAX_PAGES, PAGE_SIZE};
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;

/// A page-addressable block device.
///
/// Calls are synchronous; the buffer pool serializes access behind a mutex,
/// so implementations need `Send` but not `Sync`.
pub trait PageStore: Send {
    /// Fill `page` with the stored bytes of `page_id`.
    fn read_page(&mut self, page_id: PageId, page: &mut Page) -> Result<()>;

    /// Persist the bytes of `page` under `page_id`.
    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()>;

    /// Reserve a fresh page id. Ids are handed out in increasing order and
    /// never reused.
    fn allocate_page(&mut self) -> Result<PageId>;

    /// Give `page_id` back. Later reads and writes of it fail.
    fn deallocate_page(&mut self, page_id: PageId) -> Result<()>;
}

/// Manages disk I/O for a single database file.
///
/// # File Layout
/// The database is stored as a single file with pages laid out sequentially:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │ Page 2  │  ...    │ Page N  │
/// │ (4KB)   │ (4KB)   │ (4KB)   │         │ (4KB)   │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      4096     8192    ...    N×4096
/// ```
///
/// Page N is located at file offset `N × PAGE_SIZE`. Deallocated pages keep
/// their slot in the file; the id is only marked dead for the lifetime of
/// this `DiskManager`.
///
/// # Durability
/// By default every write is followed by `fsync()`. Tests and benchmarks can
/// turn that off with [`DiskManager::with_sync_writes`].
pub struct DiskManager {
    file: File,
    /// Number of pages in the file.
    page_count: u32,
    deallocated: HashSet<PageId>,
    sync_writes: bool,
}

impl DiskManager {
    /// Create a new database file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        debug!("created database file {}", path.as_ref().display());
        Ok(Self::from_file(file, 0))
    }

    /// Open an existing database file.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let file_size = file.metadata()?.len();
        let page_count = (file_size / PAGE_SIZE as u64) as u32;

        debug!(
            "opened database file {} with {} pages",
            path.as_ref().display(),
            page_count
        );
        Ok(Self::from_file(file, page_count))
    }

    /// Open an existing database file, or create if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    fn from_file(file: File, page_count: u32) -> Self {
        Self {
            file,
            page_count,
            deallocated: HashSet::new(),
            sync_writes: true,
        }
    }

    /// Toggle `fsync()` after each write and allocation.
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Get the number of pages in the database file, deallocated ones included.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Get the total size of the database file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        (self.page_count as u64) * (PAGE_SIZE as u64)
    }

    /// Whether `page_id` has been handed out and not deallocated.
    pub fn is_live(&self, page_id: PageId) -> bool {
        page_id.0 < self.page_count && !self.deallocated.contains(&page_id)
    }

    fn check_live(&self, page_id: PageId) -> Result<()> {
        if self.is_live(page_id) {
            Ok(())
        } else {
            Err(Error::PageNotFound(page_id.0))
        }
    }

    fn seek_to(&mut self, page_id: PageId) -> Result<()> {
        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.sync_writes {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

impl PageStore for DiskManager {
    /// # Errors
    /// Returns `Error::PageNotFound` if the page was never allocated or has
    /// been deallocated.
    fn read_page(&mut self, page_id: PageId, page: &mut Page) -> Result<()> {
        self.check_live(page_id)?;
        self.seek_to(page_id)?;
        self.file.read_exact(page.as_mut_slice())?;
        Ok(())
    }

    /// # Errors
    /// Returns `Error::PageNotFound` if the page hasn't been allocated or has
    /// been deallocated.
    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        self.check_live(page_id)?;
        self.seek_to(page_id)?;
        self.file.write_all(page.as_slice())?;
        self.sync()
    }

    /// Extend the file with a zeroed page.
    fn allocate_page(&mut self) -> Result<PageId> {
        // u32::MAX is PageId::INVALID
        if self.page_count as u64 >= MAX_PAGES {
            return Err(Error::InvalidPageId(self.page_count));
        }
        let page_id = PageId::new(self.page_count);

        self.seek_to(page_id)?;
        let zeros = [0u8; PAGE_SIZE];
        self.file.write_all(&zeros)?;
        self.sync()?;

        self.page_count += 1;
        debug!("allocated page {}", page_id);
        Ok(page_id)
    }

    fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        self.check_live(page_id)?;
        self.deallocated.insert(page_id);
        debug!("deallocated page {}", page_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read(dm: &mut DiskManager, page_id: PageId) -> Result<Page> {
        let mut page = Page::new();
        dm.read_page(page_id, &mut page)?;
        Ok(page)
    }

    #[test]
    fn test_create_new_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let dm = DiskManager::create(&path).unwrap();
        assert_eq!(dm.page_count(), 0);
        assert_eq!(dm.file_size(), 0);
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        DiskManager::create(&path).unwrap();
        assert!(DiskManager::create(&path).is_err());
    }

    #[test]
    fn test_open_nonexistent_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.db");

        assert!(DiskManager::open(&path).is_err());
    }

    #[test]
    fn test_allocate_and_read_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let mut dm = DiskManager::create(&path).unwrap();

        let page_id = dm.allocate_page().unwrap();
        assert_eq!(page_id, PageId::new(0));
        assert_eq!(dm.page_count(), 1);

        // Freshly allocated pages are zeroed
        let page = read(&mut dm, page_id).unwrap();
        assert_eq!(page.as_slice()[0], 0);
        assert_eq!(page.as_slice()[4095], 0);
    }

    #[test]
    fn test_write_and_read_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let mut dm = DiskManager::create(&path).unwrap().with_sync_writes(false);
        let page_id = dm.allocate_page().unwrap();

        let mut page = Page::new();
        page.as_mut_slice()[0] = 0xAB;
        page.as_mut_slice()[100] = 0xCD;
        page.as_mut_slice()[4095] = 0xEF;
        dm.write_page(page_id, &page).unwrap();

        let read_page = read(&mut dm, page_id).unwrap();
        assert_eq!(read_page.as_slice()[0], 0xAB);
        assert_eq!(read_page.as_slice()[100], 0xCD);
        assert_eq!(read_page.as_slice()[4095], 0xEF);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut dm = DiskManager::create(&path).unwrap();
            let page_id = dm.allocate_page().unwrap();

            let mut page = Page::new();
            page.as_mut_slice()[0] = 0x42;
            dm.write_page(page_id, &page).unwrap();
        }

        {
            let mut dm = DiskManager::open(&path).unwrap();
            assert_eq!(dm.page_count(), 1);

            let page = read(&mut dm, PageId::new(0)).unwrap();
            assert_eq!(page.as_slice()[0], 0x42);
        }
    }

    #[test]
    fn test_multiple_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let mut dm = DiskManager::create(&path).unwrap().with_sync_writes(false);

        for i in 0..10 {
            let page_id = dm.allocate_page().unwrap();
            assert_eq!(page_id.0, i);

            let mut page = Page::new();
            page.as_mut_slice()[0] = i as u8;
            dm.write_page(page_id, &page).unwrap();
        }

        assert_eq!(dm.page_count(), 10);
        assert_eq!(dm.file_size(), 10 * PAGE_SIZE as u64);

        for i in 0..10 {
            let page = read(&mut dm, PageId::new(i)).unwrap();
            assert_eq!(page.as_slice()[0], i as u8);
        }
    }

    #[test]
    fn test_read_unallocated_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let mut dm = DiskManager::create(&path).unwrap();
        dm.allocate_page().unwrap();

        let result = read(&mut dm, PageId::new(1));
        assert!(matches!(result, Err(Error::PageNotFound(1))));
    }

    #[test]
    fn test_write_unallocated_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let mut dm = DiskManager::create(&path).unwrap();

        let page = Page::new();
        let result = dm.write_page(PageId::new(0), &page);
        assert!(matches!(result, Err(Error::PageNotFound(0))));
    }

    #[test]
    fn test_deallocate_rejects_access_and_never_reuses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let mut dm = DiskManager::create(&path).unwrap().with_sync_writes(false);
        let p0 = dm.allocate_page().unwrap();
        let p1 = dm.allocate_page().unwrap();

        dm.deallocate_page(p0).unwrap();
        assert!(!dm.is_live(p0));
        assert!(dm.is_live(p1));
        assert!(read(&mut dm, p0).is_err());
        assert!(dm.write_page(p0, &Page::new()).is_err());
        assert!(dm.deallocate_page(p0).is_err());

        let p2 = dm.allocate_page().unwrap();
        assert_eq!(p2, PageId::new(2));
    }

    #[test]
    fn test_open_or_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut dm = DiskManager::open_or_create(&path).unwrap();
            assert_eq!(dm.page_count(), 0);
            dm.allocate_page().unwrap();
        }

        {
            let dm = DiskManager::open_or_create(&path).unwrap();
            assert_eq!(dm.page_count(), 1);
        }
    }
}
