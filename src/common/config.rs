//! Configuration constants and tunables for TesseraDB.

/// Size of a page in bytes (4KB).
///
/// Matches the OS page size on most systems, so a frame can be read or written
/// with a single aligned I/O.
///
/// # Memory Layout
/// With 4KB pages and 32-bit PageIds:
/// - Max pages: 2^32 - 1 (`u32::MAX` is reserved for `PageId::INVALID`)
/// - Max database size: ~16TB
pub const PAGE_SIZE: usize = 4096;

/// Maximum number of addressable pages with a u32 PageId.
pub const MAX_PAGES: u64 = u32::MAX as u64;

/// Maximum theoretical database size in bytes.
pub const MAX_DB_SIZE_BYTES: u64 = MAX_PAGES * PAGE_SIZE as u64;

/// Default number of frames in a buffer pool.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Default K for the LRU-K replacer.
pub const DEFAULT_REPLACER_K: usize = 10;

/// Tunables for a [`BufferPoolManager`](crate::buffer::BufferPoolManager).
///
/// # Example
/// ```
/// use tesseradb::common::config::BufferPoolConfig;
///
/// let config = BufferPoolConfig { pool_size: 16, ..Default::default() };
/// assert_eq!(config.replacer_k, tesseradb::common::config::DEFAULT_REPLACER_K);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Number of frames allocated up front.
    pub pool_size: usize,
    /// Number of accesses before a frame leaves the replacer's history list.
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            replacer_k: DEFAULT_REPLACER_K,
        }
    }
}
