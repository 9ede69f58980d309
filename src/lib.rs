//! TesseraDB - the storage core of a disk-oriented database.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           TesseraDB                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Index Layer (index/)                      │   │
//! │  │      BPlusTree + IndexIterator + KeyComparator           │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Buffer Pool (buffer/)                       │   │
//! │  │   BufferPoolManager + Frame + Page Guards + Statistics   │   │
//! │  │              LRU-K replacer (replacer/)                  │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Storage Layer (storage/)                    │   │
//! │  │    DiskManager (PageStore) + Page + index page layouts   │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, FrameId, Rid, Error, config)
//! - [`buffer`] - Buffer pool, page guards and the LRU-K replacer
//! - [`storage`] - Page store and on-page formats
//! - [`index`] - The B+Tree index
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use tesseradb::{BPlusTree, BufferPoolManager, DiskManager};
//!
//! let dm = DiskManager::open_or_create("my_database.db").unwrap();
//! let bpm = Arc::new(BufferPoolManager::new(64, dm));
//!
//! let index = BPlusTree::<i64, u64>::create("users_pk", Arc::clone(&bpm)).unwrap();
//! index.insert(&42, &4200).unwrap();
//! assert_eq!(index.get_value(&42).unwrap(), Some(4200));
//!
//! for entry in index.iter().unwrap() {
//!     let (key, value) = entry.unwrap();
//!     println!("{} -> {}", key, value);
//! }
//! bpm.flush_all_pages().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::PAGE_SIZE;
pub use common::{Error, FrameId, PageId, Result, Rid};

pub use buffer::{
    BasicPageGuard, BufferPoolManager, BufferPoolStats, Frame, LruKReplacer, PageReadGuard,
    PageWriteGuard, StatsSnapshot,
};
pub use index::BPlusTree;
pub use storage::page::Page;
pub use storage::{DiskManager, PageStore};
