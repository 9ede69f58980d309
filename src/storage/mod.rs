//! Storage layer - disk I/O and page formats.
//!
//! This module handles persistent storage:
//! - [`PageStore`] - The backing-store interface the buffer pool talks to
//! - [`DiskManager`] - File-backed [`PageStore`]
//! - [`page`] - Page types and layouts

mod disk_manager;
pub mod page;

pub use disk_manager::{DiskManager, PageStore};
