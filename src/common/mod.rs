//! Common types and utilities shared across TesseraDB.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and [`BufferPoolConfig`]
//! - Error types
//! - Identifiers (PageId, FrameId, Rid)

pub mod config;
pub mod error;
mod frame_id;
mod page_id;
mod rid;

pub use config::BufferPoolConfig;
pub use error::{Error, Result};
pub use frame_id::FrameId;
pub use page_id::PageId;
pub use rid::Rid;
