//! Error types for TesseraDB.

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors surfaced by the storage core.
///
/// Logical outcomes of index operations (duplicate key on insert, missing key
/// on lookup or remove) are not errors: they come back as `bool` / `Option`.
/// Everything here is either an infrastructure failure the caller may retry
/// later, or a broken internal invariant.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the page store.
    ///
    /// Never retried inside the core; there is no log to recover from.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page does not exist on disk (never allocated, or deallocated).
    #[error("Page {0} not found")]
    PageNotFound(u32),

    /// Buffer pool has no free frames and cannot evict any pages.
    ///
    /// This happens when all frames are pinned.
    #[error("No free frames available in buffer pool")]
    NoFreeFrames,

    /// Attempted to delete a page that is still pinned.
    #[error("Page {0} is pinned")]
    PagePinned(u32),

    /// The provided page ID is the sentinel or otherwise unusable.
    #[error("Invalid page ID: {0}")]
    InvalidPageId(u32),

    /// An internal invariant was broken. This is a bug, not a user condition.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// Whether this error is a transient resource shortage the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NoFreeFrames | Error::PagePinned(_))
    }
}
