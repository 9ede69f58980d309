//! Eviction policy implementations (replacers).
//!
//! Currently implements:
//! - [`LruKReplacer`] - K-distance based, with history and cache lists

mod lru_k;

pub use lru_k::LruKReplacer;
