//! Cache Module
//!
//! In-process key-value cache with per-entry TTL, usable on its own or as
//! the fast tier in front of a durable store.

mod entry;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::CacheEntry;
pub use stats::CacheStats;
pub use store::MemoryCache;
