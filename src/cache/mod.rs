//! Caches of communication metadata and tilings, and the context owning them.

pub mod context;
pub mod metadata_cache;
pub mod stats;

pub use context::CommContext;
pub use metadata_cache::MetadataCache;
pub use stats::CacheStats;

use crate::layout::BDKey;
use std::fmt::Debug;
use std::hash::Hash;

/// Key of a cache entry: hashable, and able to name the decompositions it
/// depends on so that entries can be flushed per decomposition.
pub trait CacheKey: Copy + Eq + Hash + Debug {
    fn bd_keys(&self) -> Vec<BDKey>;
}

/// Value stored in a [`MetadataCache`].
pub trait Cached {
    /// Count one use; returns the new count.
    fn record_use(&self) -> u64;
    fn use_count(&self) -> u64;
    /// Estimated heap footprint.
    fn bytes(&self) -> usize;
}
