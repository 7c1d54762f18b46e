//! Construction-time identities used as cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_REF_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one constructed `BoxArray` or `DistributionMapping`.
///
/// Two objects with equal contents built separately get different ids; clones
/// share the id of the original until one of them is modified.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefId(u64);

impl RefId {
    pub(crate) fn fresh() -> Self {
        RefId(NEXT_REF_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Key for a unique (box array, distribution mapping) combination.
///
/// Equality and ordering are O(1) comparisons of the two identities, never of
/// the box or owner contents.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BDKey {
    ba_id: RefId,
    dm_id: RefId,
}

impl BDKey {
    pub fn new(ba_id: RefId, dm_id: RefId) -> Self {
        Self { ba_id, dm_id }
    }

    pub fn box_array_id(&self) -> RefId {
        self.ba_id
    }

    pub fn distribution_id(&self) -> RefId {
        self.dm_id
    }
}

impl fmt::Display for BDKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(ba{}, dm{})", self.ba_id, self.dm_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_distinct() {
        let a = RefId::fresh();
        let b = RefId::fresh();
        assert_ne!(a, b);
        assert!(a < b);
    }
}
