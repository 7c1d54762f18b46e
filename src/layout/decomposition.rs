//! Domain decomposition: boxes, owners and the view of one rank.

use super::box_array::{BoxArray, BoxArrayData};
use super::distribution::{DistributionData, DistributionMapping};
use super::ref_id::BDKey;
use crate::debug_invariants::DebugInvariants;
use crate::exchange_error::FabExchangeError;
use crate::geometry::{IndexBox, IndexType};
use std::sync::{Arc, Weak};

/// A [`BoxArray`] paired with its [`DistributionMapping`] as seen from `my_rank`.
///
/// Equality of decompositions is identity of their [`BDKey`]; the local index
/// array is sorted so membership and local positions are binary searches.
#[derive(Clone, Debug)]
pub struct DomainDecomposition {
    ba: BoxArray,
    dm: DistributionMapping,
    my_rank: usize,
    local: Arc<Vec<usize>>,
}

impl DomainDecomposition {
    pub fn new(
        ba: BoxArray,
        dm: DistributionMapping,
        my_rank: usize,
    ) -> Result<Self, FabExchangeError> {
        if ba.len() != dm.len() {
            return Err(FabExchangeError::LengthMismatch {
                boxes: ba.len(),
                owners: dm.len(),
            });
        }
        if my_rank >= dm.nranks() {
            return Err(FabExchangeError::InvalidRank {
                rank: my_rank,
                nranks: dm.nranks(),
            });
        }
        let local = dm
            .owners()
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == my_rank)
            .map(|(k, _)| k)
            .collect();
        let decomp = Self {
            ba,
            dm,
            my_rank,
            local: Arc::new(local),
        };
        crate::debug_invariants!(decomp.validate_invariants(), "DomainDecomposition::new");
        Ok(decomp)
    }

    /// All boxes on rank 0 of a one-rank job.
    pub fn serial(ba: BoxArray) -> Self {
        let dm = DistributionMapping::serial(ba.len());
        let local = Arc::new((0..ba.len()).collect());
        Self {
            ba,
            dm,
            my_rank: 0,
            local,
        }
    }

    /// The same global decomposition as seen from another rank.
    pub fn on_rank(&self, rank: usize) -> Result<Self, FabExchangeError> {
        Self::new(self.ba.clone(), self.dm.clone(), rank)
    }

    pub fn box_array(&self) -> &BoxArray {
        &self.ba
    }

    pub fn distribution(&self) -> &DistributionMapping {
        &self.dm
    }

    pub fn bd_key(&self) -> BDKey {
        BDKey::new(self.ba.ref_id(), self.dm.ref_id())
    }

    pub fn ix_type(&self) -> IndexType {
        self.ba.ix_type()
    }

    pub fn len(&self) -> usize {
        self.ba.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ba.is_empty()
    }

    pub fn my_rank(&self) -> usize {
        self.my_rank
    }

    pub fn nranks(&self) -> usize {
        self.dm.nranks()
    }

    pub fn box_at(&self, k: usize) -> Result<IndexBox, FabExchangeError> {
        self.ba.box_at(k)
    }

    pub fn owner(&self, k: usize) -> Result<usize, FabExchangeError> {
        self.dm.owner(k)
    }

    /// Global indices owned by this rank, ascending.
    pub fn local_indices(&self) -> &[usize] {
        &self.local
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    pub fn is_local(&self, k: usize) -> bool {
        self.local.binary_search(&k).is_ok()
    }

    /// Position of global index `k` in [`local_indices`](Self::local_indices).
    pub fn local_index(&self, k: usize) -> Option<usize> {
        self.local.binary_search(&k).ok()
    }

    pub(crate) fn liveness(&self) -> Liveness {
        Liveness {
            ba: self.ba.downgrade(),
            dm: self.dm.downgrade(),
        }
    }
}

impl PartialEq for DomainDecomposition {
    fn eq(&self, other: &Self) -> bool {
        self.bd_key() == other.bd_key() && self.my_rank == other.my_rank
    }
}

impl Eq for DomainDecomposition {}

impl DebugInvariants for DomainDecomposition {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DomainDecomposition");
    }

    fn validate_invariants(&self) -> Result<(), FabExchangeError> {
        if self.ba.len() != self.dm.len() {
            return Err(FabExchangeError::LengthMismatch {
                boxes: self.ba.len(),
                owners: self.dm.len(),
            });
        }
        for (index, &rank) in self.dm.owners().iter().enumerate() {
            if rank >= self.dm.nranks() {
                return Err(FabExchangeError::InvalidOwner {
                    index,
                    rank,
                    nranks: self.dm.nranks(),
                });
            }
            if (rank == self.my_rank) != self.is_local(index) {
                return Err(FabExchangeError::NotLocal {
                    index,
                    rank: self.my_rank,
                });
            }
        }
        Ok(())
    }
}

/// Weak handles telling whether any live object still carries a [`BDKey`].
#[derive(Clone, Debug)]
pub(crate) struct Liveness {
    ba: Weak<BoxArrayData>,
    dm: Weak<DistributionData>,
}

impl Liveness {
    pub(crate) fn is_alive(&self) -> bool {
        self.ba.strong_count() > 0 && self.dm.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes(n: i32) -> BoxArray {
        BoxArray::cell_centered((0..n).map(|k| IndexBox::line(4 * k, 4 * k + 3)).collect())
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = DomainDecomposition::new(boxes(3), DistributionMapping::round_robin(2, 2), 0)
            .unwrap_err();
        assert!(matches!(
            err,
            FabExchangeError::LengthMismatch { boxes: 3, owners: 2 }
        ));
    }

    #[test]
    fn local_queries_use_sorted_indices() {
        let dd = DomainDecomposition::new(boxes(7), DistributionMapping::round_robin(7, 3), 1)
            .unwrap();
        assert_eq!(dd.local_indices(), &[1, 4]);
        assert!(dd.is_local(4));
        assert!(!dd.is_local(3));
        assert_eq!(dd.local_index(4), Some(1));
        assert_eq!(dd.local_index(5), None);
    }

    #[test]
    fn key_identity_follows_sharing() {
        let dd = DomainDecomposition::serial(boxes(2));
        let same = dd.clone();
        let rebuilt = DomainDecomposition::serial(boxes(2));
        assert_eq!(dd.bd_key(), same.bd_key());
        assert_ne!(dd.bd_key(), rebuilt.bd_key());
        assert_eq!(dd, same);
        assert_ne!(dd, rebuilt);
    }

    #[test]
    fn liveness_tracks_last_reference() {
        let dd = DomainDecomposition::serial(boxes(2));
        let live = dd.liveness();
        assert!(live.is_alive());
        drop(dd);
        assert!(!live.is_alive());
    }
}
