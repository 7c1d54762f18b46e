//! Owner-rank assignment for the boxes of a [`BoxArray`](super::BoxArray).

use super::ref_id::RefId;
use crate::exchange_error::FabExchangeError;
use std::sync::{Arc, Weak};

#[derive(Debug)]
pub(crate) struct DistributionData {
    owners: Vec<usize>,
    nranks: usize,
    id: RefId,
}

/// Parallel sequence of owner ranks, one per box.
///
/// Shares the identity semantics of `BoxArray`: clones share a [`RefId`],
/// modification produces a new one.
#[derive(Clone, Debug)]
pub struct DistributionMapping {
    data: Arc<DistributionData>,
}

impl DistributionMapping {
    /// Build from explicit owners. Every owner must be below `nranks`.
    pub fn new(owners: Vec<usize>, nranks: usize) -> Result<Self, FabExchangeError> {
        if let Some((index, &rank)) = owners.iter().enumerate().find(|(_, r)| **r >= nranks) {
            return Err(FabExchangeError::InvalidOwner {
                index,
                rank,
                nranks,
            });
        }
        Ok(Self {
            data: Arc::new(DistributionData {
                owners,
                nranks,
                id: RefId::fresh(),
            }),
        })
    }

    /// Every box on rank 0 of a one-rank job.
    pub fn serial(n: usize) -> Self {
        Self::round_robin(n, 1)
    }

    /// Box `k` goes to rank `k % nranks`.
    pub fn round_robin(n: usize, nranks: usize) -> Self {
        let nranks = nranks.max(1);
        Self {
            data: Arc::new(DistributionData {
                owners: (0..n).map(|k| k % nranks).collect(),
                nranks,
                id: RefId::fresh(),
            }),
        }
    }

    pub fn ref_id(&self) -> RefId {
        self.data.id
    }

    pub fn len(&self) -> usize {
        self.data.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.owners.is_empty()
    }

    pub fn nranks(&self) -> usize {
        self.data.nranks
    }

    pub fn owners(&self) -> &[usize] {
        &self.data.owners
    }

    pub fn owner(&self, k: usize) -> Result<usize, FabExchangeError> {
        self.data
            .owners
            .get(k)
            .copied()
            .ok_or(FabExchangeError::IndexOutOfRange {
                index: k,
                len: self.len(),
            })
    }

    /// Reassign box `k`. The mapping receives a new identity.
    pub fn set_owner(&mut self, k: usize, rank: usize) -> Result<(), FabExchangeError> {
        let len = self.len();
        if k >= len {
            return Err(FabExchangeError::IndexOutOfRange { index: k, len });
        }
        let mut owners = self.data.owners.clone();
        owners[k] = rank;
        *self = Self::new(owners, self.nranks())?;
        Ok(())
    }

    pub(crate) fn downgrade(&self) -> Weak<DistributionData> {
        Arc::downgrade(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_owner_beyond_rank_count() {
        let err = DistributionMapping::new(vec![0, 3], 2).unwrap_err();
        assert!(matches!(
            err,
            FabExchangeError::InvalidOwner { index: 1, rank: 3, nranks: 2 }
        ));
    }

    #[test]
    fn set_owner_is_copy_on_write() {
        let dm = DistributionMapping::round_robin(4, 2);
        let mut moved = dm.clone();
        moved.set_owner(0, 1).unwrap();
        assert_ne!(dm.ref_id(), moved.ref_id());
        assert_eq!(dm.owners(), &[0, 1, 0, 1]);
        assert_eq!(moved.owners(), &[1, 1, 0, 1]);
    }
}
