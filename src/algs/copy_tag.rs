//! Region-copy instructions and their deterministic order.
//!
//! A [`CopyComTag`] moves the cells of `sbox` in source sub-domain `src_index`
//! to the equally shaped `dbox` in destination sub-domain `dst_index`. Sender
//! and receiver derive the same tags independently and rely on the total order
//! below to agree on buffer offsets, so the order is part of the wire format.

use crate::geometry::{IndexBox, IntVect};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One rectangular region transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CopyComTag {
    pub dbox: IndexBox,
    pub sbox: IndexBox,
    pub dst_index: usize,
    pub src_index: usize,
}

impl CopyComTag {
    pub fn new(dbox: IndexBox, sbox: IndexBox, dst_index: usize, src_index: usize) -> Self {
        debug_assert!(dbox.same_shape(&sbox), "tag boxes differ in shape");
        Self {
            dbox,
            sbox,
            dst_index,
            src_index,
        }
    }

    /// `sbox.small_end() - dbox.small_end()`; non-zero under periodic wraparound
    /// or when copying between differently placed arrays.
    pub fn offset(&self) -> IntVect {
        self.sbox.small_end() - self.dbox.small_end()
    }

    /// Number of cells moved per component.
    pub fn num_pts(&self) -> usize {
        self.dbox.num_pts()
    }
}

impl Ord for CopyComTag {
    /// Lexicographic by source index, source low corner, destination index,
    /// destination low corner. The big ends only break ties between tags that
    /// agree on all four, keeping the order consistent with `Eq`.
    fn cmp(&self, rhs: &Self) -> Ordering {
        self.src_index
            .cmp(&rhs.src_index)
            .then_with(|| self.sbox.small_end().cmp(&rhs.sbox.small_end()))
            .then_with(|| self.dst_index.cmp(&rhs.dst_index))
            .then_with(|| self.dbox.small_end().cmp(&rhs.dbox.small_end()))
            .then_with(|| self.dbox.big_end().cmp(&rhs.dbox.big_end()))
            .then_with(|| self.sbox.big_end().cmp(&rhs.sbox.big_end()))
    }
}

impl PartialOrd for CopyComTag {
    fn partial_cmp(&self, rhs: &Self) -> Option<Ordering> {
        Some(self.cmp(rhs))
    }
}

/// Tags of one message or of the local phase, kept sorted.
pub type TagContainer = Vec<CopyComTag>;

/// Tags grouped by peer rank. `BTreeMap` keeps peer iteration deterministic.
pub type PeerTagMap = BTreeMap<usize, TagContainer>;

/// Total cells per component over `tags`.
pub fn tag_volume(tags: &[CopyComTag]) -> usize {
    tags.iter().map(CopyComTag::num_pts).sum()
}

/// Approximate heap footprint of a peer map, for cache statistics.
pub fn bytes_of_peer_map(map: &PeerTagMap) -> usize {
    map.values()
        .map(|v| std::mem::size_of::<usize>() + v.capacity() * std::mem::size_of::<CopyComTag>())
        .sum()
}
