//! Reference-counted, identity-carrying arrays of sub-domain boxes.

use super::ref_id::RefId;
use crate::exchange_error::FabExchangeError;
use crate::geometry::{IndexBox, IndexType, IntVect, SPACEDIM};
use hashbrown::HashMap;
use once_cell::sync::OnceCell;
use std::sync::{Arc, Weak};

#[derive(Debug)]
pub(crate) struct BoxArrayData {
    boxes: Vec<IndexBox>,
    ix_type: IndexType,
    id: RefId,
    bins: OnceCell<BoxBins>,
}

/// Ordered sequence of sub-domain boxes sharing one [`IndexType`].
///
/// Cloning is cheap and shares identity. Every mutating method performs a
/// copy-on-write and assigns a fresh [`RefId`], so cached communication
/// patterns keyed on the old identity are never reused for the new contents.
#[derive(Clone, Debug)]
pub struct BoxArray {
    data: Arc<BoxArrayData>,
}

impl BoxArray {
    pub fn new(boxes: Vec<IndexBox>, ix_type: IndexType) -> Self {
        Self {
            data: Arc::new(BoxArrayData {
                boxes,
                ix_type,
                id: RefId::fresh(),
                bins: OnceCell::new(),
            }),
        }
    }

    /// Cell-centered box array.
    pub fn cell_centered(boxes: Vec<IndexBox>) -> Self {
        Self::new(boxes, IndexType::cell())
    }

    /// Chop `domain` into a regular grid of boxes of at most `max_size` cells per
    /// direction, x fastest.
    pub fn chopped(domain: &IndexBox, max_size: IntVect, ix_type: IndexType) -> Self {
        let mut boxes = Vec::new();
        let step = |d: usize| max_size[d].max(1);
        let (lo, hi) = (domain.small_end(), domain.big_end());
        let mut k = lo[2];
        while k <= hi[2] {
            let mut j = lo[1];
            while j <= hi[1] {
                let mut i = lo[0];
                while i <= hi[0] {
                    let start = IntVect::new(i, j, k);
                    let end = (start + IntVect(std::array::from_fn(step)) - IntVect::splat(1))
                        .elem_min(&hi);
                    boxes.push(IndexBox::new(start, end));
                    i += step(0);
                }
                j += step(1);
            }
            k += step(2);
        }
        Self::new(boxes, ix_type)
    }

    pub fn ref_id(&self) -> RefId {
        self.data.id
    }

    pub fn ix_type(&self) -> IndexType {
        self.data.ix_type
    }

    pub fn len(&self) -> usize {
        self.data.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.boxes.is_empty()
    }

    pub fn boxes(&self) -> &[IndexBox] {
        &self.data.boxes
    }

    pub fn get(&self, k: usize) -> Option<IndexBox> {
        self.data.boxes.get(k).copied()
    }

    pub fn box_at(&self, k: usize) -> Result<IndexBox, FabExchangeError> {
        self.get(k).ok_or(FabExchangeError::IndexOutOfRange {
            index: k,
            len: self.len(),
        })
    }

    /// Replace box `k`. The array receives a new identity.
    pub fn set_box(&mut self, k: usize, bx: IndexBox) -> Result<(), FabExchangeError> {
        let len = self.len();
        if k >= len {
            return Err(FabExchangeError::IndexOutOfRange { index: k, len });
        }
        let mut boxes = self.data.boxes.clone();
        boxes[k] = bx;
        *self = Self::new(boxes, self.ix_type());
        Ok(())
    }

    /// A new box array with every box grown by `ng`.
    pub fn grown(&self, ng: IntVect) -> Self {
        Self::new(
            self.data.boxes.iter().map(|b| b.grow(ng)).collect(),
            self.ix_type(),
        )
    }

    /// Bounding box of all boxes.
    pub fn minimal_box(&self) -> IndexBox {
        self.data
            .boxes
            .iter()
            .fold(IndexBox::empty(), |acc, b| acc.bounding(b))
    }

    pub fn num_pts(&self) -> usize {
        self.data.boxes.iter().map(IndexBox::num_pts).sum()
    }

    /// True if no two boxes overlap.
    pub fn is_disjoint(&self) -> bool {
        let bins = self.bins();
        self.data.boxes.iter().enumerate().all(|(k, b)| {
            bins.candidates(b, IntVect::zero())
                .into_iter()
                .all(|j| j == k || !self.data.boxes[j].intersects(b))
        })
    }

    /// Indices `j` whose box grown by `ng` intersects `region`, ascending.
    pub fn intersecting(&self, region: &IndexBox, ng: IntVect) -> Vec<usize> {
        self.bins()
            .candidates(region, ng)
            .into_iter()
            .filter(|&j| self.data.boxes[j].grow(ng).intersects(region))
            .collect()
    }

    pub(crate) fn bins(&self) -> &BoxBins {
        self.data.bins.get_or_init(|| BoxBins::build(&self.data.boxes))
    }

    pub(crate) fn downgrade(&self) -> Weak<BoxArrayData> {
        Arc::downgrade(&self.data)
    }
}

/// Coarse spatial hash of a box array.
///
/// Each box is filed under the bin containing its small end, with bins as
/// large as the largest box in every direction. A box filed in bin `c` can
/// therefore only reach bins `c` and `c + 1`, which bounds the search for
/// candidates to the query's bins plus one layer on the low side.
#[derive(Debug)]
pub(crate) struct BoxBins {
    bin_size: IntVect,
    bins: HashMap<IntVect, Vec<usize>>,
}

impl BoxBins {
    fn build(boxes: &[IndexBox]) -> Self {
        let bin_size = boxes
            .iter()
            .filter(|b| !b.is_empty())
            .fold(IntVect::splat(1), |acc, b| acc.elem_max(&b.size()));
        let mut bins: HashMap<IntVect, Vec<usize>> = HashMap::new();
        for (k, b) in boxes.iter().enumerate() {
            if b.is_empty() {
                continue;
            }
            bins.entry(b.small_end().div_floor(&bin_size))
                .or_default()
                .push(k);
        }
        Self { bin_size, bins }
    }

    /// Superset of the boxes whose `ng`-grown extent may intersect `region`,
    /// sorted and deduplicated.
    pub(crate) fn candidates(&self, region: &IndexBox, ng: IntVect) -> Vec<usize> {
        if region.is_empty() || self.bins.is_empty() {
            return Vec::new();
        }
        let query = region.grow(ng);
        let lo = query.small_end().div_floor(&self.bin_size) - IntVect::splat(1);
        let hi = query.big_end().div_floor(&self.bin_size);
        let nbins: i64 = (0..SPACEDIM)
            .map(|d| i64::from(hi[d] - lo[d] + 1))
            .product();
        let mut out = Vec::new();
        if nbins as usize > self.bins.len() {
            // Query spans more bins than are populated: scan the populated ones.
            for (c, ks) in &self.bins {
                if c.all_ge(&lo) && c.all_le(&hi) {
                    out.extend_from_slice(ks);
                }
            }
        } else {
            for c in IndexBox::new(lo, hi).cells() {
                if let Some(ks) = self.bins.get(&c) {
                    out.extend_from_slice(ks);
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_identity_and_mutation_renews_it() {
        let ba = BoxArray::cell_centered(vec![IndexBox::line(0, 3), IndexBox::line(4, 7)]);
        let mut other = ba.clone();
        assert_eq!(ba.ref_id(), other.ref_id());
        other.set_box(1, IndexBox::line(4, 8)).unwrap();
        assert_ne!(ba.ref_id(), other.ref_id());
        assert_eq!(ba.get(1), Some(IndexBox::line(4, 7)));
    }

    #[test]
    fn equal_contents_are_distinct_identities() {
        let a = BoxArray::cell_centered(vec![IndexBox::line(0, 3)]);
        let b = BoxArray::cell_centered(vec![IndexBox::line(0, 3)]);
        assert_ne!(a.ref_id(), b.ref_id());
    }

    #[test]
    fn chopped_domain_is_disjoint_and_complete() {
        let dom = IndexBox::from_bounds([0, 0, 0], [9, 6, 0]);
        let ba = BoxArray::chopped(&dom, IntVect::new(4, 4, 1), IndexType::cell());
        assert_eq!(ba.len(), 6);
        assert_eq!(ba.num_pts(), dom.num_pts());
        assert!(ba.is_disjoint());
        assert_eq!(ba.minimal_box(), dom);
    }

    #[test]
    fn bins_find_exactly_the_brute_force_set() {
        let dom = IndexBox::from_bounds([0, 0, 0], [31, 23, 0]);
        let ba = BoxArray::chopped(&dom, IntVect::new(8, 5, 1), IndexType::cell());
        let ng = IntVect::new(2, 2, 0);
        let region = IndexBox::from_bounds([7, 4, 0], [17, 11, 0]);
        let brute: Vec<usize> = (0..ba.len())
            .filter(|&k| ba.boxes()[k].grow(ng).intersects(&region))
            .collect();
        assert_eq!(ba.intersecting(&region, ng), brute);
    }

    #[test]
    fn overlapping_boxes_are_not_disjoint() {
        let ba = BoxArray::cell_centered(vec![IndexBox::line(0, 4), IndexBox::line(4, 7)]);
        assert!(!ba.is_disjoint());
    }
}
