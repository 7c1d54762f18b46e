//! Inclusive integer boxes.
//!
//! An [`IndexBox`] is the rectangular set of cells `small..=big` in every
//! direction. Linearization is x-fastest, then y, then z; this order is shared
//! by storage, tile enumeration and the wire format.

use super::int_vect::{IntVect, SPACEDIM};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rectangular region of index space with inclusive bounds.
///
/// A box is empty when `big < small` in any direction. Every operation that can
/// produce an empty box returns one instead of failing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexBox {
    small: IntVect,
    big: IntVect,
}

impl IndexBox {
    pub const fn new(small: IntVect, big: IntVect) -> Self {
        Self { small, big }
    }

    /// Convenience constructor from per-direction `[lo, hi]` arrays.
    pub const fn from_bounds(lo: [i32; SPACEDIM], hi: [i32; SPACEDIM]) -> Self {
        Self::new(IntVect(lo), IntVect(hi))
    }

    /// One-dimensional box `[lo, hi] x [0,0] x [0,0]`.
    pub const fn line(lo: i32, hi: i32) -> Self {
        Self::from_bounds([lo, 0, 0], [hi, 0, 0])
    }

    /// The canonical empty box.
    pub const fn empty() -> Self {
        Self::new(IntVect::splat(0), IntVect::splat(-1))
    }

    #[inline]
    pub fn small_end(&self) -> IntVect {
        self.small
    }

    #[inline]
    pub fn big_end(&self) -> IntVect {
        self.big
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..SPACEDIM).any(|d| self.big[d] < self.small[d])
    }

    /// Number of cells along `dir` (0 for empty extents).
    #[inline]
    pub fn length(&self, dir: usize) -> usize {
        (i64::from(self.big[dir]) - i64::from(self.small[dir]) + 1).max(0) as usize
    }

    pub fn size(&self) -> IntVect {
        IntVect(std::array::from_fn(|d| self.length(d) as i32))
    }

    /// Number of cells; zero for empty boxes.
    pub fn num_pts(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (0..SPACEDIM).map(|d| self.length(d)).product()
        }
    }

    pub fn same_shape(&self, other: &IndexBox) -> bool {
        self.size() == other.size()
    }

    pub fn grow(&self, ng: IntVect) -> Self {
        Self::new(self.small - ng, self.big + ng)
    }

    /// Grow only the low (`high == false`) or high face in direction `dir`.
    pub fn grow_side(&self, dir: usize, amount: i32, high: bool) -> Self {
        let mut b = *self;
        if high {
            b.big[dir] += amount;
        } else {
            b.small[dir] -= amount;
        }
        b
    }

    pub fn shift(&self, v: IntVect) -> Self {
        Self::new(self.small + v, self.big + v)
    }

    pub fn intersection(&self, other: &IndexBox) -> Self {
        Self::new(self.small.elem_max(&other.small), self.big.elem_min(&other.big))
    }

    pub fn intersects(&self, other: &IndexBox) -> bool {
        !self.intersection(other).is_empty()
    }

    pub fn contains_point(&self, p: IntVect) -> bool {
        p.all_ge(&self.small) && p.all_le(&self.big)
    }

    /// True if `other` lies completely inside `self`. The empty box is contained
    /// in everything.
    pub fn contains(&self, other: &IndexBox) -> bool {
        other.is_empty() || (other.small.all_ge(&self.small) && other.big.all_le(&self.big))
    }

    /// Smallest box containing both.
    pub fn bounding(&self, other: &IndexBox) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::new(self.small.elem_min(&other.small), self.big.elem_max(&other.big))
    }

    /// Convert a cell-centered box to the nodes surrounding it in the
    /// directions where `offset` is one.
    pub fn surrounding_nodes(&self, offset: IntVect) -> Self {
        Self::new(self.small, self.big + offset)
    }

    /// Linear offset of `p` within the box, x fastest.
    #[inline]
    pub fn index(&self, p: IntVect) -> usize {
        let nx = self.length(0);
        let ny = self.length(1);
        let i = (p[0] - self.small[0]) as usize;
        let j = (p[1] - self.small[1]) as usize;
        let k = (p[2] - self.small[2]) as usize;
        i + nx * (j + ny * k)
    }

    /// Inverse of [`index`](Self::index).
    #[inline]
    pub fn point_at(&self, mut offset: usize) -> IntVect {
        let nx = self.length(0);
        let ny = self.length(1);
        let i = offset % nx;
        offset /= nx;
        let j = offset % ny;
        let k = offset / ny;
        IntVect::new(
            self.small[0] + i as i32,
            self.small[1] + j as i32,
            self.small[2] + k as i32,
        )
    }

    /// Iterate cells in x-fastest order.
    pub fn cells(&self) -> impl Iterator<Item = IntVect> + '_ {
        let n = self.num_pts();
        (0..n).map(move |o| self.point_at(o))
    }

    /// Iterate the starting cell of every x-row, in linear order.
    pub fn rows(&self) -> impl Iterator<Item = IntVect> + '_ {
        let (lo, hi) = (self.small, self.big);
        let empty = self.is_empty();
        (lo[2]..=hi[2])
            .flat_map(move |k| (lo[1]..=hi[1]).map(move |j| IntVect::new(lo[0], j, k)))
            .filter(move |_| !empty)
    }

    /// `self` minus `other`, as disjoint boxes.
    ///
    /// Slabs are peeled off direction by direction (x first), low side before
    /// high side, so the decomposition is deterministic.
    pub fn difference(&self, other: &IndexBox) -> Vec<IndexBox> {
        if self.is_empty() {
            return Vec::new();
        }
        let isect = self.intersection(other);
        if isect.is_empty() {
            return vec![*self];
        }
        let mut out = Vec::new();
        let mut rest = *self;
        for d in 0..SPACEDIM {
            if rest.small[d] < isect.small[d] {
                let mut slab = rest;
                slab.big[d] = isect.small[d] - 1;
                out.push(slab);
                rest.small[d] = isect.small[d];
            }
            if rest.big[d] > isect.big[d] {
                let mut slab = rest;
                slab.small[d] = isect.big[d] + 1;
                out.push(slab);
                rest.big[d] = isect.big[d];
            }
        }
        out
    }

    /// Cut the box into a grid of tiles.
    ///
    /// Along each direction the box is split into `n = max(1, len / ts)`
    /// pieces whose lengths differ by at most one, the longer pieces first. A
    /// tile size component `<= 0` leaves that direction unsplit. Tiles are
    /// returned x fastest.
    pub fn tiles(&self, tile_size: IntVect) -> Vec<IndexBox> {
        if self.is_empty() {
            return Vec::new();
        }
        let cuts: [Vec<(i32, i32)>; SPACEDIM] = std::array::from_fn(|d| {
            let len = self.length(d) as i32;
            let ts = tile_size[d];
            let n = if ts <= 0 { 1 } else { (len / ts).max(1) };
            let base = len / n;
            let extra = len % n;
            let mut lo = self.small[d];
            (0..n)
                .map(|t| {
                    let l = base + i32::from(t < extra);
                    let seg = (lo, lo + l - 1);
                    lo += l;
                    seg
                })
                .collect()
        });
        let mut out = Vec::with_capacity(cuts.iter().map(Vec::len).product());
        for &(zl, zh) in &cuts[2] {
            for &(yl, yh) in &cuts[1] {
                for &(xl, xh) in &cuts[0] {
                    out.push(IndexBox::from_bounds([xl, yl, zl], [xh, yh, zh]));
                }
            }
        }
        out
    }
}

impl Default for IndexBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for IndexBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.small, self.big)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b2(lo: [i32; 2], hi: [i32; 2]) -> IndexBox {
        IndexBox::from_bounds([lo[0], lo[1], 0], [hi[0], hi[1], 0])
    }

    #[test]
    fn intersection_and_emptiness() {
        let a = b2([0, 0], [7, 7]);
        let b = b2([4, 6], [12, 9]);
        assert_eq!(a.intersection(&b), b2([4, 6], [7, 7]));
        assert!(a.intersection(&b2([8, 0], [9, 9])).is_empty());
        assert_eq!(IndexBox::empty().num_pts(), 0);
    }

    #[test]
    fn corners_combine_per_direction() {
        let a = b2([0, 5], [9, 9]);
        let b = b2([5, 0], [12, 7]);
        assert_eq!(a.intersection(&b), b2([5, 5], [9, 7]));
        assert_eq!(a.bounding(&b), b2([0, 0], [12, 9]));
    }

    #[test]
    fn difference_covers_exactly() {
        let outer = b2([-2, -2], [9, 9]);
        let inner = b2([0, 0], [7, 7]);
        let pieces = outer.difference(&inner);
        let total: usize = pieces.iter().map(IndexBox::num_pts).sum();
        assert_eq!(total, outer.num_pts() - inner.num_pts());
        for (i, a) in pieces.iter().enumerate() {
            assert!(!a.intersects(&inner));
            for b in &pieces[i + 1..] {
                assert!(!a.intersects(b));
            }
        }
    }

    #[test]
    fn index_round_trips_point_at() {
        let bx = IndexBox::from_bounds([-1, 2, 3], [2, 4, 5]);
        for (o, p) in bx.cells().enumerate() {
            assert_eq!(bx.index(p), o);
        }
        assert_eq!(bx.point_at(1), IntVect::new(0, 2, 3));
    }

    #[test]
    fn tiles_balance_lengths() {
        let bx = IndexBox::line(0, 9);
        let tiles = bx.tiles(IntVect::new(4, 0, 0));
        assert_eq!(tiles, vec![IndexBox::line(0, 4), IndexBox::line(5, 9)]);
        let small = IndexBox::line(0, 2);
        assert_eq!(small.tiles(IntVect::new(8, 8, 8)), vec![small]);
    }

    #[test]
    fn rows_skip_empty_boxes() {
        assert_eq!(IndexBox::empty().rows().count(), 0);
        assert_eq!(b2([0, 0], [3, 2]).rows().count(), 3);
    }
}
