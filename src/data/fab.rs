//! Fab: multi-component data on one (grown) box.
//!
//! Component `c` occupies one contiguous plane of `bx.num_pts()` elements; a
//! plane is linearized x fastest. All region operations work row by row along x.

use super::cell_op::{AddCell, CellOp, CopyCell};
use super::element::Element;
use super::storage::{Storage, VecStorage};
use crate::exchange_error::FabExchangeError;
use crate::exec::SendPtr;
use crate::geometry::{IndexBox, IntVect};

/// Dense array of `ncomp` components over `bx`.
#[derive(Clone, Debug)]
pub struct Fab<T> {
    bx: IndexBox,
    ncomp: usize,
    data: VecStorage<T>,
}

impl<T: Element> Fab<T> {
    /// Zero-filled fab.
    pub fn new(bx: IndexBox, ncomp: usize) -> Self {
        Self::filled(bx, ncomp, T::zero())
    }

    pub fn filled(bx: IndexBox, ncomp: usize, v: T) -> Self {
        Self {
            bx,
            ncomp,
            data: VecStorage::with_len(bx.num_pts() * ncomp, v),
        }
    }

    /// The box this fab covers, halo included.
    pub fn fab_box(&self) -> IndexBox {
        self.bx
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn as_slice(&self) -> &[T] {
        self.data.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.data.as_mut_slice()
    }

    /// Plane of component `c`.
    pub fn comp(&self, c: usize) -> Result<&[T], FabExchangeError> {
        self.check_comps(c, 1)?;
        let n = self.bx.num_pts();
        self.data.slice_at(c * n, n)
    }

    #[inline]
    pub(crate) fn offset(&self, p: IntVect, c: usize) -> usize {
        c * self.bx.num_pts() + self.bx.index(p)
    }

    pub fn get(&self, p: IntVect, c: usize) -> Option<T> {
        if c < self.ncomp && self.bx.contains_point(p) {
            Some(self.as_slice()[self.offset(p, c)])
        } else {
            None
        }
    }

    pub fn set(&mut self, p: IntVect, c: usize, v: T) -> Result<(), FabExchangeError> {
        self.check(&IndexBox::new(p, p), c, 1)?;
        let off = self.offset(p, c);
        self.as_mut_slice()[off] = v;
        Ok(())
    }

    pub fn fill(&mut self, v: T) {
        self.as_mut_slice().fill(v);
    }

    /// Set components `[dcomp, dcomp + ncomp)` of `region` to `v`.
    pub fn fill_region(
        &mut self,
        region: &IndexBox,
        dcomp: usize,
        ncomp: usize,
        v: T,
    ) -> Result<(), FabExchangeError> {
        self.check(region, dcomp, ncomp)?;
        let nx = region.length(0);
        for c in dcomp..dcomp + ncomp {
            for row in region.rows() {
                let o = self.offset(row, c);
                self.as_mut_slice()[o..o + nx].fill(v);
            }
        }
        Ok(())
    }

    fn check_comps(&self, start: usize, count: usize) -> Result<(), FabExchangeError> {
        if start.checked_add(count).is_some_and(|end| end <= self.ncomp) {
            Ok(())
        } else {
            Err(FabExchangeError::ComponentRange {
                start,
                count,
                ncomp: self.ncomp,
            })
        }
    }

    /// `region` lies in the fab and the components exist.
    pub(crate) fn check(
        &self,
        region: &IndexBox,
        comp: usize,
        ncomp: usize,
    ) -> Result<(), FabExchangeError> {
        self.check_comps(comp, ncomp)?;
        if region.is_empty() || self.bx.contains(region) {
            Ok(())
        } else {
            Err(FabExchangeError::RegionOutOfBounds {
                region: *region,
                storage: self.bx,
            })
        }
    }

    /// Merge `sbox` of `src` into `dbox` of `self` with rule `O`.
    pub fn apply_region<O: CellOp>(
        &mut self,
        dbox: &IndexBox,
        src: &Fab<T>,
        sbox: &IndexBox,
        scomp: usize,
        dcomp: usize,
        ncomp: usize,
    ) -> Result<(), FabExchangeError> {
        if !dbox.same_shape(sbox) {
            return Err(FabExchangeError::ShapeMismatch {
                dbox: *dbox,
                sbox: *sbox,
            });
        }
        self.check(dbox, dcomp, ncomp)?;
        src.check(sbox, scomp, ncomp)?;
        let nx = dbox.length(0);
        let shift = sbox.small_end() - dbox.small_end();
        for c in 0..ncomp {
            for row in dbox.rows() {
                let so = src.offset(row + shift, scomp + c);
                let d0 = self.offset(row, dcomp + c);
                let s = &src.as_slice()[so..so + nx];
                let d = &mut self.as_mut_slice()[d0..d0 + nx];
                for (a, &b) in d.iter_mut().zip(s) {
                    O::apply(a, b);
                }
            }
        }
        Ok(())
    }

    /// Overwrite `dbox` with `sbox` of `src`.
    pub fn copy_region(
        &mut self,
        dbox: &IndexBox,
        src: &Fab<T>,
        sbox: &IndexBox,
        scomp: usize,
        dcomp: usize,
        ncomp: usize,
    ) -> Result<(), FabExchangeError> {
        self.apply_region::<CopyCell>(dbox, src, sbox, scomp, dcomp, ncomp)
    }

    /// Add `sbox` of `src` into `dbox`.
    pub fn add_region(
        &mut self,
        dbox: &IndexBox,
        src: &Fab<T>,
        sbox: &IndexBox,
        scomp: usize,
        dcomp: usize,
        ncomp: usize,
    ) -> Result<(), FabExchangeError> {
        self.apply_region::<AddCell>(dbox, src, sbox, scomp, dcomp, ncomp)
    }

    /// Write `ncomp` planes of `sbox` into `out`, x fastest.
    pub fn pack_region(
        &self,
        sbox: &IndexBox,
        scomp: usize,
        ncomp: usize,
        out: &mut [T],
    ) -> Result<(), FabExchangeError> {
        self.check(sbox, scomp, ncomp)?;
        let expected = sbox.num_pts() * ncomp;
        if out.len() != expected {
            return Err(FabExchangeError::BufferSliceMismatch {
                offset: 0,
                len: out.len(),
            });
        }
        let nx = sbox.length(0);
        let mut k = 0;
        for c in scomp..scomp + ncomp {
            for row in sbox.rows() {
                let o = self.offset(row, c);
                out[k..k + nx].copy_from_slice(&self.as_slice()[o..o + nx]);
                k += nx;
            }
        }
        Ok(())
    }

    /// Merge `ncomp` planes laid out as by [`pack_region`](Self::pack_region)
    /// into `dbox` with rule `O`.
    pub fn unpack_region<O: CellOp>(
        &mut self,
        dbox: &IndexBox,
        dcomp: usize,
        ncomp: usize,
        input: &[T],
    ) -> Result<(), FabExchangeError> {
        self.check(dbox, dcomp, ncomp)?;
        if input.len() != dbox.num_pts() * ncomp {
            return Err(FabExchangeError::BufferSliceMismatch {
                offset: 0,
                len: input.len(),
            });
        }
        let nx = dbox.length(0);
        let mut k = 0;
        for c in dcomp..dcomp + ncomp {
            for row in dbox.rows() {
                let o = self.offset(row, c);
                let d = &mut self.as_mut_slice()[o..o + nx];
                for (a, &b) in d.iter_mut().zip(&input[k..k + nx]) {
                    O::apply(a, b);
                }
                k += nx;
            }
        }
        Ok(())
    }

    /// Unchecked view for code that partitions writes among threads itself.
    pub(crate) fn raw(&mut self) -> RawFab<T> {
        RawFab {
            ptr: SendPtr::new(self.data.as_mut_slice().as_mut_ptr()),
            bx: self.bx,
            ncomp: self.ncomp,
        }
    }
}

/// Pointer view of a fab's data. Copyable across threads; every dereference
/// is the caller's promise that writes are disjoint, atomic or locked.
#[derive(Copy, Clone, Debug)]
pub(crate) struct RawFab<T> {
    ptr: SendPtr<T>,
    bx: IndexBox,
    ncomp: usize,
}

impl<T> RawFab<T> {
    pub(crate) fn fab_box(&self) -> IndexBox {
        self.bx
    }

    pub(crate) fn ncomp(&self) -> usize {
        self.ncomp
    }

    /// # Safety
    /// `p` must lie in the fab box and `c < ncomp`; the fab must outlive the use.
    #[inline]
    pub(crate) unsafe fn cell(&self, p: IntVect, c: usize) -> *mut T {
        let off = c * self.bx.num_pts() + self.bx.index(p);
        unsafe { self.ptr.get().add(off) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(bx: IndexBox, ncomp: usize) -> Fab<f64> {
        let mut f = Fab::new(bx, ncomp);
        for (i, v) in f.as_mut_slice().iter_mut().enumerate() {
            *v = i as f64;
        }
        f
    }

    #[test]
    fn pack_then_unpack_moves_region() {
        let src = ramp(IndexBox::from_bounds([0, 0, 0], [3, 3, 0]), 2);
        let sbox = IndexBox::from_bounds([1, 1, 0], [2, 3, 0]);
        let mut buf = vec![0.0; sbox.num_pts() * 2];
        src.pack_region(&sbox, 0, 2, &mut buf).unwrap();

        let mut dst = Fab::<f64>::new(IndexBox::from_bounds([10, 0, 0], [13, 3, 0]), 2);
        let dbox = sbox.shift(IntVect::new(10, 0, 0));
        dst.unpack_region::<CopyCell>(&dbox, 0, 2, &buf).unwrap();
        for c in 0..2 {
            for p in sbox.cells() {
                assert_eq!(dst.get(p + IntVect::new(10, 0, 0), c), src.get(p, c));
            }
        }
        assert_eq!(dst.get(IntVect::new(10, 0, 0), 0), Some(0.0));
    }

    #[test]
    fn add_region_accumulates() {
        let bx = IndexBox::line(0, 3);
        let src = Fab::filled(bx, 1, 2.0f64);
        let mut dst = Fab::filled(bx, 1, 1.0f64);
        dst.add_region(&IndexBox::line(1, 2), &src, &IndexBox::line(0, 1), 0, 0, 1)
            .unwrap();
        assert_eq!(dst.as_slice(), &[1.0, 3.0, 3.0, 1.0]);
    }

    #[test]
    fn out_of_bounds_region_is_rejected() {
        let mut f = Fab::<i32>::new(IndexBox::line(0, 3), 1);
        let err = f.fill_region(&IndexBox::line(2, 5), 0, 1, 1).unwrap_err();
        assert!(matches!(err, FabExchangeError::RegionOutOfBounds { .. }));
        let err = f.fill_region(&IndexBox::line(0, 1), 0, 2, 1).unwrap_err();
        assert!(matches!(
            err,
            FabExchangeError::ComponentRange { start: 0, count: 2, ncomp: 1 }
        ));
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let src = Fab::filled(IndexBox::line(0, 7), 1, 1i32);
        let mut dst = Fab::<i32>::new(IndexBox::line(0, 7), 1);
        let err = dst
            .copy_region(&IndexBox::line(0, 3), &src, &IndexBox::line(0, 2), 0, 0, 1)
            .unwrap_err();
        assert!(matches!(err, FabExchangeError::ShapeMismatch { .. }));
    }
}
