//! FabArray: the fabs a rank owns for one decomposition, plus the collective
//! operations built on communication metadata.

use super::cell_op::CopyOp;
use super::element::Element;
use super::fab::{Fab, RawFab};
use crate::algs::communicator::Communicator;
use crate::algs::exchange::ExchangeRequest;
use crate::algs::metadata::{HaloFillFlags, ParallelCopyFlags};
use crate::algs::tiling::Tile;
use crate::cache::CommContext;
use crate::exchange_error::FabExchangeError;
use crate::exec;
use crate::geometry::{IndexBox, IntVect, Periodicity};
use crate::layout::DomainDecomposition;
use std::marker::PhantomData;

/// Distributed multi-component array: one [`Fab`] per local box, each grown
/// by `n_grow` halo cells.
#[derive(Clone, Debug)]
pub struct FabArray<T> {
    decomp: DomainDecomposition,
    ncomp: usize,
    n_grow: IntVect,
    n_grow_filled: IntVect,
    fabs: Vec<Fab<T>>,
}

impl<T: Element> FabArray<T> {
    /// Zero-filled array over the local boxes of `decomp`.
    pub fn new(
        decomp: DomainDecomposition,
        ncomp: usize,
        n_grow: IntVect,
    ) -> Result<Self, FabExchangeError> {
        if !n_grow.all_ge(&IntVect::zero()) {
            return Err(FabExchangeError::InvalidHalo(n_grow));
        }
        let boxes = decomp.box_array().boxes();
        let fabs = decomp
            .local_indices()
            .iter()
            .map(|&k| Fab::new(boxes[k].grow(n_grow), ncomp))
            .collect();
        Ok(Self {
            decomp,
            ncomp,
            n_grow,
            n_grow_filled: IntVect::zero(),
            fabs,
        })
    }

    pub fn decomposition(&self) -> &DomainDecomposition {
        &self.decomp
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn n_grow(&self) -> IntVect {
        self.n_grow
    }

    /// Halo width known to hold up-to-date values.
    pub fn n_grow_filled(&self) -> IntVect {
        self.n_grow_filled
    }

    /// Valid box of global index `k`.
    pub fn box_at(&self, k: usize) -> Result<IndexBox, FabExchangeError> {
        self.decomp.box_at(k)
    }

    pub(crate) fn local_pos(&self, k: usize) -> Result<usize, FabExchangeError> {
        self.decomp
            .local_index(k)
            .ok_or(FabExchangeError::NotLocal {
                index: k,
                rank: self.decomp.my_rank(),
            })
    }

    /// Fab of global index `k`; `NotLocal` if another rank owns it.
    pub fn fab(&self, k: usize) -> Result<&Fab<T>, FabExchangeError> {
        let pos = self.local_pos(k)?;
        Ok(&self.fabs[pos])
    }

    pub fn fab_mut(&mut self, k: usize) -> Result<&mut Fab<T>, FabExchangeError> {
        let pos = self.local_pos(k)?;
        Ok(&mut self.fabs[pos])
    }

    /// Local fabs in ascending global index order.
    pub fn fabs(&self) -> &[Fab<T>] {
        &self.fabs
    }

    pub(crate) fn fabs_mut(&mut self) -> &mut [Fab<T>] {
        &mut self.fabs
    }

    /// `(global index, fab)` pairs of this rank.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Fab<T>)> {
        self.decomp.local_indices().iter().copied().zip(&self.fabs)
    }

    /// Set every cell, halo included.
    pub fn set_val(&mut self, v: T) {
        for f in &mut self.fabs {
            f.fill(v);
        }
    }

    /// Sum of component `c` over the valid cells of this rank.
    pub fn sum_valid(&self, c: usize) -> Result<T, FabExchangeError> {
        let mut total = T::zero();
        for (k, fab) in self.iter() {
            let valid = self.box_at(k)?;
            fab.check(&valid, c, 1)?;
            for p in valid.cells() {
                if let Some(v) = fab.get(p, c) {
                    total += v;
                }
            }
        }
        Ok(total)
    }

    /// Fill the whole halo from the valid cells of neighbours and periodic images.
    pub fn fill_boundary<C: Communicator>(
        &mut self,
        ctx: &mut CommContext,
        comm: &C,
        period: &Periodicity,
    ) -> Result<(), FabExchangeError> {
        self.fill_boundary_with(
            ctx,
            comm,
            0,
            self.ncomp,
            self.n_grow,
            period,
            HaloFillFlags::default(),
        )
    }

    /// Fill components `[scomp, scomp + ncomp)` of a halo of width `halo`.
    #[allow(clippy::too_many_arguments)]
    pub fn fill_boundary_with<C: Communicator>(
        &mut self,
        ctx: &mut CommContext,
        comm: &C,
        scomp: usize,
        ncomp: usize,
        halo: IntVect,
        period: &Periodicity,
        flags: HaloFillFlags,
    ) -> Result<(), FabExchangeError> {
        let md = ctx.request_halo_fill(&self.decomp, halo, period, flags)?;
        ctx.execute_halo_fill(self, &md, scomp, ncomp, comm)?;
        if !flags.cross && !flags.enforce_periodicity_only {
            self.n_grow_filled = halo;
        }
        Ok(())
    }

    /// Overwrite this array with `src` wherever their valid boxes overlap.
    pub fn parallel_copy<C: Communicator>(
        &mut self,
        ctx: &mut CommContext,
        comm: &C,
        src: &FabArray<T>,
        period: &Periodicity,
    ) -> Result<(), FabExchangeError> {
        let spec = CopySpec::all(self.ncomp.min(src.ncomp), CopyOp::Overwrite);
        self.parallel_copy_with(ctx, comm, src, period, spec)
    }

    /// Add `src` into this array wherever their valid boxes overlap.
    pub fn parallel_add<C: Communicator>(
        &mut self,
        ctx: &mut CommContext,
        comm: &C,
        src: &FabArray<T>,
        period: &Periodicity,
    ) -> Result<(), FabExchangeError> {
        let spec = CopySpec::all(self.ncomp.min(src.ncomp), CopyOp::Accumulate);
        self.parallel_copy_with(ctx, comm, src, period, spec)
    }

    pub fn parallel_copy_with<C: Communicator>(
        &mut self,
        ctx: &mut CommContext,
        comm: &C,
        src: &FabArray<T>,
        period: &Periodicity,
        spec: CopySpec,
    ) -> Result<(), FabExchangeError> {
        let md = ctx.request_parallel_copy(
            &src.decomp,
            spec.src_halo,
            &self.decomp,
            spec.dst_halo,
            period,
            spec.flags,
        )?;
        let req = ExchangeRequest::new(spec.scomp, spec.dcomp, spec.ncomp, spec.op);
        ctx.execute_parallel_copy(self, src, &md, req, comm)?;
        self.n_grow_filled = self.n_grow_filled.elem_min(&spec.dst_halo);
        Ok(())
    }

    /// Add every halo value back into the valid cell it images, across boxes,
    /// ranks and periodic boundaries. Halo contents are stale afterwards.
    pub fn sum_boundary<C: Communicator>(
        &mut self,
        ctx: &mut CommContext,
        comm: &C,
        period: &Periodicity,
    ) -> Result<(), FabExchangeError> {
        let snapshot = self.clone();
        self.set_val(T::zero());
        let spec = CopySpec {
            src_halo: self.n_grow,
            ..CopySpec::all(self.ncomp, CopyOp::Accumulate)
        };
        self.parallel_copy_with(ctx, comm, &snapshot, period, spec)?;
        self.n_grow_filled = IntVect::zero();
        Ok(())
    }

    /// Set every cell the halo fill of width `halo` would write to `v`.
    pub fn set_halo_value(
        &mut self,
        ctx: &mut CommContext,
        v: T,
        halo: IntVect,
        period: &Periodicity,
        flags: HaloFillFlags,
    ) -> Result<(), FabExchangeError> {
        let md = ctx.request_halo_fill(&self.decomp, halo, period, flags)?;
        let ncomp = self.ncomp;
        for t in md.local_tags().iter().chain(md.recv_tags().values().flatten()) {
            self.fab_mut(t.dst_index)?.fill_region(&t.dbox, 0, ncomp, v)?;
        }
        Ok(())
    }

    /// Call `f` on every tile of the local valid boxes, in parallel when
    /// available. Tiles use the context's configured tile size.
    pub fn for_each_tile<F>(&self, ctx: &mut CommContext, f: F)
    where
        F: Fn(Tile, &Fab<T>) + Send + Sync,
    {
        let tile_size = ctx.config().tile_size;
        let tiles = ctx.request_tiling(&self.decomp, tile_size).to_vec();
        exec::for_each_ref(&tiles, |tile| f(*tile, &self.fabs[tile.local_index]));
    }

    /// Like [`for_each_tile`](Self::for_each_tile), with write access to the
    /// cells of the current tile.
    pub fn for_each_tile_mut<F>(&mut self, ctx: &mut CommContext, f: F)
    where
        F: Fn(Tile, TileMut<'_, T>) + Send + Sync,
    {
        let tile_size = ctx.config().tile_size;
        let tiles = ctx.request_tiling(&self.decomp, tile_size).to_vec();
        let raws: Vec<RawFab<T>> = self.fabs.iter_mut().map(Fab::raw).collect();
        exec::for_each_ref(&tiles, |tile| {
            f(
                *tile,
                TileMut {
                    raw: raws[tile.local_index],
                    tile: tile.bx,
                    _fab: PhantomData,
                },
            )
        });
    }
}

/// Parameters of [`FabArray::parallel_copy_with`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CopySpec {
    pub scomp: usize,
    pub dcomp: usize,
    pub ncomp: usize,
    pub src_halo: IntVect,
    pub dst_halo: IntVect,
    pub op: CopyOp,
    pub flags: ParallelCopyFlags,
}

impl CopySpec {
    /// Components `[0, ncomp)`, valid regions only.
    pub fn all(ncomp: usize, op: CopyOp) -> Self {
        Self {
            scomp: 0,
            dcomp: 0,
            ncomp,
            src_halo: IntVect::zero(),
            dst_halo: IntVect::zero(),
            op,
            flags: ParallelCopyFlags::default(),
        }
    }
}

/// Write access to the cells of one tile. Tiles of one pass are disjoint.
pub struct TileMut<'a, T> {
    raw: RawFab<T>,
    tile: IndexBox,
    _fab: PhantomData<&'a mut Fab<T>>,
}

impl<T: Element> TileMut<'_, T> {
    pub fn tile_box(&self) -> IndexBox {
        self.tile
    }

    pub fn get(&self, p: IntVect, c: usize) -> Option<T> {
        if c < self.raw.ncomp() && self.tile.contains_point(p) {
            // SAFETY: in bounds, and only this tile touches its cells.
            Some(unsafe { *self.raw.cell(p, c) })
        } else {
            None
        }
    }

    pub fn set(&mut self, p: IntVect, c: usize, v: T) -> Result<(), FabExchangeError> {
        if c >= self.raw.ncomp() {
            return Err(FabExchangeError::ComponentRange {
                start: c,
                count: 1,
                ncomp: self.raw.ncomp(),
            });
        }
        if !self.tile.contains_point(p) {
            return Err(FabExchangeError::RegionOutOfBounds {
                region: IndexBox::new(p, p),
                storage: self.tile,
            });
        }
        // SAFETY: as in `get`.
        unsafe { *self.raw.cell(p, c) = v };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;
    use crate::layout::{BoxArray, DistributionMapping};

    #[test]
    fn only_local_fabs_are_allocated() {
        let ba = BoxArray::cell_centered(vec![
            IndexBox::line(0, 3),
            IndexBox::line(4, 7),
            IndexBox::line(8, 11),
        ]);
        let dd = DomainDecomposition::new(ba, DistributionMapping::round_robin(3, 2), 1).unwrap();
        let fa = FabArray::<f32>::new(dd, 1, IntVect::new(2, 0, 0)).unwrap();
        assert_eq!(fa.fabs().len(), 1);
        assert_eq!(fa.fab(1).unwrap().fab_box(), IndexBox::line(2, 9));
        assert!(matches!(fa.fab(0), Err(FabExchangeError::NotLocal { index: 0, rank: 1 })));
    }

    #[test]
    fn negative_growth_is_rejected() {
        let dd = DomainDecomposition::serial(BoxArray::cell_centered(vec![IndexBox::line(0, 3)]));
        assert!(matches!(
            FabArray::<f64>::new(dd, 1, IntVect::new(-1, 0, 0)),
            Err(FabExchangeError::InvalidHalo(_))
        ));
    }

    #[test]
    fn halo_value_marks_only_fillable_cells() {
        let dd = DomainDecomposition::serial(BoxArray::cell_centered(vec![
            IndexBox::line(0, 7),
            IndexBox::line(8, 15),
        ]));
        let mut fa = FabArray::<i32>::new(dd, 2, IntVect::new(1, 0, 0)).unwrap();
        let mut ctx = CommContext::default();
        fa.set_halo_value(
            &mut ctx,
            7,
            IntVect::new(1, 0, 0),
            &Periodicity::non_periodic(),
            HaloFillFlags::default(),
        )
        .unwrap();
        let at = |k: usize, x: i32, c: usize| fa.fab(k).unwrap().get(IntVect::new(x, 0, 0), c);
        assert_eq!((at(0, 8, 0), at(0, 8, 1)), (Some(7), Some(7)));
        assert_eq!(at(1, 7, 1), Some(7));
        assert_eq!(at(0, -1, 0), Some(0));
        assert_eq!(at(1, 16, 0), Some(0));
        assert_eq!(at(0, 7, 0), Some(0));
    }

    #[test]
    fn tiles_write_their_own_cells() {
        let dd = DomainDecomposition::serial(BoxArray::cell_centered(vec![
            IndexBox::from_bounds([0, 0, 0], [15, 15, 0]),
        ]));
        let mut fa = FabArray::<i64>::new(dd, 1, IntVect::new(1, 1, 0)).unwrap();
        let mut ctx = CommContext::new(ExchangeConfig {
            tile_size: IntVect::new(8, 8, 0),
            ..ExchangeConfig::default()
        });
        fa.for_each_tile_mut(&mut ctx, |tile, mut view| {
            for p in tile.bx.cells() {
                view.set(p, 0, tile.tile_index as i64 + 1).unwrap();
            }
            assert!(view.set(tile.bx.big_end() + IntVect::new(20, 0, 0), 0, 0).is_err());
        });
        let fab = fa.fab(0).unwrap();
        assert_eq!(fab.get(IntVect::new(0, 0, 0), 0), Some(1));
        assert_eq!(fab.get(IntVect::new(15, 15, 0), 0), Some(4));
        assert_eq!(fab.get(IntVect::new(-1, 0, 0), 0), Some(0));
        assert_eq!(fa.sum_valid(0).unwrap(), 64 * (1 + 2 + 3 + 4));
    }
}
