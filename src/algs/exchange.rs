//! Buffer exchange: run a [`CommMetadata`] pattern against fab arrays.
//!
//! One exchange round proceeds in a fixed order:
//! 1. post every receive (lengths follow from the receive tags);
//! 2. pack every outgoing message in tag order and send it;
//! 3. apply the local tags;
//! 4. wait for each receive, check its length and unpack it;
//! 5. drain every send handle.
//!
//! Errors after step 1 do not stop the round: all handles are still waited
//! on and the first error is returned at the end.

use crate::algs::communicator::{CommTag, Communicator, HALO_FILL_TAG, PARALLEL_COPY_TAG, Wait};
use crate::algs::copy_tag::CopyComTag;
use crate::algs::metadata::{CommMetadata, PatternKey};
use crate::algs::wire;
use crate::config::ExchangeConfig;
use crate::data::cell_op::{AddCell, CellOp, CopyCell, CopyOp};
use crate::data::comm_buffer::{CommBuffer, MemUsage};
use crate::data::element::Element;
use crate::data::fab::{Fab, RawFab};
use crate::data::fab_array::FabArray;
use crate::exchange_error::FabExchangeError;
use crate::exec::{self, CellLockMask, ExecBackend};
use crate::geometry::IntVect;
use std::mem::size_of;

/// Components and write rule of one exchange.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub scomp: usize,
    pub dcomp: usize,
    pub ncomp: usize,
    pub op: CopyOp,
}

impl ExchangeRequest {
    pub fn new(scomp: usize, dcomp: usize, ncomp: usize, op: CopyOp) -> Self {
        Self {
            scomp,
            dcomp,
            ncomp,
            op,
        }
    }

    /// Overwrite components `[0, ncomp)` with the same components of the source.
    pub fn all(ncomp: usize) -> Self {
        Self::new(0, 0, ncomp, CopyOp::Overwrite)
    }

    fn round(&self, offset: usize, ncomp: usize) -> Self {
        Self {
            scomp: self.scomp + offset,
            dcomp: self.dcomp + offset,
            ncomp,
            op: self.op,
        }
    }
}

/// Fill the halo of `fa` with a halo-fill pattern built for its decomposition.
pub fn execute_halo_fill<T, C>(
    fa: &mut FabArray<T>,
    md: &CommMetadata,
    scomp: usize,
    ncomp: usize,
    comm: &C,
    config: &ExchangeConfig,
    mem: &MemUsage,
) -> Result<(), FabExchangeError>
where
    T: Element,
    C: Communicator,
{
    let req = ExchangeRequest::new(scomp, scomp, ncomp, CopyOp::Overwrite);
    execute(fa, None, md, req, comm, HALO_FILL_TAG, config, mem)
}

/// Copy (or add) `src` into `dst` with a parallel-copy pattern.
pub fn execute_parallel_copy<T, C>(
    dst: &mut FabArray<T>,
    src: &FabArray<T>,
    md: &CommMetadata,
    req: ExchangeRequest,
    comm: &C,
    config: &ExchangeConfig,
    mem: &MemUsage,
) -> Result<(), FabExchangeError>
where
    T: Element,
    C: Communicator,
{
    execute(dst, Some(src), md, req, comm, PARALLEL_COPY_TAG, config, mem)
}

/// Run `md` from `src` (or from `dst` itself when `None`) into `dst`.
///
/// Component ranges wider than `config.max_comp` run as several rounds with
/// consecutive tags starting at `tag`.
#[allow(clippy::too_many_arguments)]
pub fn execute<T, C>(
    dst: &mut FabArray<T>,
    src: Option<&FabArray<T>>,
    md: &CommMetadata,
    req: ExchangeRequest,
    comm: &C,
    tag: CommTag,
    config: &ExchangeConfig,
    mem: &MemUsage,
) -> Result<(), FabExchangeError>
where
    T: Element,
    C: Communicator,
{
    check_setup(dst, src, md, &req, comm, config)?;
    if req.ncomp == 0 || md.is_empty() {
        return Ok(());
    }
    for (round, (offset, ncomp)) in config.component_rounds(req.ncomp).into_iter().enumerate() {
        let r = req.round(offset, ncomp);
        let round_tag = tag.offset(round as u16);
        log::debug!(
            "rank {}: exchange round {} (tag {:#x}) comps {}..{} -> {}..{}, \
             {} local tags, {} sends, {} receives",
            md.my_rank(),
            round,
            round_tag.as_u16(),
            r.scomp,
            r.scomp + r.ncomp,
            r.dcomp,
            r.dcomp + r.ncomp,
            md.local_tags().len(),
            md.send_tags().len(),
            md.recv_tags().len(),
        );
        exchange_round(dst, src, md, &r, comm, round_tag, config, mem)?;
    }
    Ok(())
}

fn check_setup<T, C>(
    dst: &FabArray<T>,
    src: Option<&FabArray<T>>,
    md: &CommMetadata,
    req: &ExchangeRequest,
    comm: &C,
    config: &ExchangeConfig,
) -> Result<(), FabExchangeError>
where
    T: Element,
    C: Communicator,
{
    let dd = dst.decomposition();
    let src_arr = src.unwrap_or(dst);
    if md.key().dst_key() != dd.bd_key() || md.my_rank() != dd.my_rank() {
        return Err(FabExchangeError::DecompositionMismatch { role: "destination" });
    }
    if md.key().src_key() != src_arr.decomposition().bd_key() {
        return Err(FabExchangeError::DecompositionMismatch { role: "source" });
    }
    let has_remote = !md.send_tags().is_empty() || !md.recv_tags().is_empty();
    if has_remote && comm.rank() != md.my_rank() {
        return Err(FabExchangeError::DecompositionMismatch { role: "communicator" });
    }
    if let Some(&peer) = md
        .send_tags()
        .keys()
        .chain(md.recv_tags().keys())
        .find(|&&p| p >= comm.size())
    {
        return Err(FabExchangeError::InvalidRank {
            rank: peer,
            nranks: comm.size(),
        });
    }
    check_comps(req.scomp, req.ncomp, src_arr.ncomp())?;
    check_comps(req.dcomp, req.ncomp, dst.ncomp())?;

    let (dst_halo, src_halo) = match md.key() {
        PatternKey::HaloFill(k) => (k.halo, IntVect::zero()),
        PatternKey::ParallelCopy(k) => (k.dst_halo, k.src_halo),
    };
    if !dst_halo.all_le(&dst.n_grow()) {
        return Err(FabExchangeError::InvalidHalo(dst_halo));
    }
    if !src_halo.all_le(&src_arr.n_grow()) {
        return Err(FabExchangeError::InvalidHalo(src_halo));
    }

    if config.backend == ExecBackend::Device && !config.allow_cell_locks {
        let needs_locks = |tags_present: bool, threadsafe: bool| {
            tags_present && !threadsafe && !req.op.is_atomic_for::<T>()
        };
        if needs_locks(!md.local_tags().is_empty(), md.threadsafe_loc())
            || needs_locks(!md.recv_tags().is_empty(), md.threadsafe_rcv())
        {
            return Err(FabExchangeError::UnsupportedCombination(format!(
                "{:?} of overlapping regions on the device backend needs per-cell locks, \
                 which are disabled",
                req.op
            )));
        }
    }
    Ok(())
}

fn check_comps(start: usize, count: usize, ncomp: usize) -> Result<(), FabExchangeError> {
    if start.checked_add(count).is_some_and(|end| end <= ncomp) {
        Ok(())
    } else {
        Err(FabExchangeError::ComponentRange {
            start,
            count,
            ncomp,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn exchange_round<T, C>(
    dst: &mut FabArray<T>,
    src: Option<&FabArray<T>>,
    md: &CommMetadata,
    r: &ExchangeRequest,
    comm: &C,
    tag: CommTag,
    config: &ExchangeConfig,
    mem: &MemUsage,
) -> Result<(), FabExchangeError>
where
    T: Element,
    C: Communicator,
{
    let mut recvs = Vec::with_capacity(md.recv_tags().len());
    for (&peer, tags) in md.recv_tags() {
        let nelem = wire::message_elems(tags, r.ncomp);
        log::trace!("rank {}: irecv {} elements from {}", md.my_rank(), nelem, peer);
        recvs.push((peer, nelem, comm.irecv(peer, tag.as_u16(), nelem * size_of::<T>())));
    }

    let mut sends = Vec::with_capacity(md.send_tags().len());
    let mut maybe_err =
        post_sends(src.unwrap_or(dst), md, r, comm, tag, config, mem, &mut sends).err();

    if maybe_err.is_none() {
        let local = md.local_tags();
        let res = match src {
            Some(s) => apply(dst, local, &TagSource::Fabs(s), r, md.threadsafe_loc(), config),
            None => stage_local(dst, local, r, md.threadsafe_loc(), config, mem),
        };
        maybe_err = res.err();
    }

    for (peer, nelem, handle) in recvs {
        match handle.wait() {
            Some(raw) if maybe_err.is_none() => {
                let alloc = CommBuffer::<T>::alloc(nelem, config.buffer_memory, mem);
                let res = alloc.and_then(|mut buf| {
                    wire::copy_message_into(peer, &raw, buf.as_mut_slice())?;
                    let tags = md.recv_tags_for(peer)?;
                    let source = TagSource::Buffer {
                        data: buf.as_slice(),
                        offsets: wire::block_offsets(tags, r.ncomp),
                    };
                    apply(dst, tags, &source, r, md.threadsafe_rcv(), config)
                });
                maybe_err = res.err();
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(FabExchangeError::comm(
                    peer,
                    format!("failed to receive {nelem} elements from rank {peer}"),
                ));
            }
            _ => {}
        }
    }

    for send in sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[allow(clippy::too_many_arguments)]
fn post_sends<T, C>(
    source: &FabArray<T>,
    md: &CommMetadata,
    r: &ExchangeRequest,
    comm: &C,
    tag: CommTag,
    config: &ExchangeConfig,
    mem: &MemUsage,
    sends: &mut Vec<C::SendHandle>,
) -> Result<(), FabExchangeError>
where
    T: Element,
    C: Communicator,
{
    for (&peer, tags) in md.send_tags() {
        let nelem = wire::message_elems(tags, r.ncomp);
        let mut buf = CommBuffer::<T>::alloc(nelem, config.buffer_memory, mem)?;
        pack_tags(source, tags, r.scomp, r.ncomp, buf.as_mut_slice())?;
        log::trace!("rank {}: isend {} elements to {}", md.my_rank(), buf.len(), peer);
        sends.push(comm.isend(peer, tag.as_u16(), wire::cast_slice(buf.as_slice())));
    }
    Ok(())
}

/// Pack the `sbox`es of `tags` into `out`, one block per tag in order.
fn pack_tags<T: Element>(
    source: &FabArray<T>,
    tags: &[CopyComTag],
    scomp: usize,
    ncomp: usize,
    out: &mut [T],
) -> Result<(), FabExchangeError> {
    let mut off = 0;
    for t in tags {
        let n = t.num_pts() * ncomp;
        let block = out
            .get_mut(off..off + n)
            .ok_or(FabExchangeError::BufferSliceMismatch { offset: off, len: n })?;
        source.fab(t.src_index)?.pack_region(&t.sbox, scomp, ncomp, block)?;
        off += n;
    }
    Ok(())
}

/// Local phase of a halo fill: read every local source into a staging
/// buffer first, then write, so no source cell is read after being written.
fn stage_local<T: Element>(
    fa: &mut FabArray<T>,
    tags: &[CopyComTag],
    r: &ExchangeRequest,
    threadsafe: bool,
    config: &ExchangeConfig,
    mem: &MemUsage,
) -> Result<(), FabExchangeError> {
    if tags.is_empty() {
        return Ok(());
    }
    let nelem = wire::message_elems(tags, r.ncomp);
    let mut buf = CommBuffer::<T>::alloc(nelem, config.buffer_memory, mem)?;
    pack_tags(fa, tags, r.scomp, r.ncomp, buf.as_mut_slice())?;
    let source = TagSource::Buffer {
        data: buf.as_slice(),
        offsets: wire::block_offsets(tags, r.ncomp),
    };
    apply(fa, tags, &source, r, threadsafe, config)
}

/// Where the values of a tag list come from.
enum TagSource<'a, T> {
    /// Packed blocks, one per tag, at the given element offsets.
    Buffer { data: &'a [T], offsets: Vec<usize> },
    /// The `sbox`es of a distinct fab array.
    Fabs(&'a FabArray<T>),
}

impl<T: Element> TagSource<'_, T> {
    fn block(&self, i: usize, t: &CopyComTag, ncomp: usize) -> Result<&[T], FabExchangeError> {
        match self {
            TagSource::Buffer { data, offsets } => {
                let n = t.num_pts() * ncomp;
                let off = offsets.get(i).copied().unwrap_or(usize::MAX);
                off.checked_add(n)
                    .and_then(|end| data.get(off..end))
                    .ok_or(FabExchangeError::BufferSliceMismatch { offset: off, len: n })
            }
            TagSource::Fabs(_) => Err(FabExchangeError::UnsupportedCombination(
                "fab source has no packed block".into(),
            )),
        }
    }

    fn apply_one<O: CellOp>(
        &self,
        fab: &mut Fab<T>,
        i: usize,
        t: &CopyComTag,
        r: &ExchangeRequest,
    ) -> Result<(), FabExchangeError> {
        match self {
            TagSource::Buffer { .. } => {
                let block = self.block(i, t, r.ncomp)?;
                fab.unpack_region::<O>(&t.dbox, r.dcomp, r.ncomp, block)
            }
            TagSource::Fabs(src) => {
                let sfab = src.fab(t.src_index)?;
                fab.apply_region::<O>(&t.dbox, sfab, &t.sbox, r.scomp, r.dcomp, r.ncomp)
            }
        }
    }
}

fn apply<T: Element>(
    dst: &mut FabArray<T>,
    tags: &[CopyComTag],
    source: &TagSource<'_, T>,
    r: &ExchangeRequest,
    threadsafe: bool,
    config: &ExchangeConfig,
) -> Result<(), FabExchangeError> {
    if tags.is_empty() {
        return Ok(());
    }
    match r.op {
        CopyOp::Overwrite => apply_with::<T, CopyCell>(dst, tags, source, r, threadsafe, config),
        CopyOp::Accumulate => apply_with::<T, AddCell>(dst, tags, source, r, threadsafe, config),
    }
}

fn apply_with<T: Element, O: CellOp>(
    dst: &mut FabArray<T>,
    tags: &[CopyComTag],
    source: &TagSource<'_, T>,
    r: &ExchangeRequest,
    threadsafe: bool,
    config: &ExchangeConfig,
) -> Result<(), FabExchangeError> {
    let positions = tags
        .iter()
        .map(|t| dst.local_pos(t.dst_index))
        .collect::<Result<Vec<_>, _>>()?;
    match config.backend {
        ExecBackend::Serial => {
            let fabs = dst.fabs_mut();
            for (i, t) in tags.iter().enumerate() {
                source.apply_one::<O>(&mut fabs[positions[i]], i, t, r)?;
            }
            Ok(())
        }
        ExecBackend::Threaded => {
            let mut by_fab: Vec<Vec<usize>> = vec![Vec::new(); dst.fabs().len()];
            for (i, &pos) in positions.iter().enumerate() {
                by_fab[pos].push(i);
            }
            exec::try_for_each_mut(dst.fabs_mut(), |pos, fab| {
                by_fab[pos]
                    .iter()
                    .try_for_each(|&i| source.apply_one::<O>(fab, i, &tags[i], r))
            })
        }
        ExecBackend::Device => {
            apply_cellwise::<T, O>(dst, tags, &positions, source, r, threadsafe, config)
        }
    }
}

/// Cell-parallel application. Thread-safe tag sets write directly; otherwise
/// each write is atomic when `T` supports the rule, or done under a per-cell lock.
fn apply_cellwise<T: Element, O: CellOp>(
    dst: &mut FabArray<T>,
    tags: &[CopyComTag],
    positions: &[usize],
    source: &TagSource<'_, T>,
    r: &ExchangeRequest,
    threadsafe: bool,
    config: &ExchangeConfig,
) -> Result<(), FabExchangeError> {
    // Raw writes below are unchecked; validate every region up front.
    for (i, t) in tags.iter().enumerate() {
        dst.fabs()[positions[i]].check(&t.dbox, r.dcomp, r.ncomp)?;
        match source {
            TagSource::Buffer { .. } => {
                source.block(i, t, r.ncomp)?;
            }
            TagSource::Fabs(src) => src.fab(t.src_index)?.check(&t.sbox, r.scomp, r.ncomp)?,
        }
    }
    let atomic = !threadsafe && O::is_atomic_for::<T>();
    let locks: Vec<CellLockMask> = if threadsafe || atomic {
        Vec::new()
    } else if config.allow_cell_locks {
        dst.fabs()
            .iter()
            .map(|f| CellLockMask::new(f.fab_box().num_pts()))
            .collect()
    } else {
        return Err(FabExchangeError::UnsupportedCombination(format!(
            "{:?} needs per-cell locks, which are disabled",
            O::OP
        )));
    };
    let raws: Vec<RawFab<T>> = dst.fabs_mut().iter_mut().map(Fab::raw).collect();
    let ncomp = r.ncomp;

    exec::for_each_index(tags.len(), |i| {
        let t = &tags[i];
        let npts = t.num_pts();
        let raw = &raws[positions[i]];
        let read = |c: usize, cell: usize| -> T {
            match source {
                TagSource::Buffer { data, offsets } => data[offsets[i] + c * npts + cell],
                TagSource::Fabs(src) => match src.fab(t.src_index) {
                    Ok(sfab) => sfab.as_slice()[sfab.offset(t.sbox.point_at(cell), r.scomp + c)],
                    Err(_) => T::zero(),
                },
            }
        };
        exec::for_each_index(npts * ncomp, |j| {
            let (c, cell) = (j / npts, j % npts);
            let p = t.dbox.point_at(cell);
            let v = read(c, cell);
            // SAFETY: regions were checked above; concurrent writers of one
            // cell only exist when the set is not thread-safe, and then every
            // write is atomic or holds the cell's lock.
            unsafe {
                let ptr = raw.cell(p, r.dcomp + c);
                if threadsafe {
                    O::apply(&mut *ptr, v);
                } else if atomic {
                    O::apply_atomic(ptr, v);
                } else {
                    let lock_cell = raw.fab_box().index(p);
                    locks[positions[i]].with_lock(lock_cell, || O::apply(&mut *ptr, v));
                }
            }
        });
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::metadata::{
        HaloFillFlags, ParallelCopyFlags, build_halo_fill, build_parallel_copy,
    };
    use crate::geometry::{IndexBox, Periodicity};
    use crate::layout::{BoxArray, DomainDecomposition};

    fn two_boxes() -> DomainDecomposition {
        DomainDecomposition::serial(BoxArray::cell_centered(vec![
            IndexBox::line(0, 3),
            IndexBox::line(4, 7),
        ]))
    }

    fn numbered(dd: &DomainDecomposition, ncomp: usize, ng: i32) -> FabArray<f64> {
        let mut fa = FabArray::new(dd.clone(), ncomp, IntVect::new(ng, 0, 0)).unwrap();
        for &k in dd.local_indices() {
            let valid = dd.box_at(k).unwrap();
            let fab = fa.fab_mut(k).unwrap();
            for c in 0..ncomp {
                for p in valid.cells() {
                    fab.set(p, c, (100 * c) as f64 + p[0] as f64).unwrap();
                }
            }
        }
        fa
    }

    fn x_halo(dd: &DomainDecomposition) -> CommMetadata {
        let period = Periodicity::non_periodic();
        build_halo_fill(dd, IntVect::new(1, 0, 0), &period, HaloFillFlags::default()).unwrap()
    }

    #[test]
    fn halo_fill_copies_neighbour_values_on_every_backend() {
        for backend in [ExecBackend::Serial, ExecBackend::Threaded, ExecBackend::Device] {
            let dd = two_boxes();
            let mut fa = numbered(&dd, 2, 1);
            let md = x_halo(&dd);
            let cfg = ExchangeConfig::default().with_backend(backend);
            execute_halo_fill(&mut fa, &md, 0, 2, &NoComm, &cfg, &MemUsage::new()).unwrap();
            assert_eq!(fa.fab(0).unwrap().get(IntVect::new(4, 0, 0), 1), Some(104.0));
            assert_eq!(fa.fab(1).unwrap().get(IntVect::new(3, 0, 0), 0), Some(3.0));
            // outer halo has no source
            assert_eq!(fa.fab(0).unwrap().get(IntVect::new(-1, 0, 0), 0), Some(0.0));
        }
    }

    #[test]
    fn component_rounds_cover_all_components() {
        let dd = two_boxes();
        let mut fa = numbered(&dd, 5, 1);
        let md = x_halo(&dd);
        let cfg = ExchangeConfig {
            max_comp: 2,
            ..ExchangeConfig::default()
        };
        execute_halo_fill(&mut fa, &md, 0, 5, &NoComm, &cfg, &MemUsage::new()).unwrap();
        for c in 0..5 {
            let expected = (100 * c) as f64 + 4.0;
            assert_eq!(fa.fab(0).unwrap().get(IntVect::new(4, 0, 0), c), Some(expected));
        }
    }

    #[test]
    fn wrong_array_is_rejected_before_communication() {
        let dd = two_boxes();
        let other = two_boxes();
        let mut fa = numbered(&other, 1, 1);
        let md = x_halo(&dd);
        let cfg = ExchangeConfig::default();
        let err = execute_halo_fill(&mut fa, &md, 0, 1, &NoComm, &cfg, &MemUsage::new())
            .unwrap_err();
        assert!(matches!(
            err,
            FabExchangeError::DecompositionMismatch { role: "destination" }
        ));
    }

    #[test]
    fn component_range_is_checked() {
        let dd = two_boxes();
        let mut fa = numbered(&dd, 2, 1);
        let md = x_halo(&dd);
        let cfg = ExchangeConfig::default();
        let err = execute_halo_fill(&mut fa, &md, 1, 2, &NoComm, &cfg, &MemUsage::new())
            .unwrap_err();
        assert!(matches!(
            err,
            FabExchangeError::ComponentRange { start: 1, count: 2, ncomp: 2 }
        ));
    }

    #[test]
    fn parallel_copy_shifts_components() {
        let src_dd = two_boxes();
        let dst_dd =
            DomainDecomposition::serial(BoxArray::cell_centered(vec![IndexBox::line(2, 5)]));
        let src = numbered(&src_dd, 2, 0);
        let mut dst = FabArray::<f64>::new(dst_dd.clone(), 3, IntVect::zero()).unwrap();
        let md = build_parallel_copy(
            &dst_dd,
            IntVect::zero(),
            &src_dd,
            IntVect::zero(),
            &Periodicity::non_periodic(),
            ParallelCopyFlags::default(),
        )
        .unwrap();
        let req = ExchangeRequest::new(1, 2, 1, CopyOp::Overwrite);
        let cfg = ExchangeConfig::default();
        execute_parallel_copy(&mut dst, &src, &md, req, &NoComm, &cfg, &MemUsage::new()).unwrap();
        let fab = dst.fab(0).unwrap();
        for x in 2..=5 {
            assert_eq!(fab.get(IntVect::new(x, 0, 0), 2), Some(100.0 + x as f64));
            assert_eq!(fab.get(IntVect::new(x, 0, 0), 0), Some(0.0));
        }
    }
}
