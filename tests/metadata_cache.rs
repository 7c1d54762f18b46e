use fab_exchange::algs::communicator::NoComm;
use fab_exchange::algs::metadata::{HaloFillFlags, ParallelCopyFlags};
use fab_exchange::cache::CommContext;
use fab_exchange::data::FabArray;
use fab_exchange::geometry::{IndexBox, IndexType, IntVect, Periodicity};
use fab_exchange::layout::{BoxArray, DomainDecomposition};
use std::sync::Arc;

fn decomp(max: i32) -> DomainDecomposition {
    let domain = IndexBox::from_bounds([0, 0, 0], [15, 15, 0]);
    let ba = BoxArray::chopped(&domain, IntVect::new(max, max, 1), IndexType::cell());
    DomainDecomposition::serial(ba)
}

fn halo1() -> IntVect {
    IntVect::new(1, 1, 0)
}

#[test]
fn repeated_requests_share_one_entry() {
    let dd = decomp(8);
    let mut ctx = CommContext::default();
    let period = Periodicity::non_periodic();
    let a = ctx.request_halo_fill(&dd, halo1(), &period, HaloFillFlags::default()).unwrap();
    let b = ctx
        .request_halo_fill(&dd.clone(), halo1(), &period, HaloFillFlags::default())
        .unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.use_count(), 2);
    let stats = ctx.halo_fill_stats();
    assert_eq!((stats.nbuild, stats.nuse, stats.size, stats.maxuse), (1, 2, 1, 2));

    let cross = ctx.request_halo_fill(&dd, halo1(), &period, HaloFillFlags::cross()).unwrap();
    assert!(!Arc::ptr_eq(&a, &cross));
    let wide = ctx
        .request_halo_fill(&dd, IntVect::new(2, 2, 0), &period, HaloFillFlags::default())
        .unwrap();
    assert!(!Arc::ptr_eq(&a, &wide));
    assert_eq!(ctx.halo_fill_cache().len(), 3);
}

#[test]
fn changed_box_array_misses_the_cache() {
    let dd = decomp(8);
    let mut ctx = CommContext::default();
    let period = Periodicity::non_periodic();
    ctx.request_halo_fill(&dd, halo1(), &period, HaloFillFlags::default()).unwrap();

    let mut ba = dd.box_array().clone();
    ba.set_box(0, IndexBox::from_bounds([0, 0, 0], [6, 7, 0])).unwrap();
    assert_ne!(ba.ref_id(), dd.box_array().ref_id());
    let edited = DomainDecomposition::serial(ba);
    ctx.request_halo_fill(&edited, halo1(), &period, HaloFillFlags::default()).unwrap();
    assert_eq!(ctx.halo_fill_stats().nbuild, 2);
}

#[test]
fn invalidation_removes_every_entry_mentioning_a_key() {
    let (a, b, c) = (decomp(8), decomp(4), decomp(16));
    let mut ctx = CommContext::default();
    let period = Periodicity::non_periodic();
    let flags = ParallelCopyFlags::default();
    let z = IntVect::zero();
    ctx.request_halo_fill(&a, halo1(), &period, HaloFillFlags::default()).unwrap();
    ctx.request_halo_fill(&b, halo1(), &period, HaloFillFlags::default()).unwrap();
    ctx.request_parallel_copy(&a, z, &b, z, &period, flags).unwrap();
    ctx.request_parallel_copy(&b, z, &c, z, &period, flags).unwrap();
    ctx.request_parallel_copy(&c, z, &a, z, &period, flags).unwrap();
    ctx.request_tiling(&a, IntVect::new(4, 4, 0));

    assert_eq!(ctx.invalidate(a.bd_key()), 4);
    assert_eq!(ctx.halo_fill_cache().len(), 1);
    assert_eq!(ctx.parallel_copy_cache().len(), 1);
    assert!(ctx.tiling_cache().is_empty());
    assert!(ctx.parallel_copy_cache().bd_keys().all(|k| k != a.bd_key()));
    assert_eq!(ctx.invalidate(a.bd_key()), 0);

    // Flushing `b` afterwards finds no stale index entries of the removed keys.
    assert_eq!(ctx.invalidate(b.bd_key()), 2);
    assert!(ctx.parallel_copy_cache().is_empty());
    assert_eq!(ctx.parallel_copy_cache().bd_keys().count(), 0);
}

#[test]
fn held_metadata_outlives_a_flush() {
    let dd = decomp(8);
    let mut ctx = CommContext::default();
    let domain = IndexBox::from_bounds([0, 0, 0], [15, 15, 0]);
    let period = Periodicity::from_domain(&domain, [true, true, false]);
    let md = ctx.request_halo_fill(&dd, halo1(), &period, HaloFillFlags::default()).unwrap();
    ctx.flush_all();
    assert!(ctx.halo_fill_cache().is_empty());
    assert!(!md.local_tags().is_empty());

    let mut fa = FabArray::<f64>::new(dd, 1, halo1()).unwrap();
    fa.set_val(3.0);
    ctx.execute_halo_fill(&mut fa, &md, 0, 1, &NoComm).unwrap();
}

#[test]
fn dropped_decompositions_are_swept() {
    let mut ctx = CommContext::default();
    let period = Periodicity::non_periodic();
    let keep = decomp(8);
    {
        let mut fa = FabArray::<f32>::new(decomp(4), 1, halo1()).unwrap();
        fa.fill_boundary(&mut ctx, &NoComm, &period).unwrap();
        let src = FabArray::<f32>::new(keep.clone(), 1, IntVect::zero()).unwrap();
        fa.parallel_copy(&mut ctx, &NoComm, &src, &period).unwrap();
    }
    ctx.request_halo_fill(&keep, halo1(), &period, HaloFillFlags::default()).unwrap();
    assert_eq!(ctx.parallel_copy_cache().len(), 1);

    assert_eq!(ctx.sweep_unreferenced(), 1);
    assert_eq!(ctx.halo_fill_cache().len(), 1);
    assert!(ctx.parallel_copy_cache().is_empty());
    assert_eq!(ctx.halo_fill_stats().nerase, 1);
    ctx.report_stats();
}

#[test]
fn registration_counts_guard_entries() {
    let dd = decomp(8);
    let mut ctx = CommContext::default();
    ctx.register_decomposition(&dd);
    let fa = FabArray::<f64>::new(dd.clone(), 1, halo1()).unwrap();
    ctx.register_decomposition(fa.decomposition());
    ctx.request_tiling(&dd, IntVect::new(4, 4, 0));
    assert_eq!(ctx.release_decomposition(&dd), 1);
    assert_eq!(ctx.tiling_cache().len(), 1);
    drop(fa);
    assert_eq!(ctx.release_decomposition(&dd), 0);
    assert!(ctx.tiling_cache().is_empty());
    assert_eq!(ctx.tiling_stats().nerase, 1);
}
