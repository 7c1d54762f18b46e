use fab_exchange::algs::communicator::{Communicator, LocalComm};
use fab_exchange::cache::CommContext;
use fab_exchange::config::ExchangeConfig;
use fab_exchange::data::FabArray;
use fab_exchange::exec::ExecBackend;
use fab_exchange::geometry::{IndexBox, IndexType, IntVect, Periodicity};
use fab_exchange::layout::{BoxArray, DistributionMapping, DomainDecomposition};

const DOMAIN: IndexBox = IndexBox::from_bounds([0, 0, 0], [15, 11, 0]);

fn f(p: IntVect, c: usize) -> f64 {
    f64::from(p[0]) + 100.0 * f64::from(p[1]) + 10_000.0 * c as f64
}

fn wrap(p: IntVect) -> IntVect {
    IntVect::new(p[0].rem_euclid(16), p[1].rem_euclid(12), p[2])
}

/// Run `body` on every rank of a fresh `n`-rank world, one thread per rank.
fn run_ranks<R, F>(n: usize, body: F) -> Vec<R>
where
    R: Send,
    F: Fn(LocalComm) -> R + Sync,
{
    std::thread::scope(|s| {
        let handles: Vec<_> = LocalComm::world(n)
            .into_iter()
            .map(|comm| s.spawn(|| body(comm)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn decomp(ba: &BoxArray, owners: Vec<usize>, nranks: usize, rank: usize) -> DomainDecomposition {
    let dm = DistributionMapping::new(owners, nranks).unwrap();
    DomainDecomposition::new(ba.clone(), dm, rank).unwrap()
}

fn fill_valid(fa: &mut FabArray<f64>) {
    let ncomp = fa.ncomp();
    for k in fa.decomposition().local_indices().to_vec() {
        let bx = fa.box_at(k).unwrap();
        let fab = fa.fab_mut(k).unwrap();
        for p in bx.cells() {
            for c in 0..ncomp {
                fab.set(p, c, f(p, c)).unwrap();
            }
        }
    }
}

/// Halo fill on `nranks` thread-ranks; returns the number of halo cells checked.
fn periodic_fill(nranks: usize, config: ExchangeConfig, ncomp: usize) -> usize {
    let ba = BoxArray::chopped(&DOMAIN, IntVect::new(4, 6, 1), IndexType::cell());
    let owners: Vec<usize> = (0..ba.len()).map(|k| (k * 7 + 3) % nranks).collect();
    let period = Periodicity::from_domain(&DOMAIN, [true, true, false]);
    let halo = IntVect::new(2, 1, 0);
    let counts = run_ranks(nranks, |comm| {
        let dd = decomp(&ba, owners.clone(), nranks, comm.rank());
        let mut fa = FabArray::<f64>::new(dd, ncomp, halo).unwrap();
        fill_valid(&mut fa);
        let mut ctx = CommContext::new(config.clone());
        fa.fill_boundary(&mut ctx, &comm, &period).unwrap();
        assert_eq!(fa.n_grow_filled(), halo);

        let mut checked = 0;
        for (k, fab) in fa.iter() {
            let valid = fa.box_at(k).unwrap();
            for p in fab.fab_box().cells() {
                for c in 0..ncomp {
                    let rank = comm.rank();
                    assert_eq!(fab.get(p, c), Some(f(wrap(p), c)), "rank {rank} box {k} cell {p}");
                }
                checked += usize::from(!valid.contains_point(p));
            }
        }
        checked
    });
    counts.into_iter().sum()
}

#[test]
fn halo_fill_matches_across_rank_counts() {
    let serial = periodic_fill(1, ExchangeConfig::default(), 1);
    assert_eq!(serial, 8 * (8 * 8 - 4 * 6));
    for nranks in [2, 3, 5] {
        assert_eq!(periodic_fill(nranks, ExchangeConfig::default(), 1), serial);
    }
}

#[test]
fn every_backend_fills_the_same_halo() {
    for backend in [ExecBackend::Serial, ExecBackend::Threaded, ExecBackend::Device] {
        let config = ExchangeConfig::default().with_backend(backend);
        periodic_fill(3, config, 2);
    }
}

#[test]
fn components_travel_in_rounds() {
    let config = ExchangeConfig {
        max_comp: 1,
        ..ExchangeConfig::default()
    };
    periodic_fill(2, config, 3);
}

#[test]
fn parallel_copy_between_distributions() {
    let nranks = 3;
    let src_ba = BoxArray::chopped(&DOMAIN, IntVect::new(8, 4, 1), IndexType::cell());
    let dst_ba = BoxArray::chopped(&DOMAIN, IntVect::new(4, 12, 1), IndexType::cell());
    let src_owners: Vec<usize> = (0..src_ba.len()).map(|k| k % nranks).collect();
    let dst_owners: Vec<usize> = (0..dst_ba.len()).map(|k| (nranks - 1) - k % nranks).collect();
    let period = Periodicity::non_periodic();
    run_ranks(nranks, |comm| {
        let rank = comm.rank();
        let src_dd = decomp(&src_ba, src_owners.clone(), nranks, rank);
        let dst_dd = decomp(&dst_ba, dst_owners.clone(), nranks, rank);
        let mut src = FabArray::<f64>::new(src_dd, 2, IntVect::zero()).unwrap();
        let mut dst = FabArray::<f64>::new(dst_dd, 2, IntVect::zero()).unwrap();
        fill_valid(&mut src);
        let mut ctx = CommContext::default();
        dst.parallel_copy(&mut ctx, &comm, &src, &period).unwrap();
        for (k, fab) in dst.iter() {
            for p in fab.fab_box().cells() {
                for c in 0..2 {
                    assert_eq!(fab.get(p, c), Some(f(p, c)), "rank {rank} box {k} cell {p}");
                }
            }
        }
    });
}

#[test]
fn sum_boundary_conserves_the_total() {
    let nranks = 2;
    let ba = BoxArray::cell_centered((0..4).map(|k| IndexBox::line(4 * k, 4 * k + 3)).collect());
    let owners = vec![0, 1, 0, 1];
    let period = Periodicity::from_domain(&IndexBox::line(0, 15), [true, false, false]);
    let sums = run_ranks(nranks, |comm| {
        let dd = decomp(&ba, owners.clone(), nranks, comm.rank());
        let mut fa = FabArray::<i64>::new(dd, 1, IntVect::new(1, 0, 0)).unwrap();
        fa.set_val(1);
        let mut ctx = CommContext::default();
        fa.sum_boundary(&mut ctx, &comm, &period).unwrap();
        for (_, fab) in fa.iter() {
            let bx = fab.fab_box().grow(IntVect::new(-1, 0, 0));
            assert_eq!(fab.get(bx.small_end(), 0), Some(2));
            assert_eq!(fab.get(bx.big_end(), 0), Some(2));
        }
        fa.sum_valid(0).unwrap()
    });
    assert_eq!(sums.iter().sum::<i64>(), 16 + 8);
}
