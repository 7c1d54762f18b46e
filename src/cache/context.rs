//! CommContext: owner of every communication cache of one rank.

use super::metadata_cache::MetadataCache;
use super::stats::CacheStats;
use crate::algs::communicator::Communicator;
use crate::algs::exchange::{self, ExchangeRequest};
use crate::algs::metadata::{
    CommMetadata, HaloFillFlags, HaloFillKey, ParallelCopyFlags, ParallelCopyKey, build_halo_fill,
    build_parallel_copy,
};
use crate::algs::tiling::{TileArray, TileKey};
use crate::config::ExchangeConfig;
use crate::data::comm_buffer::MemUsage;
use crate::data::element::Element;
use crate::data::fab_array::FabArray;
use crate::exchange_error::FabExchangeError;
use crate::geometry::{IntVect, Periodicity};
use crate::layout::decomposition::Liveness;
use crate::layout::{BDKey, DomainDecomposition};
use hashbrown::HashMap;
use std::sync::Arc;

/// Halo-fill, parallel-copy and tiling caches plus the bookkeeping that
/// decides when their entries go stale.
///
/// Entries are flushed per [`BDKey`] by [`invalidate`](Self::invalidate), when
/// the registration count of a key drops to zero, or by
/// [`sweep_unreferenced`](Self::sweep_unreferenced) once nothing alive
/// carries the key any more.
#[derive(Debug)]
pub struct CommContext {
    config: ExchangeConfig,
    fb: MetadataCache<HaloFillKey, CommMetadata>,
    cpc: MetadataCache<ParallelCopyKey, CommMetadata>,
    tiles: MetadataCache<TileKey, TileArray>,
    bd_count: HashMap<BDKey, usize>,
    live: HashMap<BDKey, Liveness>,
    mem: MemUsage,
}

impl Default for CommContext {
    fn default() -> Self {
        Self::new(ExchangeConfig::default())
    }
}

impl CommContext {
    pub fn new(config: ExchangeConfig) -> Self {
        Self {
            config,
            fb: MetadataCache::new("FillBoundary"),
            cpc: MetadataCache::new("ParallelCopy"),
            tiles: MetadataCache::new("Tiling"),
            bd_count: HashMap::new(),
            live: HashMap::new(),
            mem: MemUsage::new(),
        }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ExchangeConfig {
        &mut self.config
    }

    pub fn mem_usage(&self) -> &MemUsage {
        &self.mem
    }

    fn track(&mut self, decomp: &DomainDecomposition) {
        self.live
            .entry(decomp.bd_key())
            .or_insert_with(|| decomp.liveness());
    }

    /// Halo-fill metadata for `decomp`, built on first request.
    pub fn request_halo_fill(
        &mut self,
        decomp: &DomainDecomposition,
        halo: IntVect,
        period: &Periodicity,
        flags: HaloFillFlags,
    ) -> Result<Arc<CommMetadata>, FabExchangeError> {
        self.track(decomp);
        let key = HaloFillKey::new(decomp, halo, period, flags);
        self.fb
            .lookup_or_build(key, || build_halo_fill(decomp, halo, period, flags))
    }

    /// Parallel-copy metadata from `src` into `dst`, built on first request.
    pub fn request_parallel_copy(
        &mut self,
        src: &DomainDecomposition,
        src_halo: IntVect,
        dst: &DomainDecomposition,
        dst_halo: IntVect,
        period: &Periodicity,
        flags: ParallelCopyFlags,
    ) -> Result<Arc<CommMetadata>, FabExchangeError> {
        if src.my_rank() != dst.my_rank() {
            return Err(FabExchangeError::DecompositionMismatch { role: "source" });
        }
        self.track(src);
        self.track(dst);
        let key = ParallelCopyKey::new(dst, dst_halo, src, src_halo, period, flags);
        self.cpc.lookup_or_build(key, || {
            build_parallel_copy(dst, dst_halo, src, src_halo, period, flags)
        })
    }

    /// Tiling of the local boxes of `decomp`.
    pub fn request_tiling(
        &mut self,
        decomp: &DomainDecomposition,
        tile_size: IntVect,
    ) -> Arc<TileArray> {
        self.track(decomp);
        self.tiles
            .lookup_or_insert_with(TileKey::new(decomp, tile_size), || {
                TileArray::build(decomp, tile_size)
            })
    }

    /// Run a halo fill with this context's configuration and memory accounting.
    pub fn execute_halo_fill<T: Element, C: Communicator>(
        &self,
        fa: &mut FabArray<T>,
        md: &CommMetadata,
        scomp: usize,
        ncomp: usize,
        comm: &C,
    ) -> Result<(), FabExchangeError> {
        exchange::execute_halo_fill(fa, md, scomp, ncomp, comm, &self.config, &self.mem)
    }

    /// Run a parallel copy with this context's configuration and memory accounting.
    pub fn execute_parallel_copy<T: Element, C: Communicator>(
        &self,
        dst: &mut FabArray<T>,
        src: &FabArray<T>,
        md: &CommMetadata,
        req: ExchangeRequest,
        comm: &C,
    ) -> Result<(), FabExchangeError> {
        exchange::execute_parallel_copy(dst, src, md, req, comm, &self.config, &self.mem)
    }

    /// Drop every cached entry that mentions `bd`. Returns the number erased.
    pub fn invalidate(&mut self, bd: BDKey) -> usize {
        let n = self.fb.flush(bd) + self.cpc.flush(bd) + self.tiles.flush(bd);
        log::debug!("invalidated {} cache entries of {}", n, bd);
        n
    }

    /// Empty every cache.
    pub fn flush_all(&mut self) {
        self.fb.flush_all();
        self.cpc.flush_all();
        self.tiles.flush_all();
        self.live.clear();
    }

    /// Count one more user of `decomp`'s key; returns the new count.
    pub fn register_decomposition(&mut self, decomp: &DomainDecomposition) -> usize {
        self.track(decomp);
        let n = self.bd_count.entry(decomp.bd_key()).or_insert(0);
        *n += 1;
        *n
    }

    /// Count one user less; the key's entries are flushed when none remain.
    /// Returns the remaining count.
    pub fn release_decomposition(&mut self, decomp: &DomainDecomposition) -> usize {
        let bd = decomp.bd_key();
        let remaining = match self.bd_count.get_mut(&bd) {
            Some(n) if *n > 1 => {
                *n -= 1;
                *n
            }
            Some(_) => {
                self.bd_count.remove(&bd);
                0
            }
            None => {
                log::warn!("release of unregistered decomposition {}", bd);
                return 0;
            }
        };
        if remaining == 0 {
            self.invalidate(bd);
            self.live.remove(&bd);
        }
        remaining
    }

    /// Flush the entries of every key whose box array or distribution mapping
    /// has been dropped everywhere. Returns the number of keys swept.
    pub fn sweep_unreferenced(&mut self) -> usize {
        let dead: Vec<BDKey> = self
            .live
            .iter()
            .filter(|(_, l)| !l.is_alive())
            .map(|(k, _)| *k)
            .collect();
        for bd in &dead {
            self.invalidate(*bd);
            self.live.remove(bd);
            self.bd_count.remove(bd);
        }
        dead.len()
    }

    pub fn halo_fill_stats(&self) -> &CacheStats {
        self.fb.stats()
    }

    pub fn parallel_copy_stats(&self) -> &CacheStats {
        self.cpc.stats()
    }

    pub fn tiling_stats(&self) -> &CacheStats {
        self.tiles.stats()
    }

    pub fn halo_fill_cache(&self) -> &MetadataCache<HaloFillKey, CommMetadata> {
        &self.fb
    }

    pub fn parallel_copy_cache(&self) -> &MetadataCache<ParallelCopyKey, CommMetadata> {
        &self.cpc
    }

    pub fn tiling_cache(&self) -> &MetadataCache<TileKey, TileArray> {
        &self.tiles
    }

    /// Log every cache's statistics and the buffer memory use at info level.
    pub fn report_stats(&self) {
        self.fb.stats().report();
        self.cpc.stats().report();
        self.tiles.stats().report();
        self.mem.report();
    }
}
