//! Communication metadata: which regions move where for halo fills and
//! parallel copies.
//!
//! Every rank computes the complete global tag set from the globally known
//! decompositions, sorts it with the [`CopyComTag`] order and then keeps the
//! tags it takes part in:
//!
//! * *local* tags: source and destination both owned by this rank;
//! * *send* tags, filed under the destination owner: only the source is ours;
//! * *receive* tags, filed under the source owner: only the destination is ours.
//!
//! No communication is needed to agree on the pattern, and because the global
//! set and its order are identical everywhere, sender and receiver lay out a
//! message the same way without exchanging a schema.

use crate::algs::copy_tag::{CopyComTag, PeerTagMap, TagContainer, bytes_of_peer_map, tag_volume};
use crate::cache::{CacheKey, Cached};
use crate::debug_invariants::DebugInvariants;
use crate::exchange_error::FabExchangeError;
use crate::geometry::{IndexBox, IndexType, IntVect, Periodicity, SPACEDIM};
use crate::layout::{BDKey, DistributionMapping, DomainDecomposition};
use hashbrown::HashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Options of a halo fill.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HaloFillFlags {
    /// Fill only the face slabs of the halo, not its edges and corners.
    pub cross: bool,
    /// Fill only halo cells outside the periodic domain, and only from
    /// periodic images. Yields an empty pattern on non-periodic domains.
    pub enforce_periodicity_only: bool,
}

impl HaloFillFlags {
    pub fn cross() -> Self {
        Self {
            cross: true,
            ..Self::default()
        }
    }

    pub fn periodicity_only() -> Self {
        Self {
            enforce_periodicity_only: true,
            ..Self::default()
        }
    }
}

/// Options of a parallel copy.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParallelCopyFlags {
    /// Write only destination halo cells, never valid cells.
    pub to_ghost_cells_only: bool,
}

/// Cache key of a halo-fill pattern.
///
/// Metadata only holds the tags one rank takes part in, so the rank is part of
/// the key: simulated ranks sharing a context never see each other's entries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HaloFillKey {
    pub bd_key: BDKey,
    pub my_rank: usize,
    pub ix_type: IndexType,
    pub halo: IntVect,
    pub period: Periodicity,
    pub flags: HaloFillFlags,
}

impl HaloFillKey {
    pub fn new(
        decomp: &DomainDecomposition,
        halo: IntVect,
        period: &Periodicity,
        flags: HaloFillFlags,
    ) -> Self {
        Self {
            bd_key: decomp.bd_key(),
            my_rank: decomp.my_rank(),
            ix_type: decomp.ix_type(),
            halo,
            period: *period,
            flags,
        }
    }
}

impl CacheKey for HaloFillKey {
    fn bd_keys(&self) -> Vec<BDKey> {
        vec![self.bd_key]
    }
}

/// Cache key of a parallel-copy pattern.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParallelCopyKey {
    pub src_key: BDKey,
    pub dst_key: BDKey,
    pub my_rank: usize,
    pub src_halo: IntVect,
    pub dst_halo: IntVect,
    pub period: Periodicity,
    pub flags: ParallelCopyFlags,
    pub ix_type: IndexType,
}

impl ParallelCopyKey {
    pub fn new(
        dst: &DomainDecomposition,
        dst_halo: IntVect,
        src: &DomainDecomposition,
        src_halo: IntVect,
        period: &Periodicity,
        flags: ParallelCopyFlags,
    ) -> Self {
        Self {
            src_key: src.bd_key(),
            dst_key: dst.bd_key(),
            my_rank: dst.my_rank(),
            src_halo,
            dst_halo,
            period: *period,
            flags,
            ix_type: dst.ix_type(),
        }
    }
}

impl CacheKey for ParallelCopyKey {
    fn bd_keys(&self) -> Vec<BDKey> {
        if self.src_key == self.dst_key {
            vec![self.src_key]
        } else {
            vec![self.src_key, self.dst_key]
        }
    }
}

/// What a [`CommMetadata`] was built for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PatternKey {
    HaloFill(HaloFillKey),
    ParallelCopy(ParallelCopyKey),
}

impl PatternKey {
    pub fn src_key(&self) -> BDKey {
        match self {
            PatternKey::HaloFill(k) => k.bd_key,
            PatternKey::ParallelCopy(k) => k.src_key,
        }
    }

    pub fn dst_key(&self) -> BDKey {
        match self {
            PatternKey::HaloFill(k) => k.bd_key,
            PatternKey::ParallelCopy(k) => k.dst_key,
        }
    }

    /// True when source and destination are the same storage.
    pub fn is_halo_fill(&self) -> bool {
        matches!(self, PatternKey::HaloFill(_))
    }
}

/// Local, send and receive tags of one communication pattern on one rank.
#[derive(Debug)]
pub struct CommMetadata {
    key: PatternKey,
    my_rank: usize,
    local: TagContainer,
    send: PeerTagMap,
    recv: PeerTagMap,
    threadsafe_loc: bool,
    threadsafe_rcv: bool,
    nuse: AtomicU64,
}

impl CommMetadata {
    fn from_tags(
        key: PatternKey,
        tags: TagContainer,
        src_dm: &DistributionMapping,
        dst_dm: &DistributionMapping,
        my_rank: usize,
    ) -> Result<Self, FabExchangeError> {
        let mut local = TagContainer::new();
        let mut send = PeerTagMap::new();
        let mut recv = PeerTagMap::new();
        for tag in tags {
            let src_owner = src_dm.owner(tag.src_index)?;
            let dst_owner = dst_dm.owner(tag.dst_index)?;
            match (src_owner == my_rank, dst_owner == my_rank) {
                (true, true) => local.push(tag),
                (true, false) => send.entry(dst_owner).or_default().push(tag),
                (false, true) => recv.entry(src_owner).or_default().push(tag),
                (false, false) => {}
            }
        }
        let threadsafe_loc = is_threadsafe(local.iter());
        let threadsafe_rcv = is_threadsafe(recv.values().flatten());
        let md = Self {
            key,
            my_rank,
            local,
            send,
            recv,
            threadsafe_loc,
            threadsafe_rcv,
            nuse: AtomicU64::new(0),
        };
        crate::debug_invariants!(md.validate_invariants(), "CommMetadata::from_tags");
        log::debug!(
            "rank {}: built {} pattern with {} local tags, {} send peers, {} recv peers \
             (threadsafe loc={} rcv={})",
            my_rank,
            if key.is_halo_fill() { "halo-fill" } else { "parallel-copy" },
            md.local.len(),
            md.send.len(),
            md.recv.len(),
            threadsafe_loc,
            threadsafe_rcv,
        );
        Ok(md)
    }

    pub fn key(&self) -> &PatternKey {
        &self.key
    }

    pub fn my_rank(&self) -> usize {
        self.my_rank
    }

    pub fn local_tags(&self) -> &[CopyComTag] {
        &self.local
    }

    pub fn send_tags(&self) -> &PeerTagMap {
        &self.send
    }

    pub fn recv_tags(&self) -> &PeerTagMap {
        &self.recv
    }

    pub fn send_tags_for(&self, peer: usize) -> Result<&[CopyComTag], FabExchangeError> {
        self.send
            .get(&peer)
            .map(Vec::as_slice)
            .ok_or(FabExchangeError::UnknownPeer {
                peer,
                direction: "send",
            })
    }

    pub fn recv_tags_for(&self, peer: usize) -> Result<&[CopyComTag], FabExchangeError> {
        self.recv
            .get(&peer)
            .map(Vec::as_slice)
            .ok_or(FabExchangeError::UnknownPeer {
                peer,
                direction: "receive",
            })
    }

    /// No two local tags write overlapping cells of one destination.
    pub fn threadsafe_loc(&self) -> bool {
        self.threadsafe_loc
    }

    /// No two received tags write overlapping cells of one destination.
    pub fn threadsafe_rcv(&self) -> bool {
        self.threadsafe_rcv
    }

    /// True when this rank neither copies nor communicates anything.
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.send.is_empty() && self.recv.is_empty()
    }

    /// Cells per component sent to `peer` (0 if none).
    pub fn send_volume(&self, peer: usize) -> usize {
        self.send.get(&peer).map_or(0, |t| tag_volume(t))
    }

    /// Cells per component received from `peer` (0 if none).
    pub fn recv_volume(&self, peer: usize) -> usize {
        self.recv.get(&peer).map_or(0, |t| tag_volume(t))
    }

    pub fn use_count(&self) -> u64 {
        self.nuse.load(Ordering::Relaxed)
    }
}

impl Cached for CommMetadata {
    fn record_use(&self) -> u64 {
        self.nuse.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn use_count(&self) -> u64 {
        CommMetadata::use_count(self)
    }

    fn bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.local.capacity() * std::mem::size_of::<CopyComTag>()
            + bytes_of_peer_map(&self.send)
            + bytes_of_peer_map(&self.recv)
    }
}

impl DebugInvariants for CommMetadata {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CommMetadata");
    }

    fn validate_invariants(&self) -> Result<(), FabExchangeError> {
        let lists = std::iter::once(&self.local)
            .chain(self.send.values())
            .chain(self.recv.values());
        for list in lists {
            if let Some(tag) = list.iter().find(|t| !t.dbox.same_shape(&t.sbox)) {
                return Err(FabExchangeError::ShapeMismatch {
                    dbox: tag.dbox,
                    sbox: tag.sbox,
                });
            }
            if let Some(i) = list.windows(2).position(|w| w[0] > w[1]) {
                return Err(FabExchangeError::UnsortedTags { position: i + 1 });
            }
        }
        Ok(())
    }
}

/// True if no two tags aimed at the same destination have overlapping `dbox`es.
pub fn is_threadsafe<'a>(tags: impl IntoIterator<Item = &'a CopyComTag>) -> bool {
    let mut by_dst: BTreeMap<usize, Vec<IndexBox>> = BTreeMap::new();
    for t in tags {
        by_dst.entry(t.dst_index).or_default().push(t.dbox);
    }
    by_dst.values().all(|boxes| {
        boxes
            .iter()
            .tuple_combinations()
            .all(|(a, b)| !a.intersects(b))
    })
}

fn check_halo(halo: IntVect) -> Result<(), FabExchangeError> {
    if halo.all_ge(&IntVect::zero()) {
        Ok(())
    } else {
        Err(FabExchangeError::InvalidHalo(halo))
    }
}

/// Halo pieces of `bx` around the valid box `valid`.
fn ghost_pieces(bx: &IndexBox, valid: &IndexBox, halo: IntVect, cross: bool) -> Vec<IndexBox> {
    if !cross {
        return bx.difference(valid);
    }
    let mut out = Vec::new();
    for d in 0..SPACEDIM {
        if halo[d] == 0 {
            continue;
        }
        for high in [false, true] {
            let (lo, hi) = (valid.small_end(), valid.big_end());
            let (mut slo, mut shi) = (lo, hi);
            if high {
                slo[d] = hi[d] + 1;
                shi[d] = hi[d] + halo[d];
            } else {
                slo[d] = lo[d] - halo[d];
                shi[d] = lo[d] - 1;
            }
            let piece = bx.intersection(&IndexBox::new(slo, shi));
            if !piece.is_empty() {
                out.push(piece);
            }
        }
    }
    out
}

/// Sort tags found together with the index of the shift that produced them.
///
/// With `reject_ambiguous`, a destination reached twice through different
/// images of one source is an error. Sources that include their halo overlap
/// their own images legitimately (e.g. when summing halos back), so callers
/// only ask for the check when sources are valid regions.
fn finish_tags(
    mut found: Vec<(CopyComTag, usize)>,
    reject_ambiguous: bool,
) -> Result<TagContainer, FabExchangeError> {
    found.sort_by(|a, b| a.0.cmp(&b.0));
    if !reject_ambiguous {
        return Ok(found.into_iter().map(|(t, _)| t).collect());
    }
    let mut by_pair: HashMap<(usize, usize), Vec<(IndexBox, usize)>> = HashMap::new();
    for (tag, shift) in &found {
        by_pair
            .entry((tag.src_index, tag.dst_index))
            .or_default()
            .push((tag.dbox, *shift));
    }
    for ((src_index, dst_index), images) in &by_pair {
        for ((a, sa), (b, sb)) in images.iter().tuple_combinations() {
            if sa != sb && a.intersects(b) {
                return Err(FabExchangeError::AmbiguousPeriodicImage {
                    src_index: *src_index,
                    dst_index: *dst_index,
                    overlap: a.intersection(b),
                });
            }
        }
    }
    Ok(found.into_iter().map(|(t, _)| t).collect())
}

/// Global, sorted tag set filling the halo of every box of `decomp` from the
/// valid regions of the boxes (including periodic images of themselves).
pub fn halo_fill_tags(
    decomp: &DomainDecomposition,
    halo: IntVect,
    period: &Periodicity,
    flags: HaloFillFlags,
) -> Result<TagContainer, FabExchangeError> {
    check_halo(halo)?;
    if flags.enforce_periodicity_only && !period.is_any_periodic() {
        return Ok(TagContainer::new());
    }
    if halo.is_zero() {
        return Ok(TagContainer::new());
    }
    let ba = decomp.box_array();
    let boxes = ba.boxes();
    let shifts: Vec<IntVect> = period
        .shift_vectors_reaching(halo)
        .into_iter()
        .filter(|v| !(flags.enforce_periodicity_only && v.is_zero()))
        .collect();
    let pdomain = period
        .domain()
        .surrounding_nodes(decomp.ix_type().node_offset());

    let mut found = Vec::new();
    for (ksrc, sbox) in boxes.iter().enumerate() {
        for (ishift, &v) in shifts.iter().enumerate() {
            let shifted = sbox.shift(v);
            for kdst in ba.intersecting(&shifted, halo) {
                if kdst == ksrc && v.is_zero() {
                    continue;
                }
                let dvalid = boxes[kdst];
                let bx = shifted.intersection(&dvalid.grow(halo));
                for piece in ghost_pieces(&bx, &dvalid, halo, flags.cross) {
                    let pieces = if flags.enforce_periodicity_only {
                        piece.difference(&pdomain)
                    } else {
                        vec![piece]
                    };
                    for b in pieces {
                        found.push((CopyComTag::new(b, b.shift(-v), kdst, ksrc), ishift));
                    }
                }
            }
        }
    }
    finish_tags(found, true)
}

/// Build the halo-fill metadata of `decomp` as seen from its rank.
pub fn build_halo_fill(
    decomp: &DomainDecomposition,
    halo: IntVect,
    period: &Periodicity,
    flags: HaloFillFlags,
) -> Result<CommMetadata, FabExchangeError> {
    let tags = halo_fill_tags(decomp, halo, period, flags)?;
    let key = PatternKey::HaloFill(HaloFillKey::new(decomp, halo, period, flags));
    let dm = decomp.distribution();
    CommMetadata::from_tags(key, tags, dm, dm, decomp.my_rank())
}

fn check_compatible(
    dst: &DomainDecomposition,
    src: &DomainDecomposition,
) -> Result<(), FabExchangeError> {
    if dst.ix_type() != src.ix_type() {
        return Err(FabExchangeError::IncompatibleIndexType {
            src: src.ix_type(),
            dst: dst.ix_type(),
        });
    }
    if dst.nranks() != src.nranks() {
        return Err(FabExchangeError::RankCountMismatch {
            src: src.nranks(),
            dst: dst.nranks(),
        });
    }
    if dst.my_rank() != src.my_rank() {
        return Err(FabExchangeError::DecompositionMismatch { role: "source" });
    }
    Ok(())
}

/// Global, sorted tag set copying `src` (grown by `src_halo`) into `dst`
/// (grown by `dst_halo`).
pub fn parallel_copy_tags(
    dst: &DomainDecomposition,
    dst_halo: IntVect,
    src: &DomainDecomposition,
    src_halo: IntVect,
    period: &Periodicity,
    flags: ParallelCopyFlags,
) -> Result<TagContainer, FabExchangeError> {
    check_compatible(dst, src)?;
    check_halo(dst_halo)?;
    check_halo(src_halo)?;

    let sba = src.box_array();
    let sboxes = sba.boxes();
    let shifts = period.shift_vectors_reaching(dst_halo + src_halo);

    let mut found = Vec::new();
    for (kdst, dvalid) in dst.box_array().boxes().iter().enumerate() {
        let dgrown = dvalid.grow(dst_halo);
        for (ishift, &v) in shifts.iter().enumerate() {
            for ksrc in sba.intersecting(&dgrown.shift(-v), src_halo) {
                let sregion = sboxes[ksrc].grow(src_halo).shift(v);
                let bx = dgrown.intersection(&sregion);
                if bx.is_empty() {
                    continue;
                }
                let pieces = if flags.to_ghost_cells_only {
                    bx.difference(dvalid)
                } else {
                    vec![bx]
                };
                for b in pieces {
                    found.push((CopyComTag::new(b, b.shift(-v), kdst, ksrc), ishift));
                }
            }
        }
    }
    finish_tags(found, src_halo.is_zero())
}

/// Build the parallel-copy metadata from `src` into `dst` as seen from their rank.
pub fn build_parallel_copy(
    dst: &DomainDecomposition,
    dst_halo: IntVect,
    src: &DomainDecomposition,
    src_halo: IntVect,
    period: &Periodicity,
    flags: ParallelCopyFlags,
) -> Result<CommMetadata, FabExchangeError> {
    let tags = parallel_copy_tags(dst, dst_halo, src, src_halo, period, flags)?;
    let key = PatternKey::ParallelCopy(ParallelCopyKey::new(
        dst, dst_halo, src, src_halo, period, flags,
    ));
    CommMetadata::from_tags(
        key,
        tags,
        src.distribution(),
        dst.distribution(),
        dst.my_rank(),
    )
}
