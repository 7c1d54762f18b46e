//! FabExchangeError: unified error type for fab-exchange public APIs.
//!
//! Contract violations, resource exhaustion and transport failures are all
//! reported through this enum. Nothing in the crate retries: an error means the
//! operation produced no partial result, and callers that follow the
//! "abort with a diagnostic" policy simply print the `Display` form.

use crate::geometry::{IndexBox, IndexType, IntVect};
use thiserror::Error;

/// Unified error type for fab-exchange operations.
#[derive(Debug, Error)]
pub enum FabExchangeError {
    /// Box and owner sequences of a decomposition differ in length.
    #[error("mismatched box/owner length: {boxes} boxes, {owners} owners")]
    LengthMismatch { boxes: usize, owners: usize },
    /// A global sub-domain index is outside `0..len`.
    #[error("index {index} out of range for {len} sub-domains")]
    IndexOutOfRange { index: usize, len: usize },
    /// An owner rank is not smaller than the number of ranks.
    #[error("owner rank {rank} of sub-domain {index} is not below nranks = {nranks}")]
    InvalidOwner { index: usize, rank: usize, nranks: usize },
    /// A rank is not smaller than the number of ranks of the job.
    #[error("rank {rank} is not below nranks = {nranks}")]
    InvalidRank { rank: usize, nranks: usize },
    /// Storage for a sub-domain was requested on a rank that does not own it.
    #[error("sub-domain {index} is not owned by rank {rank}")]
    NotLocal { index: usize, rank: usize },
    /// Tags were requested for a peer the pattern does not talk to.
    #[error("no {direction} tags for peer rank {peer}")]
    UnknownPeer { peer: usize, direction: &'static str },
    /// Source and destination decompositions use different centering.
    #[error("incompatible index types: source {src:?}, destination {dst:?}")]
    IncompatibleIndexType { src: IndexType, dst: IndexType },
    /// Source and destination decompositions were built for different rank counts.
    #[error("rank count mismatch: source {src}, destination {dst}")]
    RankCountMismatch { src: usize, dst: usize },
    /// Component range `[start, start + count)` does not fit in `ncomp` components.
    #[error("component range [{start}, {}) exceeds {ncomp} components", start + count)]
    ComponentRange { start: usize, count: usize, ncomp: usize },
    /// The pattern was built for a different decomposition than the array passed in.
    #[error("communication pattern does not match the {role} decomposition")]
    DecompositionMismatch { role: &'static str },
    /// Negative halo widths are meaningless.
    #[error("halo width must be non-negative, got {0:?}")]
    InvalidHalo(IntVect),
    /// Two periodic images of one source sub-domain write the same destination cells.
    #[error(
        "sub-domain {src_index} reaches destination {dst_index} \
         through two periodic images overlapping at {overlap}"
    )]
    AmbiguousPeriodicImage {
        src_index: usize,
        dst_index: usize,
        overlap: IndexBox,
    },
    /// A region was not contained in the storage it was applied to.
    #[error("region {region} is not contained in storage box {storage}")]
    RegionOutOfBounds { region: IndexBox, storage: IndexBox },
    /// A copy instruction pairs a destination and a source of different shape.
    #[error("region shapes differ: destination {dbox}, source {sbox}")]
    ShapeMismatch { dbox: IndexBox, sbox: IndexBox },
    /// A tag list is not in ascending copy order.
    #[error("tag at position {position} sorts before its predecessor")]
    UnsortedTags { position: usize },
    /// A flat buffer slice did not match the region it describes.
    #[error("buffer slice at offset {offset} with length {len} does not fit")]
    BufferSliceMismatch { offset: usize, len: usize },
    /// Communication buffer allocation failed.
    #[error("failed to allocate a communication buffer of {bytes} bytes")]
    BufferAllocation { bytes: usize },
    /// The selected execution backend cannot honour the requested write discipline.
    #[error("unsupported configuration: {0}")]
    UnsupportedCombination(String),
    /// A message from a neighbour was missing or malformed.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl FabExchangeError {
    pub(crate) fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        FabExchangeError::CommError {
            neighbor,
            source: msg.into(),
        }
    }
}
