//! Communication algorithms: tag generation, message layout, transports and
//! the exchange engine.

pub mod communicator;
pub mod copy_tag;
pub mod exchange;
pub mod metadata;
pub mod tiling;
pub mod wire;

pub use communicator::{CommTag, Communicator, LocalComm, NoComm, Wait};
pub use copy_tag::CopyComTag;
pub use exchange::ExchangeRequest;
pub use metadata::{
    CommMetadata, HaloFillFlags, ParallelCopyFlags, build_halo_fill, build_parallel_copy,
};
pub use tiling::{Tile, TileArray};
