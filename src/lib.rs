#![cfg_attr(docsrs, feature(doc_cfg))]
//! # fab-exchange
//!
//! fab-exchange moves data between the boxes of a distributed block-structured
//! array. A [`layout::DomainDecomposition`] splits an index-space domain into
//! boxes and assigns each to a rank; a [`data::FabArray`] holds one array of
//! values per local box, grown by a ghost (halo) region.
//!
//! ## Features
//! - Halo fill: copy valid data of neighbouring boxes, including periodic
//!   images, into each box's ghost region (full, face-only and
//!   periodicity-only variants).
//! - Parallel copy: copy or accumulate the overlap between two differently
//!   decomposed arrays, optionally into ghost cells only.
//! - Communication metadata ([`algs::CommMetadata`]) computed once per
//!   decomposition pair and cached in a [`cache::CommContext`], flushed when a
//!   decomposition goes away.
//! - Pluggable transports: [`algs::NoComm`] for one rank,
//!   [`algs::LocalComm`] for ranks as threads, and MPI behind the
//!   `mpi-support` feature.
//! - Serial, thread-parallel (Rayon) and cell-parallel execution of the
//!   local copy phase, with atomic or locked updates when targets alias.
//! - Cached tilings of local boxes for cache-blocked loops.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! fab-exchange = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! ```
//! use fab_exchange::prelude::*;
//!
//! let ba = BoxArray::cell_centered(vec![IndexBox::line(0, 7), IndexBox::line(8, 15)]);
//! let dd = DomainDecomposition::serial(ba);
//! let mut fa = FabArray::<f64>::new(dd, 1, IntVect::new(1, 0, 0)).unwrap();
//! fa.set_val(1.0);
//! let mut ctx = CommContext::default();
//! let period = Periodicity::from_domain(&IndexBox::line(0, 15), [true, false, false]);
//! fa.fill_boundary(&mut ctx, &NoComm, &period).unwrap();
//! ```
//!
//! ## Invariants
//!
//! Types that carry structural invariants implement [`DebugInvariants`]; the
//! checks run in debug builds and with the `check-invariants` feature.

pub mod algs;
pub mod cache;
pub mod config;
pub mod data;
pub mod debug_invariants;
pub mod exchange_error;
pub mod exec;
pub mod geometry;
pub mod layout;

pub use debug_invariants::DebugInvariants;
pub use exchange_error::FabExchangeError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm, Wait};
    pub use crate::algs::exchange::ExchangeRequest;
    pub use crate::algs::metadata::{CommMetadata, HaloFillFlags, ParallelCopyFlags};
    pub use crate::algs::tiling::Tile;
    pub use crate::cache::CommContext;
    pub use crate::config::ExchangeConfig;
    pub use crate::data::{CopyOp, CopySpec, Element, Fab, FabArray, MemoryKind};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::exchange_error::FabExchangeError;
    pub use crate::exec::ExecBackend;
    pub use crate::geometry::{IndexBox, IndexType, IntVect, Periodicity};
    pub use crate::layout::{BoxArray, DistributionMapping, DomainDecomposition};
}
