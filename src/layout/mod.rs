//! Domain decomposition: box arrays, distribution mappings and their identities.

pub mod box_array;
pub mod decomposition;
pub mod distribution;
pub mod ref_id;

pub use box_array::BoxArray;
pub use decomposition::DomainDecomposition;
pub use distribution::DistributionMapping;
pub use ref_id::{BDKey, RefId};
