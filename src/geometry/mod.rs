//! Index-space geometry: integer vectors, boxes, centering and periodicity.

pub mod index_box;
pub mod int_vect;
pub mod periodicity;

pub use index_box::IndexBox;
pub use int_vect::{IndexType, IntVect, SPACEDIM};
pub use periodicity::Periodicity;
