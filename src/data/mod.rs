//! Field data: element types, per-box storage, distributed arrays and the
//! buffers that carry them between ranks.

pub mod cell_op;
pub mod comm_buffer;
pub mod element;
pub mod fab;
pub mod fab_array;
pub mod storage;

pub use cell_op::{AddCell, CellOp, CopyCell, CopyOp};
pub use comm_buffer::{CommBuffer, MemUsage, MemoryKind};
pub use element::Element;
pub use fab::Fab;
pub use fab_array::{CopySpec, FabArray, TileMut};
pub use storage::{Storage, VecStorage};
