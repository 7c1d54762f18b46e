//! Runtime configuration of exchanges and tiling.

use crate::data::comm_buffer::MemoryKind;
use crate::exec::ExecBackend;
use crate::geometry::IntVect;
use serde::{Deserialize, Serialize};

/// Knobs read by the exchange engine and the tile iterator.
///
/// Deserializes from partial documents: missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub backend: ExecBackend,
    /// Accounting bucket of send/receive/staging buffers.
    pub buffer_memory: MemoryKind,
    /// Permit the per-cell lock fallback of the device backend. When false,
    /// exchanges that would need it fail at setup.
    pub allow_cell_locks: bool,
    /// Default tile size of `FabArray::for_each_tile`.
    pub tile_size: IntVect,
    /// Components moved per exchange round; larger requests take several
    /// rounds. Zero means unlimited.
    pub max_comp: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            backend: ExecBackend::default(),
            buffer_memory: MemoryKind::Host,
            allow_cell_locks: true,
            tile_size: IntVect::new(1_024_000, 8, 8),
            max_comp: 25,
        }
    }
}

impl ExchangeConfig {
    pub fn with_backend(mut self, backend: ExecBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Component rounds `(offset, count)` covering `ncomp` components.
    pub fn component_rounds(&self, ncomp: usize) -> Vec<(usize, usize)> {
        let step = if self.max_comp == 0 { ncomp.max(1) } else { self.max_comp };
        (0..ncomp)
            .step_by(step)
            .map(|start| (start, step.min(ncomp - start)))
            .collect()
    }
}
