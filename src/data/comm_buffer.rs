//! Communication buffers and the memory accounting behind them.

use super::storage::{Storage, VecStorage};
use crate::exchange_error::FabExchangeError;
use hashbrown::HashMap;
use num_traits::Zero;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Where a buffer is meant to live. Host memory backs all kinds; the kind
/// only selects the accounting bucket.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    #[default]
    Host,
    PinnedHost,
    Device,
    Managed,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Usage {
    bytes: usize,
    hwm: usize,
}

/// Bytes currently held and high-water marks, per [`MemoryKind`].
#[derive(Debug, Default)]
pub struct MemUsage {
    inner: Mutex<HashMap<MemoryKind, Usage>>,
}

impl MemUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_alloc(&self, kind: MemoryKind, bytes: usize) {
        let mut map = self.inner.lock();
        let u = map.entry(kind).or_default();
        u.bytes += bytes;
        u.hwm = u.hwm.max(u.bytes);
    }

    pub(crate) fn record_free(&self, kind: MemoryKind, bytes: usize) {
        let mut map = self.inner.lock();
        let u = map.entry(kind).or_default();
        u.bytes = u.bytes.saturating_sub(bytes);
    }

    pub fn bytes(&self, kind: MemoryKind) -> usize {
        self.inner.lock().get(&kind).map_or(0, |u| u.bytes)
    }

    pub fn high_water(&self, kind: MemoryKind) -> usize {
        self.inner.lock().get(&kind).map_or(0, |u| u.hwm)
    }

    pub fn report(&self) {
        let map = self.inner.lock();
        for (kind, u) in map.iter() {
            log::info!("{:?} communication memory: {} bytes (max {})", kind, u.bytes, u.hwm);
        }
    }
}

/// Flat element buffer owned by one exchange. Its bytes are accounted in a
/// [`MemUsage`] from allocation until drop.
#[derive(Debug)]
pub struct CommBuffer<'m, T> {
    data: VecStorage<T>,
    kind: MemoryKind,
    usage: &'m MemUsage,
}

impl<'m, T: Copy + Zero> CommBuffer<'m, T> {
    /// Allocate `len` zeroed elements, failing with `BufferAllocation`
    /// rather than aborting when memory is short.
    pub fn alloc(
        len: usize,
        kind: MemoryKind,
        usage: &'m MemUsage,
    ) -> Result<Self, FabExchangeError> {
        let data = VecStorage::try_with_len(len, T::zero())?;
        usage.record_alloc(kind, len * std::mem::size_of::<T>());
        Ok(Self { data, kind, usage })
    }
}

impl<T> CommBuffer<'_, T> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    pub fn as_slice(&self) -> &[T] {
        self.data.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.data.as_mut_slice()
    }
}

impl<T> Drop for CommBuffer<'_, T> {
    fn drop(&mut self) {
        self.usage
            .record_free(self.kind, self.data.len() * std::mem::size_of::<T>());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_follows_buffer_lifetime() {
        let usage = MemUsage::new();
        {
            let a = CommBuffer::<f64>::alloc(10, MemoryKind::PinnedHost, &usage).unwrap();
            let _b = CommBuffer::<f64>::alloc(5, MemoryKind::PinnedHost, &usage).unwrap();
            assert_eq!(a.len(), 10);
            assert_eq!(usage.bytes(MemoryKind::PinnedHost), 120);
        }
        assert_eq!(usage.bytes(MemoryKind::PinnedHost), 0);
        assert_eq!(usage.high_water(MemoryKind::PinnedHost), 120);
        assert_eq!(usage.bytes(MemoryKind::Host), 0);
    }

    #[test]
    fn failed_allocation_is_not_accounted() {
        let usage = MemUsage::new();
        let err = CommBuffer::<u64>::alloc(usize::MAX / 4, MemoryKind::Host, &usage).unwrap_err();
        assert!(matches!(err, FabExchangeError::BufferAllocation { .. }));
        assert_eq!(usage.high_water(MemoryKind::Host), 0);
    }
}
