//! Pluggable storage for fab and buffer contents.
//!
//! Fabs and communication buffers keep their elements in a flat buffer behind
//! this trait. Host memory is the only backing implemented; device or pinned
//! allocations are tagged through `MemoryKind` and staged through the same
//! slice interface.

use core::fmt::{self, Debug};

use crate::exchange_error::FabExchangeError;

/// Contiguous, indexable storage for `V` with slice access.
pub trait Storage<V>: Debug {
    /// Construct a buffer of `len`, filled with `fill`.
    fn with_len(len: usize, fill: V) -> Self
    where
        V: Clone;

    /// Like [`with_len`](Self::with_len) but reports allocation failure.
    fn try_with_len(len: usize, fill: V) -> Result<Self, FabExchangeError>
    where
        V: Clone,
        Self: Sized;

    /// Current length in elements.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entire read-only buffer.
    fn as_slice(&self) -> &[V];

    /// Entire mutable buffer.
    fn as_mut_slice(&mut self) -> &mut [V];

    /// Copy `src` into the range `[offset .. offset + src.len())`.
    fn write_at(&mut self, offset: usize, src: &[V]) -> Result<(), FabExchangeError>
    where
        V: Clone,
    {
        let len = src.len();
        let end = offset
            .checked_add(len)
            .ok_or(FabExchangeError::BufferSliceMismatch { offset, len })?;
        let dst = self
            .as_mut_slice()
            .get_mut(offset..end)
            .ok_or(FabExchangeError::BufferSliceMismatch { offset, len })?;
        dst.clone_from_slice(src);
        Ok(())
    }

    /// Read-only view of `[offset .. offset + len)`.
    fn slice_at(&self, offset: usize, len: usize) -> Result<&[V], FabExchangeError> {
        let end = offset
            .checked_add(len)
            .ok_or(FabExchangeError::BufferSliceMismatch { offset, len })?;
        self.as_slice()
            .get(offset..end)
            .ok_or(FabExchangeError::BufferSliceMismatch { offset, len })
    }
}

/// `Vec`-backed storage (default).
#[derive(Clone)]
pub struct VecStorage<V>(pub(crate) Vec<V>);

impl<V> Debug for VecStorage<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VecStorage")
            .field("len", &self.0.len())
            .finish()
    }
}

impl<V> Storage<V> for VecStorage<V> {
    fn with_len(len: usize, fill: V) -> Self
    where
        V: Clone,
    {
        Self(vec![fill; len])
    }

    fn try_with_len(len: usize, fill: V) -> Result<Self, FabExchangeError>
    where
        V: Clone,
    {
        let mut v = Vec::new();
        v.try_reserve_exact(len)
            .map_err(|_| FabExchangeError::BufferAllocation {
                bytes: len.saturating_mul(std::mem::size_of::<V>()),
            })?;
        v.resize(len, fill);
        Ok(Self(v))
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn as_slice(&self) -> &[V] {
        &self.0
    }

    fn as_mut_slice(&mut self) -> &mut [V] {
        &mut self.0
    }
}

impl<V> From<Vec<V>> for VecStorage<V> {
    fn from(v: Vec<V>) -> Self {
        Self(v)
    }
}

impl<V> VecStorage<V> {
    pub fn into_inner(self) -> Vec<V> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_at_checks_bounds() {
        let mut s = VecStorage::with_len(4, 0u8);
        s.write_at(2, &[7, 8]).unwrap();
        assert_eq!(s.as_slice(), &[0, 0, 7, 8]);
        assert!(matches!(
            s.write_at(3, &[1, 2]),
            Err(FabExchangeError::BufferSliceMismatch { offset: 3, len: 2 })
        ));
        assert!(s.slice_at(usize::MAX, 2).is_err());
    }

    #[test]
    fn oversized_allocation_fails_cleanly() {
        let err = VecStorage::<u64>::try_with_len(usize::MAX / 4, 0).unwrap_err();
        assert!(matches!(err, FabExchangeError::BufferAllocation { .. }));
    }
}
