//! Execution backends and the primitives the exchange engine runs on.
//!
//! Parallel helpers use rayon when the `rayon` feature is on and fall back to
//! plain loops otherwise, so callers never need their own `cfg`s.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// How tag lists are applied to destination storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecBackend {
    /// Tags one after another in ascending order.
    Serial,
    /// One task per destination fab; tags of a fab applied in order.
    Threaded,
    /// Every cell of every tag is its own work item.
    Device,
}

impl Default for ExecBackend {
    fn default() -> Self {
        if cfg!(feature = "rayon") {
            ExecBackend::Threaded
        } else {
            ExecBackend::Serial
        }
    }
}

/// One spin lock per destination cell.
///
/// Used by the [`ExecBackend::Device`] path when tags overlap and the element
/// type has no atomic form of the write rule.
#[derive(Debug)]
pub struct CellLockMask {
    locks: Vec<AtomicU32>,
}

impl CellLockMask {
    pub fn new(ncells: usize) -> Self {
        Self {
            locks: (0..ncells).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Run `f` while holding the lock of `cell`.
    #[inline]
    pub fn with_lock<R>(&self, cell: usize, f: impl FnOnce() -> R) -> R {
        let lock = &self.locks[cell];
        while lock
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        let out = f();
        lock.store(0, Ordering::Release);
        out
    }
}

/// Raw pointer that may cross threads. Whoever dereferences it guarantees
/// that concurrent accesses are disjoint or atomic.
#[derive(Debug)]
pub(crate) struct SendPtr<T>(*mut T);

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SendPtr<T> {}

unsafe impl<T: Send> Send for SendPtr<T> {}
unsafe impl<T: Send> Sync for SendPtr<T> {}

impl<T> SendPtr<T> {
    pub(crate) fn new(ptr: *mut T) -> Self {
        Self(ptr)
    }

    #[inline]
    pub(crate) fn get(self) -> *mut T {
        self.0
    }
}

/// Call `f(i)` for `i in 0..n`, in parallel when available.
pub(crate) fn for_each_index<F>(n: usize, f: F)
where
    F: Fn(usize) + Send + Sync,
{
    #[cfg(feature = "rayon")]
    (0..n).into_par_iter().for_each(f);
    #[cfg(not(feature = "rayon"))]
    (0..n).for_each(f);
}

/// Call `f` on every element of `items`, in parallel when available,
/// returning the first error.
pub(crate) fn try_for_each_mut<T, E, F>(items: &mut [T], f: F) -> Result<(), E>
where
    T: Send,
    E: Send,
    F: Fn(usize, &mut T) -> Result<(), E> + Send + Sync,
{
    #[cfg(feature = "rayon")]
    return items
        .par_iter_mut()
        .enumerate()
        .try_for_each(|(i, item)| f(i, item));
    #[cfg(not(feature = "rayon"))]
    return items
        .iter_mut()
        .enumerate()
        .try_for_each(|(i, item)| f(i, item));
}

/// Call `f` on every element of `items`, in parallel when available.
pub(crate) fn for_each_ref<T, F>(items: &[T], f: F)
where
    T: Sync,
    F: Fn(&T) + Send + Sync,
{
    #[cfg(feature = "rayon")]
    items.par_iter().for_each(f);
    #[cfg(not(feature = "rayon"))]
    items.iter().for_each(f);
}
