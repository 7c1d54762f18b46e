//! CellOp trait: how an incoming value combines with the destination cell.

use super::element::Element;
use serde::{Deserialize, Serialize};

/// Write rule applied per destination cell.
pub trait CellOp: Copy + Send + Sync + 'static {
    /// Runtime tag of this rule.
    const OP: CopyOp;

    /// Merge `incoming` into `local`.
    fn apply<T: Element>(local: &mut T, incoming: T);

    /// Merge `incoming` into the cell at `ptr` with an atomic instruction.
    ///
    /// # Safety
    /// See [`Element::atomic_store`] and [`Element::atomic_add`].
    unsafe fn apply_atomic<T: Element>(ptr: *mut T, incoming: T);

    /// True when `T` can apply this rule atomically.
    fn is_atomic_for<T: Element>() -> bool;
}

/// Overwrite: the destination takes the incoming value.
#[derive(Copy, Clone, Debug, Default)]
pub struct CopyCell;

impl CellOp for CopyCell {
    const OP: CopyOp = CopyOp::Overwrite;

    #[inline]
    fn apply<T: Element>(local: &mut T, incoming: T) {
        *local = incoming;
    }

    #[inline]
    unsafe fn apply_atomic<T: Element>(ptr: *mut T, incoming: T) {
        unsafe { T::atomic_store(ptr, incoming) }
    }

    fn is_atomic_for<T: Element>() -> bool {
        T::STORE_ATOMIC
    }
}

/// Accumulate: the incoming value is added to the destination.
#[derive(Copy, Clone, Debug, Default)]
pub struct AddCell;

impl CellOp for AddCell {
    const OP: CopyOp = CopyOp::Accumulate;

    #[inline]
    fn apply<T: Element>(local: &mut T, incoming: T) {
        *local += incoming;
    }

    #[inline]
    unsafe fn apply_atomic<T: Element>(ptr: *mut T, incoming: T) {
        unsafe { T::atomic_add(ptr, incoming) }
    }

    fn is_atomic_for<T: Element>() -> bool {
        T::HAS_ATOMIC_ADD
    }
}

/// Runtime choice between [`CopyCell`] and [`AddCell`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CopyOp {
    #[default]
    Overwrite,
    Accumulate,
}

impl CopyOp {
    pub fn apply<T: Element>(self, local: &mut T, incoming: T) {
        match self {
            CopyOp::Overwrite => CopyCell::apply(local, incoming),
            CopyOp::Accumulate => AddCell::apply(local, incoming),
        }
    }

    /// True when `T` can apply this rule atomically.
    pub fn is_atomic_for<T: Element>(self) -> bool {
        match self {
            CopyOp::Overwrite => CopyCell::is_atomic_for::<T>(),
            CopyOp::Accumulate => AddCell::is_atomic_for::<T>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_and_accumulate() {
        let mut x = 2.0f64;
        CopyOp::Accumulate.apply(&mut x, 3.0);
        assert_eq!(x, 5.0);
        CopyOp::Overwrite.apply(&mut x, 1.0);
        assert_eq!(x, 1.0);
        assert_eq!(AddCell::OP, CopyOp::Accumulate);
    }
}
