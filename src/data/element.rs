//! Element types that can live in a fab and travel in a message.

use bytemuck::Pod;
use num_traits::Zero;
use std::fmt::Debug;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};

/// Scalar stored per cell and component.
///
/// `STORE_ATOMIC` and `HAS_ATOMIC_ADD` advertise whether concurrent writers
/// can use [`atomic_store`](Self::atomic_store) and
/// [`atomic_add`](Self::atomic_add); when they are false the exchange engine
/// falls back to per-cell locks on the device backend.
pub trait Element: Pod + Zero + AddAssign + PartialEq + Debug + Send + Sync + 'static {
    const STORE_ATOMIC: bool = false;
    const HAS_ATOMIC_ADD: bool = false;

    /// Store `v` at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be valid and aligned. Unless `STORE_ATOMIC` is true, no other
    /// thread may access the cell concurrently.
    unsafe fn atomic_store(ptr: *mut Self, v: Self) {
        unsafe { ptr.write(v) }
    }

    /// Add `v` to the value at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be valid and aligned. Unless `HAS_ATOMIC_ADD` is true, no
    /// other thread may access the cell concurrently.
    unsafe fn atomic_add(ptr: *mut Self, v: Self) {
        unsafe { *ptr += v }
    }
}

macro_rules! impl_int_element {
    ($($t:ty => $atomic:ty),* $(,)?) => {$(
        impl Element for $t {
            const STORE_ATOMIC: bool = true;
            const HAS_ATOMIC_ADD: bool = true;

            unsafe fn atomic_store(ptr: *mut Self, v: Self) {
                unsafe { <$atomic>::from_ptr(ptr) }.store(v, Ordering::Relaxed);
            }

            unsafe fn atomic_add(ptr: *mut Self, v: Self) {
                unsafe { <$atomic>::from_ptr(ptr) }.fetch_add(v, Ordering::Relaxed);
            }
        }
    )*};
}

impl_int_element!(i32 => AtomicI32, i64 => AtomicI64, u32 => AtomicU32, u64 => AtomicU64);

macro_rules! impl_float_element {
    ($($t:ty => $bits:ty, $atomic:ty),* $(,)?) => {$(
        impl Element for $t {
            const STORE_ATOMIC: bool = true;
            const HAS_ATOMIC_ADD: bool = true;

            unsafe fn atomic_store(ptr: *mut Self, v: Self) {
                unsafe { <$atomic>::from_ptr(ptr.cast::<$bits>()) }
                    .store(v.to_bits(), Ordering::Relaxed);
            }

            unsafe fn atomic_add(ptr: *mut Self, v: Self) {
                let cell = unsafe { <$atomic>::from_ptr(ptr.cast::<$bits>()) };
                let mut cur = cell.load(Ordering::Relaxed);
                loop {
                    let next = (<$t>::from_bits(cur) + v).to_bits();
                    match cell.compare_exchange_weak(
                        cur,
                        next,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(seen) => cur = seen,
                    }
                }
            }
        }
    )*};
}

impl_float_element!(f32 => u32, AtomicU32, f64 => u64, AtomicU64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_atomic_add_accumulates() {
        let mut x = 1.25f64;
        unsafe {
            f64::atomic_add(&mut x, 2.0);
            f64::atomic_add(&mut x, -0.25);
        }
        assert_eq!(x, 3.0);
    }

    #[test]
    fn int_atomic_store_overwrites() {
        let mut x = 5i64;
        unsafe { i64::atomic_store(&mut x, -9) };
        assert_eq!(x, -9);
    }
}
