//! Integer vectors and cell/node centering.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Index, IndexMut, Mul, Neg, Sub, SubAssign};

/// Number of spatial dimensions. Lower-dimensional problems leave the unused
/// directions at extent one (`[0, 0]`).
pub const SPACEDIM: usize = 3;

/// A point or offset in integer index space.
///
/// `Ord` is lexicographic with x compared first, then y, then z. This is the
/// ordering used by the deterministic tag order.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct IntVect(pub [i32; SPACEDIM]);

impl IntVect {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self([x, y, z])
    }

    pub const fn splat(v: i32) -> Self {
        Self([v; SPACEDIM])
    }

    pub const fn zero() -> Self {
        Self([0; SPACEDIM])
    }

    /// Unit vector along `dir`.
    pub fn unit(dir: usize) -> Self {
        let mut v = Self::zero();
        v.0[dir] = 1;
        v
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&c| c == 0)
    }

    pub fn all_ge(&self, rhs: &Self) -> bool {
        self.0.iter().zip(rhs.0.iter()).all(|(a, b)| a >= b)
    }

    pub fn all_le(&self, rhs: &Self) -> bool {
        self.0.iter().zip(rhs.0.iter()).all(|(a, b)| a <= b)
    }

    /// Component-wise minimum. `Ord::min` would compare lexicographically.
    pub fn elem_min(&self, rhs: &Self) -> Self {
        Self(std::array::from_fn(|d| self.0[d].min(rhs.0[d])))
    }

    /// Component-wise maximum.
    pub fn elem_max(&self, rhs: &Self) -> Self {
        Self(std::array::from_fn(|d| self.0[d].max(rhs.0[d])))
    }

    /// Component-wise floor division (rounds towards negative infinity).
    pub fn div_floor(&self, rhs: &Self) -> Self {
        Self(std::array::from_fn(|d| self.0[d].div_euclid(rhs.0[d])))
    }

    pub fn product(&self) -> i64 {
        self.0.iter().map(|&c| i64::from(c)).product()
    }
}

impl From<[i32; SPACEDIM]> for IntVect {
    fn from(v: [i32; SPACEDIM]) -> Self {
        Self(v)
    }
}

impl Index<usize> for IntVect {
    type Output = i32;
    #[inline]
    fn index(&self, dir: usize) -> &i32 {
        &self.0[dir]
    }
}

impl IndexMut<usize> for IntVect {
    #[inline]
    fn index_mut(&mut self, dir: usize) -> &mut i32 {
        &mut self.0[dir]
    }
}

impl Add for IntVect {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(std::array::from_fn(|d| self.0[d] + rhs.0[d]))
    }
}

impl AddAssign for IntVect {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for IntVect {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(std::array::from_fn(|d| self.0[d] - rhs.0[d]))
    }
}

impl SubAssign for IntVect {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for IntVect {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self(std::array::from_fn(|d| -self.0[d]))
    }
}

impl Mul<i32> for IntVect {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: i32) -> Self {
        Self(std::array::from_fn(|d| self.0[d] * rhs))
    }
}

impl fmt::Display for IntVect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.0[0], self.0[1], self.0[2])
    }
}

/// Centering of an index space, per direction: cell-centered or nodal.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexType {
    nodal: [bool; SPACEDIM],
}

impl IndexType {
    pub const fn cell() -> Self {
        Self {
            nodal: [false; SPACEDIM],
        }
    }

    pub const fn node() -> Self {
        Self {
            nodal: [true; SPACEDIM],
        }
    }

    pub const fn new(nodal: [bool; SPACEDIM]) -> Self {
        Self { nodal }
    }

    pub fn is_nodal(&self, dir: usize) -> bool {
        self.nodal[dir]
    }

    pub fn is_cell_centered(&self) -> bool {
        self.nodal.iter().all(|n| !n)
    }

    /// 1 in every nodal direction, 0 otherwise.
    pub fn node_offset(&self) -> IntVect {
        IntVect(std::array::from_fn(|d| i32::from(self.nodal[d])))
    }
}
