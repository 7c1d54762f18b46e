//! Periodic wraparound as a lattice of shift vectors.

use super::index_box::IndexBox;
use super::int_vect::{IntVect, SPACEDIM};
use itertools::iproduct;
use serde::{Deserialize, Serialize};

/// Extent used for non-periodic directions of [`Periodicity::domain`]. Kept well
/// away from `i32::MAX` so halo growth cannot overflow.
const UNBOUNDED: i32 = i32::MAX / 4;

/// Periodic extent of the problem domain.
///
/// A period of zero in a direction means the domain does not wrap there. The
/// periodic domain starts at `origin`, so a domain `[0, 9]` periodic in x has
/// `period = (10, 0, 0)` and `origin = (0, 0, 0)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Periodicity {
    period: IntVect,
    origin: IntVect,
}

impl Periodicity {
    /// No wraparound in any direction.
    pub const fn non_periodic() -> Self {
        Self {
            period: IntVect::zero(),
            origin: IntVect::zero(),
        }
    }

    /// Periodic domain of extent `period` starting at the origin.
    pub fn new(period: IntVect) -> Self {
        Self {
            period: period.elem_max(&IntVect::zero()),
            origin: IntVect::zero(),
        }
    }

    /// Periodicity of `domain` in the directions flagged in `is_periodic`.
    pub fn from_domain(domain: &IndexBox, is_periodic: [bool; SPACEDIM]) -> Self {
        let period = IntVect(std::array::from_fn(|d| {
            if is_periodic[d] {
                domain.length(d) as i32
            } else {
                0
            }
        }));
        Self {
            period,
            origin: domain.small_end(),
        }
    }

    pub fn period(&self) -> IntVect {
        self.period
    }

    pub fn is_periodic(&self, dir: usize) -> bool {
        self.period[dir] > 0
    }

    pub fn is_any_periodic(&self) -> bool {
        (0..SPACEDIM).any(|d| self.is_periodic(d))
    }

    /// The periodic domain; unbounded in non-periodic directions.
    pub fn domain(&self) -> IndexBox {
        let lo = IntVect(std::array::from_fn(|d| {
            if self.is_periodic(d) {
                self.origin[d]
            } else {
                -UNBOUNDED
            }
        }));
        let hi = IntVect(std::array::from_fn(|d| {
            if self.is_periodic(d) {
                self.origin[d] + self.period[d] - 1
            } else {
                UNBOUNDED
            }
        }));
        IndexBox::new(lo, hi)
    }

    /// All lattice shifts `(i*px, j*py, k*pz)` with `i, j, k` in `-1..=1` over the
    /// periodic directions, x outermost. The zero shift is always present.
    pub fn shift_vectors(&self) -> Vec<IntVect> {
        self.shift_vectors_reaching(IntVect::zero())
    }

    /// Lattice shifts far enough to bring every cell within `reach` of the
    /// periodic domain back into it: `|i| <= max(1, ceil(reach / period))` per
    /// periodic direction, x outermost, ascending.
    pub fn shift_vectors_reaching(&self, reach: IntVect) -> Vec<IntVect> {
        let range = |d: usize| -> Vec<i32> {
            if self.is_periodic(d) {
                let p = self.period[d];
                let m = ((reach[d].max(0) + p - 1) / p).max(1);
                (-m..=m).collect()
            } else {
                vec![0]
            }
        };
        iproduct!(range(0), range(1), range(2))
            .map(|(i, j, k)| {
                IntVect::new(i * self.period[0], j * self.period[1], k * self.period[2])
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_periodic_has_only_zero_shift() {
        assert_eq!(Periodicity::non_periodic().shift_vectors(), vec![IntVect::zero()]);
    }

    #[test]
    fn shifts_enumerate_lattice_neighbours() {
        let p = Periodicity::new(IntVect::new(10, 8, 0));
        let shifts = p.shift_vectors();
        assert_eq!(shifts.len(), 9);
        assert!(shifts.contains(&IntVect::zero()));
        assert_eq!(shifts[0], IntVect::new(-10, -8, 0));
        assert_eq!(shifts[8], IntVect::new(10, 8, 0));
    }

    #[test]
    fn wide_reach_adds_more_images() {
        let p = Periodicity::new(IntVect::new(4, 0, 0));
        let xs: Vec<i32> = p
            .shift_vectors_reaching(IntVect::new(5, 7, 0))
            .iter()
            .map(|v| v[0])
            .collect();
        assert_eq!(xs, vec![-8, -4, 0, 4, 8]);
        assert_eq!(p.shift_vectors_reaching(IntVect::new(4, 0, 0)).len(), 3);
    }

    #[test]
    fn domain_respects_origin() {
        let dom = IndexBox::line(-4, 5);
        let p = Periodicity::from_domain(&dom, [true, false, false]);
        assert_eq!(p.period(), IntVect::new(10, 0, 0));
        let d = p.domain();
        assert_eq!(d.small_end()[0], -4);
        assert_eq!(d.big_end()[0], 5);
        assert!(!p.is_periodic(1));
    }
}
