//! Quadrant splitting and load-balanced row assignment.
//!
//! Two partitioners feed the distributed protocol:
//!
//! - [`split_blocks`] cuts an $N \times N$ matrix into the four
//!   $n_2 \times n_2$ quadrants $A, B, C, D$ by contiguous slicing.
//! - [`balanced_assignment`] hands $n$ indices to $W$ slots so that the
//!   first $n \bmod W$ slots get one extra index. Both the scatter of rows of
//!   C (or columns of the identity) and the gather of the results follow
//!   this layout, so every index is claimed by exactly one slot.

use ndarray::s;

use crate::policy::{ShapeError, ShapePolicy};
use crate::types::{Blocks, Matrix, WorkAssignment};

/// Split `m` into `[[A, B], [C, D]]` after checking it against `policy`.
pub fn split_blocks(m: &Matrix, policy: ShapePolicy) -> Result<Blocks, ShapeError> {
    let n2 = policy.split_order(m.nrows(), m.ncols())?;
    Ok(Blocks {
        a: m.slice(s![..n2, ..n2]).to_owned(),
        b: m.slice(s![..n2, n2..]).to_owned(),
        c: m.slice(s![n2.., ..n2]).to_owned(),
        d: m.slice(s![n2.., n2..]).to_owned(),
    })
}

/// Assign `total` indices to `slots` contiguous groups, balanced to within one.
///
/// # Panics
/// Panics if `slots` is zero. Callers validate the topology first.
pub fn balanced_assignment(total: usize, slots: usize) -> WorkAssignment {
    assert!(slots > 0, "at least one slot is required");
    let base = total / slots;
    let remainder = total % slots;
    let counts = (0..slots)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect();
    WorkAssignment::from_counts(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_split_reference_matrix() {
        let m = array![
            [2.0, 3.0, 1.0, 0.0],
            [1.0, 4.0, 2.0, 1.0],
            [5.0, 1.0, 3.0, 2.0],
            [0.0, 2.0, 1.0, 1.0],
        ];
        let blocks = split_blocks(&m, ShapePolicy::PowerOfTwo).unwrap();
        assert_eq!(blocks.a, array![[2.0, 3.0], [1.0, 4.0]]);
        assert_eq!(blocks.b, array![[1.0, 0.0], [2.0, 1.0]]);
        assert_eq!(blocks.c, array![[5.0, 1.0], [0.0, 2.0]]);
        assert_eq!(blocks.d, array![[3.0, 2.0], [1.0, 1.0]]);
    }

    #[test]
    fn test_split_rejects_odd_order() {
        let m = Matrix::zeros((3, 3));
        assert_eq!(
            split_blocks(&m, ShapePolicy::EvenBalanced),
            Err(ShapeError::OddDimension(3))
        );
    }

    #[test]
    fn test_remainder_goes_to_first_slots() {
        let layout = balanced_assignment(7, 3);
        assert_eq!(layout.counts(), &[3, 2, 2]);
        assert_eq!(layout.offsets(), &[0, 3, 5]);
    }

    #[test]
    fn test_more_slots_than_rows() {
        let layout = balanced_assignment(2, 4);
        assert_eq!(layout.counts(), &[1, 1, 0, 0]);
        assert_eq!(layout.range(3), 2..2);
    }

    #[test]
    #[should_panic(expected = "at least one slot")]
    fn test_zero_slots_panics() {
        balanced_assignment(4, 0);
    }
}
