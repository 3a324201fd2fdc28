//! Shape policies for the block decomposition.
//!
//! Three historical rules decided whether a matrix could be split and how
//! many workers a run needed. They are expressed here as one configurable
//! [`ShapePolicy`] instead of three copies of the same program.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a matrix cannot be split under the active policy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShapeError {
    #[error("Matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("Matrix is empty")]
    Empty,

    #[error("Matrix of order {0} is too small to split into four blocks")]
    TooSmall(usize),

    #[error("Matrix order {0} is odd; it must split into two equal halves")]
    OddDimension(usize),

    #[error("Matrix order {0} is not a power of two (2, 4, 8, ...)")]
    NotPowerOfTwo(usize),
}

/// Which matrix orders and worker counts a run accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShapePolicy {
    /// $N$ must be a power of two; any number of workers.
    PowerOfTwo,
    /// $N$ must be even and there must be exactly one worker per row of C.
    EvenExact,
    /// $N$ must be even; rows are balanced over however many workers exist.
    #[default]
    EvenBalanced,
}

impl ShapePolicy {
    pub const ALL: [ShapePolicy; 3] = [Self::PowerOfTwo, Self::EvenExact, Self::EvenBalanced];

    /// Check the matrix shape and return the block order $n_2 = N / 2$.
    pub fn split_order(&self, rows: usize, cols: usize) -> Result<usize, ShapeError> {
        if rows != cols {
            return Err(ShapeError::NotSquare { rows, cols });
        }
        let n = rows;
        if n == 0 {
            return Err(ShapeError::Empty);
        }
        match self {
            Self::PowerOfTwo => {
                if !n.is_power_of_two() {
                    return Err(ShapeError::NotPowerOfTwo(n));
                }
                if n < 2 {
                    return Err(ShapeError::TooSmall(n));
                }
            }
            Self::EvenExact | Self::EvenBalanced => {
                if n % 2 != 0 {
                    return Err(ShapeError::OddDimension(n));
                }
            }
        }
        Ok(n / 2)
    }

    /// Whether the worker count must equal the block order.
    pub fn requires_exact_workers(&self) -> bool {
        matches!(self, Self::EvenExact)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::PowerOfTwo => "N must be a power of two; rows balanced over any number of workers",
            Self::EvenExact => "N must be even; exactly N/2 workers, one row of C each",
            Self::EvenBalanced => "N must be even; rows balanced over any number of workers",
        }
    }
}

impl fmt::Display for ShapePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PowerOfTwo => "power-of-two",
            Self::EvenExact => "even-exact",
            Self::EvenBalanced => "even-balanced",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_of_two_policy() {
        let p = ShapePolicy::PowerOfTwo;
        assert_eq!(p.split_order(8, 8), Ok(4));
        assert_eq!(p.split_order(6, 6), Err(ShapeError::NotPowerOfTwo(6)));
        assert_eq!(p.split_order(1, 1), Err(ShapeError::TooSmall(1)));
    }

    #[test]
    fn test_even_policies_accept_non_powers() {
        for p in [ShapePolicy::EvenExact, ShapePolicy::EvenBalanced] {
            assert_eq!(p.split_order(6, 6), Ok(3));
            assert_eq!(p.split_order(5, 5), Err(ShapeError::OddDimension(5)));
        }
    }

    #[test]
    fn test_default_policy_is_even_balanced() {
        assert_eq!(ShapePolicy::default(), ShapePolicy::EvenBalanced);
    }

    #[test]
    fn test_rejects_non_square_and_empty() {
        let p = ShapePolicy::default();
        assert_eq!(
            p.split_order(4, 6),
            Err(ShapeError::NotSquare { rows: 4, cols: 6 })
        );
        assert_eq!(p.split_order(0, 0), Err(ShapeError::Empty));
    }

    #[test]
    fn test_policy_names_round_trip_through_display() {
        for p in ShapePolicy::ALL {
            let parsed: ShapePolicy =
                serde::Deserialize::deserialize(serde::de::value::StrDeserializer::<
                    serde::de::value::Error,
                >::new(&p.to_string()))
                .unwrap();
            assert_eq!(parsed, p);
        }
    }
}
