//! Core types shared across the schurdet workspace.
//!
//! This module defines the dense matrix alias, the quadrant decomposition of
//! a square matrix and the count/offset layout used to hand out rows (or
//! identity columns) to the members of a process group.

use std::ops::Range;

use ndarray::{s, Array2};
use serde::Serialize;

/// Dense, row-major, double precision matrix.
pub type Matrix = Array2<f64>;

/// The four equal quadrants of a square matrix $M = [[A, B], [C, D]]$.
///
/// Each block is an owned copy of size $n_2 \times n_2$; they are read-only
/// once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Blocks {
    /// Top-left quadrant. Must be non-singular for the Schur path.
    pub a: Matrix,
    /// Top-right quadrant.
    pub b: Matrix,
    /// Bottom-left quadrant, distributed row-wise to the workers.
    pub c: Matrix,
    /// Bottom-right quadrant.
    pub d: Matrix,
}

impl Blocks {
    /// Order $n_2$ of every block.
    pub fn half(&self) -> usize {
        self.a.nrows()
    }

    /// Concatenate `[[A, B], [C, D]]` back into the full matrix.
    pub fn reassemble(&self) -> Matrix {
        let n2 = self.half();
        let mut m = Matrix::zeros((2 * n2, 2 * n2));
        m.slice_mut(s![..n2, ..n2]).assign(&self.a);
        m.slice_mut(s![..n2, n2..]).assign(&self.b);
        m.slice_mut(s![n2.., ..n2]).assign(&self.c);
        m.slice_mut(s![n2.., n2..]).assign(&self.d);
        m
    }
}

/// Ordered partition of `0..total` into one contiguous group per slot.
///
/// `counts[i]` rows go to slot `i`, starting at `offsets[i]`. Offsets are the
/// prefix sums of counts, so the groups are disjoint and cover the whole
/// range. The same layout drives both the scatter and the gather of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkAssignment {
    counts: Vec<usize>,
    offsets: Vec<usize>,
}

impl WorkAssignment {
    pub(crate) fn from_counts(counts: Vec<usize>) -> Self {
        let offsets = counts
            .iter()
            .scan(0, |acc, &c| {
                let start = *acc;
                *acc += c;
                Some(start)
            })
            .collect();
        Self { counts, offsets }
    }

    /// Number of slots (workers or ranks) in the layout.
    pub fn slots(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Total number of indices covered.
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Contiguous index range owned by `slot`.
    pub fn range(&self, slot: usize) -> Range<usize> {
        let start = self.offsets[slot];
        start..start + self.counts[slot]
    }

    /// Indices owned by `slot`, in the order they must be written back.
    pub fn indices(&self, slot: usize) -> Vec<usize> {
        self.range(slot).collect()
    }
}
