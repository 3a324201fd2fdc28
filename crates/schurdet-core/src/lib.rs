//! # Schurdet Core
//!
//! The numerical backbone of the schurdet workspace. This crate holds the
//! data model and every piece of pure numerics the distributed determinant
//! needs; it knows nothing about ranks or messages.
//!
//! ## Modules
//!
//! - [`types`]: Matrix alias, the four quadrant [`Blocks`](types::Blocks)
//!   and the row/column [`WorkAssignment`](types::WorkAssignment).
//! - [`policy`]: Shape policies deciding which dimensions may be split.
//! - [`partition`]: Quadrant splitting and load-balanced row assignment.
//! - [`linalg`]: Dense determinant, solve, inverse and product via `faer`.
//! - [`schur`]: Schur complement and the final determinant combination.
//! - [`laplace`]: Cofactor-expansion reference determinant.
//! - [`parsers`]: Plain-text matrix file reader.

pub mod laplace;
pub mod linalg;
pub mod parsers;
pub mod partition;
pub mod policy;
pub mod schur;
pub mod types;

pub use linalg::LinAlgError;
pub use parsers::ParseError;
pub use policy::{ShapeError, ShapePolicy};
pub use types::{Blocks, Matrix, WorkAssignment};
