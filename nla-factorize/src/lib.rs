#[macro_use]
extern crate ndarray as nd;
extern crate num_traits;

pub use cholesky::*;

pub mod cholesky;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FactorizeError {
  #[error("matrix must be square, got {0}x{1}")]
  NotSquare(usize, usize),
  /// Pivot `k` was not strictly positive (or not finite).
  #[error("matrix is not positive definite (pivot {0})")]
  NotPositiveDefinite(usize),
  #[error("right hand side has {found} rows, expected {expected}")]
  Rhs { expected: usize, found: usize, },
}
