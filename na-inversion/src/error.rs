
use nd::{Array, Ix2};
use thiserror::Error;

use nla_factorize::FactorizeError;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid prior (mean = {mean}, std = {std}, bounds = ({lower}, {upper})): {reason}")]
  InvalidPrior {
    mean: f64,
    std: f64,
    lower: f64,
    upper: f64,
    reason: &'static str,
  },
  #[error("dimension mismatch ({what}): expected {expected}, found {found}")]
  DimensionMismatch {
    what: &'static str,
    expected: usize,
    found: usize,
  },
  #[error("an ensemble needs at least two members, got {0}")]
  EnsembleSize(usize),
  #[error("acceptable failure fraction must lie in [0, 1], got {0}")]
  FailureFraction(f64),
  /// Aborts the inversion. `parameters` holds the failed members in
  /// physical units, one column per entry of `failed`.
  #[error("{:.1}% of the ensemble failed (members {failed:?})", fraction * 100.0)]
  ExcessiveFailure {
    fraction: f64,
    failed: Vec<usize>,
    parameters: Array<f64, Ix2>,
  },
  #[error("resampling gave up after {batches} batches with {collected} of {needed} replacements")]
  ResamplingExhausted {
    batches: usize,
    collected: usize,
    needed: usize,
  },
  #[error(transparent)]
  Factorization(#[from] FactorizeError),
  #[error(transparent)]
  Core(#[from] na_core::Error),
}
