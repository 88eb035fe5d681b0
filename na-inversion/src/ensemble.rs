//! Ensemble storage and the sample statistics shared by the update, the
//! resampler and the summaries.

use nd::{Array, ArrayView, Axis, Ix1, Ix2};
use rand::Rng;
use rand::distributions::Distribution;

use crate::transform::{to_unconstrained, Prior};

/// The unconstrained ensemble, one member per column, together with the
/// forward map output for exactly those members.
#[derive(Debug, Clone)]
pub struct EnsembleState {
  /// `Nθ × Nensemble`
  pub(crate) ensemble: Array<f64, Ix2>,
  /// `Nobs × Nensemble`
  pub(crate) output: Array<f64, Ix2>,
}
impl EnsembleState {
  pub fn ensemble(&self) -> ArrayView<f64, Ix2> { self.ensemble.view() }
  pub fn output(&self) -> ArrayView<f64, Ix2> { self.output.view() }
  pub fn ensemble_count(&self) -> usize { self.ensemble.ncols() }
}

/// Draws the iteration 0 ensemble: every coordinate independently from its
/// prior's unconstrained distribution.
pub fn initial_ensemble<R>(priors: &[Prior], ensemble_count: usize, rand: &mut R)
  -> Array<f64, Ix2>
  where R: Rng + ?Sized,
{
  let mut ensemble = Array::zeros((priors.len(), ensemble_count));
  for (mut row, prior) in ensemble.axis_iter_mut(Axis(0)).zip(priors.iter()) {
    let dist = to_unconstrained(prior);
    for v in row.iter_mut() {
      *v = dist.sample(rand);
    }
  }

  ensemble
}

pub fn ensemble_mean(ensemble: ArrayView<f64, Ix2>) -> Array<f64, Ix1> {
  let n = ensemble.ncols() as f64;
  ensemble.sum_axis(Axis(1)) / n
}

/// Subtracts the ensemble mean from every column.
pub fn centered(ensemble: ArrayView<f64, Ix2>) -> Array<f64, Ix2> {
  let mean = ensemble_mean(ensemble);
  let mut out = ensemble.to_owned();
  for mut column in out.columns_mut() {
    column -= &mean;
  }
  out
}

/// Unbiased sample cross covariance of two ensembles with the same member
/// count: `cov(a, b) = Â B̂ᵀ / (N - 1)`.
pub fn cross_covariance(a: ArrayView<f64, Ix2>, b: ArrayView<f64, Ix2>) -> Array<f64, Ix2> {
  assert_eq!(a.ncols(), b.ncols(), "ensembles differ in member count");
  let n = a.ncols();
  assert!(n > 1, "need at least two members for a sample covariance");

  let a_hat = centered(a);
  let b_hat = centered(b);
  a_hat.dot(&b_hat.t()) / (n - 1) as f64
}

pub fn ensemble_covariance(ensemble: ArrayView<f64, Ix2>) -> Array<f64, Ix2> {
  cross_covariance(ensemble, ensemble)
}

/// Members whose output column holds anything non-finite.
pub fn failed_members(output: ArrayView<f64, Ix2>) -> Vec<usize> {
  output.axis_iter(Axis(1))
    .enumerate()
    .filter(|(_, column)| column.iter().any(|v| !v.is_finite() ) )
    .map(|(j, _)| j )
    .collect()
}
