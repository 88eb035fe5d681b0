//! The stochastic Ensemble Kalman Inversion transform.
//!
//! Each member moves toward a perturbed copy of the observation,
//!
//! ```text
//! X'_j = X_j + K (y + η_j - G_j),   K = C_θG (C_GG + Γy)⁻¹,   η_j ~ N(0, Γy)
//! ```
//!
//! with every covariance estimated from the ensemble itself; no derivative
//! of the forward map is needed.

use nd::{Array, ArrayView, Ix1, Ix2};
use rand::Rng;
use tracing::debug;

use nla_factorize::{cholesky_solve, Cholesky};

use crate::ensemble::cross_covariance;
use crate::utils::make_2d_randn;
use crate::{Error, Result};

/// `K = C_θG (C_GG + Γy)⁻¹`, via a Cholesky solve of the symmetric system
/// `(C_GG + Γy) Kᵀ = C_θGᵀ`.
pub fn kalman_gain(ensemble: ArrayView<f64, Ix2>,
                   output: ArrayView<f64, Ix2>,
                   noise_covariance: ArrayView<f64, Ix2>) -> Result<Array<f64, Ix2>>
{
  check_shapes(ensemble, output, noise_covariance)?;

  let c_theta_g = cross_covariance(ensemble, output);
  let mut s = cross_covariance(output, output);
  s += &noise_covariance;

  let r = s.l_lstar()?;
  let gain_t = cholesky_solve(&r, &c_theta_g.t())?;

  Ok(gain_t.reversed_axes())
}

/// The update with caller supplied perturbations, one column per member.
pub fn update_with_perturbations(ensemble: ArrayView<f64, Ix2>,
                                 output: ArrayView<f64, Ix2>,
                                 observations: ArrayView<f64, Ix1>,
                                 noise_covariance: ArrayView<f64, Ix2>,
                                 perturbations: ArrayView<f64, Ix2>)
  -> Result<Array<f64, Ix2>>
{
  assert!(output.iter().all(|v| v.is_finite() ),
          "non-finite forward map output reached the Kalman update");

  if observations.len() != output.nrows() {
    return Err(Error::DimensionMismatch {
      what: "observations vs. forward map output rows",
      expected: output.nrows(),
      found: observations.len(),
    });
  }
  if perturbations.dim() != output.dim() {
    return Err(Error::DimensionMismatch {
      what: "perturbation columns",
      expected: output.ncols(),
      found: perturbations.ncols(),
    });
  }

  let gain = kalman_gain(ensemble, output, noise_covariance)?;

  let mut innovation = perturbations.to_owned();
  innovation -= &output;
  for mut column in innovation.columns_mut() {
    column += &observations;
  }

  debug!(members = ensemble.ncols(),
         gain_norm = gain.iter().map(|v| v * v ).sum::<f64>().sqrt(),
         "kalman gain computed");

  Ok(&ensemble + &gain.dot(&innovation))
}

/// One stochastic EKI step. `noise_factor` is the lower Cholesky factor of
/// `noise_covariance`, used to draw `η_j ~ N(0, Γy)`.
pub fn update<R>(ensemble: ArrayView<f64, Ix2>,
                 output: ArrayView<f64, Ix2>,
                 observations: ArrayView<f64, Ix1>,
                 noise_covariance: ArrayView<f64, Ix2>,
                 noise_factor: ArrayView<f64, Ix2>,
                 rand: &mut R) -> Result<Array<f64, Ix2>>
  where R: Rng + ?Sized,
{
  let zero = Array::zeros(observations.len());
  let perturbations = make_2d_randn(zero.view(), noise_factor, ensemble.ncols(), rand);

  update_with_perturbations(ensemble, output, observations,
                            noise_covariance, perturbations.view())
}

fn check_shapes(ensemble: ArrayView<f64, Ix2>,
                output: ArrayView<f64, Ix2>,
                noise_covariance: ArrayView<f64, Ix2>) -> Result<()>
{
  if ensemble.ncols() != output.ncols() {
    return Err(Error::DimensionMismatch {
      what: "forward map output columns",
      expected: ensemble.ncols(),
      found: output.ncols(),
    });
  }
  let nobs = output.nrows();
  if noise_covariance.dim() != (nobs, nobs) {
    return Err(Error::DimensionMismatch {
      what: "noise covariance vs. forward map output rows",
      expected: nobs,
      found: noise_covariance.nrows(),
    });
  }
  if ensemble.ncols() < 2 {
    return Err(Error::EnsembleSize(ensemble.ncols()));
  }
  Ok(())
}
