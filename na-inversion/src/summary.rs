use std::fmt;

use nd::{Array, ArrayView, Axis, Ix1, Ix2};
use rayon::prelude::*;

use crate::ensemble::{ensemble_covariance, ensemble_mean};
use crate::transform::{covariance_to_constrained, to_constrained, Prior};
use crate::{Error, Result};

/// Snapshot of one completed iteration, everything in physical units.
///
/// `ensemble_covariance` and `ensemble_variance` come from the delta method
/// (see `transform::covariance_to_constrained`) and are approximate.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationSummary {
  pub iteration: usize,
  /// `Nθ × Nensemble`, member `j` in column `j`.
  pub parameters: Array<f64, Ix2>,
  pub ensemble_mean: Array<f64, Ix1>,
  pub ensemble_covariance: Array<f64, Ix2>,
  pub ensemble_variance: Array<f64, Ix1>,
  /// `mean_i (y_i - G_ij)²`, entry `j` for member `j`.
  pub mean_square_errors: Array<f64, Ix1>,
}

impl IterationSummary {
  pub fn build(iteration: usize,
               priors: &[Prior],
               ensemble: ArrayView<f64, Ix2>,
               output: ArrayView<f64, Ix2>,
               observations: ArrayView<f64, Ix1>) -> Result<IterationSummary>
  {
    if ensemble.ncols() < 2 {
      return Err(Error::EnsembleSize(ensemble.ncols()));
    }
    if output.ncols() != ensemble.ncols() {
      return Err(Error::DimensionMismatch {
        what: "forward map output columns",
        expected: ensemble.ncols(),
        found: output.ncols(),
      });
    }
    if output.nrows() != observations.len() {
      return Err(Error::DimensionMismatch {
        what: "forward map output rows",
        expected: observations.len(),
        found: output.nrows(),
      });
    }

    let parameters = to_constrained(priors, &ensemble)?;
    let ensemble_mean = to_constrained(priors, &ensemble_mean(ensemble))?;
    let ensemble_covariance = covariance_to_constrained(priors,
                                                        ensemble,
                                                        ensemble_covariance(ensemble).view())?;
    let ensemble_variance = ensemble_covariance.diag().to_owned();

    let nobs = observations.len() as f64;
    let mean_square_errors: Vec<f64> = output.axis_iter(Axis(1))
      .into_par_iter()
      .map(|g| {
        g.iter()
          .zip(observations.iter())
          .map(|(g, y)| (y - g) * (y - g) )
          .sum::<f64>() / nobs
      })
      .collect();

    Ok(IterationSummary {
      iteration,
      parameters,
      ensemble_mean,
      ensemble_covariance,
      ensemble_variance,
      mean_square_errors: Array::from(mean_square_errors),
    })
  }

  pub fn ensemble_std(&self) -> Array<f64, Ix1> {
    self.ensemble_variance.mapv(f64::sqrt)
  }

  /// Member with the smallest mean-square error.
  pub fn best_member(&self) -> Option<usize> {
    self.mean_square_errors
      .iter()
      .enumerate()
      .filter(|(_, e)| e.is_finite() )
      .min_by(|(_, a), (_, b)| a.total_cmp(b) )
      .map(|(j, _)| j )
  }

  pub fn mean_of_mean_square_errors(&self) -> f64 {
    self.mean_square_errors.sum() / self.mean_square_errors.len() as f64
  }
}

impl fmt::Display for IterationSummary {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    writeln!(f, "iteration {} ({} members)", self.iteration, self.parameters.ncols())?;
    for (i, (mean, std)) in self.ensemble_mean.iter()
      .zip(self.ensemble_std().iter())
      .enumerate()
    {
      writeln!(f, "  θ[{}] = {:.6e} ± {:.3e}", i, mean, std)?;
    }
    let min = self.best_member()
      .map(|j| self.mean_square_errors[j] )
      .unwrap_or(f64::NAN);
    write!(f, "  mse: mean {:.6e}, min {:.6e}", self.mean_of_mean_square_errors(), min)
  }
}
