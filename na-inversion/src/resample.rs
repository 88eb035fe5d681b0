//! Failure detection and ensemble repair, run after every forward map
//! evaluation so that the Kalman update never sees a non-finite output.
//!
//! The forward map only accepts full ensemble-sized batches, so replacement
//! candidates are always drawn and evaluated `Nensemble` at a time; finite
//! survivors are harvested across as many batches as it takes.

use nd::{Array, ArrayView, Axis, Ix1, Ix2};
use rand::Rng;
use tracing::{debug, warn};

use na_core::{ForwardMap, ModelStats};
use nla_factorize::{Cholesky, FactorizeError};

use crate::ensemble::{ensemble_covariance, ensemble_mean, failed_members};
use crate::transform::{to_constrained, Prior};
use crate::utils::make_2d_randn;
use crate::{Error, Result};

const JITTER_ATTEMPTS: usize = 12;

/// Which members the replacement Gaussian is fit to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitDistribution {
  /// Every column of the unconstrained ensemble.
  #[default]
  FullEnsemble,
  /// Only the columns whose forward map output is finite. Falls back to the
  /// full ensemble when fewer than two members succeeded.
  SuccessfulOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resampler {
  /// Repair failed members only; otherwise the whole ensemble is redrawn
  /// after every evaluation.
  pub only_failed_particles: bool,
  /// Failure fractions strictly above this abort the inversion.
  pub acceptable_failure_fraction: f64,
  pub fit_distribution: FitDistribution,
  /// Upper bound on candidate batches per call.
  pub max_batches: usize,
}
impl Default for Resampler {
  fn default() -> Self {
    Resampler {
      only_failed_particles: true,
      acceptable_failure_fraction: 0.0,
      fit_distribution: FitDistribution::FullEnsemble,
      max_batches: 100,
    }
  }
}

/// What a call to `Resampler::resample` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResampleReport {
  pub failed: Vec<usize>,
  /// Columns overwritten with fresh candidates.
  pub replaced: Vec<usize>,
  pub batches: usize,
  /// Candidates thrown away because their output wasn't finite.
  pub discarded: usize,
}

impl Resampler {
  /// Rejects an `acceptable_failure_fraction` outside `[0, 1]` (or NaN).
  pub fn validate(&self) -> Result<()> {
    let f = self.acceptable_failure_fraction;
    if !(0.0..=1.0).contains(&f) {
      return Err(Error::FailureFraction(f));
    }
    Ok(())
  }

  pub fn resample<F, R>(&self,
                        ensemble: &mut Array<f64, Ix2>,
                        output: &mut Array<f64, Ix2>,
                        priors: &[Prior],
                        model: &mut ModelStats<F>,
                        rand: &mut R) -> Result<ResampleReport>
    where F: ForwardMap,
          R: Rng + ?Sized,
  {
    self.validate()?;

    let n = ensemble.ncols();
    let failed = failed_members(output.view());
    let fraction = failed.len() as f64 / n as f64;

    if fraction > self.acceptable_failure_fraction {
      let columns = ensemble.select(Axis(1), &failed);
      return Err(Error::ExcessiveFailure {
        fraction,
        parameters: to_constrained(priors, &columns)?,
        failed,
      });
    }

    let mut report = ResampleReport {
      failed,
      ..Default::default()
    };
    if report.failed.is_empty() && self.only_failed_particles {
      return Ok(report);
    }

    if !report.failed.is_empty() {
      warn!(failed = report.failed.len(),
            members = n,
            "forward map failed for {:.1}% of the ensemble; resampling",
            fraction * 100.0);
    }

    let targets: Vec<usize> = if self.only_failed_particles {
      report.failed.clone()
    } else {
      (0..n).collect()
    };

    let (mean, lower) = self.fit(ensemble.view(), &report.failed)?;

    let mut survivors: Vec<(Array<f64, Ix1>, Array<f64, Ix1>)> =
      Vec::with_capacity(targets.len());
    while survivors.len() < targets.len() {
      if report.batches == self.max_batches {
        return Err(Error::ResamplingExhausted {
          batches: report.batches,
          collected: survivors.len(),
          needed: targets.len(),
        });
      }
      report.batches += 1;

      let candidates = make_2d_randn(mean.view(), lower.view(), n, rand);
      let candidate_output = model.evaluate(candidates.view())?;
      if candidate_output.nrows() != output.nrows() {
        return Err(Error::DimensionMismatch {
          what: "forward map output rows",
          expected: output.nrows(),
          found: candidate_output.nrows(),
        });
      }

      let before = survivors.len();
      for (x, g) in candidates.axis_iter(Axis(1))
        .zip(candidate_output.axis_iter(Axis(1)))
      {
        if g.iter().all(|v| v.is_finite() ) {
          survivors.push((x.to_owned(), g.to_owned()));
        } else {
          report.discarded += 1;
        }
      }
      debug!(batch = report.batches,
             accepted = survivors.len() - before,
             needed = targets.len(),
             "resampling batch evaluated");
    }

    for (&column, (x, g)) in targets.iter().zip(survivors.into_iter()) {
      ensemble.column_mut(column).assign(&x);
      output.column_mut(column).assign(&g);
    }
    report.replaced = targets;

    Ok(report)
  }

  /// Mean and lower Cholesky factor of the replacement Gaussian.
  fn fit(&self, ensemble: ArrayView<f64, Ix2>, failed: &[usize])
         -> Result<(Array<f64, Ix1>, Array<f64, Ix2>)>
  {
    let n = ensemble.ncols();
    let columns = match self.fit_distribution {
      FitDistribution::SuccessfulOnly if n - failed.len() >= 2 => {
        let successful: Vec<usize> = (0..n)
          .filter(|j| !failed.contains(j) )
          .collect();
        ensemble.select(Axis(1), &successful)
      },
      _ => ensemble.to_owned(),
    };

    let mean = ensemble_mean(columns.view());
    let covariance = ensemble_covariance(columns.view());
    let lower = jittered_lower_factor(covariance)?;

    Ok((mean, lower))
  }
}

/// Lower Cholesky factor of `c`, nudging the diagonal up when the sample
/// covariance is singular (e.g. fewer members than parameters).
fn jittered_lower_factor(c: Array<f64, Ix2>) -> Result<Array<f64, Ix2>> {
  let n = c.nrows();
  let trace = c.diag().sum();
  let base = if trace > 0.0 && trace.is_finite() { trace / n as f64 } else { 1.0 };

  let mut last = FactorizeError::NotPositiveDefinite(0);
  for attempt in 0..JITTER_ATTEMPTS {
    let mut trial = c.clone();
    if attempt > 0 {
      let jitter = base * 1e-10 * 10f64.powi(attempt as i32 - 1);
      trial.diag_mut().mapv_inplace(|v| v + jitter );
    }
    match trial.l_lstar() {
      Ok(r) => return Ok(r.reversed_axes()),
      Err(e) => last = e,
    }
  }

  Err(last.into())
}
