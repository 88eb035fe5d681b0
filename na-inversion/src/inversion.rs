//! The inversion driver: owns the ensemble, the observation, the random
//! source and the append-only list of iteration summaries.

use nd::{Array, ArrayView, Ix1, Ix2};
use rand::{Rng, SeedableRng};
use rand_isaac::Isaac64Rng;
use tracing::info;

use na_core::{ForwardMap, ModelStats};
use nla_factorize::Cholesky;

use crate::eki;
use crate::ensemble::{initial_ensemble, EnsembleState};
use crate::resample::{ResampleReport, Resampler};
use crate::summary::IterationSummary;
use crate::transform::{to_constrained, Prior};
use crate::utils::NoiseCovariance;
use crate::{Error, Result};

/// Everything needed to set up an inversion.
#[derive(Debug, Clone)]
pub struct Init<F> {
  pub priors: Vec<Prior>,
  pub ensemble_count: usize,
  pub noise_covariance: NoiseCovariance,
  pub forward_map: F,
  /// The normalized observation `y`.
  pub observations: Array<f64, Ix1>,
  pub resampler: Resampler,
}

pub struct InversionState<F, R = Isaac64Rng> {
  iteration: usize,
  priors: Vec<Prior>,
  state: EnsembleState,
  summaries: Vec<IterationSummary>,
  resampler: Resampler,
  last_report: ResampleReport,

  observations: Array<f64, Ix1>,
  noise_covariance: Array<f64, Ix2>,
  /// lower Cholesky factor of `noise_covariance`
  noise_factor: Array<f64, Ix2>,

  model: ModelStats<F>,
  rand: R,
}

impl<F> InversionState<F, Isaac64Rng>
  where F: ForwardMap,
{
  pub fn seeded(init: Init<F>, seed: u64) -> Result<Self> {
    InversionState::construct(init, Isaac64Rng::seed_from_u64(seed))
  }
}

impl<F, R> InversionState<F, R>
  where F: ForwardMap,
        R: Rng,
{
  /// Draws the prior ensemble, evaluates and repairs it and records the
  /// iteration 0 summary.
  pub fn construct(init: Init<F>, mut rand: R) -> Result<Self> {
    let Init {
      priors,
      ensemble_count,
      noise_covariance,
      forward_map,
      observations,
      resampler,
    } = init;

    if ensemble_count < 2 {
      return Err(Error::EnsembleSize(ensemble_count));
    }
    resampler.validate()?;
    if priors.is_empty() {
      return Err(Error::DimensionMismatch {
        what: "priors",
        expected: 1,
        found: 0,
      });
    }

    let nobs = observations.len();
    let noise_covariance = noise_covariance.to_matrix(nobs)?;
    let noise_factor = noise_covariance
      .clone()
      .l_lstar()?
      .reversed_axes();

    let mut model = ModelStats::from(forward_map);

    let mut ensemble = initial_ensemble(&priors, ensemble_count, &mut rand);
    let mut output = model.evaluate(ensemble.view())?;
    check_output_rows(nobs, output.view())?;

    let last_report = resampler.resample(&mut ensemble, &mut output,
                                         &priors, &mut model, &mut rand)?;
    let summary = IterationSummary::build(0, &priors,
                                          ensemble.view(), output.view(),
                                          observations.view())?;
    log_summary(&summary);

    Ok(InversionState {
      iteration: 0,
      priors,
      state: EnsembleState { ensemble, output, },
      summaries: vec![summary],
      resampler,
      last_report,

      observations,
      noise_covariance,
      noise_factor,

      model,
      rand,
    })
  }

  /// Runs `iterations` EKI steps and returns the constrained ensemble mean
  /// of the last summary.
  ///
  /// Resumable: a later call continues from the last recorded iteration. A
  /// step which fails (e.g. with `ExcessiveFailure`) leaves the state at the
  /// last completed iteration.
  pub fn iterate(&mut self, iterations: usize) -> Result<Array<f64, Ix1>> {
    for _ in 0..iterations {
      self.step()?;
    }

    Ok(self.best_parameters())
  }

  /// One EKI step; see `iterate`.
  pub fn step(&mut self) -> Result<&IterationSummary> {
    let mut ensemble = eki::update(self.state.ensemble.view(),
                                   self.state.output.view(),
                                   self.observations.view(),
                                   self.noise_covariance.view(),
                                   self.noise_factor.view(),
                                   &mut self.rand)?;

    let mut output = self.model.evaluate(ensemble.view())?;
    check_output_rows(self.observations.len(), output.view())?;

    let report = self.resampler.resample(&mut ensemble, &mut output,
                                         &self.priors, &mut self.model,
                                         &mut self.rand)?;

    let iteration = self.iteration + 1;
    let summary = IterationSummary::build(iteration, &self.priors,
                                          ensemble.view(), output.view(),
                                          self.observations.view())?;
    log_summary(&summary);

    self.iteration = iteration;
    self.state = EnsembleState { ensemble, output, };
    self.last_report = report;
    self.summaries.push(summary);

    Ok(&self.summaries[self.iteration])
  }

  pub fn iteration(&self) -> usize { self.iteration }
  pub fn priors(&self) -> &[Prior] { &self.priors }
  pub fn summaries(&self) -> &[IterationSummary] { &self.summaries }
  pub fn summary(&self, iteration: usize) -> Option<&IterationSummary> {
    self.summaries.get(iteration)
  }
  pub fn ensemble_state(&self) -> &EnsembleState { &self.state }
  pub fn ensemble(&self) -> ArrayView<f64, Ix2> { self.state.ensemble() }
  pub fn forward_map_output(&self) -> ArrayView<f64, Ix2> { self.state.output() }
  pub fn constrained_ensemble(&self) -> Result<Array<f64, Ix2>> {
    to_constrained(&self.priors, &self.state.ensemble)
  }
  pub fn observations(&self) -> ArrayView<f64, Ix1> { self.observations.view() }
  pub fn noise_covariance(&self) -> ArrayView<f64, Ix2> { self.noise_covariance.view() }
  pub fn resampler(&self) -> &Resampler { &self.resampler }
  /// What the resampler did after the most recent evaluation.
  pub fn last_resample(&self) -> &ResampleReport { &self.last_report }
  pub fn forward_map_stats(&self) -> &ModelStats<F> { &self.model }

  /// Constrained ensemble mean of the latest summary.
  pub fn best_parameters(&self) -> Array<f64, Ix1> {
    self.summaries[self.iteration].ensemble_mean.clone()
  }
}

fn check_output_rows(nobs: usize, output: ArrayView<f64, Ix2>) -> Result<()> {
  if output.nrows() != nobs {
    return Err(Error::DimensionMismatch {
      what: "forward map output rows vs. observations",
      expected: nobs,
      found: output.nrows(),
    });
  }
  Ok(())
}

fn log_summary(summary: &IterationSummary) {
  let min = summary.best_member()
    .map(|j| summary.mean_square_errors[j] )
    .unwrap_or(f64::NAN);
  info!(iteration = summary.iteration,
        mean_mse = summary.mean_of_mean_square_errors(),
        min_mse = min,
        "iteration complete");
}
