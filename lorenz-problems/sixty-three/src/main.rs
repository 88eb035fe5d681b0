
extern crate ndarray as nd;

use std::env;
use std::error::Error;

use nd::arr1;
use rand::SeedableRng;
use rand_isaac::Isaac64Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use na_core::{ForwardMap, Observation};
use na_inversion::ensemble::initial_ensemble;
use na_inversion::transform::to_constrained;
use na_inversion::{Constrained, Init, InversionState, Prior, Resampler};
use util::data::{Normalization, Normalized, SyntheticObservation};
use util::progress::IterationProgress;

use sixty_three::{L63Model, L63Statistics};

const ENSEMBLE_COUNT: usize = 40;
const ITERATIONS: usize = 10;
const PILOT_COUNT: usize = 20;
const DEFAULT_SEED: u64 = 1;
/// In normalized output units.
const OBSERVATION_NOISE: f64 = 0.05;

fn main() -> Result<(), Box<dyn Error>> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .init();

  let seed = match env::args().nth(1) {
    Some(arg) => arg.parse()?,
    None => DEFAULT_SEED,
  };

  let truth = L63Model::default();
  let names = vec!["sigma", "rho", "beta"];
  let priors = vec![
    Prior::new(8.0, 2.0, 0.0, 20.0)?,
    Prior::new(25.0, 4.0, 10.0, 40.0)?,
    Prior::new(2.0, 0.5, 0.5, 5.0)?,
  ];
  let statistics = L63Statistics::new(truth, names.clone());

  // Scale each statistic by its spread under the prior.
  let mut rand = Isaac64Rng::seed_from_u64(seed ^ 0x5eed);
  let pilot = to_constrained(&priors, &initial_ensemble(&priors, PILOT_COUNT, &mut rand))?;
  let normalization = Normalization::fit(statistics.evaluate(pilot.view())?.view())?;
  info!(?normalization, "fitted output normalization");

  let physical = Normalized {
    normalization,
    map: statistics,
  };

  let observations = SyntheticObservation {
    forward_map: &physical,
    truth: arr1(&[truth.sigma, truth.rho, truth.beta]),
    batch: 1,
    noise_std: OBSERVATION_NOISE,
    seed: seed.wrapping_add(1),
  }.observation_vector()?;

  let init = Init {
    forward_map: Constrained::new(priors.clone(), physical),
    priors,
    ensemble_count: ENSEMBLE_COUNT,
    noise_covariance: (OBSERVATION_NOISE * OBSERVATION_NOISE).into(),
    observations,
    resampler: Resampler {
      acceptable_failure_fraction: 0.5,
      ..Default::default()
    },
  };

  println!("Starting inversion (seed {})", seed);
  let mut state = InversionState::seeded(init, seed)?;

  let mut progress = IterationProgress::new(ITERATIONS, "l63 eki".into());
  for _ in 0..ITERATIONS {
    let summary = state.step()?;
    progress.record(summary);
  }
  progress.finish();

  for summary in state.summaries() {
    println!("{}", summary);
  }

  let best = state.best_parameters();
  for (name, (fit, truth)) in names.iter()
    .zip(best.iter().zip([truth.sigma, truth.rho, truth.beta].iter()))
  {
    println!("{:>6}: fit {:.4}, truth {:.4}", name, fit, truth);
  }

  let stats = state.forward_map_stats();
  println!("forward map: {} calls, {} member evaluations",
           stats.calls, stats.member_evaluations);

  Ok(())
}
