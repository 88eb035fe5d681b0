extern crate na_core;
extern crate na_inversion;
extern crate ndarray as nd;

use std::cell::Cell;

use approx::assert_abs_diff_eq;
use nd::{arr1, s, Array, Array1, Array2, ArrayView, Ix2};

use na_core::{ForwardMap, ModelStats};
use na_inversion::eki::kalman_gain;
use na_inversion::ensemble::ensemble_covariance;
use na_inversion::{Constrained, Error, Init, InversionState, IterationSummary, Prior,
                   Resampler};

/// First `nobs` rows of the (unconstrained) parameter vector, zero padded.
struct PaddedIdentity {
  nobs: usize,
}
impl ForwardMap for PaddedIdentity {
  fn evaluate(&self, x: ArrayView<f64, Ix2>) -> na_core::Result<Array<f64, Ix2>> {
    let mut g = Array2::zeros((self.nobs, x.ncols()));
    let rows = x.nrows().min(self.nobs);
    g.slice_mut(s![..rows, ..]).assign(&x.slice(s![..rows, ..]));
    Ok(g)
  }
}

/// `[θ0, θ1, θ0 θ1, θ0², θ1²]` over physical parameters.
#[derive(Clone)]
struct Quadratic;
impl ForwardMap for Quadratic {
  fn evaluate(&self, theta: ArrayView<f64, Ix2>) -> na_core::Result<Array<f64, Ix2>> {
    let mut g = Array2::zeros((5, theta.ncols()));
    for (j, t) in theta.columns().into_iter().enumerate() {
      g[[0, j]] = t[0];
      g[[1, j]] = t[1];
      g[[2, j]] = t[0] * t[1];
      g[[3, j]] = t[0] * t[0];
      g[[4, j]] = t[1] * t[1];
    }
    Ok(g)
  }
}

/// Like `Quadratic`, but every member fails once `armed` is set.
struct Tripwire {
  armed: Cell<bool>,
}
impl ForwardMap for Tripwire {
  fn evaluate(&self, theta: ArrayView<f64, Ix2>) -> na_core::Result<Array<f64, Ix2>> {
    let mut g = Quadratic.evaluate(theta)?;
    if self.armed.get() {
      g.fill(f64::NAN);
    }
    Ok(g)
  }
}

fn quadratic_priors() -> Vec<Prior> {
  vec![
    Prior::new(1.5, 0.5, 0.0, 4.0).unwrap(),
    Prior::new(2.5, 0.5, 0.0, 4.0).unwrap(),
  ]
}

fn quadratic_truth() -> Array1<f64> {
  arr1(&[2.0, 1.6])
}

fn quadratic_init(ensemble_count: usize) -> Init<Constrained<Quadratic>> {
  let priors = quadratic_priors();
  let y = Quadratic
    .evaluate(quadratic_truth().insert_axis(nd::Axis(1)).view())
    .unwrap()
    .column(0)
    .to_owned();

  Init {
    forward_map: Constrained::new(priors.clone(), Quadratic),
    priors,
    ensemble_count,
    noise_covariance: 0.01.into(),
    observations: y,
    resampler: Resampler::default(),
  }
}

/// Forward map error at a single physical parameter vector, evaluated as a
/// full batch.
fn mse_at(theta: &Array1<f64>, y: ArrayView<f64, nd::Ix1>, ensemble_count: usize) -> f64 {
  let batch = theta
    .view()
    .insert_axis(nd::Axis(1))
    .broadcast((theta.len(), ensemble_count))
    .unwrap()
    .to_owned();
  let g = Quadratic.evaluate(batch.view()).unwrap();
  let col = g.column(0);
  col.iter()
    .zip(y.iter())
    .map(|(g, y)| (g - y) * (g - y) )
    .sum::<f64>() / y.len() as f64
}

#[test]
fn exact_parameters_have_zero_error() {
  let priors = quadratic_priors();
  let truth = quadratic_truth();
  let unconstrained = arr1(&[
    priors[0].to_unconstrained_value(truth[0]),
    priors[1].to_unconstrained_value(truth[1]),
  ]);
  let x = unconstrained
    .insert_axis(nd::Axis(1))
    .broadcast((2, 16))
    .unwrap()
    .to_owned();

  let mut model = ModelStats::from(Constrained::new(priors.clone(), Quadratic));
  let g = model.evaluate(x.view()).unwrap();
  for j in 1..16 {
    assert_eq!(g.column(j), g.column(0));
  }

  let y = quadratic_init(16).observations;
  let summary = IterationSummary::build(0, &priors, x.view(), g.view(), y.view()).unwrap();
  for &e in summary.mean_square_errors.iter() {
    assert_abs_diff_eq!(e, 0.0, epsilon = 1e-18);
  }
  assert_abs_diff_eq!(summary.ensemble_mean[0], 2.0, epsilon = 1e-9);
  assert_abs_diff_eq!(summary.ensemble_mean[1], 1.6, epsilon = 1e-9);
}

#[test]
fn construct_records_iteration_zero() {
  let state = InversionState::seeded(quadratic_init(30), 1).unwrap();
  assert_eq!(state.iteration(), 0);
  assert_eq!(state.summaries().len(), 1);

  let s0 = state.summary(0).unwrap();
  assert_eq!(s0.iteration, 0);
  assert_eq!(s0.parameters.dim(), (2, 30));
  assert_eq!(s0.mean_square_errors.len(), 30);
  assert_eq!(state.ensemble().dim(), (2, 30));
  assert_eq!(state.forward_map_output().dim(), (5, 30));
  assert_eq!(state.forward_map_stats().calls, 1);
  assert_eq!(state.forward_map_stats().member_evaluations, 30);
  assert_eq!(state.ensemble_state().ensemble_count(), 30);
  assert!(state.last_resample().failed.is_empty());
  assert_eq!(state.resampler(), &Resampler::default());
  assert_eq!(state.constrained_ensemble().unwrap(), s0.parameters);
  assert_eq!(state.noise_covariance(), Array2::<f64>::eye(5) * 0.01);
}

#[test]
fn iterate_zero_is_a_no_op() {
  let mut state = InversionState::seeded(quadratic_init(20), 2).unwrap();
  let x0 = state.ensemble().to_owned();
  let best = state.iterate(0).unwrap();

  assert_eq!(state.iteration(), 0);
  assert_eq!(state.summaries().len(), 1);
  assert_eq!(state.ensemble(), x0);
  assert_eq!(best, state.summary(0).unwrap().ensemble_mean);
}

#[test]
fn iterate_resumes_and_is_reproducible() {
  let mut resumed = InversionState::seeded(quadratic_init(25), 3).unwrap();
  resumed.iterate(2).unwrap();
  let first_two = resumed.summaries().to_vec();
  let best = resumed.iterate(3).unwrap();

  assert_eq!(resumed.iteration(), 5);
  assert_eq!(resumed.summaries().len(), 6);
  for (k, s) in resumed.summaries().iter().enumerate() {
    assert_eq!(s.iteration, k);
  }
  // earlier summaries are never rewritten
  assert_eq!(&resumed.summaries()[..3], &first_two[..]);
  assert_eq!(best, resumed.summary(5).unwrap().ensemble_mean);
  assert_eq!(resumed.forward_map_stats().calls, 6);

  let mut straight = InversionState::seeded(quadratic_init(25), 3).unwrap();
  let straight_best = straight.iterate(5).unwrap();
  assert_eq!(straight_best, best);
  assert_eq!(straight.summaries(), resumed.summaries());
}

#[test]
fn output_rows_must_match_observations() {
  let mut init = quadratic_init(10);
  init.observations = Array1::zeros(4);
  match InversionState::seeded(init, 4) {
    Err(Error::DimensionMismatch { expected: 4, found: 5, .. }) => {},
    Err(e) => panic!("unexpected error {}", e),
    Ok(_) => panic!("mismatched forward map accepted"),
  }
}

#[test]
fn invalid_noise_covariance() {
  let mut init = quadratic_init(10);
  init.noise_covariance = 0.0.into();
  assert!(matches!(InversionState::seeded(init, 4), Err(Error::Factorization(_))));

  let mut init = quadratic_init(10);
  init.ensemble_count = 1;
  assert!(matches!(InversionState::seeded(init, 4), Err(Error::EnsembleSize(1))));
}

#[test]
fn failure_fraction_is_validated_at_construction() {
  for &f in [-0.1, 1.01, f64::NAN].iter() {
    let mut init = quadratic_init(10);
    init.resampler.acceptable_failure_fraction = f;
    match InversionState::seeded(init, 4) {
      Err(Error::FailureFraction(v)) => assert!(v.to_bits() == f.to_bits()),
      Err(e) => panic!("unexpected error {}", e),
      Ok(_) => panic!("fraction {} accepted", f),
    }
  }

  let mut init = quadratic_init(10);
  init.resampler.acceptable_failure_fraction = 1.0;
  assert!(InversionState::seeded(init, 4).is_ok());
}

#[test]
fn excessive_failure_aborts_iterate() {
  let priors = quadratic_priors();
  let base = quadratic_init(12);
  let init = Init {
    forward_map: Constrained::new(priors.clone(), Tripwire { armed: Cell::new(false), }),
    priors,
    ensemble_count: base.ensemble_count,
    noise_covariance: base.noise_covariance,
    observations: base.observations,
    resampler: Resampler::default(),
  };

  let mut state = InversionState::seeded(init, 5).unwrap();
  state.iterate(1).unwrap();
  let x1 = state.ensemble().to_owned();

  state.forward_map_stats().model.map.armed.set(true);
  match state.iterate(3) {
    Err(Error::ExcessiveFailure { fraction, failed, parameters, }) => {
      assert_eq!(fraction, 1.0);
      assert_eq!(failed, (0..12).collect::<Vec<_>>());
      assert_eq!(parameters.dim(), (2, 12));
      for (i, row) in parameters.rows().into_iter().enumerate() {
        let prior = &state.priors()[i];
        assert!(row.iter().all(|&v| v > prior.lower() && v < prior.upper() ));
      }
    },
    other => panic!("expected an excessive failure, got {:?}", other.map(|_| () )),
  }

  assert_eq!(state.iteration(), 1);
  assert_eq!(state.summaries().len(), 2);
  assert_eq!(state.ensemble(), x1);
}

#[test]
fn padded_identity_contracts_toward_zero() {
  let priors = vec![
    Prior::new(0.0, 1.0, -10.0, 10.0).unwrap(),
    Prior::new(0.0, 1.0, -10.0, 10.0).unwrap(),
  ];
  let init = Init {
    priors,
    ensemble_count: 20,
    noise_covariance: 0.01.into(),
    forward_map: PaddedIdentity { nobs: 10, },
    observations: Array1::zeros(10),
    resampler: Resampler::default(),
  };

  let mut state = InversionState::seeded(init, 6).unwrap();
  let x = state.ensemble().to_owned();
  let g = state.forward_map_output().to_owned();
  let y = state.observations().to_owned();
  let gain = kalman_gain(x.view(), g.view(), state.noise_covariance()).unwrap();

  state.iterate(1).unwrap();
  let updated = state.ensemble().to_owned();

  // the update is K (y - G) plus K η with η ~ N(0, 0.01 I)
  for j in 0..20 {
    let step = &updated.column(j) - &x.column(j);
    let by_hand = gain.dot(&(&y - &g.column(j)));
    for (a, b) in step.iter().zip(by_hand.iter()) {
      assert!((a - b).abs() < 0.5, "member {} strayed from K (y - G)", j);
    }
  }

  let norm = |m: &Array2<f64>| m.iter().map(|v| v * v ).sum::<f64>();
  assert!(norm(&updated) < norm(&x));

  let spread_before = ensemble_covariance(x.view()).diag().sum();
  let spread_after = ensemble_covariance(updated.view()).diag().sum();
  assert!(spread_after < spread_before);
}

#[test]
fn later_iterations_fit_better_on_average() {
  let seeds = 8;
  let mut after_one = 0.0;
  let mut after_five = 0.0;

  for seed in 0..seeds {
    let init = quadratic_init(30);
    let y = init.observations.clone();
    let mut state = InversionState::seeded(init, 100 + seed).unwrap();

    let one = state.iterate(1).unwrap();
    after_one += mse_at(&one, y.view(), 30);
    let five = state.iterate(4).unwrap();
    after_five += mse_at(&five, y.view(), 30);
  }

  assert!(after_five / (seeds as f64) < after_one / (seeds as f64),
          "mse after 5 iterations ({}) not below mse after 1 ({})",
          after_five, after_one);
}
